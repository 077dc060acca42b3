//! Delivery state machine: `pending -> {success | retrying} -> {success |
//! retrying | failed}`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Minutes to wait after the n-th failed attempt; attempts past the end reuse
/// the last rung.
pub const BACKOFF_LADDER_MINUTES: [i64; 5] = [1, 5, 15, 60, 240];

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Success,
    Retrying,
    Failed,
}

impl DeliveryStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Success => "success",
            DeliveryStatus::Retrying => "retrying",
            DeliveryStatus::Failed => "failed",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Success | DeliveryStatus::Failed)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "success" => Ok(DeliveryStatus::Success),
            "retrying" => Ok(DeliveryStatus::Retrying),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(format!("unknown delivery status: {other}")),
        }
    }
}

/// Backoff after `failed_attempts` failures (1-based).
#[must_use]
pub fn backoff_for(failed_attempts: u32) -> Duration {
    let index = usize::try_from(failed_attempts.saturating_sub(1))
        .unwrap_or(usize::MAX)
        .min(BACKOFF_LADDER_MINUTES.len() - 1);
    Duration::minutes(BACKOFF_LADDER_MINUTES[index])
}

/// What one POST produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult {
    Delivered { status_code: u16 },
    /// Non-2xx (`status_code` set) or transport failure (`None`).
    Failed {
        status_code: Option<u16>,
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryState {
    pub status: DeliveryStatus,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_status_code: Option<u16>,
    pub last_error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DeliveryState {
    #[must_use]
    pub fn pending(max_attempts: u32) -> Self {
        Self {
            status: DeliveryStatus::Pending,
            attempt_count: 0,
            max_attempts: max_attempts.max(1),
            next_retry_at: None,
            last_status_code: None,
            last_error: None,
            completed_at: None,
        }
    }

    /// Apply one attempt. Terminal states are returned unchanged.
    #[must_use]
    pub fn next(&self, result: &AttemptResult, now: DateTime<Utc>) -> Self {
        if self.status.is_terminal() {
            return self.clone();
        }
        let attempt_count = (self.attempt_count + 1).min(self.max_attempts);

        match result {
            AttemptResult::Delivered { status_code } => Self {
                status: DeliveryStatus::Success,
                attempt_count,
                next_retry_at: None,
                last_status_code: Some(*status_code),
                last_error: None,
                completed_at: Some(now),
                ..self.clone()
            },
            AttemptResult::Failed { status_code, error } if attempt_count < self.max_attempts => {
                Self {
                    status: DeliveryStatus::Retrying,
                    attempt_count,
                    next_retry_at: Some(now + backoff_for(attempt_count)),
                    last_status_code: *status_code,
                    last_error: Some(error.clone()),
                    completed_at: None,
                    ..self.clone()
                }
            }
            AttemptResult::Failed { status_code, error } => Self {
                status: DeliveryStatus::Failed,
                attempt_count,
                next_retry_at: None,
                last_status_code: *status_code,
                last_error: Some(error.clone()),
                completed_at: Some(now),
                ..self.clone()
            },
        }
    }
}
