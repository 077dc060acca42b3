//! Platform catalogue.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const FIVE_MINUTES: Duration = Duration::from_secs(5 * 60);
const TEN_MINUTES: Duration = Duration::from_secs(10 * 60);

/// A content source the connectors can poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Reddit,
    HackerNews,
    ProductHunt,
    DevTo,
    GitHub,
    StackOverflow,
    Lobsters,
    Quora,
    G2,
    Capterra,
    Trustpilot,
    #[serde(rename = "app_store")]
    AppStore,
    #[serde(rename = "play_store")]
    PlayStore,
    YouTube,
}

impl Platform {
    pub const ALL: [Platform; 14] = [
        Platform::Reddit,
        Platform::HackerNews,
        Platform::ProductHunt,
        Platform::DevTo,
        Platform::GitHub,
        Platform::StackOverflow,
        Platform::Lobsters,
        Platform::Quora,
        Platform::G2,
        Platform::Capterra,
        Platform::Trustpilot,
        Platform::AppStore,
        Platform::PlayStore,
        Platform::YouTube,
    ];

    /// Stable identifier used in the database and on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Platform::Reddit => "reddit",
            Platform::HackerNews => "hackernews",
            Platform::ProductHunt => "producthunt",
            Platform::DevTo => "devto",
            Platform::GitHub => "github",
            Platform::StackOverflow => "stackoverflow",
            Platform::Lobsters => "lobsters",
            Platform::Quora => "quora",
            Platform::G2 => "g2",
            Platform::Capterra => "capterra",
            Platform::Trustpilot => "trustpilot",
            Platform::AppStore => "app_store",
            Platform::PlayStore => "play_store",
            Platform::YouTube => "youtube",
        }
    }

    /// Window across which one cycle's due monitors are spread.
    ///
    /// Developer and low-volume platforms have tight public rate limits, so
    /// their batches are compressed into five minutes; high-volume platforms
    /// get ten.
    #[must_use]
    pub const fn stagger_window(self) -> Duration {
        match self {
            Platform::HackerNews
            | Platform::ProductHunt
            | Platform::DevTo
            | Platform::GitHub
            | Platform::StackOverflow
            | Platform::Lobsters => FIVE_MINUTES,
            Platform::Reddit
            | Platform::Quora
            | Platform::G2
            | Platform::Capterra
            | Platform::Trustpilot
            | Platform::AppStore
            | Platform::PlayStore
            | Platform::YouTube => TEN_MINUTES,
        }
    }

    /// Review and app-store sources scan a specific product page rather than
    /// a keyword search, so the monitor must supply a target URL.
    #[must_use]
    pub const fn requires_target_url(self) -> bool {
        matches!(
            self,
            Platform::G2
                | Platform::Capterra
                | Platform::Trustpilot
                | Platform::AppStore
                | Platform::PlayStore
        )
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown platform: {0}")]
pub struct UnknownPlatform(pub String);

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str() == needle)
            .ok_or_else(|| UnknownPlatform(s.to_string()))
    }
}
