use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// A monitor's optional UTC scanning window.
///
/// `start_hour` is inclusive and `end_hour` exclusive. When `start_hour >
/// end_hour` the window wraps past midnight; equal hours mean all day.
/// `weekdays` uses `0 = Monday ..= 6 = Sunday`; empty means every day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveHours {
    pub start_hour: u32,
    pub end_hour: u32,
    #[serde(default)]
    pub weekdays: Vec<u32>,
}

impl ActiveHours {
    /// Reject hours outside `0..=23` and weekdays outside `0..=6`.
    ///
    /// # Errors
    ///
    /// Returns a human-readable message naming the offending value.
    pub fn validate(&self) -> Result<(), String> {
        if self.start_hour > 23 || self.end_hour > 23 {
            return Err(format!(
                "active hours must be between 0 and 23 (got {}-{})",
                self.start_hour, self.end_hour
            ));
        }
        if let Some(day) = self.weekdays.iter().find(|d| **d > 6) {
            return Err(format!("weekday {day} is out of range 0-6"));
        }
        Ok(())
    }

    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        let day = now.weekday().num_days_from_monday();
        if !self.weekdays.is_empty() && !self.weekdays.contains(&day) {
            return false;
        }

        let hour = now.hour();
        match self.start_hour.cmp(&self.end_hour) {
            std::cmp::Ordering::Equal => true,
            std::cmp::Ordering::Less => hour >= self.start_hour && hour < self.end_hour,
            std::cmp::Ordering::Greater => hour >= self.start_hour || hour < self.end_hour,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    // 2026-03-02 is a Monday.
    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 30, 0).unwrap()
    }

    #[test]
    fn daytime_window() {
        let hours = ActiveHours {
            start_hour: 9,
            end_hour: 17,
            weekdays: vec![],
        };
        assert!(hours.is_active(at(2, 9)));
        assert!(hours.is_active(at(2, 16)));
        assert!(!hours.is_active(at(2, 17)));
        assert!(!hours.is_active(at(2, 3)));
    }

    #[test]
    fn overnight_window_wraps() {
        let hours = ActiveHours {
            start_hour: 22,
            end_hour: 6,
            weekdays: vec![],
        };
        assert!(hours.is_active(at(2, 23)));
        assert!(hours.is_active(at(2, 2)));
        assert!(!hours.is_active(at(2, 12)));
    }

    #[test]
    fn weekday_filter() {
        let weekdays_only = ActiveHours {
            start_hour: 0,
            end_hour: 0,
            weekdays: vec![0, 1, 2, 3, 4],
        };
        assert!(weekdays_only.is_active(at(2, 12)));
        // 2026-03-07 is a Saturday.
        assert!(!weekdays_only.is_active(at(7, 12)));
    }

    #[test]
    fn validate_rejects_out_of_range() {
        let bad = ActiveHours {
            start_hour: 24,
            end_hour: 3,
            weekdays: vec![],
        };
        assert!(bad.validate().is_err());
        let bad_day = ActiveHours {
            start_hour: 1,
            end_hour: 3,
            weekdays: vec![7],
        };
        assert!(bad_day.validate().is_err());
    }
}
