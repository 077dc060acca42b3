use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::matcher::MatchContent;

/// A normalized item produced by a platform connector, before dedup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateItem {
    /// Canonical URL; the dedup key within a monitor.
    pub source_url: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub posted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub engagement_metric: Option<f64>,
    /// Platform-specific extras (subreddit, karma, app version, ...).
    #[serde(default)]
    pub platform_metadata: serde_json::Value,
}

impl CandidateItem {
    /// Subreddit name from the metadata bag, when the connector supplied one.
    #[must_use]
    pub fn subreddit(&self) -> Option<&str> {
        self.platform_metadata.get("subreddit")?.as_str()
    }

    #[must_use]
    pub fn author_karma(&self) -> Option<i64> {
        self.platform_metadata.get("author_karma")?.as_i64()
    }

    #[must_use]
    pub fn author_account_age_days(&self) -> Option<i64> {
        self.platform_metadata.get("author_account_age_days")?.as_i64()
    }

    #[must_use]
    pub fn match_content<'a>(&'a self, platform: &'a str) -> MatchContent<'a> {
        MatchContent {
            title: &self.title,
            body: &self.body,
            author: self.author.as_deref(),
            subreddit: self.subreddit(),
            platform: Some(platform),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_sparse_fields() {
        let item: CandidateItem = serde_json::from_value(serde_json::json!({
            "source_url": "https://example.com/a",
            "title": "Hello",
            "platform_metadata": {"subreddit": "SaaS", "author_karma": 420}
        }))
        .unwrap();
        assert_eq!(item.body, "");
        assert!(item.author.is_none());
        assert_eq!(item.subreddit(), Some("SaaS"));
        assert_eq!(item.author_karma(), Some(420));
        assert_eq!(item.author_account_age_days(), None);
    }
}
