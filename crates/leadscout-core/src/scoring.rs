//! Lead-quality scoring.
//!
//! [`score_lead`] is deterministic and side-effect free so stored scores can
//! be recomputed whenever weights change. Components:
//!
//! | component      | range  |
//! |----------------|--------|
//! | intent         | 0..=40 |
//! | engagement     | 0..=20 |
//! | recency        | 0..=15 |
//! | author quality | 0..=15 |
//! | category       | 0..=10 |

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Comparison, evaluation, problem statements and purchase language.
const HIGH_INTENT_PHRASES: &[&str] = &[
    "looking for",
    "alternative to",
    "alternatives to",
    "replacement for",
    "recommend a",
    "recommendations for",
    "switching from",
    "migrating from",
    "compared to",
    "versus",
    "vs",
    "frustrated with",
    "struggling with",
    "problem with",
    "doesn't work",
    "need a tool",
    "need a solution",
    "willing to pay",
    "budget for",
    "pricing for",
    "want to buy",
    "ready to purchase",
];

/// Question phrasing.
const MEDIUM_INTENT_PHRASES: &[&str] = &[
    "how do i",
    "how to",
    "any suggestions",
    "anyone use",
    "anyone tried",
    "what do you use",
    "is there a",
    "which is better",
    "thoughts on",
    "advice on",
];

fn compile(phrases: &[&str]) -> Vec<Regex> {
    phrases
        .iter()
        .map(|p| Regex::new(&format!(r"(?i)\b{}\b", regex::escape(p))).expect("valid regex"))
        .collect()
}

static HIGH_INTENT: LazyLock<Vec<Regex>> = LazyLock::new(|| compile(HIGH_INTENT_PHRASES));
static MEDIUM_INTENT: LazyLock<Vec<Regex>> = LazyLock::new(|| compile(MEDIUM_INTENT_PHRASES));

/// Conversation category assigned by enrichment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationCategory {
    SolutionSeeking,
    PainPoint,
    ComparisonRequest,
    AdviceRequest,
    Feedback,
    General,
}

impl ConversationCategory {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ConversationCategory::SolutionSeeking => "solution_seeking",
            ConversationCategory::PainPoint => "pain_point",
            ConversationCategory::ComparisonRequest => "comparison_request",
            ConversationCategory::AdviceRequest => "advice_request",
            ConversationCategory::Feedback => "feedback",
            ConversationCategory::General => "general",
        }
    }

    const fn points(self) -> f64 {
        match self {
            ConversationCategory::SolutionSeeking => 10.0,
            ConversationCategory::PainPoint => 8.0,
            ConversationCategory::ComparisonRequest => 7.0,
            ConversationCategory::AdviceRequest => 5.0,
            ConversationCategory::Feedback => 3.0,
            ConversationCategory::General => 1.0,
        }
    }
}

impl fmt::Display for ConversationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversationCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "solution_seeking" => Ok(ConversationCategory::SolutionSeeking),
            "pain_point" => Ok(ConversationCategory::PainPoint),
            "comparison_request" => Ok(ConversationCategory::ComparisonRequest),
            "advice_request" => Ok(ConversationCategory::AdviceRequest),
            "feedback" => Ok(ConversationCategory::Feedback),
            "general" => Ok(ConversationCategory::General),
            other => Err(format!("unknown conversation category: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LeadScoreInput<'a> {
    pub title: &'a str,
    pub body: &'a str,
    /// Raw platform engagement (upvotes, points, reactions).
    pub engagement: Option<f64>,
    pub posted_at: Option<DateTime<Utc>>,
    pub author_karma: Option<i64>,
    pub author_account_age_days: Option<i64>,
    pub category: Option<ConversationCategory>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeadScore {
    pub intent: f64,
    pub engagement: f64,
    pub recency: f64,
    pub author_quality: f64,
    pub category: f64,
    pub total: f64,
}

impl LeadScore {
    /// Total rounded to the integer stored on the result row.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn rounded_total(&self) -> i32 {
        self.total.round().clamp(0.0, 100.0) as i32
    }
}

#[must_use]
pub fn score_lead(input: &LeadScoreInput<'_>, now: DateTime<Utc>) -> LeadScore {
    let text = format!("{} {}", input.title, input.body);

    let intent = intent_score(&text);
    let engagement = engagement_score(input.engagement.unwrap_or(0.0));
    let recency = recency_score(input.posted_at.map(|posted| {
        #[allow(clippy::cast_precision_loss)]
        let hours = (now - posted).num_minutes() as f64 / 60.0;
        hours
    }));
    let author_quality = karma_points(input.author_karma) + account_age_points(input.author_account_age_days);
    let category = input.category.map_or(5.0, ConversationCategory::points);

    let total = (intent + engagement + recency + author_quality + category).clamp(0.0, 100.0);

    LeadScore {
        intent,
        engagement,
        recency,
        author_quality,
        category,
        total,
    }
}

fn count_hits(patterns: &[Regex], text: &str) -> usize {
    patterns.iter().filter(|re| re.is_match(text)).count()
}

#[allow(clippy::cast_precision_loss)]
fn intent_score(text: &str) -> f64 {
    let high = count_hits(&HIGH_INTENT, text);
    let medium = count_hits(&MEDIUM_INTENT, text);

    let high_points = if high == 0 {
        0.0
    } else {
        15.0 + ((high - 1) as f64 * 5.0).min(15.0)
    };
    let medium_points = if medium == 0 {
        0.0
    } else {
        5.0 + ((medium - 1) as f64 * 2.0).min(5.0)
    };

    high_points + medium_points
}

/// Piecewise linear up to 100, logarithmic above. The log segment is
/// floored at 15 so the curve never dips just past 100.
fn engagement_score(raw: f64) -> f64 {
    let x = raw.max(0.0);
    if x <= 10.0 {
        x / 10.0 * 5.0
    } else if x <= 50.0 {
        5.0 + (x - 10.0) / 40.0 * 5.0
    } else if x <= 100.0 {
        10.0 + (x - 50.0) / 50.0 * 5.0
    } else {
        (15.0 + (x - 100.0).log10() * 2.0).clamp(15.0, 20.0)
    }
}

fn recency_score(age_hours: Option<f64>) -> f64 {
    let Some(age) = age_hours else {
        return 7.0;
    };
    match age.max(0.0) {
        a if a < 24.0 => 15.0,
        a if a < 72.0 => 12.0,
        a if a < 168.0 => 9.0,
        a if a < 336.0 => 6.0,
        a if a < 720.0 => 3.0,
        _ => 1.0,
    }
}

fn karma_points(karma: Option<i64>) -> f64 {
    match karma {
        None => 5.0,
        Some(k) if k < 0 => 0.0,
        Some(k) if k < 10 => 2.0,
        Some(k) if k < 100 => 4.0,
        Some(k) if k < 1_000 => 6.0,
        Some(k) if k < 10_000 => 8.0,
        Some(_) => 10.0,
    }
}

fn account_age_points(days: Option<i64>) -> f64 {
    match days {
        None => 2.0,
        Some(d) if d < 7 => 0.0,
        Some(d) if d < 30 => 1.0,
        Some(d) if d < 180 => 2.0,
        Some(d) if d < 365 => 3.0,
        Some(d) if d < 730 => 4.0,
        Some(_) => 5.0,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn unknown_inputs_use_midpoints() {
        let score = score_lead(&LeadScoreInput::default(), now());
        assert!((score.intent - 0.0).abs() < f64::EPSILON);
        assert!((score.engagement - 0.0).abs() < f64::EPSILON);
        assert!((score.recency - 7.0).abs() < f64::EPSILON);
        assert!((score.author_quality - 7.0).abs() < f64::EPSILON);
        assert!((score.category - 5.0).abs() < f64::EPSILON);
        assert!((score.total - 19.0).abs() < f64::EPSILON);
    }

    #[test]
    fn intent_first_hit_and_caps() {
        assert!((intent_score("looking for a crm") - 15.0).abs() < f64::EPSILON);
        assert!((intent_score("looking for an alternative to hubspot") - 20.0).abs() < f64::EPSILON);
        let everything = HIGH_INTENT_PHRASES.join(" . ") + " " + &MEDIUM_INTENT_PHRASES.join(" . ");
        assert!((intent_score(&everything) - 40.0).abs() < f64::EPSILON);
        assert!((intent_score("how to do this") - 5.0).abs() < f64::EPSILON);
        assert!((intent_score("how to? any suggestions?") - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn intent_respects_word_boundaries() {
        assert!((intent_score("canvas vsync settings")).abs() < f64::EPSILON);
        assert!((intent_score("Notion vs Obsidian") - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn engagement_breakpoints() {
        assert!((engagement_score(0.0)).abs() < f64::EPSILON);
        assert!((engagement_score(10.0) - 5.0).abs() < f64::EPSILON);
        assert!((engagement_score(50.0) - 10.0).abs() < f64::EPSILON);
        assert!((engagement_score(100.0) - 15.0).abs() < f64::EPSILON);
        assert!((engagement_score(110.0) - 17.0).abs() < 1e-9);
        assert!((engagement_score(1_000_000.0) - 20.0).abs() < f64::EPSILON);
        assert!((engagement_score(-5.0)).abs() < f64::EPSILON);
    }

    #[test]
    fn engagement_is_monotonic() {
        let mut previous = engagement_score(0.0);
        for step in 1..5_000 {
            let current = engagement_score(f64::from(step) * 0.5);
            assert!(current >= previous, "dropped at {}", f64::from(step) * 0.5);
            previous = current;
        }
    }

    #[test]
    fn recency_steps() {
        let at = |hours: i64| {
            let posted = now() - Duration::hours(hours);
            score_lead(
                &LeadScoreInput {
                    posted_at: Some(posted),
                    ..LeadScoreInput::default()
                },
                now(),
            )
            .recency
        };
        assert!((at(1) - 15.0).abs() < f64::EPSILON);
        assert!((at(48) - 12.0).abs() < f64::EPSILON);
        assert!((at(100) - 9.0).abs() < f64::EPSILON);
        assert!((at(200) - 6.0).abs() < f64::EPSILON);
        assert!((at(500) - 3.0).abs() < f64::EPSILON);
        assert!((at(5_000) - 1.0).abs() < f64::EPSILON);
        assert!((at(-3) - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn total_is_monotonic_in_each_input() {
        let base = LeadScoreInput {
            title: "Thoughts on our onboarding",
            body: "",
            engagement: Some(20.0),
            posted_at: Some(now() - Duration::hours(100)),
            author_karma: Some(50),
            author_account_age_days: Some(40),
            category: Some(ConversationCategory::General),
        };
        let baseline = score_lead(&base, now()).total;

        let more_engagement = LeadScoreInput {
            engagement: Some(500.0),
            ..base.clone()
        };
        assert!(score_lead(&more_engagement, now()).total >= baseline);

        let fresher = LeadScoreInput {
            posted_at: Some(now() - Duration::hours(2)),
            ..base.clone()
        };
        assert!(score_lead(&fresher, now()).total >= baseline);

        let with_intent = LeadScoreInput {
            title: "Thoughts on our onboarding, looking for a replacement for it",
            ..base.clone()
        };
        assert!(score_lead(&with_intent, now()).total > baseline);
    }

    #[test]
    fn total_stays_within_bounds() {
        let maxed = "looking for alternative to replacement for switching from versus \
                     how to any suggestions what do you use";
        let input = LeadScoreInput {
            title: maxed,
            body: maxed,
            engagement: Some(1e12),
            posted_at: Some(now()),
            author_karma: Some(1_000_000),
            author_account_age_days: Some(5_000),
            category: Some(ConversationCategory::SolutionSeeking),
        };
        let score = score_lead(&input, now());
        assert!(score.total <= 100.0);
        assert!(score.total >= 90.0);
        assert_eq!(score.rounded_total(), score.total.round() as i32);

        let worst = LeadScoreInput {
            engagement: Some(-10.0),
            posted_at: Some(now() - Duration::days(365)),
            author_karma: Some(-50),
            author_account_age_days: Some(0),
            category: Some(ConversationCategory::General),
            ..LeadScoreInput::default()
        };
        assert!(score_lead(&worst, now()).total >= 0.0);
    }

    #[test]
    fn category_lookup() {
        assert_eq!(
            "solution-seeking".parse::<ConversationCategory>().unwrap(),
            ConversationCategory::SolutionSeeking
        );
        assert!("nonsense".parse::<ConversationCategory>().is_err());
        assert!(ConversationCategory::SolutionSeeking.points() > ConversationCategory::General.points());
    }
}
