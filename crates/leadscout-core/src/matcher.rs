//! Content matching against parsed queries and monitor configurations.

use serde::{Deserialize, Serialize};

use crate::query::{parse_query, Field, ParsedQuery};

/// The fields of a candidate item that matching looks at.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchContent<'a> {
    pub title: &'a str,
    pub body: &'a str,
    pub author: Option<&'a str>,
    pub subreddit: Option<&'a str>,
    pub platform: Option<&'a str>,
}

impl MatchContent<'_> {
    fn haystack(&self) -> String {
        format!("{} {}", self.title, self.body).to_lowercase()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchOutcome {
    pub matches: bool,
    pub matched_terms: Vec<String>,
    pub reason: String,
}

impl MatchOutcome {
    fn rejected(reason: String) -> Self {
        Self {
            matches: false,
            matched_terms: Vec::new(),
            reason,
        }
    }
}

/// Evaluate a parsed query against content.
///
/// Checks run in order and stop at the first failure: required terms,
/// excluded terms, optional terms (at least one, if any exist), then field
/// filters. An empty query matches everything.
#[must_use]
pub fn match_content(content: &MatchContent<'_>, query: &ParsedQuery) -> MatchOutcome {
    if query.is_empty() {
        return MatchOutcome {
            matches: true,
            matched_terms: Vec::new(),
            reason: "empty query matches everything".to_string(),
        };
    }

    let haystack = content.haystack();
    let mut matched_terms = Vec::new();

    for term in &query.required {
        if !haystack.contains(term.as_str()) {
            return MatchOutcome::rejected(format!("missing required term \"{term}\""));
        }
        matched_terms.push(term.clone());
    }

    if let Some(term) = query
        .excluded
        .iter()
        .find(|t| haystack.contains(t.as_str()))
    {
        return MatchOutcome::rejected(format!("contains excluded term \"{term}\""));
    }

    if !query.optional.is_empty() {
        let hits: Vec<&String> = query
            .optional
            .iter()
            .filter(|t| haystack.contains(t.as_str()))
            .collect();
        if hits.is_empty() {
            return MatchOutcome::rejected("none of the optional terms matched".to_string());
        }
        matched_terms.extend(hits.into_iter().cloned());
    }

    for filter in &query.fields {
        if !field_matches(content, filter.field, &filter.value) {
            return MatchOutcome::rejected(format!(
                "field filter {}:{} did not match",
                filter.field, filter.value
            ));
        }
        matched_terms.push(format!("{}:{}", filter.field, filter.value));
    }

    MatchOutcome {
        matches: true,
        matched_terms,
        reason: "all query conditions satisfied".to_string(),
    }
}

/// Title and body filters are substring matches; author, subreddit and
/// platform must be equal (case-insensitive).
fn field_matches(content: &MatchContent<'_>, field: Field, value: &str) -> bool {
    match field {
        Field::Title => content.title.to_lowercase().contains(value),
        Field::Body => content.body.to_lowercase().contains(value),
        Field::Author => eq_ignore_case(content.author, value),
        Field::Subreddit => eq_ignore_case(
            content
                .subreddit
                .map(|s| s.strip_prefix("r/").unwrap_or(s)),
            value.strip_prefix("r/").unwrap_or(value),
        ),
        Field::Platform => eq_ignore_case(content.platform, value),
    }
}

fn eq_ignore_case(actual: Option<&str>, expected: &str) -> bool {
    actual.is_some_and(|a| a.trim().to_lowercase() == expected)
}

// ---------------------------------------------------------------------------
// Monitor matching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    BooleanSearch,
    Company,
    Keyword,
}

impl MatchType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            MatchType::BooleanSearch => "boolean_search",
            MatchType::Company => "company",
            MatchType::Keyword => "keyword",
        }
    }
}

/// The matching-relevant part of a monitor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorMatchConfig {
    pub keywords: Vec<String>,
    pub boolean_query: Option<String>,
    pub company_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorMatch {
    pub matches: bool,
    /// The strategy that decided the outcome; `None` when no strategy applied.
    pub match_type: Option<MatchType>,
    pub matched_terms: Vec<String>,
}

impl MonitorMatch {
    fn no_strategy() -> Self {
        Self {
            matches: false,
            match_type: None,
            matched_terms: Vec::new(),
        }
    }
}

enum Verdict {
    Decided(MonitorMatch),
    Defer,
}

/// Match strategies in priority order. The first strategy that reaches a
/// verdict wins.
#[derive(Debug, Clone, Copy)]
enum Strategy {
    BooleanSearch,
    Company,
    Keyword,
}

const STRATEGIES: [Strategy; 3] = [Strategy::BooleanSearch, Strategy::Company, Strategy::Keyword];

/// A monitor configuration with its boolean query parsed once, for reuse
/// across every candidate in a scan.
#[derive(Debug, Clone)]
pub struct CompiledMonitorMatcher {
    boolean: Option<ParsedQuery>,
    company: Option<String>,
    keywords: Vec<String>,
}

impl CompiledMonitorMatcher {
    #[must_use]
    pub fn new(config: &MonitorMatchConfig) -> Self {
        let boolean = config
            .boolean_query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(parse_query);
        let company = config
            .company_name
            .as_deref()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty());
        let keywords = config
            .keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self {
            boolean,
            company,
            keywords,
        }
    }

    #[must_use]
    pub fn evaluate(&self, content: &MatchContent<'_>) -> MonitorMatch {
        let haystack = content.haystack();
        for strategy in STRATEGIES {
            if let Verdict::Decided(result) = self.apply(strategy, content, &haystack) {
                return result;
            }
        }
        MonitorMatch::no_strategy()
    }

    fn apply(&self, strategy: Strategy, content: &MatchContent<'_>, haystack: &str) -> Verdict {
        match strategy {
            Strategy::BooleanSearch => match &self.boolean {
                Some(query) => {
                    let outcome = match_content(content, query);
                    Verdict::Decided(MonitorMatch {
                        matches: outcome.matches,
                        match_type: Some(MatchType::BooleanSearch),
                        matched_terms: outcome.matched_terms,
                    })
                }
                None => Verdict::Defer,
            },
            Strategy::Company => match &self.company {
                Some(company) if haystack.contains(company.as_str()) => {
                    Verdict::Decided(MonitorMatch {
                        matches: true,
                        match_type: Some(MatchType::Company),
                        matched_terms: vec![company.clone()],
                    })
                }
                _ => Verdict::Defer,
            },
            Strategy::Keyword => {
                if self.keywords.is_empty() {
                    return Verdict::Defer;
                }
                let hits: Vec<String> = self
                    .keywords
                    .iter()
                    .filter(|k| haystack.contains(k.as_str()))
                    .cloned()
                    .collect();
                Verdict::Decided(MonitorMatch {
                    matches: !hits.is_empty(),
                    match_type: Some(MatchType::Keyword),
                    matched_terms: hits,
                })
            }
        }
    }
}

/// Match content against a monitor: a configured boolean query fully
/// determines the outcome; otherwise a company-name hit wins, falling back
/// to any-of keyword matching.
#[must_use]
pub fn content_matches_monitor(
    content: &MatchContent<'_>,
    config: &MonitorMatchConfig,
) -> MonitorMatch {
    CompiledMonitorMatcher::new(config).evaluate(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content<'a>(title: &'a str, body: &'a str) -> MatchContent<'a> {
        MatchContent {
            title,
            body,
            ..MatchContent::default()
        }
    }

    #[test]
    fn missing_required_term_fails() {
        let outcome = match_content(
            &content("Best monitoring tools", ""),
            &parse_query("monitoring dashboard"),
        );
        assert!(!outcome.matches);
        assert!(outcome.reason.contains("dashboard"));
    }

    #[test]
    fn required_plus_one_optional_matches() {
        let outcome = match_content(
            &content("required optional1 content", ""),
            &parse_query("required OR optional1 OR optional2"),
        );
        assert!(outcome.matches);
        assert_eq!(outcome.matched_terms, vec!["required", "optional1"]);
    }

    #[test]
    fn optional_terms_need_one_hit() {
        let outcome = match_content(
            &content("required only", ""),
            &parse_query("required OR optional1 OR optional2"),
        );
        assert!(!outcome.matches);
    }

    #[test]
    fn excluded_term_rejects() {
        let outcome = match_content(
            &content("Looking for a CRM", "not salesforce please"),
            &parse_query("crm -salesforce"),
        );
        assert!(!outcome.matches);
        assert!(outcome.reason.contains("salesforce"));
    }

    #[test]
    fn matching_is_case_insensitive_across_title_and_body() {
        let outcome = match_content(
            &content("Need an ALTERNATIVE", "to Zendesk"),
            &parse_query("alternative zendesk"),
        );
        assert!(outcome.matches);
    }

    #[test]
    fn empty_query_matches_everything() {
        assert!(match_content(&content("", ""), &parse_query("")).matches);
    }

    #[test]
    fn field_filters_use_substring_or_equality() {
        let item = MatchContent {
            title: "Pricing question",
            body: "how much?",
            author: Some("Alice"),
            subreddit: Some("r/SaaS"),
            platform: Some("reddit"),
        };
        assert!(match_content(&item, &parse_query("title:pric author:alice")).matches);
        assert!(!match_content(&item, &parse_query("author:ali")).matches);
        assert!(match_content(&item, &parse_query("subreddit:saas platform:Reddit")).matches);
        assert!(!match_content(&item, &parse_query("platform:hackernews")).matches);
    }

    #[test]
    fn field_filter_against_missing_field_fails() {
        let outcome = match_content(&content("hello", ""), &parse_query("author:bob"));
        assert!(!outcome.matches);
    }

    #[test]
    fn boolean_query_takes_precedence_over_keywords() {
        let config = MonitorMatchConfig {
            keywords: vec!["crm".into()],
            boolean_query: Some("helpdesk".into()),
            company_name: Some("Acme".into()),
        };
        let result = content_matches_monitor(&content("Acme crm review", ""), &config);
        assert!(!result.matches);
        assert_eq!(result.match_type, Some(MatchType::BooleanSearch));
    }

    #[test]
    fn company_wins_over_keyword() {
        let config = MonitorMatchConfig {
            keywords: vec!["crm".into()],
            boolean_query: None,
            company_name: Some("Acme".into()),
        };
        let result = content_matches_monitor(&content("Thoughts on acme crm?", ""), &config);
        assert!(result.matches);
        assert_eq!(result.match_type, Some(MatchType::Company));
    }

    #[test]
    fn falls_back_to_keyword_any_of() {
        let config = MonitorMatchConfig {
            keywords: vec!["crm".into(), "pipeline".into()],
            boolean_query: Some("   ".into()),
            company_name: Some("Acme".into()),
        };
        let result = content_matches_monitor(&content("Sales pipeline tips", ""), &config);
        assert!(result.matches);
        assert_eq!(result.match_type, Some(MatchType::Keyword));
        assert_eq!(result.matched_terms, vec!["pipeline"]);

        let miss = content_matches_monitor(&content("Unrelated", ""), &config);
        assert!(!miss.matches);
        assert_eq!(miss.match_type, Some(MatchType::Keyword));
    }

    #[test]
    fn nothing_configured_never_matches() {
        let result = content_matches_monitor(&content("anything", ""), &MonitorMatchConfig::default());
        assert!(!result.matches);
        assert!(result.match_type.is_none());
    }

    #[test]
    fn match_type_ids() {
        assert_eq!(MatchType::BooleanSearch.as_str(), "boolean_search");
        assert_eq!(
            serde_json::to_string(&MatchType::BooleanSearch).unwrap(),
            "\"boolean_search\""
        );
    }
}
