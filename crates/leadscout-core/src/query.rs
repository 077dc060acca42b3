//! Boolean search expression parser.
//!
//! Grammar (flat precedence, no grouping):
//!
//! - whitespace separates tokens; `"..."` is one exact-phrase token
//! - `field:value` restricts a term to `title`, `body`, `author`, `subreddit`
//!   or `platform`; the value may be quoted
//! - `NOT term`, `-term` and `- term` exclude a term
//! - `OR` turns the following term into an optional (any-of) term
//! - bare terms are required (AND); an explicit `AND` is accepted and ignored
//! - parentheses are tokenized but grouping is not evaluated
//!
//! Operators are recognised only in upper case, so a lowercase `or` is an
//! ordinary search term. [`parse_query`] never fails; [`validate_query`] is
//! the user-facing check.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Title,
    Body,
    Author,
    Subreddit,
    Platform,
}

impl Field {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::Body => "body",
            Field::Author => "author",
            Field::Subreddit => "subreddit",
            Field::Platform => "platform",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Field {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "title" => Ok(Field::Title),
            "body" => Ok(Field::Body),
            "author" => Ok(Field::Author),
            "subreddit" => Ok(Field::Subreddit),
            "platform" => Ok(Field::Platform),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: Field,
    /// Lowercased.
    pub value: String,
}

/// A parsed boolean expression. All terms are stored lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedQuery {
    pub required: Vec<String>,
    pub optional: Vec<String>,
    pub excluded: Vec<String>,
    pub fields: Vec<FieldFilter>,
}

impl ParsedQuery {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.required.is_empty()
            && self.optional.is_empty()
            && self.excluded.is_empty()
            && self.fields.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Phrase(String),
    Field { name: String, value: String },
    Open,
    Close,
}

impl Token {
    fn operator(&self) -> Option<&'static str> {
        match self {
            Token::Word(w) => match w.as_str() {
                "AND" => Some("AND"),
                "OR" => Some("OR"),
                "NOT" => Some("NOT"),
                "-" => Some("-"),
                _ => None,
            },
            _ => None,
        }
    }
}

fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        match c {
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '"' => {
                chars.next();
                let phrase: String = chars.by_ref().take_while(|&ch| ch != '"').collect();
                let phrase = phrase.trim().to_string();
                if !phrase.is_empty() {
                    tokens.push(Token::Phrase(phrase));
                }
            }
            _ => {
                let mut word = String::new();
                let mut quoted_value: Option<String> = None;
                while let Some(&ch) = chars.peek() {
                    if ch.is_whitespace() || ch == '(' || ch == ')' {
                        break;
                    }
                    if ch == '"' && word.ends_with(':') {
                        chars.next();
                        quoted_value = Some(chars.by_ref().take_while(|&q| q != '"').collect());
                        break;
                    }
                    word.push(ch);
                    chars.next();
                }
                tokens.push(classify_word(word, quoted_value));
            }
        }
    }

    tokens
}

fn classify_word(word: String, quoted_value: Option<String>) -> Token {
    if let Some((name, value)) = word.split_once(':') {
        if name.parse::<Field>().is_ok() {
            let value = quoted_value.unwrap_or_else(|| value.to_string());
            return Token::Field {
                name: name.to_string(),
                value: value.trim().to_string(),
            };
        }
    }
    match quoted_value {
        Some(rest) => Token::Word(format!("{word}{rest}")),
        None => Token::Word(word),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Slot {
    Required,
    Optional,
    Excluded,
}

/// Parse a boolean search expression. Total: malformed input degrades to the
/// best-effort interpretation rather than an error.
#[must_use]
pub fn parse_query(input: &str) -> ParsedQuery {
    let mut parsed = ParsedQuery::default();
    let mut negate_next = false;
    let mut optional_next = false;

    for token in tokenize(input) {
        if let Some(op) = token.operator() {
            match op {
                "OR" => optional_next = true,
                "NOT" | "-" => negate_next = true,
                _ => {}
            }
            continue;
        }

        let slot = if negate_next {
            Slot::Excluded
        } else if optional_next {
            Slot::Optional
        } else {
            Slot::Required
        };

        let term = match token {
            Token::Open | Token::Close => continue,
            Token::Field { name, value } => {
                negate_next = false;
                optional_next = false;
                let value = value.to_lowercase();
                if value.is_empty() {
                    continue;
                }
                if slot == Slot::Excluded {
                    parsed.excluded.push(value);
                } else if let Ok(field) = name.parse::<Field>() {
                    parsed.fields.push(FieldFilter { field, value });
                }
                continue;
            }
            Token::Phrase(p) => p.to_lowercase(),
            Token::Word(w) => match w.strip_prefix('-') {
                Some(rest) if !rest.is_empty() => {
                    negate_next = false;
                    optional_next = false;
                    parsed.excluded.push(rest.to_lowercase());
                    continue;
                }
                _ => w.to_lowercase(),
            },
        };

        negate_next = false;
        optional_next = false;
        match slot {
            Slot::Required => parsed.required.push(term),
            Slot::Optional => parsed.optional.push(term),
            Slot::Excluded => parsed.excluded.push(term),
        }
    }

    parsed
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryValidation {
    pub valid: bool,
    pub error: Option<String>,
}

impl QueryValidation {
    fn ok() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(message.into()),
        }
    }
}

/// User-facing validation: rejects unmatched quotes, empty field values and
/// operators that are not followed by a term.
#[must_use]
pub fn validate_query(input: &str) -> QueryValidation {
    if input.chars().filter(|&c| c == '"').count() % 2 != 0 {
        return QueryValidation::fail("unmatched quote");
    }

    let tokens = tokenize(input);

    for token in &tokens {
        if let Token::Field { name, value } = token {
            if value.is_empty() {
                return QueryValidation::fail(format!(
                    "field '{}' needs a value",
                    name.to_ascii_lowercase()
                ));
            }
        }
    }

    let mut pending: Option<&'static str> = None;
    for token in &tokens {
        match token {
            Token::Open | Token::Close => {}
            t => match t.operator() {
                Some(op) => {
                    if let Some(prev) = pending {
                        return QueryValidation::fail(format!(
                            "operator '{prev}' must be followed by a search term, found '{op}'"
                        ));
                    }
                    pending = Some(op);
                }
                None => pending = None,
            },
        }
    }
    if let Some(op) = pending {
        return QueryValidation::fail(format!("operator '{op}' must be followed by a search term"));
    }

    QueryValidation::ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_terms_are_required_and_lowercased() {
        let q = parse_query("Monitoring Dashboard");
        assert_eq!(q.required, vec!["monitoring", "dashboard"]);
        assert!(q.optional.is_empty());
    }

    #[test]
    fn quoted_phrase_is_one_token() {
        let q = parse_query("\"error tracking\" sentry");
        assert_eq!(q.required, vec!["error tracking", "sentry"]);
    }

    #[test]
    fn or_makes_following_terms_optional() {
        let q = parse_query("required OR optional1 OR optional2");
        assert_eq!(q.required, vec!["required"]);
        assert_eq!(q.optional, vec!["optional1", "optional2"]);
    }

    #[test]
    fn exclusion_forms() {
        let q = parse_query("crm NOT salesforce -hubspot - pipedrive");
        assert_eq!(q.required, vec!["crm"]);
        assert_eq!(q.excluded, vec!["salesforce", "hubspot", "pipedrive"]);
    }

    #[test]
    fn field_filters() {
        let q = parse_query("title:pricing author:Alice subreddit:\"Sales Ops\" nosuch:thing");
        assert_eq!(
            q.fields,
            vec![
                FieldFilter {
                    field: Field::Title,
                    value: "pricing".into()
                },
                FieldFilter {
                    field: Field::Author,
                    value: "alice".into()
                },
                FieldFilter {
                    field: Field::Subreddit,
                    value: "sales ops".into()
                },
            ]
        );
        assert_eq!(q.required, vec!["nosuch:thing"]);
    }

    #[test]
    fn parentheses_are_ignored() {
        let q = parse_query("(alpha OR beta) gamma");
        assert_eq!(q.required, vec!["alpha", "gamma"]);
        assert_eq!(q.optional, vec!["beta"]);
    }

    #[test]
    fn explicit_and_is_ignored_and_lowercase_or_is_a_term() {
        let q = parse_query("alpha AND beta or gamma");
        assert_eq!(q.required, vec!["alpha", "beta", "or", "gamma"]);
    }

    #[test]
    fn parse_is_total_on_malformed_input() {
        for input in [
            "",
            "   ",
            "\"unterminated",
            "title:",
            "NOT",
            "OR OR OR",
            "((((",
            "-",
            "title:\"open",
            "::::",
            "\"\"",
        ] {
            let _ = parse_query(input);
        }
        assert!(parse_query("").is_empty());
        assert_eq!(parse_query("\"unterminated phrase").required, vec!["unterminated phrase"]);
    }

    #[test]
    fn validate_accepts_well_formed_queries() {
        for input in [
            "crm",
            "\"lead gen\" OR prospecting",
            "title:pricing NOT free",
            "(a OR b) -c",
            "",
        ] {
            assert!(validate_query(input).valid, "{input} should be valid");
        }
    }

    #[test]
    fn validate_rejects_unmatched_quote() {
        let v = validate_query("\"lead gen");
        assert!(!v.valid);
        assert!(v.error.unwrap().contains("quote"));
    }

    #[test]
    fn validate_rejects_empty_field_value() {
        let v = validate_query("title: ");
        assert!(!v.valid);
        assert!(v.error.unwrap().contains("title"));
    }

    #[test]
    fn validate_rejects_lone_operators() {
        for input in ["AND", "OR", "NOT", "crm OR", "crm NOT OR x"] {
            assert!(!validate_query(input).valid, "{input} should be invalid");
        }
    }
}
