//! Built-in classifier stages
//!
//! In canonical order: [`LexicalStage`], [`StructuralStage`],
//! [`ExclusionStage`], [`CompletenessStage`].

use super::{Stage, StageOutcome};
use crate::domain::{Annotations, RawRecord, Result, SieveError};
use regex::Regex;
use serde_json::{json, Value};

/// Annotation key: first relevance keyword that matched
pub const MATCHED_KEYWORD: &str = "matched_keyword";
/// Annotation key: number of distinct keywords that matched
pub const LEXICAL_HITS: &str = "lexical_hits";
/// Annotation key: `high` or `low`
pub const LEXICAL_CONFIDENCE: &str = "lexical_confidence";
/// Annotation key: declared topic that matched
pub const MATCHED_TOPIC: &str = "matched_topic";
/// Annotation key: score of the matched topic, when the source provides one
pub const TOPIC_SCORE: &str = "topic_score";

/// Concatenated text of the named fields; arrays contribute each string element
fn field_text(record: &RawRecord, fields: &[String]) -> String {
    let mut text = String::new();
    for field in fields {
        match record.field(field) {
            Some(Value::String(s)) => {
                text.push_str(s);
                text.push('\n');
            }
            Some(Value::Array(items)) => {
                for item in items {
                    if let Value::String(s) = item {
                        text.push_str(s);
                        text.push('\n');
                    }
                }
            }
            Some(Value::Number(n)) => {
                text.push_str(&n.to_string());
                text.push('\n');
            }
            _ => {}
        }
    }
    text
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Case-insensitive matcher for one keyword
///
/// In whole-word mode a `\b` is only placed on an edge that ends in a word
/// character; keywords such as "C++" or ".NET" get a non-word-or-boundary
/// guard on their punctuated side instead.
fn keyword_regex(keyword: &str, whole_word: bool) -> Result<Regex> {
    let trimmed = keyword.trim();
    let escaped = regex::escape(trimmed);
    let pattern = if whole_word {
        let lead = match trimmed.chars().next() {
            Some(c) if is_word_char(c) => r"\b",
            _ => r"(?:^|\W)",
        };
        let tail = match trimmed.chars().last() {
            Some(c) if is_word_char(c) => r"\b",
            _ => r"(?:\W|$)",
        };
        format!("(?i){lead}{escaped}{tail}")
    } else {
        format!("(?i){}", escaped)
    };
    Regex::new(&pattern)
        .map_err(|e| SieveError::Policy(format!("Invalid keyword '{}': {}", keyword, e)))
}

/// Cheap keyword match over text fields
///
/// Rejects records that mention none of the vocabulary. Whole-word matching
/// keeps a keyword from hitting inside an unrelated longer word.
pub struct LexicalStage {
    fields: Vec<String>,
    keywords: Vec<(String, Regex, bool)>,
}

impl LexicalStage {
    /// Build the stage; `high_confidence` keywords are matched too and mark
    /// the match as high confidence
    ///
    /// # Errors
    ///
    /// Returns [`SieveError::Policy`] if there are no fields or keywords.
    pub fn new(
        fields: Vec<String>,
        keywords: &[String],
        high_confidence: &[String],
        whole_word: bool,
    ) -> Result<Self> {
        if fields.is_empty() {
            return Err(SieveError::Policy("lexical.fields cannot be empty".to_string()));
        }

        let mut compiled = Vec::new();
        for keyword in high_confidence {
            if !keyword.trim().is_empty() {
                compiled.push((keyword.trim().to_string(), keyword_regex(keyword, whole_word)?, true));
            }
        }
        for keyword in keywords {
            let keyword = keyword.trim();
            if keyword.is_empty()
                || compiled.iter().any(|(k, _, _)| k.eq_ignore_ascii_case(keyword))
            {
                continue;
            }
            compiled.push((keyword.to_string(), keyword_regex(keyword, whole_word)?, false));
        }

        if compiled.is_empty() {
            return Err(SieveError::Policy("lexical stage has no keywords".to_string()));
        }

        Ok(Self {
            fields,
            keywords: compiled,
        })
    }
}

impl Stage for LexicalStage {
    fn name(&self) -> &str {
        "lexical"
    }

    fn evaluate(&self, record: &RawRecord, _prior: &Annotations) -> StageOutcome {
        let text = field_text(record, &self.fields);
        if text.is_empty() {
            return StageOutcome::Reject("no searchable text".to_string());
        }

        let mut first: Option<&str> = None;
        let mut hits = 0u64;
        let mut high = false;
        for (keyword, regex, is_high) in &self.keywords {
            if regex.is_match(&text) {
                hits += 1;
                high |= *is_high;
                first.get_or_insert(keyword.as_str());
            }
        }

        match first {
            None => StageOutcome::Reject("no relevance keyword matched".to_string()),
            Some(keyword) => {
                let mut annotations = Annotations::new();
                annotations.insert(MATCHED_KEYWORD.to_string(), json!(keyword));
                annotations.insert(LEXICAL_HITS.to_string(), json!(hits));
                annotations.insert(
                    LEXICAL_CONFIDENCE.to_string(),
                    json!(if high { "high" } else { "low" }),
                );
                StageOutcome::Annotate(annotations)
            }
        }
    }
}

/// Declared topic/category check
///
/// Passes records whose topic field names a configured topic with at least
/// `min_score`. Records without such a topic still pass when the lexical
/// match was high confidence.
pub struct StructuralStage {
    field: String,
    topics: Vec<String>,
    min_score: f64,
}

impl StructuralStage {
    /// Build the stage
    ///
    /// # Errors
    ///
    /// Returns [`SieveError::Policy`] if no topics are configured.
    pub fn new(field: String, topics: &[String], min_score: f64) -> Result<Self> {
        let topics: Vec<String> = topics
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        if topics.is_empty() {
            return Err(SieveError::Policy("structural stage has no topics".to_string()));
        }
        Ok(Self {
            field,
            topics,
            min_score,
        })
    }

    fn declared_topics(&self, record: &RawRecord) -> Vec<(String, Option<f64>)> {
        fn from_object(map: &serde_json::Map<String, Value>) -> Option<(String, Option<f64>)> {
            let name = map
                .get("display_name")
                .or_else(|| map.get("name"))
                .and_then(Value::as_str)?;
            Some((name.to_string(), map.get("score").and_then(Value::as_f64)))
        }

        match record.field(&self.field) {
            Some(Value::String(s)) => vec![(s.clone(), None)],
            Some(Value::Object(map)) => from_object(map).into_iter().collect(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some((s.clone(), None)),
                    Value::Object(map) => from_object(map),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl Stage for StructuralStage {
    fn name(&self) -> &str {
        "structural"
    }

    fn evaluate(&self, record: &RawRecord, prior: &Annotations) -> StageOutcome {
        let best = self
            .declared_topics(record)
            .into_iter()
            .filter(|(name, score)| {
                self.topics.contains(&name.trim().to_lowercase())
                    && score.map_or(true, |s| s >= self.min_score)
            })
            .max_by(|a, b| {
                a.1.unwrap_or(0.0)
                    .partial_cmp(&b.1.unwrap_or(0.0))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

        if let Some((topic, score)) = best {
            let mut annotations = Annotations::new();
            annotations.insert(MATCHED_TOPIC.to_string(), json!(topic));
            if let Some(score) = score {
                annotations.insert(TOPIC_SCORE.to_string(), json!(score));
            }
            return StageOutcome::Annotate(annotations);
        }

        if prior.get(LEXICAL_CONFIDENCE).and_then(Value::as_str) == Some("high") {
            StageOutcome::Pass
        } else {
            StageOutcome::Reject("no matching topic".to_string())
        }
    }
}

/// One denylist rule: reject when `field` matches any pattern
pub struct ExclusionRule {
    field: String,
    patterns: Vec<Regex>,
}

impl ExclusionRule {
    /// Compile a rule; patterns are case-insensitive regular expressions
    ///
    /// # Errors
    ///
    /// Returns [`SieveError::Policy`] for an invalid pattern.
    pub fn new(field: String, patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(&format!("(?i){}", p)).map_err(|e| {
                    SieveError::Policy(format!("Invalid exclusion pattern '{}': {}", p, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { field, patterns })
    }
}

/// Denylist of known false-positive contexts
///
/// Exclusion is bypassed when the matched keyword or topic is listed in the
/// overrides.
pub struct ExclusionStage {
    rules: Vec<ExclusionRule>,
    overrides: Vec<String>,
}

impl ExclusionStage {
    /// Build the stage
    pub fn new(rules: Vec<ExclusionRule>, overrides: &[String]) -> Self {
        Self {
            rules,
            overrides: overrides.iter().map(|o| o.trim().to_lowercase()).collect(),
        }
    }

    fn is_overridden(&self, prior: &Annotations) -> bool {
        [MATCHED_KEYWORD, MATCHED_TOPIC].iter().any(|key| {
            prior
                .get(*key)
                .and_then(Value::as_str)
                .map(|v| self.overrides.contains(&v.to_lowercase()))
                .unwrap_or(false)
        })
    }
}

impl Stage for ExclusionStage {
    fn name(&self) -> &str {
        "exclusion"
    }

    fn evaluate(&self, record: &RawRecord, prior: &Annotations) -> StageOutcome {
        if self.is_overridden(prior) {
            return StageOutcome::Pass;
        }

        for rule in &self.rules {
            let text = field_text(record, std::slice::from_ref(&rule.field));
            if text.is_empty() {
                continue;
            }
            if let Some(pattern) = rule.patterns.iter().find(|p| p.is_match(&text)) {
                return StageOutcome::Reject(format!(
                    "{} matches excluded pattern '{}'",
                    rule.field,
                    pattern.as_str().trim_start_matches("(?i)")
                ));
            }
        }
        StageOutcome::Pass
    }
}

/// Mandatory-field, placeholder and retraction check
pub struct CompletenessStage {
    required_fields: Vec<String>,
    placeholder_values: Vec<String>,
    retracted_field: Option<String>,
}

impl CompletenessStage {
    /// Build the stage
    pub fn new(
        required_fields: Vec<String>,
        placeholder_values: &[String],
        retracted_field: Option<String>,
    ) -> Self {
        Self {
            required_fields,
            placeholder_values: placeholder_values
                .iter()
                .map(|p| p.trim().to_lowercase())
                .collect(),
            retracted_field,
        }
    }

    fn is_placeholder(&self, value: &str) -> bool {
        let value = value.trim().to_lowercase();
        value.is_empty() || self.placeholder_values.contains(&value)
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |n| n != 0.0),
        Value::String(s) => matches!(
            s.trim().to_lowercase().as_str(),
            "true" | "yes" | "1" | "retracted"
        ),
        _ => false,
    }
}

impl Stage for CompletenessStage {
    fn name(&self) -> &str {
        "completeness"
    }

    fn evaluate(&self, record: &RawRecord, _prior: &Annotations) -> StageOutcome {
        if let Some(field) = &self.retracted_field {
            if record.field(field).map_or(false, is_truthy) {
                return StageOutcome::Reject("record is retracted".to_string());
            }
        }

        for field in &self.required_fields {
            let missing = match record.field(field) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => self.is_placeholder(s),
                Some(Value::Array(items)) => items.is_empty(),
                Some(Value::Object(map)) => map.is_empty(),
                Some(_) => false,
            };
            if missing {
                return StageOutcome::Reject(format!("missing or placeholder field '{}'", field));
            }
        }

        StageOutcome::Pass
    }
}
