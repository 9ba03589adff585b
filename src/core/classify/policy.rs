//! Classifier policy file
//!
//! The vocabulary, thresholds, denylist and natural-key rules live in their
//! own TOML file so they can change without touching the engine.
//!
//! ```toml
//! [lexical]
//! fields = ["title", "abstract"]
//! keywords = ["solar", "photovoltaic"]
//! high_confidence_keywords = ["perovskite solar cell"]
//! keywords_file = "keywords.txt"
//!
//! [structural]
//! field = "topics"
//! topics = ["Renewable Energy"]
//! min_score = 0.4
//!
//! [exclusion]
//! rules = [{ field = "venue", patterns = ["^astro"] }]
//! overrides = ["photovoltaic"]
//!
//! [completeness]
//! required_fields = ["id", "title"]
//! placeholder_values = ["untitled", "n/a"]
//! retracted_field = "is_retracted"
//!
//! [natural_key]
//! fields = ["id"]
//! hash_fields = ["title", "publication_year"]
//! revision_field = "updated_date"
//! ```

use super::stages::{
    CompletenessStage, ExclusionRule, ExclusionStage, LexicalStage, StructuralStage,
};
use super::{Classifier, KeyPolicy, Stage};
use crate::domain::{Result, SieveError};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root of the classifier policy file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassifierPolicy {
    /// Keyword relevance filter
    #[serde(default)]
    pub lexical: Option<LexicalPolicy>,

    /// Declared topic filter
    #[serde(default)]
    pub structural: Option<StructuralPolicy>,

    /// False-positive denylist
    #[serde(default)]
    pub exclusion: Option<ExclusionPolicy>,

    /// Mandatory fields and retraction
    #[serde(default)]
    pub completeness: Option<CompletenessPolicy>,

    /// Identity derivation
    #[serde(default)]
    pub natural_key: NaturalKeyPolicy,

    /// Directory that relative list files resolve against
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

/// `[lexical]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LexicalPolicy {
    /// Record fields searched for keywords
    pub fields: Vec<String>,
    /// Relevance vocabulary
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Keywords strong enough to stand without a topic match
    #[serde(default)]
    pub high_confidence_keywords: Vec<String>,
    /// Extra keywords, one per line
    #[serde(default)]
    pub keywords_file: Option<String>,
    /// Match whole words only
    #[serde(default = "default_whole_word")]
    pub whole_word: bool,
}

/// `[structural]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StructuralPolicy {
    /// Field holding declared topics
    pub field: String,
    /// Accepted topics
    #[serde(default)]
    pub topics: Vec<String>,
    /// Minimum topic score, when scores are present
    #[serde(default)]
    pub min_score: f64,
    /// Extra topics, one per line
    #[serde(default)]
    pub topics_file: Option<String>,
}

/// One `[[exclusion.rules]]` entry
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExclusionRulePolicy {
    /// Field tested
    pub field: String,
    /// Case-insensitive regular expressions
    pub patterns: Vec<String>,
}

/// `[exclusion]` section
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExclusionPolicy {
    /// Denylist rules
    #[serde(default)]
    pub rules: Vec<ExclusionRulePolicy>,
    /// Keywords/topics that bypass exclusion
    #[serde(default)]
    pub overrides: Vec<String>,
}

/// `[completeness]` section
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompletenessPolicy {
    /// Fields that must be present and non-placeholder
    #[serde(default)]
    pub required_fields: Vec<String>,
    /// Values treated as missing
    #[serde(default)]
    pub placeholder_values: Vec<String>,
    /// Field flagging retracted records
    #[serde(default)]
    pub retracted_field: Option<String>,
}

/// `[natural_key]` section
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NaturalKeyPolicy {
    /// Identifier fields
    #[serde(default)]
    pub fields: Vec<String>,
    /// Fields hashed when identifiers are absent
    #[serde(default)]
    pub hash_fields: Vec<String>,
    /// Update timestamp or version field
    #[serde(default)]
    pub revision_field: Option<String>,
    /// Fields ignored when comparing content
    #[serde(default)]
    pub content_ignore_fields: Vec<String>,
}

fn default_whole_word() -> bool {
    true
}

impl ClassifierPolicy {
    /// Load a policy file
    ///
    /// # Errors
    ///
    /// Returns [`SieveError::Policy`] if the file is missing or malformed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SieveError::Policy(format!(
                "Failed to read classifier policy {}: {}",
                path.display(),
                e
            ))
        })?;
        let mut policy = Self::parse(&contents)?;
        policy.base_dir = path.parent().map(Path::to_path_buf);
        Ok(policy)
    }

    /// Parse policy text; list files resolve against the working directory
    ///
    /// # Errors
    ///
    /// Returns [`SieveError::Policy`] if the TOML is malformed.
    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| SieveError::Policy(format!("Failed to parse classifier policy: {}", e)))
    }

    fn resolve(&self, file: &str) -> PathBuf {
        let path = PathBuf::from(file);
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        }
    }

    fn read_list(&self, file: &str) -> Result<Vec<String>> {
        let path = self.resolve(file);
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            SieveError::Policy(format!("Failed to read list file {}: {}", path.display(), e))
        })?;
        Ok(contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect())
    }

    /// Natural-key policy
    pub fn key_policy(&self) -> KeyPolicy {
        KeyPolicy {
            id_fields: self.natural_key.fields.clone(),
            hash_fields: self.natural_key.hash_fields.clone(),
            revision_field: self.natural_key.revision_field.clone(),
            content_ignore_fields: self.natural_key.content_ignore_fields.clone(),
        }
    }

    /// Instantiate the stages in canonical order, skipping absent sections
    ///
    /// # Errors
    ///
    /// Returns [`SieveError::Policy`] for unreadable list files, invalid
    /// patterns or empty vocabularies.
    pub fn build(&self) -> Result<Classifier> {
        let mut stages: Vec<Box<dyn Stage>> = Vec::new();

        if let Some(lexical) = &self.lexical {
            let mut keywords = lexical.keywords.clone();
            if let Some(file) = &lexical.keywords_file {
                keywords.extend(self.read_list(file)?);
            }
            stages.push(Box::new(LexicalStage::new(
                lexical.fields.clone(),
                &keywords,
                &lexical.high_confidence_keywords,
                lexical.whole_word,
            )?));
        }

        if let Some(structural) = &self.structural {
            let mut topics = structural.topics.clone();
            if let Some(file) = &structural.topics_file {
                topics.extend(self.read_list(file)?);
            }
            stages.push(Box::new(StructuralStage::new(
                structural.field.clone(),
                &topics,
                structural.min_score,
            )?));
        }

        if let Some(exclusion) = &self.exclusion {
            let rules = exclusion
                .rules
                .iter()
                .map(|r| ExclusionRule::new(r.field.clone(), &r.patterns))
                .collect::<Result<Vec<_>>>()?;
            stages.push(Box::new(ExclusionStage::new(rules, &exclusion.overrides)));
        }

        if let Some(completeness) = &self.completeness {
            stages.push(Box::new(CompletenessStage::new(
                completeness.required_fields.clone(),
                &completeness.placeholder_values,
                completeness.retracted_field.clone(),
            )));
        }

        let classifier = Classifier::new(stages, self.key_policy());
        tracing::info!(stages = ?classifier.stage_names(), "Classifier policy loaded");
        Ok(classifier)
    }
}
