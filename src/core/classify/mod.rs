//! Multi-stage classification
//!
//! A [`Classifier`] runs an ordered list of [`Stage`]s over each record. The
//! first stage that rejects ends evaluation; later stages are never called.
//! Annotations from passing stages are handed to the stages after them and
//! end up on the accepted record.
//!
//! # Example
//!
//! ```
//! use sieve::core::classify::{ClassificationResult, Classifier, KeyPolicy};
//! use sieve::core::classify::stages::CompletenessStage;
//! use sieve::domain::{RawRecord, WorkUnitId};
//! use serde_json::json;
//!
//! let stage = CompletenessStage::new(vec!["title".to_string()], &[], None);
//! let classifier = Classifier::new(vec![Box::new(stage)], KeyPolicy::default());
//!
//! let unit = WorkUnitId::new("u").unwrap();
//! let record = RawRecord::from_value(unit, 0, json!({"id": 1}));
//! assert!(matches!(
//!     classifier.classify(&record),
//!     ClassificationResult::Rejected { .. }
//! ));
//! ```

pub mod key;
pub mod policy;
pub mod stages;

use crate::domain::{AcceptedRecord, Annotations, RawRecord};
use serde_json::{json, Value};

pub use key::KeyPolicy;
pub use policy::ClassifierPolicy;

/// Stage name used when a record passes every stage but has no usable key
pub const NATURAL_KEY_STAGE: &str = "natural_key";

/// Outcome of a single stage
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Record passes with nothing to add
    Pass,
    /// Record is rejected; later stages are skipped
    Reject(String),
    /// Record passes and gains these fields
    Annotate(Annotations),
}

/// One independently pluggable classification step
pub trait Stage: Send + Sync {
    /// Stable name used in rejection counters
    fn name(&self) -> &str;

    /// Evaluate a record given the annotations of earlier stages
    fn evaluate(&self, record: &RawRecord, prior: &Annotations) -> StageOutcome;
}

/// Per-record classification outcome
#[derive(Debug, Clone, PartialEq)]
pub enum ClassificationResult {
    /// Passed every stage with no annotations
    Accepted,
    /// Passed every stage; carries the collected annotations
    Annotated(Annotations),
    /// Rejected by `stage`
    Rejected {
        /// Name of the rejecting stage
        stage: String,
        /// Reason given by the stage
        reason: String,
    },
}

/// Classification plus identity derivation
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Ready for the deduplicator
    Accepted(AcceptedRecord),
    /// Dropped, with the stage that dropped it
    Rejected {
        /// Name of the rejecting stage
        stage: String,
        /// Reason given by the stage
        reason: String,
    },
}

/// Ordered stage pipeline with its natural-key policy
pub struct Classifier {
    stages: Vec<Box<dyn Stage>>,
    keys: KeyPolicy,
}

impl Classifier {
    /// Build a classifier from stages in evaluation order
    pub fn new(stages: Vec<Box<dyn Stage>>, keys: KeyPolicy) -> Self {
        Self { stages, keys }
    }

    /// Stage names in evaluation order
    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_string()).collect()
    }

    /// Key derivation policy
    pub fn key_policy(&self) -> &KeyPolicy {
        &self.keys
    }

    /// Run the stages over one record, stopping at the first rejection
    pub fn classify(&self, record: &RawRecord) -> ClassificationResult {
        let mut annotations = Annotations::new();

        for stage in &self.stages {
            match stage.evaluate(record, &annotations) {
                StageOutcome::Pass => {}
                StageOutcome::Annotate(extra) => annotations.extend(extra),
                StageOutcome::Reject(reason) => {
                    return ClassificationResult::Rejected {
                        stage: stage.name().to_string(),
                        reason,
                    }
                }
            }
        }

        if annotations.is_empty() {
            ClassificationResult::Accepted
        } else {
            annotations.insert("confidence".to_string(), json!(confidence(&annotations)));
            ClassificationResult::Annotated(annotations)
        }
    }

    /// Classify and, if accepted, attach key, content hash and revision
    pub fn evaluate(&self, record: RawRecord) -> Verdict {
        let annotations = match self.classify(&record) {
            ClassificationResult::Rejected { stage, reason } => {
                return Verdict::Rejected { stage, reason }
            }
            ClassificationResult::Accepted => Annotations::new(),
            ClassificationResult::Annotated(annotations) => annotations,
        };

        let key = match self.keys.natural_key(&record) {
            Ok(key) => key,
            Err(reason) => {
                return Verdict::Rejected {
                    stage: NATURAL_KEY_STAGE.to_string(),
                    reason,
                }
            }
        };

        Verdict::Accepted(AcceptedRecord {
            key,
            content_hash: self.keys.content_hash(&record),
            revision: self.keys.revision(&record),
            record,
            annotations,
        })
    }
}

/// `high` when both the keyword match was strong and a topic matched
fn confidence(annotations: &Annotations) -> &'static str {
    let lexical_high = annotations.get(stages::LEXICAL_CONFIDENCE).and_then(Value::as_str)
        == Some("high");
    let topic = annotations.contains_key(stages::MATCHED_TOPIC);
    match (lexical_high, topic) {
        (true, true) => "high",
        (true, false) | (false, true) => "medium",
        (false, false) => "low",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WorkUnitId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        outcome: StageOutcome,
    }

    impl Stage for Counting {
        fn name(&self) -> &str {
            self.name
        }

        fn evaluate(&self, _record: &RawRecord, _prior: &Annotations) -> StageOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    fn record() -> RawRecord {
        RawRecord::from_value(WorkUnitId::new("u").unwrap(), 0, json!({"id": "W1"}))
    }

    fn counting(name: &'static str, outcome: StageOutcome) -> (Box<dyn Stage>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Box::new(Counting {
                name,
                calls: calls.clone(),
                outcome,
            }),
            calls,
        )
    }

    #[test]
    fn test_first_rejection_short_circuits() {
        let (a, a_calls) = counting("a", StageOutcome::Pass);
        let (b, b_calls) = counting("b", StageOutcome::Reject("nope".to_string()));
        let (c, c_calls) = counting("c", StageOutcome::Pass);
        let classifier = Classifier::new(vec![a, b, c], KeyPolicy::default());

        let result = classifier.classify(&record());
        assert_eq!(
            result,
            ClassificationResult::Rejected {
                stage: "b".to_string(),
                reason: "nope".to_string()
            }
        );
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);
        assert_eq!(c_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_annotations_accumulate() {
        let mut first = Annotations::new();
        first.insert(stages::MATCHED_KEYWORD.to_string(), json!("solar"));
        first.insert(stages::LEXICAL_CONFIDENCE.to_string(), json!("high"));
        let (a, _) = counting("a", StageOutcome::Annotate(first));
        let (b, _) = counting("b", StageOutcome::Pass);
        let classifier = Classifier::new(vec![a, b], KeyPolicy::default());

        match classifier.classify(&record()) {
            ClassificationResult::Annotated(annotations) => {
                assert_eq!(annotations["matched_keyword"], "solar");
                assert_eq!(annotations["confidence"], "medium");
            }
            other => panic!("expected annotations, got {:?}", other),
        }
    }

    #[test]
    fn test_no_stages_accepts() {
        let classifier = Classifier::new(Vec::new(), KeyPolicy::default());
        assert_eq!(classifier.classify(&record()), ClassificationResult::Accepted);
    }

    #[test]
    fn test_evaluate_attaches_identity() {
        let keys = KeyPolicy {
            id_fields: vec!["id".to_string()],
            ..Default::default()
        };
        let classifier = Classifier::new(Vec::new(), keys);

        match classifier.evaluate(record()) {
            Verdict::Accepted(accepted) => {
                assert_eq!(accepted.key.as_str(), "W1");
                assert_eq!(accepted.content_hash.len(), 64);
            }
            other => panic!("expected acceptance, got {:?}", other),
        }

        let keyless = RawRecord::from_value(WorkUnitId::new("u").unwrap(), 1, json!({"x": 1}));
        assert!(matches!(
            classifier.evaluate(keyless),
            Verdict::Rejected { stage, .. } if stage == NATURAL_KEY_STAGE
        ));
    }
}
