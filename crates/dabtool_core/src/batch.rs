//! The single batched command that carries a client's decisions to the save
//! step.

use serde::{Deserialize, Serialize};

use crate::edits::{Decision, EditSet, Resolution};
use crate::error::{CoreError, CoreResult};
use crate::registry::{OccurrenceId, OccurrenceRegistry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchChoice {
    ReplaceWith(String),
    Unlink,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub occurrence: OccurrenceId,
    pub original_target: String,
    pub choice: BatchChoice,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditBatch {
    pub article: String,
    pub load_id: String,
    #[serde(default)]
    pub edits: Vec<BatchEntry>,
}

impl EditBatch {
    pub fn empty(article: &str, registry: &OccurrenceRegistry) -> Self {
        Self {
            article: article.to_string(),
            load_id: registry.load_id().to_string(),
            edits: Vec::new(),
        }
    }

    pub fn from_edit_set(
        article: &str,
        registry: &OccurrenceRegistry,
        edits: &EditSet,
    ) -> CoreResult<Self> {
        let entries = edits
            .resolved(registry)?
            .into_iter()
            .map(|edit| BatchEntry {
                occurrence: edit.occurrence.id,
                original_target: edit.occurrence.target_title.clone(),
                choice: match edit.resolution {
                    Resolution::ReplaceWith(title) => BatchChoice::ReplaceWith(title),
                    Resolution::Unlink => BatchChoice::Unlink,
                },
            })
            .collect();
        Ok(Self {
            edits: entries,
            ..Self::empty(article, registry)
        })
    }

    /// Build an edit set for `registry`. The batch must come from the same
    /// load, and every entry must name the target the registry recorded for
    /// that occurrence. Later entries for the same occurrence win.
    pub fn to_edit_set(&self, registry: &OccurrenceRegistry) -> CoreResult<EditSet> {
        if self.load_id != registry.load_id() {
            return Err(CoreError::StaleEditSet {
                expected: self.load_id.clone(),
                found: registry.load_id().to_string(),
            });
        }

        let mut edits = EditSet::for_registry(registry);
        for entry in &self.edits {
            let recorded = registry
                .original_target(entry.occurrence)
                .map_err(|_| CoreError::InvalidReference {
                    id: entry.occurrence,
                    reason: format!("article has {} disambiguation links", registry.len()),
                })?;
            if recorded != entry.original_target {
                return Err(CoreError::InvalidReference {
                    id: entry.occurrence,
                    reason: format!(
                        "batch names {:?} but the article links {:?}",
                        entry.original_target, recorded
                    ),
                });
            }
            let decision = match &entry.choice {
                BatchChoice::ReplaceWith(title) => Decision::ReplaceWith(title.clone()),
                BatchChoice::Unlink => Decision::Unlink,
            };
            edits.set(registry, entry.occurrence, decision)?;
        }
        Ok(edits)
    }
}

#[cfg(test)]
mod tests {
    use super::{BatchChoice, BatchEntry, EditBatch};
    use crate::edits::{Decision, EditSet};
    use crate::error::CoreError;
    use crate::registry::OccurrenceRegistry;

    const MARKUP: &str = "[[Mercury]] and [[Java]] and [[Mercury]]";

    fn registry() -> OccurrenceRegistry {
        OccurrenceRegistry::build(MARKUP, |title| title == "Mercury" || title == "Java")
    }

    #[test]
    fn json_keeps_order_and_unlink_distinction() {
        let registry = registry();
        let mut edits = EditSet::for_registry(&registry);
        edits.set(&registry, 2, Decision::Unlink).expect("set");
        edits
            .set(
                &registry,
                0,
                Decision::ReplaceWith("Mercury (planet)".to_string()),
            )
            .expect("set");

        let batch = EditBatch::from_edit_set("Planets", &registry, &edits).expect("batch");
        let json = serde_json::to_value(&batch).expect("serialize");
        assert_eq!(
            json["edits"],
            serde_json::json!([
                {"occurrence": 0, "original_target": "Mercury",
                 "choice": {"replace_with": "Mercury (planet)"}},
                {"occurrence": 2, "original_target": "Mercury", "choice": "unlink"}
            ])
        );

        let decoded: EditBatch = serde_json::from_value(json).expect("deserialize");
        assert_eq!(decoded, batch);
        assert_eq!(decoded.to_edit_set(&registry).expect("edit set"), edits);
    }

    #[test]
    fn unlink_and_a_page_titled_unlink_stay_distinct() {
        let registry = registry();
        let mut batch = EditBatch::empty("Planets", &registry);
        batch.edits.push(BatchEntry {
            occurrence: 1,
            original_target: "Java".to_string(),
            choice: BatchChoice::ReplaceWith("Unlink".to_string()),
        });
        let text = serde_json::to_string(&batch).expect("serialize");
        let decoded: EditBatch = serde_json::from_str(&text).expect("deserialize");

        let edits = decoded.to_edit_set(&registry).expect("edit set");
        assert_eq!(edits.decision(1), Decision::ReplaceWith("Unlink".to_string()));
    }

    #[test]
    fn stale_load_id_is_rejected() {
        let registry = registry();
        let mut batch = EditBatch::empty("Planets", &registry);
        batch.load_id = "0".repeat(64);
        assert!(matches!(
            batch.to_edit_set(&registry),
            Err(CoreError::StaleEditSet { .. })
        ));
    }

    #[test]
    fn mismatched_original_target_is_an_invalid_reference() {
        let registry = registry();
        let mut batch = EditBatch::empty("Planets", &registry);
        batch.edits.push(BatchEntry {
            occurrence: 1,
            original_target: "Mercury".to_string(),
            choice: BatchChoice::Unlink,
        });
        assert!(matches!(
            batch.to_edit_set(&registry),
            Err(CoreError::InvalidReference { id: 1, .. })
        ));
    }

    #[test]
    fn unknown_occurrence_is_an_invalid_reference() {
        let registry = registry();
        let mut batch = EditBatch::empty("Planets", &registry);
        batch.edits.push(BatchEntry {
            occurrence: 9,
            original_target: "Java".to_string(),
            choice: BatchChoice::Unlink,
        });
        assert!(matches!(
            batch.to_edit_set(&registry),
            Err(CoreError::InvalidReference { id: 9, .. })
        ));
    }

    #[test]
    fn missing_edits_field_means_empty_batch() {
        let registry = registry();
        let text = format!(
            "{{\"article\": \"Planets\", \"load_id\": \"{}\"}}",
            registry.load_id()
        );
        let batch: EditBatch = serde_json::from_str(&text).expect("deserialize");
        assert!(batch.to_edit_set(&registry).expect("edit set").is_empty());
    }
}
