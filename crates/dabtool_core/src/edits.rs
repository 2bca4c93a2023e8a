use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::registry::{Occurrence, OccurrenceId, OccurrenceRegistry};
use crate::wikitext::normalize_title;

/// A user's choice for one occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Decision {
    #[default]
    Unset,
    ReplaceWith(String),
    Unlink,
}

/// A decision that actually changes something.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    ReplaceWith(String),
    Unlink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEdit<'a> {
    pub occurrence: &'a Occurrence,
    pub resolution: Resolution,
}

/// Pending decisions for one article load, keyed by occurrence id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditSet {
    load_id: String,
    decisions: BTreeMap<OccurrenceId, Resolution>,
}

impl EditSet {
    pub fn for_registry(registry: &OccurrenceRegistry) -> Self {
        Self {
            load_id: registry.load_id().to_string(),
            decisions: BTreeMap::new(),
        }
    }

    pub fn load_id(&self) -> &str {
        &self.load_id
    }

    pub fn set(
        &mut self,
        registry: &OccurrenceRegistry,
        id: OccurrenceId,
        decision: Decision,
    ) -> CoreResult<()> {
        self.ensure_bound_to(registry)?;
        if !registry.contains(id) {
            return Err(CoreError::InvalidReference {
                id,
                reason: format!("article has {} disambiguation links", registry.len()),
            });
        }

        match decision {
            Decision::Unset => self.cancel(id),
            Decision::Unlink => {
                self.decisions.insert(id, Resolution::Unlink);
            }
            Decision::ReplaceWith(title) => {
                let title = normalize_title(&title);
                if title.is_empty() {
                    return Err(CoreError::EmptyReplacement(id));
                }
                self.decisions.insert(id, Resolution::ReplaceWith(title));
            }
        }
        Ok(())
    }

    pub fn cancel(&mut self, id: OccurrenceId) {
        self.decisions.remove(&id);
    }

    pub fn decision(&self, id: OccurrenceId) -> Decision {
        match self.decisions.get(&id) {
            Some(Resolution::ReplaceWith(title)) => Decision::ReplaceWith(title.clone()),
            Some(Resolution::Unlink) => Decision::Unlink,
            None => Decision::Unset,
        }
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    /// Decisions in registry document order.
    pub fn resolved<'r>(
        &self,
        registry: &'r OccurrenceRegistry,
    ) -> CoreResult<Vec<ResolvedEdit<'r>>> {
        self.ensure_bound_to(registry)?;
        // BTreeMap order is id order, and ids follow document order.
        self.decisions
            .iter()
            .map(|(id, resolution)| {
                Ok(ResolvedEdit {
                    occurrence: registry.by_id(*id)?,
                    resolution: resolution.clone(),
                })
            })
            .collect()
    }

    fn ensure_bound_to(&self, registry: &OccurrenceRegistry) -> CoreResult<()> {
        if self.load_id != registry.load_id() {
            return Err(CoreError::StaleEditSet {
                expected: self.load_id.clone(),
                found: registry.load_id().to_string(),
            });
        }
        Ok(())
    }
}
