use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::candidates::Candidate;
use crate::error::{CoreError, CoreResult};
use crate::wikitext::extract_occurrences;

pub type OccurrenceId = usize;

/// Byte range `[start, end)` of a whole `[[...]]` construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub id: OccurrenceId,
    pub target_title: String,
    pub surface_text: String,
    pub piped: bool,
    pub leading_colon: bool,
    pub span: Span,
    /// Exact bytes of `span` at extraction time; patching re-validates against it.
    pub raw: String,
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

/// Read-only view over one extraction pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OccurrenceRegistry {
    load_id: String,
    occurrences: Vec<Occurrence>,
}

impl OccurrenceRegistry {
    pub fn build<F>(markup: &str, is_dab: F) -> Self
    where
        F: Fn(&str) -> bool,
    {
        Self {
            load_id: load_id_for(markup),
            occurrences: extract_occurrences(markup, is_dab),
        }
    }

    pub fn load_id(&self) -> &str {
        &self.load_id
    }

    pub fn by_id(&self, id: OccurrenceId) -> CoreResult<&Occurrence> {
        // ids are dense and assigned in order
        self.occurrences
            .get(id)
            .ok_or(CoreError::UnknownOccurrence(id))
    }

    pub fn original_target(&self, id: OccurrenceId) -> CoreResult<&str> {
        self.by_id(id)
            .map(|occurrence| occurrence.target_title.as_str())
    }

    pub fn ordered(&self) -> &[Occurrence] {
        &self.occurrences
    }

    pub fn contains(&self, id: OccurrenceId) -> bool {
        id < self.occurrences.len()
    }

    pub fn len(&self) -> usize {
        self.occurrences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.occurrences.is_empty()
    }

    /// Distinct target titles in order of first appearance.
    pub fn dab_titles(&self) -> Vec<String> {
        let mut titles: Vec<String> = Vec::new();
        for occurrence in &self.occurrences {
            if !titles.contains(&occurrence.target_title) {
                titles.push(occurrence.target_title.clone());
            }
        }
        titles
    }

    /// Attach display candidates to every occurrence linking `target_title`.
    pub fn set_candidates(&mut self, target_title: &str, candidates: &[Candidate]) -> usize {
        let mut updated = 0usize;
        for occurrence in self
            .occurrences
            .iter_mut()
            .filter(|occurrence| occurrence.target_title == target_title)
        {
            occurrence.candidates = candidates.to_vec();
            updated += 1;
        }
        updated
    }
}

pub fn load_id_for(markup: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(markup.as_bytes());
    format!("{:x}", hasher.finalize())
}
