use thiserror::Error;

use crate::registry::OccurrenceId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("unknown occurrence id {0}")]
    UnknownOccurrence(OccurrenceId),

    #[error("invalid reference to occurrence {id}: {reason}")]
    InvalidReference { id: OccurrenceId, reason: String },

    #[error("edit set belongs to load {expected} but the registry is load {found}")]
    StaleEditSet { expected: String, found: String },

    #[error("replacement target for occurrence {0} is empty")]
    EmptyReplacement(OccurrenceId),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
