use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::edits::{Resolution, ResolvedEdit};
use crate::registry::{Occurrence, OccurrenceId};
use crate::wikitext::normalize_title;

const MISMATCH_EXCERPT_CHARS: usize = 60;

/// How the visible text of a retargeted link is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayTextPolicy {
    /// Keep the text readers saw before the edit.
    #[default]
    Preserve,
    /// When the visible text was just the old target, show the new target.
    FollowTarget,
}

impl DisplayTextPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preserve => "preserve",
            Self::FollowTarget => "follow-target",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedEdit {
    pub id: OccurrenceId,
    pub original_target: String,
    pub resolution: Resolution,
    pub replacement: String,
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DropReason {
    OutOfBounds { len: usize },
    NotCharBoundary,
    SpanMismatch { found: String },
    Overlap { previous: OccurrenceId },
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfBounds { len } => write!(f, "span lies outside markup of {len} bytes"),
            Self::NotCharBoundary => write!(f, "span does not fall on character boundaries"),
            Self::SpanMismatch { found } => write!(f, "markup drifted, span now holds {found:?}"),
            Self::Overlap { previous } => write!(f, "span overlaps occurrence {previous}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedEdit {
    pub id: OccurrenceId,
    pub original_target: String,
    pub reason: DropReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchOutcome {
    pub markup: String,
    pub applied: Vec<AppliedEdit>,
    pub dropped: Vec<DroppedEdit>,
}

impl PatchOutcome {
    pub fn changed_edits(&self) -> impl Iterator<Item = &AppliedEdit> {
        self.applied.iter().filter(|edit| edit.changed)
    }

    pub fn has_changes(&self) -> bool {
        self.changed_edits().next().is_some()
    }
}

/// Rewrite the decided link spans of `original` in one left-to-right pass.
///
/// Spans are checked against the bytes recorded at extraction. An edit whose
/// span no longer matches is dropped and reported; every other byte of
/// `original` is copied through unchanged.
pub fn patch_markup(
    original: &str,
    edits: &[ResolvedEdit<'_>],
    policy: DisplayTextPolicy,
) -> PatchOutcome {
    let mut ordered = edits.iter().collect::<Vec<_>>();
    ordered.sort_by_key(|edit| edit.occurrence.span.start);

    let mut markup = String::with_capacity(original.len());
    let mut applied = Vec::new();
    let mut dropped = Vec::new();
    let mut cursor = 0usize;
    let mut previous: Option<OccurrenceId> = None;

    for edit in ordered {
        let occurrence = edit.occurrence;
        if let Err(reason) = validate_span(original, occurrence, cursor, previous) {
            warn!(
                occurrence = occurrence.id,
                target = %occurrence.target_title,
                %reason,
                "dropping edit"
            );
            dropped.push(DroppedEdit {
                id: occurrence.id,
                original_target: occurrence.target_title.clone(),
                reason,
            });
            continue;
        }

        let replacement = render_replacement(occurrence, &edit.resolution, policy);
        let changed = replacement != occurrence.raw;
        markup.push_str(&original[cursor..occurrence.span.start]);
        markup.push_str(&replacement);
        cursor = occurrence.span.end;
        previous = Some(occurrence.id);

        applied.push(AppliedEdit {
            id: occurrence.id,
            original_target: occurrence.target_title.clone(),
            resolution: edit.resolution.clone(),
            replacement,
            changed,
        });
    }
    markup.push_str(&original[cursor..]);

    PatchOutcome {
        markup,
        applied,
        dropped,
    }
}

fn validate_span(
    original: &str,
    occurrence: &Occurrence,
    cursor: usize,
    previous: Option<OccurrenceId>,
) -> Result<(), DropReason> {
    let span = occurrence.span;
    if span.start > span.end || span.end > original.len() {
        return Err(DropReason::OutOfBounds {
            len: original.len(),
        });
    }
    if !original.is_char_boundary(span.start) || !original.is_char_boundary(span.end) {
        return Err(DropReason::NotCharBoundary);
    }
    let found = &original[span.start..span.end];
    if found != occurrence.raw {
        return Err(DropReason::SpanMismatch {
            found: found.chars().take(MISMATCH_EXCERPT_CHARS).collect(),
        });
    }
    if span.start < cursor
        && let Some(previous) = previous
    {
        return Err(DropReason::Overlap { previous });
    }
    Ok(())
}

fn render_replacement(
    occurrence: &Occurrence,
    resolution: &Resolution,
    policy: DisplayTextPolicy,
) -> String {
    let title = match resolution {
        Resolution::Unlink => return occurrence.surface_text.clone(),
        Resolution::ReplaceWith(title) if *title == occurrence.target_title => {
            return occurrence.raw.clone();
        }
        Resolution::ReplaceWith(title) => title,
    };

    let colon = if occurrence.leading_colon { ":" } else { "" };
    let surface = occurrence.surface_text.as_str();
    let follows_target = policy == DisplayTextPolicy::FollowTarget
        && normalize_title(surface) == occurrence.target_title;

    if follows_target || surface == title {
        format!("[[{colon}{title}]]")
    } else if differs_only_in_first_letter_case(surface, title) {
        format!("[[{colon}{surface}]]")
    } else {
        format!("[[{colon}{title}|{surface}]]")
    }
}

/// MediaWiki ignores the case of a title's first letter, so such a surface
/// can stand in for the target and still display unchanged.
fn differs_only_in_first_letter_case(surface: &str, title: &str) -> bool {
    let mut surface_chars = surface.chars();
    let mut title_chars = title.chars();
    match (surface_chars.next(), title_chars.next()) {
        (Some(first), Some(title_first)) => {
            first.to_uppercase().eq(title_first.to_uppercase()) && surface_chars.eq(title_chars)
        }
        _ => false,
    }
}
