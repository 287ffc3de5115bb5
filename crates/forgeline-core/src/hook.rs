//! Normalization helpers shared by every webhook parser.

use crate::domain::EventReason;

pub const TAG_REF_PREFIX: &str = "refs/tags/";
pub const BRANCH_REF_PREFIX: &str = "refs/heads/";

/// True for `refs/tags/...`.
pub fn is_tag_ref(git_ref: &str) -> bool {
    git_ref.starts_with(TAG_REF_PREFIX)
}

/// Strip `refs/heads/` or `refs/tags/`.
pub fn short_ref(git_ref: &str) -> &str {
    git_ref
        .strip_prefix(BRANCH_REF_PREFIX)
        .or_else(|| git_ref.strip_prefix(TAG_REF_PREFIX))
        .unwrap_or(git_ref)
}

/// The all-zero SHA forges send as the "after" of a deleted ref.
pub fn is_zero_sha(sha: &str) -> bool {
    !sha.is_empty() && sha.bytes().all(|b| b == b'0')
}

/// What a label webhook tells us about the labels before the change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviousLabels {
    /// The payload says there were none.
    Empty,
    /// The payload says there were some.
    Present,
    /// The payload carries no previous state.
    Unknown,
}

/// Normalize a label change into exactly one reason.
///
/// No labels left means `label_cleared`. Labels now present where the
/// payload explicitly reports none before means `label_added`. Everything
/// else, including payloads without previous state, is `label_updated`.
pub fn label_reason(previous: PreviousLabels, current_count: usize) -> EventReason {
    if current_count == 0 {
        EventReason::LabelCleared
    } else if previous == PreviousLabels::Empty {
        EventReason::LabelAdded
    } else {
        EventReason::LabelUpdated
    }
}
