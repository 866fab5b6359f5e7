//! Answer selection: pick the suggestion matching the resolved name, or the
//! first suggestion when nothing matches. An exact match wins over one that
//! only agrees after trimming and case folding.

use crate::types::{Resolution, Suggestion, SuggestionId};

/// The chosen suggestion and whether it came from a name match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub suggestion_id: SuggestionId,
    pub matched: bool,
}

/// None only when there is nothing to choose from
pub fn select_answer(suggestions: &[Suggestion], resolution: &Resolution) -> Option<Selection> {
    if let Some(name) = resolution.name() {
        let hit = suggestions
            .iter()
            .find(|s| s.name == name)
            .or_else(|| suggestions.iter().find(|s| names_match(&s.name, name)));
        if let Some(hit) = hit {
            return Some(Selection {
                suggestion_id: hit.id,
                matched: true,
            });
        }
    }

    suggestions.first().map(|s| Selection {
        suggestion_id: s.id,
        matched: false,
    })
}

/// Case-insensitive comparison ignoring surrounding whitespace
pub fn names_match(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}
