//! Avatar colors for senders the server sent no color for.

use std::collections::HashMap;

/// Colors handed out in order of first appearance.
const COLORS: [&str; 8] =
    ["#5B8DEF", "#F29E4C", "#43AA8B", "#E15759", "#9C6ADE", "#F1C453", "#4CC9F0", "#B56576"];

/// Sequential color assignment, scoped to one session.
///
/// The first sender seen gets the first color, the next new sender the
/// second, wrapping around. A sender keeps its color for the session's
/// lifetime.
#[derive(Debug, Clone, Default)]
pub struct AvatarPalette {
    assigned: HashMap<String, usize>,
}

impl AvatarPalette {
    /// Create an empty palette.
    pub fn new() -> Self {
        Self::default()
    }

    /// Color for `sender_id`, assigning the next one on first use.
    pub fn color_for(&mut self, sender_id: &str) -> &'static str {
        let next = self.assigned.len();
        let index = *self.assigned.entry(sender_id.to_string()).or_insert(next);
        COLORS[index % COLORS.len()]
    }

    /// Number of senders seen.
    pub fn len(&self) -> usize {
        self.assigned.len()
    }

    /// Whether no sender has been assigned a color.
    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }
}
