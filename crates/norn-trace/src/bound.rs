//! Bounding of text recorded as span attributes.
//!
//! Any text destined for a span attribute passes through [`bound`] so a
//! runaway payload cannot bloat the export stream. Secret/PII scrubbing is
//! the caller's responsibility; this module only limits size.

/// Marker appended to text that was cut at the bound.
pub const TRUNCATION_MARKER: &str = "…[truncated]";

/// Result of bounding a piece of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bounded {
    /// The text to store, at most `limit` characters.
    pub text: String,

    /// Whether the original text was cut.
    pub truncated: bool,

    /// Character count of the original text.
    pub original_length: usize,
}

/// Bound `text` to at most `limit` characters.
///
/// Text within the limit is returned verbatim. Longer text keeps its first
/// `limit - marker` characters and gains [`TRUNCATION_MARKER`]; the stored
/// result never exceeds `limit` characters, even for limits smaller than the
/// marker itself.
pub fn bound(text: &str, limit: usize) -> Bounded {
    let original_length = text.chars().count();
    if original_length <= limit {
        return Bounded {
            text: text.to_string(),
            truncated: false,
            original_length,
        };
    }

    let marker_len = TRUNCATION_MARKER.chars().count();
    let keep = limit.saturating_sub(marker_len);
    let mut stored: String = text.chars().take(keep).collect();
    stored.push_str(TRUNCATION_MARKER);

    // Degenerate limits below the marker length still honor the bound.
    if stored.chars().count() > limit {
        stored = stored.chars().take(limit).collect();
    }

    Bounded {
        text: stored,
        truncated: true,
        original_length,
    }
}
