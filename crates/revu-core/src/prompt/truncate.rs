use revu_memory::{estimate_tokens, max_chars_for_tokens};

pub const TRUNCATION_MARKER: &str = "\n[... truncated]";

/// Share of the target length, measured from its end, searched for a
/// natural cut point.
const BOUNDARY_WINDOW: f64 = 0.2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncated {
    pub text: String,
    pub truncated: bool,
    /// Token estimate of the input.
    pub original_tokens: usize,
}

/// Fit `text` into `max_tokens`, cutting at the last newline, else the last
/// space, else the last period within the final fifth of the target length,
/// and appending [`TRUNCATION_MARKER`].
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> Truncated {
    let original_tokens = estimate_tokens(text);
    if original_tokens <= max_tokens {
        return Truncated {
            text: text.to_owned(),
            truncated: false,
            original_tokens,
        };
    }

    let marker_chars = TRUNCATION_MARKER.chars().count();
    let max_chars = max_chars_for_tokens(max_tokens);
    if max_tokens == 0 || max_chars <= marker_chars {
        return Truncated {
            text: String::new(),
            truncated: true,
            original_tokens,
        };
    }

    let target = max_chars - marker_chars;
    let prefix = char_prefix(text, target);
    let window_start = char_prefix(prefix, (target as f64 * (1.0 - BOUNDARY_WINDOW)) as usize).len();
    let window = &prefix[window_start..];

    let cut = window
        .rfind('\n')
        .or_else(|| window.rfind(' '))
        .map(|i| window_start + i)
        .or_else(|| window.rfind('.').map(|i| window_start + i + 1))
        .unwrap_or(prefix.len());

    let mut out = prefix[..cut].trim_end().to_owned();
    out.push_str(TRUNCATION_MARKER);
    Truncated {
        text: out,
        truncated: true,
        original_tokens,
    }
}

fn char_prefix(text: &str, chars: usize) -> &str {
    match text.char_indices().nth(chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
