//! Text chunking with natural break points
//!
//! Sizes are counted in characters, never bytes, so multi-byte text is never
//! cut inside a code point.

/// How far back from the window end a hard cut is placed when no natural
/// break point lies closer to the end than this.
pub const HARD_CUT_MARGIN: usize = 100;

fn is_break_char(c: char) -> bool {
    matches!(c, '.' | '\n' | ' ')
}

/// Split `text` into raw, untrimmed windows of at most `max_size` characters.
///
/// Concatenating the windows reproduces `text` exactly. Each window ends just
/// after the last `.`, `\n` or space inside it, or `HARD_CUT_MARGIN` characters
/// before the window end when that is later. The final window is taken whole.
pub fn split_windows(text: &str, max_size: usize) -> Vec<&str> {
    let max_size = max_size.max(1);

    // Byte offset of every char boundary, including the end of the string
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let len = bounds.len() - 1;

    if len <= max_size {
        return vec![text];
    }

    let chars: Vec<char> = text.chars().collect();
    let mut windows = Vec::new();
    let mut start = 0;

    while start < len {
        let mut end = (start + max_size).min(len);

        if end < len {
            let fallback = end.saturating_sub(HARD_CUT_MARGIN);
            let break_point = chars[start..end]
                .iter()
                .rposition(|&c| is_break_char(c))
                .map_or(fallback, |offset| (start + offset).max(fallback));

            if break_point > start {
                end = break_point + 1;
            }
        }

        windows.push(&text[bounds[start]..bounds[end]]);
        start = end;
    }

    windows
}

/// Split `text` into trimmed chunks of at most `max_size` characters.
///
/// Text that already fits is returned unchanged as a single chunk. Windows that
/// trim down to nothing are dropped.
pub fn chunk(text: &str, max_size: usize) -> Vec<String> {
    if text.chars().count() <= max_size {
        return vec![text.to_string()];
    }

    split_windows(text, max_size)
        .into_iter()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_single_chunk() {
        let text = "  short text  ";
        assert_eq!(chunk(text, 2000), vec![text.to_string()]);
        assert_eq!(split_windows(text, 2000), vec![text]);
    }

    #[test]
    fn test_exact_fit_is_single_chunk() {
        let text = "a".repeat(50);
        assert_eq!(chunk(&text, 50).len(), 1);
    }

    #[test]
    fn test_unbroken_text_uses_hard_cut() {
        let text = "A".repeat(5000);
        let windows = split_windows(&text, 2000);

        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].len(), 1901);
        assert_eq!(windows.concat(), text);

        let chunks = chunk(&text, 2000);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 2100));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_prose_breaks_after_separator() {
        let text = "word ".repeat(1000);
        let windows = split_windows(&text, 2000);

        assert_eq!(windows.len(), 3);
        assert!(windows[0].ends_with(' '));
        assert_eq!(windows.concat(), text);

        let chunks = chunk(&text, 2000);
        assert!(chunks.iter().all(|c| !c.starts_with(' ') && !c.ends_with(' ')));
    }

    #[test]
    fn test_break_prefers_last_separator() {
        let text = format!("{}.{}", "a".repeat(150), "b".repeat(100));
        let windows = split_windows(&text, 200);
        // '.' at 150 is later than the 100-char fallback
        assert_eq!(windows[0].chars().count(), 151);
        assert!(windows[0].ends_with('.'));
        assert_eq!(windows.concat(), text);
    }

    #[test]
    fn test_early_separator_loses_to_fallback() {
        let text = format!("a.{}", "b".repeat(400));
        let windows = split_windows(&text, 300);
        assert_eq!(windows[0].chars().count(), 201);
        assert_eq!(windows.concat(), text);
    }

    #[test]
    fn test_multibyte_text_reconstructs() {
        let text = "héllo wörld ünïcødé. ".repeat(300);
        for size in [7, 64, 150, 1000] {
            let windows = split_windows(&text, size);
            assert_eq!(windows.concat(), text);
            assert!(windows.iter().all(|w| w.chars().count() <= size));
        }
    }

    #[test]
    fn test_tiny_window_still_progresses() {
        let text = "abcdefghij";
        let windows = split_windows(text, 3);
        assert_eq!(windows.concat(), text);
        assert_eq!(windows.len(), 4);
    }

    #[test]
    fn test_whitespace_only_windows_are_dropped() {
        let text = format!("{}{}", "x".repeat(10), " ".repeat(30));
        let chunks = chunk(&text, 10);
        assert_eq!(chunks, vec!["x".repeat(10)]);
    }
}
