//! Greedy message splitter for the transport's 4096-character ceiling.

/// Telegram's hard per-message limit.
pub const MAX_MESSAGE_LENGTH: usize = 4096;

/// Split points must land in the last 70% of the window; anything earlier
/// wastes too much of the chunk and we fall through to the next strategy.
const MIN_SPLIT_NUMERATOR: usize = 3;
const MIN_SPLIT_DENOMINATOR: usize = 10;

/// Split `text` into chunks of at most [`MAX_MESSAGE_LENGTH`] characters.
///
/// Greedy: emit the tail when it fits; otherwise cut at the last newline in
/// the window, falling back to the last space, and force-splitting at the
/// window boundary when both land before 30% of the window. Leading
/// whitespace of each following chunk is consumed as the delimiter.
pub fn split_message(text: &str) -> Vec<String> {
    split_with_window(text, MAX_MESSAGE_LENGTH)
}

pub(crate) fn split_with_window(text: &str, window: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let min_cut = window * MIN_SPLIT_NUMERATOR / MIN_SPLIT_DENOMINATOR;
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let remaining = chars.len() - start;
        if remaining <= window {
            chunks.push(chars[start..].iter().collect());
            break;
        }

        let win = &chars[start..start + window];
        let cut = match win.iter().rposition(|&c| c == '\n') {
            Some(i) if i >= min_cut => i,
            _ => match win.iter().rposition(|&c| c == ' ') {
                Some(i) if i >= min_cut => i,
                _ => window,
            },
        };

        chunks.push(chars[start..start + cut].iter().collect());
        start += cut;
        while start < chars.len() && chars[start].is_whitespace() {
            start += 1;
        }
    }

    chunks.retain(|c: &String| !c.is_empty());
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_message("hello"), vec!["hello"]);
    }

    #[test]
    fn exactly_at_limit_is_one_chunk() {
        let text = "a".repeat(MAX_MESSAGE_LENGTH);
        assert_eq!(split_message(&text).len(), 1);
    }

    #[test]
    fn splits_at_last_newline_in_window() {
        let part = "b".repeat(20);
        let text = format!("{}\n{}", "a".repeat(25), part);
        let chunks = split_with_window(&text, 30);
        assert_eq!(chunks[0], "a".repeat(25));
        assert_eq!(chunks[1], part);
    }

    #[test]
    fn early_newline_falls_back_to_space() {
        // Newline at index 2 is before 30% of a 30-char window; the space at
        // index 20 wins instead.
        let text = format!("ab\ncdefghijklmnopqrs {}", "x".repeat(30));
        let chunks = split_with_window(&text, 30);
        assert_eq!(chunks[0], "ab\ncdefghijklmnopqrs");
        assert!(chunks[1].starts_with('x'));
    }

    #[test]
    fn force_split_on_single_token() {
        let text = "y".repeat(100);
        let chunks = split_with_window(&text, 30);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].len(), 30);
        assert_eq!(chunks[3].len(), 10);
    }

    #[test]
    fn no_chunk_exceeds_the_window() {
        let mut text = String::new();
        for i in 0..300 {
            text.push_str(&format!("line number {i} with some padding text\n"));
        }
        for chunk in split_message(&text) {
            assert!(chunk.chars().count() <= MAX_MESSAGE_LENGTH);
        }
    }

    #[test]
    fn rejoining_reconstructs_the_original_modulo_delimiters() {
        let mut text = String::new();
        for i in 0..200 {
            text.push_str(&format!("paragraph {i} sentence with words and trailing space \n"));
        }
        let chunks = split_with_window(&text, 100);
        // Collapsing whitespace, the concatenation must equal the original.
        let rejoined: String = chunks.join(" ");
        let normalize = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
        assert_eq!(normalize(&rejoined), normalize(&text));
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        let text = "日本語のテキスト ".repeat(40);
        for chunk in split_with_window(&text, 30) {
            assert!(chunk.chars().count() <= 30);
        }
    }
}
