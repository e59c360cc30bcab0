//! Bounded normalization of study material before prompting.

/// Character ceiling for normalized material. Beyond it, a 60% prefix and a
/// 40% suffix are kept so both the opening and closing context survive.
pub const MAX_MATERIAL_CHARS: usize = 3000;

const ELLIPSIS: &str = " … ";

/// Collapse whitespace runs to single spaces, trim the ends, and bound the
/// result to [`MAX_MATERIAL_CHARS`] characters.
pub fn normalize(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= MAX_MATERIAL_CHARS {
        return collapsed;
    }

    let head_len = MAX_MATERIAL_CHARS * 3 / 5;
    let tail_len = MAX_MATERIAL_CHARS * 2 / 5;
    let chars: Vec<char> = collapsed.chars().collect();
    let head: String = chars[..head_len].iter().collect();
    let tail: String = chars[chars.len() - tail_len..].iter().collect();
    format!("{}{}{}", head.trim_end(), ELLIPSIS, tail.trim_start())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace() {
        assert_eq!(normalize("  a\t\tb\n\nc  "), "a b c");
    }

    #[test]
    fn short_text_passes_through() {
        assert_eq!(normalize("photosynthesis"), "photosynthesis");
    }

    #[test]
    fn long_text_keeps_head_and_tail() {
        let long = "x".repeat(10_000);
        let bounded = normalize(&long);
        assert!(bounded.chars().count() < 10_000);
        assert!(bounded.contains('…'));
    }

    #[test]
    fn bounding_is_char_safe_for_multibyte() {
        let long = "é".repeat(MAX_MATERIAL_CHARS + 100);
        let bounded = normalize(&long);
        assert!(bounded.starts_with('é'));
        assert!(bounded.ends_with('é'));
    }
}
