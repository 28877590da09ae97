/// Text cleaning for titles and descriptions

/// Collapse whitespace, drop control characters and cap the length in characters.
/// Returns `None` when nothing is left.
pub fn clean_title(raw: &str, max_len: usize) -> Option<String> {
    let collapsed = collapse(raw);
    let capped: String = collapsed.chars().take(max_len).collect();
    let capped = capped.trim();
    if capped.is_empty() {
        None
    } else {
        Some(capped.to_string())
    }
}

/// Collapse whitespace and cut to `max_len` characters, marking the cut with `...`
pub fn truncate_description(raw: &str, max_len: usize) -> String {
    let collapsed = collapse(raw);
    if collapsed.chars().count() <= max_len {
        return collapsed;
    }
    let cut: String = collapsed.chars().take(max_len).collect();
    format!("{}...", cut.trim_end())
}

fn collapse(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("  The\n\tMovie \u{0007} Name ", 60), Some("The Movie Name".to_string()));
        assert_eq!(clean_title(" \n ", 60), None);
        assert_eq!(clean_title("abcdef", 3), Some("abc".to_string()));
    }

    #[test]
    fn test_clean_title_is_char_safe() {
        let title = clean_title("ñandú más café", 6).unwrap();
        assert_eq!(title, "ñandú");
    }

    #[test]
    fn test_truncate_description() {
        assert_eq!(truncate_description("short  text", 50), "short text");
        assert_eq!(truncate_description("one two three four", 8), "one two...");
    }
}
