use once_cell::sync::Lazy;
use regex::Regex;

// Applied in order. Images go before links since an image contains a link.
static RULES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?s)```.*?```", ""),
        (r"`[^`]*`", ""),
        (r"!\[[^\]]*\]\([^)]+\)", ""),
        (r"\[([^\]]+)\]\([^)]+\)", "$1"),
        (r"\*\*([^*]+)\*\*", "$1"),
        (r"__([^_]+)__", "$1"),
        (r"\*([^*]+)\*", "$1"),
        (r"_([^_]+)_", "$1"),
        (r"(?m)^[ \t]*[-*+][ \t]+", "• "),
        (r"\n{3,}", "\n\n"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| {
        (
            Regex::new(pattern).expect("markdown pattern is valid"),
            replacement,
        )
    })
    .collect()
});

/// Plain text for copying a message: code removed, formatting markers dropped
pub fn to_plain_text(markdown: &str) -> String {
    let mut text = markdown.to_string();
    for (pattern, replacement) in RULES.iter() {
        text = pattern.replace_all(&text, *replacement).into_owned();
    }
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_is_removed() {
        let md = "Run this:\n```bash\nls -la\n```\nthen `cd` somewhere.";
        assert_eq!(to_plain_text(md), "Run this:\n\nthen  somewhere.");
    }

    #[test]
    fn test_links_and_images() {
        assert_eq!(
            to_plain_text("See [the docs](https://example.com) ![logo](logo.png)here"),
            "See the docs here"
        );
    }

    #[test]
    fn test_emphasis_is_unwrapped() {
        assert_eq!(
            to_plain_text("**bold**, __also bold__, *italic* and _this_"),
            "bold, also bold, italic and this"
        );
    }

    #[test]
    fn test_bullets_are_normalized() {
        assert_eq!(
            to_plain_text("Items:\n- one\n  * two\n+ three\n1. four"),
            "Items:\n• one\n• two\n• three\n1. four"
        );
    }

    #[test]
    fn test_blank_runs_collapse() {
        assert_eq!(to_plain_text("\n\na\n\n\n\n\nb\n"), "a\n\nb");
    }
}
