/// Languages the code panel knows how to highlight: (id, display name)
pub const SUPPORTED_LANGUAGES: &[(&str, &str)] = &[
    ("plaintext", "Plain Text"),
    ("javascript", "JavaScript"),
    ("typescript", "TypeScript"),
    ("html", "HTML"),
    ("css", "CSS"),
    ("php", "PHP"),
    ("python", "Python"),
    ("java", "Java"),
    ("csharp", "C#"),
    ("cpp", "C++"),
    ("ruby", "Ruby"),
    ("go", "Go"),
    ("rust", "Rust"),
    ("sql", "SQL"),
    ("markdown", "Markdown"),
    ("json", "JSON"),
    ("yaml", "YAML"),
    ("shell", "Shell"),
];

/// Guess the language of an untagged block. The checks run in a fixed order
/// and the first hit wins.
pub fn infer_language(code: &str) -> &'static str {
    if code.contains("<?php") {
        "php"
    } else if code.contains("<html") || code.contains("<!DOCTYPE") {
        "html"
    } else if code.contains("import React") {
        "typescript"
    } else if code.contains("def ") || code.contains("print(") {
        "python"
    } else if code.contains("function") || code.contains("=>") {
        "javascript"
    } else if code.contains(".css") || code.contains('{') {
        "css"
    } else {
        "plaintext"
    }
}

/// Display name for a language id; unknown ids are shown as-is
pub fn display_name(id: &str) -> &str {
    SUPPORTED_LANGUAGES
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(id))
        .map(|(_, name)| *name)
        .unwrap_or(id)
}
