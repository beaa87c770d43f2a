//! Fenced code block detection over a (possibly partial) assistant message.
//!
//! This is a re-scan, not an incremental parser: it is run on the whole buffer
//! after every fragment. Buffers are bounded by a single reply so that is cheap.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::language::infer_language;
use crate::state::CodeBlock;

// Opening fence with an optional tag, newline, lazily matched body, closing fence
static FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```([^\s`]*)[ \t]*\r?\n(.*?)```").expect("fenced block pattern is valid")
});

/// The most recent complete fenced block in `buffer`, if any.
///
/// An unterminated fence is not a block yet.
pub fn detect(buffer: &str) -> Option<CodeBlock> {
    let caps = FENCED_BLOCK.captures_iter(buffer).last()?;

    let body = caps.get(2).map_or("", |m| m.as_str());
    let language = match caps.get(1).map(|m| m.as_str()).filter(|tag| !tag.is_empty()) {
        Some(tag) => tag.to_string(),
        None => infer_language(body).to_string(),
    };

    Some(CodeBlock {
        language,
        body: body.trim().to_string(),
    })
}
