use once_cell::sync::Lazy;
use regex::Regex;

/// Sent ahead of every conversation history
pub const SYSTEM_PROMPT: &str = r#"You are a highly capable and creative AI assistant. Always give comprehensive, thoughtful answers that match what the user asked for, even when the answer needs to be long.

### Response Guidelines:
1. **Structure**: Use Markdown for clear formatting. Organize answers logically and prioritize clarity.
2. **Engagement**: Be interactive, adaptive, and considerate of the user's goals.
3. **Examples**: Include detailed code snippets, diagrams, or examples when relevant.
4. **Brevity & Depth**: Balance conciseness with in-depth explanations as required.
5. **Long Answers**: Do not cap the length of an answer; give as much detail as the user asks for.

### Response Format:
#### 1. Understanding the Request
   - Summarize the core question or problem and the goals behind it.
#### 2. Proposed Solution
   - Outline a complete solution with step-by-step instructions.
   - Provide code in fenced blocks tagged with their language, for example:

```language
// Example code or command if relevant
```

#### 3. Explanation
   - Justify the approach and discuss trade-offs and alternatives.
#### 4. Best Practices & Tips
   - Share insights on optimization, scalability, security, debugging and testing.
#### 5. Additional Resources
   - Point to documentation, tools or further reading.

### Tone and Style:
- Adapt to the user's level of expertise (beginner, intermediate, expert).
- Be professional, friendly, and supportive.
"#;

static COUNT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(\d+)\s*(items?|data|rows?|entries|examples?|samples?)",
        r"(?i)generate\s*(\d+)",
        r"(?i)create\s*(\d+)",
        r"(?i)list\s*(\d+)",
        r"(?i)show\s*(\d+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("count pattern is valid"))
    .collect()
});

/// Number of items the user asked for, e.g. "give me 5 examples" -> 5.
/// Patterns are tried in order; the first that matches wins.
pub fn requested_count(message: &str) -> Option<u32> {
    COUNT_PATTERNS
        .iter()
        .filter_map(|re| re.captures(message))
        .find_map(|caps| caps.get(1)?.as_str().parse().ok())
}

/// System instruction appended after the history when a count was requested
pub fn count_instruction(count: u32) -> String {
    format!(
        "Provide exactly {} items. Number each item in order starting from 1.",
        count
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_with_noun() {
        assert_eq!(requested_count("give me 5 examples of closures"), Some(5));
        assert_eq!(requested_count("I need 12 rows of fake data"), Some(12));
        assert_eq!(requested_count("3items please"), Some(3));
    }

    #[test]
    fn test_count_with_verb() {
        assert_eq!(requested_count("Generate 20 user names"), Some(20));
        assert_eq!(requested_count("list 7 sorting algorithms"), Some(7));
        assert_eq!(requested_count("SHOW 4 of them"), Some(4));
    }

    #[test]
    fn test_noun_pattern_takes_priority() {
        // "create 2" would match too, but the noun pattern is checked first
        assert_eq!(requested_count("create 2 tables with 10 rows"), Some(10));
    }

    #[test]
    fn test_no_count() {
        assert_eq!(requested_count("what is a monad?"), None);
        assert_eq!(requested_count("explain http/2"), None);
    }

    #[test]
    fn test_overflowing_count_is_ignored() {
        assert_eq!(requested_count("99999999999 items"), None);
    }

    #[test]
    fn test_instruction_mentions_count() {
        assert!(count_instruction(5).contains("exactly 5 items"));
    }
}
