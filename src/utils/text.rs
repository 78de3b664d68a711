/// Words that carry no meaning in a solution phrase.
const FUNCTION_WORDS: &[&str] = &[
    "a", "an", "the", "to", "of", "in", "on", "for", "and", "or", "by", "with", "it", "is",
    "was", "be", "this", "that", "i", "we", "so", "then", "now", "just", "all", "as", "at",
];

pub fn is_function_word(word: &str) -> bool {
    FUNCTION_WORDS.contains(&word)
}

/// Extract keywords from free text.
///
/// Unicode-aware: splits on anything that is not alphanumeric, `_` or `-`,
/// keeps tokens of at least two chars, lowercases, sorts and deduplicates.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut keywords: Vec<String> = lower
        .split(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
        .map(|w| w.trim_matches('-'))
        .filter(|w| w.chars().count() >= 2)
        .map(str::to_string)
        .collect();

    keywords.sort();
    keywords.dedup();
    keywords
}

/// Truncate a string to maximum character count (UTF-8 safe).
/// Adds "..." suffix if truncated.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    let char_count = s.chars().count();
    if char_count <= max_chars {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_keywords() {
        let kw = extract_keywords("Added aria-hidden=true to the decorative SVG!");
        assert!(kw.contains(&"aria-hidden".to_string()));
        assert!(kw.contains(&"svg".to_string()));
        assert!(kw.contains(&"true".to_string()));
        assert!(!kw.iter().any(|k| k.chars().count() < 2));

        let mut sorted = kw.clone();
        sorted.sort();
        assert_eq!(kw, sorted);
    }

    #[test]
    fn test_extract_keywords_unicode() {
        let kw = extract_keywords("找不到模块 foo");
        assert!(kw.contains(&"找不到模块".to_string()));
        assert!(kw.contains(&"foo".to_string()));
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello world", 8), "hello...");
        assert_eq!(truncate_chars("안녕하세요 세계", 6), "안녕하...");
    }
}
