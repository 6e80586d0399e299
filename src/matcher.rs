use regex::Regex;
use tracing::warn;

use crate::model::MatchMode;

/// Test whether `keyword` occurs in `content`.
///
/// Both sides are lowercased first. Fuzzy is a plain substring test. Exact
/// requires the keyword to sit between non-word characters or the ends of the
/// content, so `cat` does not match inside `category`.
pub fn matches(content: &str, keyword: &str, mode: MatchMode) -> bool {
    if content.is_empty() || keyword.trim().is_empty() {
        return false;
    }

    let content = content.to_lowercase();
    let keyword = keyword.to_lowercase();

    match mode {
        MatchMode::Fuzzy => content.contains(&keyword),
        MatchMode::Exact => {
            // Exact is strictly narrower than fuzzy
            if !content.contains(&keyword) {
                return false;
            }
            let pattern = format!(r"(?:^|\W){}(?:$|\W)", regex::escape(&keyword));
            match Regex::new(&pattern) {
                Ok(re) => re.is_match(&content),
                Err(e) => {
                    warn!(keyword = %keyword, error = %e, "could not build exact-match pattern");
                    false
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fuzzy_case_insensitive() {
        assert!(matches("Breaking: PriceDrop announced", "pricedrop", MatchMode::Fuzzy));
        assert!(matches("category", "CAT", MatchMode::Fuzzy));
        assert!(!matches("nothing here", "sale", MatchMode::Fuzzy));
    }

    #[test]
    fn test_exact_word_boundaries() {
        assert!(!matches("catalog category", "cat", MatchMode::Exact));
        assert!(matches("cat sat", "cat", MatchMode::Exact));
        assert!(matches("the cat", "cat", MatchMode::Exact));
        assert!(matches("a cat, a dog", "CAT", MatchMode::Exact));
        assert!(matches("cat", "cat", MatchMode::Exact));
    }

    #[test]
    fn test_exact_escapes_keyword() {
        assert!(matches("price: $9.99 today", "$9.99", MatchMode::Exact));
        assert!(!matches("price: $9x99 today", "$9.99", MatchMode::Exact));
        assert!(matches("learn c++ now", "c++", MatchMode::Exact));
    }

    #[test]
    fn test_exact_multiword() {
        assert!(matches("<p>Flash Sale starts</p>", "flash sale", MatchMode::Exact));
        assert!(!matches("flashsale", "flash sale", MatchMode::Exact));
    }

    #[test]
    fn test_empty_inputs() {
        assert!(!matches("", "cat", MatchMode::Fuzzy));
        assert!(!matches("", "cat", MatchMode::Exact));
        assert!(!matches("cat", "", MatchMode::Fuzzy));
        assert!(!matches("cat", "   ", MatchMode::Exact));
    }

    #[test]
    fn test_exact_implies_fuzzy() {
        let cases = [
            ("cat sat", "cat"),
            ("catalog category", "cat"),
            ("Über alles", "über"),
            ("x-y-z", "y"),
            ("end.", "end"),
        ];
        for (content, keyword) in cases {
            if matches(content, keyword, MatchMode::Exact) {
                assert!(matches(content, keyword, MatchMode::Fuzzy), "{} / {}", content, keyword);
            }
        }
    }

    #[test]
    fn test_unicode_content() {
        assert!(matches("今日发布新品", "新品", MatchMode::Fuzzy));
        assert!(matches("Über alles", "über", MatchMode::Exact));
    }
}
