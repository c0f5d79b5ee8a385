//! Keyword-overlap page ranking.

use std::cmp::Reverse;

const MIN_KEYWORD_CHARS: usize = 5;

/// Lowercased words of at least five characters.
pub fn keywords(question: &str) -> Vec<String> {
    question
        .split_whitespace()
        .filter(|w| w.chars().count() >= MIN_KEYWORD_CHARS)
        .map(str::to_lowercase)
        .collect()
}

/// Number of keywords that occur anywhere in the page (substring match).
pub fn score(keywords: &[String], page: &str) -> usize {
    let page = page.to_lowercase();
    keywords.iter().filter(|k| page.contains(k.as_str())).count()
}

/// The `top_k` best-scoring pages with a positive score, best first.
///
/// Ties keep page order. No usable keyword, or no page mentioning any of
/// them, gives an empty list.
pub fn rank_pages<'a>(question: &str, pages: &'a [String], top_k: usize) -> Vec<&'a str> {
    let keywords = keywords(question);
    if keywords.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(usize, &str)> = pages
        .iter()
        .map(|p| (score(&keywords, p), p.as_str()))
        .collect();
    scored.sort_by_key(|(s, _)| Reverse(*s));

    scored
        .into_iter()
        .take(top_k)
        .filter(|(s, _)| *s > 0)
        .map(|(_, p)| p)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_keywords() {
        assert_eq!(
            keywords("Details of Scope 1 emissions, total?"),
            vec!["details", "scope", "emissions,", "total?"]
        );
        assert!(keywords("Is it ok to ask?").is_empty());
    }

    #[test]
    fn no_keywords_means_no_context() {
        let p = pages(&["foo", "bar"]);
        assert!(rank_pages("Is it ok?", &p, 3).is_empty());
    }

    #[test]
    fn no_matching_page_means_no_context() {
        let p = pages(&["foo", "bar"]);
        assert!(rank_pages("Describe water withdrawal", &p, 3).is_empty());
    }

    #[test]
    fn best_pages_first_ties_in_page_order() {
        let p = pages(&[
            "cover page",
            "Energy consumption was 10 GJ",
            "Total energy consumption and water usage",
            "water usage only",
            "unrelated",
        ]);
        let ranked = rank_pages("Total energy consumption and water usage", &p, 3);
        assert_eq!(
            ranked,
            vec![
                "Total energy consumption and water usage",
                "Energy consumption was 10 GJ",
                "water usage only",
            ]
        );
    }

    #[test]
    fn zero_scores_are_dropped_after_the_cut() {
        let p = pages(&["emissions data", "nothing", "nothing either"]);
        assert_eq!(rank_pages("Scope emissions", &p, 2), vec!["emissions data"]);
    }

    #[test]
    fn substring_matches_count() {
        let kws = keywords("water");
        assert_eq!(score(&kws, "Wastewater treatment"), 1);
    }
}
