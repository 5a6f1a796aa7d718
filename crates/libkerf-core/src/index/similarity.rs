//! Tokenization and string similarity shared by search and ranking

use std::collections::{BTreeMap, BTreeSet};

/// Words too common in task descriptions to carry signal
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "do", "for", "from", "in", "into", "is",
    "it", "of", "on", "or", "so", "that", "the", "this", "to", "we", "with", "fix", "add",
    "make", "update", "use", "new", "should", "when", "all",
];

pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// Split text into lowercase identifier words.
///
/// `getUserName` and `get_user_name` both yield `get`, `user`, `name`; the
/// whole identifier is kept as well so exact symbol names can be looked up.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for raw in text.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
        if raw.is_empty() {
            continue;
        }
        let whole = raw.to_lowercase();
        let parts = split_identifier(raw);
        if parts.len() > 1 {
            out.push(whole);
            out.extend(parts);
        } else {
            out.push(whole);
        }
    }
    out.retain(|w| w.len() > 1 && !w.chars().all(|c| c.is_ascii_digit()));
    out
}

/// Distinct words of a task description, minus stop words
pub fn query_terms(text: &str) -> BTreeSet<String> {
    tokenize(text)
        .into_iter()
        .filter(|w| !is_stop_word(w))
        .collect()
}

/// Term frequencies, capped at `max_terms` most frequent (ties by term)
pub fn term_frequencies(text: &str, max_terms: usize) -> BTreeMap<String, u32> {
    let mut counts: BTreeMap<String, u32> = BTreeMap::new();
    for word in tokenize(text) {
        if is_stop_word(&word) {
            continue;
        }
        *counts.entry(word).or_insert(0) += 1;
    }
    if counts.len() <= max_terms {
        return counts;
    }
    let mut ranked: Vec<(String, u32)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(max_terms);
    ranked.into_iter().collect()
}

fn split_identifier(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    for chunk in raw.split('_') {
        let mut current = String::new();
        let mut prev_lower = false;
        for c in chunk.chars() {
            if c.is_uppercase() && prev_lower && !current.is_empty() {
                parts.push(current.to_lowercase());
                current.clear();
            }
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
            current.push(c);
        }
        if !current.is_empty() {
            parts.push(current.to_lowercase());
        }
    }
    parts
}

/// Levenshtein distance over chars
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// `1 - distance / max_len`; 0.0 when either side is empty
pub fn edit_similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if a.is_empty() || b.is_empty() || max_len == 0 {
        return 0.0;
    }
    1.0 - edit_distance(a, b) as f64 / max_len as f64
}

/// Jaccard index; 0.0 when both sets are empty
pub fn jaccard<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Similarity of a query to a name: the better of normalized edit
/// similarity and word overlap, with a bonus for substring containment.
pub fn similarity(query: &str, name: &str) -> f64 {
    let q = query.trim().to_lowercase();
    let n = name.trim().to_lowercase();
    if q.is_empty() || n.is_empty() {
        return 0.0;
    }
    if q == n {
        return 1.0;
    }
    let edit = edit_similarity(&q, &n);
    let qa: BTreeSet<String> = tokenize(&q).into_iter().collect();
    let na: BTreeSet<String> = tokenize(&n).into_iter().collect();
    let overlap = jaccard(&qa, &na);
    let contained = if n.contains(&q) || q.contains(&n) { 0.8 } else { 0.0 };
    edit.max(overlap).max(contained).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_splits_identifiers() {
        let words = tokenize("fix getUserName in auth_db.py");
        assert!(words.contains(&"getusername".to_string()));
        assert!(words.contains(&"user".to_string()));
        assert!(words.contains(&"auth_db".to_string()));
        assert!(words.contains(&"db".to_string()));
        assert!(words.contains(&"py".to_string()));
    }

    #[test]
    fn test_query_terms_drop_stop_words() {
        let terms = query_terms("Fix the login bug");
        assert_eq!(terms.into_iter().collect::<Vec<_>>(), vec!["bug", "login"]);
    }

    #[test]
    fn test_similarity_handles_empty() {
        assert_eq!(similarity("", ""), 0.0);
        assert_eq!(similarity("login", ""), 0.0);
        assert_eq!(edit_similarity("", "x"), 0.0);
        assert_eq!(jaccard::<String>(&BTreeSet::new(), &BTreeSet::new()), 0.0);
    }

    #[test]
    fn test_similarity_ranks_close_names_higher() {
        assert_eq!(similarity("login", "login"), 1.0);
        assert!(similarity("login", "login_user") > similarity("login", "render"));
        assert!(similarity("usr", "user") > 0.5);
    }

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("", "abc"), 3);
    }

    #[test]
    fn test_term_frequencies_cap() {
        let tf = term_frequencies("alpha alpha beta gamma gamma gamma", 2);
        assert_eq!(tf.len(), 2);
        assert_eq!(tf.get("gamma"), Some(&3));
        assert_eq!(tf.get("alpha"), Some(&2));
    }
}
