//! Substring-run fuzzy matching for labeled pickers.
//!
//! # Responsibility
//! - Score corpus texts against a query by their longest contiguous
//!   case-insensitive run matching a prefix of the query.
//! - Return enough structure for consumers to highlight the matched span
//!   without re-deriving it.
//!
//! # Invariants
//! - Zero-score items are excluded.
//! - Ordering is score descending, ties broken by earlier match start.
//! - `prefix + matched + suffix` always reproduces the original text.

/// One scored hit for a corpus item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuzzyHit<T> {
    /// The corpus item the text belonged to.
    pub item: T,
    /// Length in characters of the matched run.
    pub score: usize,
    /// Text before the matched span, unchanged.
    pub prefix: String,
    /// The matched span, in the original casing.
    pub matched: String,
    /// Text after the matched span, unchanged.
    pub suffix: String,
}

/// Scores every corpus entry against `query` and returns ranked hits.
///
/// The score of a text is the length of the longest contiguous run of its
/// characters that case-insensitively matches the query from the query's
/// first character on. This is a prefix-run chase, not edit distance.
pub fn fuzzy_match<T>(corpus: Vec<(T, String)>, query: &str) -> Vec<FuzzyHit<T>> {
    let query_chars: Vec<char> = query.chars().map(lower_one).collect();
    if query_chars.is_empty() {
        return Vec::new();
    }

    let mut hits: Vec<(usize, FuzzyHit<T>)> = Vec::new();
    for (item, text) in corpus {
        if let Some((start, length)) = best_run(&text, &query_chars) {
            let chars: Vec<char> = text.chars().collect();
            let prefix: String = chars[..start].iter().collect();
            let matched: String = chars[start..start + length].iter().collect();
            let suffix: String = chars[start + length..].iter().collect();
            hits.push((
                start,
                FuzzyHit {
                    item,
                    score: length,
                    prefix,
                    matched,
                    suffix,
                },
            ));
        }
    }

    hits.sort_by(|(start_a, a), (start_b, b)| {
        b.score.cmp(&a.score).then(start_a.cmp(start_b))
    });
    hits.into_iter().map(|(_, hit)| hit).collect()
}

// One-to-one lowercase mapping keeps char indices aligned between the
// original text and its lowered form.
fn lower_one(c: char) -> char {
    let mut lowered = c.to_lowercase();
    match (lowered.next(), lowered.next()) {
        (Some(single), None) => single,
        _ => c,
    }
}

/// Finds the earliest longest run: `(start_char_index, run_length)`.
fn best_run(text: &str, query_lower: &[char]) -> Option<(usize, usize)> {
    let text_lower: Vec<char> = text.chars().map(lower_one).collect();

    let mut best: Option<(usize, usize)> = None;
    for start in 0..text_lower.len() {
        let mut length = 0;
        while length < query_lower.len()
            && start + length < text_lower.len()
            && text_lower[start + length] == query_lower[length]
        {
            length += 1;
        }
        if length > 0 && best.map(|(_, len)| length > len).unwrap_or(true) {
            best = Some((start, length));
        }
    }
    best
}
