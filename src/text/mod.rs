//! Text normalization, keyword extraction and token estimation
//!
//! These helpers back the hard keyword gate of the match scorer and the token
//! budgeting used by the batch planner and response merger.

/// Fold a character to its unaccented base form.
///
/// Covers the Latin-1 and Latin Extended-A ranges, which is sufficient for the
/// French-language corpora this engine targets.
fn fold_diacritic(c: char) -> char {
    match c {
        'à' | 'â' | 'ä' | 'á' | 'ã' | 'å' => 'a',
        'À' | 'Â' | 'Ä' | 'Á' | 'Ã' | 'Å' => 'A',
        'ç' => 'c',
        'Ç' => 'C',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'È' | 'É' | 'Ê' | 'Ë' => 'E',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'Ì' | 'Í' | 'Î' | 'Ï' => 'I',
        'ñ' => 'n',
        'Ñ' => 'N',
        'ò' | 'ó' | 'ô' | 'ö' | 'õ' => 'o',
        'Ò' | 'Ó' | 'Ô' | 'Ö' | 'Õ' => 'O',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'Ù' | 'Ú' | 'Û' | 'Ü' => 'U',
        'ý' | 'ÿ' => 'y',
        'Ý' => 'Y',
        'œ' => 'o',
        'Œ' => 'O',
        'æ' => 'a',
        'Æ' => 'A',
        _ => c,
    }
}

/// Normalize text for keyword comparison: apostrophes become spaces, accents
/// are stripped, everything except alphanumerics and whitespace is removed,
/// and the result is uppercased.
pub fn normalize_text(text: &str) -> String {
    text.chars()
        .map(|c| if c == '\'' || c == '’' { ' ' } else { c })
        .map(fold_diacritic)
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .flat_map(|c| c.to_uppercase())
        .collect()
}

/// Check whether the normalized text contains every keyword as a whole word.
///
/// An empty keyword set always matches. This is the AND gate used by the
/// match scorer before any vector math runs.
pub fn contains_all_keywords(text: &str, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return true;
    }

    let normalized = normalize_text(text);
    let words: std::collections::HashSet<&str> = normalized.split_whitespace().collect();

    keywords
        .iter()
        .all(|k| words.contains(normalize_text(k).as_str()))
}

/// Extract query keywords: capitalized words, excluding the sentence-initial
/// word (which is capitalized for grammatical reasons, not because it names
/// something).
pub fn extract_keywords(query: &str) -> Vec<String> {
    let cleaned = query.replace(['\'', '’'], " ");
    cleaned
        .split_whitespace()
        .skip(1)
        .filter(|word| word.chars().next().is_some_and(|c| c.is_uppercase()))
        .map(|word| word.to_string())
        .collect()
}

/// Estimate the token count of a text: ~1.3 tokens per word.
pub fn estimate_tokens(text: &str) -> f64 {
    text.split_whitespace().count() as f64 * 1.3
}

/// Sentinel page number for ranges that cannot be parsed numerically.
/// Such matches sort after every real page.
pub const UNPARSEABLE_PAGE: u32 = 9999;

/// Extract the leading page number from a range label such as `"Page 5"`,
/// `"Pages 3 à 7"` or `"Résumé général du livre de la page 1 à la page 12"`.
///
/// Returns [`UNPARSEABLE_PAGE`] when no number can be found; that is a defined
/// fallback, not an error.
pub fn parse_page_number(page_range: &str) -> u32 {
    page_range
        .split_whitespace()
        .find_map(|token| token.parse::<u32>().ok())
        .unwrap_or(UNPARSEABLE_PAGE)
}

/// Format a page range label for a node spanning `start..=end`.
pub fn format_page_range(start: u32, end: u32) -> String {
    if start == end {
        format!("Page {start}")
    } else {
        format!("Pages {start} à {end}")
    }
}
