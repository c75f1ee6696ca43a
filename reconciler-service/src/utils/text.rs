//! Text normalization for Portuguese user input.
//!
//! Category and account matching is case- and diacritic-insensitive
//! throughout; folding happens here so every comparison agrees.

/// Affirmative replies that confirm a draft, longest first so phrase
/// prefixes win over their single-word heads.
const AFFIRMATIVES: &[&str] = &[
    "pode seguir",
    "manda bala",
    "confirmo",
    "confirma",
    "correto",
    "sim",
    "ok",
];

/// Fold to lowercase, stripping the accents that show up in Portuguese
/// category and account names.
pub fn fold(input: &str) -> String {
    input
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

/// Whether two names are the same once folded.
pub fn eq_fold(a: &str, b: &str) -> bool {
    fold(a.trim()) == fold(b.trim())
}

/// Split into folded word tokens, dropping punctuation.
pub fn tokenize(input: &str) -> Vec<String> {
    fold(input)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether the input mentions any digits (a value, a date, a total).
pub fn mentions_number(input: &str) -> bool {
    input.chars().any(|c| c.is_ascii_digit())
}

/// Whether a reply is a bare affirmative ("sim", "ok", "pode seguir", ...).
pub fn is_affirmative(reply: &str) -> bool {
    matches!(strip_affirmative_prefix(reply), Some(rest) if rest.is_empty())
}

/// If the reply opens with an affirmative word, return whatever follows it
/// ("sim, conta Nubank" -> "conta Nubank"). `None` when the reply does not
/// start with an affirmative at all.
pub fn strip_affirmative_prefix(reply: &str) -> Option<String> {
    let trimmed = reply.trim();
    let folded = fold(trimmed);

    for aff in AFFIRMATIVES {
        if let Some(rest) = folded.strip_prefix(aff) {
            let at_boundary = rest.is_empty() || !rest.starts_with(|c: char| c.is_alphanumeric());
            if !at_boundary {
                continue;
            }
            let remainder: String = trimmed.chars().skip(aff.chars().count()).collect();
            return Some(
                remainder
                    .trim_start_matches(|c: char| !c.is_alphanumeric())
                    .to_string(),
            );
        }
    }

    None
}
