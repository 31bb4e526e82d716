//! Text normalization helpers: accent folding, header slugs, month/year inference and
//! file-name cleanup.

use std::sync::OnceLock;

use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

const SLUG_MAX_WORDS: usize = 5;
const SLUG_MAX_CHARS: usize = 50;

/// Portuguese month names keyed by their accent-folded, lower-cased spelling.
const MONTHS: &[(&str, &str)] = &[
    ("janeiro", "Janeiro"),
    ("fevereiro", "Fevereiro"),
    ("marco", "Março"),
    ("abril", "Abril"),
    ("maio", "Maio"),
    ("junho", "Junho"),
    ("julho", "Julho"),
    ("agosto", "Agosto"),
    ("setembro", "Setembro"),
    ("outubro", "Outubro"),
    ("novembro", "Novembro"),
    ("dezembro", "Dezembro"),
];

/// Removes combining marks after canonical decomposition (`"Março"` becomes `"Marco"`).
pub fn fold_accents(text: &str) -> String {
    text.nfd().filter(|ch| !is_combining_mark(*ch)).collect()
}

/// Builds the short slug used in question aliases.
///
/// The slug is accent-folded, lower-cased, stripped of punctuation, limited to five words joined
/// by `_` and to fifty characters. Applying it to its own output returns the same value.
pub fn slugify(header: &str) -> String {
    let folded = fold_accents(&header.replace('\n', " ")).to_lowercase();
    let cleaned: String = folded
        .chars()
        .map(|ch| {
            if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
                ch
            } else {
                ' '
            }
        })
        .collect();

    let joined = cleaned
        .split_whitespace()
        .take(SLUG_MAX_WORDS)
        .collect::<Vec<_>>()
        .join("_");

    let truncated: String = joined.chars().take(SLUG_MAX_CHARS).collect();
    truncated.trim_end_matches('_').to_string()
}

/// Formats the alias `q<NN>_<slug>` for the question at 1-based `ordinal`.
pub fn question_alias(ordinal: usize, header: &str) -> String {
    let slug = slugify(header);
    if slug.is_empty() {
        format!("q{:02}", ordinal)
    } else {
        format!("q{:02}_{}", ordinal, slug)
    }
}

/// Extracts the ordinal `NN` from an alias built by [`question_alias`].
pub fn alias_ordinal(alias: &str) -> Option<usize> {
    let digits: String = alias
        .strip_prefix('q')?
        .chars()
        .take_while(|ch| ch.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

fn month_alternation() -> String {
    MONTHS
        .iter()
        .map(|(key, _)| *key)
        .collect::<Vec<_>>()
        .join("|")
}

fn spaced_month_year() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(&format!(r"\b({})\b\s+(\d{{4}})", month_alternation()))
            .expect("month pattern is valid")
    })
}

fn separated_month_year() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(&format!(r"({})[\W_]+(\d{{4}})", month_alternation()))
            .expect("month pattern is valid")
    })
}

/// Returns the display spelling for a month name in any case or accent form.
pub fn canonical_month(name: &str) -> Option<&'static str> {
    let key = fold_accents(name.trim()).to_lowercase();
    MONTHS
        .iter()
        .find(|(folded, _)| *folded == key)
        .map(|(_, display)| *display)
}

/// Infers `(month, year)` from a report display name such as `"Relatório Junho 2025 - Turma A"`.
///
/// Matching ignores case and accents. A month followed by whitespace and a four-digit year wins;
/// otherwise any run of separators (including `_`) between them is accepted.
pub fn infer_month_year(name: &str) -> (Option<String>, Option<String>) {
    if name.trim().is_empty() {
        return (None, None);
    }

    let folded = fold_accents(name).to_lowercase();
    let captures = spaced_month_year()
        .captures(&folded)
        .or_else(|| separated_month_year().captures(&folded));

    match captures {
        Some(caps) => {
            let month = canonical_month(&caps[1]).map(str::to_string);
            (month, Some(caps[2].to_string()))
        }
        None => (None, None),
    }
}

/// Caption printed under the submission date, e.g. `"Junho de 2025"`.
///
/// Empty when either part is missing or blank.
pub fn format_month_year(month: Option<&str>, year: Option<&str>) -> String {
    let month = month.unwrap_or("").trim();
    let year = year.unwrap_or("").trim();
    if month.is_empty() || year.is_empty() {
        String::new()
    } else {
        format!("{} de {}", month, year)
    }
}

/// Upper-cases the first letter of every word and lower-cases the rest.
///
/// A word starts after any non-alphabetic character, so `"o'neil"` becomes `"O'Neil"`.
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_alpha = false;
    for ch in text.trim().chars() {
        if ch.is_alphabetic() {
            if previous_alpha {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            previous_alpha = true;
        } else {
            out.push(ch);
            previous_alpha = false;
        }
    }
    out
}

/// Replaces characters that are invalid in file names (`<>:"/\|?*`) with `-` and trims.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|ch| match ch {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '-',
            other => other,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Drops zero-width spaces and surrounding whitespace from labels and answers.
pub fn clean_cell_text(text: &str) -> String {
    text.replace('\u{200b}', "").trim().to_string()
}
