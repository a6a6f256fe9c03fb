//! Title and genre normalization.
//!
//! Providers are only trusted on exact normalized-title equality, so every
//! lookup and cache key goes through [`normalize_title`] first.

use once_cell::sync::Lazy;
use regex_lite::Regex;

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\W+").unwrap());
static GENRE_STRIP: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s&/-]").unwrap());
static GENRE_AND: Lazy<Regex> = Lazy::new(|| Regex::new(r"\sand\s|\s?[\s']n[\s']\s?").unwrap());
static SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Collapse a title to its comparison form: lower-case, " & " read as
/// "and", the German umlauts and eszett transliterated to ASCII digraphs,
/// and every remaining non-word character removed. Transliteration happens
/// before the strip so the umlauts survive it.
pub fn normalize_title(title: &str) -> String {
    let title = title.replace(" & ", " and ").to_lowercase();
    let title = title
        .replace('ä', "ae")
        .replace('ö', "oe")
        .replace('ü', "ue")
        .replace('ß', "ss");
    NON_WORD.replace_all(&title, "").into_owned()
}

/// Canonical stored form of one genre label: lower-case, "and"/"'n'"
/// collapsed to "&", words dot-joined. Labels reduce to scene-style tags
/// like "drum&bass" or "hip.hop".
pub fn normalize_genre(genre: &str) -> String {
    let genre = genre.to_lowercase();
    let genre = GENRE_STRIP.replace_all(&genre, "");
    let genre = GENRE_AND.replace_all(&genre, "&");
    let genre = SPACES.replace_all(&genre, " ");
    let genre = genre.trim().replace(' ', ".");
    genre.trim_matches('.').to_string()
}
