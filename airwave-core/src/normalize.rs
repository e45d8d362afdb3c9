//! Normalizer (C1): deterministic string cleaning, signature hashing,
//! collaboration splitting, version-tag extraction, part-number detection.
//!
//! Every function here is pure: no I/O, no shared state. Idempotent —
//! `clean_title(clean_title(x).0) == clean_title(x)`.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0xFE20..=0xFE2F)
}

/// NFKD decomposition, strip combining marks, lowercase.
fn fold_and_lower(s: &str) -> String {
    s.nfkd().filter(|c| !is_combining_mark(*c)).collect::<String>().to_lowercase()
}

static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static EDGE_PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^[\s"'`.,;:!?\-]+|[\s"'`.,;:!?\-]+$"#).unwrap());
static MATCHED_QUOTES: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^"(.*)"$|^'(.*)'$"#).unwrap());

/// Collapse whitespace and trim surrounding punctuation/quotes. Shared by
/// `clean_title`/`clean_artist` and by per-token canonicalization in
/// `split_artists`.
fn core_clean(s: &str) -> String {
    let folded = fold_and_lower(s);
    let collapsed = MULTI_SPACE.replace_all(folded.trim(), " ").to_string();
    let unquoted = if let Some(caps) = MATCHED_QUOTES.captures(&collapsed) {
        caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str().to_string()).unwrap_or(collapsed)
    } else {
        collapsed
    };
    EDGE_PUNCT.replace_all(&unquoted, "").trim().to_string()
}

static FEAT_GROUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[\(\[]\s*(?:feat\.?|ft\.?|featuring)\s+([^)\]]+)[\)\]]").unwrap());

/// Clean a title, separating any bracketed featuring clause into a
/// "collaboration channel" returned alongside the cleaned title.
pub fn clean_title(s: &str) -> (String, Vec<String>) {
    let mut collaborators = Vec::new();
    let without_feat = FEAT_GROUP.replace_all(s, |caps: &regex::Captures| {
        collaborators.extend(split_artists(&caps[1]));
        String::new()
    });
    (core_clean(&without_feat), collaborators)
}

static ARTIST_COLLAB_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:duet|feat\.?|ft\.?|featuring|vs\.?)\b.*$").unwrap());

/// Clean an artist string, dropping a trailing collaboration suffix
/// (`duet`, `feat.`, `ft.`, `featuring`, `vs.`) at a word boundary.
pub fn clean_artist(s: &str) -> String {
    let without_suffix = ARTIST_COLLAB_SUFFIX.replace(s, "");
    core_clean(&without_suffix)
}

static NON_COMMA_SEPARATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*(?:\bduet with\b|\bduet\b|\bvs\.?\b|\band\b|\bwith\b|\bx\b|&|;|/)\s*").unwrap()
});

/// Split a comma only when it is not a thousands separator: not immediately
/// preceded by a digit, and not followed (after optional whitespace) by a
/// digit. `regex` has no lookaround, so this walks the string by hand.
fn split_comma_respecting_numerals(s: &str) -> Vec<String> {
    let chars: Vec<char> = s.chars().collect();
    let mut parts = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;
    while i < chars.len() {
        if chars[i] == ',' {
            let prev_is_digit = i > 0 && chars[i - 1].is_ascii_digit();
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            let next_is_digit = j < chars.len() && chars[j].is_ascii_digit();
            if !prev_is_digit && !next_is_digit {
                parts.push(chars[start..i].iter().collect::<String>());
                start = i + 1;
            }
        }
        i += 1;
    }
    parts.push(chars[start..].iter().collect::<String>());
    parts
}

/// Split a raw artist string into an ordered list of canonical artist
/// names, using the separator set `{" & ", " and ", " with ", " x ",
/// " vs ", " vs. ", " duet with ", " duet ", ";", "/", ","}`, with the
/// comma pattern tightened so thousands separators inside numerals (e.g.
/// `10,000 Maniacs`) do not split.
pub fn split_artists(s: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    for chunk in NON_COMMA_SEPARATOR.split(s) {
        pieces.extend(split_comma_respecting_numerals(chunk));
    }
    pieces
        .into_iter()
        .map(|p| core_clean(&p))
        .filter(|p| !p.is_empty())
        .collect()
}

const VERSION_KEYWORDS: &[&str] = &[
    "live", "remix", "mix", "edit", "version", "cut", "take", "session", "acoustic", "unplugged",
    "demo", "radio", "extended",
];

fn contains_version_keyword(content: &str) -> bool {
    let lower = content.to_lowercase();
    VERSION_KEYWORDS.iter().any(|kw| word_contains(&lower, kw))
}

fn word_contains(haystack: &str, needle: &str) -> bool {
    haystack.split(|c: char| !c.is_alphanumeric()).any(|word| word == needle)
}

static PART_NEGATIVE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(?:part|pt\.?)\s*\d+\b").unwrap());
static SUBTITLE_NEGATIVE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^the\s").unwrap());

fn is_suppressed(content: &str) -> bool {
    if PART_NEGATIVE.is_match(content) {
        return true;
    }
    let trimmed = content.trim();
    SUBTITLE_NEGATIVE.is_match(trimmed) && trimmed.split_whitespace().count() > 2
}

static PAREN_GROUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\(\[]([^)\]]+)[\)\]]").unwrap());
static DASH_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+-\s+(.+)$").unwrap());
static ALBUM_LIVE_CONTEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:live|concert|unplugged|acoustic session)\b").unwrap());
const SHORT_EDIT_KEYWORDS: &[&str] = &["edit", "mix", "version", "cut", "take"];

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extract version tags from a title, returning `(clean_title, version_type)`.
///
/// Strategies apply in order, cumulatively: parenthesized/bracketed version
/// groups, a `" - <keyword> ..."` dash suffix, album-context inference of
/// `Live`, then a looser pass over short (≤3 word) parenthetical groups.
/// Two negative patterns suppress extraction: an explicit part/pt number
/// (a distinct work, not a version) and a `"the ..."` subtitle longer than
/// two words.
pub fn extract_version(title: &str, album_title: Option<&str>) -> (String, String) {
    let mut working = title.to_string();
    let mut tags: Vec<String> = Vec::new();

    working = PAREN_GROUP
        .replace_all(&working, |caps: &regex::Captures| {
            let content = &caps[1];
            if is_suppressed(content) {
                return caps[0].to_string();
            }
            if contains_version_keyword(content) {
                tags.push(title_case(content.trim()));
                String::new()
            } else {
                caps[0].to_string()
            }
        })
        .to_string();

    if let Some(caps) = DASH_SUFFIX.captures(&working.clone()) {
        let content = caps[1].to_string();
        if !is_suppressed(&content) && contains_version_keyword(&content) {
            tags.push(title_case(content.trim()));
            working = DASH_SUFFIX.replace(&working, "").to_string();
        }
    }

    if tags.is_empty() {
        if let Some(album) = album_title {
            if ALBUM_LIVE_CONTEXT.is_match(album) {
                tags.push("Live".to_string());
            }
        }
    }

    working = PAREN_GROUP
        .replace_all(&working, |caps: &regex::Captures| {
            let content = &caps[1];
            if is_suppressed(content) {
                return caps[0].to_string();
            }
            let word_count = content.split_whitespace().count();
            let lower = content.to_lowercase();
            if word_count <= 3 && SHORT_EDIT_KEYWORDS.iter().any(|kw| word_contains(&lower, kw)) {
                tags.push(title_case(content.trim()));
                String::new()
            } else {
                caps[0].to_string()
            }
        })
        .to_string();

    let mut deduped = Vec::new();
    for tag in tags {
        if !deduped.contains(&tag) {
            deduped.push(tag);
        }
    }

    let version_type = if deduped.is_empty() { "Original".to_string() } else { deduped.join(" / ") };
    (core_clean(&working), version_type)
}

/// Kind of part-number token recognized in a title.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartKind {
    Part,
    Movement,
    Number,
    Roman,
}

static PART_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(?:part|pt\.?)\s*(\d+)\b").unwrap());
static MOVEMENT_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:movement|mvt\.?)\s*([ivx]+|\d+)\b").unwrap());
static NUMBER_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(?:no\.?|number)\s*(\d+)\b").unwrap());
static ROMAN_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b([ivx]+)\b").unwrap());

fn roman_to_u32(s: &str) -> Option<u32> {
    const ORDER: &[(char, u32)] =
        &[('i', 1), ('v', 5), ('x', 10)];
    let value_of = |c: char| ORDER.iter().find(|(ch, _)| *ch == c).map(|(_, v)| *v);
    let lower = s.to_lowercase();
    let mut total = 0i64;
    let chars: Vec<char> = lower.chars().collect();
    for idx in 0..chars.len() {
        let v = value_of(chars[idx])? as i64;
        if idx + 1 < chars.len() {
            let next = value_of(chars[idx + 1])? as i64;
            if v < next {
                total -= v;
                continue;
            }
        }
        total += v;
    }
    if (1..=10).contains(&total) {
        Some(total as u32)
    } else {
        None
    }
}

/// Extract a `(kind, n)` part-number token from a title, or `None`.
/// Standalone roman numerals are recognized only as `I`..`X`.
pub fn extract_part_number(title: &str) -> Option<(PartKind, u32)> {
    if let Some(caps) = PART_TOKEN.captures(title) {
        return caps[1].parse().ok().map(|n| (PartKind::Part, n));
    }
    if let Some(caps) = MOVEMENT_TOKEN.captures(title) {
        let raw = &caps[1];
        let n = raw.parse().ok().or_else(|| roman_to_u32(raw))?;
        return Some((PartKind::Movement, n));
    }
    if let Some(caps) = NUMBER_TOKEN.captures(title) {
        return caps[1].parse().ok().map(|n| (PartKind::Number, n));
    }
    if let Some(caps) = ROMAN_TOKEN.captures(title) {
        if let Some(n) = roman_to_u32(&caps[1]) {
            return Some((PartKind::Roman, n));
        }
    }
    None
}

/// `true` if exactly one side has a part token, or both have tokens but
/// kind-and-number differ. Used to block work-title grouping (§4.2).
pub fn parts_differ(t1: &str, t2: &str) -> bool {
    match (extract_part_number(t1), extract_part_number(t2)) {
        (Some(a), Some(b)) => a != b,
        (Some(_), None) | (None, Some(_)) => true,
        (None, None) => false,
    }
}

/// Deterministic, case-folded, accent-folded digest over the normalized
/// `(artist, title)` pair. Alias resolution of `raw_artist` happens in the
/// caller (C5/C6); this function only normalizes and hashes.
pub fn signature(raw_artist: &str, raw_title: &str) -> String {
    let artist = clean_artist(raw_artist);
    let (title, _collaborators) = clean_title(raw_title);
    let mut hasher = Sha256::new();
    hasher.update(artist.as_bytes());
    hasher.update(b"|");
    hasher.update(title.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_title_is_idempotent() {
        let once = clean_title("  The Song (Live) ").0;
        let twice = clean_title(&once).0;
        assert_eq!(once, twice);
    }

    #[test]
    fn clean_title_strips_accents_and_case() {
        assert_eq!(clean_title("Beyoncé").0, "beyonce");
    }

    #[test]
    fn clean_title_extracts_feat_clause_as_collaborators() {
        let (title, collaborators) = clean_title("Song (feat. Artist Two)");
        assert_eq!(title, "song");
        assert_eq!(collaborators, vec!["artist two".to_string()]);
    }

    #[test]
    fn clean_artist_strips_trailing_collaboration_suffix() {
        assert_eq!(clean_artist("Artist One feat. Artist Two"), "artist one");
        assert_eq!(clean_artist("Artist One vs. Artist Two"), "artist one");
    }

    #[test]
    fn split_artists_keeps_thousands_separator_intact() {
        assert_eq!(split_artists("10,000 Maniacs"), vec!["10,000 maniacs".to_string()]);
    }

    #[test]
    fn split_artists_splits_on_ampersand_and_comma() {
        assert_eq!(
            split_artists("Simon & Garfunkel, Art"),
            vec!["simon".to_string(), "garfunkel".to_string(), "art".to_string()]
        );
    }

    #[test]
    fn split_artists_handles_duet_with() {
        assert_eq!(
            split_artists("Artist One duet with Artist Two"),
            vec!["artist one".to_string(), "artist two".to_string()]
        );
    }

    #[test]
    fn extract_version_finds_parenthesized_live() {
        let (title, version) = extract_version("Song (Live at Wembley)", None);
        assert_eq!(title, "song");
        assert_eq!(version, "Live At Wembley");
    }

    #[test]
    fn extract_version_defaults_to_original() {
        let (title, version) = extract_version("Plain Song", None);
        assert_eq!(title, "plain song");
        assert_eq!(version, "Original");
    }

    #[test]
    fn extract_version_suppresses_part_number_groups() {
        let (title, version) = extract_version("Song (Part 2)", None);
        assert_eq!(title, "song (part 2)");
        assert_eq!(version, "Original");
    }

    #[test]
    fn extract_version_suppresses_long_the_subtitles() {
        let (title, version) = extract_version("Song (The Director's Extended Cut)", None);
        assert_eq!(version, "Original");
        assert_eq!(title, "song (the director's extended cut)");
    }

    #[test]
    fn extract_version_infers_live_from_album_context() {
        let (_, version) = extract_version("Song", Some("Live at the Roxy"));
        assert_eq!(version, "Live");
    }

    #[test]
    fn extract_version_dedupes_tags() {
        let (_, version) = extract_version("Song (Live) - Live", None);
        assert_eq!(version, "Live");
    }

    #[test]
    fn extract_part_number_recognizes_part_and_roman() {
        assert_eq!(extract_part_number("Song Part 2"), Some((PartKind::Part, 2)));
        assert_eq!(extract_part_number("Sonata No. 9"), Some((PartKind::Number, 9)));
        assert_eq!(extract_part_number("Symphony IV"), Some((PartKind::Roman, 4)));
        assert_eq!(extract_part_number("Plain Title"), None);
    }

    #[test]
    fn parts_differ_detects_mismatch_and_one_sided() {
        assert!(parts_differ("Song Part 1", "Song Part 2"));
        assert!(parts_differ("Song Part 1", "Song"));
        assert!(!parts_differ("Song Part 1", "Song Part 1"));
        assert!(!parts_differ("Song", "Song"));
    }

    #[test]
    fn signature_is_stable_across_case_and_accents() {
        let a = signature("Beyoncé", "Halo");
        let b = signature("beyonce", "HALO");
        assert_eq!(a, b);
    }

    #[test]
    fn signature_differs_for_different_titles() {
        assert_ne!(signature("Artist", "Title One"), signature("Artist", "Title Two"));
    }
}
