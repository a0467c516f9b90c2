//! Decoder for the free-text remarks field of a filed flight plan.
//!
//! Pilots conventionally embed ICAO field-18 style items in their remarks, e.g.
//! `PBN/A1B1 DOF/240101 REG/GABCD OPR/BAW RMK/TCAS /V/`. Nothing enforces that
//! convention, so the decoder never fails: text it cannot make sense of is
//! ignored and accessors fall back to empty strings.

use once_cell::sync::Lazy;
use regex::Regex;

/// Candidate item key: a run of uppercase letters followed by a slash
static KEY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Z]+/").unwrap());

pub const MAX_REGISTRATION_LEN: usize = 10;
pub const MAX_OPERATOR_LEN: usize = 3;
pub const MAX_MODE_S_CODE_LEN: usize = 6;

/// Key/value items extracted from a remarks string.
///
/// Keys are case-sensitive and may repeat; lookups return the first occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VatsimRemarks {
    items: Vec<(String, String)>,
}

impl VatsimRemarks {
    pub fn parse(text: &str) -> Self {
        let mut items = Vec::new();
        let mut current = find_key(text, 0);

        while let Some((key, value_start)) = current {
            // A value owns at least its first character, so `OPR/BAW/CODE/` reads
            // as OPR=BAW rather than an empty OPR followed by a key called BAW.
            let search_from = text[value_start..]
                .chars()
                .next()
                .map_or(value_start, |c| value_start + c.len_utf8());
            let next = find_key(text, search_from);
            let value_end = next.as_ref().map_or(text.len(), |(next_key, _)| next_key.start);

            items.push((
                text[key.start..key.end].to_string(),
                clean_value(&text[value_start..value_end]).to_string(),
            ));
            current = next;
        }

        Self { items }
    }

    /// First value recorded for `key`, untrimmed of nothing but separators.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All values recorded for `key`, in order of appearance.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.items
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn items(&self) -> &[(String, String)] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Value of `key` if it is exactly one word of at most `max_len` characters.
    ///
    /// Words are letters, digits and hyphens. Anything else yields an empty string.
    pub fn single_word(&self, key: &str, max_len: usize) -> String {
        let Some(value) = self.get(key) else {
            return String::new();
        };
        let value = value.trim();

        let is_word = !value.is_empty()
            && value.chars().count() <= max_len
            && value.chars().all(|c| c.is_alphanumeric() || c == '-');

        if is_word {
            value.to_string()
        } else {
            String::new()
        }
    }

    pub fn registration(&self) -> String {
        self.single_word("REG", MAX_REGISTRATION_LEN)
    }

    pub fn operator_icao(&self) -> String {
        self.single_word("OPR", MAX_OPERATOR_LEN)
    }

    pub fn mode_s_code(&self) -> String {
        self.single_word("CODE", MAX_MODE_S_CODE_LEN)
    }
}

struct KeySpan {
    start: usize,
    end: usize,
}

/// Finds the next key at or after `from`. Keys must start the text or follow
/// whitespace or a slash; `G-ABCD/` does not contain a key called `ABCD`.
fn find_key(text: &str, from: usize) -> Option<(KeySpan, usize)> {
    let bytes = text.as_bytes();
    let mut search = from;

    while search < text.len() {
        let found = KEY_RE.find_at(text, search)?;
        let start = found.start();
        let at_boundary =
            start == 0 || bytes[start - 1].is_ascii_whitespace() || bytes[start - 1] == b'/';

        if at_boundary {
            let span = KeySpan {
                start,
                end: found.end() - 1,
            };
            return Some((span, found.end()));
        }
        // keys are ASCII, so the byte after a rejected start is a char boundary
        search = start + 1;
    }

    None
}

fn clean_value(raw: &str) -> &str {
    raw.trim().trim_end_matches('/').trim()
}
