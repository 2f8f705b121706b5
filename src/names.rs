use std::fmt;
use std::hash::{Hash, Hasher};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::{AppError, AppResult};

pub const MAX_PLAYER_NAME_LENGTH: usize = 12;
const NBSP: char = '\u{00A0}';

static TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^>]*>").expect("markup tag pattern compiles"));

/// Removes `<col=..>`, `<img=..>` and similar markup from widget text.
pub fn strip_tags(text: &str) -> String {
    TAG_PATTERN.replace_all(text, "").into_owned()
}

pub fn normalize_name(raw: &str) -> String {
    strip_tags(raw).replace(NBSP, " ").trim().to_string()
}

pub fn validate_name(raw: &str) -> AppResult<String> {
    let name = normalize_name(raw);
    if name.is_empty() || name.chars().count() > MAX_PLAYER_NAME_LENGTH {
        return Err(AppError::InvalidName(raw.to_string()));
    }
    Ok(name)
}

fn fold(value: &str) -> String {
    value.replace(NBSP, " ").to_uppercase()
}

/// Display name compared and hashed case-insensitively, keeping the original casing for display.
#[derive(Clone, Debug)]
pub struct CaseInsensitiveKey {
    display: String,
    folded: String,
}

impl CaseInsensitiveKey {
    pub fn new(display: impl Into<String>) -> Self {
        let display = display.into();
        let folded = fold(&display);
        Self { display, folded }
    }

    pub fn as_str(&self) -> &str {
        &self.display
    }

    pub fn folded(&self) -> &str {
        &self.folded
    }
}

impl PartialEq for CaseInsensitiveKey {
    fn eq(&self, other: &Self) -> bool {
        self.folded == other.folded
    }
}

impl Eq for CaseInsensitiveKey {}

impl Hash for CaseInsensitiveKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folded.hash(state);
    }
}

impl PartialOrd for CaseInsensitiveKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CaseInsensitiveKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.folded.cmp(&other.folded)
    }
}

impl PartialEq<str> for CaseInsensitiveKey {
    fn eq(&self, other: &str) -> bool {
        self.folded == fold(other)
    }
}

impl PartialEq<&str> for CaseInsensitiveKey {
    fn eq(&self, other: &&str) -> bool {
        self == *other
    }
}

impl PartialEq<String> for CaseInsensitiveKey {
    fn eq(&self, other: &String) -> bool {
        self == other.as_str()
    }
}

impl PartialEq<CaseInsensitiveKey> for str {
    fn eq(&self, other: &CaseInsensitiveKey) -> bool {
        other == self
    }
}

impl PartialEq<CaseInsensitiveKey> for &str {
    fn eq(&self, other: &CaseInsensitiveKey) -> bool {
        other == *self
    }
}

impl PartialEq<CaseInsensitiveKey> for String {
    fn eq(&self, other: &CaseInsensitiveKey) -> bool {
        other == self.as_str()
    }
}

impl From<&str> for CaseInsensitiveKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CaseInsensitiveKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for CaseInsensitiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}
