use std::sync::LazyLock;

use regex::{Captures, Regex};

pub const PLACEHOLDER: char = '-';
pub const SEPARATOR: &str = " - ";
pub const FALLBACK_NAME: &str = "untitled";
pub const DEFAULT_MAX_NAME_BYTES: usize = 255;

/// Characters illegal in a path component on at least one of Windows, macOS
/// or Linux. Control characters are handled separately.
const ILLEGAL_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Longest suffix (after the last dot) still treated as a file extension.
const MAX_EXTENSION_BYTES: usize = 16;

static GAP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \-]+").expect("gap pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedName {
    pub stem: String,
    /// Includes the leading dot; empty for directories
    pub extension: String,
    pub used_fallback: bool,
}

impl SanitizedName {
    pub fn value(&self) -> String {
        format!("{}{}", self.stem, self.extension)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameSanitizer {
    pub max_name_bytes: usize,
}

impl Default for NameSanitizer {
    fn default() -> Self {
        Self {
            max_name_bytes: DEFAULT_MAX_NAME_BYTES,
        }
    }
}

impl NameSanitizer {
    pub fn new(max_name_bytes: usize) -> Self {
        Self { max_name_bytes }
    }

    /// Turn an arbitrary name into one legal path component.
    ///
    /// Illegal characters become `-`, gaps made of spaces and dashes are
    /// normalized (`"a / b"` and `"a  b"` both become `"a - b"`), dots and
    /// spaces are trimmed from the ends, reserved device names get a `_` and
    /// the result is cut to `max_name_bytes`, keeping the extension of files.
    pub fn sanitize(&self, raw: &str, is_directory: bool) -> SanitizedName {
        let (raw_stem, extension) = split_extension(raw, is_directory);
        self.build(raw_stem, extension)
    }

    /// Sanitize `raw` as the stem of a file with a fixed `extension`
    /// (given without the dot). Nothing in `raw` is taken as an extension.
    pub fn sanitize_file(&self, raw: &str, extension: &str) -> SanitizedName {
        self.build(raw, &format!(".{extension}"))
    }

    fn build(&self, raw_stem: &str, extension: &str) -> SanitizedName {
        let cleaned = clean_stem(raw_stem);
        let used_fallback = cleaned.is_empty();
        let stem = if used_fallback {
            FALLBACK_NAME
        } else {
            cleaned.as_str()
        };

        SanitizedName {
            stem: self.fit_stem(stem, "", extension),
            extension: extension.to_string(),
            used_fallback,
        }
    }

    /// Join `stem + suffix + extension`, cutting the stem so the whole name
    /// fits in `max_name_bytes`.
    pub fn fit(&self, stem: &str, suffix: &str, extension: &str) -> String {
        format!("{}{suffix}{extension}", self.fit_stem(stem, suffix, extension))
    }

    fn fit_stem(&self, stem: &str, suffix: &str, extension: &str) -> String {
        let budget = self
            .max_name_bytes
            .saturating_sub(suffix.len() + extension.len())
            .max(2);
        let cut = truncate_to_bytes(stem, budget).trim_end_matches(['.', ' ']);
        let cut = if cut.is_empty() { FALLBACK_NAME } else { cut };
        if is_reserved(cut) {
            let shorter = truncate_to_bytes(cut, budget - 1).trim_end_matches(['.', ' ']);
            format!("{shorter}_")
        } else {
            cut.to_string()
        }
    }
}

fn clean_stem(raw: &str) -> String {
    let substituted: String = raw
        .chars()
        .map(|c| {
            if c.is_control() || ILLEGAL_CHARS.contains(&c) {
                PLACEHOLDER
            } else if c.is_whitespace() {
                ' '
            } else {
                c
            }
        })
        .collect();

    let collapsed = GAP.replace_all(&substituted, |caps: &Captures| {
        let run = &caps[0];
        if run == " " {
            " "
        } else if !run.contains(' ') {
            "-"
        } else {
            SEPARATOR
        }
    });

    let mut trimmed: &str = &collapsed;
    loop {
        let next = trimmed
            .trim_matches(|c: char| c == ' ' || c == PLACEHOLDER)
            .trim_start_matches('.')
            .trim_end_matches('.');
        if next.len() == trimmed.len() {
            break;
        }
        trimmed = next;
    }
    trimmed.to_string()
}

/// Split `name` into `(stem, extension)`, the extension including its dot.
/// Only a short alphanumeric tail counts as an extension, so `"Vol. 2"`
/// keeps its dot.
fn split_extension(name: &str, is_directory: bool) -> (&str, &str) {
    if is_directory {
        return (name, "");
    }
    match name.rfind('.') {
        Some(dot)
            if dot + 1 < name.len()
                && name.len() - dot - 1 <= MAX_EXTENSION_BYTES
                && name[dot + 1..].chars().all(|c| c.is_alphanumeric()) =>
        {
            name.split_at(dot)
        }
        _ => (name, ""),
    }
}

fn is_reserved(stem: &str) -> bool {
    let device = stem.split('.').next().unwrap_or(stem).trim_end();
    RESERVED_NAMES
        .iter()
        .any(|reserved| device.eq_ignore_ascii_case(reserved))
}

fn truncate_to_bytes(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}
