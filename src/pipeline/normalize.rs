//! Normalisation: deterministic cleanup of raw document text and of JSON
//! returned by fallback inference.
//!
//! Text layers from tax forms carry the usual artefacts: Windows line
//! endings, non-breaking spaces between a label and its amount, zero-width
//! characters from form generators, trailing padding. Inference backends
//! add their own: ```` ```json ```` fences and a sentence of prose around
//! the object. Each rule here is a pure `&str → String` pass so the
//! extractor only ever sees one canonical shape.
//!
//! ## Rule Order
//!
//! Line endings are normalised before trimming, and invisible characters are
//! removed before whitespace is collapsed so a zero-width joiner between two
//! spaces cannot keep them apart.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all text rules to a raw text layer.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF / CR → LF)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 3. Replace non-breaking and figure spaces with plain spaces
/// 4. Collapse runs of horizontal whitespace to one space
/// 5. Trim trailing whitespace per line
/// 6. Collapse 3+ consecutive blank lines down to 1
pub fn clean_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = replace_wide_spaces(&s);
    let s = collapse_horizontal_whitespace(&s);
    let s = trim_trailing_whitespace(&s);
    collapse_blank_lines(&s)
}

/// True when the text has no alphanumeric content at all: empty input,
/// whitespace, or binary/control-character garbage.
pub fn is_garbage(input: &str) -> bool {
    !input.chars().any(|c| c.is_alphanumeric())
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 3: Wide spaces ──────────────────────────────────────────────────────

fn replace_wide_spaces(input: &str) -> String {
    input.replace(['\u{00A0}', '\u{2007}', '\u{202F}', '\t'], " ")
}

// ── Rule 4: Collapse horizontal whitespace ──────────────────────────────────

static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ ]{2,}").unwrap());

fn collapse_horizontal_whitespace(input: &str) -> String {
    RE_SPACES.replace_all(input, " ").to_string()
}

// ── Rule 5: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 6: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Inference output ─────────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json|JSON)?\s*\n(.*)\n```\s*$").unwrap());

/// Strip an outer ```` ```json ```` fence (models sometimes disobey the prompt).
pub fn strip_code_fences(input: &str) -> String {
    let trimmed = input.trim();
    if let Some(caps) = RE_OUTER_FENCES.captures(trimmed) {
        caps[1].to_string()
    } else {
        trimmed.to_string()
    }
}

/// Locate the JSON object in an inference reply: the first balanced
/// `{…}` starting at the first `{`. Braces inside JSON strings do not count,
/// so prose after the object may contain braces of its own. Returns `None`
/// when the reply holds no complete object.
pub fn json_object_span(input: &str) -> Option<String> {
    let unfenced = strip_code_fences(input);
    let start = unfenced.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in unfenced[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + c.len_utf8();
                    return Some(unfenced[start..end].to_string());
                }
            }
            _ => {}
        }
    }
    None
}
