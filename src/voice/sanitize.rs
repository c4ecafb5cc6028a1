//! Cleanup of model output before it is spoken
//!
//! Models write for screens. This strips markdown and control tags so
//! synthesis only ever sees plain sentences, and lifts the inline
//! `[EMOTION:x]`, `[SPEED:y]` and `[SILENT]` directives out as metadata.
//! Stock filler ("Sure!", "As your race engineer,") is only dropped from the
//! opening of a reply, and only when punctuation sets it apart.

use std::sync::LazyLock;

use regex::Regex;

use crate::voice::tts::Emotion;

static DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[\s*(emotion|speed|silent)\s*(?::\s*([^\]]*?)\s*)?\]").expect("valid regex")
});

/// Any other bracketed upper-case control tag, e.g. an echoed `[PROACTIVE:fuel]`
static CONTROL_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[A-Z][A-Z_]*(?::[^\]]*)?\]").expect("valid regex"));

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*```[^\n]*$").expect("valid regex"));

static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!?\[([^\]]*)\]\([^)]*\)").expect("valid regex"));

static HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s{0,3}#{1,6}\s+").expect("valid regex"));

static BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:[-*+•]|\d+[.)])\s+").expect("valid regex"));

static BLOCKQUOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*>\s?").expect("valid regex"));

static EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*{1,3}|_{2,3}|~~|`").expect("valid regex"));

static PREAMBLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:sure thing|sure|certainly|of course|absolutely|great question|good question|as your race engineer|as an ai(?: language model)?|okay so|alright so)\s*[,!.:;\-–—]+\s*",
    )
    .expect("valid regex")
});

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Common function words of the language the model drifts into
const OFF_TARGET_WORDS: &[&str] = &[
    "el", "la", "los", "las", "de", "del", "que", "y", "en", "un", "una", "es", "por", "con",
    "para", "al", "lo", "se", "su", "pero", "muy", "está", "estás", "tu", "más", "sí", "vuelta",
    "ahora", "tienes", "hay",
];

/// Share of off-target tokens above which output is flagged
const WRONG_LANGUAGE_RATIO: f64 = 0.3;

/// Texts shorter than this are too small to judge
const WRONG_LANGUAGE_MIN_TOKENS: usize = 4;

/// Synthesis metadata carried inline by the model
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Directives {
    pub emotion: Option<Emotion>,
    pub speed: Option<f32>,
    /// The model chose not to say anything
    pub silent: bool,
}

impl Directives {
    /// Overlay directives found later in the same reply
    pub fn merge(&mut self, other: &Self) {
        if other.emotion.is_some() {
            self.emotion = other.emotion;
        }
        if other.speed.is_some() {
            self.speed = other.speed;
        }
        self.silent |= other.silent;
    }
}

/// Speakable text plus the directives stripped from it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sanitized {
    pub text: String,
    pub directives: Directives,
}

/// Strip formatting and control tags from model output
#[must_use]
pub fn sanitize(raw: &str) -> Sanitized {
    clean(raw, false)
}

/// Like [`sanitize`], for text that opens a reply; also drops filler openers
#[must_use]
pub fn sanitize_opening(raw: &str) -> Sanitized {
    clean(raw, true)
}

fn clean(raw: &str, opening: bool) -> Sanitized {
    let mut directives = Directives::default();
    for caps in DIRECTIVE.captures_iter(raw) {
        let kind = caps[1].to_ascii_lowercase();
        let value = caps.get(2).map_or("", |m| m.as_str());
        match kind.as_str() {
            "emotion" => match value.parse::<Emotion>() {
                Ok(emotion) => directives.emotion = Some(emotion),
                Err(_) => tracing::debug!(value, "ignoring unknown emotion directive"),
            },
            "speed" => match value.parse::<f32>() {
                Ok(speed) if speed.is_finite() => directives.speed = Some(speed),
                _ => tracing::debug!(value, "ignoring malformed speed directive"),
            },
            _ => directives.silent = true,
        }
    }

    let text = DIRECTIVE.replace_all(raw, " ");
    let text = CONTROL_TAG.replace_all(&text, " ");
    let text = CODE_FENCE.replace_all(&text, " ");
    let text = LINK.replace_all(&text, "$1");
    let text = HEADER.replace_all(&text, "");
    let text = BULLET.replace_all(&text, "");
    let text = BLOCKQUOTE.replace_all(&text, "");
    let text = EMPHASIS.replace_all(&text, "");
    let text = normalize_quotes(&text);
    let text = WHITESPACE.replace_all(&text, " ");
    let text = if opening {
        strip_preamble(text.trim())
    } else {
        text.trim().to_string()
    };

    Sanitized {
        text: ensure_terminal_punctuation(&text),
        directives,
    }
}

/// Whether the reply looks like it drifted out of the target language
#[must_use]
pub fn is_likely_wrong_language(text: &str) -> bool {
    let tokens: Vec<String> = text
        .split(|c: char| !c.is_alphabetic())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect();

    if tokens.len() < WRONG_LANGUAGE_MIN_TOKENS {
        return false;
    }

    let hits = tokens
        .iter()
        .filter(|t| OFF_TARGET_WORDS.contains(&t.as_str()))
        .count();

    #[allow(clippy::cast_precision_loss)]
    let ratio = hits as f64 / tokens.len() as f64;
    ratio > WRONG_LANGUAGE_RATIO
}

fn normalize_quotes(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{00AB}' | '\u{00BB}' => '"',
            '\u{2018}' | '\u{2019}' | '\u{201A}' => '\'',
            other => other,
        })
        .collect()
}

fn strip_preamble(text: &str) -> String {
    let stripped = PREAMBLE.replace(text, "");
    // A reply that is nothing but "Certainly." is kept as is
    if stripped.len() == text.len() || stripped.is_empty() {
        return text.to_string();
    }

    let mut chars = stripped.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

fn ensure_terminal_punctuation(text: &str) -> String {
    let trimmed = text.trim_end_matches([',', ';', ':', '-', ' ']);
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.ends_with(['.', '!', '?', '…', '"', '\'']) {
        return trimmed.to_string();
    }
    format!("{trimmed}.")
}
