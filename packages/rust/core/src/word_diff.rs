//! WordDiffer: token-level highlighting for a pair of article bodies.
//!
//! Presence-based, not a minimal edit script: a word is flagged removed when
//! it occurs nowhere in the other body, and vice versa. Moved or repeated
//! words can therefore be over- or under-highlighted. Swapping in an LCS
//! differ is the known route to exact edit scripts.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+|\S+").expect("valid regex"));

/// Classification of one token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Present on both sides.
    Same,
    /// Only in `before`.
    Removed,
    /// Only in `after`.
    Added,
    Whitespace,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffToken {
    pub text: String,
    pub kind: TokenKind,
}

/// Annotated token streams for both sides; concatenating each side's token
/// texts reproduces the original body exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WordDiff {
    pub before: Vec<DiffToken>,
    pub after: Vec<DiffToken>,
}

impl WordDiff {
    pub fn removed_count(&self) -> usize {
        self.before
            .iter()
            .filter(|t| t.kind == TokenKind::Removed)
            .count()
    }

    pub fn added_count(&self) -> usize {
        self.after
            .iter()
            .filter(|t| t.kind == TokenKind::Added)
            .count()
    }

    pub fn is_identical(&self) -> bool {
        self.removed_count() == 0 && self.added_count() == 0
    }

    /// Single-stream rendering: the `before` side with removed words as
    /// `[-word-]`, followed by the words the `after` side adds as `{+word+}`,
    /// each side keeping its own whitespace.
    pub fn render_inline(&self) -> String {
        let mut out = render_side(&self.before, TokenKind::Removed, "[-", "-]");
        if self.added_count() > 0 {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&render_side(&self.after, TokenKind::Added, "{+", "+}"));
        }
        out
    }
}

fn render_side(tokens: &[DiffToken], flagged: TokenKind, open: &str, close: &str) -> String {
    let mut out = String::new();
    for token in tokens {
        if token.kind == flagged {
            out.push_str(open);
            out.push_str(&token.text);
            out.push_str(close);
        } else {
            out.push_str(&token.text);
        }
    }
    out
}

/// Split into alternating whitespace and word tokens, preserving both.
pub fn tokenize(text: &str) -> Vec<&str> {
    TOKEN_RE.find_iter(text).map(|m| m.as_str()).collect()
}

/// Annotate `before` and `after` by word presence on the opposite side.
pub fn word_diff(before: &str, after: &str) -> WordDiff {
    let before_tokens = tokenize(before);
    let after_tokens = tokenize(after);

    let before_set: HashSet<&str> = words(&before_tokens).collect();
    let after_set: HashSet<&str> = words(&after_tokens).collect();

    WordDiff {
        before: annotate(&before_tokens, &after_set, TokenKind::Removed),
        after: annotate(&after_tokens, &before_set, TokenKind::Added),
    }
}

fn words<'a>(tokens: &[&'a str]) -> impl Iterator<Item = &'a str> {
    tokens.iter().copied().filter(|t| !is_whitespace(t))
}

fn annotate(tokens: &[&str], other: &HashSet<&str>, missing: TokenKind) -> Vec<DiffToken> {
    tokens
        .iter()
        .map(|t| {
            let kind = if is_whitespace(t) {
                TokenKind::Whitespace
            } else if other.contains(t) {
                TokenKind::Same
            } else {
                missing
            };
            DiffToken {
                text: (*t).to_string(),
                kind,
            }
        })
        .collect()
}

fn is_whitespace(token: &str) -> bool {
    token.chars().all(char::is_whitespace)
}
