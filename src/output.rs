//! Normalization of raw process output before it reaches a language model.
//!
//! Head/tail truncation, binary sniffing, ANSI stripping and parsing of
//! `path:line:content` search output.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Default character budget for a single output stream.
pub const DEFAULT_MAX_CHARS: usize = 100_000;

/// How many leading bytes are inspected when sniffing for binary content.
pub const BINARY_SNIFF_BYTES: usize = 8 * 1024;

/// Share of the budget kept from the start of the text.
const HEAD_RATIO: f64 = 0.2;

/// Text after truncation, and whether anything was cut.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncated {
    /// Possibly shortened text
    pub text: String,
    /// Whether anything was cut
    pub truncated: bool,
}

/// Keep the head and tail of `text` so it fits `max_chars`.
///
/// The head is `round(max_chars * 0.2)` characters, the tail is the rest of
/// the budget. A marker in between states how much was elided.
pub fn truncate(text: &str, max_chars: usize) -> Truncated {
    let total = text.chars().count();
    if total <= max_chars {
        return Truncated {
            text: text.to_string(),
            truncated: false,
        };
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let head_len = ((max_chars as f64) * HEAD_RATIO).round() as usize;
    let tail_len = max_chars - head_len;
    let elided = total - max_chars;

    let head_end = byte_offset(text, head_len);
    let tail_start = byte_offset(text, total - tail_len);

    let mut out = String::with_capacity(head_end + (text.len() - tail_start) + 96);
    out.push_str(&text[..head_end]);
    out.push_str(&format!(
        "\n\n... [{elided} characters truncated, output limit is {max_chars} characters] ...\n\n"
    ));
    out.push_str(&text[tail_start..]);

    Truncated {
        text: out,
        truncated: true,
    }
}

fn byte_offset(text: &str, char_index: usize) -> usize {
    text.char_indices()
        .nth(char_index)
        .map_or(text.len(), |(offset, _)| offset)
}

/// True iff a NUL byte occurs in the first 8 KiB.
pub fn is_binary(bytes: &[u8]) -> bool {
    let sniff = &bytes[..bytes.len().min(BINARY_SNIFF_BYTES)];
    sniff.contains(&0)
}

fn ansi_regex() -> &'static Regex {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    ANSI.get_or_init(|| {
        // CSI sequences, OSC sequences (BEL or ST terminated), and two-byte escapes.
        Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
            .expect("ANSI pattern is a valid regex")
    })
}

/// Remove ANSI escape sequences, leaving plain text.
pub fn strip_ansi(text: &str) -> String {
    if !text.contains('\x1b') {
        return text.to_string();
    }
    ansi_regex().replace_all(text, "").into_owned()
}

/// One line of recursive search output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchMatch {
    /// File the line was found in
    pub path: String,
    /// 1-based line number
    pub line: u64,
    /// Line content without the trailing newline
    pub text: String,
    /// Surrounding line emitted by `-C`, not a hit itself.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub context: bool,
}

fn match_line_regex() -> &'static Regex {
    static MATCH_LINE: OnceLock<Regex> = OnceLock::new();
    MATCH_LINE.get_or_init(|| {
        Regex::new(r"^(.+?):(\d+):(.*)$").expect("match-line pattern is a valid regex")
    })
}

fn context_line_regex() -> &'static Regex {
    static CONTEXT_LINE: OnceLock<Regex> = OnceLock::new();
    CONTEXT_LINE.get_or_init(|| {
        Regex::new(r"^(.+?)-(\d+)-(.*)$").expect("context-line pattern is a valid regex")
    })
}

/// Parse `path:line:content` lines into structured matches.
///
/// The path is the shortest prefix followed by `:<digits>:`, so paths
/// containing colons still parse. With `with_context`, `path-line-content`
/// lines are accepted too and kept with `context = true`. A line that fits
/// both shapes is split at whichever separator comes first, since that one
/// follows the file name. Anything else, including `--` group separators,
/// is skipped.
pub fn parse_search_output(output: &str, with_context: bool) -> Vec<SearchMatch> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let hit = match_line_regex().captures(line);
            let around = if with_context {
                context_line_regex().captures(line)
            } else {
                None
            };
            let (caps, context) = match (hit, around) {
                (Some(h), Some(c)) if c[1].len() < h[1].len() => (c, true),
                (Some(h), _) => (h, false),
                (None, Some(c)) => (c, true),
                (None, None) => return None,
            };
            let line_number = caps[2].parse().ok()?;
            Some(SearchMatch {
                path: caps[1].to_string(),
                line: line_number,
                text: caps[3].to_string(),
                context,
            })
        })
        .collect()
}
