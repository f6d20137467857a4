//! Inline narration markers.
//!
//! Narration text carries word-anchored sync points:
//! - `{#id}` binds to the **start** of the word that follows it
//! - `{id#}` binds to the **end** of the word that precedes it
//!
//! where `id` matches `[a-zA-Z0-9_-]+`. Anything else in braces is literal
//! text. Parsing yields the marker-free "clean" text sent to the
//! forced-alignment service together with a word index per marker.

use serde::{Deserialize, Serialize};

/// Which edge of the anchored word a marker binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Anchor {
    Start,
    End,
}

/// A marker anchored to a word of its segment's clean text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    pub id: String,
    pub anchor: Anchor,
    /// Index into the clean text's words. An end marker placed before any
    /// word yields `-1`, which never resolves.
    pub word_index: i64,
}

impl Marker {
    pub fn start(id: impl Into<String>, word_index: i64) -> Self {
        Self {
            id: id.into(),
            anchor: Anchor::Start,
            word_index,
        }
    }

    pub fn end(id: impl Into<String>, word_index: i64) -> Self {
        Self {
            id: id.into(),
            anchor: Anchor::End,
            word_index,
        }
    }
}

/// Raw location of a marker in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerOccurrence {
    /// Byte offset of the opening brace.
    pub index: usize,
    /// Byte length of the whole `{...}` marker.
    pub len: usize,
    pub id: String,
    pub anchor: Anchor,
}

impl MarkerOccurrence {
    fn end_offset(&self) -> usize {
        self.index + self.len
    }
}

/// Token stream of a narration text, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NarrationToken {
    Word(String),
    Marker(Marker),
}

/// Result of parsing one narration text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedNarration {
    /// Text with markers removed and whitespace normalized.
    pub clean_text: String,
    /// Markers in source order.
    pub markers: Vec<Marker>,
}

impl ParsedNarration {
    /// Number of words the alignment service will see.
    pub fn word_count(&self) -> usize {
        self.clean_text.split_whitespace().count()
    }

    pub fn marker(&self, id: &str) -> Option<&Marker> {
        self.markers.iter().find(|m| m.id == id)
    }
}

/// Parse markers out of narration text.
pub fn parse_markers(text: &str) -> ParsedNarration {
    let markers = tokenize(text)
        .into_iter()
        .filter_map(|token| match token {
            NarrationToken::Marker(marker) => Some(marker),
            NarrationToken::Word(_) => None,
        })
        .collect();

    ParsedNarration {
        clean_text: strip_markers(text),
        markers,
    }
}

/// Remove all marker syntax, collapse whitespace runs left behind and trim.
///
/// Only runs of two or more whitespace characters are collapsed; a lone
/// newline or tab is kept as-is.
pub fn strip_markers(text: &str) -> String {
    let mut without = String::with_capacity(text.len());
    let mut cursor = 0;
    for occurrence in find_markers(text) {
        without.push_str(&text[cursor..occurrence.index]);
        cursor = occurrence.end_offset();
    }
    without.push_str(&text[cursor..]);

    collapse_whitespace_runs(&without).trim().to_string()
}

/// Split narration text into word and marker tokens.
///
/// Words are maximal whitespace-free runs of the marker-free text, so a
/// marker glued inside a word (`foo{#m}bar`) does not split it. The word
/// index of a start marker is the number of words begun so far (the next
/// word); an end marker takes that count minus one (the word just seen).
pub fn tokenize(text: &str) -> Vec<NarrationToken> {
    let occurrences = find_markers(text);
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut words_seen: i64 = 0;
    let mut cursor = 0;

    for (k, occurrence) in occurrences.iter().enumerate() {
        push_text(
            &text[cursor..occurrence.index],
            &mut current,
            &mut tokens,
            &mut words_seen,
        );

        if !current.is_empty() && !word_continues_after(text, &occurrences, k) {
            tokens.push(NarrationToken::Word(std::mem::take(&mut current)));
        }

        let word_index = match occurrence.anchor {
            Anchor::Start => words_seen,
            Anchor::End => words_seen - 1,
        };
        tokens.push(NarrationToken::Marker(Marker {
            id: occurrence.id.clone(),
            anchor: occurrence.anchor,
            word_index,
        }));
        cursor = occurrence.end_offset();
    }

    push_text(&text[cursor..], &mut current, &mut tokens, &mut words_seen);
    if !current.is_empty() {
        tokens.push(NarrationToken::Word(current));
    }

    tokens
}

fn push_text(
    piece: &str,
    current: &mut String,
    tokens: &mut Vec<NarrationToken>,
    words_seen: &mut i64,
) {
    for ch in piece.chars() {
        if ch.is_whitespace() {
            if !current.is_empty() {
                tokens.push(NarrationToken::Word(std::mem::take(current)));
            }
        } else {
            if current.is_empty() {
                *words_seen += 1;
            }
            current.push(ch);
        }
    }
}

/// Locate every marker in `text`, sorted by position.
pub fn find_markers(text: &str) -> Vec<MarkerOccurrence> {
    let bytes = text.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(occurrence) = match_marker_at(text, i) {
                i = occurrence.end_offset();
                found.push(occurrence);
                continue;
            }
        }
        i += 1;
    }
    found
}

fn is_id_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

fn match_marker_at(text: &str, open: usize) -> Option<MarkerOccurrence> {
    let rest = &text.as_bytes()[open + 1..];
    let (anchor, id_offset, closing): (Anchor, usize, &[u8]) = if rest.first() == Some(&b'#') {
        (Anchor::Start, 1, &b"}"[..])
    } else {
        (Anchor::End, 0, &b"#}"[..])
    };

    let id_len = rest[id_offset..]
        .iter()
        .take_while(|b| is_id_byte(**b))
        .count();
    if id_len == 0 || !rest[id_offset + id_len..].starts_with(closing) {
        return None;
    }

    let id_start = open + 1 + id_offset;
    Some(MarkerOccurrence {
        index: open,
        len: 1 + id_offset + id_len + closing.len(),
        id: text[id_start..id_start + id_len].to_string(),
        anchor,
    })
}

/// Whether the first visible character after marker `k` (skipping directly
/// adjacent markers) continues the current word.
fn word_continues_after(text: &str, occurrences: &[MarkerOccurrence], k: usize) -> bool {
    let mut pos = occurrences[k].end_offset();
    for next in &occurrences[k + 1..] {
        if next.index != pos {
            break;
        }
        pos = next.end_offset();
    }
    text[pos..]
        .chars()
        .next()
        .is_some_and(|ch| !ch.is_whitespace())
}

fn collapse_whitespace_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run = String::new();
    for ch in text.chars() {
        if ch.is_whitespace() {
            run.push(ch);
            continue;
        }
        flush_run(&mut out, &mut run);
        out.push(ch);
    }
    flush_run(&mut out, &mut run);
    out
}

fn flush_run(out: &mut String, run: &mut String) {
    if run.chars().count() >= 2 {
        out.push(' ');
    } else {
        out.push_str(run);
    }
    run.clear();
}
