//! Text segmentation for incremental speech synthesis.
//!
//! Converts an accumulated streaming reply into speakable chunks. All
//! lengths are counted in code points, not bytes, so East-Asian text and
//! Latin text obey the same bounds. Splitting is lossless: concatenating
//! every returned chunk (finals plus remainder) reproduces the cleaned
//! input exactly.

/// Sentence-final punctuation, East-Asian and Latin variants. A chunk
/// ending on one of these is speakable as-is.
const TERMINAL_MARKS: &[char] = &['。', '．', '！', '？', '.', '!', '?', '\n'];

/// Secondary punctuation used when a single clause exceeds the maximum
/// chunk length.
const SECONDARY_MARKS: &[char] = &['，', '、', '：', '；', ',', ';', ':'];

/// Length thresholds for the segmenter, in code points.
#[derive(Debug, Clone, Copy)]
pub struct SegmentRules {
    /// Below this length the buffer is not worth segmenting yet.
    pub min_chars: usize,
    /// No produced chunk ever exceeds this length.
    pub max_chars: usize,
}

impl Default for SegmentRules {
    fn default() -> Self {
        Self {
            min_chars: 15,
            max_chars: 50,
        }
    }
}

/// Result of one segmentation run over the rolling buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRun {
    /// Complete chunks, ready for synthesis in order.
    pub finals: Vec<String>,
    /// Trailing, possibly incomplete chunk. The caller decides whether it
    /// is flush-worthy (terminal punctuation, emotion change, stream end).
    pub remainder: String,
}

/// Remove literal placeholder artifacts ("undefined" leaking from the
/// upstream template) before any length accounting.
#[must_use]
pub fn strip_placeholder_artifacts(text: &str) -> String {
    text.replace("undefined", "")
}

/// Remove bracketed stage directions such as `[smiles]` before
/// synthesis. They are display-only and must never be spoken. An
/// unclosed bracket is kept verbatim.
#[must_use]
pub fn strip_stage_directions(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        match rest[open..].find(']') {
            Some(close) => {
                out.push_str(&rest[..open]);
                rest = &rest[open + close + 1..];
            }
            None => break,
        }
    }
    out.push_str(rest);
    out
}

/// True if the text ends on sentence-final punctuation.
#[must_use]
pub fn ends_with_terminal(text: &str) -> bool {
    text.chars()
        .next_back()
        .is_some_and(|c| TERMINAL_MARKS.contains(&c))
}

/// Split `text` into ordered chunks of at most `max_chars` code points.
///
/// Clauses are cut after sentence-final punctuation (mark kept attached),
/// then greedily packed back together up to `max_chars`. A single clause
/// longer than `max_chars` is re-split on secondary punctuation; anything
/// still too long is cut at fixed boundaries so segmentation can never
/// stall forward progress.
#[must_use]
pub fn split_speakable(text: &str, max_chars: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    if char_len(text) <= max_chars {
        return vec![text.to_owned()];
    }

    let mut out: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    let mut push_current = |current: &mut String, current_len: &mut usize, out: &mut Vec<String>| {
        if !current.is_empty() {
            out.push(std::mem::take(current));
            *current_len = 0;
        }
    };

    for clause in split_after_marks(text, TERMINAL_MARKS) {
        let clause_len = char_len(clause);

        if current_len + clause_len <= max_chars {
            current.push_str(clause);
            current_len += clause_len;
            continue;
        }

        push_current(&mut current, &mut current_len, &mut out);

        if clause_len <= max_chars {
            current.push_str(clause);
            current_len = clause_len;
            continue;
        }

        // Oversize clause: try secondary punctuation, then hard cuts.
        for sub in split_after_marks(clause, SECONDARY_MARKS) {
            let sub_len = char_len(sub);
            if sub_len <= max_chars {
                if current_len + sub_len > max_chars {
                    push_current(&mut current, &mut current_len, &mut out);
                }
                current.push_str(sub);
                current_len += sub_len;
            } else {
                push_current(&mut current, &mut current_len, &mut out);
                let mut pieces = hard_cut(sub, max_chars);
                if let Some(last) = pieces.pop() {
                    out.extend(pieces);
                    current_len = char_len(&last);
                    current = last;
                }
            }
        }
    }

    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Segment the rolling buffer: strip artifacts, split, and separate the
/// trailing chunk as the remainder.
#[must_use]
pub fn segment_buffer(buffer: &str, rules: &SegmentRules) -> SegmentRun {
    let cleaned = strip_placeholder_artifacts(buffer);
    let mut parts = split_speakable(&cleaned, rules.max_chars);
    let remainder = parts.pop().unwrap_or_default();
    SegmentRun {
        finals: parts,
        remainder,
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Split `text` after every occurrence of a mark, keeping the mark
/// attached to the preceding slice. Lossless by construction.
fn split_after_marks<'a>(text: &'a str, marks: &[char]) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut start = 0usize;
    for (i, c) in text.char_indices() {
        if marks.contains(&c) {
            let end = i + c.len_utf8();
            parts.push(&text[start..end]);
            start = end;
        }
    }
    if start < text.len() {
        parts.push(&text[start..]);
    }
    parts
}

/// Cut at fixed `max_chars` boundaries. The lossy fallback for text with
/// no usable punctuation.
fn hard_cut(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut piece = String::new();
    let mut len = 0usize;
    for c in text.chars() {
        piece.push(c);
        len += 1;
        if len == max_chars {
            pieces.push(std::mem::take(&mut piece));
            len = 0;
        }
    }
    if !piece.is_empty() {
        pieces.push(piece);
    }
    pieces
}
