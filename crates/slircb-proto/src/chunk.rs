//! Byte-bounded text chunking at user-perceived character boundaries.
//!
//! Wire lines have a hard byte budget, but cutting UTF-8 text at an
//! arbitrary byte offset can sever a combining mark from its base, split a
//! ZWJ emoji sequence, orphan a variation selector or skin-tone modifier, or
//! break a regional-indicator flag pair in half. [`Utf8Chunker`] accumulates
//! codepoints against a byte budget and backs off to the nearest breakable
//! boundary before emitting a chunk; an unbreakable run longer than the
//! budget is emitted whole rather than deadlocking.

use unicode_general_category::{get_general_category, GeneralCategory};

/// Zero-width joiner, the glue of composed emoji sequences.
const ZWJ: char = '\u{200D}';

fn is_combining(c: char) -> bool {
    matches!(
        get_general_category(c),
        GeneralCategory::NonspacingMark
            | GeneralCategory::SpacingMark
            | GeneralCategory::EnclosingMark
    )
}

fn is_variation_selector(c: char) -> bool {
    matches!(c, '\u{FE00}'..='\u{FE0F}' | '\u{E0100}'..='\u{E01EF}')
}

fn is_skin_tone(c: char) -> bool {
    matches!(c, '\u{1F3FB}'..='\u{1F3FF}')
}

fn is_regional_indicator(c: char) -> bool {
    matches!(c, '\u{1F1E6}'..='\u{1F1FF}')
}

/// Whether the boundary between `prev` and `cp` may be cut.
///
/// The regional-indicator rule is conservative: any run of indicators is
/// kept together rather than tracking pair parity against the list of
/// assigned flags.
pub fn is_breakable(cp: char, prev: char) -> bool {
    !(is_combining(cp)
        || is_variation_selector(cp)
        || cp == ZWJ
        || prev == ZWJ
        || is_skin_tone(cp)
        || (is_regional_indicator(cp) && is_regional_indicator(prev)))
}

/// Restartable chunker over one line of text.
///
/// Call [`next_chunk`](Self::next_chunk) repeatedly; the byte budget is
/// passed per call because the caller may shrink it mid-stream (e.g. to
/// reserve room for a pagination suffix). Chunks concatenate back to the
/// input bytes exactly.
#[derive(Debug)]
pub struct Utf8Chunker {
    chars: Vec<char>,
    cp_pos: usize,
    out: Vec<u8>,
    bin_pos: usize,
    finished: bool,
}

impl Utf8Chunker {
    /// Start chunking `stream`.
    pub fn new(stream: &str) -> Self {
        Utf8Chunker {
            chars: stream.chars().collect(),
            cp_pos: 0,
            out: Vec::new(),
            bin_pos: 0,
            finished: false,
        }
    }

    /// Whether the stream is exhausted.
    pub fn finished(&self) -> bool {
        self.finished
    }

    /// Produce the next chunk of at most `budget` bytes, or `None` when the
    /// stream is exhausted. A stream of zero bytes produces no chunk. An
    /// unbreakable run longer than the budget is emitted whole, over budget,
    /// rather than deadlocking or severing the run.
    pub fn next_chunk(&mut self, budget: usize) -> Option<Vec<u8>> {
        while self.cp_pos < self.chars.len() {
            let cp = self.chars[self.cp_pos];
            let size = cp.len_utf8();
            if self.bin_pos + size > budget && !self.out.is_empty() {
                if let Some(cut) = self.seek_to_breakable(cp) {
                    let chunk = self.out[..cut].to_vec();
                    self.out.clear();
                    self.bin_pos = 0;
                    return Some(chunk);
                }
                // No breakable boundary in the buffer: the run must grow
                // past the budget until one appears or the stream ends.
            }
            let mut buf = [0u8; 4];
            self.out.extend_from_slice(cp.encode_utf8(&mut buf).as_bytes());
            self.bin_pos += size;
            self.cp_pos += 1;
        }

        self.finished = true;
        if self.out.is_empty() {
            None
        } else {
            self.bin_pos = 0;
            Some(std::mem::take(&mut self.out))
        }
    }

    /// Collect all chunks at a fixed budget.
    pub fn chunk_all(mut self, budget: usize) -> Vec<Vec<u8>> {
        let mut chunks = Vec::new();
        while !self.finished {
            match self.next_chunk(budget) {
                Some(chunk) => chunks.push(chunk),
                None => break,
            }
        }
        chunks
    }

    /// Scan backward codepoint by codepoint for a breakable boundary.
    /// On success, rewinds `cp_pos` so the suffix is re-emitted next call
    /// and returns the byte length of the prefix to keep.
    fn seek_to_breakable(&mut self, mut cp: char) -> Option<usize> {
        let mut cp_pos = self.cp_pos;
        let mut bin_pos = self.bin_pos;

        while bin_pos > 0 {
            let prev = self.chars[cp_pos - 1];
            if is_breakable(cp, prev) {
                self.cp_pos = cp_pos;
                return Some(bin_pos);
            }
            bin_pos -= prev.len_utf8();
            cp_pos -= 1;
            cp = prev;
        }

        None
    }
}

/// Split text into user-perceived characters using the same boundary rules
/// as the chunker.
pub fn split_user_chars(stream: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cluster = String::new();

    for cp in stream.chars() {
        match cluster.chars().last() {
            Some(prev) if is_breakable(cp, prev) => {
                out.push(std::mem::take(&mut cluster));
                cluster.push(cp);
            }
            _ => cluster.push(cp),
        }
    }
    if !cluster.is_empty() {
        out.push(cluster);
    }

    out
}
