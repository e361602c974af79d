//! Utterance chunker -- shapes a token stream into speakable chunks.
//!
//! Tokens are accumulated until a sentence terminal (`.` `!` `?` or a line
//! break) is seen, then everything up to and including the terminal run is
//! emitted as one chunk. Two escape hatches keep long unpunctuated spans from
//! stalling the voice: a grace-timer flush once the buffer passes a minimum
//! length (the timer itself is owned by the session worker, which calls
//! [`UtteranceChunker::flush_stale`]), and a hard flush when the buffer grows
//! past its cap. [`UtteranceChunker::finish`] drains whatever remains at
//! stream end.
//!
//! Invariant: concatenating every emitted chunk, in order, reproduces the
//! pushed text exactly -- nothing is trimmed, lost, or duplicated -- and no
//! chunk boundary ever lands inside a run of sentence-ending punctuation.

use voxrelay_types::config::ChunkerConfig;

/// Characters that end a speakable sentence.
const SENTENCE_TERMINALS: [char; 4] = ['.', '!', '?', '\n'];

fn is_terminal(c: char) -> bool {
    SENTENCE_TERMINALS.contains(&c)
}

/// Accumulates streamed tokens and emits sentence-aligned chunks.
#[derive(Debug)]
pub struct UtteranceChunker {
    min_flush_chars: usize,
    max_buffer_chars: usize,
    buf: String,
}

impl UtteranceChunker {
    pub fn new(config: &ChunkerConfig) -> Self {
        Self {
            min_flush_chars: config.min_flush_chars,
            max_buffer_chars: config.max_buffer_chars,
            buf: String::new(),
        }
    }

    /// Feed one token; returns the chunks it completed (possibly none).
    pub fn push(&mut self, token: &str) -> Vec<String> {
        self.buf.push_str(token);
        let mut out = Vec::new();
        while let Some(end) = boundary_end(&self.buf) {
            out.push(self.buf.drain(..end).collect());
        }
        if self.buf.len() >= self.max_buffer_chars {
            out.push(std::mem::take(&mut self.buf));
        }
        out
    }

    /// Grace-timer flush: emit the buffer if it is long enough to be worth
    /// speaking without a terminal. Called by the worker when the grace
    /// period elapses with no emission.
    pub fn flush_stale(&mut self) -> Option<String> {
        if self.buf.len() >= self.min_flush_chars {
            Some(std::mem::take(&mut self.buf))
        } else {
            None
        }
    }

    /// Stream end: emit whatever remains.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buf))
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.buf.is_empty()
    }
}

/// Byte index just past the first complete sentence-terminal run, if any.
///
/// A run that touches the end of the buffer is not a boundary yet -- the next
/// token may extend it (e.g. `"..."` arriving one dot at a time), and cutting
/// there would split inside the punctuation.
fn boundary_end(buf: &str) -> Option<usize> {
    let mut iter = buf.char_indices().peekable();
    while let Some((i, c)) = iter.next() {
        if !is_terminal(c) {
            continue;
        }
        let mut end = i + c.len_utf8();
        while let Some(&(j, d)) = iter.peek() {
            if is_terminal(d) {
                end = j + d.len_utf8();
                iter.next();
            } else {
                break;
            }
        }
        if end == buf.len() {
            return None;
        }
        return Some(end);
    }
    None
}
