// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Incremental reasoning-tag splitter.
//!
//! Converts an arbitrary-boundary chunk stream into semantic deltas that
//! distinguish reasoning content (between `<think>` and `</think>`) from
//! plain content.  Tags may straddle chunk boundaries in both directions;
//! the splitter withholds trailing bytes that form a tag prefix, so no
//! emitted delta ever contains a partial tag.  Its output is invariant
//! under rechunking of the same logical input.

use serde_json::Value;

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// An inline control event travelling with the token stream.  The
/// splitter passes these through verbatim, ordered with respect to the
/// surrounding deltas.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlEvent {
    pub kind: String,
    pub payload: Value,
}

impl ControlEvent {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// Input to the splitter.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Chunk(String),
    Event(ControlEvent),
}

/// Output of the splitter.
#[derive(Debug, Clone, PartialEq)]
pub enum SplitItem {
    PlainDelta(String),
    ThinkDelta(String),
    /// Emitted exactly once per closed think block, immediately after the
    /// delta that closes it — or at stream end if still inside a block.
    ThinkComplete,
    Event(ControlEvent),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    /// First bytes not yet classified (relevant for injection mode)
    Undecided,
    InPlain,
    InThink,
}

pub struct TagSplitter {
    state: State,
    buf: String,
    /// When set, a stream that does not open with `<think>` is treated as
    /// starting inside a think block (for models whose template pre-fills
    /// the opening tag).
    inject_think_if_missing: bool,
}

impl TagSplitter {
    pub fn new(inject_think_if_missing: bool) -> Self {
        Self {
            state: State::Undecided,
            buf: String::new(),
            inject_think_if_missing,
        }
    }

    /// Feed one item, returning the split items it releases.
    pub fn push(&mut self, item: StreamItem) -> Vec<SplitItem> {
        match item {
            StreamItem::Event(ev) => vec![SplitItem::Event(ev)],
            StreamItem::Chunk(text) => {
                self.buf.push_str(&text);
                self.process()
            }
        }
    }

    /// Signal end of stream.  Flushes buffered non-prefix bytes and closes
    /// a dangling think block.
    pub fn finish(&mut self) -> Vec<SplitItem> {
        let mut out = Vec::new();
        let safe = self.safe_len();
        let remainder = std::mem::take(&mut self.buf);
        let flush = &remainder[..safe];

        match self.state {
            State::Undecided => {
                // Either nothing ever arrived, or (in injection mode) the
                // whole stream was an unresolved tag prefix: nothing to emit.
            }
            State::InPlain => {
                if !flush.is_empty() {
                    out.push(SplitItem::PlainDelta(flush.to_string()));
                }
            }
            State::InThink => {
                if !flush.is_empty() {
                    out.push(SplitItem::ThinkDelta(flush.to_string()));
                }
                out.push(SplitItem::ThinkComplete);
            }
        }
        self.state = State::InPlain;
        out
    }

    fn process(&mut self) -> Vec<SplitItem> {
        let mut out = Vec::new();
        loop {
            match self.state {
                State::Undecided => {
                    if !self.inject_think_if_missing {
                        self.state = State::InPlain;
                        continue;
                    }
                    if self.buf.starts_with(THINK_OPEN) {
                        // The model emitted the opening tag after all.
                        self.buf.drain(..THINK_OPEN.len());
                        self.state = State::InThink;
                        continue;
                    }
                    if THINK_OPEN.starts_with(self.buf.as_str()) {
                        // Bounded look-ahead: could still become `<think>`.
                        break;
                    }
                    // Diverged from the opening tag: the stream began inside
                    // the (implicit) think block.
                    self.state = State::InThink;
                }
                State::InPlain => {
                    if let Some(i) = self.buf.find(THINK_OPEN) {
                        if i > 0 {
                            out.push(SplitItem::PlainDelta(self.buf[..i].to_string()));
                        }
                        self.buf.drain(..i + THINK_OPEN.len());
                        self.state = State::InThink;
                        continue;
                    }
                    let safe = self.safe_len();
                    if safe > 0 {
                        out.push(SplitItem::PlainDelta(self.buf[..safe].to_string()));
                        self.buf.drain(..safe);
                    }
                    break;
                }
                State::InThink => {
                    if let Some(i) = self.buf.find(THINK_CLOSE) {
                        if i > 0 {
                            out.push(SplitItem::ThinkDelta(self.buf[..i].to_string()));
                        }
                        out.push(SplitItem::ThinkComplete);
                        self.buf.drain(..i + THINK_CLOSE.len());
                        self.state = State::InPlain;
                        continue;
                    }
                    let safe = self.safe_len();
                    if safe > 0 {
                        out.push(SplitItem::ThinkDelta(self.buf[..safe].to_string()));
                        self.buf.drain(..safe);
                    }
                    break;
                }
            }
        }
        out
    }

    /// Length of the emit-safe region: everything except a trailing run
    /// that is a proper prefix of `<think>` or `</think>`.
    fn safe_len(&self) -> usize {
        let len = self.buf.len();
        let max_k = len.min(THINK_CLOSE.len() - 1);
        for k in (1..=max_k).rev() {
            let cut = len - k;
            if !self.buf.is_char_boundary(cut) {
                continue;
            }
            let tail = &self.buf[cut..];
            if THINK_OPEN.starts_with(tail) || THINK_CLOSE.starts_with(tail) {
                return cut;
            }
        }
        len
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
