//! CSI sequence stripper
//!
//! Removes `ESC [ ... final` sequences from a byte stream. The recognizer is
//! deliberately loose: after `ESC [` every byte is swallowed until one in
//! `0x40..=0x7e` arrives, with no check that the bytes in between are valid
//! parameter bytes.

use super::escape::{is_csi_final, CSI_BRACKET, ESC};

/// Parse state for CSI detection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CsiState {
    /// Passing bytes through
    #[default]
    Init,
    /// Saw ESC, withheld until the next byte decides
    Escape,
    /// Inside `ESC [`, discarding until a final byte
    Csi,
}

/// Streaming CSI filter.
///
/// State survives between calls to [`CsiFilter::feed`], so a sequence split
/// across two reads is still removed.
#[derive(Debug, Default)]
pub struct CsiFilter {
    state: CsiState,
}

impl CsiFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CsiState {
        self.state
    }

    /// True while an ESC has been consumed but not yet emitted.
    pub fn pending_escape(&self) -> bool {
        self.state == CsiState::Escape
    }

    /// Filter one chunk, appending the surviving bytes to `out`.
    ///
    /// `out` grows by at most `input.len() + 1` bytes (a withheld ESC from
    /// the previous chunk plus every byte of this one).
    pub fn feed(&mut self, input: &[u8], out: &mut Vec<u8>) {
        for &byte in input {
            match self.state {
                CsiState::Init => {
                    if byte == ESC {
                        self.state = CsiState::Escape;
                    } else {
                        out.push(byte);
                    }
                }
                CsiState::Escape => {
                    if byte == CSI_BRACKET {
                        self.state = CsiState::Csi;
                    } else {
                        // Not a CSI: release the withheld ESC
                        out.push(ESC);
                        out.push(byte);
                        self.state = CsiState::Init;
                    }
                }
                CsiState::Csi => {
                    if is_csi_final(byte) {
                        self.state = CsiState::Init;
                    }
                }
            }
        }
    }

    /// Convenience wrapper returning a fresh buffer.
    #[cfg(test)]
    pub fn filter(&mut self, input: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(input.len());
        self.feed(input, &mut out);
        out
    }
}
