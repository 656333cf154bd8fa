//! UTF-8 chunk decoding
//!
//! Pipe reads split multi-byte sequences at arbitrary points. The decoder
//! holds back an incomplete trailing sequence until the rest arrives.

/// Expected length of a sequence starting with `lead`
fn sequence_len(lead: u8) -> usize {
    if lead & 0xE0 == 0xC0 {
        2
    } else if lead & 0xF0 == 0xE0 {
        3
    } else if lead & 0xF8 == 0xF0 {
        4
    } else {
        1
    }
}

/// Number of bytes at the end of `bytes` that start a sequence which is not complete yet
fn incomplete_tail(bytes: &[u8]) -> usize {
    // a sequence is at most 4 bytes, so only the last 3 can be an unfinished one
    let start = bytes.len().saturating_sub(3);
    for i in (start..bytes.len()).rev() {
        let b = bytes[i];
        if b & 0xC0 == 0x80 {
            // continuation byte, keep looking for the lead
            continue;
        }
        let needed = sequence_len(b);
        let have = bytes.len() - i;
        return if needed > have { have } else { 0 };
    }
    0
}

/// Stateful lossy decoder for a byte stream
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes`, keeping an unfinished trailing sequence for the next call.
    /// Returns `None` when nothing complete is available yet.
    pub fn push(&mut self, bytes: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(bytes);
        let keep = incomplete_tail(&self.pending);
        let complete = self.pending.len() - keep;
        if complete == 0 {
            return None;
        }
        let tail = self.pending.split_off(complete);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = tail;
        Some(text)
    }

    /// Flush whatever is held back, replacing broken sequences
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(text)
    }
}
