//! Incremental UTF-8 decoding for terminal output.
//!
//! Remote reads split the byte stream at arbitrary offsets, which can cut a
//! multi-byte character in half. The chunker holds back an incomplete trailing
//! sequence until the next read completes it.

/// Converts arbitrary byte chunks into text without corrupting characters
/// that straddle chunk boundaries.
#[derive(Debug, Default)]
pub struct Utf8Chunker {
    pending: Vec<u8>,
}

impl Utf8Chunker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `chunk`, returning all complete text. Invalid sequences become
    /// U+FFFD; an incomplete tail is kept for the next call.
    pub fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        self.pending = rest.to_vec();
        out
    }

    /// Flush whatever is left at end of stream.
    pub fn finish(&mut self) -> String {
        let tail = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&tail).into_owned()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passthrough() {
        let mut chunker = Utf8Chunker::new();
        assert_eq!(chunker.push(b"$ ls\n"), "$ ls\n");
        assert!(!chunker.has_pending());
    }

    #[test]
    fn test_split_multibyte_character() {
        let bytes = "héllo ❯".as_bytes();
        let mut chunker = Utf8Chunker::new();
        let mut out = String::new();
        for byte in bytes {
            out.push_str(&chunker.push(std::slice::from_ref(byte)));
        }
        assert_eq!(out, "héllo ❯");
        assert!(!chunker.has_pending());
    }

    #[test]
    fn test_invalid_bytes_are_replaced() {
        let mut chunker = Utf8Chunker::new();
        assert_eq!(chunker.push(b"a\xffb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_finish_flushes_truncated_tail() {
        let mut chunker = Utf8Chunker::new();
        assert_eq!(chunker.push(&[b'x', 0xe2, 0x9d]), "x");
        assert!(chunker.has_pending());
        assert_eq!(chunker.finish(), "\u{FFFD}");
        assert!(!chunker.has_pending());
    }
}
