//! Newline-delimited JSON framing over arbitrary byte streams.
//!
//! Both IPC hops speak the same framing: one JSON object per line, UTF-8,
//! LF-terminated. The decoder owns a rolling byte buffer so callers can feed
//! it chunks exactly as they arrive from the socket or pipe; fragmentation
//! anywhere (including mid-codepoint) never loses or corrupts a frame.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Incremental decoder for newline-delimited JSON frames.
///
/// Bytes are buffered until a `\n` is seen; each complete line is parsed
/// independently. Empty and whitespace-only lines are skipped. A line that
/// fails to parse is logged at debug level and dropped; decoding continues
/// with the next line. A trailing partial line stays in the buffer until
/// more bytes arrive.
#[derive(Debug, Default)]
pub struct JsonlDecoder {
    buf: Vec<u8>,
}

impl JsonlDecoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Feeds a chunk of bytes and returns every frame completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(value) = parse_line(&line[..pos]) {
                frames.push(value);
            }
        }
        frames
    }

    /// Bytes held back waiting for a terminating newline.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}

fn parse_line(raw: &[u8]) -> Option<Value> {
    let text = match std::str::from_utf8(raw) {
        Ok(t) => t.trim(),
        Err(err) => {
            debug!(target = "bdg.codec", error = %err, "dropping non-UTF-8 line");
            return None;
        }
    };

    if text.is_empty() {
        return None;
    }

    match serde_json::from_str(text) {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(target = "bdg.codec", error = %err, len = text.len(), "dropping malformed frame");
            None
        }
    }
}

/// Encodes one frame: `JSON(value) + "\n"`.
pub fn encode_frame<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_two_frames_in_one_chunk() {
        let mut decoder = JsonlDecoder::new();
        let frames = decoder.feed(b"{\"a\":1}\n{\"b\":2}\n");
        assert_eq!(frames, vec![json!({"a": 1}), json!({"b": 2})]);
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn reassembles_frames_split_at_arbitrary_byte_boundaries() {
        let payload = b"{\"a\":1}\n{\"b\":2}\n";
        for split in 0..payload.len() {
            let mut decoder = JsonlDecoder::new();
            let mut frames = decoder.feed(&payload[..split]);
            frames.extend(decoder.feed(&payload[split..]));
            assert_eq!(frames, vec![json!({"a": 1}), json!({"b": 2})], "split at {split}");
        }
    }

    #[test]
    fn survives_multibyte_utf8_bisection() {
        let message = json!({"text": "naïve — ☃"});
        let bytes = encode_frame(&message).unwrap();
        // Bisect in the middle of the snowman's three-byte sequence.
        let snowman = bytes.windows(3).position(|w| w == "☃".as_bytes()).unwrap();
        let mut decoder = JsonlDecoder::new();
        assert!(decoder.feed(&bytes[..snowman + 1]).is_empty());
        let frames = decoder.feed(&bytes[snowman + 1..]);
        assert_eq!(frames, vec![message]);
    }

    #[test]
    fn skips_empty_and_whitespace_lines() {
        let mut decoder = JsonlDecoder::new();
        let frames = decoder.feed(b"\n   \n\t\n{\"ok\":true}\n\n");
        assert_eq!(frames, vec![json!({"ok": true})]);
    }

    #[test]
    fn tolerates_crlf_endings() {
        let mut decoder = JsonlDecoder::new();
        let frames = decoder.feed(b"{\"a\":1}\r\n{\"b\":2}\r\n");
        assert_eq!(frames, vec![json!({"a": 1}), json!({"b": 2})]);
    }

    #[test]
    fn malformed_line_is_dropped_and_decoding_continues() {
        let mut decoder = JsonlDecoder::new();
        let frames = decoder.feed(b"{not json}\n{\"ok\":1}\n");
        assert_eq!(frames, vec![json!({"ok": 1})]);
    }

    #[test]
    fn partial_trailing_line_waits_for_more_input() {
        let mut decoder = JsonlDecoder::new();
        assert!(decoder.feed(b"{\"a\"").is_empty());
        assert!(decoder.pending_len() > 0);
        let frames = decoder.feed(b":1}\n");
        assert_eq!(frames, vec![json!({"a": 1})]);
    }

    #[test]
    fn encode_appends_newline() {
        let bytes = encode_frame(&json!({"x": 1})).unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));
        assert!(!bytes[..bytes.len() - 1].contains(&b'\n'));
    }
}
