use encoding_rs::UTF_8;

/// Decodes one raw serial line into forwardable text.
///
/// Invalid UTF-8 is replaced rather than rejected. Surrounding whitespace,
/// including the line terminator, is stripped. Returns `None` when nothing
/// is left to forward.
pub fn decode_line(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }

    let (text, _, malformed) = UTF_8.decode(bytes);
    if malformed {
        log::debug!("replaced malformed UTF-8 in {} byte line", bytes.len());
    }

    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Wire frame for a line: its UTF-8 bytes followed by `\n`.
pub fn encode_frame(line: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(line.len() + 1);
    frame.extend_from_slice(line.as_bytes());
    frame.push(b'\n');
    frame
}
