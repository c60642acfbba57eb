//! Logging utilities for link lines so logs stay single-line.
//! Escapes control characters that a noisy radio or a half-read frame can inject.

/// Longest preview written for a single link line.
pub const MAX_PREVIEW: usize = 120;

/// Escape a string for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
///   Other control characters become `\xNN`.
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 8);
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Escaped preview of a link line, cut at `max_bytes` on a char boundary.
///
/// IMG chunk lines are hundreds of hex digits; the preview keeps the header
/// readable without flooding the log.
pub fn preview(line: &str, max_bytes: usize) -> String {
    if line.len() <= max_bytes {
        return escape_log(line);
    }
    let mut cut = max_bytes;
    while cut > 0 && !line.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = escape_log(&line[..cut]);
    out.push_str("...");
    out
}

/// Upper-case hex rendering used for binary payloads on the link.
pub fn hex_upper(data: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(data.len() * 2);
    for b in data {
        let _ = write!(&mut out, "{:02X}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_newlines_and_controls() {
        let s = "TEL:1\r\n\x07";
        assert_eq!(escape_log(s), "TEL:1\\r\\n\\x07");
    }

    #[test]
    fn preview_does_not_split_multibyte() {
        // "é" is 2 bytes; a cut at 4 lands inside it
        let s = "abcé123";
        assert_eq!(preview(s, 4), "abc...");
        assert_eq!(preview("short", 10), "short");
    }

    #[test]
    fn hex_is_upper_case() {
        assert_eq!(hex_upper(&[0x00, 0xab, 0xFF]), "00ABFF");
    }
}
