//! ASCII <-> ROM font byte tables (component F).
//!
//! The native engine's font is not ASCII: digits, letters, and
//! punctuation all sit at their own fixed offsets. `encode`/`decode` are
//! the only entry points; everything else here is table plumbing.

/// Terminates an encoded string; bytes at or after this are never drawn.
pub const END_OF_STRING: u8 = 0xFF;
/// A literal newline within a text box.
pub const NEWLINE: u8 = 0xFE;

fn punctuation_code(c: char) -> Option<u8> {
    match c {
        '!' => Some(0xAB),
        '?' => Some(0xAC),
        '.' => Some(0xAD),
        ',' => Some(0xAF),
        '-' => Some(0xB0),
        '\'' => Some(0xB1),
        ':' => Some(0xB2),
        ';' => Some(0xB3),
        _ => None,
    }
}

fn punctuation_char(b: u8) -> Option<char> {
    match b {
        0xAB => Some('!'),
        0xAC => Some('?'),
        0xAD => Some('.'),
        0xAF => Some(','),
        0xB0 => Some('-'),
        0xB1 => Some('\''),
        0xB2 => Some(':'),
        0xB3 => Some(';'),
        _ => None,
    }
}

/// Encodes one character; unknown characters map to `0x00` (space), per
/// §4.F.
fn encode_char(c: char) -> u8 {
    match c {
        ' ' => 0x00,
        '0'..='9' => 0xA1 + (c as u8 - b'0'),
        'A'..='Z' => 0xBB + (c as u8 - b'A'),
        'a'..='z' => 0xD5 + (c as u8 - b'a'),
        '\n' => NEWLINE,
        other => punctuation_code(other).unwrap_or(0x00),
    }
}

fn decode_byte(b: u8) -> Option<char> {
    match b {
        0x00 => Some(' '),
        0xA1..=0xAA => Some((b'0' + (b - 0xA1)) as char),
        0xBB..=0xD4 => Some((b'A' + (b - 0xBB)) as char),
        0xD5..=0xEE => Some((b'a' + (b - 0xD5)) as char),
        NEWLINE => Some('\n'),
        b if punctuation_char(b).is_some() => punctuation_char(b),
        _ => None,
    }
}

/// Encodes `s` into ROM font bytes, appending the `0xFF` terminator.
pub fn encode(s: &str) -> Vec<u8> {
    let mut out: Vec<u8> = s.chars().map(encode_char).collect();
    out.push(END_OF_STRING);
    out
}

/// Decodes ROM font bytes back to a `String`, stopping at the first
/// `0xFF` (or the end of `bytes`, whichever comes first).
pub fn decode(bytes: &[u8]) -> String {
    let mut s = String::new();
    for &b in bytes {
        if b == END_OF_STRING {
            break;
        }
        if let Some(c) = decode_byte(b) {
            s.push(c);
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_printable_ascii_subset() {
        let sample = "Hello, World! Run & Bun 123";
        // '&' isn't in the font table and encodes to space; strip it from
        // the expected string to state the round-trip law precisely.
        let sample_in_table = "Hello, World! Run  Bun 123";
        let encoded = encode(sample);
        assert_eq!(decode(&encoded), sample_in_table);
    }

    #[test]
    fn unknown_character_encodes_to_space() {
        assert_eq!(encode_char('&'), 0x00);
        assert_eq!(encode_char('@'), 0x00);
    }

    #[test]
    fn decode_stops_at_terminator() {
        let mut bytes = encode("AB");
        bytes.push(encode_char('C'));
        assert_eq!(decode(&bytes), "AB");
    }

    #[test]
    fn digit_and_letter_ranges_match_spec_offsets() {
        assert_eq!(encode_char('0'), 0xA1);
        assert_eq!(encode_char('9'), 0xAA);
        assert_eq!(encode_char('A'), 0xBB);
        assert_eq!(encode_char('Z'), 0xD4);
        assert_eq!(encode_char('a'), 0xD5);
        assert_eq!(encode_char('z'), 0xEE);
    }
}
