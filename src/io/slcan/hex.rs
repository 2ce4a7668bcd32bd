// src/io/slcan/hex.rs
//
// Nibble <-> ASCII hex conversion for the slcan wire format.
//
// The encoder always emits uppercase digits. The decoder accepts either case and
// rejects anything that is not a hex digit.

/// Convert the low nibble of `nibble` to its uppercase ASCII hex digit.
#[inline]
pub fn nibble_to_ascii(nibble: u8) -> u8 {
    let n = nibble & 0x0F;
    if n < 0x0A {
        n + 0x30
    } else {
        n + 0x37
    }
}

/// Convert an ASCII hex digit to its 0-15 value.
#[inline]
pub fn ascii_to_nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Parse a big-endian run of hex digits (at most 8).
pub fn parse_hex_field(digits: &[u8]) -> Option<u32> {
    if digits.len() > 8 {
        return None;
    }
    digits
        .iter()
        .try_fold(0u32, |acc, &c| Some(acc * 16 + ascii_to_nibble(c)? as u32))
}

/// Append `width` hex digits of `value`, most significant nibble first.
pub fn push_hex_field(out: &mut Vec<u8>, value: u32, width: usize) {
    for shift in (0..width).rev() {
        out.push(nibble_to_ascii((value >> (shift * 4)) as u8));
    }
}

/// Append one byte as two hex digits.
#[inline]
pub fn push_hex_byte(out: &mut Vec<u8>, byte: u8) {
    out.push(nibble_to_ascii(byte >> 4));
    out.push(nibble_to_ascii(byte));
}
