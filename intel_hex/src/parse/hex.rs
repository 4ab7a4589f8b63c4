use std::fmt;

const DIGITS_PER_BYTE: usize = 2;

/// Decodes pairs of ASCII hex digits into bytes.
/// The caller guarantees an even number of digits.
pub fn hex_string_to_bytes(hex_string: &[u8]) -> Result<Vec<u8>> {
    debug_assert!(
        hex_string.len() % DIGITS_PER_BYTE == 0,
        "hex string must consist of pairs of hex digits"
    );
    let mut bytes = Vec::with_capacity(hex_string.len() / DIGITS_PER_BYTE);
    for (pair_idx, hex_digit_pair) in hex_string.chunks(DIGITS_PER_BYTE).enumerate() {
        let offset = pair_idx * DIGITS_PER_BYTE;
        let high = decode_hex_digit(hex_digit_pair[0]).ok_or(InvalidHexString {
            digit: hex_digit_pair[0],
            offset,
        })?;
        let low = decode_hex_digit(hex_digit_pair[1]).ok_or(InvalidHexString {
            digit: hex_digit_pair[1],
            offset: offset + 1,
        })?;
        bytes.push(high << 4 | low);
    }
    Ok(bytes)
}

fn decode_hex_digit(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'a'..=b'f' => Some(10 + (digit - b'a')),
        b'A'..=b'F' => Some(10 + (digit - b'A')),
        _ => None,
    }
}

/// A non hex digit found at `offset` within a field.
#[derive(Debug, PartialEq, Eq)]
pub struct InvalidHexString {
    pub digit: u8,
    pub offset: usize,
}

impl fmt::Display for InvalidHexString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid hex digit '{}' at offset {}",
            self.digit.escape_ascii(),
            self.offset
        )
    }
}

impl std::error::Error for InvalidHexString {}

type Result<T> = std::result::Result<T, InvalidHexString>;
