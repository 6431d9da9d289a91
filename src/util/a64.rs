//! Ordered base-64 encoding for locally allocated identifiers.
//!
//! The alphabet is in ASCII order so encoded values of equal length sort the
//! same way as the integers they represent. Shorter ids always come from
//! smaller integers.

const ALPHABET: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

/// Encode a non-negative integer
pub fn encode_int(mut value: u64) -> String {
    if value == 0 {
        return (ALPHABET[0] as char).to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(ALPHABET[(value % 64) as usize]);
        value /= 64;
    }
    digits.reverse();
    // The alphabet is pure ASCII.
    digits.into_iter().map(char::from).collect()
}

/// Decode a value produced by [`encode_int`]
pub fn decode_int(encoded: &str) -> Option<u64> {
    if encoded.is_empty() {
        return None;
    }
    let mut value: u64 = 0;
    for byte in encoded.bytes() {
        let digit = ALPHABET.iter().position(|&c| c == byte)? as u64;
        value = value.checked_mul(64)?.checked_add(digit)?;
    }
    Some(value)
}

/// Return the larger of two unsigned decimal strings such as IMAP MODSEQs.
///
/// MODSEQs are 63-bit values and are passed around as strings; an empty string
/// means "unknown" and loses against anything.
pub fn max_decimal_string<'a>(a: &'a str, b: &'a str) -> &'a str {
    let a_trim = a.trim_start_matches('0');
    let b_trim = b.trim_start_matches('0');
    match a_trim.len().cmp(&b_trim.len()) {
        std::cmp::Ordering::Greater => a,
        std::cmp::Ordering::Less => b,
        std::cmp::Ordering::Equal => {
            if a_trim >= b_trim {
                if a.is_empty() {
                    b
                } else {
                    a
                }
            } else {
                b
            }
        }
    }
}
