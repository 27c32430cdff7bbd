//! Packing of single base substitutions into a nibble.

/// The bases that can be allele coded, the index is the 2 bit code.
const BASES: [char; 4] = ['A', 'C', 'G', 'T'];

fn base_index(base: &str) -> Option<u8> {
    let mut chars = base.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => BASES.iter().position(|b| *b == c).map(|i| i as u8),
        _ => None,
    }
}

/// Whether `(reference, alternative)` can be allele coded.
pub fn valid(reference: &str, alternative: &str) -> bool {
    match (base_index(reference), base_index(alternative)) {
        (Some(r), Some(a)) => r != a,
        _ => false,
    }
}

/// Encode the allele pair into a nibble `ref << 2 | alt`.
///
/// The result is never zero.
///
/// # Panics
///
/// If `valid(reference, alternative)` does not hold.
pub fn encode(reference: &str, alternative: &str) -> u8 {
    match (base_index(reference), base_index(alternative)) {
        (Some(r), Some(a)) if r != a => (r << 2) | a,
        _ => panic!(
            "cannot allele code {:?}>{:?}, check with valid() first",
            reference, alternative
        ),
    }
}

/// Decode a nibble produced by `encode()`.
pub fn decode(code: u8) -> Option<(char, char)> {
    if code > 0x0f {
        return None;
    }
    let r = (code >> 2) as usize;
    let a = (code & 0b11) as usize;
    (r != a).then(|| (BASES[r], BASES[a]))
}
