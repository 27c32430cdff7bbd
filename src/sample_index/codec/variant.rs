//! Variants and their packed representation within one batch.
//!
//! Each variant starts with its offset from the batch start as a 24 bit big
//! endian integer.  Single base substitutions over `ACGT` store their allele
//! code in the top nibble of the first byte and need exactly three bytes.  All
//! other variants are followed by `ref 0x00 alt`, and by a `0x00` separator
//! when another variant follows in the same run.

use byteorder::{BigEndian, ByteOrder};

use super::allele;
use crate::sample_index::schema::{self, MAX_OFFSET};

/// Separator between reference and alternative allele, and between
/// variable-width entries of a run.
const SEPARATOR: u8 = 0x00;

/// Width of the offset.
const OFFSET_BYTES: usize = 3;

/// Mask of the offset bits in the 24 bit prefix.
const OFFSET_MASK: u32 = MAX_OFFSET - 1;

/// Supporting code for the variant codec.
pub mod error {
    /// Error type for encoding and decoding variants.
    #[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        #[error("position {pos} cannot be stored relative to batch start {batch_start}")]
        OffsetOutOfRange { pos: u32, batch_start: u32 },
        #[error("variant run is truncated at byte {0}")]
        Truncated(usize),
        #[error("allele at byte {0} is not valid UTF-8")]
        InvalidAllele(usize),
        #[error("invalid allele code {0:#x}")]
        InvalidAlleleCode(u8),
        #[error("offset {offset} overflows positions after batch start {batch_start}")]
        PositionOverflow { batch_start: u32, offset: u32 },
        #[error("cannot parse variant from {0:?}, expected CHROM:POS:REF:ALT")]
        InvalidVariant(String),
    }
}

pub use error::Error;

/// A sequence variant.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct Variant {
    /// Chromosome name.
    pub chrom: String,
    /// 1-based position.
    pub pos: u32,
    /// Reference allele.
    pub reference: String,
    /// Alternative allele.
    pub alternative: String,
}

impl Variant {
    /// Construct new variant.
    pub fn new(chrom: &str, pos: u32, reference: &str, alternative: &str) -> Self {
        Self {
            chrom: chrom.to_string(),
            pos,
            reference: reference.to_string(),
            alternative: alternative.to_string(),
        }
    }

    /// Whether the variant can be stored in three bytes.
    pub fn is_allele_coded(&self) -> bool {
        allele::valid(&self.reference, &self.alternative)
    }

    /// Key for ordering variants within one batch.
    pub fn sort_key(&self) -> (u32, &str, &str) {
        (self.pos, &self.reference, &self.alternative)
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.chrom, self.pos, self.reference, self.alternative
        )
    }
}

impl std::str::FromStr for Variant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut it = s.rsplitn(4, ':');
        let (alternative, reference, pos, chrom) = match (it.next(), it.next(), it.next(), it.next())
        {
            (Some(alt), Some(reference), Some(pos), Some(chrom)) => (alt, reference, pos, chrom),
            _ => return Err(Error::InvalidVariant(s.to_string())),
        };
        let pos = pos
            .parse::<u32>()
            .map_err(|_| Error::InvalidVariant(s.to_string()))?;
        Ok(Variant::new(chrom, pos, reference, alternative))
    }
}

fn offset_of(variant: &Variant, batch_start: u32) -> Result<u32, Error> {
    match variant.pos.checked_sub(batch_start) {
        Some(offset) if offset < MAX_OFFSET => Ok(offset),
        _ => Err(Error::OffsetOutOfRange {
            pos: variant.pos,
            batch_start,
        }),
    }
}

/// Number of bytes `variant` takes, not counting a trailing separator.
pub fn encoded_len(variant: &Variant) -> usize {
    if variant.is_allele_coded() {
        OFFSET_BYTES
    } else {
        OFFSET_BYTES + variant.reference.len() + 1 + variant.alternative.len()
    }
}

/// Encode a single variant relative to the start of its own batch.
pub fn to_bytes(variant: &Variant) -> Result<Vec<u8>, Error> {
    to_bytes_list(schema::batch_start(variant.pos), std::slice::from_ref(variant))
}

/// Encode an ordered list of variants of one batch.
pub fn to_bytes_list(batch_start: u32, variants: &[Variant]) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::with_capacity(variants.iter().map(|v| encoded_len(v) + 1).sum());
    write_into(batch_start, variants, &mut buf)?;
    Ok(buf)
}

/// Append the encoded run to `buf`, returning the number of bytes written.
///
/// On error, `buf` is left as it was.
pub fn write_into(batch_start: u32, variants: &[Variant], buf: &mut Vec<u8>) -> Result<usize, Error> {
    let start = buf.len();
    for (i, variant) in variants.iter().enumerate() {
        let offset = match offset_of(variant, batch_start) {
            Ok(offset) => offset,
            Err(e) => {
                buf.truncate(start);
                return Err(e);
            }
        };
        let mut prefix = [0u8; OFFSET_BYTES];
        BigEndian::write_u24(&mut prefix, offset);
        if variant.is_allele_coded() {
            prefix[0] |= allele::encode(&variant.reference, &variant.alternative) << 4;
            buf.extend_from_slice(&prefix);
        } else {
            buf.extend_from_slice(&prefix);
            buf.extend_from_slice(variant.reference.as_bytes());
            buf.push(SEPARATOR);
            buf.extend_from_slice(variant.alternative.as_bytes());
            if i + 1 < variants.len() {
                buf.push(SEPARATOR);
            }
        }
    }
    Ok(buf.len() - start)
}

/// Decode a complete run.
pub fn to_variants(chrom: &str, batch_start: u32, bytes: &[u8]) -> Result<Vec<Variant>, Error> {
    to_variants_at(chrom, batch_start, bytes, 0, bytes.len())
}

/// Decode the run stored at `bytes[offset..offset + length]`.
pub fn to_variants_at(
    chrom: &str,
    batch_start: u32,
    bytes: &[u8],
    offset: usize,
    length: usize,
) -> Result<Vec<Variant>, Error> {
    let end = offset
        .checked_add(length)
        .filter(|end| *end <= bytes.len())
        .ok_or(Error::Truncated(bytes.len()))?;
    VariantIter::new(chrom, batch_start, &bytes[offset..end]).collect()
}

/// Number of variants in a packed run, without decoding them.
pub fn count(bytes: &[u8]) -> Result<usize, Error> {
    let mut result = 0;
    let mut pos = 0;
    while pos < bytes.len() {
        if bytes.len() - pos < OFFSET_BYTES {
            return Err(Error::Truncated(pos));
        }
        let coded = bytes[pos] & 0xf0 != 0;
        pos += OFFSET_BYTES;
        if !coded {
            let len = bytes[pos..]
                .iter()
                .position(|b| *b == SEPARATOR)
                .ok_or(Error::Truncated(pos))?;
            pos += len + 1;
            pos = match bytes[pos..].iter().position(|b| *b == SEPARATOR) {
                Some(len) => pos + len + 1,
                None => bytes.len(),
            };
        }
        result += 1;
    }
    Ok(result)
}

/// Iterator over the variants of a packed run.
#[derive(Debug, Clone)]
pub struct VariantIter<'a> {
    chrom: &'a str,
    batch_start: u32,
    bytes: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> VariantIter<'a> {
    pub fn new(chrom: &'a str, batch_start: u32, bytes: &'a [u8]) -> Self {
        Self {
            chrom,
            batch_start,
            bytes,
            pos: 0,
            failed: false,
        }
    }

    fn read_allele(&mut self) -> Result<&'a str, Error> {
        let bytes: &'a [u8] = self.bytes;
        let start = self.pos;
        let len = bytes[start..]
            .iter()
            .position(|b| *b == SEPARATOR)
            .unwrap_or(bytes.len() - start);
        self.pos = start + len;
        std::str::from_utf8(&bytes[start..start + len]).map_err(|_| Error::InvalidAllele(start))
    }

    fn read_next(&mut self) -> Result<Variant, Error> {
        if self.bytes.len() - self.pos < OFFSET_BYTES {
            return Err(Error::Truncated(self.pos));
        }
        let prefix = BigEndian::read_u24(&self.bytes[self.pos..self.pos + OFFSET_BYTES]);
        self.pos += OFFSET_BYTES;
        let code = (prefix >> 20) as u8;
        let pos = self
            .batch_start
            .checked_add(prefix & OFFSET_MASK)
            .ok_or(Error::PositionOverflow {
                batch_start: self.batch_start,
                offset: prefix & OFFSET_MASK,
            })?;
        if code != 0 {
            let (reference, alternative) =
                allele::decode(code).ok_or(Error::InvalidAlleleCode(code))?;
            return Ok(Variant::new(
                self.chrom,
                pos,
                &reference.to_string(),
                &alternative.to_string(),
            ));
        }

        let reference = self.read_allele()?;
        if self.bytes.get(self.pos) != Some(&SEPARATOR) {
            return Err(Error::Truncated(self.pos));
        }
        self.pos += 1;
        let alternative = self.read_allele()?;
        if self.pos < self.bytes.len() {
            // consume separator before next entry
            self.pos += 1;
        }
        Ok(Variant::new(self.chrom, pos, reference, alternative))
    }
}

impl<'a> Iterator for VariantIter<'a> {
    type Item = Result<Variant, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.bytes.len() {
            return None;
        }
        let result = self.read_next();
        self.failed = result.is_err();
        Some(result)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn snvs(batch_start: u32) -> Vec<Variant> {
        let bases = ["A", "C", "G", "T"];
        (0..100u32)
            .map(|i| {
                let r = bases[(i % 4) as usize];
                let a = bases[((i + 1 + i / 4) % 4) as usize];
                let a = if a == r { bases[((i + 2) % 4) as usize] } else { a };
                Variant::new("1", batch_start + i * 10, r, a)
            })
            .collect()
    }

    fn mixed(batch_start: u32) -> Vec<Variant> {
        vec![
            Variant::new("1", batch_start, "A", "C"),
            Variant::new("1", batch_start + 3, "AT", "A"),
            Variant::new("1", batch_start + 3, "N", "A"),
            Variant::new("1", batch_start + 5, "T", "G"),
            Variant::new("1", batch_start + 8, "C", "<DEL>"),
            Variant::new("1", batch_start + 9, "", "TTT"),
            Variant::new("1", batch_start + 15, "GG", "CC"),
        ]
    }

    #[test]
    fn round_trip_snvs() -> Result<(), anyhow::Error> {
        let batch_start = 3_000_000;
        let variants = snvs(batch_start);
        let bytes = to_bytes_list(batch_start, &variants)?;
        assert_eq!(bytes.len(), 300);
        assert_eq!(to_variants("1", batch_start, &bytes)?, variants);
        assert_eq!(count(&bytes)?, 100);

        Ok(())
    }

    #[test]
    fn count_mixed() -> Result<(), anyhow::Error> {
        let variants = mixed(0);
        let bytes = to_bytes_list(0, &variants)?;
        assert_eq!(count(&bytes)?, variants.len());
        assert_eq!(count(&[])?, 0);
        assert!(count(&bytes[..4]).is_err());

        Ok(())
    }

    #[rstest::rstest]
    #[case(0)]
    #[case(7)]
    fn round_trip_embedded(#[case] padding: usize) -> Result<(), anyhow::Error> {
        let batch_start = 1_000_000;
        for variants in [snvs(batch_start), mixed(batch_start)] {
            let mut buf = vec![0xffu8; padding];
            let written = write_into(batch_start, &variants, &mut buf)?;
            buf.extend_from_slice(&[0xff; 5]);
            assert_eq!(
                to_variants_at("1", batch_start, &buf, padding, written)?,
                variants
            );
        }

        Ok(())
    }

    #[test]
    fn two_runs_back_to_back() -> Result<(), anyhow::Error> {
        let variants = mixed(0);
        let mut buf = Vec::new();
        let first = write_into(0, &variants[..4], &mut buf)?;
        let second = write_into(0, &variants[4..], &mut buf)?;
        assert_eq!(to_variants_at("1", 0, &buf, 0, first)?, variants[..4].to_vec());
        assert_eq!(to_variants_at("1", 0, &buf, first, second)?, variants[4..].to_vec());

        Ok(())
    }

    #[test]
    fn byte_layout() -> Result<(), anyhow::Error> {
        let bytes = to_bytes_list(
            0,
            &[Variant::new("1", 0x12345, "C", "A"), Variant::new("1", 0x12346, "AT", "A")],
        )?;
        insta::assert_snapshot!(base16ct::lower::encode_string(&bytes), @"41234501234641540041");
        let single = to_bytes(&Variant::new("1", 2_000_001, "G", "T"))?;
        assert_eq!(single, vec![0xb0, 0x00, 0x01]);

        Ok(())
    }

    #[test]
    fn offset_out_of_range() {
        let mut buf = vec![1, 2, 3];
        let variants = [Variant::new("1", 10, "A", "C"), Variant::new("1", 2_000_000, "A", "C")];
        assert_eq!(
            write_into(0, &variants, &mut buf),
            Err(Error::OffsetOutOfRange {
                pos: 2_000_000,
                batch_start: 0
            })
        );
        assert_eq!(buf, vec![1, 2, 3]);
        assert!(to_bytes_list(100, &[Variant::new("1", 99, "A", "C")]).is_err());
    }

    #[test]
    fn truncated_run() -> Result<(), anyhow::Error> {
        let bytes = to_bytes_list(0, &mixed(0))?;
        assert!(to_variants("1", 0, &bytes[..2]).is_err());
        assert!(to_variants("1", 0, &bytes[..5]).is_err());
        assert!(to_variants_at("1", 0, &bytes, 3, bytes.len()).is_err());

        Ok(())
    }

    #[test]
    fn corrupt_offset_near_position_limit() {
        // allele coded SNV with offset 0x0f_ffff
        let bytes = [0x1f, 0xff, 0xff];
        let batch_start = u32::MAX - 10;
        assert_eq!(
            to_variants("1", batch_start, &bytes),
            Err(Error::PositionOverflow {
                batch_start,
                offset: 0x0f_ffff
            })
        );
    }

    #[rstest::rstest]
    #[case("1:100:A:C")]
    #[case("chrUn_KI270742v1:1:AT:<DEL>")]
    fn variant_display_from_str(#[case] s: &str) -> Result<(), anyhow::Error> {
        let variant: Variant = s.parse()?;
        assert_eq!(variant.to_string(), s);

        Ok(())
    }

    #[test]
    fn variant_from_str_invalid() {
        assert!("1:x:A:C".parse::<Variant>().is_err());
        assert!("1:100:A".parse::<Variant>().is_err());
    }
}
