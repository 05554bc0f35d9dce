use std::{path::Path, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::errors::AprilTagError;

#[doc(hidden)]
pub mod tag16h5;

#[doc(hidden)]
pub mod tag25h9;

/// Largest hamming distance the code book can correct.
pub const MAX_CORRECTABLE_HAMMING: u8 = 3;

/// Describes an AprilTag family: its geometry, bit layout and valid codes.
#[derive(Debug, Clone, PartialEq)]
pub struct TagFamily {
    /// The name of the family, e.g. `tag16h5`.
    pub name: String,
    /// Width in cells of the square delimited by the outer edge of the border.
    pub width_at_border: usize,
    /// Width in cells of the whole tag, including the outer quiet ring.
    pub total_width: usize,
    /// Whether the border is white on black.
    pub reversed_border: bool,
    /// Number of payload bits.
    pub nbits: usize,
    /// Cell column of each bit, most significant bit first.
    pub bit_x: Vec<i8>,
    /// Cell row of each bit, most significant bit first.
    pub bit_y: Vec<i8>,
    /// The valid codes, indexed by tag id.
    pub codes: Vec<u64>,
}

/// The serialized form of a [`TagFamily`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TagFamilyDef {
    name: String,
    width_at_border: usize,
    total_width: usize,
    #[serde(default)]
    reversed_border: bool,
    bit_x: Vec<i8>,
    bit_y: Vec<i8>,
    codes: Vec<u64>,
}

impl TagFamily {
    /// Parses and validates a family from its JSON description.
    ///
    /// The JSON object holds `name`, `width_at_border`, `total_width`,
    /// `reversed_border` (optional), `bit_x`, `bit_y` and `codes`.
    pub fn from_json_str(json: &str) -> Result<Self, AprilTagError> {
        let def: TagFamilyDef = serde_json::from_str(json)?;

        let family = Self {
            name: def.name,
            width_at_border: def.width_at_border,
            total_width: def.total_width,
            reversed_border: def.reversed_border,
            nbits: def.bit_x.len(),
            bit_x: def.bit_x,
            bit_y: def.bit_y,
            codes: def.codes,
        };
        family.validate()?;

        log::debug!(
            "loaded tag family {} with {} codes of {} bits",
            family.name,
            family.codes.len(),
            family.nbits
        );

        Ok(family)
    }

    /// Reads a family from a JSON file, see [`TagFamily::from_json_str`].
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, AprilTagError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Serializes the family to JSON.
    pub fn to_json_string(&self) -> Result<String, AprilTagError> {
        let def = TagFamilyDef {
            name: self.name.clone(),
            width_at_border: self.width_at_border,
            total_width: self.total_width,
            reversed_border: self.reversed_border,
            bit_x: self.bit_x.clone(),
            bit_y: self.bit_y.clone(),
            codes: self.codes.clone(),
        };
        Ok(serde_json::to_string_pretty(&def)?)
    }

    /// Checks that the layout and codes are consistent.
    pub fn validate(&self) -> Result<(), AprilTagError> {
        let invalid = |msg: String| Err(AprilTagError::InvalidFamily(msg));

        if self.nbits == 0 || self.nbits > 64 {
            return invalid(format!("{}: nbits must be in 1..=64, got {}", self.name, self.nbits));
        }
        if self.bit_x.len() != self.nbits || self.bit_y.len() != self.nbits {
            return invalid(format!(
                "{}: expected {} bit coordinates, got {} x and {} y",
                self.name,
                self.nbits,
                self.bit_x.len(),
                self.bit_y.len()
            ));
        }
        if self.width_at_border < 3 || self.total_width < self.width_at_border {
            return invalid(format!(
                "{}: inconsistent widths {} and {}",
                self.name, self.width_at_border, self.total_width
            ));
        }
        if (self.total_width - self.width_at_border) % 2 != 0 {
            return invalid(format!("{}: border ring is not symmetric", self.name));
        }
        if self.codes.is_empty() || self.codes.len() > u16::MAX as usize {
            return invalid(format!("{}: invalid number of codes {}", self.name, self.codes.len()));
        }

        let (lo, hi) = self.bit_range();
        let out_of_range = self
            .bit_x
            .iter()
            .chain(self.bit_y.iter())
            .any(|&b| (b as i32) < lo || (b as i32) >= hi);
        if out_of_range {
            return invalid(format!("{}: bit coordinates outside {lo}..{hi}", self.name));
        }

        if let Some(code) = self.codes.iter().find(|&&c| c & !self.code_mask() != 0) {
            return invalid(format!("{}: code {code:#x} exceeds {} bits", self.name, self.nbits));
        }

        Ok(())
    }

    /// Range of valid cell coordinates, relative to the border square.
    fn bit_range(&self) -> (i32, i32) {
        let min_coord = self.min_coord();
        (min_coord, min_coord + self.total_width as i32)
    }

    /// Cell coordinate of the top-left cell of the whole tag, relative to the border square.
    pub fn min_coord(&self) -> i32 {
        (self.width_at_border as i32 - self.total_width as i32) / 2
    }

    /// Mask covering the `nbits` payload bits.
    pub fn code_mask(&self) -> u64 {
        if self.nbits >= 64 {
            u64::MAX
        } else {
            (1u64 << self.nbits) - 1
        }
    }

    /// Returns the code of `id`.
    pub fn code(&self, id: usize) -> Result<u64, AprilTagError> {
        self.codes
            .get(id)
            .copied()
            .ok_or_else(|| AprilTagError::TagIdOutOfRange {
                family: self.name.clone(),
                id,
                len: self.codes.len(),
            })
    }

    /// Rotates a code by a quarter turn.
    ///
    /// Families with an odd number of bits keep the center bit in place.
    pub fn rotate_90(&self, code: u64) -> u64 {
        let mut p = self.nbits as u32;
        let mut l = 0u32;
        if self.nbits % 4 == 1 {
            p -= 1;
            l = 1;
        }

        let low = (code >> l) << (p / 4 + l);
        let high = (code >> (3 * p / 4 + l)) << l;
        let center = code & l as u64;

        (low | high | center) & self.code_mask()
    }
}

/// Result of looking up an observed code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeMatch {
    /// The matched tag id.
    pub id: u16,
    /// Number of bits that differ from the valid code.
    pub hamming: u8,
    /// Number of 90 degree rotations applied to the observed code to match.
    pub rotation: u8,
}

/// Lookup table from observed codes to tag ids.
///
/// Codes are split into four chunks and indexed by each chunk. A code within
/// hamming distance three of a valid code shares at least one chunk with it
/// exactly, so only the codes in four buckets need a full comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeBook {
    buckets: [Vec<Vec<u16>>; 4],
    chunk_bits: u32,
    max_hamming: u8,
}

impl CodeBook {
    /// Indexes the codes of `family`, accepting up to `max_hamming` bit errors.
    pub fn new(family: &TagFamily, max_hamming: u8) -> Result<Self, AprilTagError> {
        if max_hamming > MAX_CORRECTABLE_HAMMING {
            return Err(AprilTagError::InvalidMaxHamming(max_hamming));
        }

        let chunk_bits = family.nbits.div_ceil(4) as u32;
        let mut buckets: [Vec<Vec<u16>>; 4] =
            std::array::from_fn(|_| vec![Vec::new(); 1 << chunk_bits]);

        family.codes.iter().enumerate().for_each(|(id, &code)| {
            buckets.iter_mut().enumerate().for_each(|(chunk, bucket)| {
                let key = Self::chunk(code, chunk, chunk_bits);
                bucket[key].push(id as u16);
            });
        });

        Ok(Self {
            buckets,
            chunk_bits,
            max_hamming,
        })
    }

    /// The maximum number of corrected bits.
    pub fn max_hamming(&self) -> u8 {
        self.max_hamming
    }

    #[inline]
    fn chunk(code: u64, chunk: usize, chunk_bits: u32) -> usize {
        ((code >> (chunk as u32 * chunk_bits)) & ((1u64 << chunk_bits) - 1)) as usize
    }

    /// Finds the closest valid code to `code` without rotating it.
    pub fn lookup(&self, family: &TagFamily, code: u64) -> Option<(u16, u8)> {
        let mut best: Option<(u16, u8)> = None;

        self.buckets.iter().enumerate().for_each(|(chunk, bucket)| {
            let key = Self::chunk(code, chunk, self.chunk_bits);
            bucket[key].iter().for_each(|&id| {
                let hamming = (family.codes[id as usize] ^ code).count_ones() as u8;
                if hamming <= self.max_hamming && best.is_none_or(|(_, h)| hamming < h) {
                    best = Some((id, hamming));
                }
            });
        });

        best
    }

    /// Matches an observed code in all four orientations, keeping the closest.
    pub fn decode(&self, family: &TagFamily, code: u64) -> Option<CodeMatch> {
        let mut rcode = code & family.code_mask();
        let mut best: Option<CodeMatch> = None;

        for rotation in 0..4u8 {
            if let Some((id, hamming)) = self.lookup(family, rcode) {
                if best.is_none_or(|b| hamming < b.hamming) {
                    best = Some(CodeMatch {
                        id,
                        hamming,
                        rotation,
                    });
                }
            }
            rcode = family.rotate_90(rcode);
        }

        best
    }
}

/// Selects a tag family, either built in or user supplied.
#[derive(Debug, Clone, PartialEq)]
pub enum TagFamilyKind {
    /// The 16h5 family, see [`TagFamily::tag16h5`].
    Tag16H5,
    /// The 25h9 family, see [`TagFamily::tag25h9`].
    Tag25H9,
    /// A family loaded at runtime.
    Custom(Arc<TagFamily>),
}

impl TagFamilyKind {
    /// Returns all built-in families.
    pub fn all() -> Vec<Self> {
        vec![Self::Tag16H5, Self::Tag25H9]
    }

    /// The family name.
    pub fn name(&self) -> &str {
        match self {
            Self::Tag16H5 => "tag16h5",
            Self::Tag25H9 => "tag25h9",
            Self::Custom(family) => &family.name,
        }
    }

    /// Builds the family description.
    pub fn to_family(&self) -> TagFamily {
        match self {
            Self::Tag16H5 => TagFamily::tag16h5(),
            Self::Tag25H9 => TagFamily::tag25h9(),
            Self::Custom(family) => (**family).clone(),
        }
    }
}

impl From<TagFamily> for TagFamilyKind {
    fn from(value: TagFamily) -> Self {
        Self::Custom(Arc::new(value))
    }
}

impl FromStr for TagFamilyKind {
    type Err = AprilTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "").as_str() {
            "tag16h5" => Ok(Self::Tag16H5),
            "tag25h9" => Ok(Self::Tag25H9),
            _ => Err(AprilTagError::UnknownFamily(s.to_string())),
        }
    }
}

impl std::fmt::Display for TagFamilyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_families_are_valid() -> Result<(), Box<dyn std::error::Error>> {
        for kind in TagFamilyKind::all() {
            let family = kind.to_family();
            family.validate()?;
            assert_eq!(family.name, kind.name());
        }
        assert_eq!(TagFamily::tag16h5().codes.len(), 30);
        assert_eq!(TagFamily::tag25h9().codes.len(), 35);
        Ok(())
    }

    #[test]
    fn test_family_from_str() -> Result<(), Box<dyn std::error::Error>> {
        assert_eq!("tag16h5".parse::<TagFamilyKind>()?, TagFamilyKind::Tag16H5);
        assert_eq!("Tag25_H9".parse::<TagFamilyKind>()?, TagFamilyKind::Tag25H9);
        assert!(matches!(
            "tag99h1".parse::<TagFamilyKind>(),
            Err(AprilTagError::UnknownFamily(_))
        ));
        Ok(())
    }

    #[test]
    fn test_rotate_90_four_times_is_identity() {
        for family in [TagFamily::tag16h5(), TagFamily::tag25h9()] {
            for &code in &family.codes {
                let mut rotated = code;
                for _ in 0..4 {
                    rotated = family.rotate_90(rotated);
                }
                assert_eq!(rotated, code, "{} {code:#x}", family.name);
            }
        }
    }

    #[test]
    fn test_rotate_90_keeps_center_bit() {
        let family = TagFamily::tag25h9();
        assert_eq!(family.rotate_90(1), 1);
        assert_eq!(family.rotate_90(0), 0);
    }

    #[test]
    fn test_code_book_decode() -> Result<(), Box<dyn std::error::Error>> {
        let family = TagFamily::tag16h5();
        let book = CodeBook::new(&family, 1)?;

        let code = family.code(7)?;
        let exact = book.decode(&family, code).ok_or("no match")?;
        assert_eq!((exact.id, exact.hamming, exact.rotation), (7, 0, 0));

        let flipped = book.decode(&family, code ^ 0b100).ok_or("no match")?;
        assert_eq!((flipped.id, flipped.hamming), (7, 1));

        // an observed code rotated once needs three more turns to line up
        let rotated = family.rotate_90(code);
        let turned = book.decode(&family, rotated).ok_or("no match")?;
        assert_eq!((turned.id, turned.hamming, turned.rotation), (7, 0, 3));

        assert!(book.decode(&family, code ^ 0b111).is_none());

        Ok(())
    }

    #[test]
    fn test_code_book_max_hamming() {
        let family = TagFamily::tag16h5();
        assert!(matches!(
            CodeBook::new(&family, 4),
            Err(AprilTagError::InvalidMaxHamming(4))
        ));
    }

    #[test]
    fn test_custom_family_json() -> Result<(), Box<dyn std::error::Error>> {
        let json = TagFamily::tag16h5().to_json_string()?.replace("tag16h5", "mine");
        let family = TagFamily::from_json_str(&json)?;
        assert_eq!(family.name, "mine");
        assert_eq!(family.nbits, 16);

        let kind = TagFamilyKind::from(family);
        assert_eq!(kind.name(), "mine");
        assert_eq!(kind.to_family().codes, TagFamily::tag16h5().codes);

        Ok(())
    }

    #[test]
    fn test_custom_family_validation() {
        let bad_bits = r#"{"name":"bad","width_at_border":4,"total_width":6,
            "bit_x":[1,2],"bit_y":[1],"codes":[1]}"#;
        assert!(matches!(
            TagFamily::from_json_str(bad_bits),
            Err(AprilTagError::InvalidFamily(_))
        ));

        let wide_code = r#"{"name":"bad","width_at_border":4,"total_width":6,
            "bit_x":[1,2],"bit_y":[1,1],"codes":[4]}"#;
        assert!(matches!(
            TagFamily::from_json_str(wide_code),
            Err(AprilTagError::InvalidFamily(_))
        ));

        assert!(matches!(
            TagFamily::from_json_str("{"),
            Err(AprilTagError::FamilyParse(_))
        ));
    }
}
