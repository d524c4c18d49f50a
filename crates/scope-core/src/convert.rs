//! Bit and type projection of raw stored values.
//!
//! A [`Projection`] selects a bit field out of a raw value and converts it to
//! an [`OutputType`]. Views validate their projection once, when they are
//! created, producing a [`ResolvedProjection`] whose `project_*` methods are
//! infallible.
//!
//! ## Rules
//!
//! - `bit_offset == 0 && bit_length == 0` selects the whole raw value.
//! - Otherwise the field is `(raw >> bit_offset) & mask(bit_length)`. For
//!   frames the field is gathered little-endian across byte boundaries.
//! - `flip_bytes` reverses the byte order of the field over its width rounded
//!   up to whole bytes. For a full-width word that is a plain byte swap.
//! - Signed outputs sign-extend from the field width, then narrow.
//!   Unsigned outputs truncate. `Bool` is "field is non-zero".
//! - `F32`/`F64` reinterpret the bits of a 32/64-bit field.
//!
//! ```
//! use scope_core::convert::{OutputType, Projection, Value};
//! use scope_core::key::SeriesKind;
//!
//! // Upper nibble of a status byte, read as a signed 4-bit quantity.
//! let field = Projection::bits(4, 4, OutputType::I8).resolve(SeriesKind::U8).unwrap();
//! assert_eq!(field.project_word(0xF0), Value::I8(-1));
//! ```

use crate::error::{ScopeError, ScopeResult};
use crate::key::SeriesKind;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Requested output representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    /// Field is non-zero.
    Bool,
    /// Unsigned 8 bit.
    U8,
    /// Unsigned 16 bit.
    U16,
    /// Unsigned 32 bit.
    U32,
    /// Unsigned 64 bit.
    U64,
    /// Signed 8 bit.
    I8,
    /// Signed 16 bit.
    I16,
    /// Signed 32 bit.
    I32,
    /// Signed 64 bit.
    I64,
    /// IEEE-754 single precision.
    F32,
    /// IEEE-754 double precision.
    F64,
    /// Raw bytes of a whole frame.
    Bytes,
}

impl OutputType {
    fn float_bits(self) -> Option<u64> {
        match self {
            OutputType::F32 => Some(32),
            OutputType::F64 => Some(64),
            _ => None,
        }
    }
}

/// A projected value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// See [`OutputType::Bool`].
    Bool(bool),
    /// See [`OutputType::U8`].
    U8(u8),
    /// See [`OutputType::U16`].
    U16(u16),
    /// See [`OutputType::U32`].
    U32(u32),
    /// See [`OutputType::U64`].
    U64(u64),
    /// See [`OutputType::I8`].
    I8(i8),
    /// See [`OutputType::I16`].
    I16(i16),
    /// See [`OutputType::I32`].
    I32(i32),
    /// See [`OutputType::I64`].
    I64(i64),
    /// See [`OutputType::F32`].
    F32(f32),
    /// See [`OutputType::F64`].
    F64(f64),
    /// See [`OutputType::Bytes`].
    Bytes(Bytes),
}

impl Value {
    /// Numeric value for plotting, `None` for byte snapshots.
    pub fn as_f64(&self) -> Option<f64> {
        Some(match *self {
            Value::Bool(b) => f64::from(u8::from(b)),
            Value::U8(v) => f64::from(v),
            Value::U16(v) => f64::from(v),
            Value::U32(v) => f64::from(v),
            Value::U64(v) => v as f64,
            Value::I8(v) => f64::from(v),
            Value::I16(v) => f64::from(v),
            Value::I32(v) => f64::from(v),
            Value::I64(v) => v as f64,
            Value::F32(v) => f64::from(v),
            Value::F64(v) => v,
            Value::Bytes(_) => return None,
        })
    }

    /// The output type this value was produced for.
    pub fn output_type(&self) -> OutputType {
        match self {
            Value::Bool(_) => OutputType::Bool,
            Value::U8(_) => OutputType::U8,
            Value::U16(_) => OutputType::U16,
            Value::U32(_) => OutputType::U32,
            Value::U64(_) => OutputType::U64,
            Value::I8(_) => OutputType::I8,
            Value::I16(_) => OutputType::I16,
            Value::I32(_) => OutputType::I32,
            Value::I64(_) => OutputType::I64,
            Value::F32(_) => OutputType::F32,
            Value::F64(_) => OutputType::F64,
            Value::Bytes(_) => OutputType::Bytes,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::U8(v) => write!(f, "{v}"),
            Value::U16(v) => write!(f, "{v}"),
            Value::U32(v) => write!(f, "{v}"),
            Value::U64(v) => write!(f, "{v}"),
            Value::I8(v) => write!(f, "{v}"),
            Value::I16(v) => write!(f, "{v}"),
            Value::I32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::Bytes(b) => {
                for byte in b.iter() {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// Which part of a raw value to read and how to present it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Projection {
    /// First bit of the field, counted from the least significant bit.
    pub bit_offset: u32,
    /// Field width in bits; zero together with a zero offset selects the whole value.
    pub bit_length: u32,
    /// Output representation.
    pub output: OutputType,
    /// Reverse the byte order of the field.
    #[serde(default)]
    pub flip_bytes: bool,
}

impl Projection {
    /// Whole raw value as `output`.
    pub const fn full(output: OutputType) -> Self {
        Self {
            bit_offset: 0,
            bit_length: 0,
            output,
            flip_bytes: false,
        }
    }

    /// `length` bits starting at `offset` as `output`.
    pub const fn bits(offset: u32, length: u32, output: OutputType) -> Self {
        Self {
            bit_offset: offset,
            bit_length: length,
            output,
            flip_bytes: false,
        }
    }

    /// Same projection with the field's byte order reversed.
    #[must_use]
    pub const fn flipped(mut self) -> Self {
        self.flip_bytes = true;
        self
    }

    /// The projection that returns stored values unchanged.
    pub fn natural(kind: SeriesKind) -> Self {
        let output = match kind {
            SeriesKind::Word { bits: 8 } => OutputType::U8,
            SeriesKind::Word { bits: 16 } => OutputType::U16,
            SeriesKind::Word { bits: 32 } => OutputType::U32,
            SeriesKind::Word { .. } => OutputType::U64,
            SeriesKind::Real => OutputType::F64,
            SeriesKind::Frame { .. } => OutputType::Bytes,
        };
        Self::full(output)
    }

    fn is_full(&self) -> bool {
        self.bit_offset == 0 && self.bit_length == 0
    }

    /// Check the projection against `kind`.
    pub fn resolve(&self, kind: SeriesKind) -> ScopeResult<ResolvedProjection> {
        kind.validate()?;
        match kind {
            SeriesKind::Real => self.resolve_real(kind),
            SeriesKind::Word { bits } => {
                if self.output == OutputType::Bytes {
                    return Err(ScopeError::invalid_projection(
                        kind,
                        "byte output is only available for whole frames",
                    ));
                }
                if self.is_full() {
                    return self.numeric(kind, 0, u32::from(bits));
                }
                self.field(kind)
            }
            SeriesKind::Frame { .. } => {
                if self.is_full() {
                    if self.output != OutputType::Bytes {
                        return Err(ScopeError::invalid_projection(
                            kind,
                            "numeric output on a frame requires a bit field",
                        ));
                    }
                    return Ok(ResolvedProjection {
                        offset: 0,
                        width: 0,
                        output: OutputType::Bytes,
                        flip: self.flip_bytes,
                        whole_frame: true,
                    });
                }
                if self.output == OutputType::Bytes {
                    return Err(ScopeError::invalid_projection(
                        kind,
                        "byte output is only available for whole frames",
                    ));
                }
                self.field(kind)
            }
        }
    }

    fn resolve_real(&self, kind: SeriesKind) -> ScopeResult<ResolvedProjection> {
        if !self.is_full() {
            return Err(ScopeError::invalid_projection(
                kind,
                "bit fields cannot be selected from real values",
            ));
        }
        match self.output {
            OutputType::F64 | OutputType::F32 => Ok(ResolvedProjection {
                offset: 0,
                width: 64,
                output: self.output,
                flip: self.flip_bytes,
                whole_frame: false,
            }),
            other => Err(ScopeError::invalid_projection(
                kind,
                format!("real values convert to f32 or f64, not {other:?}"),
            )),
        }
    }

    fn field(&self, kind: SeriesKind) -> ScopeResult<ResolvedProjection> {
        if self.bit_length == 0 {
            return Err(ScopeError::invalid_projection(
                kind,
                format!("zero-length field at bit offset {}", self.bit_offset),
            ));
        }
        if self.bit_length > 64 {
            return Err(ScopeError::invalid_projection(
                kind,
                format!("field of {} bits exceeds 64", self.bit_length),
            ));
        }
        let end = u64::from(self.bit_offset) + u64::from(self.bit_length);
        if end > kind.raw_bits() {
            return Err(ScopeError::invalid_projection(
                kind,
                format!(
                    "bits {}..{end} exceed the {}-bit raw value",
                    self.bit_offset,
                    kind.raw_bits()
                ),
            ));
        }
        self.numeric(kind, self.bit_offset, self.bit_length)
    }

    fn numeric(&self, kind: SeriesKind, offset: u32, width: u32) -> ScopeResult<ResolvedProjection> {
        if let Some(float_bits) = self.output.float_bits() {
            if u64::from(width) != float_bits {
                return Err(ScopeError::invalid_projection(
                    kind,
                    format!("{:?} needs a {float_bits}-bit field, got {width}", self.output),
                ));
            }
        }
        Ok(ResolvedProjection {
            offset,
            width,
            output: self.output,
            flip: self.flip_bytes,
            whole_frame: false,
        })
    }
}

/// A projection checked against a series kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedProjection {
    offset: u32,
    width: u32,
    output: OutputType,
    flip: bool,
    whole_frame: bool,
}

impl ResolvedProjection {
    /// Output representation.
    pub fn output(&self) -> OutputType {
        self.output
    }

    /// Project a stored word.
    pub fn project_word(&self, raw: u64) -> Value {
        self.finish(extract_bits(raw, self.offset, self.width))
    }

    /// Project a stored real.
    pub fn project_real(&self, raw: f64) -> Value {
        let value = if self.flip {
            f64::from_bits(raw.to_bits().swap_bytes())
        } else {
            raw
        };
        match self.output {
            OutputType::F32 => Value::F32(value as f32),
            _ => Value::F64(value),
        }
    }

    /// Project a stored frame.
    pub fn project_frame(&self, raw: &Bytes) -> Value {
        if self.whole_frame {
            if self.flip {
                let mut reversed = raw.to_vec();
                reversed.reverse();
                return Value::Bytes(Bytes::from(reversed));
            }
            return Value::Bytes(raw.clone());
        }
        self.finish(gather_bits(raw, self.offset, self.width))
    }

    fn finish(&self, field: u64) -> Value {
        let field = if self.flip {
            flip_field(field, self.width)
        } else {
            field
        };
        convert_field(field, self.width, self.output)
    }
}

// =============================================================================
// Bit helpers
// =============================================================================

/// Mask with the low `width` bits set.
pub fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// `width` bits of `raw` starting at `offset`.
pub fn extract_bits(raw: u64, offset: u32, width: u32) -> u64 {
    if offset >= 64 {
        return 0;
    }
    (raw >> offset) & mask(width)
}

/// `width` bits starting at bit `offset` of a little-endian byte buffer.
///
/// Bytes past the end of `bytes` read as zero.
pub fn gather_bits(bytes: &[u8], offset: u32, width: u32) -> u64 {
    let first = (offset / 8) as usize;
    let shift = offset % 8;
    let needed = (shift + width).div_ceil(8) as usize;
    let mut acc: u128 = 0;
    for i in 0..needed {
        let byte = bytes.get(first + i).copied().unwrap_or(0);
        acc |= u128::from(byte) << (8 * i);
    }
    ((acc >> shift) as u64) & mask(width)
}

/// Reverse the byte order of a `width`-bit field, rounded up to whole bytes.
pub fn flip_field(field: u64, width: u32) -> u64 {
    let bytes = width.div_ceil(8).clamp(1, 8);
    field.swap_bytes() >> (64 - 8 * bytes)
}

/// Two's complement sign extension of a `width`-bit field.
pub fn sign_extend(field: u64, width: u32) -> i64 {
    if width == 0 || width >= 64 {
        return field as i64;
    }
    let shift = 64 - width;
    ((field << shift) as i64) >> shift
}

fn convert_field(field: u64, width: u32, output: OutputType) -> Value {
    match output {
        OutputType::Bool => Value::Bool(field != 0),
        OutputType::U8 => Value::U8(field as u8),
        OutputType::U16 => Value::U16(field as u16),
        OutputType::U32 => Value::U32(field as u32),
        OutputType::U64 => Value::U64(field),
        OutputType::I8 => Value::I8(sign_extend(field, width) as i8),
        OutputType::I16 => Value::I16(sign_extend(field, width) as i16),
        OutputType::I32 => Value::I32(sign_extend(field, width) as i32),
        OutputType::I64 => Value::I64(sign_extend(field, width)),
        OutputType::F32 => Value::F32(f32::from_bits(field as u32)),
        OutputType::F64 => Value::F64(f64::from_bits(field)),
        // Rejected by validation for fields; keep the field's bytes if it ever happens.
        OutputType::Bytes => {
            let len = width.div_ceil(8).clamp(1, 8) as usize;
            Value::Bytes(Bytes::copy_from_slice(&field.to_le_bytes()[..len]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(p: Projection, kind: SeriesKind, raw: u64) -> Value {
        p.resolve(kind).unwrap().project_word(raw)
    }

    #[test]
    fn test_full_width_round_trips() {
        assert_eq!(word(Projection::natural(SeriesKind::U8), SeriesKind::U8, 0xAB), Value::U8(0xAB));
        assert_eq!(
            word(Projection::natural(SeriesKind::U16), SeriesKind::U16, 0xBEEF),
            Value::U16(0xBEEF)
        );
        assert_eq!(
            word(Projection::natural(SeriesKind::U64), SeriesKind::U64, u64::MAX - 7),
            Value::U64(u64::MAX - 7)
        );
        let real = Projection::natural(SeriesKind::Real).resolve(SeriesKind::Real).unwrap();
        assert_eq!(real.project_real(-2.5), Value::F64(-2.5));
    }

    #[test]
    fn test_signed_outputs_sign_extend_from_field_width() {
        // 0xFF in a byte register is -1 as i8 and as i16.
        assert_eq!(word(Projection::full(OutputType::I8), SeriesKind::U8, 0xFF), Value::I8(-1));
        assert_eq!(word(Projection::full(OutputType::I16), SeriesKind::U8, 0xFF), Value::I16(-1));
        // A 4-bit field holding 0b1000 is -8.
        assert_eq!(
            word(Projection::bits(4, 4, OutputType::I32), SeriesKind::U16, 0x0080),
            Value::I32(-8)
        );
        // Positive fields stay positive.
        assert_eq!(
            word(Projection::bits(0, 4, OutputType::I32), SeriesKind::U16, 0x0007),
            Value::I32(7)
        );
    }

    #[test]
    fn test_bit_fields_and_bools() {
        assert_eq!(
            word(Projection::bits(3, 1, OutputType::Bool), SeriesKind::U8, 0b0000_1000),
            Value::Bool(true)
        );
        assert_eq!(
            word(Projection::bits(2, 1, OutputType::Bool), SeriesKind::U8, 0b0000_1000),
            Value::Bool(false)
        );
        assert_eq!(
            word(Projection::bits(8, 8, OutputType::U8), SeriesKind::U32, 0x00AB_CD00),
            Value::U8(0xCD)
        );
    }

    #[test]
    fn test_flip_swaps_within_declared_width() {
        assert_eq!(
            word(Projection::full(OutputType::U16).flipped(), SeriesKind::U16, 0x1234),
            Value::U16(0x3412)
        );
        assert_eq!(
            word(Projection::full(OutputType::U32).flipped(), SeriesKind::U32, 0x1122_3344),
            Value::U32(0x4433_2211)
        );
    }

    #[test]
    fn test_float_reinterpretation() {
        let bits = u64::from(1.5f32.to_bits());
        assert_eq!(word(Projection::full(OutputType::F32), SeriesKind::U32, bits), Value::F32(1.5));
        assert_eq!(
            word(Projection::full(OutputType::F64), SeriesKind::U64, 0.25f64.to_bits()),
            Value::F64(0.25)
        );
        assert!(Projection::full(OutputType::F32).resolve(SeriesKind::U16).is_err());
    }

    #[test]
    fn test_frame_fields_cross_byte_boundaries() {
        let frame = Bytes::from_static(&[0x34, 0x12, 0xF0, 0x0F]);
        let kind = SeriesKind::Frame { len: 4 };
        let u16_at_0 = Projection::bits(0, 16, OutputType::U16).resolve(kind).unwrap();
        assert_eq!(u16_at_0.project_frame(&frame), Value::U16(0x1234));
        let straddling = Projection::bits(12, 8, OutputType::U8).resolve(kind).unwrap();
        assert_eq!(straddling.project_frame(&frame), Value::U8(0x01));
        let last_bit = Projection::bits(31, 1, OutputType::Bool).resolve(kind).unwrap();
        assert_eq!(last_bit.project_frame(&frame), Value::Bool(false));
        let whole = Projection::natural(kind).resolve(kind).unwrap();
        assert_eq!(whole.project_frame(&frame), Value::Bytes(frame.clone()));
    }

    #[test]
    fn test_invalid_projections_are_rejected() {
        let err = |p: Projection, k: SeriesKind| p.resolve(k).unwrap_err();
        assert!(matches!(
            err(Projection::bits(4, 8, OutputType::U8), SeriesKind::U8),
            ScopeError::InvalidProjection { .. }
        ));
        assert!(matches!(
            err(Projection::bits(3, 0, OutputType::U8), SeriesKind::U8),
            ScopeError::InvalidProjection { .. }
        ));
        assert!(matches!(
            err(Projection::bits(0, 8, OutputType::U8), SeriesKind::Real),
            ScopeError::InvalidProjection { .. }
        ));
        assert!(matches!(
            err(Projection::full(OutputType::U32), SeriesKind::Frame { len: 4 }),
            ScopeError::InvalidProjection { .. }
        ));
        assert!(matches!(
            err(Projection::full(OutputType::Bytes), SeriesKind::U32),
            ScopeError::InvalidProjection { .. }
        ));
        assert!(matches!(
            err(Projection::bits(30, 8, OutputType::U8), SeriesKind::Frame { len: 4 }),
            ScopeError::InvalidProjection { .. }
        ));
    }

    #[test]
    fn test_helpers() {
        assert_eq!(mask(0), 0);
        assert_eq!(mask(5), 0b11111);
        assert_eq!(mask(64), u64::MAX);
        assert_eq!(sign_extend(0b1, 1), -1);
        assert_eq!(sign_extend(0x7F, 8), 127);
        assert_eq!(flip_field(0x00AB, 12), 0xAB00);
        assert_eq!(gather_bits(&[0xFF], 4, 8), 0x0F);
    }

    #[test]
    fn test_plotting_values() {
        assert_eq!(Value::Bool(true).as_f64(), Some(1.0));
        assert_eq!(Value::I16(-3).as_f64(), Some(-3.0));
        assert_eq!(Value::Bytes(Bytes::new()).as_f64(), None);
        assert_eq!(Value::Bytes(Bytes::from_static(&[0xAB, 0x01])).to_string(), "ab01");
    }
}
