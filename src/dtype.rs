//! Element type classification
//!
//! Maps the compiler's abstract element types onto the native storage
//! buckets used on both sides of the shared-memory boundary, and renders
//! the type names the generated host programs refer to.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MarshalError, Result};

/// Type codes as packed by the compiler's type metadata
pub const TYPE_CODE_INT: u8 = 0;
pub const TYPE_CODE_UINT: u8 = 1;
pub const TYPE_CODE_FLOAT: u8 = 2;

/// Widest fractional part a shift on 64-bit native storage can carry
pub const MAX_FRACS: u8 = 63;

/// Scalar kind of a tensor element
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Int,
    UInt,
    Float,
}

/// Packed type metadata as produced by the compiler
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RawDataType {
    pub code: u8,
    pub bits: u8,
    pub lanes: u16,
    pub fracs: u8,
}

impl RawDataType {
    pub fn new(code: u8, bits: u8, fracs: u8) -> Self {
        Self {
            code,
            bits,
            lanes: 1,
            fracs,
        }
    }
}

/// Logical element type: kind, declared bit width and fractional bits
///
/// Invariants: `fracs <= bits`, `bits > 0`, and floats carry no
/// fractional bits. Construct through [`ElementType::new`] or by
/// converting a [`RawDataType`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(try_from = "ElementTypeFields")]
pub struct ElementType {
    kind: ElementKind,
    bits: u8,
    fracs: u8,
}

#[derive(Deserialize)]
struct ElementTypeFields {
    kind: ElementKind,
    bits: u8,
    #[serde(default)]
    fracs: u8,
}

impl TryFrom<ElementTypeFields> for ElementType {
    type Error = MarshalError;

    fn try_from(f: ElementTypeFields) -> Result<Self> {
        ElementType::new(f.kind, f.bits, f.fracs)
    }
}

impl ElementType {
    pub fn new(kind: ElementKind, bits: u8, fracs: u8) -> Result<Self> {
        if bits == 0 {
            return Err(MarshalError::InvalidElementType(
                "bit width must be positive".to_string(),
            ));
        }
        if fracs > bits {
            return Err(MarshalError::InvalidElementType(format!(
                "{fracs} fractional bits exceed bit width {bits}"
            )));
        }
        if fracs > MAX_FRACS {
            return Err(MarshalError::InvalidElementType(format!(
                "{fracs} fractional bits exceed the {MAX_FRACS}-bit shift range"
            )));
        }
        if kind == ElementKind::Float && fracs != 0 {
            return Err(MarshalError::InvalidElementType(
                "float types cannot carry fractional bits".to_string(),
            ));
        }
        Ok(Self { kind, bits, fracs })
    }

    /// Plain signed integer. Panics if `bits` is zero.
    pub fn int(bits: u8) -> Self {
        assert!(bits > 0, "integer width must be positive");
        Self {
            kind: ElementKind::Int,
            bits,
            fracs: 0,
        }
    }

    /// Plain unsigned integer. Panics if `bits` is zero.
    pub fn uint(bits: u8) -> Self {
        assert!(bits > 0, "integer width must be positive");
        Self {
            kind: ElementKind::UInt,
            bits,
            fracs: 0,
        }
    }

    pub fn float32() -> Self {
        Self {
            kind: ElementKind::Float,
            bits: 32,
            fracs: 0,
        }
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    pub fn fracs(&self) -> u8 {
        self.fracs
    }

    pub fn is_fixed_point(&self) -> bool {
        self.fracs > 0
    }

    /// Native storage bucket for this type
    pub fn native(&self) -> NativeRepr {
        classify(self)
    }

    /// Arbitrary-precision HLS type used for kernel-side locals
    ///
    /// `ap_fixed<W, I>` takes the total width and the integer width.
    pub fn hls_type_name(&self) -> String {
        match (self.kind, self.fracs) {
            (ElementKind::Float, _) => "float".to_string(),
            (ElementKind::Int, 0) => format!("ap_int<{}>", self.bits),
            (ElementKind::UInt, 0) => format!("ap_uint<{}>", self.bits),
            (ElementKind::Int, f) => format!("ap_fixed<{}, {}>", self.bits, self.bits - f),
            (ElementKind::UInt, f) => format!("ap_ufixed<{}, {}>", self.bits, self.bits - f),
        }
    }

    /// Fixed-point representation of the scaled value as stored in the
    /// shared buffer: `fracs` extra bits below the declared width.
    pub fn external_type_name(&self) -> String {
        let total = self.bits as u32 + self.fracs as u32;
        match (self.kind, self.fracs) {
            (ElementKind::Float, _) => "float".to_string(),
            (ElementKind::Int, 0) => format!("ap_int<{}>", self.bits),
            (ElementKind::UInt, 0) => format!("ap_uint<{}>", self.bits),
            (ElementKind::Int, _) => format!("ap_fixed<{}, {}>", total, self.bits),
            (ElementKind::UInt, _) => format!("ap_ufixed<{}, {}>", total, self.bits),
        }
    }
}

impl TryFrom<RawDataType> for ElementType {
    type Error = MarshalError;

    fn try_from(raw: RawDataType) -> Result<Self> {
        let unsupported = MarshalError::UnsupportedTypeKind {
            code: raw.code,
            lanes: raw.lanes,
        };
        if raw.lanes != 1 {
            return Err(unsupported);
        }
        let kind = match raw.code {
            TYPE_CODE_INT => ElementKind::Int,
            TYPE_CODE_UINT => ElementKind::UInt,
            TYPE_CODE_FLOAT => ElementKind::Float,
            _ => return Err(unsupported),
        };
        ElementType::new(kind, raw.bits, raw.fracs)
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.kind, self.fracs) {
            (ElementKind::Float, _) => write!(f, "float{}", self.bits),
            (ElementKind::Int, 0) => write!(f, "int{}", self.bits),
            (ElementKind::UInt, 0) => write!(f, "uint{}", self.bits),
            (ElementKind::Int, fr) => write!(f, "fixed{}_{}", self.bits, fr),
            (ElementKind::UInt, fr) => write!(f, "ufixed{}_{}", self.bits, fr),
        }
    }
}

/// Native storage bucket
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum NativeRepr {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
}

impl NativeRepr {
    pub fn size(&self) -> usize {
        match self {
            NativeRepr::I8 | NativeRepr::U8 => 1,
            NativeRepr::I16 | NativeRepr::U16 => 2,
            NativeRepr::I32 | NativeRepr::U32 | NativeRepr::F32 => 4,
            NativeRepr::I64 | NativeRepr::U64 => 8,
        }
    }

    pub fn bits(&self) -> usize {
        self.size() * 8
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            NativeRepr::I8 | NativeRepr::I16 | NativeRepr::I32 | NativeRepr::I64 | NativeRepr::F32
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, NativeRepr::F32)
    }

    /// Fixed-width C type (`<stdint.h>`)
    pub fn c_type_name(&self) -> &'static str {
        match self {
            NativeRepr::I8 => "int8_t",
            NativeRepr::I16 => "int16_t",
            NativeRepr::I32 => "int32_t",
            NativeRepr::I64 => "int64_t",
            NativeRepr::U8 => "uint8_t",
            NativeRepr::U16 => "uint16_t",
            NativeRepr::U32 => "uint32_t",
            NativeRepr::U64 => "uint64_t",
            NativeRepr::F32 => "float",
        }
    }
}

impl fmt::Display for NativeRepr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.c_type_name())
    }
}

/// Classify an element type into its native storage bucket
///
/// Integers round `ceil(bits / 8)` bytes up to 1, 2, 4 or 8 bytes and
/// saturate at 8. Floats always store as a 32-bit float. Fractional bits
/// never change the bucket; they only affect the shift applied by the
/// generated copy code.
pub fn classify(dtype: &ElementType) -> NativeRepr {
    let signed = match dtype.kind {
        ElementKind::Float => return NativeRepr::F32,
        ElementKind::Int => true,
        ElementKind::UInt => false,
    };
    match (dtype.bits.div_ceil(8), signed) {
        (1, true) => NativeRepr::I8,
        (1, false) => NativeRepr::U8,
        (2, true) => NativeRepr::I16,
        (2, false) => NativeRepr::U16,
        (3..=4, true) => NativeRepr::I32,
        (3..=4, false) => NativeRepr::U32,
        (_, true) => NativeRepr::I64,
        (_, false) => NativeRepr::U64,
    }
}

/// Classify raw compiler metadata, failing on kinds without native storage
pub fn classify_raw(raw: RawDataType) -> Result<(ElementType, NativeRepr)> {
    let dtype = ElementType::try_from(raw)?;
    Ok((dtype, classify(&dtype)))
}
