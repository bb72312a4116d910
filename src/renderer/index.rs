//! Index expressions and copy loop nests
//!
//! A copy between the flat shared buffer and the locally shaped array is
//! a loop per dimension with a single assignment in the innermost body.
//! The flat side is always linearized as
//! `i(N-1) + i(N-2)*strides[N-2] + ... + i0*strides[0]`, on unpack and on
//! pack alike, so that a copy out followed by a copy back is the identity
//! whenever no fixed-point shift is involved.
//!
//! Fixed-point types shift on the way through: unpack applies `>> fracs`,
//! pack applies `<< fracs`. Low-order bits dropped by the right shift stay
//! lost; that is the quantization the generated program implements.

use crate::args::{ArgDescriptor, ArgRole};
use crate::dtype::NativeRepr;
use crate::renderer::SourceWriter;

/// Direction of a copy nest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDirection {
    /// Shared buffer -> local array, `>> fracs`
    Unpack,
    /// Local array -> shared buffer, `<< fracs`
    Pack,
}

/// Storage style of the local array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalStyle {
    /// Statically shaped C array, accessed `local[i0][i1]...`
    Nested,
    /// Flat vector, accessed with the same offset as the shared buffer
    Flat,
}

/// Names and conventions of one copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyNames {
    /// Pointer into the shared region (or the by-value scalar variable)
    pub flat: String,
    /// Local array (or local scalar)
    pub local: String,
    pub style: LocalStyle,
    /// Cast applied to the right-hand side
    pub cast: Option<String>,
}

impl CopyNames {
    pub fn new(flat: impl Into<String>, local: impl Into<String>, style: LocalStyle) -> Self {
        Self {
            flat: flat.into(),
            local: local.into(),
            style,
            cast: None,
        }
    }

    pub fn with_cast(mut self, cast: impl Into<String>) -> Self {
        self.cast = Some(cast.into());
        self
    }
}

/// Structured form of an emitted copy
///
/// The same value is rendered to source text and can be evaluated in
/// process, so properties checked by evaluation hold for the emitted code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyNest {
    direction: CopyDirection,
    shape: Vec<usize>,
    strides: Vec<usize>,
    shift: u8,
    native: NativeRepr,
    by_value: bool,
    names: CopyNames,
}

impl CopyNest {
    pub fn direction(&self) -> CopyDirection {
        self.direction
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn shift(&self) -> u8 {
        self.shift
    }

    /// Flat index text for the current loop variables
    pub fn flat_index(&self) -> String {
        let rank = self.rank();
        if rank == 0 {
            return "0".to_string();
        }
        let mut expr = format!("i{}", rank - 1);
        for j in (0..rank - 1).rev() {
            expr.push_str(&format!(" + i{}*{}", j, self.strides[j]));
        }
        expr
    }

    fn flat_access(&self) -> String {
        if self.by_value {
            self.names.flat.clone()
        } else {
            format!("{}[{}]", self.names.flat, self.flat_index())
        }
    }

    fn local_access(&self) -> String {
        if self.by_value {
            return self.names.local.clone();
        }
        match self.names.style {
            LocalStyle::Nested => {
                let mut access = self.names.local.clone();
                for i in 0..self.rank() {
                    access.push_str(&format!("[i{i}]"));
                }
                access
            }
            LocalStyle::Flat => format!("{}[{}]", self.names.local, self.flat_index()),
        }
    }

    /// The single assignment statement of the innermost body
    pub fn assignment(&self) -> String {
        let (dst, src, op) = match self.direction {
            CopyDirection::Unpack => (self.local_access(), self.flat_access(), ">>"),
            CopyDirection::Pack => (self.flat_access(), self.local_access(), "<<"),
        };
        let rhs = match &self.names.cast {
            Some(ty) => format!("({ty})({src})"),
            None => src,
        };
        if self.shift > 0 {
            format!("{dst} = {rhs} {op} {};", self.shift)
        } else {
            format!("{dst} = {rhs};")
        }
    }

    /// Render the nest into `w` at its current indentation
    pub fn render_into(&self, w: &mut SourceWriter) {
        if self.by_value || self.rank() == 0 {
            w.line(&self.assignment());
            return;
        }
        for (i, extent) in self.shape.iter().enumerate() {
            w.open(&format!("for (size_t i{i} = 0; i{i} < {extent}; i{i}++)"));
        }
        w.line(&self.assignment());
        for _ in 0..self.rank() {
            w.close();
        }
    }

    pub fn render(&self, indent_size: usize) -> String {
        let mut w = SourceWriter::new(indent_size);
        self.render_into(&mut w);
        w.finish()
    }

    /// Execute the nest over integer images of both sides
    ///
    /// `flat` is the shared buffer, `local` the local array in row-major
    /// order (a nested C array has the same memory order). Values are
    /// wrapped to the native width after every store, as C assignment
    /// into the native type does.
    pub fn evaluate(&self, flat: &mut [i64], local: &mut [i64]) {
        let count: usize = self.shape.iter().product();
        let mut index = vec![0usize; self.rank()];
        for _ in 0..count {
            let off = crate::layout::flat_offset(&index, &self.strides);
            match self.direction {
                CopyDirection::Unpack => {
                    local[off] = wrap(flat[off] >> self.shift, self.native);
                }
                CopyDirection::Pack => {
                    flat[off] = wrap(local[off] << self.shift, self.native);
                }
            }
            // odometer, innermost fastest
            for axis in (0..index.len()).rev() {
                index[axis] += 1;
                if index[axis] < self.shape[axis] {
                    break;
                }
                index[axis] = 0;
            }
        }
    }
}

/// Truncate to the native integer width, sign-extending signed buckets
fn wrap(value: i64, native: NativeRepr) -> i64 {
    let bits = native.bits() as u32;
    if native.is_float() || bits >= 64 {
        return value;
    }
    let masked = value & ((1i64 << bits) - 1);
    if native.is_signed() && (masked >> (bits - 1)) & 1 == 1 {
        masked - (1i64 << bits)
    } else {
        masked
    }
}

/// Builds copy nests for arguments
#[derive(Debug, Clone)]
pub struct IndexEmitter {
    indent_size: usize,
}

impl Default for IndexEmitter {
    fn default() -> Self {
        Self::new(2)
    }
}

impl IndexEmitter {
    pub fn new(indent_size: usize) -> Self {
        Self { indent_size }
    }

    pub fn nest(&self, arg: &ArgDescriptor, names: &CopyNames, direction: CopyDirection) -> CopyNest {
        CopyNest {
            direction,
            shape: arg.layout.shape().to_vec(),
            strides: arg.layout.strides().to_vec(),
            shift: arg.dtype.fracs(),
            native: arg.layout.native(),
            by_value: matches!(arg.role, ArgRole::Scalar(_)),
            names: names.clone(),
        }
    }

    /// Shared buffer -> local array
    pub fn emit_unpack(&self, arg: &ArgDescriptor, names: &CopyNames) -> String {
        self.nest(arg, names, CopyDirection::Unpack)
            .render(self.indent_size)
    }

    /// Local array -> shared buffer
    pub fn emit_pack(&self, arg: &ArgDescriptor, names: &CopyNames) -> String {
        self.nest(arg, names, CopyDirection::Pack)
            .render(self.indent_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{ArgumentSpec, ScalarValue};
    use crate::dtype::{ElementKind, ElementType};
    use rstest::rstest;

    fn tensor(shape: Vec<usize>, dtype: ElementType) -> ArgDescriptor {
        ArgumentSpec::Tensor { shape, dtype }.describe(0).unwrap()
    }

    fn names(style: LocalStyle) -> CopyNames {
        CopyNames::new("arg_0", "arg_top_0", style)
    }

    #[test]
    fn test_unpack_rank2_text() {
        let arg = tensor(vec![4, 3], ElementType::uint(8));
        let text = IndexEmitter::default()
            .emit_unpack(&arg, &names(LocalStyle::Nested).with_cast("uint8_t"));
        assert_eq!(
            text,
            "for (size_t i0 = 0; i0 < 4; i0++) {\n\
             \x20 for (size_t i1 = 0; i1 < 3; i1++) {\n\
             \x20   arg_top_0[i0][i1] = (uint8_t)(arg_0[i1 + i0*3]);\n\
             \x20 }\n\
             }\n"
        );
    }

    #[rstest]
    #[case(vec![7], "i0")]
    #[case(vec![4, 3], "i1 + i0*3")]
    #[case(vec![2, 3, 4], "i2 + i1*4 + i0*12")]
    #[case(vec![], "0")]
    fn test_flat_index(#[case] shape: Vec<usize>, #[case] expected: &str) {
        let arg = tensor(shape, ElementType::int(32));
        let nest = IndexEmitter::default().nest(&arg, &names(LocalStyle::Flat), CopyDirection::Pack);
        assert_eq!(nest.flat_index(), expected);
    }

    #[test]
    fn test_pack_uses_left_shift() {
        let dtype = ElementType::new(ElementKind::Int, 16, 4).unwrap();
        let arg = tensor(vec![2, 2], dtype);
        let nest = IndexEmitter::default().nest(&arg, &names(LocalStyle::Flat), CopyDirection::Pack);
        assert_eq!(
            nest.assignment(),
            "arg_0[i1 + i0*2] = arg_top_0[i1 + i0*2] << 4;"
        );
    }

    #[test]
    fn test_scalar_single_assignment() {
        let dtype = ElementType::new(ElementKind::Int, 16, 8).unwrap();
        let arg = ArgumentSpec::Scalar {
            dtype,
            value: ScalarValue::Int(896),
        }
        .describe(0)
        .unwrap();
        let text = IndexEmitter::default()
            .emit_unpack(&arg, &names(LocalStyle::Nested).with_cast("int16_t"));
        assert_eq!(text, "arg_top_0 = (int16_t)(arg_0) >> 8;\n");

        let nest = IndexEmitter::default().nest(
            &arg,
            &names(LocalStyle::Nested),
            CopyDirection::Unpack,
        );
        let mut flat = [896i64];
        let mut local = [0i64];
        nest.evaluate(&mut flat, &mut local);
        assert_eq!(local[0], 3);
    }

    #[test]
    fn test_rank0_tensor_has_no_loops() {
        let arg = tensor(vec![], ElementType::int(8));
        let text = IndexEmitter::default().emit_pack(&arg, &names(LocalStyle::Nested));
        assert_eq!(text, "arg_0[0] = arg_top_0;\n");
    }

    #[test]
    fn test_loop_count_matches_rank() {
        let arg = tensor(vec![2, 3, 4, 5], ElementType::float32());
        let text = IndexEmitter::new(4).emit_unpack(&arg, &names(LocalStyle::Nested));
        assert_eq!(text.matches("for (").count(), 4);
        assert_eq!(text.matches('=').count(), 5);
        assert!(text.contains("                arg_top_0[i0][i1][i2][i3] = arg_0[i3 + i2*5 + i1*20 + i0*60];"));
    }

    #[rstest]
    #[case(300, NativeRepr::I8, 44)]
    #[case(200, NativeRepr::I8, -56)]
    #[case(200, NativeRepr::U8, 200)]
    #[case(-1, NativeRepr::U16, 65535)]
    #[case(1 << 40, NativeRepr::I64, 1 << 40)]
    fn test_wrap(#[case] value: i64, #[case] native: NativeRepr, #[case] expected: i64) {
        assert_eq!(wrap(value, native), expected);
    }
}
