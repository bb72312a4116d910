//! Kernel arguments as handed over by the compiler's argument binder

use serde::{Deserialize, Serialize};

use crate::dtype::ElementType;
use crate::error::{MarshalError, Result};
use crate::layout::Layout;

/// Payload of a scalar argument
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Int(i64),
    Float(f64),
}

impl ScalarValue {
    /// C literal for the payload
    pub fn render(&self) -> String {
        match self {
            ScalarValue::Int(v) => format!("{v}"),
            ScalarValue::Float(v) => {
                let s = format!("{v}");
                if s.contains('.') || s.contains('e') || s.contains("inf") || s.contains("NaN") {
                    format!("{s}f")
                } else {
                    format!("{s}.0f")
                }
            }
        }
    }
}

/// Scalar argument: passed by value, never gets a shared region
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalarArgument {
    pub dtype: ElementType,
    pub value: ScalarValue,
}

impl ScalarArgument {
    pub fn new(dtype: ElementType, value: ScalarValue) -> Self {
        Self { dtype, value }
    }

    /// Encode a real value at the type's fixed-point scale
    ///
    /// Integer types store `real * 2^fracs`, truncated toward zero and
    /// saturated at the `i64` range.
    /// Float types keep the value as is.
    pub fn from_real(dtype: ElementType, real: f64) -> Self {
        let value = if dtype.native().is_float() {
            ScalarValue::Float(real)
        } else {
            ScalarValue::Int((real * 2f64.powi(dtype.fracs() as i32)) as i64)
        };
        Self { dtype, value }
    }
}

/// Tensor argument backed by a caller-owned buffer
///
/// The buffer is borrowed for one marshaling session: its contents are
/// copied into a shared region before the external program runs and
/// overwritten with the region's contents afterwards.
#[derive(Debug)]
pub struct TensorArgument<'a> {
    pub shape: Vec<usize>,
    pub dtype: ElementType,
    pub data: &'a mut [u8],
}

impl<'a> TensorArgument<'a> {
    pub fn new(shape: Vec<usize>, dtype: ElementType, data: &'a mut [u8]) -> Self {
        Self { shape, dtype, data }
    }
}

/// One entry of a kernel argument list
#[derive(Debug)]
pub enum KernelArg<'a> {
    Tensor(TensorArgument<'a>),
    Scalar(ScalarArgument),
}

impl KernelArg<'_> {
    pub fn dtype(&self) -> ElementType {
        match self {
            KernelArg::Tensor(t) => t.dtype,
            KernelArg::Scalar(s) => s.dtype,
        }
    }

    pub fn is_tensor(&self) -> bool {
        matches!(self, KernelArg::Tensor(_))
    }

    /// Compute the layout and check the caller buffer against it
    pub fn describe(&self, index: usize) -> Result<ArgDescriptor> {
        match self {
            KernelArg::Tensor(t) => {
                let layout = Layout::new(&t.shape, &t.dtype)?;
                if t.data.len() < layout.byte_size() {
                    return Err(MarshalError::BufferSizeMismatch {
                        index,
                        expected: layout.byte_size(),
                        actual: t.data.len(),
                    });
                }
                Ok(ArgDescriptor {
                    index,
                    dtype: t.dtype,
                    layout,
                    role: ArgRole::Tensor,
                })
            }
            KernelArg::Scalar(s) => Ok(ArgDescriptor {
                index,
                dtype: s.dtype,
                layout: Layout::scalar(&s.dtype),
                role: ArgRole::Scalar(s.value),
            }),
        }
    }
}

/// Whether an argument travels through a shared region or by value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArgRole {
    Tensor,
    Scalar(ScalarValue),
}

/// Data-free description of an argument, everything code generation needs
#[derive(Debug, Clone, PartialEq)]
pub struct ArgDescriptor {
    pub index: usize,
    pub dtype: ElementType,
    pub layout: Layout,
    pub role: ArgRole,
}

impl ArgDescriptor {
    pub fn is_tensor(&self) -> bool {
        matches!(self.role, ArgRole::Tensor)
    }
}

/// Serializable argument description (no data)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "arg", rename_all = "lowercase")]
pub enum ArgumentSpec {
    Tensor {
        shape: Vec<usize>,
        dtype: ElementType,
    },
    Scalar {
        dtype: ElementType,
        value: ScalarValue,
    },
}

impl ArgumentSpec {
    pub fn describe(&self, index: usize) -> Result<ArgDescriptor> {
        match self {
            ArgumentSpec::Tensor { shape, dtype } => Ok(ArgDescriptor {
                index,
                dtype: *dtype,
                layout: Layout::new(shape, dtype)?,
                role: ArgRole::Tensor,
            }),
            ArgumentSpec::Scalar { dtype, value } => Ok(ArgDescriptor {
                index,
                dtype: *dtype,
                layout: Layout::scalar(dtype),
                role: ArgRole::Scalar(*value),
            }),
        }
    }
}

/// Name and arity of the kernel being marshaled for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSignature {
    pub name: String,
    pub arity: usize,
}

impl KernelSignature {
    pub fn new(name: impl Into<String>, arity: usize) -> Self {
        Self {
            name: name.into(),
            arity,
        }
    }

    /// Fail with `ArgumentCountMismatch` unless exactly `actual` arguments fit
    pub fn check_arity(&self, actual: usize) -> Result<()> {
        if actual != self.arity {
            return Err(MarshalError::ArgumentCountMismatch {
                kernel: self.name.clone(),
                expected: self.arity,
                actual,
            });
        }
        Ok(())
    }
}

/// Kernel name, argument descriptions and kernel body, as read from JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelDescription {
    pub kernel: String,
    pub args: Vec<ArgumentSpec>,
    #[serde(default)]
    pub body: String,
}

impl KernelDescription {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Signature taking exactly the described arguments
    pub fn signature(&self) -> KernelSignature {
        KernelSignature::new(&self.kernel, self.args.len())
    }

    pub fn describe(&self) -> Result<Vec<ArgDescriptor>> {
        self.args
            .iter()
            .enumerate()
            .map(|(i, spec)| spec.describe(i))
            .collect()
    }
}
