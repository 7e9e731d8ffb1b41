//! PLC value and type model
//!
//! [`PlcValue`] is what flows on the data stream; [`PlcType`] is the locally
//! resolved descriptor a handle is bound to.

use errors::{AdsRxError, AdsRxResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default length of an unqualified `STRING`
pub const DEFAULT_STRING_LEN: usize = 80;

/// Dynamically typed PLC value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum PlcValue {
    Bool(bool),
    SInt(i8),
    USInt(u8),
    Int(i16),
    UInt(u16),
    DInt(i32),
    UDInt(u32),
    LInt(i64),
    ULInt(u64),
    Real(f32),
    LReal(f64),
    String(String),
    Array(Vec<PlcValue>),
    /// Fields in declaration order
    Struct(Vec<(String, PlcValue)>),
}

impl PlcValue {
    /// Name of the variant, used in mismatch errors
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "BOOL",
            Self::SInt(_) => "SINT",
            Self::USInt(_) => "USINT",
            Self::Int(_) => "INT",
            Self::UInt(_) => "UINT",
            Self::DInt(_) => "DINT",
            Self::UDInt(_) => "UDINT",
            Self::LInt(_) => "LINT",
            Self::ULInt(_) => "ULINT",
            Self::Real(_) => "REAL",
            Self::LReal(_) => "LREAL",
            Self::String(_) => "STRING",
            Self::Array(_) => "ARRAY",
            Self::Struct(_) => "STRUCT",
        }
    }

    /// Field of a struct value by name (case-insensitive)
    pub fn field(&self, name: &str) -> Option<&PlcValue> {
        match self {
            Self::Struct(fields) => fields
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Walk a dotted field path (`Motor.Speed`) through nested structs
    pub fn path(&self, dotted: &str) -> Option<&PlcValue> {
        dotted
            .split('.')
            .filter(|s| !s.is_empty())
            .try_fold(self, |value, segment| value.field(segment))
    }

    /// Replace a nested field; the new value must have the same kind as the old one
    pub fn set_path(&mut self, dotted: &str, value: PlcValue) -> AdsRxResult<()> {
        let mut current = self;
        for segment in dotted.split('.').filter(|s| !s.is_empty()) {
            current = match current {
                Self::Struct(fields) => fields
                    .iter_mut()
                    .find(|(n, _)| n.eq_ignore_ascii_case(segment))
                    .map(|(_, v)| v)
                    .ok_or_else(|| AdsRxError::UnknownVariable(dotted.to_string()))?,
                other => {
                    return Err(AdsRxError::TypeMismatch {
                        expected: "STRUCT".to_string(),
                        actual: other.kind().to_string(),
                    })
                },
            };
        }
        if current.kind() != value.kind() {
            return Err(AdsRxError::TypeMismatch {
                expected: current.kind().to_string(),
                actual: value.kind().to_string(),
            });
        }
        *current = value;
        Ok(())
    }
}

impl fmt::Display for PlcValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::SInt(v) => write!(f, "{}", v),
            Self::USInt(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::UInt(v) => write!(f, "{}", v),
            Self::DInt(v) => write!(f, "{}", v),
            Self::UDInt(v) => write!(f, "{}", v),
            Self::LInt(v) => write!(f, "{}", v),
            Self::ULInt(v) => write!(f, "{}", v),
            Self::Real(v) => write!(f, "{}", v),
            Self::LReal(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "'{}'", v),
            Self::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            },
            Self::Struct(fields) => {
                write!(f, "{{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", name, value)?;
                }
                write!(f, "}}")
            },
        }
    }
}

macro_rules! impl_value_conversions {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for PlcValue {
                fn from(v: $ty) -> Self {
                    PlcValue::$variant(v)
                }
            }

            impl TryFrom<PlcValue> for $ty {
                type Error = AdsRxError;

                fn try_from(value: PlcValue) -> Result<Self, Self::Error> {
                    match value {
                        PlcValue::$variant(v) => Ok(v),
                        other => Err(AdsRxError::TypeMismatch {
                            expected: stringify!($variant).to_uppercase(),
                            actual: other.kind().to_string(),
                        }),
                    }
                }
            }
        )*
    };
}

impl_value_conversions! {
    bool => Bool,
    i8 => SInt,
    u8 => USInt,
    i16 => Int,
    u16 => UInt,
    i32 => DInt,
    u32 => UDInt,
    i64 => LInt,
    u64 => ULInt,
    f32 => Real,
    f64 => LReal,
    String => String,
}

impl From<&str> for PlcValue {
    fn from(v: &str) -> Self {
        PlcValue::String(v.to_string())
    }
}

impl<T: Into<PlcValue>> From<Vec<T>> for PlcValue {
    fn from(items: Vec<T>) -> Self {
        PlcValue::Array(items.into_iter().map(Into::into).collect())
    }
}

/// One field of a structured layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldLayout {
    pub name: String,
    /// Byte offset inside the parent
    pub offset: usize,
    pub ty: PlcType,
}

/// Fixed byte layout of a remote compound type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructLayout {
    /// Remote type name
    pub name: String,
    pub fields: Vec<FieldLayout>,
    /// Total size in bytes, including trailing padding
    pub size: usize,
}

impl StructLayout {
    /// Lay fields out back to back (pack mode 1, the default for ADS)
    pub fn packed(name: impl Into<String>, fields: Vec<(String, PlcType)>) -> Self {
        let mut offset = 0;
        let fields = fields
            .into_iter()
            .map(|(name, ty)| {
                let field = FieldLayout { name, offset, ty };
                offset = offset.saturating_add(field.ty.size());
                field
            })
            .collect();
        Self {
            name: name.into(),
            fields,
            size: offset,
        }
    }
}

/// Locally resolved type of a remote variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlcType {
    Bool,
    SInt,
    USInt,
    Int,
    UInt,
    DInt,
    UDInt,
    LInt,
    ULInt,
    Real,
    LReal,
    /// Fixed capacity in characters (a trailing NUL is added on the wire)
    String(usize),
    /// Element type and element count (`None` when the declaration carries no bounds)
    Array(Box<PlcType>, Option<usize>),
    Struct(StructLayout),
}

impl PlcType {
    /// Array and string types need a known length before they can be read
    pub fn is_array_like(&self) -> bool {
        matches!(self, Self::String(_) | Self::Array(..))
    }

    /// Size of one value on the wire, saturating at `usize::MAX`
    pub fn size(&self) -> usize {
        self.checked_size().unwrap_or(usize::MAX)
    }

    /// Size of one value on the wire; `None` when it does not fit a `usize`
    pub fn checked_size(&self) -> Option<usize> {
        match self {
            Self::Bool | Self::SInt | Self::USInt => Some(1),
            Self::Int | Self::UInt => Some(2),
            Self::DInt | Self::UDInt | Self::Real => Some(4),
            Self::LInt | Self::ULInt | Self::LReal => Some(8),
            Self::String(len) => len.checked_add(1),
            Self::Array(elem, len) => elem.checked_size()?.checked_mul(len.unwrap_or(0)),
            Self::Struct(layout) => Some(layout.size),
        }
    }

    /// Same type with the given length (arrays: element count, strings: capacity)
    pub fn with_length(&self, length: usize) -> PlcType {
        match self {
            Self::String(_) => Self::String(length),
            Self::Array(elem, _) => Self::Array(elem.clone(), Some(length)),
            other => other.clone(),
        }
    }

    /// [`with_length`](Self::with_length) for a read request
    ///
    /// Rejects lengths whose byte size overflows.
    pub fn sized_for_read(&self, variable: &str, length: usize) -> AdsRxResult<PlcType> {
        let ty = self.with_length(length);
        match ty.checked_size() {
            Some(_) => Ok(ty),
            None => Err(AdsRxError::InvalidConfig {
                field: variable.to_string(),
                reason: format!("length {} of {} overflows the read size", length, self),
            }),
        }
    }

    /// Zero value of this type
    pub fn default_value(&self) -> PlcValue {
        match self {
            Self::Bool => PlcValue::Bool(false),
            Self::SInt => PlcValue::SInt(0),
            Self::USInt => PlcValue::USInt(0),
            Self::Int => PlcValue::Int(0),
            Self::UInt => PlcValue::UInt(0),
            Self::DInt => PlcValue::DInt(0),
            Self::UDInt => PlcValue::UDInt(0),
            Self::LInt => PlcValue::LInt(0),
            Self::ULInt => PlcValue::ULInt(0),
            Self::Real => PlcValue::Real(0.0),
            Self::LReal => PlcValue::LReal(0.0),
            Self::String(_) => PlcValue::String(String::new()),
            Self::Array(elem, len) => {
                PlcValue::Array(vec![elem.default_value(); len.unwrap_or(0)])
            },
            Self::Struct(layout) => PlcValue::Struct(
                layout
                    .fields
                    .iter()
                    .map(|f| (f.name.clone(), f.ty.default_value()))
                    .collect(),
            ),
        }
    }

    /// Convert a remote primitive type name (`DINT`, `STRING(80)`,
    /// `ARRAY [0..9] OF REAL`, ...) into a local type
    ///
    /// Returns `None` for names that are not primitives, i.e. compound types.
    pub fn from_plc_name(name: &str) -> Option<PlcType> {
        let name = name.trim().to_uppercase();
        let ty = match name.as_str() {
            "BIT" | "BIT8" | "BOOL" => Self::Bool,
            "SINT" | "INT8" => Self::SInt,
            "BITARR8" | "USINT" | "UINT8" | "BYTE" => Self::USInt,
            "INT16" | "INT" => Self::Int,
            "WORD" | "BITARR16" | "UINT16" | "UINT" => Self::UInt,
            "INT32" | "DINT" => Self::DInt,
            "BITARR32" | "DWORD" | "UINT32" | "UDINT" => Self::UDInt,
            "INT64" | "LINT" => Self::LInt,
            "UINT64" | "ULINT" | "LWORD" => Self::ULInt,
            "FLOAT" | "REAL" => Self::Real,
            "DOUBLE" | "LREAL" => Self::LReal,
            "STRING" => Self::String(DEFAULT_STRING_LEN),
            _ => return Self::parse_composite_name(&name),
        };
        Some(ty)
    }

    fn parse_composite_name(name: &str) -> Option<PlcType> {
        if let Some(inner) = name
            .strip_prefix("STRING(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            return inner.trim().parse().ok().map(Self::String);
        }

        let rest = name.strip_prefix("ARRAY")?.trim_start();
        let rest = rest.strip_prefix('[')?;
        let (bounds, element) = rest.split_once(']')?;
        let element = element.trim_start().strip_prefix("OF")?.trim();
        let elem = Self::from_plc_name(element)?;
        Some(Self::Array(Box::new(elem), parse_bounds(bounds)))
    }

    /// Parse console text into a value of this type
    ///
    /// Scalars and strings take plain text; arrays and structs take the JSON
    /// form of [`PlcValue`].
    pub fn parse_value(&self, text: &str) -> AdsRxResult<PlcValue> {
        let text = text.trim();
        let mismatch = || AdsRxError::TypeMismatch {
            expected: self.to_string(),
            actual: text.to_string(),
        };
        macro_rules! num {
            ($variant:ident) => {
                text.parse().map(PlcValue::$variant).map_err(|_| mismatch())
            };
        }

        match self {
            Self::Bool => match text.to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(PlcValue::Bool(true)),
                "false" | "0" => Ok(PlcValue::Bool(false)),
                _ => Err(mismatch()),
            },
            Self::SInt => num!(SInt),
            Self::USInt => num!(USInt),
            Self::Int => num!(Int),
            Self::UInt => num!(UInt),
            Self::DInt => num!(DInt),
            Self::UDInt => num!(UDInt),
            Self::LInt => num!(LInt),
            Self::ULInt => num!(ULInt),
            Self::Real => num!(Real),
            Self::LReal => num!(LReal),
            Self::String(_) => Ok(PlcValue::String(text.to_string())),
            Self::Array(..) | Self::Struct(_) => {
                serde_json::from_str(text).map_err(|_| mismatch())
            },
        }
    }
}

/// Element count of `lo..hi[, lo..hi]` bounds; `None` if they don't parse
/// or the count overflows
fn parse_bounds(bounds: &str) -> Option<usize> {
    bounds.split(',').try_fold(1usize, |count, dim| {
        let (lo, hi) = dim.split_once("..")?;
        let lo: i64 = lo.trim().parse().ok()?;
        let hi: i64 = hi.trim().parse().ok()?;
        if hi < lo {
            return None;
        }
        let extent = hi.checked_sub(lo)?.checked_add(1)?;
        count.checked_mul(usize::try_from(extent).ok()?)
    })
}

impl fmt::Display for PlcType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(len) => write!(f, "STRING({})", len),
            Self::Array(elem, Some(len)) => write!(f, "ARRAY [0..{}] OF {}", len.saturating_sub(1), elem),
            Self::Array(elem, None) => write!(f, "ARRAY [*] OF {}", elem),
            Self::Struct(layout) => write!(f, "{}", layout.name),
            other => write!(f, "{}", other.default_value().kind()),
        }
    }
}
