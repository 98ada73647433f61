//! Scalar storage kinds - the native element types of point buffers.

use bytemuck::{Pod, Zeroable};
use std::fmt;

/// Native scalar storage kind of a point buffer element.
///
/// Each kind has a fixed width and a well-defined binary representation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ScalarKind {
    /// Boolean (stored as u8: 0 = false, non-zero = true)
    Boolean = 0,
    /// Signed 8-bit integer
    Int8 = 1,
    /// Unsigned 8-bit integer
    Uint8 = 2,
    /// Signed 16-bit integer
    Int16 = 3,
    /// Unsigned 16-bit integer
    Uint16 = 4,
    /// Signed 32-bit integer
    Int32 = 5,
    /// Unsigned 32-bit integer
    Uint32 = 6,
    /// Signed 64-bit integer
    Int64 = 7,
    /// Unsigned 64-bit integer
    Uint64 = 8,
    /// 32-bit floating point
    Float32 = 9,
    /// 64-bit floating point
    Float64 = 10,
}

impl ScalarKind {
    /// Kinds a buffer may be bound with. `Uint64` cannot round-trip through
    /// the signed 64-bit record representation and is refused.
    pub const BINDABLE: [ScalarKind; 10] = [
        Self::Int8,
        Self::Uint8,
        Self::Int16,
        Self::Uint16,
        Self::Int32,
        Self::Uint32,
        Self::Int64,
        Self::Boolean,
        Self::Float32,
        Self::Float64,
    ];

    /// Returns the size in bytes of a single element of this kind.
    #[inline]
    pub const fn num_bytes(self) -> usize {
        match self {
            Self::Boolean | Self::Int8 | Self::Uint8 => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Int64 | Self::Uint64 | Self::Float64 => 8,
        }
    }

    /// Returns the name of this kind as a string.
    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Boolean => "bool_t",
            Self::Int8 => "int8_t",
            Self::Uint8 => "uint8_t",
            Self::Int16 => "int16_t",
            Self::Uint16 => "uint16_t",
            Self::Int32 => "int32_t",
            Self::Uint32 => "uint32_t",
            Self::Int64 => "int64_t",
            Self::Uint64 => "uint64_t",
            Self::Float32 => "float32_t",
            Self::Float64 => "float64_t",
        }
    }

    /// Returns true if this is a floating point kind.
    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// Returns true if this is an integer kind (booleans included).
    #[inline]
    pub const fn is_integer(self) -> bool {
        !self.is_float()
    }

    /// Returns true if a buffer of this kind may be bound for I/O.
    #[inline]
    pub fn is_bindable(self) -> bool {
        Self::BINDABLE.contains(&self)
    }

    /// Inclusive integer range this kind can hold, `None` for floats.
    pub const fn integer_range(self) -> Option<(i64, i64)> {
        match self {
            Self::Boolean => Some((0, 1)),
            Self::Int8 => Some((i8::MIN as i64, i8::MAX as i64)),
            Self::Uint8 => Some((0, u8::MAX as i64)),
            Self::Int16 => Some((i16::MIN as i64, i16::MAX as i64)),
            Self::Uint16 => Some((0, u16::MAX as i64)),
            Self::Int32 => Some((i32::MIN as i64, i32::MAX as i64)),
            Self::Uint32 => Some((0, u32::MAX as i64)),
            Self::Int64 => Some((i64::MIN, i64::MAX)),
            Self::Uint64 => Some((0, i64::MAX)),
            Self::Float32 | Self::Float64 => None,
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Boolean type with guaranteed 1-byte storage.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Pod, Zeroable)]
#[repr(transparent)]
pub struct Bool(u8);

impl Bool {
    pub const TRUE: Self = Self(1);
    pub const FALSE: Self = Self(0);

    #[inline]
    pub const fn new(v: bool) -> Self {
        Self(v as u8)
    }

    #[inline]
    pub const fn get(self) -> bool {
        self.0 != 0
    }
}

impl From<bool> for Bool {
    #[inline]
    fn from(v: bool) -> Self {
        Self::new(v)
    }
}

impl From<Bool> for bool {
    #[inline]
    fn from(v: Bool) -> Self {
        v.get()
    }
}

impl fmt::Debug for Bool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_sizes() {
        assert_eq!(ScalarKind::Boolean.num_bytes(), 1);
        assert_eq!(ScalarKind::Uint8.num_bytes(), 1);
        assert_eq!(ScalarKind::Uint16.num_bytes(), 2);
        assert_eq!(ScalarKind::Int32.num_bytes(), 4);
        assert_eq!(ScalarKind::Float32.num_bytes(), 4);
        assert_eq!(ScalarKind::Float64.num_bytes(), 8);
    }

    #[test]
    fn test_bindable() {
        assert!(ScalarKind::Float64.is_bindable());
        assert!(ScalarKind::Boolean.is_bindable());
        assert!(!ScalarKind::Uint64.is_bindable());
    }

    #[test]
    fn test_integer_range() {
        assert_eq!(ScalarKind::Uint16.integer_range(), Some((0, 65535)));
        assert_eq!(ScalarKind::Int8.integer_range(), Some((-128, 127)));
        assert_eq!(ScalarKind::Float32.integer_range(), None);
    }

    #[test]
    fn test_bool_type() {
        assert!(Bool::new(true).get());
        assert!(!Bool::new(false).get());
        assert_eq!(std::mem::size_of::<Bool>(), 1);
    }
}
