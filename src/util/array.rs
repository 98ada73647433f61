//! Typed, contiguous point arrays.

use bytemuck::{Pod, Zeroable};

use super::{Bool, Error, Result, ScalarKind};

/// A single numeric value moved between a buffer and a record.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
}

impl Scalar {
    /// Value as f64 (integers widened).
    #[inline]
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
        }
    }
}

/// Homogeneous array of one scalar kind.
///
/// One array holds the values of a single field for a run of records.
#[derive(Clone, Debug, PartialEq)]
pub enum PointArray {
    Bool(Vec<Bool>),
    Int8(Vec<i8>),
    Uint8(Vec<u8>),
    Int16(Vec<i16>),
    Uint16(Vec<u16>),
    Int32(Vec<i32>),
    Uint32(Vec<u32>),
    Int64(Vec<i64>),
    Uint64(Vec<u64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

/// Run `$body` with `$v` bound to the inner vector, whatever its type.
macro_rules! with_vec {
    ($arr:expr, $v:ident => $body:expr) => {
        match $arr {
            PointArray::Bool($v) => $body,
            PointArray::Int8($v) => $body,
            PointArray::Uint8($v) => $body,
            PointArray::Int16($v) => $body,
            PointArray::Uint16($v) => $body,
            PointArray::Int32($v) => $body,
            PointArray::Uint32($v) => $body,
            PointArray::Int64($v) => $body,
            PointArray::Uint64($v) => $body,
            PointArray::Float32($v) => $body,
            PointArray::Float64($v) => $body,
        }
    };
}

/// Rebuild an array of the same variant from a transformed inner vector.
macro_rules! map_vec {
    ($arr:expr, $v:ident => $body:expr) => {
        match $arr {
            PointArray::Bool($v) => PointArray::Bool($body),
            PointArray::Int8($v) => PointArray::Int8($body),
            PointArray::Uint8($v) => PointArray::Uint8($body),
            PointArray::Int16($v) => PointArray::Int16($body),
            PointArray::Uint16($v) => PointArray::Uint16($body),
            PointArray::Int32($v) => PointArray::Int32($body),
            PointArray::Uint32($v) => PointArray::Uint32($body),
            PointArray::Int64($v) => PointArray::Int64($body),
            PointArray::Uint64($v) => PointArray::Uint64($body),
            PointArray::Float32($v) => PointArray::Float32($body),
            PointArray::Float64($v) => PointArray::Float64($body),
        }
    };
}

impl PointArray {
    /// Allocate a zero-filled array of `len` elements of `kind`.
    pub fn zeroed(kind: ScalarKind, len: usize) -> Self {
        use bytemuck::allocation::zeroed_vec;
        match kind {
            ScalarKind::Boolean => Self::Bool(zeroed_vec(len)),
            ScalarKind::Int8 => Self::Int8(zeroed_vec(len)),
            ScalarKind::Uint8 => Self::Uint8(zeroed_vec(len)),
            ScalarKind::Int16 => Self::Int16(zeroed_vec(len)),
            ScalarKind::Uint16 => Self::Uint16(zeroed_vec(len)),
            ScalarKind::Int32 => Self::Int32(zeroed_vec(len)),
            ScalarKind::Uint32 => Self::Uint32(zeroed_vec(len)),
            ScalarKind::Int64 => Self::Int64(zeroed_vec(len)),
            ScalarKind::Uint64 => Self::Uint64(zeroed_vec(len)),
            ScalarKind::Float32 => Self::Float32(zeroed_vec(len)),
            ScalarKind::Float64 => Self::Float64(zeroed_vec(len)),
        }
    }

    /// Scalar kind of the elements.
    pub fn kind(&self) -> ScalarKind {
        match self {
            Self::Bool(_) => ScalarKind::Boolean,
            Self::Int8(_) => ScalarKind::Int8,
            Self::Uint8(_) => ScalarKind::Uint8,
            Self::Int16(_) => ScalarKind::Int16,
            Self::Uint16(_) => ScalarKind::Uint16,
            Self::Int32(_) => ScalarKind::Int32,
            Self::Uint32(_) => ScalarKind::Uint32,
            Self::Int64(_) => ScalarKind::Int64,
            Self::Uint64(_) => ScalarKind::Uint64,
            Self::Float32(_) => ScalarKind::Float32,
            Self::Float64(_) => ScalarKind::Float64,
        }
    }

    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        with_vec!(self, v => v.len())
    }

    /// Check if the array is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distance in bytes between consecutive elements.
    #[inline]
    pub fn stride(&self) -> usize {
        with_vec!(self, v => element_size(v))
    }

    /// Typed view of the elements, `None` if `T` is not the element type.
    pub fn as_slice<T: ScanPod>(&self) -> Option<&[T]> {
        T::view(self)
    }

    /// Typed mutable view of the elements.
    pub fn as_mut_slice<T: ScanPod>(&mut self) -> Option<&mut [T]> {
        T::view_mut(self)
    }

    /// Read element `i` as a scalar. `None` for out-of-range indices.
    pub fn get(&self, i: usize) -> Option<Scalar> {
        let s = match self {
            Self::Bool(v) => Scalar::Int(v.get(i)?.get() as i64),
            Self::Int8(v) => Scalar::Int(*v.get(i)? as i64),
            Self::Uint8(v) => Scalar::Int(*v.get(i)? as i64),
            Self::Int16(v) => Scalar::Int(*v.get(i)? as i64),
            Self::Uint16(v) => Scalar::Int(*v.get(i)? as i64),
            Self::Int32(v) => Scalar::Int(*v.get(i)? as i64),
            Self::Uint32(v) => Scalar::Int(*v.get(i)? as i64),
            Self::Int64(v) => Scalar::Int(*v.get(i)?),
            Self::Uint64(v) => Scalar::Int(i64::try_from(*v.get(i)?).ok()?),
            Self::Float32(v) => Scalar::Float(*v.get(i)? as f64),
            Self::Float64(v) => Scalar::Float(*v.get(i)?),
        };
        Some(s)
    }

    /// Store an integer at `i`. Returns false if the value does not fit the
    /// element kind (floats always accept).
    pub fn set_int(&mut self, i: usize, value: i64) -> bool {
        if let Some((min, max)) = self.kind().integer_range() {
            if value < min || value > max {
                return false;
            }
        }
        match self {
            Self::Bool(v) => v[i] = Bool::new(value != 0),
            Self::Int8(v) => v[i] = value as i8,
            Self::Uint8(v) => v[i] = value as u8,
            Self::Int16(v) => v[i] = value as i16,
            Self::Uint16(v) => v[i] = value as u16,
            Self::Int32(v) => v[i] = value as i32,
            Self::Uint32(v) => v[i] = value as u32,
            Self::Int64(v) => v[i] = value,
            Self::Uint64(v) => v[i] = value as u64,
            Self::Float32(v) => v[i] = value as f32,
            Self::Float64(v) => v[i] = value as f64,
        }
        true
    }

    /// Store a float at `i`. Integer kinds truncate toward zero and refuse
    /// values outside their range.
    pub fn set_float(&mut self, i: usize, value: f64) -> bool {
        match self {
            Self::Float32(v) => {
                v[i] = value as f32;
                true
            }
            Self::Float64(v) => {
                v[i] = value;
                true
            }
            _ => {
                if !value.is_finite() {
                    return false;
                }
                let t = value.trunc();
                if t < i64::MIN as f64 || t >= i64::MAX as f64 {
                    return false;
                }
                self.set_int(i, t as i64)
            }
        }
    }

    /// Copy `len` elements from `src[src_start..]` into `self[dst_start..]`.
    pub fn copy_range_from(
        &mut self,
        dst_start: usize,
        src: &PointArray,
        src_start: usize,
        len: usize,
    ) -> Result<()> {
        if self.kind() != src.kind() {
            return Err(Error::type_mismatch(self.kind().name(), src.kind().name()));
        }
        let out_of_range = || Error::IndexOutOfRange {
            index: dst_start.max(src_start).saturating_add(len),
            count: self.len().min(src.len()),
        };
        let dst_end = dst_start.checked_add(len).ok_or_else(out_of_range)?;
        let src_end = src_start.checked_add(len).ok_or_else(out_of_range)?;
        if dst_end > self.len() || src_end > src.len() {
            return Err(out_of_range());
        }
        macro_rules! copy {
            ($($var:ident),*) => {
                match (self, src) {
                    $((Self::$var(d), Self::$var(s)) => {
                        d[dst_start..dst_start + len].copy_from_slice(&s[src_start..src_start + len])
                    })*
                    _ => unreachable!("kinds checked above"),
                }
            };
        }
        copy!(Bool, Int8, Uint8, Int16, Uint16, Int32, Uint32, Int64, Uint64, Float32, Float64);
        Ok(())
    }

    /// Keep only the elements whose `keep` flag is set.
    pub fn filter(&self, keep: &[bool]) -> PointArray {
        map_vec!(self, v => v
            .iter()
            .zip(keep)
            .filter_map(|(x, k)| k.then_some(*x))
            .collect())
    }

    /// Shorten the array to `len` elements.
    pub fn truncate(&mut self, len: usize) {
        with_vec!(self, v => v.truncate(len))
    }

    /// Minimum and maximum over the finite elements selected by `mask` (all
    /// if `None`), widened to f64. `None` when nothing finite is selected.
    pub fn min_max(&self, mask: Option<&[bool]>) -> Option<(f64, f64)> {
        let mut range: Option<(f64, f64)> = None;
        for i in 0..self.len() {
            if let Some(m) = mask {
                if !m.get(i).copied().unwrap_or(false) {
                    continue;
                }
            }
            let Some(value) = self.get(i).map(Scalar::as_f64) else {
                continue;
            };
            if !value.is_finite() {
                continue;
            }
            range = Some(match range {
                None => (value, value),
                Some((lo, hi)) => (lo.min(value), hi.max(value)),
            });
        }
        range
    }

    /// Elements widened to f64.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        (0..self.len())
            .filter_map(|i| self.get(i).map(Scalar::as_f64))
            .collect()
    }
}

#[inline]
fn element_size<T>(_: &[T]) -> usize {
    std::mem::size_of::<T>()
}

impl<T: ScanPod> From<Vec<T>> for PointArray {
    fn from(v: Vec<T>) -> Self {
        T::wrap(v)
    }
}

/// Trait for element types a [`PointArray`] can hold.
pub trait ScanPod: Pod + Zeroable + Copy + Default {
    /// The corresponding scalar kind.
    const KIND: ScalarKind;

    /// Size of this type in bytes.
    const SIZE: usize = std::mem::size_of::<Self>();

    fn wrap(v: Vec<Self>) -> PointArray;
    fn view(a: &PointArray) -> Option<&[Self]>;
    fn view_mut(a: &mut PointArray) -> Option<&mut [Self]>;
}

macro_rules! impl_scan_pod {
    ($ty:ty, $kind:ident, $var:ident) => {
        impl ScanPod for $ty {
            const KIND: ScalarKind = ScalarKind::$kind;

            fn wrap(v: Vec<Self>) -> PointArray {
                PointArray::$var(v)
            }

            fn view(a: &PointArray) -> Option<&[Self]> {
                match a {
                    PointArray::$var(v) => Some(v),
                    _ => None,
                }
            }

            fn view_mut(a: &mut PointArray) -> Option<&mut [Self]> {
                match a {
                    PointArray::$var(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

impl_scan_pod!(Bool, Boolean, Bool);
impl_scan_pod!(i8, Int8, Int8);
impl_scan_pod!(u8, Uint8, Uint8);
impl_scan_pod!(i16, Int16, Int16);
impl_scan_pod!(u16, Uint16, Uint16);
impl_scan_pod!(i32, Int32, Int32);
impl_scan_pod!(u32, Uint32, Uint32);
impl_scan_pod!(i64, Int64, Int64);
impl_scan_pod!(u64, Uint64, Uint64);
impl_scan_pod!(f32, Float32, Float32);
impl_scan_pod!(f64, Float64, Float64);
