//! Buffer bindings for record transfers.

use crate::util::{Error, PointArray, Result, ScalarKind};

/// A typed array bound to one prototype leaf path for a record transfer.
///
/// The binding owns its array. Readers fill it, writers drain it; take the
/// array back with [`into_array`](Self::into_array) once the transfer is done.
#[derive(Clone, Debug)]
pub struct SourceDestBuffer {
    path_name: String,
    array: PointArray,
    do_conversion: bool,
    do_scaling: bool,
}

impl SourceDestBuffer {
    /// Bind `array` to `path_name`. The capacity is the array length.
    ///
    /// Fails with [`Error::UnsupportedBufferType`] for storage kinds that
    /// cannot be bound.
    pub fn new(
        path_name: impl Into<String>,
        array: PointArray,
        do_conversion: bool,
        do_scaling: bool,
    ) -> Result<Self> {
        if !array.kind().is_bindable() {
            return Err(Error::UnsupportedBufferType(array.kind()));
        }
        Ok(Self {
            path_name: path_name.into(),
            array,
            do_conversion,
            do_scaling,
        })
    }

    /// Allocate a zeroed array of `kind` and bind it.
    pub fn zeroed(
        path_name: impl Into<String>,
        kind: ScalarKind,
        capacity: usize,
        do_conversion: bool,
        do_scaling: bool,
    ) -> Result<Self> {
        if !kind.is_bindable() {
            return Err(Error::UnsupportedBufferType(kind));
        }
        Self::new(
            path_name,
            PointArray::zeroed(kind, capacity),
            do_conversion,
            do_scaling,
        )
    }

    #[inline]
    pub fn path_name(&self) -> &str {
        &self.path_name
    }

    /// Number of records the buffer can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.array.len()
    }

    /// Distance in bytes between consecutive elements.
    #[inline]
    pub fn stride(&self) -> usize {
        self.array.stride()
    }

    #[inline]
    pub fn kind(&self) -> ScalarKind {
        self.array.kind()
    }

    #[inline]
    pub fn do_conversion(&self) -> bool {
        self.do_conversion
    }

    #[inline]
    pub fn do_scaling(&self) -> bool {
        self.do_scaling
    }

    #[inline]
    pub fn array(&self) -> &PointArray {
        &self.array
    }

    #[inline]
    pub fn array_mut(&mut self) -> &mut PointArray {
        &mut self.array
    }

    /// Release the binding and return the array.
    pub fn into_array(self) -> PointArray {
        self.array
    }
}
