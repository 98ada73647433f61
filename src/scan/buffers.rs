//! Point buffers: typed arrays bound to field names for one transfer.

use std::collections::btree_map;
use std::collections::BTreeMap;

use super::fields::PointField;
use crate::engine::SourceDestBuffer;
use crate::util::{Error, PointArray, Result};

/// Per-field point arrays of one scan, keyed in canonical field order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointData(BTreeMap<PointField, PointArray>);

impl PointData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field, returning the array it replaces.
    pub fn insert(&mut self, field: PointField, array: impl Into<PointArray>) -> Option<PointArray> {
        self.0.insert(field, array.into())
    }

    pub fn get(&self, field: PointField) -> Option<&PointArray> {
        self.0.get(&field)
    }

    pub fn get_mut(&mut self, field: PointField) -> Option<&mut PointArray> {
        self.0.get_mut(&field)
    }

    pub fn remove(&mut self, field: PointField) -> Option<PointArray> {
        self.0.remove(&field)
    }

    pub fn contains(&self, field: PointField) -> bool {
        self.0.contains_key(&field)
    }

    /// Typed view of a field's values.
    pub fn values<T: crate::util::ScanPod>(&self, field: PointField) -> Option<&[T]> {
        self.get(field)?.as_slice()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fields present, in canonical order.
    pub fn fields(&self) -> impl Iterator<Item = PointField> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, PointField, PointArray> {
        self.0.iter()
    }

    /// Length of the arrays (zero when no field is present).
    pub fn point_count(&self) -> usize {
        self.0.values().next().map_or(0, PointArray::len)
    }

    /// Check every array has the registry kind and one shared length, which
    /// is returned.
    pub fn validate(&self) -> Result<usize> {
        let n = self.point_count();
        for (field, array) in &self.0 {
            if array.kind() != field.kind() {
                return Err(Error::type_mismatch(
                    format!("{} for {field}", field.kind()),
                    array.kind().name(),
                ));
            }
            if array.len() != n {
                return Err(Error::LengthMismatch {
                    field: field.name().to_string(),
                    expected: n,
                    actual: array.len(),
                });
            }
        }
        Ok(n)
    }

    /// Keep only the points whose `keep` flag is set.
    pub fn retain_points(&mut self, keep: &[bool]) {
        for array in self.0.values_mut() {
            *array = array.filter(keep);
        }
    }
}

impl IntoIterator for PointData {
    type Item = (PointField, PointArray);
    type IntoIter = btree_map::IntoIter<PointField, PointArray>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a PointData {
    type Item = (&'a PointField, &'a PointArray);
    type IntoIter = btree_map::Iter<'a, PointField, PointArray>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<(PointField, PointArray)> for PointData {
    fn from_iter<I: IntoIterator<Item = (PointField, PointArray)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Allocate a zeroed `capacity`-element array of the field's registry kind
/// and bind it to the field name.
pub fn make_buffer(
    field: PointField,
    capacity: usize,
    do_conversion: bool,
    do_scaling: bool,
) -> Result<SourceDestBuffer> {
    SourceDestBuffer::zeroed(field.name(), field.kind(), capacity, do_conversion, do_scaling)
}

/// [`make_buffer`] by field name; unknown names fail with
/// [`Error::UnsupportedField`].
pub fn make_named_buffer(
    name: &str,
    capacity: usize,
    do_conversion: bool,
    do_scaling: bool,
) -> Result<SourceDestBuffer> {
    make_buffer(PointField::from_name(name)?, capacity, do_conversion, do_scaling)
}

/// Buffers for several fields, kept in the order requested.
#[derive(Debug)]
pub struct BufferSet {
    fields: Vec<PointField>,
    buffers: Vec<SourceDestBuffer>,
}

/// Allocate and bind one buffer per field, preserving field order.
pub fn make_buffers(
    fields: &[PointField],
    capacity: usize,
    do_conversion: bool,
    do_scaling: bool,
) -> Result<BufferSet> {
    let buffers = fields
        .iter()
        .map(|&f| make_buffer(f, capacity, do_conversion, do_scaling))
        .collect::<Result<Vec<_>>>()?;
    Ok(BufferSet {
        fields: fields.to_vec(),
        buffers,
    })
}

impl BufferSet {
    pub fn fields(&self) -> &[PointField] {
        &self.fields
    }

    pub fn buffers(&self) -> &[SourceDestBuffer] {
        &self.buffers
    }

    pub fn buffers_mut(&mut self) -> &mut [SourceDestBuffer] {
        &mut self.buffers
    }

    /// Shared capacity of the buffers.
    pub fn capacity(&self) -> usize {
        self.buffers.first().map_or(0, SourceDestBuffer::capacity)
    }

    /// Release the bindings, returning field arrays truncated to `len`.
    pub fn into_point_data(self, len: usize) -> PointData {
        self.fields
            .into_iter()
            .zip(self.buffers)
            .map(|(field, buf)| {
                let mut array = buf.into_array();
                array.truncate(len);
                (field, array)
            })
            .collect()
    }
}
