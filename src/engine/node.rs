//! The node tree: one sum type for every kind of archive node.

use std::fmt;

/// Handle to a node inside one [`ImageFile`](super::ImageFile).
///
/// Ids are indices into the image's node arena. They are only meaningful for
/// the image that created them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Raw arena index.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Storage precision of a float element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FloatPrecision {
    Single,
    Double,
}

impl FloatPrecision {
    /// Encoded record width in bytes.
    #[inline]
    pub const fn num_bytes(self) -> usize {
        match self {
            Self::Single => 4,
            Self::Double => 8,
        }
    }
}

/// Discriminant of a [`Node`], used for type checks and messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Integer,
    ScaledInteger,
    Float,
    String,
    Blob,
    Structure,
    Vector,
    CompressedVector,
}

impl NodeKind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Integer => "Integer",
            Self::ScaledInteger => "ScaledInteger",
            Self::Float => "Float",
            Self::String => "String",
            Self::Blob => "Blob",
            Self::Structure => "Structure",
            Self::Vector => "Vector",
            Self::CompressedVector => "CompressedVector",
        }
    }

    /// Elements hold a single value and have no children.
    #[inline]
    pub const fn is_element(self) -> bool {
        matches!(
            self,
            Self::Integer | Self::ScaledInteger | Self::Float | Self::String
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A leaf value with its declared numeric domain.
#[derive(Clone, Debug, PartialEq)]
pub enum Element {
    Integer {
        value: i64,
        min: i64,
        max: i64,
    },
    ScaledInteger {
        raw: i64,
        min: i64,
        max: i64,
        scale: f64,
        offset: f64,
    },
    Float {
        value: f64,
        precision: FloatPrecision,
        min: f64,
        max: f64,
    },
    String(String),
}

impl Element {
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Integer { .. } => NodeKind::Integer,
            Self::ScaledInteger { .. } => NodeKind::ScaledInteger,
            Self::Float { .. } => NodeKind::Float,
            Self::String(_) => NodeKind::String,
        }
    }

    /// Numeric value as f64 (scaled integers apply scale and offset).
    /// `None` for strings.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Integer { value, .. } => Some(value as f64),
            Self::ScaledInteger { raw, scale, offset, .. } => Some(raw as f64 * scale + offset),
            Self::Float { value, .. } => Some(value),
            Self::String(_) => None,
        }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer { value, .. } => write!(f, "{value}"),
            Self::ScaledInteger { .. } => write!(f, "{}", self.as_f64().unwrap_or_default()),
            Self::Float { value, .. } => write!(f, "{value}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

/// One written byte range of a blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlobSegment {
    /// Offset of the first byte inside the blob.
    pub start: u64,
    /// Number of payload bytes.
    pub len: u64,
    /// File position of the payload bytes.
    pub data_pos: u64,
}

/// Opaque byte payload of fixed length.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Blob {
    pub byte_count: u64,
    pub(crate) segments: Vec<BlobSegment>,
}

/// Ordered, uniquely named children.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Structure {
    pub(crate) children: Vec<(String, NodeId)>,
}

impl Structure {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(|(n, _)| n.as_str())
    }

    pub fn get(&self, name: &str) -> Option<NodeId> {
        self.children
            .iter()
            .find_map(|(n, id)| (n == name).then_some(*id))
    }
}

/// Ordered, positionally addressed children.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Vector {
    pub allow_hetero: bool,
    pub(crate) children: Vec<NodeId>,
}

/// One batch of records as stored on disk: a column block per prototype leaf.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordChunk {
    pub record_count: u64,
    /// File positions of the column data blocks, in leaf order.
    pub(crate) columns: Vec<u64>,
}

/// A streamed record container keyed to a fixed prototype.
#[derive(Clone, Debug, PartialEq)]
pub struct CompressedVector {
    pub prototype: NodeId,
    pub codecs: NodeId,
    pub record_count: u64,
    pub(crate) chunks: Vec<RecordChunk>,
    pub(crate) written: bool,
}

/// A node of the archive tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Element(Element),
    Blob(Blob),
    Structure(Structure),
    Vector(Vector),
    CompressedVector(CompressedVector),
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Element(e) => e.kind(),
            Self::Blob(_) => NodeKind::Blob,
            Self::Structure(_) => NodeKind::Structure,
            Self::Vector(_) => NodeKind::Vector,
            Self::CompressedVector(_) => NodeKind::CompressedVector,
        }
    }

    /// Ids of the tree children, in order. Prototype and codecs of a
    /// compressed vector are not counted as children.
    pub fn child_ids(&self) -> Vec<NodeId> {
        match self {
            Self::Structure(s) => s.children.iter().map(|(_, id)| *id).collect(),
            Self::Vector(v) => v.children.clone(),
            _ => Vec::new(),
        }
    }
}

/// Arena slot: a node plus its attachment point.
#[derive(Clone, Debug)]
pub(crate) struct Entry {
    pub node: Node,
    pub parent: Option<NodeId>,
    pub name: String,
}

impl Entry {
    pub fn detached(node: Node) -> Self {
        Self {
            node,
            parent: None,
            name: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_values() {
        let e = Element::ScaledInteger {
            raw: 150,
            min: 0,
            max: 1000,
            scale: 0.01,
            offset: 10.0,
        };
        assert_eq!(e.kind(), NodeKind::ScaledInteger);
        assert!((e.as_f64().unwrap() - 11.5).abs() < 1e-12);
        assert_eq!(Element::String("x".into()).as_f64(), None);
    }

    #[test]
    fn test_structure_lookup() {
        let s = Structure {
            children: vec![("a".into(), NodeId(3)), ("b".into(), NodeId(7))],
        };
        assert_eq!(s.get("b"), Some(NodeId(7)));
        assert_eq!(s.get("c"), None);
        assert_eq!(s.names().collect::<Vec<_>>(), ["a", "b"]);
        assert!(NodeKind::Float.is_element());
        assert!(!NodeKind::Vector.is_element());
    }
}
