//! The archive container: node arena, tree edits and introspection.

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::format::CURRENT_VERSION;
use super::node::*;
use super::reader::{IStreams, TreeParser};
use super::stream::OStream;
use super::writer::write_tree;
use crate::util::{Error, Result};

/// How an archive is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

/// Engine tuning knobs.
#[derive(Clone, Debug)]
pub struct EngineOptions {
    /// Memory-map archives opened for reading (buffered file reads otherwise).
    pub use_mmap: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self { use_mmap: true }
    }
}

impl EngineOptions {
    pub fn with_mmap(mut self, use_mmap: bool) -> Self {
        self.use_mmap = use_mmap;
        self
    }
}

pub(super) enum Backend {
    Read(IStreams),
    Write(OStream),
    Closed,
}

/// An open archive.
///
/// Read mode parses the whole node tree on open; record and blob payloads
/// stay on disk and are fetched on demand. Write mode keeps the tree in
/// memory, appends payloads as they arrive and writes the tree on
/// [`close`](Self::close). Dropping an open image closes it.
pub struct ImageFile {
    path: PathBuf,
    mode: OpenMode,
    pub(super) entries: Vec<Entry>,
    root: NodeId,
    pub(super) backend: Backend,
    pub(super) active_readers: RefCell<HashSet<NodeId>>,
}

impl ImageFile {
    /// Open an archive with default options.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        Self::open_with(path, mode, &EngineOptions::default())
    }

    /// Create a new archive for writing, truncating any existing file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(path, OpenMode::Write)
    }

    /// Open an archive with explicit options.
    pub fn open_with(path: impl AsRef<Path>, mode: OpenMode, options: &EngineOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (entries, root, backend) = match mode {
            OpenMode::Read => {
                let streams = IStreams::open(&path, options.use_mmap)?;
                if streams.version() != CURRENT_VERSION {
                    return Err(Error::UnsupportedVersion(streams.version()));
                }
                if !streams.is_frozen() {
                    return Err(Error::invalid("archive was not finalized"));
                }
                let (entries, root) = TreeParser::new(&streams).parse()?;
                debug!(path = %path.display(), nodes = entries.len(), "opened archive for reading");
                (entries, root, Backend::Read(streams))
            }
            OpenMode::Write => {
                let stream = OStream::create(&path)?;
                debug!(path = %path.display(), "created archive");
                let root = Entry::detached(Node::Structure(Structure::default()));
                (vec![root], NodeId(0), Backend::Write(stream))
            }
        };

        Ok(Self {
            path,
            mode,
            entries,
            root,
            backend,
            active_readers: RefCell::new(HashSet::new()),
        })
    }

    /// Finalize and release the file. Idempotent.
    ///
    /// In write mode this writes the node tree, patches the root position
    /// into the header and sets the frozen flag.
    pub fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.backend, Backend::Closed) {
            Backend::Write(mut stream) => {
                let root_pos = write_tree(&mut stream, &self.entries, self.root)?;
                stream.finalize(root_pos)?;
                debug!(path = %self.path.display(), bytes = stream.pos(), "closed archive");
                Ok(())
            }
            Backend::Read(_) => {
                debug!(path = %self.path.display(), "closed archive");
                Ok(())
            }
            Backend::Closed => Ok(()),
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        !matches!(self.backend, Backend::Closed)
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        matches!(self.backend, Backend::Write(_))
    }

    /// The root structure.
    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub(super) fn ensure_writable(&self) -> Result<()> {
        match self.backend {
            Backend::Write(_) => Ok(()),
            Backend::Read(_) => Err(Error::ReadOnly),
            Backend::Closed => Err(Error::Closed),
        }
    }

    pub(super) fn streams(&self) -> Result<&IStreams> {
        match &self.backend {
            Backend::Read(streams) => Ok(streams),
            Backend::Write(_) => Err(Error::WriteOnly),
            Backend::Closed => Err(Error::Closed),
        }
    }

    pub(super) fn stream_mut(&mut self) -> Result<&mut OStream> {
        match &mut self.backend {
            Backend::Write(stream) => Ok(stream),
            Backend::Read(_) => Err(Error::ReadOnly),
            Backend::Closed => Err(Error::Closed),
        }
    }

    pub(super) fn entry(&self, id: NodeId) -> Result<&Entry> {
        self.entries
            .get(id.0)
            .ok_or_else(|| Error::invalid(format!("unknown node id {}", id.0)))
    }

    pub(super) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.entries
            .get_mut(id.0)
            .map(|e| &mut e.node)
            .ok_or_else(|| Error::invalid(format!("unknown node id {}", id.0)))
    }

    // ---- introspection ----

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        Ok(&self.entry(id)?.node)
    }

    pub fn kind(&self, id: NodeId) -> Result<NodeKind> {
        Ok(self.node(id)?.kind())
    }

    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.entry(id)?.parent)
    }

    /// Name under the parent: member name for structures, decimal index for
    /// vectors, empty for the root and detached nodes.
    pub fn element_name(&self, id: NodeId) -> Result<&str> {
        Ok(&self.entry(id)?.name)
    }

    /// Absolute slash-separated path, `/` for the root.
    pub fn path_name(&self, id: NodeId) -> Result<String> {
        let mut parts = Vec::new();
        let mut current = id;
        while let Some(parent) = self.entry(current)?.parent {
            parts.push(self.entry(current)?.name.as_str());
            current = parent;
        }
        parts.reverse();
        Ok(format!("/{}", parts.join("/")))
    }

    /// True if the node is reachable from the root.
    pub fn is_attached(&self, id: NodeId) -> Result<bool> {
        let mut current = id;
        while let Some(parent) = self.entry(current)?.parent {
            current = parent;
        }
        Ok(current == self.root)
    }

    /// Children of a structure or vector; the record count of a compressed
    /// vector; zero for everything else.
    pub fn child_count(&self, id: NodeId) -> Result<u64> {
        Ok(match self.node(id)? {
            Node::Structure(s) => s.children.len() as u64,
            Node::Vector(v) => v.children.len() as u64,
            Node::CompressedVector(cv) => cv.record_count,
            _ => 0,
        })
    }

    /// Child of a structure or vector by position.
    pub fn child(&self, id: NodeId, index: usize) -> Result<NodeId> {
        let children = match self.node(id)? {
            Node::Structure(_) | Node::Vector(_) => self.node(id)?.child_ids(),
            other => return Err(Error::type_mismatch("Structure or Vector", other.kind().name())),
        };
        children.get(index).copied().ok_or(Error::IndexOutOfRange {
            index,
            count: children.len(),
        })
    }

    /// Ordered children of a structure or vector.
    pub fn children(&self, id: NodeId) -> Result<Vec<NodeId>> {
        Ok(self.node(id)?.child_ids())
    }

    /// Resolve a path from the root (leading `/` optional).
    pub fn get(&self, path: &str) -> Result<NodeId> {
        self.lookup(self.root, path)
    }

    /// Resolve a path relative to `base`; a leading `/` starts at the root.
    ///
    /// Vector children are addressed by decimal index, compressed vectors
    /// expose `prototype` and `codecs`.
    pub fn lookup(&self, base: NodeId, path: &str) -> Result<NodeId> {
        let start = if path.starts_with('/') { self.root } else { base };
        let undefined = || Error::PathUndefined(path.to_string());
        let mut current = start;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current = match self.node(current)? {
                Node::Structure(s) => s.get(part).ok_or_else(undefined)?,
                Node::Vector(v) => part
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| v.children.get(i).copied())
                    .ok_or_else(undefined)?,
                Node::CompressedVector(cv) => match part {
                    "prototype" => cv.prototype,
                    "codecs" => cv.codecs,
                    _ => return Err(undefined()),
                },
                _ => return Err(undefined()),
            };
        }
        Ok(current)
    }

    pub fn is_defined(&self, path: &str) -> bool {
        self.get(path).is_ok()
    }

    pub fn is_defined_from(&self, base: NodeId, path: &str) -> bool {
        self.lookup(base, path).is_ok()
    }

    pub fn element(&self, id: NodeId) -> Result<&Element> {
        match self.node(id)? {
            Node::Element(e) => Ok(e),
            other => Err(Error::type_mismatch("Element", other.kind().name())),
        }
    }

    pub fn integer_value(&self, id: NodeId) -> Result<i64> {
        match self.element(id)? {
            Element::Integer { value, .. } => Ok(*value),
            other => Err(Error::type_mismatch("Integer", other.kind().name())),
        }
    }

    pub fn float_value(&self, id: NodeId) -> Result<f64> {
        match self.element(id)? {
            Element::Float { value, .. } => Ok(*value),
            other => Err(Error::type_mismatch("Float", other.kind().name())),
        }
    }

    /// Scaled value (`raw * scale + offset`) of a ScaledInteger.
    pub fn scaled_value(&self, id: NodeId) -> Result<f64> {
        match self.element(id)? {
            e @ Element::ScaledInteger { .. } => Ok(e.as_f64().unwrap_or_default()),
            other => Err(Error::type_mismatch("ScaledInteger", other.kind().name())),
        }
    }

    pub fn string_value(&self, id: NodeId) -> Result<&str> {
        match self.element(id)? {
            Element::String(s) => Ok(s),
            other => Err(Error::type_mismatch("String", other.kind().name())),
        }
    }

    /// Value of any numeric element as f64.
    pub fn numeric_value(&self, id: NodeId) -> Result<f64> {
        let e = self.element(id)?;
        e.as_f64()
            .ok_or_else(|| Error::type_mismatch("numeric element", e.kind().name()))
    }

    pub fn blob(&self, id: NodeId) -> Result<&Blob> {
        match self.node(id)? {
            Node::Blob(b) => Ok(b),
            other => Err(Error::type_mismatch("Blob", other.kind().name())),
        }
    }

    pub fn vector(&self, id: NodeId) -> Result<&Vector> {
        match self.node(id)? {
            Node::Vector(v) => Ok(v),
            other => Err(Error::type_mismatch("Vector", other.kind().name())),
        }
    }

    pub fn structure(&self, id: NodeId) -> Result<&Structure> {
        match self.node(id)? {
            Node::Structure(s) => Ok(s),
            other => Err(Error::type_mismatch("Structure", other.kind().name())),
        }
    }

    pub fn compressed_vector(&self, id: NodeId) -> Result<&CompressedVector> {
        match self.node(id)? {
            Node::CompressedVector(cv) => Ok(cv),
            other => Err(Error::type_mismatch("CompressedVector", other.kind().name())),
        }
    }

    // ---- constructors ----

    fn alloc(&mut self, node: Node) -> Result<NodeId> {
        self.ensure_writable()?;
        self.entries.push(Entry::detached(node));
        Ok(NodeId(self.entries.len() - 1))
    }

    /// Integer element with domain `[min, max]`.
    pub fn new_integer(&mut self, value: i64, min: i64, max: i64) -> Result<NodeId> {
        if value < min || value > max {
            return Err(Error::ValueOutOfBounds {
                value: value as f64,
                min: min as f64,
                max: max as f64,
            });
        }
        self.alloc(Node::Element(Element::Integer { value, min, max }))
    }

    /// Integer element with the full i64 domain.
    pub fn new_int(&mut self, value: i64) -> Result<NodeId> {
        self.new_integer(value, i64::MIN, i64::MAX)
    }

    /// Scaled integer element; the domain bounds the raw value.
    pub fn new_scaled_integer(
        &mut self,
        raw: i64,
        min: i64,
        max: i64,
        scale: f64,
        offset: f64,
    ) -> Result<NodeId> {
        if raw < min || raw > max {
            return Err(Error::ValueOutOfBounds {
                value: raw as f64,
                min: min as f64,
                max: max as f64,
            });
        }
        self.alloc(Node::Element(Element::ScaledInteger {
            raw,
            min,
            max,
            scale,
            offset,
        }))
    }

    /// Float element with domain `[min, max]`.
    pub fn new_float(
        &mut self,
        value: f64,
        precision: FloatPrecision,
        min: f64,
        max: f64,
    ) -> Result<NodeId> {
        if !(min..=max).contains(&value) {
            return Err(Error::ValueOutOfBounds { value, min, max });
        }
        self.alloc(Node::Element(Element::Float {
            value,
            precision,
            min,
            max,
        }))
    }

    /// Double precision float with an unbounded domain.
    pub fn new_double(&mut self, value: f64) -> Result<NodeId> {
        self.new_float(value, FloatPrecision::Double, f64::MIN, f64::MAX)
    }

    pub fn new_string(&mut self, value: impl Into<String>) -> Result<NodeId> {
        self.alloc(Node::Element(Element::String(value.into())))
    }

    /// Blob of `byte_count` bytes; unwritten bytes read back as zero.
    pub fn new_blob(&mut self, byte_count: u64) -> Result<NodeId> {
        self.alloc(Node::Blob(Blob {
            byte_count,
            segments: Vec::new(),
        }))
    }

    pub fn new_structure(&mut self) -> Result<NodeId> {
        self.alloc(Node::Structure(Structure::default()))
    }

    pub fn new_vector(&mut self, allow_hetero: bool) -> Result<NodeId> {
        self.alloc(Node::Vector(Vector {
            allow_hetero,
            children: Vec::new(),
        }))
    }

    /// Record container keyed to `prototype` (a detached structure whose
    /// leaves are numeric elements) with `codecs` (a detached vector).
    pub fn new_compressed_vector(&mut self, prototype: NodeId, codecs: NodeId) -> Result<NodeId> {
        self.ensure_writable()?;
        self.structure(prototype)?;
        self.vector(codecs)?;
        for id in [prototype, codecs] {
            if self.entry(id)?.parent.is_some() || id == self.root {
                return Err(Error::AlreadyAttached(self.path_name(id)?));
            }
        }
        // Validates leaf types.
        self.leaves(prototype)?;

        let cv = self.alloc(Node::CompressedVector(CompressedVector {
            prototype,
            codecs,
            record_count: 0,
            chunks: Vec::new(),
            written: false,
        }))?;
        self.attach(cv, prototype, "prototype".into());
        self.attach(cv, codecs, "codecs".into());
        Ok(cv)
    }

    // ---- tree edits ----

    fn attach(&mut self, parent: NodeId, child: NodeId, name: String) {
        let entry = &mut self.entries[child.0];
        entry.parent = Some(parent);
        entry.name = name;
    }

    /// Checks shared by `set` and `append`: child is detached and adding it
    /// under `parent` does not create a cycle.
    fn check_attachable(&self, parent: NodeId, child: NodeId) -> Result<()> {
        if child == self.root || self.entry(child)?.parent.is_some() {
            return Err(Error::AlreadyAttached(self.path_name(child)?));
        }
        let mut current = Some(parent);
        while let Some(id) = current {
            if id == child {
                return Err(Error::invalid("attaching node would create a cycle"));
            }
            current = self.entry(id)?.parent;
        }
        Ok(())
    }

    /// Add `child` to a structure under `name`.
    pub fn set(&mut self, structure: NodeId, name: &str, child: NodeId) -> Result<()> {
        self.ensure_writable()?;
        if name.is_empty() || name.contains('/') {
            return Err(Error::invalid(format!("invalid element name {name:?}")));
        }
        if self.structure(structure)?.get(name).is_some() {
            return Err(Error::DuplicateName(name.to_string()));
        }
        self.check_attachable(structure, child)?;

        if let Node::Structure(s) = self.node_mut(structure)? {
            s.children.push((name.to_string(), child));
        }
        self.attach(structure, child, name.to_string());
        Ok(())
    }

    /// Append `child` to a vector. Homogeneous vectors require every child
    /// to share the first child's kind.
    pub fn append(&mut self, vector: NodeId, child: NodeId) -> Result<()> {
        self.ensure_writable()?;
        let v = self.vector(vector)?;
        let index = v.children.len();
        if !v.allow_hetero {
            if let Some(&first) = v.children.first() {
                let expected = self.kind(first)?;
                let actual = self.kind(child)?;
                if expected != actual {
                    return Err(Error::HeterogeneousVector {
                        expected: expected.name().to_string(),
                        actual: actual.name().to_string(),
                    });
                }
            }
        }
        self.check_attachable(vector, child)?;

        if let Node::Vector(v) = self.node_mut(vector)? {
            v.children.push(child);
        }
        self.attach(vector, child, index.to_string());
        Ok(())
    }
}

impl Drop for ImageFile {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(path = %self.path.display(), error = %e, "failed to close archive");
        }
    }
}

impl std::fmt::Debug for ImageFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageFile")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("nodes", &self.entries.len())
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn writable() -> (NamedTempFile, ImageFile) {
        let temp = NamedTempFile::new().expect("temp file");
        let image = ImageFile::create(temp.path()).expect("create");
        (temp, image)
    }

    #[test]
    fn test_tree_round_trip() {
        let (temp, mut image) = writable();
        let root = image.root();
        let name = image.new_string("scan").unwrap();
        image.set(root, "name", name).unwrap();
        let count = image.new_integer(3, 0, 10).unwrap();
        image.set(root, "count", count).unwrap();
        let scaled = image.new_scaled_integer(25, 0, 100, 0.5, 1.0).unwrap();
        image.set(root, "scaled", scaled).unwrap();
        let list = image.new_vector(false).unwrap();
        image.set(root, "list", list).unwrap();
        for v in [1.5, 2.5] {
            let f = image.new_float(v, FloatPrecision::Single, 0.0, 10.0).unwrap();
            image.append(list, f).unwrap();
        }
        image.close().unwrap();

        let image = ImageFile::open(temp.path(), OpenMode::Read).unwrap();
        assert_eq!(image.string_value(image.get("/name").unwrap()).unwrap(), "scan");
        assert_eq!(image.integer_value(image.get("count").unwrap()).unwrap(), 3);
        assert_eq!(image.scaled_value(image.get("/scaled").unwrap()).unwrap(), 13.5);
        let second = image.get("/list/1").unwrap();
        assert_eq!(image.float_value(second).unwrap(), 2.5);
        assert_eq!(image.element_name(second).unwrap(), "1");
        assert_eq!(image.path_name(second).unwrap(), "/list/1");
        assert_eq!(image.child_count(image.root()).unwrap(), 4);
        assert!(!image.is_defined("/list/2"));
        assert!(matches!(
            image.child(image.get("/list").unwrap(), 5),
            Err(Error::IndexOutOfRange { index: 5, count: 2 })
        ));
    }

    #[test]
    fn test_domain_checks() {
        let (_temp, mut image) = writable();
        assert!(matches!(
            image.new_integer(11, 0, 10),
            Err(Error::ValueOutOfBounds { .. })
        ));
        assert!(image.new_float(-1.0, FloatPrecision::Double, 0.0, 1.0).is_err());
        assert!(image.new_scaled_integer(-1, 0, 10, 1.0, 0.0).is_err());
    }

    #[test]
    fn test_tree_edit_rules() {
        let (_temp, mut image) = writable();
        let root = image.root();
        let a = image.new_int(1).unwrap();
        image.set(root, "a", a).unwrap();

        let b = image.new_int(2).unwrap();
        assert!(matches!(image.set(root, "a", b), Err(Error::DuplicateName(_))));
        assert!(matches!(image.set(root, "again", a), Err(Error::AlreadyAttached(_))));

        let homogeneous = image.new_vector(false).unwrap();
        image.append(homogeneous, b).unwrap();
        let s = image.new_string("x").unwrap();
        assert!(matches!(
            image.append(homogeneous, s),
            Err(Error::HeterogeneousVector { .. })
        ));

        let hetero = image.new_vector(true).unwrap();
        image.append(hetero, s).unwrap();

        let outer = image.new_structure().unwrap();
        let inner = image.new_structure().unwrap();
        image.set(outer, "inner", inner).unwrap();
        assert!(image.set(inner, "outer", outer).is_err());
    }

    #[test]
    fn test_read_only_and_closed() {
        let (temp, mut image) = writable();
        image.close().unwrap();
        assert!(matches!(image.new_int(1), Err(Error::Closed)));
        image.close().unwrap();

        let mut image = ImageFile::open_with(
            temp.path(),
            OpenMode::Read,
            &EngineOptions::default().with_mmap(false),
        )
        .unwrap();
        assert!(matches!(image.new_structure(), Err(Error::ReadOnly)));
        assert_eq!(image.child_count(image.root()).unwrap(), 0);
    }

    #[test]
    fn test_unfinalized_archive_rejected() {
        let temp = NamedTempFile::new().unwrap();
        let image = ImageFile::create(temp.path()).unwrap();
        // Leak the writer so the header is never frozen.
        std::mem::forget(image);
        assert!(ImageFile::open(temp.path(), OpenMode::Read).is_err());
    }
}
