//! Multi-scan archive access.
//!
//! [`ScanArchive`] wraps an [`ImageFile`] whose root carries the archive
//! header and a `data3D` vector of scan structures. Reading builds buffers
//! from a scan's prototype and streams records through them; writing derives
//! a prototype and bounds from the caller's arrays before streaming.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, debug_span, info, warn};

use crate::engine::{format, EngineOptions, FloatPrecision, ImageFile, NodeId, OpenMode};
use crate::scan::{
    read_all, spherical_to_cartesian_points, AcquisitionTime, CartesianBounds, ChunkedStreamWriter,
    CoordinateSystem, IndexBounds, IntensityLimits, PointData, PointField, Pose,
    ScanHeader, ScanMetadata, SphericalBounds, COLOR_FIELDS, DEFAULT_CHUNK_SIZE,
};
use crate::util::{BBox3d, DQuat, DVec3, Error, PointArray, Result};

/// Value of the root `formatName` string.
pub const FORMAT_NAME: &str = "pointarchive 3D Imaging Data File";

/// Library identifier written into new archives.
pub const LIBRARY_VERSION: &str = concat!(
    "pointarchive ",
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("POINTARCHIVE_BUILD_DATE"),
    ")"
);

/// Options for [`ScanArchive::read_scan`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadScanOptions {
    pub include_intensity: bool,
    pub include_colors: bool,
    pub include_row_column: bool,
    /// Apply the scan pose, if the scan has one.
    pub transform_to_global: bool,
    /// Skip requested fields the scan does not carry instead of failing.
    pub ignore_missing_fields: bool,
}

impl Default for ReadScanOptions {
    fn default() -> Self {
        Self {
            include_intensity: false,
            include_colors: false,
            include_row_column: false,
            transform_to_global: true,
            ignore_missing_fields: false,
        }
    }
}

impl ReadScanOptions {
    pub fn with_intensity(mut self, on: bool) -> Self {
        self.include_intensity = on;
        self
    }

    pub fn with_colors(mut self, on: bool) -> Self {
        self.include_colors = on;
        self
    }

    pub fn with_row_column(mut self, on: bool) -> Self {
        self.include_row_column = on;
        self
    }

    pub fn with_transform(mut self, on: bool) -> Self {
        self.transform_to_global = on;
        self
    }

    pub fn with_ignore_missing_fields(mut self, on: bool) -> Self {
        self.ignore_missing_fields = on;
        self
    }
}

/// Options for [`ScanArchive::read_scan_raw`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadRawOptions {
    /// Skip prototype fields outside the registry instead of failing.
    pub ignore_unsupported_fields: bool,
}

impl ReadRawOptions {
    pub fn with_ignore_unsupported_fields(mut self, on: bool) -> Self {
        self.ignore_unsupported_fields = on;
        self
    }
}

/// Options for [`ScanArchive::write_scan_raw`].
#[derive(Clone, Debug, PartialEq)]
pub struct WriteScanOptions {
    /// Scan name; defaults to the reference name, then `Scan {index}`.
    pub name: Option<String>,
    /// Pose rotation `[w, x, y, z]`; defaults to the reference pose, then
    /// identity.
    pub rotation: Option<[f64; 4]>,
    pub translation: Option<[f64; 3]>,
    /// Metadata of a source scan supplying bounds, limits, pose and
    /// acquisition times.
    pub reference: Option<ScanMetadata>,
    /// Records per chunk write.
    pub chunk_size: usize,
}

impl Default for WriteScanOptions {
    fn default() -> Self {
        Self {
            name: None,
            rotation: None,
            translation: None,
            reference: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl WriteScanOptions {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_pose(mut self, rotation: [f64; 4], translation: [f64; 3]) -> Self {
        self.rotation = Some(rotation);
        self.translation = Some(translation);
        self
    }

    pub fn with_reference(mut self, reference: ScanMetadata) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

/// An archive of point-cloud scans.
pub struct ScanArchive {
    image: ImageFile,
}

impl ScanArchive {
    /// Open an existing archive for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, &EngineOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: &EngineOptions) -> Result<Self> {
        let _span = debug_span!("open_archive", path = %path.as_ref().display()).entered();
        let image = ImageFile::open_with(path, OpenMode::Read, options)?;
        image.vector(image.get("/data3D")?)?;
        let archive = Self { image };
        debug!(scans = archive.scan_count()?, "opened archive");
        Ok(archive)
    }

    /// Create a new archive with the default root header. A failure while
    /// writing the header closes and deletes the partial file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let _span = debug_span!("create_archive", path = %path.display()).entered();
        let mut image = ImageFile::create(path)?;
        if let Err(e) = write_default_header(&mut image) {
            if let Err(close_err) = image.close() {
                warn!(error = %close_err, "failed to close partial archive");
            }
            if let Err(rm_err) = std::fs::remove_file(path) {
                warn!(error = %rm_err, "failed to remove partial archive");
            }
            return Err(e);
        }
        Ok(Self { image })
    }

    /// Flush and close. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        self.image.close()
    }

    /// The underlying container.
    #[inline]
    pub fn image(&self) -> &ImageFile {
        &self.image
    }

    #[inline]
    pub fn image_mut(&mut self) -> &mut ImageFile {
        &mut self.image
    }

    fn data3d(&self) -> Result<NodeId> {
        self.image.get("/data3D")
    }

    pub fn scan_count(&self) -> Result<usize> {
        Ok(self.image.vector(self.data3d()?)?.children.len())
    }

    /// Header view of scan `index`.
    pub fn header(&self, index: usize) -> Result<ScanHeader<'_>> {
        let scan = self.image.child(self.data3d()?, index)?;
        ScanHeader::new(&self.image, scan)
    }

    /// Global position of the scanner: the pose applied to the local origin.
    pub fn scan_position(&self, index: usize) -> Result<DVec3> {
        Ok(self.header(index)?.pose()?.to_global_point(DVec3::ZERO))
    }

    /// Express a global point in the local frame of scan `index`.
    pub fn to_scan_local(&self, index: usize, point: DVec3) -> Result<DVec3> {
        Ok(self.header(index)?.pose()?.to_local_point(point))
    }

    /// Read cartesian coordinates plus the requested optional fields.
    ///
    /// Spherical scans are converted to cartesian. Points flagged invalid are
    /// dropped together with the validity field. With `transform_to_global`
    /// set, scans carrying a pose are moved to the global frame.
    pub fn read_scan(&self, index: usize, options: &ReadScanOptions) -> Result<PointData> {
        let header = self.header(index)?;
        let system = header.coordinate_system()?;
        let _span = debug_span!("read_scan", index, ?system).entered();

        let mut requested = Vec::new();
        if options.include_intensity {
            requested.push(PointField::Intensity);
        }
        if options.include_colors {
            requested.extend(COLOR_FIELDS);
        }
        if options.include_row_column {
            requested.extend([PointField::RowIndex, PointField::ColumnIndex]);
        }

        let mut fields = system.fields().to_vec();
        for field in requested {
            if header.has_point_field(field)? {
                fields.push(field);
            } else if !options.ignore_missing_fields {
                return Err(Error::MissingField(field.name().to_string()));
            }
        }
        let validity = system.validity_field();
        if header.has_point_field(validity)? {
            fields.push(validity);
        }

        let mut data = read_all(&self.image, header.points(), &fields)?;

        if let Some(flags) = data.remove(validity) {
            let keep: Vec<bool> = flags.to_f64_vec().into_iter().map(|v| v == 0.0).collect();
            data.retain_points(&keep);
        }

        if system == CoordinateSystem::Spherical {
            let columns = system
                .fields()
                .map(|f| data.remove(f).map(|a| a.to_f64_vec()).unwrap_or_default());
            let points = spherical_to_cartesian_points(&columns[0], &columns[1], &columns[2])?;
            data.insert(PointField::CartesianX, points.iter().map(|p| p.x).collect::<Vec<_>>());
            data.insert(PointField::CartesianY, points.iter().map(|p| p.y).collect::<Vec<_>>());
            data.insert(PointField::CartesianZ, points.iter().map(|p| p.z).collect::<Vec<_>>());
        }

        if options.transform_to_global && header.has_pose() {
            let pose = header.pose()?;
            let mut x = take_f64(&mut data, PointField::CartesianX)?;
            let mut y = take_f64(&mut data, PointField::CartesianY)?;
            let mut z = take_f64(&mut data, PointField::CartesianZ)?;
            pose.apply_to_columns(&mut x, &mut y, &mut z);
            data.insert(PointField::CartesianX, x);
            data.insert(PointField::CartesianY, y);
            data.insert(PointField::CartesianZ, z);
        }

        debug!(points = data.point_count(), fields = data.len(), "read scan");
        Ok(data)
    }

    /// Read every supported prototype field of scan `index`, untransformed
    /// and unfiltered.
    pub fn read_scan_raw(&self, index: usize, options: &ReadRawOptions) -> Result<PointData> {
        let header = self.header(index)?;
        let mut fields = Vec::new();
        for name in header.point_fields()? {
            match PointField::from_name(&name) {
                Ok(field) => fields.push(field),
                Err(_) if options.ignore_unsupported_fields => {
                    debug!(field = %name, "skipping unsupported field");
                }
                Err(e) => return Err(e),
            }
        }
        read_all(&self.image, header.points(), &fields)
    }

    /// Append a scan built from `data` and return its index.
    ///
    /// `data` must hold exactly one complete coordinate set. Bounds and
    /// limits are computed from the arrays, restricted to valid points where
    /// a validity field is present; a reference header overrides them.
    pub fn write_scan_raw(&mut self, data: &PointData, options: &WriteScanOptions) -> Result<usize> {
        let n = data.validate()?;
        let system = coordinate_system_of(data)?;
        let index = self.scan_count()?;
        let _span = debug_span!("write_scan", index, points = n).entered();
        let reference = options.reference.as_ref();

        let valid: Option<Vec<bool>> = data
            .get(system.validity_field())
            .map(|flags| flags.to_f64_vec().into_iter().map(|v| v == 0.0).collect());
        check_finite_coordinates(data, system, valid.as_deref())?;
        let range = |field: PointField, mask: Option<&[bool]>| {
            data.get(field).and_then(|a| a.min_max(mask)).unwrap_or((0.0, 0.0))
        };

        let image = &mut self.image;
        let scan = image.new_structure()?;

        let guid = format!("{{{}}}", uuid::Uuid::new_v4());
        set_string(image, scan, "guid", &guid)?;
        let name = options
            .name
            .clone()
            .or_else(|| reference.and_then(|r| r.name.clone()))
            .unwrap_or_else(|| format!("Scan {index}"));
        set_string(image, scan, "name", &name)?;
        set_string(image, scan, "description", LIBRARY_VERSION)?;
        set_double(image, scan, "temperature", reference.and_then(|r| r.temperature).unwrap_or(0.0))?;
        set_double(
            image,
            scan,
            "relativeHumidity",
            reference.and_then(|r| r.relative_humidity).unwrap_or(0.0),
        )?;
        set_double(
            image,
            scan,
            "atmosphericPressure",
            reference.and_then(|r| r.atmospheric_pressure).unwrap_or(0.0),
        )?;

        // Index bounds come from the observed indices.
        let (row_min, row_max) = match data.get(PointField::RowIndex) {
            Some(a) => a.min_max(None).unwrap_or((0.0, 0.0)),
            None => (0.0, n.saturating_sub(1) as f64),
        };
        let (col_min, col_max) = range(PointField::ColumnIndex, None);
        write_index_bounds(
            image,
            scan,
            &IndexBounds {
                row_minimum: row_min as i64,
                row_maximum: row_max as i64,
                column_minimum: col_min as i64,
                column_maximum: col_max as i64,
                return_minimum: 0,
                return_maximum: 0,
            },
        )?;

        if data.contains(PointField::Intensity) {
            let (lo, hi) = range(PointField::Intensity, None);
            let limits = reference.and_then(|r| r.intensity_limits).unwrap_or(IntensityLimits {
                intensity_minimum: lo,
                intensity_maximum: hi,
            });
            write_intensity_limits(image, scan, &limits)?;
        }

        if COLOR_FIELDS.iter().all(|&f| data.contains(f)) {
            write_color_limits(image, scan)?;
        }

        let mask = valid.as_deref();
        match system {
            CoordinateSystem::Cartesian => {
                let local = BBox3d::new(
                    DVec3::new(
                        range(PointField::CartesianX, mask).0,
                        range(PointField::CartesianY, mask).0,
                        range(PointField::CartesianZ, mask).0,
                    ),
                    DVec3::new(
                        range(PointField::CartesianX, mask).1,
                        range(PointField::CartesianY, mask).1,
                        range(PointField::CartesianZ, mask).1,
                    ),
                );
                let bounds = reference
                    .and_then(|r| r.cartesian_bounds)
                    .unwrap_or_else(|| CartesianBounds::from_bbox(&local));
                write_cartesian_bounds(image, scan, &bounds)?;
            }
            CoordinateSystem::Spherical => {
                let (r_lo, r_hi) = range(PointField::SphericalRange, mask);
                let (e_lo, e_hi) = range(PointField::SphericalElevation, mask);
                let (a_lo, a_hi) = range(PointField::SphericalAzimuth, mask);
                let bounds = reference.and_then(|r| r.spherical_bounds).unwrap_or(SphericalBounds {
                    range_minimum: r_lo,
                    range_maximum: r_hi,
                    elevation_minimum: e_lo,
                    elevation_maximum: e_hi,
                    azimuth_start: a_lo,
                    azimuth_end: a_hi,
                });
                write_spherical_bounds(image, scan, &bounds)?;
            }
        }

        let reference_pose = reference.and_then(|r| r.pose).unwrap_or_default();
        let pose = Pose::new(
            options
                .rotation
                .map(|q| DQuat::from_xyzw(q[1], q[2], q[3], q[0]))
                .unwrap_or(reference_pose.rotation),
            options
                .translation
                .map(DVec3::from_array)
                .unwrap_or(reference_pose.translation),
        );
        write_pose(image, scan, &pose)?;

        let start = reference.and_then(|r| r.acquisition_start).unwrap_or_default();
        let end = reference.and_then(|r| r.acquisition_end).unwrap_or_default();
        write_acquisition_time(image, scan, "acquisitionStart", &start)?;
        write_acquisition_time(image, scan, "acquisitionEnd", &end)?;

        let prototype = image.new_structure()?;
        for (field, array) in data {
            let node = prototype_node(image, *field, array)?;
            image.set(prototype, field.name(), node)?;
        }
        let codecs = image.new_vector(true)?;
        let points = image.new_compressed_vector(prototype, codecs)?;
        image.set(scan, "points", points)?;

        let data3d = image.get("/data3D")?;
        image.append(data3d, scan)?;

        let stats = ChunkedStreamWriter::new(options.chunk_size).write(image, points, data)?;
        info!(index, points = stats.records, chunks = stats.chunks, "wrote scan");
        Ok(index)
    }
}

impl std::fmt::Debug for ScanArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanArchive").field("image", &self.image).finish()
    }
}

/// Remove a coordinate column as `Vec<f64>`.
fn take_f64(data: &mut PointData, field: PointField) -> Result<Vec<f64>> {
    let array = data
        .remove(field)
        .ok_or_else(|| Error::MissingField(field.name().to_string()))?;
    match array {
        PointArray::Float64(v) => Ok(v),
        other => Ok(other.to_f64_vec()),
    }
}

/// The single complete coordinate set of `data`. Coordinates from the other
/// system are rejected.
fn coordinate_system_of(data: &PointData) -> Result<CoordinateSystem> {
    let names: Vec<&str> = data.fields().map(PointField::name).collect();
    let system = CoordinateSystem::classify(&names)?;
    let other = match system {
        CoordinateSystem::Cartesian => CoordinateSystem::Spherical,
        CoordinateSystem::Spherical => CoordinateSystem::Cartesian,
    };
    if other.fields().iter().any(|&f| data.contains(f)) || data.contains(other.validity_field()) {
        return Err(Error::UnsupportedCoordinateSystem {
            fields: names.iter().map(|n| n.to_string()).collect(),
        });
    }
    Ok(system)
}

/// Prototype leaf for one written field.
/// Coordinates of valid points must be finite. Invalid points may carry
/// anything.
fn check_finite_coordinates(
    data: &PointData,
    system: CoordinateSystem,
    valid: Option<&[bool]>,
) -> Result<()> {
    for field in system.fields() {
        let Some(array) = data.get(field) else {
            continue;
        };
        for (index, value) in array.to_f64_vec().into_iter().enumerate() {
            let is_valid = valid.map_or(true, |v| v.get(index).copied().unwrap_or(false));
            if is_valid && !value.is_finite() {
                return Err(Error::NonFiniteValue {
                    field: field.name().to_string(),
                    index,
                    value,
                });
            }
        }
    }
    Ok(())
}

fn prototype_node(image: &mut ImageFile, field: PointField, array: &PointArray) -> Result<NodeId> {
    let (lo, hi) = array.min_max(None).unwrap_or((0.0, 0.0));
    match field {
        PointField::CartesianX
        | PointField::CartesianY
        | PointField::CartesianZ
        | PointField::SphericalRange
        | PointField::SphericalAzimuth
        | PointField::SphericalElevation => {
            image.new_float(lo * 0.5 + hi * 0.5, FloatPrecision::Double, lo, hi)
        }
        PointField::Intensity => image.new_float(lo, FloatPrecision::Single, lo, hi),
        PointField::ColorRed | PointField::ColorGreen | PointField::ColorBlue => {
            image.new_integer(0, 0, 255)
        }
        PointField::RowIndex | PointField::ColumnIndex => {
            image.new_integer(lo as i64, lo as i64, hi as i64)
        }
        PointField::CartesianInvalidState | PointField::SphericalInvalidState => {
            image.new_integer(0, 0, 1)
        }
    }
}

fn set_string(image: &mut ImageFile, parent: NodeId, name: &str, value: &str) -> Result<()> {
    let node = image.new_string(value)?;
    image.set(parent, name, node)
}

fn set_double(image: &mut ImageFile, parent: NodeId, name: &str, value: f64) -> Result<()> {
    let node = image.new_double(value)?;
    image.set(parent, name, node)
}

fn set_int(image: &mut ImageFile, parent: NodeId, name: &str, value: i64) -> Result<()> {
    let node = image.new_int(value)?;
    image.set(parent, name, node)
}

fn set_doubles(image: &mut ImageFile, parent: NodeId, name: &str, members: &[(&str, f64)]) -> Result<()> {
    let group = image.new_structure()?;
    for &(member, value) in members {
        set_double(image, group, member, value)?;
    }
    image.set(parent, name, group)
}

fn set_ints(image: &mut ImageFile, parent: NodeId, name: &str, members: &[(&str, i64)]) -> Result<()> {
    let group = image.new_structure()?;
    for &(member, value) in members {
        set_int(image, group, member, value)?;
    }
    image.set(parent, name, group)
}

fn write_index_bounds(image: &mut ImageFile, scan: NodeId, b: &IndexBounds) -> Result<()> {
    set_ints(
        image,
        scan,
        "indexBounds",
        &[
            ("rowMinimum", b.row_minimum),
            ("rowMaximum", b.row_maximum),
            ("columnMinimum", b.column_minimum),
            ("columnMaximum", b.column_maximum),
            ("returnMinimum", b.return_minimum),
            ("returnMaximum", b.return_maximum),
        ],
    )
}

fn write_intensity_limits(image: &mut ImageFile, scan: NodeId, l: &IntensityLimits) -> Result<()> {
    set_doubles(
        image,
        scan,
        "intensityLimits",
        &[
            ("intensityMinimum", l.intensity_minimum),
            ("intensityMaximum", l.intensity_maximum),
        ],
    )
}

/// Colors are stored as full-range 8-bit channels.
fn write_color_limits(image: &mut ImageFile, scan: NodeId) -> Result<()> {
    set_ints(
        image,
        scan,
        "colorLimits",
        &[
            ("colorRedMinimum", 0),
            ("colorRedMaximum", 255),
            ("colorGreenMinimum", 0),
            ("colorGreenMaximum", 255),
            ("colorBlueMinimum", 0),
            ("colorBlueMaximum", 255),
        ],
    )
}

fn write_cartesian_bounds(image: &mut ImageFile, scan: NodeId, b: &CartesianBounds) -> Result<()> {
    set_doubles(
        image,
        scan,
        "cartesianBounds",
        &[
            ("xMinimum", b.x_minimum),
            ("xMaximum", b.x_maximum),
            ("yMinimum", b.y_minimum),
            ("yMaximum", b.y_maximum),
            ("zMinimum", b.z_minimum),
            ("zMaximum", b.z_maximum),
        ],
    )
}

fn write_spherical_bounds(image: &mut ImageFile, scan: NodeId, b: &SphericalBounds) -> Result<()> {
    set_doubles(
        image,
        scan,
        "sphericalBounds",
        &[
            ("rangeMinimum", b.range_minimum),
            ("rangeMaximum", b.range_maximum),
            ("elevationMinimum", b.elevation_minimum),
            ("elevationMaximum", b.elevation_maximum),
            ("azimuthStart", b.azimuth_start),
            ("azimuthEnd", b.azimuth_end),
        ],
    )
}

fn write_pose(image: &mut ImageFile, scan: NodeId, pose: &Pose) -> Result<()> {
    let [w, x, y, z] = pose.rotation_wxyz();
    let t = pose.translation;
    let node = image.new_structure()?;
    set_doubles(image, node, "rotation", &[("w", w), ("x", x), ("y", y), ("z", z)])?;
    set_doubles(image, node, "translation", &[("x", t.x), ("y", t.y), ("z", t.z)])?;
    image.set(scan, "pose", node)
}

fn write_acquisition_time(image: &mut ImageFile, scan: NodeId, name: &str, t: &AcquisitionTime) -> Result<()> {
    let node = image.new_structure()?;
    set_double(image, node, "dateTimeValue", t.date_time_value)?;
    set_int(image, node, "isAtomicClockReferenced", i64::from(t.is_atomic_clock_referenced))?;
    image.set(scan, name, node)
}

fn write_default_header(image: &mut ImageFile) -> Result<()> {
    let root = image.root();
    set_string(image, root, "formatName", FORMAT_NAME)?;
    set_string(image, root, "guid", &format!("{{{}}}", uuid::Uuid::new_v4()))?;
    set_int(image, root, "versionMajor", i64::from(format::CURRENT_VERSION))?;
    set_int(image, root, "versionMinor", 0)?;
    set_string(image, root, "libraryVersion", LIBRARY_VERSION)?;
    set_string(image, root, "coordinateMetadata", "")?;

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    write_acquisition_time(
        image,
        root,
        "creationDateTime",
        &AcquisitionTime {
            date_time_value: now,
            is_atomic_clock_referenced: false,
        },
    )?;

    let data3d = image.new_vector(true)?;
    image.set(root, "data3D", data3d)?;
    let images2d = image.new_vector(true)?;
    image.set(root, "images2D", images2d)?;
    debug!("wrote default archive header");
    Ok(())
}
