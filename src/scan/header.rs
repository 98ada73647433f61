//! Scan metadata: a borrowed view over one scan node plus an owned snapshot.

use serde::{Deserialize, Serialize};

use super::fields::{CoordinateSystem, PointField};
use super::transform::Pose;
use crate::engine::{ImageFile, Node, NodeId};
use crate::util::{BBox3d, DMat3, DQuat, DVec3, Error, Result};

/// Axis-aligned bounds in the scan's local cartesian frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartesianBounds {
    pub x_minimum: f64,
    pub x_maximum: f64,
    pub y_minimum: f64,
    pub y_maximum: f64,
    pub z_minimum: f64,
    pub z_maximum: f64,
}

impl CartesianBounds {
    pub fn from_bbox(b: &BBox3d) -> Self {
        Self {
            x_minimum: b.min.x,
            x_maximum: b.max.x,
            y_minimum: b.min.y,
            y_maximum: b.max.y,
            z_minimum: b.min.z,
            z_maximum: b.max.z,
        }
    }

    pub fn to_bbox(&self) -> BBox3d {
        BBox3d::new(
            DVec3::new(self.x_minimum, self.y_minimum, self.z_minimum),
            DVec3::new(self.x_maximum, self.y_maximum, self.z_maximum),
        )
    }

    /// Axis-aligned hull of the eight corners mapped through `pose`.
    pub fn transformed(&self, pose: &Pose) -> Self {
        Self::from_bbox(&self.to_bbox().map_corners(|p| pose.to_global_point(p)))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SphericalBounds {
    pub range_minimum: f64,
    pub range_maximum: f64,
    pub elevation_minimum: f64,
    pub elevation_maximum: f64,
    pub azimuth_start: f64,
    pub azimuth_end: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntensityLimits {
    pub intensity_minimum: f64,
    pub intensity_maximum: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorLimits {
    pub color_red_minimum: f64,
    pub color_red_maximum: f64,
    pub color_green_minimum: f64,
    pub color_green_maximum: f64,
    pub color_blue_minimum: f64,
    pub color_blue_maximum: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexBounds {
    pub row_minimum: i64,
    pub row_maximum: i64,
    pub column_minimum: i64,
    pub column_maximum: i64,
    pub return_minimum: i64,
    pub return_maximum: i64,
}

/// A point in time with its clock reference flag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquisitionTime {
    pub date_time_value: f64,
    pub is_atomic_clock_referenced: bool,
}

/// Owned snapshot of a scan's metadata, detached from any archive.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanMetadata {
    pub guid: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub point_count: u64,
    pub point_fields: Vec<String>,
    pub pose: Option<Pose>,
    pub cartesian_bounds: Option<CartesianBounds>,
    pub spherical_bounds: Option<SphericalBounds>,
    pub intensity_limits: Option<IntensityLimits>,
    pub color_limits: Option<ColorLimits>,
    pub index_bounds: Option<IndexBounds>,
    pub acquisition_start: Option<AcquisitionTime>,
    pub acquisition_end: Option<AcquisitionTime>,
    pub temperature: Option<f64>,
    pub relative_humidity: Option<f64>,
    pub atmospheric_pressure: Option<f64>,
}

impl ScanMetadata {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Read view of one scan structure inside an archive.
#[derive(Clone, Copy)]
pub struct ScanHeader<'a> {
    image: &'a ImageFile,
    node: NodeId,
    points: NodeId,
}

impl<'a> ScanHeader<'a> {
    /// View `node`, which must be a structure with a `points` compressed
    /// vector.
    pub fn new(image: &'a ImageFile, node: NodeId) -> Result<Self> {
        image.structure(node)?;
        let points = image.lookup(node, "points")?;
        image.compressed_vector(points)?;
        Ok(Self { image, node, points })
    }

    #[inline]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The scan's record stream.
    #[inline]
    pub fn points(&self) -> NodeId {
        self.points
    }

    pub fn point_count(&self) -> Result<u64> {
        Ok(self.image.compressed_vector(self.points)?.record_count)
    }

    /// Top-level prototype field names, in prototype order.
    pub fn point_fields(&self) -> Result<Vec<String>> {
        let prototype = self.image.compressed_vector(self.points)?.prototype;
        Ok(self
            .image
            .structure(prototype)?
            .names()
            .map(str::to_string)
            .collect())
    }

    pub fn has_point_field(&self, field: PointField) -> Result<bool> {
        Ok(self.point_fields()?.iter().any(|n| n == field.name()))
    }

    /// Classify the prototype as cartesian or spherical.
    pub fn coordinate_system(&self) -> Result<CoordinateSystem> {
        CoordinateSystem::classify(&self.point_fields()?)
    }

    fn child(&self, path: &str) -> Option<NodeId> {
        self.image.lookup(self.node, path).ok()
    }

    /// Numeric member, `None` when absent.
    fn opt_num(&self, path: &str) -> Result<Option<f64>> {
        self.child(path)
            .map(|id| self.image.numeric_value(id))
            .transpose()
    }

    /// Numeric member of a present group; absence is an error.
    fn num(&self, path: &str) -> Result<f64> {
        self.opt_num(path)?
            .ok_or_else(|| Error::PathUndefined(path.to_string()))
    }

    fn opt_str(&self, path: &str) -> Result<Option<&'a str>> {
        self.child(path)
            .map(|id| self.image.string_value(id))
            .transpose()
    }

    pub fn guid(&self) -> Result<Option<&'a str>> {
        self.opt_str("guid")
    }

    pub fn name(&self) -> Result<Option<&'a str>> {
        self.opt_str("name")
    }

    pub fn description(&self) -> Result<Option<&'a str>> {
        self.opt_str("description")
    }

    pub fn has_pose(&self) -> bool {
        self.child("pose").is_some()
    }

    /// The scan pose. Fails with [`Error::MissingPose`] when the scan has
    /// none; a pose lacking its rotation or translation uses the identity
    /// for that part.
    pub fn pose(&self) -> Result<Pose> {
        if !self.has_pose() {
            return Err(Error::MissingPose);
        }
        let rotation = match self.child("pose/rotation") {
            Some(_) => DQuat::from_xyzw(
                self.num("pose/rotation/x")?,
                self.num("pose/rotation/y")?,
                self.num("pose/rotation/z")?,
                self.num("pose/rotation/w")?,
            ),
            None => DQuat::IDENTITY,
        };
        let translation = match self.child("pose/translation") {
            Some(_) => DVec3::new(
                self.num("pose/translation/x")?,
                self.num("pose/translation/y")?,
                self.num("pose/translation/z")?,
            ),
            None => DVec3::ZERO,
        };
        Ok(Pose::new(rotation, translation))
    }

    /// Rotation as `[w, x, y, z]`.
    pub fn rotation(&self) -> Result<[f64; 4]> {
        Ok(self.pose()?.rotation_wxyz())
    }

    pub fn rotation_matrix(&self) -> Result<DMat3> {
        Ok(self.pose()?.rotation_matrix())
    }

    pub fn translation(&self) -> Result<[f64; 3]> {
        Ok(self.pose()?.translation.to_array())
    }

    pub fn cartesian_bounds(&self) -> Result<Option<CartesianBounds>> {
        if self.child("cartesianBounds").is_none() {
            return Ok(None);
        }
        Ok(Some(CartesianBounds {
            x_minimum: self.num("cartesianBounds/xMinimum")?,
            x_maximum: self.num("cartesianBounds/xMaximum")?,
            y_minimum: self.num("cartesianBounds/yMinimum")?,
            y_maximum: self.num("cartesianBounds/yMaximum")?,
            z_minimum: self.num("cartesianBounds/zMinimum")?,
            z_maximum: self.num("cartesianBounds/zMaximum")?,
        }))
    }

    pub fn spherical_bounds(&self) -> Result<Option<SphericalBounds>> {
        if self.child("sphericalBounds").is_none() {
            return Ok(None);
        }
        Ok(Some(SphericalBounds {
            range_minimum: self.num("sphericalBounds/rangeMinimum")?,
            range_maximum: self.num("sphericalBounds/rangeMaximum")?,
            elevation_minimum: self.num("sphericalBounds/elevationMinimum")?,
            elevation_maximum: self.num("sphericalBounds/elevationMaximum")?,
            azimuth_start: self.num("sphericalBounds/azimuthStart")?,
            azimuth_end: self.num("sphericalBounds/azimuthEnd")?,
        }))
    }

    pub fn intensity_limits(&self) -> Result<Option<IntensityLimits>> {
        if self.child("intensityLimits").is_none() {
            return Ok(None);
        }
        Ok(Some(IntensityLimits {
            intensity_minimum: self.num("intensityLimits/intensityMinimum")?,
            intensity_maximum: self.num("intensityLimits/intensityMaximum")?,
        }))
    }

    pub fn color_limits(&self) -> Result<Option<ColorLimits>> {
        if self.child("colorLimits").is_none() {
            return Ok(None);
        }
        Ok(Some(ColorLimits {
            color_red_minimum: self.num("colorLimits/colorRedMinimum")?,
            color_red_maximum: self.num("colorLimits/colorRedMaximum")?,
            color_green_minimum: self.num("colorLimits/colorGreenMinimum")?,
            color_green_maximum: self.num("colorLimits/colorGreenMaximum")?,
            color_blue_minimum: self.num("colorLimits/colorBlueMinimum")?,
            color_blue_maximum: self.num("colorLimits/colorBlueMaximum")?,
        }))
    }

    pub fn index_bounds(&self) -> Result<Option<IndexBounds>> {
        if self.child("indexBounds").is_none() {
            return Ok(None);
        }
        let int = |name: &str| -> Result<i64> {
            let path = format!("indexBounds/{name}");
            let id = self
                .child(&path)
                .ok_or_else(|| Error::PathUndefined(path.clone()))?;
            self.image.integer_value(id)
        };
        Ok(Some(IndexBounds {
            row_minimum: int("rowMinimum")?,
            row_maximum: int("rowMaximum")?,
            column_minimum: int("columnMinimum")?,
            column_maximum: int("columnMaximum")?,
            return_minimum: int("returnMinimum")?,
            return_maximum: int("returnMaximum")?,
        }))
    }

    fn acquisition(&self, name: &str) -> Result<Option<AcquisitionTime>> {
        if self.child(name).is_none() {
            return Ok(None);
        }
        let date_time_value = self.num(&format!("{name}/dateTimeValue"))?;
        let atomic = self.opt_num(&format!("{name}/isAtomicClockReferenced"))?;
        Ok(Some(AcquisitionTime {
            date_time_value,
            is_atomic_clock_referenced: atomic.is_some_and(|v| v != 0.0),
        }))
    }

    pub fn acquisition_start(&self) -> Result<Option<AcquisitionTime>> {
        self.acquisition("acquisitionStart")
    }

    pub fn acquisition_end(&self) -> Result<Option<AcquisitionTime>> {
        self.acquisition("acquisitionEnd")
    }

    pub fn temperature(&self) -> Result<Option<f64>> {
        self.opt_num("temperature")
    }

    pub fn relative_humidity(&self) -> Result<Option<f64>> {
        self.opt_num("relativeHumidity")
    }

    pub fn atmospheric_pressure(&self) -> Result<Option<f64>> {
        self.opt_num("atmosphericPressure")
    }

    /// Indented depth-first dump of the scan node: one line per child,
    /// leaves followed by their value.
    pub fn pretty_print(&self) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        self.dump(self.node, "", &mut lines)?;
        Ok(lines)
    }

    fn dump(&self, id: NodeId, indent: &str, lines: &mut Vec<String>) -> Result<()> {
        for child in self.image.children(id)? {
            let name = self.image.element_name(child)?;
            let node = self.image.node(child)?;
            let line = match node {
                Node::Element(e) => format!("{indent}<{} '{name}'>: {e}", node.kind()),
                Node::CompressedVector(cv) => {
                    format!("{indent}<{} '{name}'>: {} records", node.kind(), cv.record_count)
                }
                Node::Blob(b) => format!("{indent}<{} '{name}'>: {} bytes", node.kind(), b.byte_count),
                _ => format!("{indent}<{} '{name}'>", node.kind()),
            };
            lines.push(line);
            if matches!(node, Node::Structure(_) | Node::Vector(_)) {
                self.dump(child, &format!("{indent}    "), lines)?;
            }
        }
        Ok(())
    }

    /// Owned copy of every metadata item.
    pub fn metadata(&self) -> Result<ScanMetadata> {
        Ok(ScanMetadata {
            guid: self.guid()?.map(str::to_string),
            name: self.name()?.map(str::to_string),
            description: self.description()?.map(str::to_string),
            point_count: self.point_count()?,
            point_fields: self.point_fields()?,
            pose: if self.has_pose() { Some(self.pose()?) } else { None },
            cartesian_bounds: self.cartesian_bounds()?,
            spherical_bounds: self.spherical_bounds()?,
            intensity_limits: self.intensity_limits()?,
            color_limits: self.color_limits()?,
            index_bounds: self.index_bounds()?,
            acquisition_start: self.acquisition_start()?,
            acquisition_end: self.acquisition_end()?,
            temperature: self.temperature()?,
            relative_humidity: self.relative_humidity()?,
            atmospheric_pressure: self.atmospheric_pressure()?,
        })
    }
}

impl std::fmt::Debug for ScanHeader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanHeader")
            .field("node", &self.node)
            .field("points", &self.points)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::OpenMode;
    use tempfile::NamedTempFile;

    /// Scan with a translation-only pose and a two-field prototype.
    fn scan_archive(path: &std::path::Path, with_pose: bool) {
        let mut image = ImageFile::create(path).unwrap();
        let scan = image.new_structure().unwrap();
        let guid = image.new_string("{abc}").unwrap();
        image.set(scan, "guid", guid).unwrap();
        let t = image.new_double(21.5).unwrap();
        image.set(scan, "temperature", t).unwrap();

        if with_pose {
            let pose = image.new_structure().unwrap();
            let tr = image.new_structure().unwrap();
            for (axis, v) in [("x", 1.0), ("y", 2.0), ("z", 3.0)] {
                let n = image.new_double(v).unwrap();
                image.set(tr, axis, n).unwrap();
            }
            image.set(pose, "translation", tr).unwrap();
            image.set(scan, "pose", pose).unwrap();
        }

        let ib = image.new_structure().unwrap();
        for (name, v) in [
            ("rowMinimum", 1),
            ("rowMaximum", 3),
            ("columnMinimum", 1),
            ("columnMaximum", 3),
            ("returnMinimum", 0),
            ("returnMaximum", 0),
        ] {
            let n = image.new_int(v).unwrap();
            image.set(ib, name, n).unwrap();
        }
        image.set(scan, "indexBounds", ib).unwrap();

        let proto = image.new_structure().unwrap();
        for name in ["cartesianX", "cartesianY"] {
            let n = image.new_double(0.0).unwrap();
            image.set(proto, name, n).unwrap();
        }
        let codecs = image.new_vector(true).unwrap();
        let cv = image.new_compressed_vector(proto, codecs).unwrap();
        image.set(scan, "points", cv).unwrap();

        let root = image.root();
        image.set(root, "scan", scan).unwrap();
        image.close().unwrap();
    }

    #[test]
    fn test_header_accessors() {
        let temp = NamedTempFile::new().unwrap();
        scan_archive(temp.path(), true);
        let image = ImageFile::open(temp.path(), OpenMode::Read).unwrap();
        let header = ScanHeader::new(&image, image.get("/scan").unwrap()).unwrap();

        assert_eq!(header.guid().unwrap(), Some("{abc}"));
        assert_eq!(header.name().unwrap(), None);
        assert_eq!(header.point_count().unwrap(), 0);
        assert_eq!(header.point_fields().unwrap(), ["cartesianX", "cartesianY"]);
        assert_eq!(header.temperature().unwrap(), Some(21.5));
        assert_eq!(header.relative_humidity().unwrap(), None);
        assert_eq!(header.index_bounds().unwrap().unwrap().row_minimum, 1);
        assert_eq!(header.cartesian_bounds().unwrap(), None);

        // Rotation absent inside a present pose falls back to identity.
        assert!(header.has_pose());
        assert_eq!(header.rotation().unwrap(), [1.0, 0.0, 0.0, 0.0]);
        assert_eq!(header.translation().unwrap(), [1.0, 2.0, 3.0]);
        assert_eq!(header.rotation_matrix().unwrap(), DMat3::IDENTITY);
    }

    #[test]
    fn test_missing_pose_and_coordinate_system() {
        let temp = NamedTempFile::new().unwrap();
        scan_archive(temp.path(), false);
        let image = ImageFile::open(temp.path(), OpenMode::Read).unwrap();
        let header = ScanHeader::new(&image, image.get("/scan").unwrap()).unwrap();

        assert!(!header.has_pose());
        assert!(matches!(header.rotation(), Err(Error::MissingPose)));
        assert!(matches!(header.translation(), Err(Error::MissingPose)));
        assert!(matches!(
            header.coordinate_system(),
            Err(Error::UnsupportedCoordinateSystem { .. })
        ));
    }

    #[test]
    fn test_pretty_print_and_json() {
        let temp = NamedTempFile::new().unwrap();
        scan_archive(temp.path(), true);
        let image = ImageFile::open(temp.path(), OpenMode::Read).unwrap();
        let header = ScanHeader::new(&image, image.get("/scan").unwrap()).unwrap();

        let lines = header.pretty_print().unwrap();
        assert_eq!(lines[0], "<String 'guid'>: {abc}");
        assert!(lines.iter().any(|l| l == "        <Float 'x'>: 1"));
        assert!(lines.iter().any(|l| l.contains("CompressedVector 'points'")));

        let meta = header.metadata().unwrap();
        assert_eq!(meta.pose.unwrap().translation, DVec3::new(1.0, 2.0, 3.0));
        let json = meta.to_json().unwrap();
        assert!(json.contains("\"rowMinimum\": 1"));
        assert!(json.contains("\"temperature\": 21.5"));
    }

    #[test]
    fn test_transformed_bounds() {
        let b = CartesianBounds {
            x_minimum: 0.0,
            x_maximum: 2.0,
            y_minimum: 0.0,
            y_maximum: 1.0,
            z_minimum: 0.0,
            z_maximum: 1.0,
        };
        let pose = Pose::new(
            DQuat::from_rotation_z(std::f64::consts::FRAC_PI_2),
            DVec3::new(10.0, 0.0, 0.0),
        );
        let t = b.transformed(&pose);
        assert!((t.x_minimum - 9.0).abs() < 1e-12);
        assert!((t.x_maximum - 10.0).abs() < 1e-12);
        assert!((t.y_maximum - 2.0).abs() < 1e-12);
    }
}
