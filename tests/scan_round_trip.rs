//! Integration tests for writing scans and reading them back.

mod common;

use std::f64::consts::{FRAC_1_SQRT_2, FRAC_PI_2};

use pointarchive::engine::FloatPrecision;
use pointarchive::prelude::*;
use pointarchive::scan::IntensityLimits;

use common::{full_cloud, init_tracing, scratch};

fn xyz(x: Vec<f64>, y: Vec<f64>, z: Vec<f64>) -> PointData {
    let mut data = PointData::new();
    data.insert(PointField::CartesianX, x);
    data.insert(PointField::CartesianY, y);
    data.insert(PointField::CartesianZ, z);
    data
}

#[test]
fn test_index_bounds_follow_observed_indices() {
    init_tracing();
    let (_dir, path) = scratch("indices.pta");

    let mut data = xyz(vec![0.0, 1.0, 2.0, 3.0], vec![0.0, 1.0, 2.0, 3.0], vec![0.0, 1.0, 2.0, 3.0]);
    data.insert(PointField::RowIndex, vec![1u16, 1, 2, 3]);
    data.insert(PointField::ColumnIndex, vec![1u16, 1, 2, 3]);
    {
        let mut archive = ScanArchive::create(&path).expect("Failed to create archive");
        let index = archive
            .write_scan_raw(&data, &WriteScanOptions::default())
            .expect("Failed to write scan");
        assert_eq!(index, 0);
        archive.close().expect("Failed to close archive");
    }

    let archive = ScanArchive::open(&path).expect("Failed to open archive");
    let header = archive.header(0).unwrap();
    let bounds = header.index_bounds().unwrap().expect("index bounds missing");
    assert_eq!(bounds.row_minimum, 1);
    assert_eq!(bounds.row_maximum, 3);
    assert_eq!(bounds.column_minimum, 1);

    let raw = archive.read_scan_raw(0, &ReadRawOptions::default()).unwrap();
    assert_eq!(raw.values::<u16>(PointField::RowIndex).unwrap(), &[1, 1, 2, 3]);
    assert_eq!(raw.values::<u16>(PointField::ColumnIndex).unwrap(), &[1, 1, 2, 3]);
    assert_eq!(raw.values::<f64>(PointField::CartesianZ).unwrap(), &[0.0, 1.0, 2.0, 3.0]);
}

#[test]
fn test_raw_round_trip_through_second_archive() {
    init_tracing();
    let (_dir, first) = scratch("first.pta");
    let second = first.with_file_name("second.pta");

    let data = full_cloud(1000);
    {
        let mut archive = ScanArchive::create(&first).unwrap();
        let options = WriteScanOptions::default()
            .with_name("survey")
            .with_pose([1.0, 0.0, 0.0, 0.0], [10.0, 20.0, 30.0])
            .with_chunk_size(64);
        archive.write_scan_raw(&data, &options).unwrap();
        archive.close().unwrap();
    }

    let source = ScanArchive::open(&first).unwrap();
    let raw = source.read_scan_raw(0, &ReadRawOptions::default()).unwrap();
    assert_eq!(raw, data);

    let reference = source.header(0).unwrap().metadata().unwrap();
    assert_eq!(reference.name.as_deref(), Some("survey"));
    assert_eq!(reference.point_count, 1000);
    {
        let mut archive = ScanArchive::create(&second).unwrap();
        let options = WriteScanOptions::default().with_reference(reference.clone());
        archive.write_scan_raw(&raw, &options).unwrap();
        archive.close().unwrap();
    }

    let copy = ScanArchive::open(&second).unwrap();
    assert_eq!(copy.read_scan_raw(0, &ReadRawOptions::default()).unwrap(), data);

    let meta = copy.header(0).unwrap().metadata().unwrap();
    assert_eq!(meta.name.as_deref(), Some("survey"));
    assert_eq!(meta.pose, reference.pose);
    assert_eq!(meta.cartesian_bounds, reference.cartesian_bounds);
    assert_eq!(meta.intensity_limits, reference.intensity_limits);
    assert_eq!(meta.color_limits, reference.color_limits);
    assert_ne!(meta.guid, reference.guid);
}

#[test]
fn test_read_scan_masks_and_transforms() {
    init_tracing();
    let (_dir, path) = scratch("posed.pta");

    let mut data = xyz(vec![1.0, 2.0, 3.0], vec![0.0, 0.0, 0.0], vec![0.0, 0.0, 5.0]);
    data.insert(PointField::CartesianInvalidState, vec![0i8, 1, 0]);
    data.insert(PointField::Intensity, vec![0.5f32, 0.25, 0.75]);
    {
        let mut archive = ScanArchive::create(&path).unwrap();
        let options = WriteScanOptions::default()
            .with_pose([FRAC_1_SQRT_2, 0.0, 0.0, FRAC_1_SQRT_2], [100.0, 0.0, 0.0]);
        archive.write_scan_raw(&data, &options).unwrap();
        archive.close().unwrap();
    }

    let archive = ScanArchive::open(&path).unwrap();

    let local = archive
        .read_scan(0, &ReadScanOptions::default().with_transform(false).with_intensity(true))
        .unwrap();
    assert_eq!(local.point_count(), 2);
    assert!(!local.contains(PointField::CartesianInvalidState));
    assert_eq!(local.values::<f64>(PointField::CartesianX).unwrap(), &[1.0, 3.0]);
    assert_eq!(local.values::<f32>(PointField::Intensity).unwrap(), &[0.5, 0.75]);

    let global = archive.read_scan(0, &ReadScanOptions::default()).unwrap();
    let gx = global.values::<f64>(PointField::CartesianX).unwrap();
    let gy = global.values::<f64>(PointField::CartesianY).unwrap();
    let gz = global.values::<f64>(PointField::CartesianZ).unwrap();
    assert!((gx[0] - 100.0).abs() < 1e-9 && (gy[0] - 1.0).abs() < 1e-9);
    assert!((gx[1] - 100.0).abs() < 1e-9 && (gy[1] - 3.0).abs() < 1e-9);
    assert!(gz[0].abs() < 1e-9 && (gz[1] - 5.0).abs() < 1e-9);

    let origin = archive.scan_position(0).unwrap();
    assert!((origin - DVec3::new(100.0, 0.0, 0.0)).length() < 1e-12);
    let back = archive.to_scan_local(0, DVec3::new(100.0, 3.0, 5.0)).unwrap();
    assert!((back - DVec3::new(3.0, 0.0, 5.0)).length() < 1e-9);

    // Stored bounds are local and cover the valid points only.
    let bounds = archive.header(0).unwrap().cartesian_bounds().unwrap().unwrap();
    assert_eq!((bounds.x_minimum, bounds.x_maximum), (1.0, 3.0));
}

#[test]
fn test_extreme_and_non_finite_coordinates() {
    init_tracing();
    let (_dir, path) = scratch("extreme.pta");

    let big = f64::MAX;
    let mut data = xyz(
        vec![big, 0.9 * big, f64::NAN],
        vec![-big, 1.0, f64::INFINITY],
        vec![0.0, -0.5 * big, 2.0],
    );
    data.insert(PointField::CartesianInvalidState, vec![0i8, 0, 1]);
    {
        let mut archive = ScanArchive::create(&path).unwrap();
        archive.write_scan_raw(&data, &WriteScanOptions::default()).unwrap();

        // The same NaN on a valid point is refused before anything is written.
        let mut bad = xyz(vec![1.0, f64::NAN], vec![0.0, 0.0], vec![0.0, 0.0]);
        bad.insert(PointField::CartesianInvalidState, vec![0i8, 0]);
        assert!(matches!(
            archive.write_scan_raw(&bad, &WriteScanOptions::default()),
            Err(Error::NonFiniteValue { index: 1, .. })
        ));
        assert_eq!(archive.scan_count().unwrap(), 1);
        archive.close().unwrap();
    }

    let archive = ScanArchive::open(&path).unwrap();
    let raw = archive.read_scan_raw(0, &ReadRawOptions::default()).unwrap();
    let x = raw.values::<f64>(PointField::CartesianX).unwrap();
    let y = raw.values::<f64>(PointField::CartesianY).unwrap();
    assert_eq!(&x[..2], &[big, 0.9 * big]);
    assert!(x[2].is_nan());
    assert_eq!(&y[..2], &[-big, 1.0]);
    assert_eq!(y[2], f64::INFINITY);

    let bounds = archive.header(0).unwrap().cartesian_bounds().unwrap().unwrap();
    assert_eq!((bounds.x_minimum, bounds.x_maximum), (0.9 * big, big));
    assert_eq!((bounds.y_minimum, bounds.y_maximum), (-big, 1.0));
    assert_eq!((bounds.z_minimum, bounds.z_maximum), (-0.5 * big, 0.0));

    let points = archive.read_scan(0, &ReadScanOptions::default().with_transform(false)).unwrap();
    assert_eq!(points.point_count(), 2);
}

#[test]
fn test_missing_optional_field() {
    init_tracing();
    let (_dir, path) = scratch("bare.pta");
    {
        let mut archive = ScanArchive::create(&path).unwrap();
        let data = xyz(vec![0.0, 1.0], vec![0.0, 1.0], vec![0.0, 1.0]);
        archive.write_scan_raw(&data, &WriteScanOptions::default()).unwrap();
        archive.close().unwrap();
    }

    let archive = ScanArchive::open(&path).unwrap();
    let strict = ReadScanOptions::default().with_intensity(true);
    assert!(matches!(
        archive.read_scan(0, &strict),
        Err(Error::MissingField(name)) if name == "intensity"
    ));

    let tolerant = strict.with_colors(true).with_ignore_missing_fields(true);
    let data = archive.read_scan(0, &tolerant).unwrap();
    assert_eq!(data.len(), 3);
    assert_eq!(data.point_count(), 2);
}

#[test]
fn test_incomplete_coordinates_rejected() {
    init_tracing();
    let (_dir, path) = scratch("partial.pta");
    let mut archive = ScanArchive::create(&path).unwrap();

    let mut data = PointData::new();
    data.insert(PointField::CartesianX, vec![0.0f64]);
    data.insert(PointField::CartesianY, vec![0.0f64]);
    assert!(matches!(
        archive.write_scan_raw(&data, &WriteScanOptions::default()),
        Err(Error::UnsupportedCoordinateSystem { .. })
    ));
    assert_eq!(archive.scan_count().unwrap(), 0);

    let mut wrong_kind = xyz(vec![0.0], vec![0.0], vec![0.0]);
    wrong_kind.insert(PointField::Intensity, vec![1.0f64]);
    assert!(matches!(
        archive.write_scan_raw(&wrong_kind, &WriteScanOptions::default()),
        Err(Error::TypeMismatch { .. })
    ));
}

#[test]
fn test_spherical_scan_reads_as_cartesian() {
    init_tracing();
    let (_dir, path) = scratch("spherical.pta");
    {
        let mut archive = ScanArchive::create(&path).unwrap();
        let mut data = PointData::new();
        data.insert(PointField::SphericalRange, vec![1.0f64, 2.0, 9.0]);
        data.insert(PointField::SphericalAzimuth, vec![0.0f64, FRAC_PI_2, 0.0]);
        data.insert(PointField::SphericalElevation, vec![0.0f64, 0.0, FRAC_PI_2]);
        data.insert(PointField::SphericalInvalidState, vec![0i8, 0, 1]);
        archive.write_scan_raw(&data, &WriteScanOptions::default()).unwrap();
        archive.close().unwrap();
    }

    let archive = ScanArchive::open(&path).unwrap();
    let header = archive.header(0).unwrap();
    assert_eq!(header.coordinate_system().unwrap(), CoordinateSystem::Spherical);
    let sb = header.spherical_bounds().unwrap().unwrap();
    assert_eq!((sb.range_minimum, sb.range_maximum), (1.0, 2.0));
    assert!(header.cartesian_bounds().unwrap().is_none());

    let data = archive.read_scan(0, &ReadScanOptions::default()).unwrap();
    assert!(!data.contains(PointField::SphericalRange));
    let x = data.values::<f64>(PointField::CartesianX).unwrap();
    let y = data.values::<f64>(PointField::CartesianY).unwrap();
    assert_eq!(x.len(), 2);
    assert!((x[0] - 1.0).abs() < 1e-12 && y[0].abs() < 1e-12);
    assert!(x[1].abs() < 1e-12 && (y[1] - 2.0).abs() < 1e-12);
}

#[test]
fn test_read_raw_unsupported_field() {
    init_tracing();
    let (_dir, path) = scratch("foreign.pta");
    {
        let mut archive = ScanArchive::create(&path).unwrap();
        let image = archive.image_mut();
        let scan = image.new_structure().unwrap();
        let proto = image.new_structure().unwrap();
        for name in ["cartesianX", "cartesianY", "cartesianZ", "timeStamp"] {
            let leaf = image
                .new_float(0.0, FloatPrecision::Double, -1.0e9, 1.0e9)
                .unwrap();
            image.set(proto, name, leaf).unwrap();
        }
        let codecs = image.new_vector(true).unwrap();
        let points = image.new_compressed_vector(proto, codecs).unwrap();
        image.set(scan, "points", points).unwrap();
        let data3d = image.get("/data3D").unwrap();
        image.append(data3d, scan).unwrap();
        archive.close().unwrap();
    }

    let archive = ScanArchive::open(&path).unwrap();
    assert!(matches!(
        archive.read_scan_raw(0, &ReadRawOptions::default()),
        Err(Error::UnsupportedField(name)) if name == "timeStamp"
    ));
    let raw = archive
        .read_scan_raw(0, &ReadRawOptions::default().with_ignore_unsupported_fields(true))
        .unwrap();
    assert_eq!(raw.len(), 3);
    assert_eq!(raw.point_count(), 0);

    let header = archive.header(0).unwrap();
    assert!(!header.has_pose());
    assert!(matches!(archive.scan_position(0), Err(Error::MissingPose)));
    assert!(matches!(archive.header(1), Err(Error::IndexOutOfRange { index: 1, count: 1 })));
}

#[test]
fn test_metadata_json() {
    init_tracing();
    let (_dir, path) = scratch("json.pta");
    {
        let mut archive = ScanArchive::create(&path).unwrap();
        let mut data = xyz(vec![0.0, 2.0], vec![0.0, 2.0], vec![0.0, 2.0]);
        data.insert(PointField::Intensity, vec![0.0f32, 1.0]);
        let reference = ScanMetadata {
            temperature: Some(18.5),
            intensity_limits: Some(IntensityLimits {
                intensity_minimum: 0.0,
                intensity_maximum: 4095.0,
            }),
            ..Default::default()
        };
        let options = WriteScanOptions::default().with_name("json").with_reference(reference);
        archive.write_scan_raw(&data, &options).unwrap();
        archive.close().unwrap();
    }

    let archive = ScanArchive::open(&path).unwrap();
    let meta = archive.header(0).unwrap().metadata().unwrap();
    assert_eq!(meta.temperature, Some(18.5));
    assert_eq!(meta.intensity_limits.unwrap().intensity_maximum, 4095.0);

    let json = meta.to_json().unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed["name"], "json");
    assert_eq!(parsed["pointCount"], 2);
    assert_eq!(parsed["cartesianBounds"]["xMaximum"], 2.0);
}
