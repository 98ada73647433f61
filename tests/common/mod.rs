//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Once;

use pointarchive::scan::{PointData, PointField};
use tempfile::TempDir;

static INIT: Once = Once::new();

/// Install a fmt subscriber once, filtered by `RUST_LOG`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Scratch directory plus a path for `name` inside it.
pub fn scratch(name: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join(name);
    (dir, path)
}

/// Cartesian points with every optional field filled.
pub fn full_cloud(n: usize) -> PointData {
    let mut data = PointData::new();
    data.insert(PointField::CartesianX, (0..n).map(|i| i as f64 * 0.25).collect::<Vec<_>>());
    data.insert(PointField::CartesianY, (0..n).map(|i| -(i as f64) * 1.5 + 1.0e6).collect::<Vec<_>>());
    data.insert(PointField::CartesianZ, (0..n).map(|i| (i % 7) as f64 / 3.0).collect::<Vec<_>>());
    data.insert(PointField::Intensity, (0..n).map(|i| i as f32 / 10.0).collect::<Vec<_>>());
    data.insert(PointField::ColorRed, (0..n).map(|i| (i % 256) as u8).collect::<Vec<_>>());
    data.insert(PointField::ColorGreen, (0..n).map(|i| (i * 3 % 256) as u8).collect::<Vec<_>>());
    data.insert(PointField::ColorBlue, (0..n).map(|i| 255 - (i % 256) as u8).collect::<Vec<_>>());
    data.insert(PointField::RowIndex, (0..n).map(|i| (i / 10 + 5) as u16).collect::<Vec<_>>());
    data.insert(PointField::ColumnIndex, (0..n).map(|i| (i % 10 + 2) as u16).collect::<Vec<_>>());
    data.insert(PointField::CartesianInvalidState, (0..n).map(|i| (i % 5 == 4) as i8).collect::<Vec<_>>());
    data
}
