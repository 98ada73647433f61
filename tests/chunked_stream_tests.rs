//! Integration tests for bounded-memory record streaming.

mod common;

use pointarchive::engine::{ImageFile, OpenMode};
use pointarchive::prelude::*;
use pointarchive::scan::{read_all, StreamStats};

use common::{full_cloud, init_tracing, scratch};

#[test]
fn test_chunked_read_across_uneven_chunks() {
    init_tracing();
    let (_dir, path) = scratch("chunks.pta");
    let data = full_cloud(10_001);
    {
        let mut archive = ScanArchive::create(&path).unwrap();
        archive
            .write_scan_raw(&data, &WriteScanOptions::default().with_chunk_size(1000))
            .unwrap();
        archive.close().unwrap();
    }

    let archive = ScanArchive::open(&path).unwrap();
    let header = archive.header(0).unwrap();
    assert_eq!(header.point_count().unwrap(), 10_001);

    let fields = [PointField::CartesianX, PointField::RowIndex];
    let mut xs: Vec<f64> = Vec::new();
    let mut rows: Vec<u16> = Vec::new();
    let mut largest = 0;
    let stats = ChunkedStreamReader::new(999)
        .read(archive.image(), header.points(), &fields, |buffers, n| {
            largest = largest.max(n);
            xs.extend_from_slice(&buffers[0].array().as_slice::<f64>().unwrap()[..n]);
            rows.extend_from_slice(&buffers[1].array().as_slice::<u16>().unwrap()[..n]);
            Ok(())
        })
        .unwrap();

    assert_eq!(stats, StreamStats { chunks: 11, records: 10_001 });
    assert_eq!(largest, 999);
    assert_eq!(xs.as_slice(), data.values::<f64>(PointField::CartesianX).unwrap());
    assert_eq!(rows.as_slice(), data.values::<u16>(PointField::RowIndex).unwrap());
}

#[test]
fn test_chunk_callback_error_stops_read() {
    init_tracing();
    let (_dir, path) = scratch("abort.pta");
    {
        let mut archive = ScanArchive::create(&path).unwrap();
        archive.write_scan_raw(&full_cloud(50), &WriteScanOptions::default()).unwrap();
        archive.close().unwrap();
    }

    let archive = ScanArchive::open(&path).unwrap();
    let points = archive.header(0).unwrap().points();
    let mut calls = 0;
    let result = ChunkedStreamReader::new(10).read(archive.image(), points, &[PointField::CartesianZ], |_, _| {
        calls += 1;
        if calls == 2 {
            Err(Error::other("stop"))
        } else {
            Ok(())
        }
    });
    assert!(matches!(result, Err(Error::Other(_))));
    assert_eq!(calls, 2);

    // The failed read released its stream.
    let all = read_all(archive.image(), points, &[PointField::CartesianZ]).unwrap();
    assert_eq!(all.point_count(), 50);
}

#[test]
fn test_one_reader_per_stream() {
    init_tracing();
    let (_dir, path) = scratch("busy.pta");
    {
        let mut archive = ScanArchive::create(&path).unwrap();
        archive.write_scan_raw(&full_cloud(5), &WriteScanOptions::default()).unwrap();
        archive.close().unwrap();
    }

    let image = ImageFile::open(&path, OpenMode::Read).unwrap();
    let points = image.get("/data3D/0/points").unwrap();
    let first = image.reader(points).unwrap();
    assert!(matches!(image.reader(points), Err(Error::StreamBusy(_))));
    drop(first);
    assert!(image.reader(points).is_ok());
}

#[test]
fn test_stream_written_once() {
    init_tracing();
    let (_dir, path) = scratch("once.pta");
    let mut archive = ScanArchive::create(&path).unwrap();
    archive.write_scan_raw(&full_cloud(3), &WriteScanOptions::default()).unwrap();

    let image = archive.image_mut();
    let points = image.get("/data3D/0/points").unwrap();
    assert!(matches!(image.writer(points), Err(Error::AlreadyWritten(_))));
    assert!(matches!(image.reader(points), Err(Error::WriteOnly)));
}

#[test]
fn test_empty_scan() {
    init_tracing();
    let (_dir, path) = scratch("empty.pta");
    {
        let mut archive = ScanArchive::create(&path).unwrap();
        archive.write_scan_raw(&full_cloud(0), &WriteScanOptions::default()).unwrap();
        archive.close().unwrap();
    }

    let archive = ScanArchive::open(&path).unwrap();
    assert_eq!(archive.header(0).unwrap().point_count().unwrap(), 0);
    let data = archive.read_scan(0, &ReadScanOptions::default()).unwrap();
    assert_eq!(data.point_count(), 0);
    assert_eq!(data.len(), 3);
}
