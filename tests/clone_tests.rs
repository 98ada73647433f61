//! Integration tests for whole-archive cloning.

mod common;

use pointarchive::engine::{ImageFile, OpenMode};
use pointarchive::prelude::*;
use pointarchive::scan::{clone_image, copy_node, CloneReport};

use common::{full_cloud, init_tracing, scratch};

const BLOB_LEN: usize = 3000;

fn blob_bytes() -> Vec<u8> {
    (0..BLOB_LEN).map(|i| (i * 7 % 251) as u8).collect()
}

/// Archive with one scan and one image blob written in two segments.
fn build_source(path: &std::path::Path) {
    let mut archive = ScanArchive::create(path).unwrap();
    let options = WriteScanOptions::default()
        .with_name("source")
        .with_pose([1.0, 0.0, 0.0, 0.0], [1.0, 2.0, 3.0])
        .with_chunk_size(100);
    archive.write_scan_raw(&full_cloud(777), &options).unwrap();

    let bytes = blob_bytes();
    let image = archive.image_mut();
    let entry = image.new_structure().unwrap();
    let blob = image.new_blob(BLOB_LEN as u64).unwrap();
    image.write_blob(blob, &bytes[1000..], 1000).unwrap();
    image.write_blob(blob, &bytes[..1000], 0).unwrap();
    image.set(entry, "jpegImage", blob).unwrap();
    let images = image.get("/images2D").unwrap();
    image.append(images, entry).unwrap();
    archive.close().unwrap();
}

#[test]
fn test_clone_image_copies_every_payload() {
    init_tracing();
    let (_dir, src_path) = scratch("source.pta");
    let dst_path = src_path.with_file_name("clone.pta");
    build_source(&src_path);

    let src = ImageFile::open(&src_path, OpenMode::Read).unwrap();
    {
        let mut dst = ImageFile::create(&dst_path).unwrap();
        let report = clone_image(&src, &mut dst).unwrap();
        assert_eq!(
            report,
            CloneReport {
                compressed_vectors: 1,
                records: 777,
                chunks: 1,
                blobs: 1,
                blob_bytes: BLOB_LEN as u64,
            }
        );
        dst.close().unwrap();
    }

    let source = ScanArchive::open(&src_path).unwrap();
    let copy = ScanArchive::open(&dst_path).unwrap();
    assert_eq!(copy.scan_count().unwrap(), 1);
    assert_eq!(
        copy.header(0).unwrap().metadata().unwrap(),
        source.header(0).unwrap().metadata().unwrap()
    );
    assert_eq!(
        copy.read_scan_raw(0, &ReadRawOptions::default()).unwrap(),
        source.read_scan_raw(0, &ReadRawOptions::default()).unwrap()
    );

    let image = copy.image();
    let blob = image.get("/images2D/0/jpegImage").unwrap();
    let mut buf = vec![0u8; BLOB_LEN];
    image.read_blob(blob, &mut buf, 0).unwrap();
    assert_eq!(buf, blob_bytes());

    for path in ["/formatName", "/guid", "/libraryVersion"] {
        assert_eq!(
            image.string_value(image.get(path).unwrap()).unwrap(),
            source.image().string_value(source.image().get(path).unwrap()).unwrap()
        );
    }
}

#[test]
fn test_copy_node_defers_payloads() {
    init_tracing();
    let (_dir, src_path) = scratch("defer.pta");
    let dst_path = src_path.with_file_name("defer_copy.pta");
    build_source(&src_path);

    let src = ImageFile::open(&src_path, OpenMode::Read).unwrap();
    let mut dst = ImageFile::create(&dst_path).unwrap();

    let data3d = copy_node(&src, src.get("/data3D").unwrap(), &mut dst).unwrap();
    assert_eq!(data3d.worklist.compressed_vectors.len(), 1);
    assert!(data3d.worklist.blobs.is_empty());

    // The shell exists but holds no records until the worklist is drained.
    let pair = data3d.worklist.compressed_vectors[0];
    assert_eq!(dst.child_count(pair.dest).unwrap(), 0);
    assert_eq!(dst.leaf_paths(pair.dest).unwrap(), src.leaf_paths(pair.source).unwrap());

    let images = copy_node(&src, src.get("/images2D").unwrap(), &mut dst).unwrap();
    assert_eq!(images.worklist.blobs.len(), 1);

    let root = dst.root();
    dst.set(root, "data3D", data3d.node).unwrap();
    dst.set(root, "images2D", images.node).unwrap();

    let mut worklist = data3d.worklist;
    worklist.extend(images.worklist);
    let report = worklist.transfer_with(&src, &mut dst, 250).unwrap();
    assert_eq!(report.records, 777);
    assert_eq!(report.chunks, 4);
    assert_eq!(report.blob_bytes, BLOB_LEN as u64);
    assert_eq!(dst.child_count(pair.dest).unwrap(), 777);
}
