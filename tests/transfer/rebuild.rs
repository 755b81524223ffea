use cudex::{CudexError, DeviceBuffer, DType, TransferHeader};

use super::helpers;

#[test]
fn test_rebuild_in_producing_context_is_fatal() {
    let (adapter, node) = helpers::worker(true);
    let buffer = DeviceBuffer::from_slice(&adapter, &[1i32, 2, 3]).unwrap();
    let (header, frames) = node
        .broker()
        .serialize(&buffer, Some(&helpers::local_ctx()))
        .unwrap();

    // The key is valid and local, which is exactly why this must not
    // silently succeed.
    let err = node.broker().rebuild(&header, &frames).unwrap_err();
    match err {
        CudexError::SameContext { context } => {
            assert_eq!(context, node.broker().context());
        }
        other => panic!("expected a same-context error, got {other:?}"),
    }
}

#[test]
fn test_import_cache_spares_second_materialization() {
    let (adapter_a, exporter) = helpers::worker(true);
    let (host_b, _, importer) = helpers::counted_worker(true);

    let data: Vec<i32> = (0..50).collect();
    let buffer = DeviceBuffer::from_slice(&adapter_a, &data).unwrap();
    let (header, frames) = exporter
        .broker()
        .serialize(&buffer, Some(&helpers::local_ctx()))
        .unwrap();

    let first = importer.broker().rebuild(&header, &frames).unwrap();
    let allocs_after_first = host_b.alloc_count();
    let second = importer.broker().rebuild(&header, &frames).unwrap();

    // The repeat rebuild came out of the import cache, not a new allocation.
    assert_eq!(host_b.alloc_count(), allocs_after_first);
    assert_eq!(importer.broker().imports().len(), 1);
    assert_eq!(first.to_host_vec::<i32>().unwrap(), data);
    assert_eq!(second.to_host_vec::<i32>().unwrap(), data);
}

#[test]
fn test_rebuild_unknown_key_fails() {
    let (_, exporter) = helpers::worker(true);
    let (_, importer) = helpers::worker(true);

    let header = TransferHeader::Ipc {
        context: exporter.broker().context(),
        key: 0xdead_beef,
        host: "127.0.0.1".to_string(),
        port: exporter.endpoint().port(),
        dtype: DType::I32,
        len: 4,
    };
    let err = importer.broker().rebuild(&header, &[]).unwrap_err();
    assert!(matches!(
        err,
        CudexError::KeyNotExported { key: 0xdead_beef }
    ));
}

#[test]
fn test_rebuild_unreachable_peer_fails() {
    let (_, exporter) = helpers::worker(true);
    let (_, importer) = helpers::worker(true);

    // A port nothing listens on.
    let dead_port = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    };
    let header = TransferHeader::Ipc {
        context: exporter.broker().context(),
        key: 1,
        host: "127.0.0.1".to_string(),
        port: dead_port,
        dtype: DType::I32,
        len: 1,
    };
    let err = importer.broker().rebuild(&header, &[]).unwrap_err();
    assert!(matches!(err, CudexError::Transport { .. }));
}

#[test]
fn test_normal_rebuild_checks_frame_length() {
    let (_, node) = helpers::worker(false);

    let header = TransferHeader::Normal {
        dtype: DType::I32,
        len: 5,
    };
    let err = node
        .broker()
        .rebuild(&header, &[vec![0u8; 12]])
        .unwrap_err();
    assert!(matches!(err, CudexError::DecodeFailed(_)));

    let err = node.broker().rebuild(&header, &[]).unwrap_err();
    assert!(matches!(err, CudexError::DecodeFailed(_)));
}

#[test]
fn test_rebuilt_buffer_is_independent() {
    let (adapter_a, exporter) = helpers::worker(true);
    let (_, importer) = helpers::worker(true);

    let buffer = DeviceBuffer::from_slice(&adapter_a, &[10i32, 20, 30]).unwrap();
    let (header, frames) = exporter
        .broker()
        .serialize(&buffer, Some(&helpers::local_ctx()))
        .unwrap();
    let rebuilt = importer.broker().rebuild(&header, &frames).unwrap();

    // A full rebuild: size == capacity, nothing left to append into.
    assert_eq!(rebuilt.size(), 3);
    assert_eq!(rebuilt.capacity(), 3);
    assert_eq!(rebuilt.avail_space(), 0);
    assert_eq!(rebuilt.to_host_vec::<i32>().unwrap(), vec![10, 20, 30]);
}

#[test]
fn test_empty_buffer_transfers() {
    let (adapter_a, exporter) = helpers::worker(true);
    let (_, importer) = helpers::worker(true);

    let buffer = DeviceBuffer::null(&adapter_a, DType::F32).unwrap();
    let (header, frames) = exporter
        .broker()
        .serialize(&buffer, Some(&helpers::local_ctx()))
        .unwrap();
    let rebuilt = importer.broker().rebuild(&header, &frames).unwrap();
    assert!(rebuilt.is_empty());
    assert_eq!(rebuilt.dtype(), DType::F32);
}
