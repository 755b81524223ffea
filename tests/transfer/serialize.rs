use cudex::{DeviceBuffer, DType, TransferHeader};

use super::helpers;

#[test]
fn test_ipc_serialize_pins_before_header_exists() {
    let (adapter, node) = helpers::worker(true);
    let data: Vec<i32> = (0..32).collect();
    let buffer = DeviceBuffer::from_slice(&adapter, &data).unwrap();

    let (header, frames) = node
        .broker()
        .serialize(&buffer, Some(&helpers::local_ctx()))
        .unwrap();

    // The moment the header is visible, the key behind it must resolve.
    let TransferHeader::Ipc { key, host, port, dtype, len, .. } = header else {
        panic!("expected an IPC header");
    };
    assert!(node.broker().exports().contains(key));
    assert!(frames.is_empty());
    assert_eq!(host, "127.0.0.1");
    assert_eq!(port, node.endpoint().port());
    assert_eq!(dtype, DType::I32);
    assert_eq!(len, 32);
}

#[test]
fn test_ipc_reserialize_collapses_to_one_entry() {
    let (adapter, node) = helpers::worker(true);
    let buffer = DeviceBuffer::from_slice(&adapter, &[1i64, 2, 3]).unwrap();
    let ctx = helpers::local_ctx();

    let (first, _) = node.broker().serialize(&buffer, Some(&ctx)).unwrap();
    let (second, _) = node.broker().serialize(&buffer, Some(&ctx)).unwrap();

    assert_eq!(first, second);
    assert_eq!(node.broker().exports().len(), 1);
}

#[test]
fn test_distinct_buffers_get_distinct_keys() {
    let (adapter, node) = helpers::worker(true);
    let a = DeviceBuffer::from_slice(&adapter, &[1i32, 2]).unwrap();
    let b = DeviceBuffer::from_slice(&adapter, &[1i32, 2]).unwrap();
    let ctx = helpers::local_ctx();

    let (ha, _) = node.broker().serialize(&a, Some(&ctx)).unwrap();
    let (hb, _) = node.broker().serialize(&b, Some(&ctx)).unwrap();
    let (TransferHeader::Ipc { key: ka, .. }, TransferHeader::Ipc { key: kb, .. }) = (ha, hb)
    else {
        panic!("expected IPC headers");
    };
    assert_ne!(ka, kb);
    assert_eq!(node.broker().exports().len(), 2);
}

#[test]
fn test_normal_mode_ships_live_contents_only() {
    let (adapter, node) = helpers::worker(false);
    let mut buffer = DeviceBuffer::with_capacity(&adapter, DType::I32, 10).unwrap();
    buffer.extend(&[5i32, 6, 7]).unwrap();

    let (header, frames) = node
        .broker()
        .serialize(&buffer, Some(&helpers::local_ctx()))
        .unwrap();

    assert_eq!(
        header,
        TransferHeader::Normal {
            dtype: DType::I32,
            len: 3
        }
    );
    assert_eq!(frames.len(), 1);
    // Three elements, not the ten-element reservation.
    assert_eq!(frames[0].len(), 12);
    assert!(node.broker().exports().is_empty());
}

#[test]
fn test_cross_host_context_forces_normal_mode() {
    let (adapter, node) = helpers::worker(true);
    let buffer = DeviceBuffer::from_slice(&adapter, &[1i32, 2, 3]).unwrap();

    let (header, frames) = node
        .broker()
        .serialize(&buffer, Some(&helpers::cross_host_ctx()))
        .unwrap();

    assert!(matches!(header, TransferHeader::Normal { .. }));
    assert_eq!(frames.len(), 1);
    assert!(node.broker().exports().is_empty());
}

#[test]
fn test_missing_context_forces_normal_mode() {
    let (adapter, node) = helpers::worker(true);
    let buffer = DeviceBuffer::from_slice(&adapter, &[1i32, 2, 3]).unwrap();

    let (header, _) = node.broker().serialize(&buffer, None).unwrap();
    assert!(matches!(header, TransferHeader::Normal { .. }));
}

#[test]
fn test_slice_serializes_its_window() {
    let (adapter, node) = helpers::worker(false);
    let buffer = DeviceBuffer::from_slice(&adapter, &(0..100).collect::<Vec<i32>>()).unwrap();
    let view = buffer.slice(10, 20).unwrap();

    let (header, frames) = node.broker().serialize(&view, None).unwrap();
    assert_eq!(header.len(), 10);
    let rebuilt = node.broker().rebuild(&header, &frames).unwrap();
    assert_eq!(
        rebuilt.to_host_vec::<i32>().unwrap(),
        (10..20).collect::<Vec<i32>>()
    );
}
