use cudex::protocol::codec;
use cudex::{
    DeviceBuffer, DType, Frame, Result, TransferBroker, TransferContext, TransferHeader,
    Transferable,
};

use super::helpers;

/// The full exchange: build on one worker, serialize, carry the header as
/// bytes the way an outer transport would, rebuild on the other worker.
fn exchange(
    exporter: &TransferBroker,
    importer: &TransferBroker,
    buffer: &DeviceBuffer,
    ctx: &TransferContext,
) -> DeviceBuffer {
    let (header, frames) = exporter.serialize(buffer, Some(ctx)).unwrap();
    let wire = codec::encode_header(&header).unwrap();
    let header = codec::decode_header(&wire).unwrap();
    importer.rebuild(&header, &frames).unwrap()
}

#[test]
fn test_hundred_ints_over_ipc() {
    let (adapter_a, exporter) = helpers::worker(true);
    let (_, importer) = helpers::worker(true);

    let data: Vec<i32> = (0..100).collect();
    let buffer = DeviceBuffer::from_slice(&adapter_a, &data).unwrap();
    let rebuilt = exchange(
        exporter.broker(),
        importer.broker(),
        &buffer,
        &helpers::local_ctx(),
    );
    assert_eq!(rebuilt.to_host_vec::<i32>().unwrap(), data);
    // Deferred transfer: the header went over the wire, the payload did not.
    assert_eq!(exporter.broker().exports().len(), 1);
}

#[test]
fn test_hundred_ints_falls_back_to_net() {
    let (adapter_a, exporter) = helpers::worker(true);
    // The importer advertises an address that is not the exporter's, so the
    // shared-memory path is off the table at rebuild time.
    let (_, importer) = helpers::worker_with_advertise(true, "203.0.113.7");

    let data: Vec<i32> = (0..100).collect();
    let buffer = DeviceBuffer::from_slice(&adapter_a, &data).unwrap();
    let rebuilt = exchange(
        exporter.broker(),
        importer.broker(),
        &buffer,
        &helpers::local_ctx(),
    );
    assert_eq!(rebuilt.to_host_vec::<i32>().unwrap(), data);
}

#[test]
fn test_normal_mode_end_to_end() {
    let (adapter_a, exporter) = helpers::worker(false);
    let (_, importer) = helpers::worker(false);

    let data: Vec<f64> = (0..100).map(|v| v as f64 * 0.5).collect();
    let buffer = DeviceBuffer::from_slice(&adapter_a, &data).unwrap();
    let rebuilt = exchange(
        exporter.broker(),
        importer.broker(),
        &buffer,
        &helpers::local_ctx(),
    );
    assert_eq!(rebuilt.to_host_vec::<f64>().unwrap(), data);
    assert!(exporter.broker().exports().is_empty());
}

#[test]
fn test_two_importers_share_one_export() {
    let (adapter_a, exporter) = helpers::worker(true);
    let (_, first) = helpers::worker(true);
    let (_, second) = helpers::worker(true);

    let data: Vec<u64> = (0..25).collect();
    let buffer = DeviceBuffer::from_slice(&adapter_a, &data).unwrap();
    let (header, frames) = exporter
        .broker()
        .serialize(&buffer, Some(&helpers::local_ctx()))
        .unwrap();

    let at_first = first.broker().rebuild(&header, &frames).unwrap();
    let at_second = second.broker().rebuild(&header, &frames).unwrap();
    assert_eq!(at_first.to_host_vec::<u64>().unwrap(), data);
    assert_eq!(at_second.to_host_vec::<u64>().unwrap(), data);
    assert_eq!(exporter.broker().exports().len(), 1);
}

#[test]
fn test_sequential_transfers_reuse_one_channel() {
    let (adapter_a, exporter) = helpers::worker(true);
    let (_, importer) = helpers::worker(true);
    let ctx = helpers::local_ctx();

    for round in 0..5i32 {
        let data: Vec<i32> = (0..10).map(|v| v + round * 100).collect();
        let buffer = DeviceBuffer::from_slice(&adapter_a, &data).unwrap();
        let rebuilt = exchange(exporter.broker(), importer.broker(), &buffer, &ctx);
        assert_eq!(rebuilt.to_host_vec::<i32>().unwrap(), data);
    }
    assert_eq!(exporter.broker().exports().len(), 5);
    assert_eq!(importer.broker().imports().len(), 5);
}

/// A two-buffer value, the shape a column with a null mask takes. Its
/// header composes the per-buffer headers; its frames are the per-buffer
/// frames in order.
struct BufferPair {
    values: DeviceBuffer,
    mask: DeviceBuffer,
}

struct PairHeader {
    values: TransferHeader,
    mask: TransferHeader,
    /// How many of the frames belong to `values`.
    split: usize,
}

impl Transferable for BufferPair {
    type Header = PairHeader;

    fn serialize(
        &self,
        broker: &TransferBroker,
        ctx: Option<&TransferContext>,
    ) -> Result<(Self::Header, Vec<Frame>)> {
        let (values, mut frames) = self.values.serialize(broker, ctx)?;
        let split = frames.len();
        let (mask, mask_frames) = self.mask.serialize(broker, ctx)?;
        frames.extend(mask_frames);
        Ok((
            PairHeader {
                values,
                mask,
                split,
            },
            frames,
        ))
    }

    fn deserialize(
        broker: &TransferBroker,
        header: &Self::Header,
        frames: &[Frame],
    ) -> Result<Self> {
        let values = DeviceBuffer::deserialize(broker, &header.values, &frames[..header.split])?;
        let mask = DeviceBuffer::deserialize(broker, &header.mask, &frames[header.split..])?;
        Ok(Self { values, mask })
    }
}

#[test]
fn test_composite_transfer_splits_frames() {
    let (adapter_a, exporter) = helpers::worker(false);
    let (_, importer) = helpers::worker(false);

    let pair = BufferPair {
        values: DeviceBuffer::from_slice(&adapter_a, &[1.5f64, 2.5, 3.5]).unwrap(),
        mask: DeviceBuffer::from_slice(&adapter_a, &[1u8, 0, 1]).unwrap(),
    };
    let (header, frames) = pair.serialize(exporter.broker(), None).unwrap();
    assert_eq!(frames.len(), 2);

    let rebuilt = BufferPair::deserialize(importer.broker(), &header, &frames).unwrap();
    assert_eq!(
        rebuilt.values.to_host_vec::<f64>().unwrap(),
        vec![1.5, 2.5, 3.5]
    );
    assert_eq!(rebuilt.mask.to_host_vec::<u8>().unwrap(), vec![1, 0, 1]);
}

#[test]
fn test_composite_transfer_over_ipc() {
    let (adapter_a, exporter) = helpers::worker(true);
    let (_, importer) = helpers::worker(true);

    let pair = BufferPair {
        values: DeviceBuffer::from_slice(&adapter_a, &(0..16i64).collect::<Vec<_>>()).unwrap(),
        mask: DeviceBuffer::from_slice(&adapter_a, &[0xffu8, 0xff]).unwrap(),
    };
    let (header, frames) = pair
        .serialize(exporter.broker(), Some(&helpers::local_ctx()))
        .unwrap();
    // Both constituents were deferred, nothing shipped inline.
    assert!(frames.is_empty());
    assert_eq!(exporter.broker().exports().len(), 2);

    let rebuilt = BufferPair::deserialize(importer.broker(), &header, &frames).unwrap();
    assert_eq!(
        rebuilt.values.to_host_vec::<i64>().unwrap(),
        (0..16i64).collect::<Vec<_>>()
    );
    assert_eq!(rebuilt.mask.to_host_vec::<u8>().unwrap(), vec![0xff, 0xff]);
}
