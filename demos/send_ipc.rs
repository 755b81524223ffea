//! Two co-located workers exchange a column buffer without the payload
//! ever leaving device memory.
//!
//! Run with: cargo run --example send_ipc

use std::sync::Arc;

use cudex::protocol::codec;
use cudex::{
    DeviceAdapter, DeviceBuffer, HostAdapter, TransferConfig, TransferContext, TransferNode,
};

fn main() -> cudex::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cudex=debug".into()),
        )
        .init();

    let config = TransferConfig {
        use_ipc: true,
        advertise_host: "127.0.0.1".to_string(),
        bind_host: "127.0.0.1".to_string(),
    };

    // Each adapter is its own device context; swap in CudaAdapter for the
    // real thing.
    let adapter_a: Arc<dyn DeviceAdapter> = Arc::new(HostAdapter::new());
    let adapter_b: Arc<dyn DeviceAdapter> = Arc::new(HostAdapter::new());
    let worker_a = TransferNode::start(Arc::clone(&adapter_a), config.clone())?;
    let worker_b = TransferNode::start(adapter_b, config)?;
    println!("worker A channel: {}", worker_a.endpoint());
    println!("worker B channel: {}", worker_b.endpoint());

    // A scheduler would know both endpoint addresses; here they are both
    // loopback, which is what makes the zero-copy offer legal.
    let ctx = TransferContext::new(
        format!("tcp://{}", worker_a.endpoint()),
        format!("tcp://{}", worker_b.endpoint()),
    );

    let column: Vec<i32> = (0..100).collect();
    let buffer = DeviceBuffer::from_slice(&adapter_a, &column)?;
    let (header, frames) = worker_a.broker().serialize(&buffer, Some(&ctx))?;
    println!(
        "serialized {} elements into a {} byte header and {} frames",
        buffer.size(),
        codec::encode_header(&header)?.len(),
        frames.len()
    );

    // Only the header crosses the outer transport.
    let wire = codec::encode_header(&header)?;
    let received = codec::decode_header(&wire)?;

    let rebuilt = worker_b.broker().rebuild(&received, &frames)?;
    println!(
        "rebuilt {} elements, first={:?} last={:?}",
        rebuilt.size(),
        rebuilt.get::<i32>(0)?,
        rebuilt.get::<i32>(-1)?
    );
    assert_eq!(rebuilt.to_host_vec::<i32>()?, column);
    println!("contents match");
    Ok(())
}
