//! Shared setup for transfer tests.
//!
//! Workers here are host-adapter backed: each adapter instance poses as a
//! distinct device context, so two workers in one test process exercise the
//! same protocol paths as two GPU processes on one machine.

use std::sync::Arc;

use cudex::{DeviceAdapter, HostAdapter, TransferConfig, TransferContext, TransferNode};

/// A worker advertising the loopback host, plus the adapter its buffers
/// must be built with.
pub fn worker(use_ipc: bool) -> (Arc<dyn DeviceAdapter>, TransferNode) {
    let (_, adapter, node) = counted_worker_with_advertise(use_ipc, "127.0.0.1");
    (adapter, node)
}

/// A worker publishing `advertise` in its headers while still listening on
/// loopback, for forcing the network path between co-located workers.
pub fn worker_with_advertise(
    use_ipc: bool,
    advertise: &str,
) -> (Arc<dyn DeviceAdapter>, TransferNode) {
    let (_, adapter, node) = counted_worker_with_advertise(use_ipc, advertise);
    (adapter, node)
}

/// Like [`worker`], also handing back the concrete adapter so tests can
/// watch its allocation counter.
pub fn counted_worker(use_ipc: bool) -> (Arc<HostAdapter>, Arc<dyn DeviceAdapter>, TransferNode) {
    counted_worker_with_advertise(use_ipc, "127.0.0.1")
}

fn counted_worker_with_advertise(
    use_ipc: bool,
    advertise: &str,
) -> (Arc<HostAdapter>, Arc<dyn DeviceAdapter>, TransferNode) {
    let host = Arc::new(HostAdapter::new());
    let adapter: Arc<dyn DeviceAdapter> = host.clone();
    let config = TransferConfig {
        use_ipc,
        advertise_host: advertise.to_string(),
        bind_host: "127.0.0.1".to_string(),
    };
    let node = TransferNode::start(Arc::clone(&adapter), config).expect("start transfer node");
    (host, adapter, node)
}

/// Endpoint pair on one host, the shape a scheduler hands over when both
/// workers are co-located.
pub fn local_ctx() -> TransferContext {
    TransferContext::new("tcp://127.0.0.1:8786", "tcp://127.0.0.1:8787")
}

/// Endpoint pair on different hosts.
pub fn cross_host_ctx() -> TransferContext {
    TransferContext::new("tcp://10.0.0.5:8786", "tcp://10.0.0.6:8786")
}
