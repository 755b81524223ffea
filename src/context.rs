use crate::device::DeviceAdapter;

/// Identity of one device context within one OS process.
///
/// Two transfers compare equal here exactly when IPC between them would be
/// meaningless: same process, same driver context, same device. The broker
/// treats a rebuild inside the producing context as a protocol violation.
#[derive(
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
)]
pub struct ContextId {
    /// OS process id of the worker.
    pub pid: u32,
    /// Opaque token for the driver context, stable for the adapter's lifetime.
    pub ctx: u64,
    /// Device ordinal the context is bound to.
    pub device: u32,
}

impl ContextId {
    /// Identity of the calling worker as seen through `adapter`.
    pub fn current(adapter: &dyn DeviceAdapter) -> Self {
        Self {
            pid: std::process::id(),
            ctx: adapter.context_token(),
            device: adapter.device_ordinal(),
        }
    }

    /// Fixed-width byte encoding used when hashing transfer identities.
    pub(crate) fn to_key_bytes(self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..4].copy_from_slice(&self.pid.to_le_bytes());
        out[4..12].copy_from_slice(&self.ctx.to_le_bytes());
        out[12..].copy_from_slice(&self.device.to_le_bytes());
        out
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ContextId(pid={}, ctx={:#x}, dev={})",
            self.pid, self.ctx, self.device
        )
    }
}

/// Endpoint addresses of the two parties to a transfer, as the scheduler
/// layer knows them. `None` at the serialize call site means the destination
/// is unknown and the transfer must be self-contained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferContext {
    /// Address of the exporting worker, e.g. `tcp://10.0.0.5:8786`.
    pub sender: String,
    /// Address of the importing worker.
    pub recipient: String,
}

impl TransferContext {
    pub fn new(sender: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            recipient: recipient.into(),
        }
    }

    /// Whether both endpoints resolve to the same host name, the
    /// precondition for offering a zero-copy transfer.
    pub fn same_host(&self) -> bool {
        let sender = host_of(&self.sender);
        !sender.is_empty() && sender == host_of(&self.recipient)
    }
}

/// Host portion of an endpoint address. Accepts bare hosts, `host:port`
/// pairs, scheme-prefixed URIs and bracketed IPv6 literals.
pub(crate) fn host_of(endpoint: &str) -> &str {
    let rest = match endpoint.split_once("://") {
        Some((_, rest)) => rest,
        None => endpoint,
    };
    if let Some(stripped) = rest.strip_prefix('[') {
        return stripped.split(']').next().unwrap_or(rest);
    }
    match rest.rsplit_once(':') {
        Some((host, _)) => host,
        None => rest,
    }
}
