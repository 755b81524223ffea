use crate::broker::TransferBroker;
use crate::buffer::DeviceBuffer;
use crate::context::TransferContext;
use crate::error::Result;
use crate::protocol::{Frame, TransferHeader};

/// Objects that can cross a worker boundary as a header plus byte frames.
///
/// Composite objects (a column with a null mask, a table of columns)
/// implement this by serializing each constituent buffer and composing the
/// per-buffer headers into their own header type, concatenating the frame
/// lists in order.
pub trait Transferable: Sized {
    /// Header describing one transfer of `Self`.
    type Header;

    /// Produce a header and accompanying frames. `ctx` carries the endpoint
    /// addresses when the scheduler knows the destination; `None` forces a
    /// self-contained transfer.
    fn serialize(
        &self,
        broker: &TransferBroker,
        ctx: Option<&TransferContext>,
    ) -> Result<(Self::Header, Vec<Frame>)>;

    /// Rebuild from a received header and frames.
    fn deserialize(broker: &TransferBroker, header: &Self::Header, frames: &[Frame])
        -> Result<Self>;
}

impl Transferable for DeviceBuffer {
    type Header = TransferHeader;

    fn serialize(
        &self,
        broker: &TransferBroker,
        ctx: Option<&TransferContext>,
    ) -> Result<(Self::Header, Vec<Frame>)> {
        broker.serialize(self, ctx)
    }

    fn deserialize(
        broker: &TransferBroker,
        header: &Self::Header,
        frames: &[Frame],
    ) -> Result<Self> {
        broker.rebuild(header, frames)
    }
}
