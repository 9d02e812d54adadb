//! Controller port abstraction.
//!
//! A [`ControllerPort`] is the protocol stack behind driver management: it
//! owns the transport and the Z-Wave framing, and hands the manager an open
//! [`ControllerLink`] per controller. The manager core never touches bytes;
//! it opens and closes links and asks for value refreshes.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::{ControllerInfo, ControllerInterface, HomeId, NodeId, ValueRef};

pub mod mock;
pub mod serial;

pub use mock::{MockPort, MockPortHandle};
pub use serial::available_ports;

/// Opaque handle to one open controller link.
///
/// Issued by [`ControllerPort::open`] and passed back to
/// [`ControllerPort::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkHandle(u64);

impl LinkHandle {
    /// Creates a handle from its raw form.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw form.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Raw protocol events produced by an open link.
///
/// A link belongs to exactly one home network, so these carry no home id of
/// their own; value events must reference the link's home. The stream ends
/// when the link closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A node reported a value not seen before.
    ValueAdded { value: ValueRef },
    /// A value's state changed.
    ValueChanged { value: ValueRef },
    /// A value was read back without changing.
    ValueRefreshed { value: ValueRef },
    /// A value disappeared.
    ValueRemoved { value: ValueRef },
    /// A node joined the network.
    NodeAdded { node_id: NodeId },
    /// A node left the network.
    NodeRemoved { node_id: NodeId },
    /// A node sent an unsolicited application event.
    NodeEvent { node_id: NodeId, event: u8 },
    /// Startup queries for every node completed.
    AllNodesQueried,
    /// The link's outbound command queue depth changed. Feeds the cached
    /// depth behind [`Manager::send_queue_count`](crate::Manager::send_queue_count);
    /// not forwarded to watchers.
    SendQueue { depth: u32 },
}

/// An open link to one controller, produced by [`ControllerPort::open`].
#[derive(Debug)]
pub struct ControllerLink {
    /// Handle for closing the link later.
    pub handle: LinkHandle,
    /// Home network behind the controller.
    pub home_id: HomeId,
    /// Controller attributes read while opening.
    pub info: ControllerInfo,
    /// Raw protocol events from the link.
    pub events: mpsc::Receiver<LinkEvent>,
}

/// Protocol stack collaborator for driver management.
///
/// Implementations are shared across the manager's background tasks, so all
/// methods take `&self` and must be safe to call concurrently.
pub trait ControllerPort: Send + Sync {
    /// Opens the controller at `path` and returns its link.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be opened or does not answer
    /// its startup queries.
    fn open<'a>(
        &'a self,
        path: &'a str,
        interface: ControllerInterface,
    ) -> Pin<Box<dyn Future<Output = Result<ControllerLink>> + Send + 'a>>;

    /// Closes a previously opened link.
    ///
    /// After this returns, the link's event stream ends.
    ///
    /// # Errors
    ///
    /// Returns an error if shutting the device down fails.
    fn close(&self, handle: LinkHandle) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Asks the node behind `value` to report the value's current state.
    ///
    /// A successful return means the request was issued; the refreshed state
    /// arrives later as a [`LinkEvent`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownHome`](crate::Error::UnknownHome) if no open
    /// link serves the value's home network.
    fn request_value_refresh(
        &self,
        value: ValueRef,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}
