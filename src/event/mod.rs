//! Notification delivery for network events.
//!
//! Drivers and the poll scheduler publish [`Notification`]s onto a
//! [`NotificationBus`]. Consumers can attach a synchronous [`Watcher`]
//! callback or pull events from an async [`Subscription`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;

use crate::types::{HomeId, NodeId, ValueRef};

/// Notification discriminant, without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// Driver opened and usable.
    DriverReady,
    /// Driver open failed.
    DriverFailed,
    /// Driver removed.
    DriverRemoved,
    /// New value reported.
    ValueAdded,
    /// Value state changed.
    ValueChanged,
    /// Value read back unchanged.
    ValueRefreshed,
    /// Value disappeared.
    ValueRemoved,
    /// Node joined its network.
    NodeAdded,
    /// Node left its network.
    NodeRemoved,
    /// Unsolicited node application event.
    NodeEvent,
    /// Polling enabled for a value.
    PollingEnabled,
    /// Polling disabled for a value.
    PollingDisabled,
    /// Startup queries finished for a home.
    AllNodesQueried,
}

/// Event types delivered to watchers and subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A driver finished opening and its home network is usable.
    DriverReady {
        home_id: HomeId,
        controller_node: NodeId,
    },
    /// A driver could not be opened.
    DriverFailed { path: String },
    /// A driver was removed and its home id released.
    DriverRemoved { home_id: HomeId },
    /// A node reported a value not seen before.
    ValueAdded { value: ValueRef },
    /// A value's state changed.
    ValueChanged { value: ValueRef },
    /// A value was read back without changing, usually from a poll.
    ValueRefreshed { value: ValueRef },
    /// A value disappeared, e.g. with its node.
    ValueRemoved { value: ValueRef },
    /// A node joined the network.
    NodeAdded { home_id: HomeId, node_id: NodeId },
    /// A node left the network.
    NodeRemoved { home_id: HomeId, node_id: NodeId },
    /// A node sent an unsolicited application event.
    NodeEvent {
        home_id: HomeId,
        node_id: NodeId,
        event: u8,
    },
    /// Polling was enabled for a value.
    PollingEnabled { value: ValueRef },
    /// Polling was disabled for a value.
    PollingDisabled { value: ValueRef },
    /// Startup queries for every node in a home completed.
    AllNodesQueried { home_id: HomeId },
}

impl Notification {
    /// Returns the discriminant of this notification.
    #[must_use]
    pub const fn kind(&self) -> NotificationKind {
        match self {
            Self::DriverReady { .. } => NotificationKind::DriverReady,
            Self::DriverFailed { .. } => NotificationKind::DriverFailed,
            Self::DriverRemoved { .. } => NotificationKind::DriverRemoved,
            Self::ValueAdded { .. } => NotificationKind::ValueAdded,
            Self::ValueChanged { .. } => NotificationKind::ValueChanged,
            Self::ValueRefreshed { .. } => NotificationKind::ValueRefreshed,
            Self::ValueRemoved { .. } => NotificationKind::ValueRemoved,
            Self::NodeAdded { .. } => NotificationKind::NodeAdded,
            Self::NodeRemoved { .. } => NotificationKind::NodeRemoved,
            Self::NodeEvent { .. } => NotificationKind::NodeEvent,
            Self::PollingEnabled { .. } => NotificationKind::PollingEnabled,
            Self::PollingDisabled { .. } => NotificationKind::PollingDisabled,
            Self::AllNodesQueried { .. } => NotificationKind::AllNodesQueried,
        }
    }

    /// Returns the home network this notification refers to.
    ///
    /// `None` only for [`Notification::DriverFailed`], where no home id was
    /// ever assigned.
    #[must_use]
    pub const fn home_id(&self) -> Option<HomeId> {
        match self {
            Self::DriverReady { home_id, .. }
            | Self::DriverRemoved { home_id }
            | Self::NodeAdded { home_id, .. }
            | Self::NodeRemoved { home_id, .. }
            | Self::NodeEvent { home_id, .. }
            | Self::AllNodesQueried { home_id } => Some(*home_id),
            Self::ValueAdded { value }
            | Self::ValueChanged { value }
            | Self::ValueRefreshed { value }
            | Self::ValueRemoved { value }
            | Self::PollingEnabled { value }
            | Self::PollingDisabled { value } => Some(value.home_id()),
            Self::DriverFailed { .. } => None,
        }
    }

    /// Returns the node this notification refers to, if any.
    #[must_use]
    pub const fn node_id(&self) -> Option<NodeId> {
        match self {
            Self::DriverReady {
                controller_node, ..
            } => Some(*controller_node),
            Self::NodeAdded { node_id, .. }
            | Self::NodeRemoved { node_id, .. }
            | Self::NodeEvent { node_id, .. } => Some(*node_id),
            Self::ValueAdded { value }
            | Self::ValueChanged { value }
            | Self::ValueRefreshed { value }
            | Self::ValueRemoved { value }
            | Self::PollingEnabled { value }
            | Self::PollingDisabled { value } => Some(value.node_id()),
            Self::DriverFailed { .. } | Self::DriverRemoved { .. } | Self::AllNodesQueried { .. } => {
                None
            }
        }
    }

    /// Returns the value this notification refers to, if any.
    #[must_use]
    pub const fn value(&self) -> Option<ValueRef> {
        match self {
            Self::ValueAdded { value }
            | Self::ValueChanged { value }
            | Self::ValueRefreshed { value }
            | Self::ValueRemoved { value }
            | Self::PollingEnabled { value }
            | Self::PollingDisabled { value } => Some(*value),
            _ => None,
        }
    }
}

/// Error a watcher may report; delivery continues to the remaining watchers.
pub type WatcherError = Box<dyn std::error::Error + Send + Sync>;

/// A registered recipient of notifications.
///
/// `on_event` is called from whichever task publishes the notification, so
/// implementations must not block for long. Watcher identity is the [`Arc`]
/// pointer: registering the same `Arc` twice is rejected, while two separate
/// allocations of an identical watcher count as distinct registrations.
pub trait Watcher: Send + Sync {
    /// Handles one notification.
    ///
    /// # Errors
    ///
    /// Returned errors are logged and do not affect other watchers.
    fn on_event(&self, event: &Notification) -> Result<(), WatcherError>;
}

impl<F> Watcher for F
where
    F: Fn(&Notification) + Send + Sync,
{
    fn on_event(&self, event: &Notification) -> Result<(), WatcherError> {
        self(event);
        Ok(())
    }
}

/// A subscription to notifications.
pub struct Subscription {
    receiver: broadcast::Receiver<Notification>,
}

impl Subscription {
    /// Receives the next notification.
    ///
    /// Returns `None` once the bus has been dropped. A slow subscriber that
    /// falls behind the channel capacity skips the overwritten events and
    /// resumes with the oldest one still buffered.
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Fans notifications out to watchers and subscribers.
///
/// Watchers are invoked synchronously in registration order. The watcher
/// list is snapshotted before delivery, so a watcher may add or remove
/// watchers from inside its own callback; such changes apply from the next
/// notification onward.
pub struct NotificationBus {
    watchers: Mutex<Vec<Arc<dyn Watcher>>>,
    sender: broadcast::Sender<Notification>,
}

impl NotificationBus {
    /// Creates a bus whose subscriptions buffer up to `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            watchers: Mutex::new(Vec::new()),
            sender,
        }
    }

    fn watchers_lock(&self) -> MutexGuard<'_, Vec<Arc<dyn Watcher>>> {
        self.watchers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a watcher. Returns `false` if this exact `Arc` is already
    /// registered.
    pub fn add_watcher(&self, watcher: Arc<dyn Watcher>) -> bool {
        let mut watchers = self.watchers_lock();
        if watchers.iter().any(|w| Arc::ptr_eq(w, &watcher)) {
            return false;
        }
        watchers.push(watcher);
        true
    }

    /// Removes a previously registered watcher. Returns `false` if it was
    /// not registered.
    pub fn remove_watcher(&self, watcher: &Arc<dyn Watcher>) -> bool {
        let mut watchers = self.watchers_lock();
        match watchers.iter().position(|w| Arc::ptr_eq(w, watcher)) {
            Some(index) => {
                watchers.remove(index);
                true
            }
            None => false,
        }
    }

    /// Removes all watchers.
    pub fn clear_watchers(&self) {
        self.watchers_lock().clear();
    }

    /// Number of registered watchers.
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.watchers_lock().len()
    }

    /// Delivers a notification to every watcher, then to subscribers.
    ///
    /// The watcher lock is not held during delivery.
    pub fn dispatch(&self, event: Notification) {
        let watchers: Vec<Arc<dyn Watcher>> = self.watchers_lock().clone();
        for watcher in &watchers {
            if let Err(e) = watcher.on_event(&event) {
                tracing::warn!("watcher failed on {:?} notification: {e}", event.kind());
            }
        }
        // Broadcast to all subscribers (ignore send errors - no receivers is fine)
        let _ = self.sender.send(event);
    }

    /// Subscribes to notifications.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }
}
