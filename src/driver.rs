//! Driver registry.
//!
//! A driver is the in-process representation of one attached controller:
//! the open link, the controller attributes read at startup, and the task
//! pumping link events onto the notification bus. The registry owns every
//! driver and keyed lookups by home id and by controller path.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::event::{Notification, NotificationBus};
use crate::poll::PollScheduler;
use crate::port::{ControllerPort, LinkEvent, LinkHandle};
use crate::types::{
    ControllerInfo, ControllerInterface, DriverStatistics, HomeId, LibraryKind, NodeId,
};

/// Live counters for one driver, shared with its event pump task.
#[derive(Debug, Default)]
struct DriverStats {
    events_received: AtomicU64,
    polls_issued: AtomicU64,
    send_queue_depth: AtomicU32,
}

impl DriverStats {
    fn note_event(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    fn note_poll(&self) {
        self.polls_issued.fetch_add(1, Ordering::Relaxed);
    }

    fn set_send_queue_depth(&self, depth: u32) {
        self.send_queue_depth.store(depth, Ordering::Relaxed);
    }

    fn snapshot(&self) -> DriverStatistics {
        DriverStatistics {
            events_received: self.events_received.load(Ordering::Relaxed),
            polls_issued: self.polls_issued.load(Ordering::Relaxed),
            send_queue_depth: self.send_queue_depth.load(Ordering::Relaxed),
        }
    }
}

struct DriverEntry {
    path: String,
    interface: ControllerInterface,
    info: ControllerInfo,
    handle: LinkHandle,
    stats: Arc<DriverStats>,
    pump: JoinHandle<()>,
}

impl Drop for DriverEntry {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[derive(Default)]
struct RegistryState {
    drivers: HashMap<HomeId, DriverEntry>,
    paths: HashMap<String, HomeId>,
    /// Paths with an open in flight, reserved so a concurrent add of the
    /// same path fails fast instead of opening the device twice.
    pending: HashSet<String>,
    /// Set by [`DriverRegistry::seal`]; no further driver registers.
    closed: bool,
}

/// Claim on a controller path while its open is in flight.
///
/// Dropping the add future mid-open must free the path again, so the claim
/// releases itself on drop unless the registration step defused it first.
struct PathReservation<'a> {
    state: &'a Mutex<RegistryState>,
    path: &'a str,
    armed: bool,
}

impl PathReservation<'_> {
    /// Disarms the drop hook once the registration step has settled the
    /// claim under its own lock.
    fn defuse(mut self) {
        self.armed = false;
    }
}

impl Drop for PathReservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.pending.remove(self.path);
        }
    }
}

/// Owns every attached driver.
///
/// Add and remove go through the port asynchronously; the registry lock is
/// never held across those awaits, only around its own bookkeeping.
pub(crate) struct DriverRegistry<P> {
    port: Arc<P>,
    bus: Arc<NotificationBus>,
    scheduler: Arc<PollScheduler>,
    state: Mutex<RegistryState>,
}

impl<P: ControllerPort + 'static> DriverRegistry<P> {
    pub(crate) fn new(
        port: Arc<P>,
        bus: Arc<NotificationBus>,
        scheduler: Arc<PollScheduler>,
    ) -> Self {
        Self {
            port,
            bus,
            scheduler,
            state: Mutex::new(RegistryState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reserve<'a>(&'a self, path: &'a str) -> Result<PathReservation<'a>> {
        let mut state = self.lock();
        if state.closed {
            return Err(Error::NotInitialized);
        }
        if state.paths.contains_key(path) || !state.pending.insert(path.to_owned()) {
            return Err(Error::AlreadyExists {
                path: path.to_owned(),
            });
        }
        Ok(PathReservation {
            state: &self.state,
            path,
            armed: true,
        })
    }

    /// Stops accepting new drivers. An add whose open is still in flight
    /// when the seal lands is rolled back instead of registering.
    pub(crate) fn seal(&self) {
        self.lock().closed = true;
    }

    /// Opens the controller at `path` and registers its driver.
    ///
    /// Emits [`Notification::DriverReady`] on success and
    /// [`Notification::DriverFailed`] when the open fails. Once the
    /// registry is sealed the add fails with [`Error::NotInitialized`],
    /// closing the link again if the open had already finished.
    pub(crate) async fn add(
        &self,
        path: &str,
        interface: ControllerInterface,
    ) -> Result<HomeId> {
        let reservation = self.reserve(path)?;

        tracing::info!("opening controller at {path} ({interface})");
        let link = match self.port.open(path, interface).await {
            Ok(link) => link,
            Err(e) => {
                drop(reservation);
                tracing::warn!("failed to open controller at {path}: {e}");
                self.bus.dispatch(Notification::DriverFailed {
                    path: path.to_owned(),
                });
                return Err(Error::ConnectionFailed {
                    path: path.to_owned(),
                    source: Box::new(e),
                });
            }
        };

        let home_id = link.home_id;
        let controller_node = link.info.controller_node;
        let stats = Arc::new(DriverStats::default());
        let pump = tokio::spawn(pump_link_events(
            home_id,
            Arc::clone(&stats),
            Arc::clone(&self.bus),
            link.events,
        ));
        let entry = DriverEntry {
            path: path.to_owned(),
            interface,
            info: link.info,
            handle: link.handle,
            stats,
            pump,
        };

        let rejected = {
            let mut state = self.lock();
            state.pending.remove(path);
            if state.closed {
                Some((entry, Error::NotInitialized))
            } else if state.drivers.contains_key(&home_id) {
                // Two paths reached the same physical controller.
                Some((
                    entry,
                    Error::AlreadyExists {
                        path: path.to_owned(),
                    },
                ))
            } else {
                state.paths.insert(path.to_owned(), home_id);
                state.drivers.insert(home_id, entry);
                None
            }
        };
        reservation.defuse();
        if let Some((entry, error)) = rejected {
            tracing::warn!("rolling back driver for home {home_id} at {path}: {error}");
            if let Err(e) = self.port.close(entry.handle).await {
                tracing::debug!("closing rolled-back link failed: {e}");
            }
            return Err(error);
        }

        tracing::info!("driver ready for home {home_id} at {path}");
        self.bus.dispatch(Notification::DriverReady {
            home_id,
            controller_node,
        });
        Ok(home_id)
    }

    /// Closes the driver's link, drops its poll entries, and emits
    /// [`Notification::DriverRemoved`].
    pub(crate) async fn remove(&self, path: &str) -> Result<()> {
        let (home_id, entry) = {
            let mut state = self.lock();
            let Some(home_id) = state.paths.remove(path) else {
                return Err(Error::NotFound {
                    path: path.to_owned(),
                });
            };
            match state.drivers.remove(&home_id) {
                Some(entry) => (home_id, entry),
                None => {
                    return Err(Error::NotFound {
                        path: path.to_owned(),
                    });
                }
            }
        };

        if let Err(e) = self.port.close(entry.handle).await {
            tracing::warn!("closing controller at {path} failed: {e}");
        }
        let purged = self.scheduler.purge_home(home_id);
        if purged > 0 {
            tracing::debug!("dropped {purged} poll entries for home {home_id}");
        }
        tracing::info!("driver removed for home {home_id} at {path}");
        self.bus.dispatch(Notification::DriverRemoved { home_id });
        Ok(())
    }

    /// Controller paths of every registered driver.
    pub(crate) fn paths(&self) -> Vec<String> {
        self.lock().paths.keys().cloned().collect()
    }

    pub(crate) fn contains(&self, home_id: HomeId) -> bool {
        self.lock().drivers.contains_key(&home_id)
    }

    fn with_driver<T>(&self, home_id: HomeId, f: impl FnOnce(&DriverEntry) -> T) -> Result<T> {
        let state = self.lock();
        state
            .drivers
            .get(&home_id)
            .map(f)
            .ok_or(Error::UnknownHome { home_id })
    }

    pub(crate) fn controller_node_id(&self, home_id: HomeId) -> Result<NodeId> {
        self.with_driver(home_id, |d| d.info.controller_node)
    }

    pub(crate) fn suc_node_id(&self, home_id: HomeId) -> Result<Option<NodeId>> {
        self.with_driver(home_id, |d| d.info.suc_node)
    }

    pub(crate) fn is_primary_controller(&self, home_id: HomeId) -> Result<bool> {
        self.with_driver(home_id, |d| d.info.is_primary)
    }

    pub(crate) fn is_bridge_controller(&self, home_id: HomeId) -> Result<bool> {
        self.with_driver(home_id, |d| d.info.library_kind == LibraryKind::BridgeController)
    }

    pub(crate) fn library_version(&self, home_id: HomeId) -> Result<String> {
        self.with_driver(home_id, |d| d.info.library_version.clone())
    }

    pub(crate) fn library_type_name(&self, home_id: HomeId) -> Result<&'static str> {
        self.with_driver(home_id, |d| d.info.library_kind.name())
    }

    pub(crate) fn controller_path(&self, home_id: HomeId) -> Result<String> {
        self.with_driver(home_id, |d| d.path.clone())
    }

    pub(crate) fn controller_interface(&self, home_id: HomeId) -> Result<ControllerInterface> {
        self.with_driver(home_id, |d| d.interface)
    }

    pub(crate) fn send_queue_count(&self, home_id: HomeId) -> Result<u32> {
        self.with_driver(home_id, |d| d.stats.snapshot().send_queue_depth)
    }

    pub(crate) fn statistics(&self, home_id: HomeId) -> Result<DriverStatistics> {
        self.with_driver(home_id, |d| d.stats.snapshot())
    }

    /// Writes a driver's counters to the log. No-op for unknown homes.
    pub(crate) fn log_statistics(&self, home_id: HomeId) {
        match self.statistics(home_id) {
            Ok(stats) => tracing::info!(
                "driver statistics for home {home_id}: {} events received, {} polls issued, {} sends queued",
                stats.events_received,
                stats.polls_issued,
                stats.send_queue_depth
            ),
            Err(_) => tracing::debug!("no driver statistics for unknown home {home_id}"),
        }
    }

    /// Counts one issued poll against the driver. No-op for unknown homes.
    pub(crate) fn record_poll(&self, home_id: HomeId) {
        let _ = self.with_driver(home_id, |d| d.stats.note_poll());
    }
}

/// Forwards link events to the bus, stamped with the driver's home id.
///
/// Queue depth reports update the driver's cached counter and are not
/// forwarded. The task ends when the link's event stream does.
async fn pump_link_events(
    home_id: HomeId,
    stats: Arc<DriverStats>,
    bus: Arc<NotificationBus>,
    mut events: mpsc::Receiver<LinkEvent>,
) {
    while let Some(event) = events.recv().await {
        stats.note_event();
        let notification = match event {
            LinkEvent::SendQueue { depth } => {
                stats.set_send_queue_depth(depth);
                continue;
            }
            LinkEvent::ValueAdded { value } => Notification::ValueAdded { value },
            LinkEvent::ValueChanged { value } => Notification::ValueChanged { value },
            LinkEvent::ValueRefreshed { value } => Notification::ValueRefreshed { value },
            LinkEvent::ValueRemoved { value } => Notification::ValueRemoved { value },
            LinkEvent::NodeAdded { node_id } => Notification::NodeAdded { home_id, node_id },
            LinkEvent::NodeRemoved { node_id } => Notification::NodeRemoved { home_id, node_id },
            LinkEvent::NodeEvent { node_id, event } => Notification::NodeEvent {
                home_id,
                node_id,
                event,
            },
            LinkEvent::AllNodesQueried => Notification::AllNodesQueried { home_id },
        };
        tracing::trace!("home {home_id}: {:?}", notification.kind());
        bus.dispatch(notification);
    }
    tracing::debug!("event stream for home {home_id} ended");
}
