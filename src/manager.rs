//! Main [`Manager`] implementation.
//!
//! This module provides the high-level [`Manager`] that combines driver
//! management, notification delivery, and poll scheduling into a unified
//! interface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::driver::DriverRegistry;
use crate::error::{Error, Result};
use crate::event::{Notification, NotificationBus, Subscription, Watcher};
use crate::poll::{PollScheduler, run_poll_loop};
use crate::port::ControllerPort;
use crate::types::{ControllerInterface, DriverStatistics, HomeId, NodeId, ValueRef};

/// Notifications buffered per [`Subscription`] before a slow consumer lags.
const NOTIFICATION_CAPACITY: usize = 256;

/// Set while a manager exists anywhere in the process.
static INSTANCE_ACTIVE: AtomicBool = AtomicBool::new(false);

struct ManagerInner<P> {
    registry: Arc<DriverRegistry<P>>,
    bus: Arc<NotificationBus>,
    scheduler: Arc<PollScheduler>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

/// Handle to the network manager.
///
/// Cheap to clone; every clone drives the same manager. Resources are
/// released by [`Manager::destroy`], or when the last clone drops.
pub struct Manager<P> {
    inner: Arc<ManagerInner<P>>,
}

impl<P> Clone for Manager<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: ControllerPort + 'static> Manager<P> {
    /// Creates the manager and starts its poll task.
    ///
    /// At most one manager exists per process; destroy (or drop) the
    /// previous one before creating another. Must be called from within a
    /// Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyInitialized`] if a manager is already active.
    pub fn create(port: P) -> Result<Self> {
        if INSTANCE_ACTIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadyInitialized);
        }

        let port = Arc::new(port);
        let bus = Arc::new(NotificationBus::new(NOTIFICATION_CAPACITY));
        let scheduler = Arc::new(PollScheduler::new());
        let registry = Arc::new(DriverRegistry::new(
            Arc::clone(&port),
            Arc::clone(&bus),
            Arc::clone(&scheduler),
        ));
        let poll_task = tokio::spawn(run_poll_loop(
            Arc::clone(&scheduler),
            port,
            Arc::clone(&registry),
        ));

        tracing::info!("manager created");
        Ok(Self {
            inner: Arc::new(ManagerInner {
                registry,
                bus,
                scheduler,
                poll_task: Mutex::new(Some(poll_task)),
                destroyed: AtomicBool::new(false),
            }),
        })
    }

    /// Tears the manager down: removes every driver, clears all watchers,
    /// and stops the poll task.
    ///
    /// Afterwards the fallible operations on this manager and its clones
    /// return [`Error::NotInitialized`], and a new manager may be created.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] if already destroyed.
    pub async fn destroy(&self) -> Result<()> {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return Err(Error::NotInitialized);
        }

        // No driver registers past this point, even from an add whose open
        // is still in flight.
        self.inner.registry.seal();
        let paths = self.inner.registry.paths();
        let results =
            futures::future::join_all(paths.iter().map(|path| self.inner.registry.remove(path)))
                .await;
        for (path, result) in paths.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!("removing driver at {path} during destroy failed: {e}");
            }
        }

        self.inner.bus.clear_watchers();
        if let Some(task) = self
            .inner
            .poll_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }

        INSTANCE_ACTIVE.store(false, Ordering::SeqCst);
        tracing::info!("manager destroyed");
        Ok(())
    }

    fn ensure_live(&self) -> Result<()> {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return Err(Error::NotInitialized);
        }
        Ok(())
    }

    fn is_live(&self) -> bool {
        !self.inner.destroyed.load(Ordering::SeqCst)
    }

    // ==================== Driver Management ====================

    /// Attaches the controller at `path` and returns its home id.
    ///
    /// The open runs on the calling task, so other manager operations are
    /// not held up while the device starts. [`Notification::DriverReady`]
    /// fires just before this returns; a failed open fires
    /// [`Notification::DriverFailed`] instead.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] if a driver for `path` already
    /// exists, or [`Error::ConnectionFailed`] wrapping the open failure.
    pub async fn add_driver(&self, path: &str, interface: ControllerInterface) -> Result<HomeId> {
        self.ensure_live()?;
        self.inner.registry.add(path, interface).await
    }

    /// Detaches the driver for `path`, closing its link and dropping its
    /// poll entries. Fires [`Notification::DriverRemoved`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no driver matches `path`.
    pub async fn remove_driver(&self, path: &str) -> Result<()> {
        self.ensure_live()?;
        self.inner.registry.remove(path).await
    }

    // ==================== Watchers ====================

    /// Registers a watcher for all future notifications.
    ///
    /// Returns `false` if this exact `Arc` is already registered, or the
    /// manager is destroyed.
    pub fn add_watcher(&self, watcher: Arc<dyn Watcher>) -> bool {
        self.is_live() && self.inner.bus.add_watcher(watcher)
    }

    /// Removes a watcher registered with [`Manager::add_watcher`].
    ///
    /// Returns `false` if it was not registered.
    pub fn remove_watcher(&self, watcher: &Arc<dyn Watcher>) -> bool {
        self.is_live() && self.inner.bus.remove_watcher(watcher)
    }

    /// Number of registered watchers.
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.inner.bus.watcher_count()
    }

    /// Subscribes to notifications as an async stream.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.inner.bus.subscribe()
    }

    // ==================== Polling ====================

    /// Enables polling for `value` at intensity 1, firing it every cycle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownHome`] when no driver serves the value's
    /// home network.
    pub fn enable_poll(&self, value: ValueRef) -> Result<()> {
        self.enable_poll_with_intensity(value, 1)
    }

    /// Enables polling for `value`, or updates its intensity if it is
    /// already polled. Intensity N fires the value every Nth cycle.
    ///
    /// Fires [`Notification::PollingEnabled`] on success.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIntensity`] when `intensity` is 0, or
    /// [`Error::UnknownHome`] when no driver serves the value's home
    /// network.
    pub fn enable_poll_with_intensity(&self, value: ValueRef, intensity: u8) -> Result<()> {
        self.ensure_live()?;
        if !self.inner.registry.contains(value.home_id()) {
            return Err(Error::UnknownHome {
                home_id: value.home_id(),
            });
        }
        self.inner.scheduler.enable(value, intensity)?;
        self.inner
            .bus
            .dispatch(Notification::PollingEnabled { value });
        Ok(())
    }

    /// Disables polling for `value` and fires
    /// [`Notification::PollingDisabled`]. Returns whether the value had
    /// been polled.
    pub fn disable_poll(&self, value: ValueRef) -> bool {
        if !self.is_live() {
            return false;
        }
        let disabled = self.inner.scheduler.disable(value);
        if disabled {
            self.inner
                .bus
                .dispatch(Notification::PollingDisabled { value });
        }
        disabled
    }

    /// Whether `value` is currently polled.
    #[must_use]
    pub fn is_polled(&self, value: ValueRef) -> bool {
        self.inner.scheduler.is_polled(value)
    }

    /// Current poll intensity for `value`; 0 when it is not polled.
    #[must_use]
    pub fn poll_intensity(&self, value: ValueRef) -> u8 {
        self.inner.scheduler.intensity(value)
    }

    /// Updates the intensity of an already-polled value. Does nothing when
    /// the value is not polled.
    pub fn set_poll_intensity(&self, value: ValueRef, intensity: u8) {
        if self.is_live() {
            self.inner.scheduler.set_intensity(value, intensity);
        }
    }

    /// Sets the poll cadence, effective from the next cycle.
    ///
    /// With `between_poll` unset, every due value fires at the top of the
    /// cycle. With it set, the interval is spread evenly across the polled
    /// values, so one full sweep still takes one interval.
    pub fn set_poll_interval(&self, interval: Duration, between_poll: bool) {
        if self.is_live() {
            self.inner.scheduler.set_interval(interval, between_poll);
        }
    }

    /// Current poll interval. Starts at
    /// [`DEFAULT_POLL_INTERVAL`](crate::DEFAULT_POLL_INTERVAL).
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.inner.scheduler.interval()
    }

    // ==================== Controller Queries ====================
    //
    // All of these answer from attributes cached while the driver opened,
    // without touching the device.

    /// Node id the controller occupies in its own network.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownHome`] if no driver serves `home_id`.
    pub fn controller_node_id(&self, home_id: HomeId) -> Result<NodeId> {
        self.ensure_live()?;
        self.inner.registry.controller_node_id(home_id)
    }

    /// Static update controller of the network, if one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownHome`] if no driver serves `home_id`.
    pub fn suc_node_id(&self, home_id: HomeId) -> Result<Option<NodeId>> {
        self.ensure_live()?;
        self.inner.registry.suc_node_id(home_id)
    }

    /// Whether the controller is the primary for its network.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownHome`] if no driver serves `home_id`.
    pub fn is_primary_controller(&self, home_id: HomeId) -> Result<bool> {
        self.ensure_live()?;
        self.inner.registry.is_primary_controller(home_id)
    }

    /// Whether the controller runs a bridge library.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownHome`] if no driver serves `home_id`.
    pub fn is_bridge_controller(&self, home_id: HomeId) -> Result<bool> {
        self.ensure_live()?;
        self.inner.registry.is_bridge_controller(home_id)
    }

    /// Protocol library version string, e.g. `Z-Wave 4.33`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownHome`] if no driver serves `home_id`.
    pub fn library_version(&self, home_id: HomeId) -> Result<String> {
        self.ensure_live()?;
        self.inner.registry.library_version(home_id)
    }

    /// Human-readable protocol library name, e.g. `Static Controller`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownHome`] if no driver serves `home_id`.
    pub fn library_type_name(&self, home_id: HomeId) -> Result<&'static str> {
        self.ensure_live()?;
        self.inner.registry.library_type_name(home_id)
    }

    /// Controller path the driver was added with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownHome`] if no driver serves `home_id`.
    pub fn controller_path(&self, home_id: HomeId) -> Result<String> {
        self.ensure_live()?;
        self.inner.registry.controller_path(home_id)
    }

    /// Interface type the driver was added with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownHome`] if no driver serves `home_id`.
    pub fn controller_interface(&self, home_id: HomeId) -> Result<ControllerInterface> {
        self.ensure_live()?;
        self.inner.registry.controller_interface(home_id)
    }

    /// Commands queued for transmission, as last reported by the link.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownHome`] if no driver serves `home_id`.
    pub fn send_queue_count(&self, home_id: HomeId) -> Result<u32> {
        self.ensure_live()?;
        self.inner.registry.send_queue_count(home_id)
    }

    /// Snapshot of the driver's counters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownHome`] if no driver serves `home_id`.
    pub fn driver_statistics(&self, home_id: HomeId) -> Result<DriverStatistics> {
        self.ensure_live()?;
        self.inner.registry.statistics(home_id)
    }

    /// Writes the driver's counters to the log. No-op for unknown homes.
    pub fn log_driver_statistics(&self, home_id: HomeId) {
        if self.is_live() {
            self.inner.registry.log_statistics(home_id);
        }
    }
}

impl<P> Drop for ManagerInner<P> {
    fn drop(&mut self) {
        if let Some(task) = self
            .poll_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        if !self.destroyed.load(Ordering::SeqCst) {
            INSTANCE_ACTIVE.store(false, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::MutexGuard;

    use super::*;
    use crate::event::NotificationKind;
    use crate::poll::DEFAULT_POLL_INTERVAL;
    use crate::port::{LinkEvent, MockPort};
    use crate::types::{ControllerInfo, LibraryKind, ValueKind};

    /// Creation tests share the process-wide instance flag, so they take
    /// turns.
    static CREATE_LOCK: Mutex<()> = Mutex::new(());

    fn create_guard() -> MutexGuard<'static, ()> {
        CREATE_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    async fn advance(duration: Duration) {
        tokio::time::advance(duration).await;
        settle().await;
    }

    #[tokio::test]
    async fn test_single_instance_per_process() {
        let _guard = create_guard();
        let (port, _handle) = MockPort::new();
        let manager = Manager::create(port).unwrap();

        let (second_port, _second_handle) = MockPort::new();
        assert!(matches!(
            Manager::create(second_port),
            Err(Error::AlreadyInitialized)
        ));

        manager.destroy().await.unwrap();

        // The slot frees up after destroy.
        let (third_port, _third_handle) = MockPort::new();
        let manager = Manager::create(third_port).unwrap();
        manager.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_drop_without_destroy_frees_the_slot() {
        let _guard = create_guard();
        {
            let (port, _handle) = MockPort::new();
            let _manager = Manager::create(port).unwrap();
        }
        let (port, _handle) = MockPort::new();
        let manager = Manager::create(port).unwrap();
        manager.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let _guard = create_guard();
        let (port, _handle) = MockPort::new();
        let manager = Manager::create(port).unwrap();
        let clone = manager.clone();

        let home = manager
            .add_driver("COM3", ControllerInterface::Serial)
            .await
            .unwrap();
        assert_eq!(clone.controller_path(home).unwrap(), "COM3");

        clone.destroy().await.unwrap();
        assert!(matches!(
            manager
                .add_driver("COM4", ControllerInterface::Serial)
                .await,
            Err(Error::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_controller_queries() {
        let _guard = create_guard();
        let (port, handle) = MockPort::new();
        handle.set_controller_info(
            "COM3",
            ControllerInfo {
                controller_node: NodeId::new(1),
                suc_node: Some(NodeId::new(1)),
                is_primary: false,
                library_kind: LibraryKind::BridgeController,
                library_version: "Z-Wave 6.07".into(),
            },
        );
        let manager = Manager::create(port).unwrap();
        let home = manager
            .add_driver("COM3", ControllerInterface::Serial)
            .await
            .unwrap();

        assert_eq!(manager.controller_node_id(home).unwrap(), NodeId::new(1));
        assert_eq!(manager.suc_node_id(home).unwrap(), Some(NodeId::new(1)));
        assert!(!manager.is_primary_controller(home).unwrap());
        assert!(manager.is_bridge_controller(home).unwrap());
        assert_eq!(
            manager.library_type_name(home).unwrap(),
            "Bridge Controller"
        );
        assert_eq!(manager.library_version(home).unwrap(), "Z-Wave 6.07");
        assert_eq!(manager.controller_path(home).unwrap(), "COM3");
        assert_eq!(
            manager.controller_interface(home).unwrap(),
            ControllerInterface::Serial
        );
        assert_eq!(manager.send_queue_count(home).unwrap(), 0);
        assert_eq!(manager.poll_interval(), DEFAULT_POLL_INTERVAL);
        manager.log_driver_statistics(home);

        manager.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_enable_poll_validates_its_inputs() {
        let _guard = create_guard();
        let (port, _handle) = MockPort::new();
        let manager = Manager::create(port).unwrap();

        let stranger = ValueRef::new(HomeId::new(0xeeee_0001), NodeId::new(2), 0, ValueKind::Bool);
        assert!(matches!(
            manager.enable_poll(stranger),
            Err(Error::UnknownHome { .. })
        ));
        assert!(!manager.is_polled(stranger));

        let home = manager
            .add_driver("COM3", ControllerInterface::Serial)
            .await
            .unwrap();
        let value = ValueRef::new(home, NodeId::new(5), 0, ValueKind::Byte);
        assert!(matches!(
            manager.enable_poll_with_intensity(value, 0),
            Err(Error::InvalidIntensity)
        ));
        assert!(!manager.is_polled(value));

        manager.enable_poll(value).unwrap();
        assert!(manager.is_polled(value));
        assert_eq!(manager.poll_intensity(value), 1);

        manager.set_poll_intensity(value, 3);
        assert_eq!(manager.poll_intensity(value), 3);

        assert!(manager.disable_poll(value));
        assert!(!manager.disable_poll(value));

        manager.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_destroy_removes_all_drivers() {
        let _guard = create_guard();
        let (port, handle) = MockPort::new();
        let manager = Manager::create(port).unwrap();

        let first = manager
            .add_driver("COM3", ControllerInterface::Serial)
            .await
            .unwrap();
        let second = manager
            .add_driver("COM4", ControllerInterface::Serial)
            .await
            .unwrap();

        manager.add_watcher(Arc::new(|_: &Notification| {}));
        assert_eq!(manager.watcher_count(), 1);

        manager.destroy().await.unwrap();

        assert!(!handle.is_open(first));
        assert!(!handle.is_open(second));
        assert_eq!(handle.open_link_count(), 0);
        assert_eq!(handle.close_count(), 2);
        assert_eq!(manager.watcher_count(), 0);

        assert!(matches!(manager.destroy().await, Err(Error::NotInitialized)));
        assert!(matches!(
            manager
                .add_driver("COM3", ControllerInterface::Serial)
                .await,
            Err(Error::NotInitialized)
        ));
        assert!(matches!(
            manager.controller_node_id(first),
            Err(Error::NotInitialized)
        ));
        assert!(!manager.add_watcher(Arc::new(|_: &Notification| {})));
    }

    #[tokio::test]
    async fn test_destroy_rolls_back_inflight_add() {
        let _guard = create_guard();
        let (port, handle) = MockPort::new();
        handle.hold_opens();
        let manager = Manager::create(port).unwrap();

        // The open parks on the held port while destroy runs to completion.
        let racer = manager.clone();
        let pending = tokio::spawn(async move {
            racer.add_driver("COM3", ControllerInterface::Serial).await
        });
        settle().await;
        manager.destroy().await.unwrap();
        handle.release_opens();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(Error::NotInitialized)));
        // The late link was closed again; nothing stays open.
        assert_eq!(handle.open_link_count(), 0);
        assert_eq!(handle.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_lifecycle_with_polling() {
        init_tracing();
        let _guard = create_guard();
        let (port, handle) = MockPort::new();
        let manager = Manager::create(port).unwrap();

        let kinds = Arc::new(Mutex::new(Vec::new()));
        let recorder: Arc<dyn Watcher> = {
            let kinds = Arc::clone(&kinds);
            Arc::new(move |event: &Notification| {
                kinds.lock().unwrap().push(event.kind());
            })
        };
        assert!(manager.add_watcher(Arc::clone(&recorder)));
        assert!(!manager.add_watcher(Arc::clone(&recorder)));

        let home = manager
            .add_driver("COM3", ControllerInterface::Serial)
            .await
            .unwrap();
        let value = ValueRef::new(home, NodeId::new(5), 0, ValueKind::Byte);
        manager.enable_poll_with_intensity(value, 2).unwrap();
        assert!(manager.is_polled(value));
        assert_eq!(manager.poll_intensity(value), 2);
        settle().await;

        // Intensity 2 sits out the first cycle and fires on the second.
        advance(DEFAULT_POLL_INTERVAL).await;
        assert_eq!(handle.refresh_count(value), 0);
        advance(DEFAULT_POLL_INTERVAL).await;
        assert_eq!(handle.refresh_count(value), 1);
        assert_eq!(manager.driver_statistics(home).unwrap().polls_issued, 1);

        // The network answers the poll.
        handle
            .emit(home, LinkEvent::ValueRefreshed { value })
            .await
            .unwrap();
        settle().await;

        manager.remove_driver("COM3").await.unwrap();
        assert!(!manager.is_polled(value));
        assert_eq!(manager.poll_intensity(value), 0);

        manager.destroy().await.unwrap();
        assert!(matches!(
            manager
                .add_driver("COM3", ControllerInterface::Serial)
                .await,
            Err(Error::NotInitialized)
        ));

        let seen = kinds.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                NotificationKind::DriverReady,
                NotificationKind::PollingEnabled,
                NotificationKind::ValueRefreshed,
                NotificationKind::DriverRemoved,
            ]
        );
    }
}
