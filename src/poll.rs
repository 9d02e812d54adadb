//! Poll scheduling.
//!
//! Some devices never report state changes on their own, so the manager
//! refreshes registered values on a fixed cadence. Each registered value
//! carries an intensity: 1 fires it every cycle, 2 every other cycle, and
//! so on. The [`PollScheduler`] is pure bookkeeping; [`run_poll_loop`]
//! drives it from a background task.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::driver::DriverRegistry;
use crate::error::{Error, Result};
use crate::port::ControllerPort;
use crate::types::{HomeId, ValueRef};

/// Time between poll cycles until changed with
/// [`Manager::set_poll_interval`](crate::Manager::set_poll_interval).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Poll cadence settings.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PollConfig {
    pub interval: Duration,
    pub between_poll: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            between_poll: false,
        }
    }
}

#[derive(Debug)]
struct PollEntry {
    value: ValueRef,
    intensity: u8,
    /// Cycles left until the entry fires. Stays in `1..=effective intensity`.
    countdown: u8,
}

#[derive(Debug, Default)]
struct PollState {
    entries: Vec<PollEntry>,
    config: PollConfig,
}

/// One cycle's outcome: a slot per registered entry, in insertion order,
/// `Some` where the entry fires this cycle.
pub(crate) struct CyclePlan {
    pub slots: Vec<Option<ValueRef>>,
    pub config: PollConfig,
}

/// Tracks which values are polled and when each fires next.
pub(crate) struct PollScheduler {
    state: Mutex<PollState>,
}

impl PollScheduler {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(PollState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PollState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    const fn effective(intensity: u8) -> u8 {
        if intensity == 0 { 1 } else { intensity }
    }

    /// Registers `value` for polling, or updates its intensity if it is
    /// already registered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIntensity`] when `intensity` is 0.
    pub(crate) fn enable(&self, value: ValueRef, intensity: u8) -> Result<()> {
        if intensity == 0 {
            return Err(Error::InvalidIntensity);
        }
        let mut state = self.lock();
        if let Some(entry) = state.entries.iter_mut().find(|e| e.value == value) {
            entry.intensity = intensity;
            entry.countdown = entry.countdown.min(intensity);
            tracing::debug!("poll intensity for {value:?} set to {intensity}");
        } else {
            state.entries.push(PollEntry {
                value,
                intensity,
                countdown: intensity,
            });
            tracing::debug!("polling enabled for {value:?} at intensity {intensity}");
        }
        Ok(())
    }

    /// Unregisters `value`. Returns whether it had been registered.
    pub(crate) fn disable(&self, value: ValueRef) -> bool {
        let mut state = self.lock();
        match state.entries.iter().position(|e| e.value == value) {
            Some(index) => {
                state.entries.remove(index);
                tracing::debug!("polling disabled for {value:?}");
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_polled(&self, value: ValueRef) -> bool {
        self.lock().entries.iter().any(|e| e.value == value)
    }

    /// Reported intensity; 0 when the value is not registered.
    pub(crate) fn intensity(&self, value: ValueRef) -> u8 {
        self.lock()
            .entries
            .iter()
            .find(|e| e.value == value)
            .map_or(0, |e| e.intensity)
    }

    /// Updates intensity without changing registration. Unregistered values
    /// are ignored. 0 is accepted and reported back, though the entry then
    /// fires every cycle like intensity 1.
    pub(crate) fn set_intensity(&self, value: ValueRef, intensity: u8) {
        let mut state = self.lock();
        if let Some(entry) = state.entries.iter_mut().find(|e| e.value == value) {
            entry.intensity = intensity;
            entry.countdown = entry.countdown.min(Self::effective(intensity));
            tracing::debug!("poll intensity for {value:?} set to {intensity}");
        }
    }

    /// Replaces the cadence settings, effective from the next cycle.
    pub(crate) fn set_interval(&self, interval: Duration, between_poll: bool) {
        // A zero interval would spin the poll task.
        let interval = interval.max(Duration::from_millis(1));
        self.lock().config = PollConfig {
            interval,
            between_poll,
        };
        tracing::debug!("poll interval set to {interval:?} (between_poll: {between_poll})");
    }

    pub(crate) fn interval(&self) -> Duration {
        self.lock().config.interval
    }

    /// Drops every entry belonging to `home_id`, returning how many.
    pub(crate) fn purge_home(&self, home_id: HomeId) -> usize {
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|e| e.value.home_id() != home_id);
        before - state.entries.len()
    }

    /// Counts one cycle against every entry and returns the firing plan.
    pub(crate) fn advance_cycle(&self) -> CyclePlan {
        let mut state = self.lock();
        let config = state.config;
        let slots = state
            .entries
            .iter_mut()
            .map(|entry| {
                entry.countdown = entry.countdown.saturating_sub(1);
                if entry.countdown == 0 {
                    entry.countdown = Self::effective(entry.intensity);
                    Some(entry.value)
                } else {
                    None
                }
            })
            .collect();
        CyclePlan { slots, config }
    }
}

/// Background task driving the poll cadence.
///
/// With `between_poll` off, every due value fires at the top of the cycle
/// and the task sleeps out the interval. With it on, the interval is split
/// evenly across the registered entries and each due value fires in its own
/// slot, so a full sweep still finishes within one interval.
pub(crate) async fn run_poll_loop<P: ControllerPort + 'static>(
    scheduler: Arc<PollScheduler>,
    port: Arc<P>,
    registry: Arc<DriverRegistry<P>>,
) {
    // The first cycle begins one interval after startup.
    tokio::time::sleep(scheduler.interval()).await;
    loop {
        let plan = scheduler.advance_cycle();
        if plan.config.between_poll && !plan.slots.is_empty() {
            let slice = plan.config.interval / plan.slots.len() as u32;
            for slot in plan.slots {
                if let Some(value) = slot {
                    issue_poll(port.as_ref(), registry.as_ref(), value).await;
                }
                tokio::time::sleep(slice).await;
            }
        } else {
            for value in plan.slots.into_iter().flatten() {
                issue_poll(port.as_ref(), registry.as_ref(), value).await;
            }
            tokio::time::sleep(plan.config.interval).await;
        }
    }
}

async fn issue_poll<P: ControllerPort + 'static>(
    port: &P,
    registry: &DriverRegistry<P>,
    value: ValueRef,
) {
    match port.request_value_refresh(value).await {
        Ok(()) => {
            registry.record_poll(value.home_id());
            tracing::trace!("polled {value:?}");
        }
        Err(e) => {
            // Usually a driver removed after this cycle was planned.
            tracing::debug!("poll for {value:?} dropped: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NotificationBus;
    use crate::port::{MockPort, MockPortHandle};
    use crate::types::{ControllerInterface, NodeId, ValueKind};

    fn value(home: u32, node: u8, index: u16) -> ValueRef {
        ValueRef::new(HomeId::new(home), NodeId::new(node), index, ValueKind::Byte)
    }

    #[test]
    fn test_enable_rejects_zero_intensity() {
        let scheduler = PollScheduler::new();
        let v = value(1, 2, 0);
        assert!(matches!(
            scheduler.enable(v, 0),
            Err(Error::InvalidIntensity)
        ));
        assert!(!scheduler.is_polled(v));
    }

    #[test]
    fn test_enable_disable_roundtrip() {
        let scheduler = PollScheduler::new();
        let v = value(1, 2, 0);

        scheduler.enable(v, 1).unwrap();
        assert!(scheduler.is_polled(v));
        assert_eq!(scheduler.intensity(v), 1);

        assert!(scheduler.disable(v));
        assert!(!scheduler.is_polled(v));
        assert_eq!(scheduler.intensity(v), 0);
        assert!(!scheduler.disable(v));
    }

    #[test]
    fn test_intensity_counts_cycles() {
        let scheduler = PollScheduler::new();
        let v = value(1, 2, 0);
        scheduler.enable(v, 2).unwrap();

        assert_eq!(scheduler.advance_cycle().slots, vec![None]);
        assert_eq!(scheduler.advance_cycle().slots, vec![Some(v)]);
        assert_eq!(scheduler.advance_cycle().slots, vec![None]);
        assert_eq!(scheduler.advance_cycle().slots, vec![Some(v)]);
    }

    #[test]
    fn test_reenable_updates_intensity_in_place() {
        let scheduler = PollScheduler::new();
        let v = value(1, 2, 0);
        scheduler.enable(v, 1).unwrap();
        scheduler.enable(v, 3).unwrap();

        assert_eq!(scheduler.intensity(v), 3);
        // The running countdown is kept, clamped to the new intensity.
        assert_eq!(scheduler.advance_cycle().slots, vec![Some(v)]);
        assert_eq!(scheduler.advance_cycle().slots, vec![None]);
        assert_eq!(scheduler.advance_cycle().slots, vec![None]);
        assert_eq!(scheduler.advance_cycle().slots, vec![Some(v)]);
    }

    #[test]
    fn test_set_intensity_is_silent_on_unregistered() {
        let scheduler = PollScheduler::new();
        let v = value(1, 2, 0);

        scheduler.set_intensity(v, 4);
        assert!(!scheduler.is_polled(v));
        assert_eq!(scheduler.intensity(v), 0);

        scheduler.enable(v, 2).unwrap();
        scheduler.set_intensity(v, 0);
        assert!(scheduler.is_polled(v));
        assert_eq!(scheduler.intensity(v), 0);
        // Zero-intensity entries fire every cycle.
        assert_eq!(scheduler.advance_cycle().slots, vec![Some(v)]);
        assert_eq!(scheduler.advance_cycle().slots, vec![Some(v)]);
    }

    #[test]
    fn test_slots_keep_insertion_order() {
        let scheduler = PollScheduler::new();
        let a = value(1, 2, 0);
        let b = value(1, 3, 0);
        let c = value(1, 4, 0);
        for v in [a, b, c] {
            scheduler.enable(v, 1).unwrap();
        }

        assert_eq!(
            scheduler.advance_cycle().slots,
            vec![Some(a), Some(b), Some(c)]
        );
    }

    #[test]
    fn test_purge_home_only_touches_that_home() {
        let scheduler = PollScheduler::new();
        let ours = value(1, 2, 0);
        let theirs = value(2, 2, 0);
        scheduler.enable(ours, 1).unwrap();
        scheduler.enable(theirs, 1).unwrap();

        assert_eq!(scheduler.purge_home(HomeId::new(1)), 1);
        assert!(!scheduler.is_polled(ours));
        assert!(scheduler.is_polled(theirs));
        assert_eq!(scheduler.purge_home(HomeId::new(1)), 0);
    }

    #[test]
    fn test_set_interval_clamps_zero() {
        let scheduler = PollScheduler::new();
        assert_eq!(scheduler.interval(), DEFAULT_POLL_INTERVAL);

        scheduler.set_interval(Duration::ZERO, false);
        assert_eq!(scheduler.interval(), Duration::from_millis(1));

        scheduler.set_interval(Duration::from_secs(5), true);
        assert_eq!(scheduler.interval(), Duration::from_secs(5));
    }

    struct Loop {
        scheduler: Arc<PollScheduler>,
        registry: Arc<DriverRegistry<MockPort>>,
        handle: MockPortHandle,
        task: tokio::task::JoinHandle<()>,
    }

    impl Drop for Loop {
        fn drop(&mut self) {
            self.task.abort();
        }
    }

    async fn start_loop() -> (Loop, HomeId) {
        let (port, handle) = MockPort::new();
        let port = Arc::new(port);
        let bus = Arc::new(NotificationBus::new(16));
        let scheduler = Arc::new(PollScheduler::new());
        let registry = Arc::new(DriverRegistry::new(
            Arc::clone(&port),
            bus,
            Arc::clone(&scheduler),
        ));
        let home = registry
            .add("COM3", ControllerInterface::Serial)
            .await
            .unwrap();
        let task = tokio::spawn(run_poll_loop(
            Arc::clone(&scheduler),
            Arc::clone(&port),
            Arc::clone(&registry),
        ));
        (
            Loop {
                scheduler,
                registry,
                handle,
                task,
            },
            home,
        )
    }

    /// Lets background tasks run until they block on timers again.
    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    async fn advance(duration: Duration) {
        tokio::time::advance(duration).await;
        settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_loop_fires_on_the_interval() {
        let (fixture, home) = start_loop().await;
        let v = ValueRef::new(home, NodeId::new(5), 0, ValueKind::Byte);
        fixture.scheduler.enable(v, 2).unwrap();
        settle().await;

        advance(DEFAULT_POLL_INTERVAL).await;
        assert_eq!(fixture.handle.refresh_count(v), 0);

        advance(DEFAULT_POLL_INTERVAL).await;
        assert_eq!(fixture.handle.refresh_count(v), 1);

        advance(DEFAULT_POLL_INTERVAL).await;
        advance(DEFAULT_POLL_INTERVAL).await;
        assert_eq!(fixture.handle.refresh_count(v), 2);
        assert_eq!(fixture.registry.statistics(home).unwrap().polls_issued, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_between_poll_spreads_the_sweep() {
        let (fixture, home) = start_loop().await;
        let a = ValueRef::new(home, NodeId::new(2), 0, ValueKind::Byte);
        let b = ValueRef::new(home, NodeId::new(3), 0, ValueKind::Byte);
        let c = ValueRef::new(home, NodeId::new(4), 0, ValueKind::Byte);
        for v in [a, b, c] {
            fixture.scheduler.enable(v, 1).unwrap();
        }
        fixture.scheduler.set_interval(Duration::from_secs(30), true);
        settle().await;

        // Sweep starts one interval in; each entry then gets a 10s slot.
        advance(Duration::from_secs(30)).await;
        assert_eq!(fixture.handle.refresh_count(a), 1);
        assert_eq!(fixture.handle.refresh_count(b), 0);

        advance(Duration::from_secs(10)).await;
        assert_eq!(fixture.handle.refresh_count(b), 1);
        assert_eq!(fixture.handle.refresh_count(c), 0);

        advance(Duration::from_secs(10)).await;
        assert_eq!(fixture.handle.refresh_count(c), 1);

        // The next sweep begins right as the previous one ends.
        advance(Duration::from_secs(10)).await;
        assert_eq!(fixture.handle.refresh_count(a), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entries_are_dropped_quietly() {
        let (fixture, home) = start_loop().await;
        let live = ValueRef::new(home, NodeId::new(2), 0, ValueKind::Byte);
        let stale = ValueRef::new(HomeId::new(0xdead_0000), NodeId::new(2), 0, ValueKind::Byte);
        fixture.scheduler.enable(live, 1).unwrap();
        fixture.scheduler.enable(stale, 1).unwrap();
        settle().await;

        advance(DEFAULT_POLL_INTERVAL).await;
        assert_eq!(fixture.handle.refresh_count(live), 1);
        assert_eq!(fixture.handle.refresh_count(stale), 0);

        // The loop keeps going after the failed refresh.
        advance(DEFAULT_POLL_INTERVAL).await;
        assert_eq!(fixture.handle.refresh_count(live), 2);
    }
}
