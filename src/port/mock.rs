//! Mock controller port for tests and hardware-free development.
//!
//! [`MockPort::new`] returns the port itself plus a [`MockPortHandle`] for
//! driving it from the outside: scripting open failures, injecting link
//! events, and inspecting the refresh requests the manager issued.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Notify, mpsc};

use super::{ControllerLink, ControllerPort, LinkEvent, LinkHandle};
use crate::error::{Error, Result};
use crate::types::{ControllerInfo, ControllerInterface, HomeId, ValueRef};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Home ids are handed out sequentially starting here.
const FIRST_HOME_ID: u32 = 0x0100_0001;

struct OpenLink {
    home_id: HomeId,
    events: mpsc::Sender<LinkEvent>,
}

struct MockState {
    next_home: u32,
    next_handle: u64,
    homes: HashMap<String, HomeId>,
    infos: HashMap<String, ControllerInfo>,
    fail_next: HashSet<String>,
    links: HashMap<LinkHandle, OpenLink>,
    open_homes: HashMap<HomeId, LinkHandle>,
    refreshes: Vec<ValueRef>,
    auto_refresh: bool,
    hold_opens: bool,
    gate: Arc<Notify>,
    close_count: usize,
}

impl MockState {
    fn new() -> Self {
        Self {
            next_home: FIRST_HOME_ID,
            next_handle: 1,
            homes: HashMap::new(),
            infos: HashMap::new(),
            fail_next: HashSet::new(),
            links: HashMap::new(),
            open_homes: HashMap::new(),
            refreshes: Vec::new(),
            auto_refresh: false,
            hold_opens: false,
            gate: Arc::new(Notify::new()),
            close_count: 0,
        }
    }
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory [`ControllerPort`] implementation.
///
/// Each path gets a stable home id on first open, so removing and re-adding
/// a driver for the same path reports the same home, like real hardware.
pub struct MockPort {
    state: Arc<Mutex<MockState>>,
}

/// Control half of a [`MockPort`].
pub struct MockPortHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockPort {
    /// Creates a mock port and the handle that drives it.
    #[must_use]
    pub fn new() -> (Self, MockPortHandle) {
        let state = Arc::new(Mutex::new(MockState::new()));
        (
            Self {
                state: Arc::clone(&state),
            },
            MockPortHandle { state },
        )
    }
}

impl ControllerPort for MockPort {
    fn open<'a>(
        &'a self,
        path: &'a str,
        interface: ControllerInterface,
    ) -> Pin<Box<dyn Future<Output = Result<ControllerLink>> + Send + 'a>> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            // Park outside the lock while opens are held.
            let gate = Arc::clone(&lock(&state).gate);
            loop {
                let released = gate.notified();
                if !lock(&state).hold_opens {
                    break;
                }
                released.await;
            }

            let mut s = lock(&state);
            if s.fail_next.remove(path) {
                tracing::debug!("mock: scripted open failure for {path}");
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "scripted open failure",
                )));
            }

            let home_id = if let Some(&home) = s.homes.get(path) {
                home
            } else {
                let home = HomeId::new(s.next_home);
                s.next_home += 1;
                s.homes.insert(path.to_owned(), home);
                home
            };

            let handle = LinkHandle::new(s.next_handle);
            s.next_handle += 1;

            let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
            s.links.insert(
                handle,
                OpenLink {
                    home_id,
                    events: tx,
                },
            );
            s.open_homes.insert(home_id, handle);
            let info = s.infos.get(path).cloned().unwrap_or_default();

            tracing::debug!("mock: opened {path} ({interface}) as home {home_id}");
            Ok(ControllerLink {
                handle,
                home_id,
                info,
                events: rx,
            })
        })
    }

    fn close(&self, handle: LinkHandle) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let mut s = lock(&state);
            if let Some(link) = s.links.remove(&handle) {
                s.open_homes.remove(&link.home_id);
                s.close_count += 1;
                tracing::debug!("mock: closed link to home {}", link.home_id);
            }
            Ok(())
        })
    }

    fn request_value_refresh(
        &self,
        value: ValueRef,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let reply = {
                let mut s = lock(&state);
                let Some(handle) = s.open_homes.get(&value.home_id()).copied() else {
                    return Err(Error::UnknownHome {
                        home_id: value.home_id(),
                    });
                };
                s.refreshes.push(value);
                if s.auto_refresh {
                    s.links.get(&handle).map(|link| link.events.clone())
                } else {
                    None
                }
            };
            if let Some(tx) = reply {
                let _ = tx.send(LinkEvent::ValueRefreshed { value }).await;
            }
            Ok(())
        })
    }
}

impl MockPortHandle {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }

    /// Makes the next open of `path` fail. One-shot; the open after that
    /// succeeds again.
    pub fn fail_next_open(&self, path: &str) {
        self.lock().fail_next.insert(path.to_owned());
    }

    /// Sets the controller attributes reported when `path` opens.
    pub fn set_controller_info(&self, path: &str, info: ControllerInfo) {
        self.lock().infos.insert(path.to_owned(), info);
    }

    /// When enabled, every refresh request is answered immediately with a
    /// [`LinkEvent::ValueRefreshed`] on the owning link.
    pub fn set_auto_refresh(&self, enabled: bool) {
        self.lock().auto_refresh = enabled;
    }

    /// Parks every open until [`MockPortHandle::release_opens`], like a
    /// controller that is slow to finish its startup queries.
    pub fn hold_opens(&self) {
        self.lock().hold_opens = true;
    }

    /// Lets held opens proceed again.
    pub fn release_opens(&self) {
        let mut s = self.lock();
        s.hold_opens = false;
        s.gate.notify_waiters();
    }

    /// Injects a link event for the given home.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LinkClosed`] if no open link serves the home.
    pub async fn emit(&self, home_id: HomeId, event: LinkEvent) -> Result<()> {
        let sender = {
            let s = self.lock();
            let handle = s
                .open_homes
                .get(&home_id)
                .copied()
                .ok_or(Error::LinkClosed)?;
            s.links
                .get(&handle)
                .map(|link| link.events.clone())
                .ok_or(Error::LinkClosed)?
        };
        sender.send(event).await.map_err(|_| Error::LinkClosed)
    }

    /// All refresh requests issued so far, in order.
    #[must_use]
    pub fn refresh_requests(&self) -> Vec<ValueRef> {
        self.lock().refreshes.clone()
    }

    /// Number of refresh requests issued for one value.
    #[must_use]
    pub fn refresh_count(&self, value: ValueRef) -> usize {
        self.lock().refreshes.iter().filter(|v| **v == value).count()
    }

    /// Whether a link to the given home is currently open.
    #[must_use]
    pub fn is_open(&self, home_id: HomeId) -> bool {
        self.lock().open_homes.contains_key(&home_id)
    }

    /// Number of currently open links.
    #[must_use]
    pub fn open_link_count(&self) -> usize {
        self.lock().links.len()
    }

    /// Number of links closed so far.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.lock().close_count
    }
}
