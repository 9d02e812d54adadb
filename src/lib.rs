//! # zwave-manager
//!
//! A Rust library for managing Z-Wave networks through USB controller
//! sticks.
//!
//! One [`Manager`] drives any number of controllers, each serving one home
//! network. It delivers network notifications to registered watchers and
//! keeps chosen values fresh by polling them on a fixed cadence.
//!
//! ## Features
//!
//! - Async driver management on Tokio
//! - Watcher callbacks and async subscriptions for network notifications
//! - Value polling with per-value intensity and a configurable interval
//! - Pluggable controller transport, with an in-memory mock for tests
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use zwave_manager::port::MockPort;
//! use zwave_manager::{ControllerInterface, Manager, Notification};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), zwave_manager::Error> {
//!     // A mock controller; production code hands in a real port.
//!     let (port, _handle) = MockPort::new();
//!     let manager = Manager::create(port)?;
//!
//!     manager.add_watcher(Arc::new(|event: &Notification| {
//!         println!("notification: {event:?}");
//!     }));
//!
//!     let home_id = manager
//!         .add_driver("/dev/ttyUSB0", ControllerInterface::Serial)
//!         .await?;
//!     println!("home {home_id} ready");
//!     println!("controller node: {}", manager.controller_node_id(home_id)?);
//!
//!     manager.remove_driver("/dev/ttyUSB0").await?;
//!     manager.destroy().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`types`] - Identity and value types (home ids, node ids, value descriptors)
//! - [`event`] - Notifications, the watcher registry, and async subscriptions
//! - [`port`] - Controller transport abstraction, serial helpers, and the mock
//! - [`manager`] - High-level [`Manager`] tying drivers, polling, and
//!   notifications together

pub mod error;
pub mod event;
pub mod manager;
pub mod port;
pub mod types;

mod driver;
mod poll;

// Re-exports for convenience
pub use error::{Error, Result};
pub use event::{Notification, NotificationKind, Subscription, Watcher, WatcherError};
pub use manager::Manager;
pub use poll::DEFAULT_POLL_INTERVAL;
pub use port::{ControllerLink, ControllerPort, LinkEvent, LinkHandle, available_ports};
pub use types::{
    ControllerInfo, ControllerInterface, DriverStatistics, HomeId, LibraryKind, NodeId, ValueKind,
    ValueRef,
};
