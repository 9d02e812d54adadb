//! Data types for Z-Wave network entities.
//!
//! This module contains the core data structures used throughout the library:
//! - Home and node identifiers
//! - Value references
//! - Controller attributes and driver statistics

pub mod controller;
pub mod ids;
pub mod value;

pub use controller::{ControllerInfo, ControllerInterface, DriverStatistics, LibraryKind};
pub use ids::{HomeId, NodeId};
pub use value::{ValueKind, ValueRef};
