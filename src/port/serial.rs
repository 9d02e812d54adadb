//! Serial controller discovery.
//!
//! The manager core does not speak the serial protocol itself; a
//! [`ControllerPort`](super::ControllerPort) implementation does. This
//! module carries the pieces every serial-backed implementation shares.

use crate::error::{Error, Result};

/// Baud rate used by Z-Wave serial controllers.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Lists serial ports that may host a Z-Wave controller, sorted by name.
///
/// # Errors
///
/// Returns [`Error::Serial`] if the ports cannot be enumerated.
pub fn available_ports() -> Result<Vec<String>> {
    let mut names: Vec<String> = tokio_serial::available_ports()
        .map_err(Error::Serial)?
        .into_iter()
        .map(|p| p.port_name)
        .collect();
    names.sort();
    Ok(names)
}
