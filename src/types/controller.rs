//! Controller attributes and driver statistics.

use super::ids::NodeId;

/// How the host talks to the controller hardware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ControllerInterface {
    /// A local serial device, e.g. `/dev/ttyUSB0` or `COM3`.
    #[default]
    Serial,
    /// A TCP-attached controller addressed as `host:port`.
    Network,
}

impl ControllerInterface {
    /// Short lowercase name, as used in log output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Serial => "serial",
            Self::Network => "network",
        }
    }
}

impl std::fmt::Display for ControllerInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol library variant a controller reports at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LibraryKind {
    #[default]
    Unknown = 0x00,
    StaticController = 0x01,
    Controller = 0x02,
    EnhancedSlave = 0x03,
    Slave = 0x04,
    Installer = 0x05,
    RoutingSlave = 0x06,
    BridgeController = 0x07,
    DeviceUnderTest = 0x08,
}

impl LibraryKind {
    /// Parses a library kind from its wire discriminant.
    ///
    /// Unrecognized discriminants map to [`LibraryKind::Unknown`].
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0x01 => Self::StaticController,
            0x02 => Self::Controller,
            0x03 => Self::EnhancedSlave,
            0x04 => Self::Slave,
            0x05 => Self::Installer,
            0x06 => Self::RoutingSlave,
            0x07 => Self::BridgeController,
            0x08 => Self::DeviceUnderTest,
            _ => Self::Unknown,
        }
    }

    /// Human-readable library name, as reported by controller firmware.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::StaticController => "Static Controller",
            Self::Controller => "Controller",
            Self::EnhancedSlave => "Enhanced Slave",
            Self::Slave => "Slave",
            Self::Installer => "Installer",
            Self::RoutingSlave => "Routing Slave",
            Self::BridgeController => "Bridge Controller",
            Self::DeviceUnderTest => "Device Under Test",
        }
    }
}

impl std::fmt::Display for LibraryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Controller attributes read once while a link opens.
///
/// These do not change for the lifetime of a driver, so the manager caches
/// them and answers queries without touching the device again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerInfo {
    /// Node id the controller occupies in its own network.
    pub controller_node: NodeId,
    /// Static update controller for the network, if one is configured.
    pub suc_node: Option<NodeId>,
    /// Whether this controller is the primary for its network.
    pub is_primary: bool,
    /// Protocol library variant the controller runs.
    pub library_kind: LibraryKind,
    /// Protocol library version string, e.g. `Z-Wave 4.33`.
    pub library_version: String,
}

impl Default for ControllerInfo {
    fn default() -> Self {
        Self {
            controller_node: NodeId::new(1),
            suc_node: None,
            is_primary: true,
            library_kind: LibraryKind::StaticController,
            library_version: String::from("Z-Wave 4.33"),
        }
    }
}

/// Point-in-time counters for one driver.
///
/// Returned by [`Manager::driver_statistics`](crate::Manager::driver_statistics);
/// the snapshot does not update after it is taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStatistics {
    /// Raw protocol events received over the link.
    pub events_received: u64,
    /// Poll refresh requests issued for values on this home.
    pub polls_issued: u64,
    /// Commands currently queued for transmission, as last reported.
    pub send_queue_depth: u32,
}
