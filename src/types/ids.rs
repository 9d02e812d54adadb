//! Network and node identifiers.

/// Identifier of one physical Z-Wave network.
///
/// Assigned by the controller when a driver opens and released when the
/// driver is removed. Conventionally rendered in hex, matching what
/// controllers print on their diagnostics output.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HomeId(u32);

impl HomeId {
    /// Creates a home id from its raw 32-bit form.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw 32-bit form.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for HomeId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<HomeId> for u32 {
    fn from(id: HomeId) -> Self {
        id.0
    }
}

impl std::fmt::Debug for HomeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HomeId(0x{:08x})", self.0)
    }
}

impl std::fmt::Display for HomeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Identifier of one device within a home network.
///
/// Supplied by the protocol stack; valid node ids are 1-232, with 0 used
/// on the wire to mean "no node".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u8);

impl NodeId {
    /// Creates a node id from its raw 8-bit form.
    #[must_use]
    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    /// Returns the raw 8-bit form.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

impl From<u8> for NodeId {
    fn from(raw: u8) -> Self {
        Self(raw)
    }
}

impl From<NodeId> for u8 {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_home_id_display() {
        let home = HomeId::new(0x015d_81f6);
        assert_eq!(home.to_string(), "0x015d81f6");
        assert_eq!(format!("{home:?}"), "HomeId(0x015d81f6)");
    }

    #[test]
    fn test_home_id_roundtrip() {
        let home = HomeId::from(42u32);
        assert_eq!(u32::from(home), 42);
        assert_eq!(home, HomeId::new(42));
    }

    #[test]
    fn test_node_id_roundtrip() {
        let node = NodeId::from(5u8);
        assert_eq!(u8::from(node), 5);
        assert_eq!(node.to_string(), "5");
    }
}
