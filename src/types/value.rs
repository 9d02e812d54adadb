//! Value references.
//!
//! A [`ValueRef`] names one reported state item on one device, such as a
//! sensor reading or a configuration parameter. It carries no payload;
//! it is the stable key that notifications and the poll scheduler use to
//! talk about the same underlying value.

use super::ids::{HomeId, NodeId};

/// Data type of a reported value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueKind {
    /// Boolean, on/off style values.
    Bool = 0x00,
    /// 8-bit unsigned values.
    Byte = 0x01,
    /// Fixed-point decimal values, e.g. temperatures.
    Decimal = 0x02,
    /// 32-bit signed values.
    Int = 0x03,
    /// An item chosen from a fixed list.
    List = 0x04,
    /// Schedule entries.
    Schedule = 0x05,
    /// 16-bit signed values.
    Short = 0x06,
    /// Free-form text values.
    String = 0x07,
    /// Write-only action triggers.
    Button = 0x08,
    /// Uninterpreted byte blobs.
    Raw = 0x09,
}

impl ValueKind {
    /// Parses a value kind from its wire discriminant.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Bool),
            0x01 => Some(Self::Byte),
            0x02 => Some(Self::Decimal),
            0x03 => Some(Self::Int),
            0x04 => Some(Self::List),
            0x05 => Some(Self::Schedule),
            0x06 => Some(Self::Short),
            0x07 => Some(Self::String),
            0x08 => Some(Self::Button),
            0x09 => Some(Self::Raw),
            _ => None,
        }
    }
}

impl From<ValueKind> for u8 {
    fn from(kind: ValueKind) -> Self {
        kind as Self
    }
}

/// Immutable reference to one value on one device.
///
/// Two references are the same value exactly when all four fields match.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueRef {
    home_id: HomeId,
    node_id: NodeId,
    index: u16,
    kind: ValueKind,
}

impl ValueRef {
    /// Creates a reference to the value at `index` on the given node.
    #[must_use]
    pub const fn new(home_id: HomeId, node_id: NodeId, index: u16, kind: ValueKind) -> Self {
        Self {
            home_id,
            node_id,
            index,
            kind,
        }
    }

    /// Home network the value belongs to.
    #[must_use]
    pub const fn home_id(self) -> HomeId {
        self.home_id
    }

    /// Node the value lives on.
    #[must_use]
    pub const fn node_id(self) -> NodeId {
        self.node_id
    }

    /// Position of the value within the node's report.
    #[must_use]
    pub const fn index(self) -> u16 {
        self.index
    }

    /// Data type of the value.
    #[must_use]
    pub const fn kind(self) -> ValueKind {
        self.kind
    }
}

impl std::fmt::Debug for ValueRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ValueRef({}/{}/{}:{:?})",
            self.home_id, self.node_id, self.index, self.kind
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_kind_from_byte() {
        assert_eq!(ValueKind::from_byte(0x00), Some(ValueKind::Bool));
        assert_eq!(ValueKind::from_byte(0x02), Some(ValueKind::Decimal));
        assert_eq!(ValueKind::from_byte(0x09), Some(ValueKind::Raw));
        assert_eq!(ValueKind::from_byte(0x0a), None);
        assert_eq!(ValueKind::from_byte(0xff), None);
    }

    #[test]
    fn test_value_kind_to_byte() {
        assert_eq!(u8::from(ValueKind::Bool), 0x00);
        assert_eq!(u8::from(ValueKind::Raw), 0x09);
    }

    #[test]
    fn test_value_ref_identity() {
        let home = HomeId::new(0x00c0_4e12);
        let a = ValueRef::new(home, NodeId::new(5), 0, ValueKind::Byte);
        let b = ValueRef::new(home, NodeId::new(5), 0, ValueKind::Byte);
        let c = ValueRef::new(home, NodeId::new(5), 1, ValueKind::Byte);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_value_ref_debug() {
        let value = ValueRef::new(HomeId::new(0xdead_beef), NodeId::new(3), 2, ValueKind::Bool);
        assert_eq!(format!("{value:?}"), "ValueRef(0xdeadbeef/3/2:Bool)");
    }
}
