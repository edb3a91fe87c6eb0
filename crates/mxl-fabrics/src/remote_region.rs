//! Remotely registered memory: the descriptor an initiator RMA-writes
//! into, as advertised by a target over [`crate::target_info::TargetInfo`].
//!
//! Grounded on `RemoteRegion.{hpp,cpp}` from `original_source`. The exact
//! field names (`addr`, `len`, `rkey`) are load-bearing: they are the JSON
//! field names in the `TargetInfo` wire schema (spec.md §8 scenario 5).

use serde::{Deserialize, Serialize};

use crate::error::{FabricsError, Result};

/// A single remotely registered buffer an initiator may write into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRegion {
    /// Remote virtual (or relative, depending on addressing mode) address.
    pub addr: u64,
    /// Length of the remote buffer in bytes.
    pub len: usize,
    /// Remote key granting write access, handed out by
    /// `MemoryRegion::register` on the target side.
    pub rkey: u64,
}

impl RemoteRegion {
    /// A sub-region `[offset, offset+length)` of this remote region,
    /// sharing its key. Fails with [`FabricsError::InvalidArg`] if the
    /// requested window falls outside the region.
    pub fn sub(&self, offset: u64, length: usize) -> Result<RemoteRegion> {
        if offset.saturating_add(length as u64) > self.len as u64 {
            return Err(FabricsError::invalid_arg("invalid offset and length for remote region"));
        }
        Ok(RemoteRegion { addr: self.addr + offset, len: length, rkey: self.rkey })
    }
}

/// An ordered group of [`RemoteRegion`]s, matching the layout of a target's
/// advertised [`crate::local_region::LocalRegionGroup`] on the other side
/// of the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRegionGroup {
    group: Vec<RemoteRegion>,
}

impl RemoteRegionGroup {
    /// Build a group from its constituent regions.
    pub fn new(group: Vec<RemoteRegion>) -> Self {
        Self { group }
    }

    /// The regions making up this group, in order.
    pub fn regions(&self) -> &[RemoteRegion] {
        &self.group
    }

    /// Number of regions in the group.
    pub fn len(&self) -> usize {
        self.group.len()
    }

    /// True if the group holds no regions.
    pub fn is_empty(&self) -> bool {
        self.group.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_rejects_window_past_the_end() {
        let r = RemoteRegion { addr: 0x1000, len: 64, rkey: 7 };
        assert!(r.sub(32, 64).is_err());
    }

    #[test]
    fn sub_shifts_address_and_keeps_key() {
        let r = RemoteRegion { addr: 0x1000, len: 64, rkey: 7 };
        let s = r.sub(16, 32).unwrap();
        assert_eq!(s.addr, 0x1010);
        assert_eq!(s.len, 32);
        assert_eq!(s.rkey, 7);
    }

    #[test]
    fn serializes_with_the_wire_field_names() {
        let r = RemoteRegion { addr: 1, len: 2, rkey: 3 };
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, r#"{"addr":1,"len":2,"rkey":3}"#);
    }
}
