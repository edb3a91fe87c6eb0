//! Locally registered memory: the descriptor handed to scatter-gather
//! posts on the initiator side.
//!
//! Grounded on `LocalRegion.{hpp,cpp}` from `original_source`. There is no
//! `iovec`/`fi_mr_desc` equivalent worth modelling here since the simulated
//! fabric (`crate::fabric`) takes byte slices directly; `LocalRegion` keeps
//! the address/length/descriptor shape of the original so `fabric.rs` can
//! build scatter-gather lists the same way the bounce-buffer and RMA-grain
//! protocols expect.

use crate::error::{FabricsError, Result};

/// A single locally registered buffer, ready to be posted as part of a
/// scatter-gather list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalRegion {
    /// Local virtual address of the buffer.
    pub addr: u64,
    /// Length of the buffer in bytes.
    pub len: usize,
    /// Opaque local memory descriptor returned by registration, analogous
    /// to `fi_mr_desc`. Used by the simulated fabric to identify which
    /// registered buffer backs this address without re-validating it on
    /// every post.
    pub desc: u64,
}

/// An ordered group of [`LocalRegion`]s, e.g. the planes of one grain or
/// the per-channel buffers of one audio window.
#[derive(Debug, Clone)]
pub struct LocalRegionGroup {
    inner: Vec<LocalRegion>,
}

impl LocalRegionGroup {
    /// Build a group from its constituent regions.
    pub fn new(inner: Vec<LocalRegion>) -> Self {
        Self { inner }
    }

    /// The regions making up this group, in order.
    pub fn regions(&self) -> &[LocalRegion] {
        &self.inner
    }

    /// Number of regions in the group.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True if the group holds no regions.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Borrow a contiguous `[begin, end)` window of the group without
    /// copying, mirroring `LocalRegionGroup::span` in the original. Used by
    /// the bounce-buffered protocol to post only the fragments touched by
    /// one transfer.
    pub fn span(&self, begin: usize, end: usize) -> Result<LocalRegionGroupSpan<'_>> {
        if end < begin {
            return Err(FabricsError::internal(format!("endIndex {end} is smaller than beginIndex {begin}")));
        }
        if end > self.inner.len() {
            return Err(FabricsError::internal(format!(
                "requested span size {} is bigger than the group's size {}",
                end - begin,
                self.inner.len()
            )));
        }
        Ok(LocalRegionGroupSpan { regions: &self.inner[begin..end] })
    }
}

/// A borrowed, contiguous window over a [`LocalRegionGroup`].
#[derive(Debug, Clone, Copy)]
pub struct LocalRegionGroupSpan<'a> {
    regions: &'a [LocalRegion],
}

impl<'a> LocalRegionGroupSpan<'a> {
    /// The regions in this window, in order.
    pub fn regions(&self) -> &'a [LocalRegion] {
        self.regions
    }

    /// Number of regions in the window.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// True if the window is empty.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> LocalRegionGroup {
        LocalRegionGroup::new(vec![
            LocalRegion { addr: 0x1000, len: 16, desc: 1 },
            LocalRegion { addr: 0x2000, len: 16, desc: 2 },
            LocalRegion { addr: 0x3000, len: 16, desc: 3 },
        ])
    }

    #[test]
    fn span_rejects_end_before_begin() {
        assert!(group().span(2, 1).is_err());
    }

    #[test]
    fn span_rejects_out_of_range_end() {
        assert!(group().span(0, 10).is_err());
    }

    #[test]
    fn span_returns_the_requested_window() {
        let g = group();
        let span = g.span(1, 3).unwrap();
        assert_eq!(span.len(), 2);
        assert_eq!(span.regions()[0].addr, 0x2000);
        assert_eq!(span.regions()[1].addr, 0x3000);
    }
}
