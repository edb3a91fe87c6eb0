//! User-supplied memory regions and the data layout they represent.
//!
//! Grounded on `Region.hpp`, `DataLayout.{hpp,cpp}` and `GrainSlices.hpp`
//! from `original_source/lib/fabrics/ofi/src/internal/`.

use crate::error::{FabricsError, Result};

/// Where a region's bytes physically live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Ordinary host (CPU) memory.
    Host,
    /// Device memory (e.g. a GPU), identified by device index.
    Device(u64),
}

impl Location {
    /// Host memory location.
    pub fn host() -> Self {
        Location::Host
    }

    /// Device memory location for the given device id.
    pub fn device(device_id: u64) -> Self {
        Location::Device(device_id)
    }
}

/// A single contiguous memory region as supplied by the user, before
/// registration with a [`crate::fabric::Domain`].
#[derive(Debug, Clone, Copy)]
pub struct Region {
    /// Base address of the region.
    pub base: u64,
    /// Length of the region in bytes.
    pub size: usize,
    /// Where the bytes physically live.
    pub location: Location,
}

impl Region {
    /// Create a new region. `size` must be greater than zero at
    /// registration time (checked by `Domain::register_region_groups`, not
    /// here, since a zero-length region is a legal placeholder before it is
    /// ever used).
    pub fn new(base: u64, size: usize, location: Location) -> Self {
        Self { base, size, location }
    }
}

/// An ordered collection of [`Region`]s that together represent one
/// logical grain (or audio window) spread over multiple buffers, e.g. one
/// region per video plane.
#[derive(Debug, Clone)]
pub struct RegionGroup {
    regions: Vec<Region>,
}

impl RegionGroup {
    /// Build a region group from its constituent regions. All regions in a
    /// group sharing a ring must have equal total size across groups, but
    /// that invariant is enforced by [`RegionSet::new`], not here, since a
    /// lone group has nothing to compare itself against.
    pub fn new(regions: Vec<Region>) -> Self {
        Self { regions }
    }

    /// The regions making up this group, in order.
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Total size in bytes across every region in the group.
    pub fn total_size(&self) -> usize {
        self.regions.iter().map(|r| r.size).sum()
    }
}

/// Video-specific layout metadata: one slice size per plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoDataLayout {
    /// Byte size of a single slice, per plane (e.g. colour, then alpha).
    pub slice_sizes: Vec<u32>,
}

/// Audio-specific layout metadata for the bounce-buffered continuous
/// protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioDataLayout {
    /// Number of interleaved-free channels.
    pub channel_count: u32,
    /// Samples held per channel in one ring slot.
    pub samples_per_channel: u32,
    /// Bytes occupied by a single sample.
    pub bytes_per_sample: usize,
}

/// Tags a [`RegionSet`] with the data layout that determines which
/// protocol strategy (§4.5) applies to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLayout {
    /// Discrete (video) grains transferred via direct RMA writes.
    Video(VideoDataLayout),
    /// Continuous (audio) sample windows transferred via bounce buffers.
    Audio(AudioDataLayout),
}

impl DataLayout {
    /// Build a video data layout.
    pub fn video(slice_sizes: Vec<u32>) -> Self {
        DataLayout::Video(VideoDataLayout { slice_sizes })
    }

    /// Build an audio data layout.
    pub fn audio(channel_count: u32, samples_per_channel: u32, bytes_per_sample: usize) -> Self {
        DataLayout::Audio(AudioDataLayout { channel_count, samples_per_channel, bytes_per_sample })
    }

    /// True if this layout is video (discrete, RMA-grain protocol).
    pub fn is_video(&self) -> bool {
        matches!(self, DataLayout::Video(_))
    }

    /// True if this layout is audio (continuous, bounce-buffered protocol).
    pub fn is_audio(&self) -> bool {
        matches!(self, DataLayout::Audio(_))
    }

    /// Borrow the video layout, panics if this is an audio layout. Callers
    /// should check [`DataLayout::is_video`] first; this mirrors
    /// `DataLayout::asVideo` in the original which asserts via
    /// `std::get`.
    pub fn as_video(&self) -> &VideoDataLayout {
        match self {
            DataLayout::Video(v) => v,
            DataLayout::Audio(_) => panic!("DataLayout is audio, not video"),
        }
    }

    /// Borrow the audio layout, panics if this is a video layout.
    pub fn as_audio(&self) -> &AudioDataLayout {
        match self {
            DataLayout::Audio(a) => a,
            DataLayout::Video(_) => panic!("DataLayout is video, not audio"),
        }
    }
}

/// An ordered list of [`RegionGroup`]s forming the ring of grains (or audio
/// windows) for one flow, together with the layout tag that selects the
/// protocol strategy.
#[derive(Debug, Clone)]
pub struct RegionSet {
    groups: Vec<RegionGroup>,
    layout: DataLayout,
}

impl RegionSet {
    /// Build a region set. Fails with [`FabricsError::InvalidArg`] if the
    /// set is empty, or if the groups don't share an equal total size
    /// (spec.md's "groups sharing a ring have equal total size per group"
    /// invariant).
    pub fn new(groups: Vec<RegionGroup>, layout: DataLayout) -> Result<Self> {
        if groups.is_empty() {
            return Err(FabricsError::invalid_arg("a RegionSet must contain at least one group"));
        }
        let first_size = groups[0].total_size();
        if groups.iter().any(|g| g.total_size() != first_size) {
            return Err(FabricsError::invalid_arg("all groups in a RegionSet must have equal total size"));
        }
        Ok(Self { groups, layout })
    }

    /// The ring size, i.e. number of groups (= number of slots).
    pub fn ring_size(&self) -> usize {
        self.groups.len()
    }

    /// The groups making up the ring, in order.
    pub fn groups(&self) -> &[RegionGroup] {
        &self.groups
    }

    /// The data layout tag for this set.
    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(size: usize) -> Region {
        Region::new(0x1000, size, Location::host())
    }

    #[test]
    fn region_set_rejects_empty() {
        assert!(RegionSet::new(vec![], DataLayout::video(vec![720])).is_err());
    }

    #[test]
    fn region_set_rejects_mismatched_group_sizes() {
        let g1 = RegionGroup::new(vec![region(100)]);
        let g2 = RegionGroup::new(vec![region(200)]);
        assert!(RegionSet::new(vec![g1, g2], DataLayout::video(vec![100])).is_err());
    }

    #[test]
    fn region_set_accepts_equal_sized_groups() {
        let g1 = RegionGroup::new(vec![region(100)]);
        let g2 = RegionGroup::new(vec![region(100)]);
        let set = RegionSet::new(vec![g1, g2], DataLayout::video(vec![100])).unwrap();
        assert_eq!(set.ring_size(), 2);
        assert!(set.layout().is_video());
    }

    #[test]
    fn audio_layout_round_trip() {
        let layout = DataLayout::audio(2, 1024, 4);
        assert!(layout.is_audio());
        assert_eq!(layout.as_audio().channel_count, 2);
    }
}
