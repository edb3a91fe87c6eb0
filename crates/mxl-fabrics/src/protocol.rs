//! The two wire strategies a flow's data layout selects between: direct
//! RMA writes for discrete (video) grains, and bounce-buffered writes for
//! continuous (audio) sample windows.
//!
//! The original expresses this as two `Egress`/`Ingress`-style class
//! hierarchies selected at setup time. Since a flow's
//! [`crate::region::DataLayout`] never changes after setup, this module
//! skips the trait-object indirection: [`target::Target`](crate::target)
//! and [`initiator::Initiator`](crate::initiator) match on the layout once
//! and call the matching free function directly, which is both simpler and
//! lets the compiler rule out calling the video path with an audio layout.

use crate::bounce;
use crate::error::{FabricsError, Result};
use crate::local_region::LocalRegion;
use crate::region::AudioDataLayout;
use crate::remote_region::{RemoteRegion, RemoteRegionGroup};
use crate::slice::SliceRange;

/// One posted RMA write: bytes from `local` land at `remote`.
#[derive(Debug, Clone, Copy)]
pub struct PlannedWrite {
    /// Source bytes on the initiator side.
    pub local: LocalRegion,
    /// Destination on the target side.
    pub remote: RemoteRegion,
}

/// Plan the RMA writes for one discrete (video) grain transfer over
/// `range`. `local_group`/`remote_group`/`slice_sizes` must all have the
/// same length: one entry per plane (e.g. colour, then alpha). Grounded on
/// `GrainSlices::transferSize`/`transferOffset` (spec.md §8 invariants 3/4).
pub fn plan_grain_transfer(
    local_group: &[LocalRegion],
    remote_group: &[RemoteRegion],
    slice_sizes: &[u32],
    range: SliceRange,
    payload_offset: u32,
) -> Result<Vec<PlannedWrite>> {
    if local_group.len() != remote_group.len() || local_group.len() != slice_sizes.len() {
        return Err(FabricsError::invalid_arg("local regions, remote regions and slice sizes must all have the same plane count"));
    }

    let mut writes = Vec::with_capacity(local_group.len());
    for ((local, remote), &slice_size) in local_group.iter().zip(remote_group).zip(slice_sizes) {
        let size = range.transfer_size(payload_offset, slice_size) as usize;
        let offset = range.transfer_offset(payload_offset, slice_size as i32) as u64;
        let local_write = LocalRegion { addr: local.addr + offset, len: size, desc: local.desc };
        let remote_write = remote.sub(offset, size)?;
        writes.push(PlannedWrite { local: local_write, remote: remote_write });
    }
    Ok(writes)
}

/// Plan the RMA writes for one continuous (audio) sample window,
/// `[head_index, head_index + count)` samples per channel out of
/// `local_region`, landing in bounce entry `entry_index` of
/// `remote_bounce_entries`. Grounded on
/// `AudioBounceBuffer::scatterGatherList`.
pub fn plan_audio_transfer(
    local_region: LocalRegion,
    remote_bounce_entries: &RemoteRegionGroup,
    layout: &AudioDataLayout,
    entry_index: usize,
    head_index: u64,
    count: usize,
) -> Result<Vec<PlannedWrite>> {
    let remote_entry = remote_bounce_entries
        .regions()
        .get(entry_index)
        .ok_or_else(|| FabricsError::invalid_arg(format!("bounce entry index {entry_index} out of range")))?;

    let sg_list = bounce::scatter_gather_list(layout, head_index, count, local_region);
    let mut writes = Vec::with_capacity(sg_list.len());
    let mut offset = 0u64;
    for local in sg_list {
        let remote = remote_entry.sub(offset, local.len)?;
        offset += local.len as u64;
        writes.push(PlannedWrite { local, remote });
    }
    Ok(writes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grain_transfer_rejects_mismatched_plane_counts() {
        let range = SliceRange::make(0, 1).unwrap();
        let result = plan_grain_transfer(&[LocalRegion { addr: 0, len: 10, desc: 0 }], &[], &[720], range, 128);
        assert!(result.is_err());
    }

    #[test]
    fn grain_transfer_produces_one_write_per_plane() {
        let range = SliceRange::make(0, 2).unwrap();
        let local = vec![LocalRegion { addr: 0x1000, len: 2000, desc: 1 }, LocalRegion { addr: 0x2000, len: 500, desc: 1 }];
        let remote = vec![RemoteRegion { addr: 0x5000, len: 2000, rkey: 7 }, RemoteRegion { addr: 0x6000, len: 500, rkey: 8 }];
        let writes = plan_grain_transfer(&local, &remote, &[720, 180], range, 128).unwrap();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].local.addr, 0x1000);
        assert_eq!(writes[0].local.len, 128 + 2 * 720);
        assert_eq!(writes[1].remote.rkey, 8);
    }

    #[test]
    fn audio_transfer_rejects_out_of_range_entry() {
        let layout = AudioDataLayout { channel_count: 2, samples_per_channel: 8, bytes_per_sample: 2 };
        let local = LocalRegion { addr: 0x1000, len: 32, desc: 0 };
        let pool = RemoteRegionGroup::new(vec![RemoteRegion { addr: 0, len: 32, rkey: 1 }]);
        assert!(plan_audio_transfer(local, &pool, &layout, 3, 0, 4).is_err());
    }

    #[test]
    fn audio_transfer_writes_land_within_the_chosen_entry() {
        let layout = AudioDataLayout { channel_count: 2, samples_per_channel: 8, bytes_per_sample: 2 };
        let local = LocalRegion { addr: 0x1000, len: 32, desc: 0 };
        let pool = RemoteRegionGroup::new(vec![RemoteRegion { addr: 0x9000, len: 32, rkey: 42 }]);
        let writes = plan_audio_transfer(local, &pool, &layout, 0, 2, 4).unwrap();
        assert!(!writes.is_empty());
        for w in &writes {
            assert_eq!(w.remote.rkey, 42);
            assert!(w.remote.addr >= 0x9000 && w.remote.addr + w.remote.len as u64 <= 0x9000 + 32);
        }
    }
}
