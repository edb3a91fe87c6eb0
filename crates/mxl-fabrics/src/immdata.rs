//! Immediate-data codec: packs/unpacks the 32-bit value carried alongside
//! every one-sided write.
//!
//! Ported from `ImmData.{hpp,cpp}` in `original_source`. Both encodings are
//! bit-exact and endian-neutral with respect to the transport's immediate
//! data field: packing only ever shifts and masks, never depends on host
//! byte order.

/// Discrete (video) immediate data: a ring-buffer index (carried modulo the
/// ring size, hence 16 bits) and the exclusive index of the last slice
/// included in the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImmDataGrain {
    inner: u32,
}

/// The unpacked fields of an [`ImmDataGrain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnpackedGrain {
    /// Ring buffer slot, i.e. `grainIndex mod ring_size` truncated to 16 bits.
    pub ring_buffer_index: u16,
    /// Exclusive index of the last slice carried by this transfer.
    pub slice_index: u16,
}

impl ImmDataGrain {
    /// Wrap an already-packed 32-bit value, e.g. one read back from a
    /// completion queue or a pre-posted receive buffer.
    pub fn from_packed(data: u32) -> Self {
        Self { inner: data }
    }

    /// Pack a ring-buffer index (only the low 16 bits survive, matching
    /// spec.md §4.6's "ringSlot = grainIndex mod ring-size") and a
    /// last-slice index.
    pub fn new(index: u64, slice_index: u16) -> Self {
        let ring_buffer_index = index as u16;
        let inner = ring_buffer_index as u32 | ((slice_index as u32) << 16);
        Self { inner }
    }

    /// Unpack into `(ring_buffer_index, slice_index)`.
    pub fn unpack(&self) -> UnpackedGrain {
        UnpackedGrain { ring_buffer_index: (self.inner & 0xFFFF) as u16, slice_index: (self.inner >> 16) as u16 }
    }

    /// The packed 32-bit representation as carried by the transport.
    pub fn data(&self) -> u32 {
        self.inner
    }
}

const ENTRY_BITS: u32 = 2;
const HEAD_BITS: u32 = 18;
const COUNT_BITS: u32 = 12;
const ENTRY_MASK: u32 = (1 << ENTRY_BITS) - 1;
const HEAD_MASK: u32 = (1 << HEAD_BITS) - 1;
const COUNT_MASK: u32 = (1 << COUNT_BITS) - 1;

/// Continuous (audio) immediate data: which bounce-buffer entry was
/// written, the partial head index (carried modulo the entry's addressable
/// window), and the per-channel sample count for this transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImmDataSample {
    inner: u32,
}

/// The unpacked fields of an [`ImmDataSample`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnpackedSample {
    /// Index of the bounce-buffer entry the data was staged in.
    pub entry_index: u32,
    /// Partial head index, modulo `2^18`.
    pub head_index: u32,
    /// Samples per channel carried in this transfer.
    pub count: u32,
}

impl ImmDataSample {
    /// Wrap an already-packed 32-bit value.
    pub fn from_packed(data: u32) -> Self {
        Self { inner: data }
    }

    /// Pack `(entry_index, head_index, count)`. Each field is truncated to
    /// its bit width (2/18/12 bits respectively) before packing, so this is
    /// the identity for any input already within range.
    pub fn new(entry_index: u32, head_index: u64, count: u32) -> Self {
        let entry = entry_index & ENTRY_MASK;
        let head = (head_index as u32) & HEAD_MASK;
        let count = count & COUNT_MASK;
        let inner = entry | (head << ENTRY_BITS) | (count << (ENTRY_BITS + HEAD_BITS));
        Self { inner }
    }

    /// Unpack into `(entry_index, head_index, count)`.
    pub fn unpack(&self) -> UnpackedSample {
        let entry_index = self.inner & ENTRY_MASK;
        let head_index = (self.inner >> ENTRY_BITS) & HEAD_MASK;
        let count = (self.inner >> (ENTRY_BITS + HEAD_BITS)) & COUNT_MASK;
        UnpackedSample { entry_index, head_index, count }
    }

    /// The packed 32-bit representation as carried by the transport.
    pub fn data(&self) -> u32 {
        self.inner
    }

    /// Number of distinct bounce-buffer entries addressable by this codec.
    pub const ENTRY_COUNT: u32 = 1 << ENTRY_BITS;
}

/// Reconstruct an absolute ring index from a partial value (the low bits
/// carried in the immediate-data word, i.e. `index mod ring_size`) and a
/// `reference` index, choosing the ring-aligned value nearest the
/// reference. This is uniquely correct as long as the true index is within
/// half a ring of the reference (spec.md §4.3.3, §5).
pub fn nearest_ring_index(partial: u64, reference: u64, ring_size: u64) -> u64 {
    if ring_size == 0 {
        return partial;
    }
    let partial = partial % ring_size;
    let base = (reference / ring_size) * ring_size + partial;
    let candidates = [base.saturating_sub(ring_size), base, base + ring_size];
    *candidates.iter().min_by_key(|&&c| reference.abs_diff(c)).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn grain_pack_unpack_matches_spec_example() {
        let packed = ImmDataGrain::new(0, 1);
        let unpacked = packed.unpack();
        assert_eq!(unpacked.ring_buffer_index, 0);
        assert_eq!(unpacked.slice_index, 1);
    }

    #[test]
    fn grain_ring_index_wraps_modulo_2_16() {
        let packed = ImmDataGrain::new(0x1_0001, 7);
        assert_eq!(packed.unpack().ring_buffer_index, 1);
    }

    proptest! {
        #[test]
        fn grain_pack_then_unpack_identity_on_raw_word(raw in any::<u32>()) {
            let roundtrip = ImmDataGrain::from_packed(raw).data();
            prop_assert_eq!(roundtrip, raw);
        }

        #[test]
        fn grain_new_then_unpack_roundtrips_fields(index in any::<u64>(), slice in any::<u16>()) {
            let g = ImmDataGrain::new(index, slice);
            let u = g.unpack();
            prop_assert_eq!(u.ring_buffer_index, index as u16);
            prop_assert_eq!(u.slice_index, slice);
        }

        #[test]
        fn sample_pack_then_unpack_identity_on_raw_word(raw in any::<u32>()) {
            let roundtrip = ImmDataSample::from_packed(raw).data();
            prop_assert_eq!(roundtrip, raw);
        }

        #[test]
        fn sample_new_then_unpack_roundtrips_fields_within_range(
            entry in 0u32..4,
            head in 0u64..(1 << 18),
            count in 0u32..(1 << 12),
        ) {
            let s = ImmDataSample::new(entry, head, count);
            let u = s.unpack();
            prop_assert_eq!(u.entry_index, entry);
            prop_assert_eq!(u.head_index as u64, head);
            prop_assert_eq!(u.count, count);
        }
    }

    #[test]
    fn sample_rejects_overlarge_fields_by_truncation() {
        let s = ImmDataSample::new(7, 1 << 20, 1 << 15);
        let u = s.unpack();
        assert_eq!(u.entry_index, 7 & ENTRY_MASK);
        assert_eq!(u.head_index, (1u32 << 20) & HEAD_MASK);
        assert_eq!(u.count, (1u32 << 15) & COUNT_MASK);
    }

    #[test]
    fn nearest_ring_index_recovers_exact_match_when_no_wrap_occurred() {
        assert_eq!(nearest_ring_index(0, 100, 2), 100);
        assert_eq!(nearest_ring_index(1, 101, 2), 101);
    }

    #[test]
    fn nearest_ring_index_picks_the_candidate_closest_to_the_reference() {
        // ring_size=4, reference=9 (slot 1), partial carries slot 3: the nearest
        // absolute index congruent to 3 mod 4 is 7, not 11.
        assert_eq!(nearest_ring_index(3, 9, 4), 7);
        assert_eq!(nearest_ring_index(1, 9, 4), 9);
    }

    proptest! {
        #[test]
        fn nearest_ring_index_is_exact_within_half_the_ring(
            reference in 0u64..1_000_000,
            ring_size in 1u64..1000,
            delta in 0i64..500,
        ) {
            let ring_size = ring_size.max(2);
            let delta = delta % (ring_size as i64 / 2).max(1);
            let truth = (reference as i64 + delta).max(0) as u64;
            let partial = truth % ring_size;
            prop_assert_eq!(nearest_ring_index(partial, reference, ring_size), truth);
        }
    }
}
