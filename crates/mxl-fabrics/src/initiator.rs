//! Sender-side state machines: one connection-oriented (CO) per-peer
//! variant with an activation throttle and explicit shutdown, one
//! connectionless (CL) per-peer variant driven entirely by address-vector
//! membership.
//!
//! Grounded on `RCInitiator.{hpp,cpp}` (CO) and `RDMInitiator.hpp` (CL) in
//! `original_source`. Where the original tracks per-peer state behind a
//! `std::map<Endpoint::Id, RCInitiatorEndpoint>` dispatched with
//! `std::visit`/`overloaded`, this module keys a `HashMap` by the peer's
//! [`TargetInfo`] identifier and dispatches with `match`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::bounce::NUMBER_OF_ENTRIES;
use crate::error::{FabricsError, Result};
use crate::fabric::{AccessFlags, AddressVector, Domain, Endpoint, Event, Fabric, ProviderCapabilities};
use crate::immdata::{ImmDataGrain, ImmDataSample};
use crate::local_region::{LocalRegion, LocalRegionGroup};
use crate::protocol;
use crate::provider::Provider;
use crate::region::{DataLayout, RegionSet};
use crate::remote_region::{RemoteRegion, RemoteRegionGroup};
use crate::slice::SliceRange;
use crate::target_info::TargetInfo;

/// Minimum elapsed time between two activation attempts for the same
/// connection-oriented peer, matching `RCInitiatorEndpoint::activate`'s
/// five-second throttle.
const ACTIVATION_BACKOFF: Duration = Duration::from_secs(5);

/// Configuration for [`Initiator::setup`].
#[derive(Debug, Clone)]
pub struct InitiatorConfig {
    /// The fabric provider to use, or [`Provider::Auto`].
    pub provider: Provider,
    /// Selects the connection-oriented backend (`true`) or the
    /// connectionless backend (`false`).
    pub connection_oriented: bool,
    /// The regions backing this initiator's outgoing ring, if any.
    pub region_set: Option<RegionSet>,
    /// Negotiate virtual-address mode: this initiator expects every target
    /// it adds to advertise remote regions carrying their real base address
    /// instead of `0` (spec.md §4.1, invariant 2). Checked against each
    /// target's advertised regions in [`Initiator::add_target`].
    pub virtual_address_mode: bool,
    /// Negotiate cq-data-via-recv mode on this initiator's own domain
    /// (spec.md §4.2/§4.3.1). Only meaningful if this initiator ever
    /// registers remotely-writable regions of its own.
    pub cq_data_via_recv_mode: bool,
}

impl Default for InitiatorConfig {
    fn default() -> Self {
        Self { provider: Provider::Auto, connection_oriented: true, region_set: None, virtual_address_mode: false, cq_data_via_recv_mode: false }
    }
}

enum CoPeerState {
    Idle { ep: Endpoint, idle_since: Option<Instant> },
    Connecting { ep: Endpoint },
    Connected { ep: Endpoint, pending: usize },
    Shutdown { ep: Endpoint },
    Done,
}

struct CoPeer {
    state: CoPeerState,
    remote_address: u64,
    remote_regions: Vec<RemoteRegion>,
}

enum ClPeerState {
    Idle,
    Activated { fi_addr: u64 },
    Done,
}

struct ClPeer {
    state: ClPeerState,
    remote_address_bytes: Vec<u8>,
    remote_regions: Vec<RemoteRegion>,
}

enum Backend {
    ConnectionOriented { domain: Domain, peers: HashMap<u64, CoPeer> },
    Connectionless { ep: Endpoint, av: AddressVector, peers: HashMap<u64, ClPeer> },
}

/// A sender. Drains its own outgoing ring and posts one-sided writes to
/// every peer added via [`Initiator::add_target`]; progress (connecting,
/// completions, teardown) only happens inside [`Initiator::make_progress`]
/// / [`Initiator::make_progress_blocking`] (spec.md §5).
pub struct Initiator {
    backend: Backend,
    local_groups: Vec<LocalRegionGroup>,
    group_len: usize,
    layout: Option<DataLayout>,
    virtual_address_mode: bool,
    metrics: crate::metrics::FabricsMetrics,
}

fn remote_group_for(regions: &[RemoteRegion], group_len: usize, index: u64) -> &[RemoteRegion] {
    if group_len == 0 || regions.is_empty() {
        return &[];
    }
    let slot_count = regions.len() / group_len;
    let slot = (index as usize % slot_count.max(1)) * group_len;
    &regions[slot..slot + group_len]
}

impl Initiator {
    /// Open a fabric/domain for `config.provider`, register
    /// `config.region_set`'s regions for local read access, and open
    /// either a shared endpoint (CL) or no endpoint yet (CO: one endpoint
    /// is opened per peer on [`Initiator::add_target`]).
    pub fn setup(config: InitiatorConfig) -> Result<Self> {
        let required = ProviderCapabilities { connection_oriented: config.connection_oriented, connectionless: !config.connection_oriented };
        let fabric = Fabric::open(config.provider, required)?;
        let domain = fabric.open_domain(config.virtual_address_mode, config.cq_data_via_recv_mode);

        let layout = config.region_set.as_ref().map(|rs| rs.layout().clone());
        let group_len = config.region_set.as_ref().map(|rs| rs.groups().first().map(|g| g.regions().len()).unwrap_or(0)).unwrap_or(0);

        let access = AccessFlags::LOCAL_READ | AccessFlags::LOCAL_WRITE;
        let mut local_groups = Vec::new();
        if let Some(rs) = &config.region_set {
            for group in rs.groups() {
                let mut regions = Vec::with_capacity(group.regions().len());
                for region in group.regions() {
                    // An initiator's outgoing local regions are never the
                    // target of a remote write, so they have no completion
                    // sink to deliver into.
                    let mr = domain.register_region(region.size, access, None)?;
                    regions.push(LocalRegion { addr: region.base, len: region.size, desc: mr.local_desc() });
                }
                local_groups.push(LocalRegionGroup::new(regions));
            }
        }

        let backend = if config.connection_oriented {
            Backend::ConnectionOriented { domain, peers: HashMap::new() }
        } else {
            let ep = domain.open_endpoint();
            Backend::Connectionless { ep, av: AddressVector::new(), peers: HashMap::new() }
        };

        Ok(Initiator {
            backend,
            local_groups,
            group_len,
            layout,
            virtual_address_mode: config.virtual_address_mode,
            metrics: crate::metrics::FabricsMetrics::new(),
        })
    }

    /// This initiator's transfer/connection metrics.
    pub fn metrics(&self) -> &crate::metrics::FabricsMetrics {
        &self.metrics
    }

    fn local_group(&self, index: u64) -> Result<&LocalRegionGroup> {
        if self.local_groups.is_empty() {
            return Err(FabricsError::invalid_state("initiator has no registered local regions"));
        }
        Ok(&self.local_groups[index as usize % self.local_groups.len()])
    }

    fn video_slice_sizes(&self) -> Result<Vec<u32>> {
        match &self.layout {
            Some(DataLayout::Video(v)) => Ok(v.slice_sizes.clone()),
            _ => Err(FabricsError::invalid_state("transferGrain called on a non-video initiator")),
        }
    }

    /// Add a target. Idempotent: adding an already-known identifier is a
    /// no-op (spec.md §9 open question (a), decided uniformly for both
    /// backends). No I/O happens until [`Initiator::make_progress`].
    pub fn add_target(&mut self, info: TargetInfo) -> Result<()> {
        let identifier = info.identifier();
        let address_bytes = info.fabric_address().as_bytes().to_vec();

        // A target's addressing mode is not carried on the wire explicitly;
        // it is inferred from whether its advertised regions carry a real
        // base address or `0` (spec.md §4.1, invariant 2). An empty region
        // set (e.g. a bare connection-establishment target) carries no
        // evidence either way, so it is never rejected.
        if let Some(first) = info.regions().first() {
            let target_virtual_addressed = first.addr != 0;
            if target_virtual_addressed != self.virtual_address_mode {
                return Err(FabricsError::invalid_arg(
                    "target's negotiated virtual-address mode does not match this initiator's domain",
                ));
            }
        }

        match &mut self.backend {
            Backend::ConnectionOriented { domain, peers } => {
                if peers.contains_key(&identifier) {
                    return Ok(());
                }
                let remote_address = decode_address(&address_bytes)?;
                let ep = domain.open_endpoint();
                peers.insert(
                    identifier,
                    CoPeer { state: CoPeerState::Idle { ep, idle_since: None }, remote_address, remote_regions: info.regions().to_vec() },
                );
            }
            Backend::Connectionless { peers, .. } => {
                if peers.contains_key(&identifier) {
                    return Ok(());
                }
                peers.insert(
                    identifier,
                    ClPeer { state: ClPeerState::Idle, remote_address_bytes: address_bytes, remote_regions: info.regions().to_vec() },
                );
            }
        }
        Ok(())
    }

    /// Request a graceful shutdown of a previously added target. Fails
    /// with [`FabricsError::NotFound`] for an unknown identifier.
    pub fn remove_target(&mut self, identifier: u64) -> Result<()> {
        match &mut self.backend {
            Backend::ConnectionOriented { peers, .. } => {
                let peer = peers.get_mut(&identifier).ok_or_else(|| FabricsError::not_found(format!("no target with id {identifier}")))?;
                let owned = std::mem::replace(&mut peer.state, CoPeerState::Done);
                peer.state = match owned {
                    CoPeerState::Connected { ep, .. } | CoPeerState::Connecting { ep } => {
                        ep.close();
                        CoPeerState::Shutdown { ep }
                    }
                    CoPeerState::Idle { .. } | CoPeerState::Shutdown { .. } | CoPeerState::Done => CoPeerState::Done,
                };
            }
            Backend::Connectionless { av, peers, .. } => {
                let peer = peers.get_mut(&identifier).ok_or_else(|| FabricsError::not_found(format!("no target with id {identifier}")))?;
                if let ClPeerState::Activated { .. } = peer.state {
                    av.remove(&peer.remote_address_bytes);
                }
                peer.state = ClPeerState::Done;
            }
        }
        Ok(())
    }

    fn activate_idle_peers(&mut self) {
        match &mut self.backend {
            Backend::ConnectionOriented { peers, .. } => {
                for peer in peers.values_mut() {
                    let owned = std::mem::replace(&mut peer.state, CoPeerState::Done);
                    peer.state = match owned {
                        CoPeerState::Idle { ep, idle_since } => {
                            let ready = idle_since.map(|since| since.elapsed() >= ACTIVATION_BACKOFF).unwrap_or(true);
                            if !ready {
                                CoPeerState::Idle { ep, idle_since }
                            } else {
                                match ep.connect(peer.remote_address) {
                                    Ok(()) => {
                                        self.metrics.record_connect_attempt(false);
                                        CoPeerState::Connecting { ep }
                                    }
                                    Err(_) => {
                                        self.metrics.record_connect_attempt(true);
                                        CoPeerState::Idle { ep, idle_since: Some(Instant::now()) }
                                    }
                                }
                            }
                        }
                        other => other,
                    };
                }
            }
            Backend::Connectionless { av, peers, .. } => {
                for peer in peers.values_mut() {
                    if let ClPeerState::Idle = peer.state {
                        if let Ok(fi_addr) = av.insert(&peer.remote_address_bytes) {
                            peer.state = ClPeerState::Activated { fi_addr };
                        }
                    }
                }
            }
        }
    }

    fn poll_co_queues(&mut self) {
        if let Backend::ConnectionOriented { peers, .. } = &mut self.backend {
            for peer in peers.values_mut() {
                let owned = std::mem::replace(&mut peer.state, CoPeerState::Done);
                peer.state = match owned {
                    CoPeerState::Connecting { ep } => match ep.event_queue().poll() {
                        Some(Event::Connected) => CoPeerState::Connected { ep, pending: 0 },
                        Some(Event::Shutdown) => CoPeerState::Idle { ep, idle_since: Some(Instant::now()) },
                        _ => CoPeerState::Connecting { ep },
                    },
                    CoPeerState::Connected { ep, mut pending } => {
                        if matches!(ep.event_queue().poll(), Some(Event::Shutdown)) {
                            CoPeerState::Idle { ep, idle_since: Some(Instant::now()) }
                        } else {
                            while ep.completion_queue().poll().is_some() {
                                pending = pending.saturating_sub(1);
                            }
                            CoPeerState::Connected { ep, pending }
                        }
                    }
                    CoPeerState::Shutdown { ep } => match ep.event_queue().poll() {
                        Some(Event::Shutdown) => CoPeerState::Done,
                        _ => CoPeerState::Shutdown { ep },
                    },
                    other => other,
                };
            }
        }
    }

    fn evict_done_peers(&mut self) {
        let evicted = match &mut self.backend {
            Backend::ConnectionOriented { peers, .. } => {
                let before = peers.len();
                peers.retain(|_, p| !matches!(p.state, CoPeerState::Done));
                before - peers.len()
            }
            Backend::Connectionless { peers, .. } => {
                let before = peers.len();
                peers.retain(|_, p| !matches!(p.state, ClPeerState::Done));
                before - peers.len()
            }
        };
        for _ in 0..evicted {
            self.metrics.record_target_evicted();
        }
    }

    fn has_pending_work(&self) -> bool {
        match &self.backend {
            Backend::ConnectionOriented { peers, .. } => peers.values().any(|p| {
                !matches!(p.state, CoPeerState::Done)
                    && !matches!(p.state, CoPeerState::Connected { pending: 0, .. })
                    && !matches!(p.state, CoPeerState::Idle { idle_since: Some(_), .. })
            }),
            Backend::Connectionless { peers, .. } => peers.values().any(|p| matches!(p.state, ClPeerState::Idle)),
        }
    }

    /// Post a discrete (video) grain to every connected/activated peer.
    /// `ringSlot = grain_index mod ring-size` selects both the local and
    /// (per peer) the remote sub-region; `payload_offset` is folded into
    /// the transfer only when `range.start() == 0` (spec.md §4.4.3).
    pub fn transfer_grain(&mut self, grain_index: u64, payload_offset: u32, range: SliceRange) -> Result<()> {
        let slice_sizes = self.video_slice_sizes()?;
        let local_group = self.local_group(grain_index)?.regions().to_vec();
        let imm = ImmDataGrain::new(grain_index, range.end()).data();
        let group_len = self.group_len;

        match &mut self.backend {
            Backend::ConnectionOriented { peers, .. } => {
                for peer in peers.values_mut() {
                    if let CoPeerState::Connected { ep, pending } = &mut peer.state {
                        let remote_group = remote_group_for(&peer.remote_regions, group_len, grain_index);
                        if remote_group.is_empty() {
                            continue;
                        }
                        let writes = protocol::plan_grain_transfer(&local_group, remote_group, &slice_sizes, range, payload_offset)?;
                        for w in &writes {
                            let bytes = unsafe { std::slice::from_raw_parts(w.local.addr as *const u8, w.local.len) };
                            ep.write(grain_index, bytes, w.remote.rkey, w.remote.addr as usize, imm)?;
                            *pending += 1;
                            self.metrics.record_transfer_posted(bytes.len() as u64);
                        }
                    }
                }
            }
            Backend::Connectionless { ep, peers, .. } => {
                for peer in peers.values() {
                    if let ClPeerState::Activated { .. } = peer.state {
                        let remote_group = remote_group_for(&peer.remote_regions, group_len, grain_index);
                        if remote_group.is_empty() {
                            continue;
                        }
                        let writes = protocol::plan_grain_transfer(&local_group, remote_group, &slice_sizes, range, payload_offset)?;
                        for w in &writes {
                            let bytes = unsafe { std::slice::from_raw_parts(w.local.addr as *const u8, w.local.len) };
                            ep.write(grain_index, bytes, w.remote.rkey, w.remote.addr as usize, imm)?;
                            self.metrics.record_transfer_posted(bytes.len() as u64);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Post a discrete grain to exactly one target, with an independent
    /// local and remote ring index, used when the two peers' rings are
    /// laid out differently (spec.md §4.4.3 `transferGrainToTarget`).
    pub fn transfer_grain_to_target(
        &mut self,
        target_identifier: u64,
        local_index: u64,
        remote_index: u64,
        payload_offset: u32,
        range: SliceRange,
    ) -> Result<()> {
        let slice_sizes = self.video_slice_sizes()?;
        let local_group = self.local_group(local_index)?.regions().to_vec();
        let imm = ImmDataGrain::new(remote_index, range.end()).data();
        let group_len = self.group_len;

        match &mut self.backend {
            Backend::ConnectionOriented { peers, .. } => {
                let peer = peers.get_mut(&target_identifier).ok_or_else(|| FabricsError::not_found(format!("no target with id {target_identifier}")))?;
                if let CoPeerState::Connected { ep, pending } = &mut peer.state {
                    let remote_group = remote_group_for(&peer.remote_regions, group_len, remote_index);
                    let writes = protocol::plan_grain_transfer(&local_group, remote_group, &slice_sizes, range, payload_offset)?;
                    for w in &writes {
                        let bytes = unsafe { std::slice::from_raw_parts(w.local.addr as *const u8, w.local.len) };
                        ep.write(local_index, bytes, w.remote.rkey, w.remote.addr as usize, imm)?;
                        *pending += 1;
                        self.metrics.record_transfer_posted(bytes.len() as u64);
                    }
                }
            }
            Backend::Connectionless { ep, peers, .. } => {
                let peer = peers.get(&target_identifier).ok_or_else(|| FabricsError::not_found(format!("no target with id {target_identifier}")))?;
                if let ClPeerState::Activated { .. } = peer.state {
                    let remote_group = remote_group_for(&peer.remote_regions, group_len, remote_index);
                    let writes = protocol::plan_grain_transfer(&local_group, remote_group, &slice_sizes, range, payload_offset)?;
                    for w in &writes {
                        let bytes = unsafe { std::slice::from_raw_parts(w.local.addr as *const u8, w.local.len) };
                        ep.write(local_index, bytes, w.remote.rkey, w.remote.addr as usize, imm)?;
                        self.metrics.record_transfer_posted(bytes.len() as u64);
                    }
                }
            }
        }
        Ok(())
    }

    /// Post a continuous (audio) sample window of `count` samples per
    /// channel starting at `head_index`, bounce-copied into a round-robin
    /// staging entry at each peer (spec.md §4.4.3 `transferSamples`,
    /// §4.5.2).
    pub fn transfer_samples(&mut self, head_index: u64, count: usize) -> Result<()> {
        let layout = match &self.layout {
            Some(DataLayout::Audio(a)) => *a,
            _ => return Err(FabricsError::invalid_state("transferSamples called on a non-audio initiator")),
        };
        let source = self
            .local_groups
            .first()
            .and_then(|g| g.regions().first())
            .copied()
            .ok_or_else(|| FabricsError::invalid_state("initiator has no registered audio source region"))?;

        match &mut self.backend {
            Backend::ConnectionOriented { peers, .. } => {
                for peer in peers.values_mut() {
                    if let CoPeerState::Connected { ep, pending } = &mut peer.state {
                        if peer.remote_regions.is_empty() {
                            continue;
                        }
                        let entry_index = (head_index as usize) % peer.remote_regions.len().min(NUMBER_OF_ENTRIES).max(1);
                        let pool = RemoteRegionGroup::new(peer.remote_regions.clone());
                        let writes = protocol::plan_audio_transfer(source, &pool, &layout, entry_index, head_index, count)?;
                        let imm = ImmDataSample::new(entry_index as u32, head_index, count as u32).data();
                        for w in &writes {
                            let bytes = unsafe { std::slice::from_raw_parts(w.local.addr as *const u8, w.local.len) };
                            ep.write(head_index, bytes, w.remote.rkey, w.remote.addr as usize, imm)?;
                            *pending += 1;
                            self.metrics.record_transfer_posted(bytes.len() as u64);
                        }
                    }
                }
            }
            Backend::Connectionless { ep, peers, .. } => {
                for peer in peers.values() {
                    if let ClPeerState::Activated { .. } = peer.state {
                        if peer.remote_regions.is_empty() {
                            continue;
                        }
                        let entry_index = (head_index as usize) % peer.remote_regions.len().min(NUMBER_OF_ENTRIES).max(1);
                        let pool = RemoteRegionGroup::new(peer.remote_regions.clone());
                        let writes = protocol::plan_audio_transfer(source, &pool, &layout, entry_index, head_index, count)?;
                        let imm = ImmDataSample::new(entry_index as u32, head_index, count as u32).data();
                        for w in &writes {
                            let bytes = unsafe { std::slice::from_raw_parts(w.local.addr as *const u8, w.local.len) };
                            ep.write(head_index, bytes, w.remote.rkey, w.remote.addr as usize, imm)?;
                            self.metrics.record_transfer_posted(bytes.len() as u64);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Non-blocking: activate idle peers, drain every peer's queues once,
    /// evict peers that reached their terminal state, and report whether
    /// any work remains.
    pub fn make_progress(&mut self) -> bool {
        self.activate_idle_peers();
        self.poll_co_queues();
        self.evict_done_peers();
        self.has_pending_work()
    }

    /// Blocking: call [`Initiator::make_progress`] in a loop bounded by
    /// `timeout`, sleeping in increments no larger than
    /// [`crate::fabric::MAX_POLL_INTERVAL`] between iterations, and return
    /// whether work remains once the deadline passes or progress stalls.
    pub fn make_progress_blocking(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.make_progress() {
                return false;
            }
            if Instant::now() >= deadline {
                return self.has_pending_work();
            }
            std::thread::sleep(crate::fabric::MAX_POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
        }
    }
}

fn decode_address(bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| FabricsError::invalid_arg("fabric address must be exactly 8 bytes in this simulation"))?;
    Ok(u64::from_le_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{Target, TargetConfig};

    #[test]
    fn connects_over_co_and_reaches_no_pending_work() {
        let (mut target, info) = Target::setup(TargetConfig { provider: Provider::Tcp, ..Default::default() }).unwrap();
        let mut initiator = Initiator::setup(InitiatorConfig { provider: Provider::Tcp, ..Default::default() }).unwrap();
        initiator.add_target(info).unwrap();

        for _ in 0..5 {
            let _ = target.read();
            initiator.make_progress();
        }

        assert!(!initiator.make_progress());
    }

    #[test]
    fn connects_over_cl_and_reaches_no_pending_work() {
        let (_target, info) =
            Target::setup(TargetConfig { provider: Provider::Shm, connection_oriented: false, ..Default::default() }).unwrap();
        let mut initiator =
            Initiator::setup(InitiatorConfig { provider: Provider::Shm, connection_oriented: false, ..Default::default() }).unwrap();
        initiator.add_target(info).unwrap();

        assert!(!initiator.make_progress());
    }

    #[test]
    fn add_target_is_idempotent_on_duplicate_identifier() {
        let (_target, info) =
            Target::setup(TargetConfig { provider: Provider::Shm, connection_oriented: false, ..Default::default() }).unwrap();
        let mut initiator =
            Initiator::setup(InitiatorConfig { provider: Provider::Shm, connection_oriented: false, ..Default::default() }).unwrap();
        initiator.add_target(info.clone()).unwrap();
        assert!(initiator.add_target(info).is_ok());
    }

    #[test]
    fn remove_target_fails_for_unknown_identifier() {
        let mut initiator =
            Initiator::setup(InitiatorConfig { provider: Provider::Shm, connection_oriented: false, ..Default::default() }).unwrap();
        assert!(matches!(initiator.remove_target(0xDEAD), Err(FabricsError::NotFound { .. })));
    }

    #[test]
    fn single_grain_transfer_delivers_the_expected_partial_index() {
        use crate::region::{Location, Region, RegionGroup};

        let video_bytes = vec![0xABu8; 1_000_000];
        let region = Region::new(video_bytes.as_ptr() as u64, video_bytes.len(), Location::host());
        let initiator_set = RegionSet::new(vec![RegionGroup::new(vec![region])], DataLayout::video(vec![720])).unwrap();

        let target_bytes = vec![0u8; 1_000_000];
        let target_region = Region::new(target_bytes.as_ptr() as u64, target_bytes.len(), Location::host());
        let target_set = RegionSet::new(vec![RegionGroup::new(vec![target_region])], DataLayout::video(vec![720])).unwrap();

        let (mut target, info) = Target::setup(TargetConfig {
            provider: Provider::Tcp,
            connection_oriented: true,
            region_set: Some(target_set),
            ..Default::default()
        })
        .unwrap();
        let mut initiator = Initiator::setup(InitiatorConfig {
            provider: Provider::Tcp,
            connection_oriented: true,
            region_set: Some(initiator_set),
            ..Default::default()
        })
        .unwrap();
        initiator.add_target(info).unwrap();

        for _ in 0..5 {
            let _ = target.read();
            initiator.make_progress();
        }

        let range = SliceRange::make(0, 1).unwrap();
        initiator.transfer_grain(0, 0, range).unwrap();
        initiator.make_progress();

        let arrival = (0..5).find_map(|_| target.read().ok()).expect("grain should have arrived");
        match arrival {
            crate::target::Arrival::Grain { index, last_slice } => {
                assert_eq!(index, 0);
                assert_eq!(last_slice, 1);
            }
            crate::target::Arrival::Samples { .. } => panic!("expected a grain arrival"),
        }

        let initiator_snapshot = initiator.metrics().snapshot();
        assert_eq!(initiator_snapshot.transfers_posted, 1);
        assert!(initiator_snapshot.connect_attempts >= 1);
        let target_snapshot = target.metrics().snapshot();
        assert_eq!(target_snapshot.index_recoveries, 1);
    }

    #[test]
    fn add_target_rejects_an_address_mode_mismatch() {
        use crate::region::{DataLayout, Location, Region, RegionGroup, RegionSet};

        let region_set = RegionSet::new(vec![RegionGroup::new(vec![Region::new(0x8000, 64, Location::host())])], DataLayout::video(vec![64])).unwrap();
        let (_target, info) = Target::setup(TargetConfig {
            provider: Provider::Shm,
            connection_oriented: false,
            region_set: Some(region_set),
            virtual_address_mode: true,
            ..Default::default()
        })
        .unwrap();

        let mut initiator =
            Initiator::setup(InitiatorConfig { provider: Provider::Shm, connection_oriented: false, ..Default::default() }).unwrap();

        assert!(matches!(initiator.add_target(info), Err(FabricsError::InvalidArg { .. })));
    }

    #[test]
    fn evicting_a_removed_peer_is_reflected_in_metrics() {
        let (_target, info) =
            Target::setup(TargetConfig { provider: Provider::Shm, connection_oriented: false, ..Default::default() }).unwrap();
        let mut initiator =
            Initiator::setup(InitiatorConfig { provider: Provider::Shm, connection_oriented: false, ..Default::default() }).unwrap();
        let identifier = info.identifier();
        initiator.add_target(info).unwrap();
        initiator.make_progress();
        initiator.remove_target(identifier).unwrap();
        initiator.make_progress();

        assert_eq!(initiator.metrics().snapshot().targets_evicted, 1);
    }
}
