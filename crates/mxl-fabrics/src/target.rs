//! Receiver-side state machines: one connection-oriented (CO) variant with
//! an explicit connect/accept handshake, one connectionless (CL) variant
//! that is ready as soon as its endpoint exists.
//!
//! Grounded on `RCTarget.{hpp,cpp}` (CO) and `RDMTarget.hpp` (CL) in
//! `original_source`. The original encodes CO state as a
//! `std::variant<WaitForConnectionRequest, WaitForConnection, Connected>`
//! dispatched through an `overloaded` visitor; this module uses a Rust
//! `enum` + `match` for the same purpose.

use std::time::{Duration, Instant};

use crate::bounce::BounceBuffer;
use crate::error::{FabricsError, Result};
use crate::fabric::{Domain, Endpoint, Event, Fabric, PassiveEndpoint, MAX_POLL_INTERVAL};
use crate::immdata::{nearest_ring_index, ImmDataGrain, ImmDataSample};
use crate::provider::Provider;
use crate::region::{DataLayout, RegionSet};
use crate::remote_region::RemoteRegionGroup;
use crate::target_info::{FabricAddress, TargetInfo};

/// One newly arrived index, as surfaced by [`Target::read`] /
/// [`Target::read_blocking`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// A discrete (video) grain arrived: its absolute ring index and the
    /// exclusive index of the last slice included in the transfer.
    Grain {
        /// Absolute grain index, recovered from the partial ring slot.
        index: u64,
        /// Exclusive last-slice index carried by the transfer.
        last_slice: u16,
    },
    /// A continuous (audio) sample window arrived: its absolute head index
    /// and the number of samples per channel transferred.
    Samples {
        /// Absolute head index, recovered from the partial value.
        head_index: u64,
        /// Samples per channel carried by the transfer.
        count: u32,
    },
}

/// Configuration for [`Target::setup`].
#[derive(Debug, Clone)]
pub struct TargetConfig {
    /// The fabric provider to use, or [`Provider::Auto`] to let the backend
    /// pick (TCP for CO, SHM for CL).
    pub provider: Provider,
    /// Selects the connection-oriented backend (`true`) or the
    /// connectionless backend (`false`).
    pub connection_oriented: bool,
    /// The regions backing this target's ring, if any (an empty region set
    /// is valid, e.g. scenario 1/2's bare connection-establishment test).
    pub region_set: Option<RegionSet>,
    /// Negotiate virtual-address mode: advertised remote regions carry the
    /// registered region's real base address instead of `0` (spec.md §4.1,
    /// invariant 2).
    pub virtual_address_mode: bool,
    /// Negotiate cq-data-via-recv mode: immediate data only surfaces once a
    /// receive buffer has been posted via [`crate::fabric::Endpoint::recv`]
    /// (spec.md §4.2/§4.3.1).
    pub cq_data_via_recv_mode: bool,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self { provider: Provider::Auto, connection_oriented: true, region_set: None, virtual_address_mode: false, cq_data_via_recv_mode: false }
    }
}

/// A fixed, all-zero placeholder receive buffer: this simulation surfaces
/// immediate data purely through [`crate::fabric::CqEntry::imm_data`], so a
/// posted recv buffer's bytes are never actually read back.
const RECV_BUF: [u8; 4] = [0u8; 4];

enum CoState {
    WaitForConnReq { pep: PassiveEndpoint },
    WaitForConnected { ep: Endpoint },
    Connected { ep: Endpoint },
    ShuttingDown { ep: Endpoint },
    Done,
}

enum Backend {
    ConnectionOriented(CoState),
    Connectionless { ep: Endpoint },
}

/// What one state-machine step found, before the immediate-data payload
/// (if any) is decoded against the target's own recovery state. Kept
/// separate from [`Arrival`] so that [`advance_co`] never needs to borrow
/// the owning [`Target`].
enum PollSignal {
    Data(u32),
    Shutdown,
    Nothing,
}

/// Advance one connection-oriented step, consuming the current state and
/// producing the next one plus whatever was found. A free function, not a
/// method: it never needs access to the owning [`Target`], which keeps the
/// immediate-data decode step (which does) free of the borrow conflict
/// that would come from holding `state` out of `self.backend` while also
/// calling back into `self`.
fn advance_co(state: CoState, cq_data_via_recv_mode: bool) -> (CoState, PollSignal) {
    match state {
        CoState::WaitForConnReq { pep } => match pep.try_accept() {
            Some(ep) => (CoState::WaitForConnected { ep }, PollSignal::Nothing),
            None => (CoState::WaitForConnReq { pep }, PollSignal::Nothing),
        },
        CoState::WaitForConnected { ep } => match ep.event_queue().poll() {
            Some(Event::Connected) => {
                if cq_data_via_recv_mode {
                    ep.recv(&RECV_BUF).expect("recv buffer is always exactly 4 bytes");
                }
                (CoState::Connected { ep }, PollSignal::Nothing)
            }
            Some(Event::Shutdown) => (CoState::Done, PollSignal::Shutdown),
            _ => (CoState::WaitForConnected { ep }, PollSignal::Nothing),
        },
        CoState::Connected { ep } => {
            if matches!(ep.event_queue().poll(), Some(Event::Shutdown)) {
                return (CoState::Done, PollSignal::Shutdown);
            }
            let signal = match ep.completion_queue().poll().and_then(|entry| entry.imm_data) {
                Some(d) => {
                    if cq_data_via_recv_mode {
                        ep.recv(&RECV_BUF).expect("recv buffer is always exactly 4 bytes");
                    }
                    PollSignal::Data(d)
                }
                None => PollSignal::Nothing,
            };
            (CoState::Connected { ep }, signal)
        }
        CoState::ShuttingDown { ep } => {
            ep.close();
            (CoState::Done, PollSignal::Shutdown)
        }
        CoState::Done => (CoState::Done, PollSignal::Nothing),
    }
}

/// A receiver. Owns its fabric resources and drives its own state machine
/// one step per [`Target::read`] / [`Target::read_blocking`] call
/// (spec.md §5's single-threaded cooperative scheduling model).
pub struct Target {
    domain: Domain,
    backend: Backend,
    bounce: Option<BounceBuffer>,
    remote_region_group: RemoteRegionGroup,
    fabric_address: FabricAddress,
    identifier: u64,
    ring_size: u64,
    last_grain_index: u64,
    last_head_index: u64,
    metrics: crate::metrics::FabricsMetrics,
}

impl Target {
    /// Open a fabric/domain for `config.provider`, register `region_set`
    /// (or a bounce buffer, for audio layouts), open a listener (CO) or a
    /// bare endpoint (CL), and return both the running target and the
    /// [`TargetInfo`] record to hand to a remote initiator. Fails with
    /// [`FabricsError::NoFabric`] if no provider satisfies the requested
    /// connection mode.
    pub fn setup(config: TargetConfig) -> Result<(Self, TargetInfo)> {
        let required = crate::fabric::ProviderCapabilities {
            connection_oriented: config.connection_oriented,
            connectionless: !config.connection_oriented,
        };
        let fabric = Fabric::open(config.provider, required)?;
        let domain = fabric.open_domain(config.virtual_address_mode, config.cq_data_via_recv_mode);

        let layout = config.region_set.as_ref().map(|rs| rs.layout().clone());
        let ring_size = config.region_set.as_ref().map(|rs| rs.ring_size() as u64).unwrap_or(0);

        let bounce = match &layout {
            Some(DataLayout::Audio(_)) => Some(BounceBuffer::new(layout.clone().unwrap())),
            _ => None,
        };

        let identifier = crate::fabric::random_endpoint_identifier();

        // The backend is opened before any region is registered so that
        // each registered region can be bound to its owning endpoint's
        // completion sink (a passive endpoint's sink is shared with every
        // connection it later accepts, so this binding survives the CO
        // handshake even though no `Endpoint` exists yet at this point).
        let (backend, address, sink) = if config.connection_oriented {
            let pep = domain.open_passive_endpoint();
            let address = pep.address();
            let sink = pep.sink();
            (Backend::ConnectionOriented(CoState::WaitForConnReq { pep }), address, sink)
        } else {
            let ep = domain.open_endpoint();
            let address = ep.address();
            let sink = ep.sink();
            if config.cq_data_via_recv_mode {
                ep.recv(&RECV_BUF).expect("recv buffer is always exactly 4 bytes");
            }
            (Backend::Connectionless { ep }, address, sink)
        };

        let access = crate::fabric::AccessFlags::LOCAL_READ | crate::fabric::AccessFlags::LOCAL_WRITE | crate::fabric::AccessFlags::REMOTE_WRITE;
        let mut remote_regions = Vec::new();
        if let Some(bb) = &bounce {
            for region in bb.regions() {
                let mr = domain.register_region(region.size, access, Some(sink.clone()))?;
                let addr = if domain.virtual_address_mode() { region.base } else { 0 };
                remote_regions.push(crate::remote_region::RemoteRegion { addr, len: mr.len(), rkey: mr.rkey() });
            }
        } else if let Some(rs) = &config.region_set {
            for group in rs.groups() {
                for region in group.regions() {
                    let mr = domain.register_region(region.size, access, Some(sink.clone()))?;
                    let addr = if domain.virtual_address_mode() { region.base } else { 0 };
                    remote_regions.push(crate::remote_region::RemoteRegion { addr, len: mr.len(), rkey: mr.rkey() });
                }
            }
        }

        let fabric_address = FabricAddress::from_bytes(address.to_le_bytes().to_vec());
        let target_info = TargetInfo::new(fabric_address.clone(), remote_regions.clone(), identifier);

        Ok((
            Target {
                domain,
                backend,
                bounce,
                remote_region_group: RemoteRegionGroup::new(remote_regions),
                fabric_address,
                identifier,
                ring_size,
                last_grain_index: 0,
                last_head_index: 0,
                metrics: crate::metrics::FabricsMetrics::new(),
            },
            target_info,
        ))
    }

    /// This target's advertised fabric address.
    pub fn fabric_address(&self) -> &FabricAddress {
        &self.fabric_address
    }

    /// This target's transfer/connection metrics.
    pub fn metrics(&self) -> &crate::metrics::FabricsMetrics {
        &self.metrics
    }

    /// This target's random endpoint identifier.
    pub fn identifier(&self) -> u64 {
        self.identifier
    }

    /// The remote regions this target registered.
    pub fn remote_regions(&self) -> &RemoteRegionGroup {
        &self.remote_region_group
    }

    /// Decode one immediate-data word into an [`Arrival`], recovering the
    /// absolute index against the last index this target surfaced (spec.md
    /// §4.3.3). The very first arrival has no prior reference, so it is
    /// taken as-is; every later one is resolved to whichever ring-aligned
    /// candidate is nearest the previous index, per the "sequential
    /// arrival" ordering guarantee of §5.
    fn decode(&mut self, imm_data: u32) -> Arrival {
        self.metrics.record_index_recovery();
        match &self.bounce {
            Some(_) => {
                let unpacked = ImmDataSample::from_packed(imm_data).unpack();
                let head_index = nearest_ring_index(unpacked.head_index as u64, self.last_head_index, self.ring_size.max(1));
                self.last_head_index = head_index;
                Arrival::Samples { head_index, count: unpacked.count }
            }
            None => {
                let unpacked = ImmDataGrain::from_packed(imm_data).unpack();
                let index = nearest_ring_index(unpacked.ring_buffer_index as u64, self.last_grain_index, self.ring_size.max(1));
                self.last_grain_index = index;
                Arrival::Grain { index, last_slice: unpacked.slice_index }
            }
        }
    }

    /// Non-blocking: advance the state machine once and return any newly
    /// arrived index. Returns [`FabricsError::NotReady`] if nothing is
    /// available yet, [`FabricsError::Interrupted`] if the peer shut down
    /// the connection.
    pub fn read(&mut self) -> Result<Arrival> {
        let signal = match &mut self.backend {
            Backend::ConnectionOriented(state) => {
                let owned = std::mem::replace(state, CoState::Done);
                let (next, signal) = advance_co(owned, self.domain.cq_data_via_recv_mode());
                *state = next;
                signal
            }
            Backend::Connectionless { ep } => {
                if let Some(entry) = ep.completion_queue().poll() {
                    if self.domain.cq_data_via_recv_mode() {
                        ep.recv(&RECV_BUF).expect("recv buffer is always exactly 4 bytes");
                    }
                    entry.imm_data.map(PollSignal::Data).unwrap_or(PollSignal::Nothing)
                } else if matches!(ep.event_queue().poll(), Some(Event::Shutdown)) {
                    PollSignal::Shutdown
                } else {
                    PollSignal::Nothing
                }
            }
        };
        match signal {
            PollSignal::Data(d) => {
                let arrival = self.decode(d);
                self.metrics.record_completion(true);
                Ok(arrival)
            }
            PollSignal::Shutdown => Err(FabricsError::Interrupted),
            PollSignal::Nothing => Err(FabricsError::NotReady),
        }
    }

    /// Blocking: poll in a loop, bounded by `timeout`, with each inner wait
    /// capped at [`MAX_POLL_INTERVAL`] (spec.md §5). Returns
    /// [`FabricsError::Timeout`] if the deadline elapses with nothing
    /// arriving, [`FabricsError::Interrupted`] if a shutdown is observed.
    pub fn read_blocking(&mut self, timeout: Duration) -> Result<Arrival> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.read() {
                Err(FabricsError::NotReady) => {}
                other => return other,
            }
            if Instant::now() >= deadline {
                return Err(FabricsError::Timeout(timeout));
            }
            std::thread::sleep(MAX_POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
        }
    }

    /// Unpack the current arrival's payload out of the bounce buffer into
    /// the caller's ring, for audio layouts. A no-op (`Ok(())`) for video
    /// layouts, whose writes land directly in the registered region.
    pub fn unpack_samples(&self, entry_index: usize, head_index: u64, count: usize, out: &mut [u8]) -> Result<()> {
        match &self.bounce {
            Some(bb) => bb.unpack_continuous(entry_index, head_index, count, out),
            None => Err(FabricsError::invalid_state("target has no bounce buffer to unpack from")),
        }
    }

    /// Close the passive endpoint and any active endpoint, and interrupt
    /// any in-flight [`Target::read_blocking`] (spec.md §5 cancellation).
    pub fn shutdown(&mut self) {
        if let Backend::ConnectionOriented(state) = &mut self.backend {
            let owned = std::mem::replace(state, CoState::Done);
            *state = match owned {
                CoState::WaitForConnReq { .. } => CoState::Done,
                CoState::WaitForConnected { ep } | CoState::Connected { ep } => {
                    ep.close();
                    CoState::ShuttingDown { ep }
                }
                other => other,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::ProviderCapabilities;
    use crate::initiator::{Initiator, InitiatorConfig};

    fn empty_co_target() -> (Target, TargetInfo) {
        Target::setup(TargetConfig { provider: Provider::Tcp, ..Default::default() }).unwrap()
    }

    #[test]
    fn setup_fails_when_provider_cannot_serve_the_requested_mode() {
        let required = ProviderCapabilities { connection_oriented: true, connectionless: false };
        assert!(crate::fabric::Fabric::open(Provider::Efa, required).is_err());
    }

    #[test]
    fn connection_establishment_reaches_connected_within_a_few_polls() {
        let (mut target, info) = empty_co_target();
        let mut initiator = Initiator::setup(InitiatorConfig { provider: Provider::Tcp, ..Default::default() }).unwrap();
        initiator.add_target(info).unwrap();

        for _ in 0..10 {
            let _ = target.read();
            initiator.make_progress();
        }

        assert!(!initiator.make_progress());
    }

    #[test]
    fn read_is_not_ready_before_any_transfer() {
        let (mut target, _info) = empty_co_target();
        assert!(matches!(target.read(), Err(FabricsError::NotReady)));
    }

    #[test]
    fn virtual_address_mode_advertises_the_regions_real_base_address() {
        use crate::region::{DataLayout, Location, Region, RegionGroup, RegionSet};

        let region_set = RegionSet::new(vec![RegionGroup::new(vec![Region::new(0x4000, 64, Location::host())])], DataLayout::video(vec![64])).unwrap();
        let (_target, info) = Target::setup(TargetConfig {
            provider: Provider::Tcp,
            region_set: Some(region_set),
            virtual_address_mode: true,
            ..Default::default()
        })
        .unwrap();

        assert_eq!(info.regions()[0].addr, 0x4000);
    }

    #[test]
    fn relative_address_mode_advertises_a_zero_base_address() {
        use crate::region::{DataLayout, Location, Region, RegionGroup, RegionSet};

        let region_set = RegionSet::new(vec![RegionGroup::new(vec![Region::new(0x4000, 64, Location::host())])], DataLayout::video(vec![64])).unwrap();
        let (_target, info) = Target::setup(TargetConfig { provider: Provider::Tcp, region_set: Some(region_set), ..Default::default() }).unwrap();

        assert_eq!(info.regions()[0].addr, 0);
    }
}
