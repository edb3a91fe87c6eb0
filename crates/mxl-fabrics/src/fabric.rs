//! A software simulation of the libfabric primitives the rest of this
//! crate is built on: [`Fabric`], [`Domain`], [`Endpoint`],
//! [`PassiveEndpoint`], [`EventQueue`], [`CompletionQueue`],
//! [`AddressVector`] and [`MemoryRegion`].
//!
//! There is no libfabric binding available to this crate (spec.md's fabric
//! entities describe the real `libfabric` object model, but no `fi_*` FFI
//! crate exists to bind against). Rather than stub these types out, this
//! module is a complete, runnable simulation in the spirit of
//! `rdma_sim.rs`: a shared in-process "wire" that [`Target`](crate::target)
//! and [`Initiator`](crate::initiator) post one-sided writes across, with
//! real completion and event queue semantics. It is sufficient to drive
//! every scenario in spec.md §8 end to end.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{FabricsError, Result};
use crate::provider::Provider;

static FABRIC_COUNTER: AtomicU64 = AtomicU64::new(1);
static ENDPOINT_COUNTER: AtomicU64 = AtomicU64::new(1);
static MR_COUNTER: AtomicU64 = AtomicU64::new(1);

fn random_u64() -> u64 {
    let mut buf = [0u8; 8];
    getrandom::getrandom(&mut buf).expect("system randomness source unavailable");
    u64::from_le_bytes(buf)
}

/// A cryptographically-random 64-bit endpoint identifier, stable across
/// restarts of the same logical peer and distinguishable from any previous
/// incarnation in a completion stream (spec.md §9: "random endpoint
/// identity").
pub fn random_endpoint_identifier() -> u64 {
    random_u64()
}

bitflags::bitflags! {
    /// Capability/access flags, mirroring `FI_RMA`/`FI_WRITE`/`FI_REMOTE_WRITE`
    /// and the registration access bits of `fi_mr_attr::access`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessFlags: u32 {
        const LOCAL_READ = 1 << 0;
        const LOCAL_WRITE = 1 << 1;
        const REMOTE_READ = 1 << 2;
        const REMOTE_WRITE = 1 << 3;
        const RMA = 1 << 4;
    }
}

/// What a provider can do; used by [`Fabric::discover`] to filter candidates
/// against the capabilities a backend requires (spec.md §11.2: EFA, Verbs,
/// SHM, TCP, in preference order, each with a fixed capability set).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderCapabilities {
    /// Whether the provider supports connection-oriented (MSG) endpoints.
    pub connection_oriented: bool,
    /// Whether the provider supports connectionless (RDM) endpoints.
    pub connectionless: bool,
}

fn capabilities_of(provider: Provider) -> ProviderCapabilities {
    match provider {
        Provider::Tcp => ProviderCapabilities { connection_oriented: true, connectionless: false },
        Provider::Verbs => ProviderCapabilities { connection_oriented: true, connectionless: true },
        Provider::Efa => ProviderCapabilities { connection_oriented: false, connectionless: true },
        Provider::Shm => ProviderCapabilities { connection_oriented: false, connectionless: true },
        Provider::Auto => ProviderCapabilities { connection_oriented: true, connectionless: true },
    }
}

/// A registered memory region: the simulated counterpart of an `fid_mr`.
/// Owns its own backing bytes, since the simulation has no access to real
/// user-process memory behind a `Region`'s base address.
pub struct MemoryRegion {
    id: u64,
    rkey: u64,
    access: AccessFlags,
    buffer: Mutex<Vec<u8>>,
    /// Where a remote write against this region delivers its completion.
    /// `None` for regions that are never the target of a remote write (an
    /// initiator's own local send buffers).
    owner: Option<std::sync::Arc<CompletionSink>>,
}

impl MemoryRegion {
    /// Opaque local memory descriptor, analogous to `fi_mr_desc`.
    pub fn local_desc(&self) -> u64 {
        self.id
    }

    /// Remote key granting access to this region, analogous to `fi_mr_key`.
    pub fn rkey(&self) -> u64 {
        self.rkey
    }

    /// Length of the backing buffer in bytes.
    pub fn len(&self) -> usize {
        self.buffer.lock().expect("memory region lock poisoned").len()
    }

    /// True if the backing buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `data` into the region at `offset`. Fails with
    /// [`FabricsError::InvalidArg`] if the write would run past the end of
    /// the region, or [`FabricsError::InvalidState`] if the region wasn't
    /// registered for local writes.
    pub fn write_at(&self, offset: usize, data: &[u8]) -> Result<()> {
        if !self.access.contains(AccessFlags::LOCAL_WRITE) {
            return Err(FabricsError::invalid_state("memory region is not registered for local writes"));
        }
        let mut buf = self.buffer.lock().expect("memory region lock poisoned");
        let end = offset.checked_add(data.len()).ok_or_else(|| FabricsError::invalid_arg("write offset overflow"))?;
        if end > buf.len() {
            return Err(FabricsError::invalid_arg("write past the end of the memory region"));
        }
        buf[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Copy `len` bytes out of the region starting at `offset`.
    pub fn read_at(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        if !self.access.contains(AccessFlags::LOCAL_READ) {
            return Err(FabricsError::invalid_state("memory region is not registered for local reads"));
        }
        let buf = self.buffer.lock().expect("memory region lock poisoned");
        let end = offset.checked_add(len).ok_or_else(|| FabricsError::invalid_arg("read offset overflow"))?;
        if end > buf.len() {
            return Err(FabricsError::invalid_arg("read past the end of the memory region"));
        }
        Ok(buf[offset..end].to_vec())
    }

    fn remote_write(&self, offset: usize, data: &[u8]) -> Result<()> {
        if !self.access.contains(AccessFlags::REMOTE_WRITE) {
            return Err(FabricsError::invalid_state("memory region is not registered for remote writes"));
        }
        let mut buf = self.buffer.lock().expect("memory region lock poisoned");
        let end = offset.checked_add(data.len()).ok_or_else(|| FabricsError::invalid_arg("remote write offset overflow"))?;
        if end > buf.len() {
            return Err(FabricsError::invalid_arg("remote write past the end of the memory region"));
        }
        buf[offset..end].copy_from_slice(data);
        Ok(())
    }
}

/// Where a registered region's remote-write completions land: the
/// completion queue of the [`Endpoint`]/[`PassiveEndpoint`] that registered
/// it, plus the cq-data-via-recv bookkeeping for that same endpoint. Shared
/// between every [`MemoryRegion`] an endpoint registers and the endpoint
/// itself, so a write against any of those regions can reach the right
/// queue without the bus having to route by address.
pub struct CompletionSink {
    cq: std::sync::Arc<CompletionQueue>,
    cq_data_via_recv: bool,
    recv_credits: Mutex<usize>,
}

impl CompletionSink {
    fn new(cq: std::sync::Arc<CompletionQueue>, cq_data_via_recv: bool) -> Self {
        Self { cq, cq_data_via_recv, recv_credits: Mutex::new(0) }
    }

    /// Deliver a completion. In cq-data mode it lands immediately; in
    /// cq-data-via-recv mode it only lands if a receive buffer has already
    /// been posted via [`Endpoint::recv`] (one posted buffer is consumed
    /// per delivery). A write that arrives with no buffer posted is
    /// dropped, mirroring a real fabric's receiver-not-ready behaviour.
    fn deliver(&self, entry: CqEntry) {
        if !self.cq_data_via_recv {
            self.cq.push(entry);
            return;
        }
        let mut credits = self.recv_credits.lock().expect("recv credit lock poisoned");
        if *credits > 0 {
            *credits -= 1;
            drop(credits);
            self.cq.push(entry);
        }
    }

    fn post_recv(&self) {
        *self.recv_credits.lock().expect("recv credit lock poisoned") += 1;
    }
}

/// A completion queue entry: what an endpoint observes after a posted
/// operation finishes.
#[derive(Debug, Clone)]
pub struct CqEntry {
    /// Application-assigned identifier echoed back from the post call.
    pub op_context: u64,
    /// Number of bytes the operation moved.
    pub len: usize,
    /// Immediate data carried by the operation, when any (RMA writes with
    /// `FI_REMOTE_CQ_DATA` only).
    pub imm_data: Option<u32>,
}

/// A completion queue. Both send and receive side of an [`Endpoint`] report
/// into one of these.
pub struct CompletionQueue {
    id: u64,
    entries: Mutex<VecDeque<CqEntry>>,
}

impl CompletionQueue {
    fn new() -> Self {
        Self { id: FABRIC_COUNTER.fetch_add(1, Ordering::Relaxed), entries: Mutex::new(VecDeque::new()) }
    }

    /// Identifier for diagnostics/logging.
    pub fn id(&self) -> u64 {
        self.id
    }

    fn push(&self, entry: CqEntry) {
        self.entries.lock().expect("cq lock poisoned").push_back(entry);
    }

    /// Non-blocking: pop the oldest completion, if any.
    pub fn poll(&self) -> Option<CqEntry> {
        self.entries.lock().expect("cq lock poisoned").pop_front()
    }

    /// True if there is nothing to poll right now.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().expect("cq lock poisoned").is_empty()
    }
}

/// An event observed on an [`EventQueue`]: connection lifecycle signalling
/// for the connection-oriented backend.
#[derive(Debug, Clone)]
pub enum Event {
    /// A passive endpoint received an inbound connection request. Carries
    /// the peer's opaque address bytes so the application can decide
    /// whether to accept.
    ConnReq {
        /// Bus-internal address of the connecting peer.
        peer_address: u64,
    },
    /// A connection completed (accept finished on the passive side, or
    /// connect finished on the active side).
    Connected,
    /// The peer closed its end of the connection.
    Shutdown,
}

/// An event queue: connection lifecycle notifications for the
/// connection-oriented backend. Polling follows the same `EQPollInterval`
/// discipline as completion queues (spec.md §7: ≤100ms per poll).
pub struct EventQueue {
    events: Mutex<VecDeque<Event>>,
    /// The connected peer's event queue, bound once a connection completes
    /// (see [`PassiveEndpoint::try_accept`]), so a [`Endpoint::close`] on
    /// either side can reach the other.
    peer: Mutex<Option<std::sync::Arc<EventQueue>>>,
}

impl EventQueue {
    fn new() -> Self {
        Self { events: Mutex::new(VecDeque::new()), peer: Mutex::new(None) }
    }

    fn push(&self, event: Event) {
        self.events.lock().expect("eq lock poisoned").push_back(event);
    }

    /// Non-blocking: pop the oldest event, if any.
    pub fn poll(&self) -> Option<Event> {
        self.events.lock().expect("eq lock poisoned").pop_front()
    }

    fn bind_peer(&self, peer: std::sync::Arc<EventQueue>) {
        *self.peer.lock().expect("eq peer lock poisoned") = Some(peer);
    }

    fn notify_peer_shutdown(&self) {
        if let Some(peer) = self.peer.lock().expect("eq peer lock poisoned").as_ref() {
            peer.push(Event::Shutdown);
        }
    }
}

/// Maximum single-poll wait, matching spec.md §7's `EQPollInterval` bound.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_millis(100);

struct PendingConnection {
    initiator_address: u64,
    initiator_inbox: std::sync::Arc<EventQueue>,
}

struct BusState {
    memory_regions: HashMap<u64, std::sync::Arc<MemoryRegion>>,
    endpoints: HashMap<u64, std::sync::Arc<EventQueue>>,
    listeners: HashMap<u64, VecDeque<PendingConnection>>,
}

/// The shared "wire" every [`Fabric`] in the process opens onto (see
/// [`global_bus`]), standing in for the real network a host's libfabric
/// providers would reach each other over.
struct FabricBus {
    state: Mutex<BusState>,
}

impl FabricBus {
    fn new() -> Self {
        Self { state: Mutex::new(BusState { memory_regions: HashMap::new(), endpoints: HashMap::new(), listeners: HashMap::new() }) }
    }
}

/// The process-wide simulated network every [`Fabric::open`]/
/// [`Fabric::discover`] call attaches to. Real libfabric processes on
/// different hosts each own an independent `fid_fabric` and still reach one
/// another over the network; this simulation's equivalent of "the network"
/// is one shared bus per process, so that a `Target` and an `Initiator` set
/// up independently (as they are in practice — different handles, often
/// different threads) can still see each other's listeners, endpoints and
/// registered memory, exactly as two independent libfabric processes would
/// see each other over a real fabric. Addresses and remote keys handed out
/// against this bus come from process-wide atomics/randomness, so sharing it
/// across independently-opened `Fabric`s never collides two unrelated
/// endpoints.
fn global_bus() -> std::sync::Arc<FabricBus> {
    static BUS: std::sync::OnceLock<std::sync::Arc<FabricBus>> = std::sync::OnceLock::new();
    BUS.get_or_init(|| std::sync::Arc::new(FabricBus::new())).clone()
}

/// An opened fabric instance: the root simulation object, analogous to
/// `fid_fabric`. Every `Fabric` in a process shares the same underlying bus
/// (see [`global_bus`]), so independently-opened `Fabric`s can still talk to
/// each other.
#[derive(Clone)]
pub struct Fabric {
    bus: std::sync::Arc<FabricBus>,
    provider: Provider,
}

impl Fabric {
    /// Open a fabric for `provider`. Fails with [`FabricsError::NoFabric`]
    /// if `provider` cannot serve `required`.
    pub fn open(provider: Provider, required: ProviderCapabilities) -> Result<Self> {
        let resolved = if required.connection_oriented { provider.resolve_connection_oriented() } else { provider.resolve_connectionless() };
        let caps = capabilities_of(resolved);
        let satisfies = (!required.connection_oriented || caps.connection_oriented) && (!required.connectionless || caps.connectionless);
        if !satisfies {
            return Err(FabricsError::no_fabric(format!("provider {resolved} does not support the requested capabilities")));
        }
        Ok(Self { bus: global_bus(), provider: resolved })
    }

    /// Discover the best provider in [`Provider::PREFERENCE_ORDER`]
    /// satisfying `required`, and open it. Fails with
    /// [`FabricsError::NoFabric`] if none qualify.
    pub fn discover(required: ProviderCapabilities) -> Result<Self> {
        Provider::PREFERENCE_ORDER
            .into_iter()
            .find(|p| {
                let caps = capabilities_of(*p);
                (!required.connection_oriented || caps.connection_oriented) && (!required.connectionless || caps.connectionless)
            })
            .ok_or_else(|| FabricsError::no_fabric("no provider in the preference order supports the requested capabilities"))
            .map(|p| Self { bus: global_bus(), provider: p })
    }

    /// The provider this fabric resolved to.
    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Open a domain (protection-domain equivalent) onto this fabric, fixing
    /// its two negotiated mode flags for the domain's lifetime (spec.md
    /// §4.1): `virtual_address_mode` controls whether remote regions are
    /// advertised with their real base address or `0`; `cq_data_via_recv_mode`
    /// controls whether immediate data needs a posted receive buffer to
    /// surface.
    pub fn open_domain(&self, virtual_address_mode: bool, cq_data_via_recv_mode: bool) -> Domain {
        Domain { bus: self.bus.clone(), virtual_address_mode, cq_data_via_recv_mode }
    }
}

/// A domain: the scope within which memory is registered and endpoints are
/// created, analogous to `fid_domain`.
#[derive(Clone)]
pub struct Domain {
    bus: std::sync::Arc<FabricBus>,
    virtual_address_mode: bool,
    cq_data_via_recv_mode: bool,
}

impl Domain {
    /// Whether remote regions registered against this domain advertise their
    /// real base address (`true`) or `0` (`false`), per spec.md §4.1.
    pub fn virtual_address_mode(&self) -> bool {
        self.virtual_address_mode
    }

    /// Whether endpoints opened on this domain require a posted receive
    /// buffer ([`Endpoint::recv`]) before immediate data surfaces.
    pub fn cq_data_via_recv_mode(&self) -> bool {
        self.cq_data_via_recv_mode
    }

    /// Register a region of `size` bytes for `access`. The simulation owns
    /// its own backing buffer; real user data is copied in via
    /// [`MemoryRegion::write_at`] and read back via
    /// [`MemoryRegion::read_at`]. `owner` is the completion sink a remote
    /// write against this region should deliver into, or `None` for a
    /// region that is never remotely written (e.g. an initiator's own local
    /// send buffer).
    pub fn register_region(
        &self,
        size: usize,
        access: AccessFlags,
        owner: Option<std::sync::Arc<CompletionSink>>,
    ) -> Result<std::sync::Arc<MemoryRegion>> {
        let mr = std::sync::Arc::new(MemoryRegion {
            id: MR_COUNTER.fetch_add(1, Ordering::Relaxed),
            rkey: random_u64(),
            access,
            buffer: Mutex::new(vec![0u8; size]),
            owner,
        });
        self.bus.state.lock().expect("bus lock poisoned").memory_regions.insert(mr.rkey, mr.clone());
        Ok(mr)
    }

    /// Open a connectionless (RDM) endpoint bound to this domain.
    pub fn open_endpoint(&self) -> Endpoint {
        let address = ENDPOINT_COUNTER.fetch_add(1, Ordering::Relaxed);
        let eq = std::sync::Arc::new(EventQueue::new());
        self.bus.state.lock().expect("bus lock poisoned").endpoints.insert(address, eq.clone());
        let sink = std::sync::Arc::new(CompletionSink::new(std::sync::Arc::new(CompletionQueue::new()), self.cq_data_via_recv_mode));
        Endpoint { bus: self.bus.clone(), address, eq, sink }
    }

    /// Open a passive endpoint listening for connection requests
    /// (connection-oriented backend only).
    pub fn open_passive_endpoint(&self) -> PassiveEndpoint {
        let address = ENDPOINT_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.bus.state.lock().expect("bus lock poisoned").listeners.insert(address, VecDeque::new());
        let sink = std::sync::Arc::new(CompletionSink::new(std::sync::Arc::new(CompletionQueue::new()), self.cq_data_via_recv_mode));
        PassiveEndpoint { bus: self.bus.clone(), address, sink }
    }
}

/// A listening endpoint for the connection-oriented backend, analogous to
/// `fid_pep`.
pub struct PassiveEndpoint {
    bus: std::sync::Arc<FabricBus>,
    address: u64,
    sink: std::sync::Arc<CompletionSink>,
}

impl PassiveEndpoint {
    /// This listener's bus address; advertise it in [`crate::target_info::TargetInfo`].
    pub fn address(&self) -> u64 {
        self.address
    }

    /// This listener's completion sink, shared with whichever [`Endpoint`]
    /// eventually comes out of [`PassiveEndpoint::try_accept`]. Regions
    /// registered before the connection is accepted bind to this so their
    /// remote-write completions still reach the right queue once accepted.
    pub(crate) fn sink(&self) -> std::sync::Arc<CompletionSink> {
        self.sink.clone()
    }

    /// Non-blocking: accept a queued connection request, if one exists,
    /// completing the connection and returning an active [`Endpoint`]. The
    /// returned endpoint shares this passive endpoint's completion sink, so
    /// a single passive endpoint only ever has one live accepted connection
    /// at a time.
    pub fn try_accept(&self) -> Option<Endpoint> {
        let pending = {
            let mut state = self.bus.state.lock().expect("bus lock poisoned");
            state.listeners.get_mut(&self.address)?.pop_front()
        }?;
        let address = ENDPOINT_COUNTER.fetch_add(1, Ordering::Relaxed);
        let eq = std::sync::Arc::new(EventQueue::new());
        eq.bind_peer(pending.initiator_inbox.clone());
        pending.initiator_inbox.bind_peer(eq.clone());
        self.bus.state.lock().expect("bus lock poisoned").endpoints.insert(address, eq.clone());
        eq.push(Event::Connected);
        pending.initiator_inbox.push(Event::Connected);
        Some(Endpoint { bus: self.bus.clone(), address, eq, sink: self.sink.clone() })
    }
}

/// An active endpoint: posts RMA writes and observes completions, analogous
/// to `fid_ep`.
pub struct Endpoint {
    bus: std::sync::Arc<FabricBus>,
    address: u64,
    eq: std::sync::Arc<EventQueue>,
    sink: std::sync::Arc<CompletionSink>,
}

impl Endpoint {
    /// This endpoint's bus address.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// The completion queue writes against regions this endpoint registered,
    /// and connection teardown, report into.
    pub fn completion_queue(&self) -> &CompletionQueue {
        &self.sink.cq
    }

    /// The event queue connection lifecycle events report into.
    pub fn event_queue(&self) -> &EventQueue {
        &self.eq
    }

    /// This endpoint's completion sink, to bind regions registered against
    /// it so remote writes deliver here.
    pub(crate) fn sink(&self) -> std::sync::Arc<CompletionSink> {
        self.sink.clone()
    }

    /// Connect to a [`PassiveEndpoint`] at `peer_address` (connection-
    /// oriented backend). Non-blocking: enqueues the request and returns
    /// immediately; completion is observed via the peer's accept and this
    /// endpoint's own event queue.
    pub fn connect(&self, peer_address: u64) -> Result<()> {
        let mut state = self.bus.state.lock().expect("bus lock poisoned");
        let queue = state
            .listeners
            .get_mut(&peer_address)
            .ok_or_else(|| FabricsError::not_found(format!("no passive endpoint listening at address {peer_address}")))?;
        queue.push_back(PendingConnection { initiator_address: self.address, initiator_inbox: self.eq.clone() });
        Ok(())
    }

    /// Post a one-sided RMA write of `data` into the remote region
    /// `(rkey, offset)`, carrying `imm_data`. The peer observes the bytes
    /// immediately (no artificial latency) and the completion is delivered
    /// into the **owning endpoint's** completion queue — the endpoint that
    /// registered `(rkey, offset)`'s region, not this one — since an RMA
    /// write is one-sided and it is the receiver who must observe it.
    pub fn write(&self, op_context: u64, data: &[u8], rkey: u64, offset: usize, imm_data: u32) -> Result<()> {
        let mr = {
            let state = self.bus.state.lock().expect("bus lock poisoned");
            state.memory_regions.get(&rkey).cloned().ok_or_else(|| FabricsError::not_found(format!("no memory region registered with rkey {rkey}")))?
        };
        mr.remote_write(offset, data)?;
        let sink = mr.owner.as_ref().ok_or_else(|| FabricsError::internal("remote-writable region has no completion sink bound to it"))?;
        sink.deliver(CqEntry { op_context, len: data.len(), imm_data: Some(imm_data) });
        Ok(())
    }

    /// Post a receive buffer sized to hold the 32-bit immediate-data word.
    /// Needed only in cq-data-via-recv mode (spec.md §4.2): a write's
    /// completion only surfaces on this endpoint's completion queue once a
    /// matching `recv` has been posted.
    pub fn recv(&self, local: &[u8]) -> Result<()> {
        if local.len() < 4 {
            return Err(FabricsError::invalid_arg("recv buffer must be at least 4 bytes to hold the immediate-data word"));
        }
        self.sink.post_recv();
        Ok(())
    }

    /// Close the endpoint, delivering a [`Event::Shutdown`] to its own
    /// event queue and, if connected, to its peer's, so `makeProgress`/
    /// `read` on either side observes the teardown.
    pub fn close(&self) {
        self.bus.state.lock().expect("bus lock poisoned").endpoints.remove(&self.address);
        self.eq.push(Event::Shutdown);
        self.eq.notify_peer_shutdown();
    }
}

/// Maps opaque peer addresses (as advertised in
/// [`crate::target_info::TargetInfo`]) to bus-internal endpoint addresses,
/// analogous to `fid_av`. The connectionless backend inserts a target's
/// address here before posting any write to it.
pub struct AddressVector {
    entries: Mutex<HashMap<Vec<u8>, u64>>,
}

impl Default for AddressVector {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressVector {
    /// Create an empty address vector.
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    /// Insert a peer's opaque address bytes, returning the resolved handle.
    /// Fails with [`FabricsError::InvalidArg`] if the bytes don't decode to
    /// a little-endian `u64` (the only address encoding this simulation
    /// produces).
    pub fn insert(&self, address_bytes: &[u8]) -> Result<u64> {
        let bytes: [u8; 8] =
            address_bytes.try_into().map_err(|_| FabricsError::invalid_arg("address must be exactly 8 bytes in this simulation"))?;
        let handle = u64::from_le_bytes(bytes);
        self.entries.lock().expect("av lock poisoned").insert(address_bytes.to_vec(), handle);
        Ok(handle)
    }

    /// Remove a previously inserted address.
    pub fn remove(&self, address_bytes: &[u8]) {
        self.entries.lock().expect("av lock poisoned").remove(address_bytes);
    }

    /// Resolve previously inserted address bytes to their handle.
    pub fn resolve(&self, address_bytes: &[u8]) -> Option<u64> {
        self.entries.lock().expect("av lock poisoned").get(address_bytes).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn any_caps() -> ProviderCapabilities {
        ProviderCapabilities { connection_oriented: true, connectionless: true }
    }

    #[test]
    fn discover_picks_preference_order_head_when_all_qualify() {
        let fabric = Fabric::discover(ProviderCapabilities { connection_oriented: false, connectionless: true }).unwrap();
        assert_eq!(fabric.provider(), Provider::Efa);
    }

    #[test]
    fn discover_fails_when_no_provider_offers_both_modes() {
        let result = Fabric::open(Provider::Tcp, any_caps());
        assert!(matches!(result, Err(FabricsError::NoFabric { .. })));
    }

    #[test]
    fn register_region_round_trips_bytes() {
        let fabric = Fabric::open(Provider::Shm, ProviderCapabilities { connection_oriented: false, connectionless: true }).unwrap();
        let domain = fabric.open_domain(false, false);
        let mr = domain.register_region(64, AccessFlags::LOCAL_READ | AccessFlags::LOCAL_WRITE | AccessFlags::REMOTE_WRITE, None).unwrap();
        mr.write_at(0, &[1, 2, 3, 4]).unwrap();
        assert_eq!(mr.read_at(0, 4).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn endpoint_write_delivers_completion_to_the_target_endpoints_queue() {
        let fabric = Fabric::open(Provider::Shm, ProviderCapabilities { connection_oriented: false, connectionless: true }).unwrap();
        let target_domain = fabric.open_domain(false, false);
        let initiator_domain = fabric.open_domain(false, false);

        let target_ep = target_domain.open_endpoint();
        let target_mr = target_domain
            .register_region(16, AccessFlags::LOCAL_READ | AccessFlags::REMOTE_WRITE, Some(target_ep.sink()))
            .unwrap();
        let initiator_ep = initiator_domain.open_endpoint();

        initiator_ep.write(42, &[9, 9, 9], target_mr.rkey(), 0, 0xABCD).unwrap();

        assert_eq!(target_mr.read_at(0, 3).unwrap(), vec![9, 9, 9]);
        assert!(initiator_ep.completion_queue().is_empty());
        let completion = target_ep.completion_queue().poll().unwrap();
        assert_eq!(completion.op_context, 42);
        assert_eq!(completion.imm_data, Some(0xABCD));
    }

    #[test]
    fn cq_data_via_recv_mode_only_delivers_after_a_recv_is_posted() {
        let fabric = Fabric::open(Provider::Shm, ProviderCapabilities { connection_oriented: false, connectionless: true }).unwrap();
        let target_domain = fabric.open_domain(false, true);
        let initiator_domain = fabric.open_domain(false, true);

        let target_ep = target_domain.open_endpoint();
        let target_mr =
            target_domain.register_region(16, AccessFlags::LOCAL_READ | AccessFlags::REMOTE_WRITE, Some(target_ep.sink())).unwrap();
        let initiator_ep = initiator_domain.open_endpoint();

        initiator_ep.write(1, &[1, 2, 3], target_mr.rkey(), 0, 0xAAAA).unwrap();
        assert!(target_ep.completion_queue().is_empty(), "no recv posted yet, completion must not surface");

        target_ep.recv(&[0u8; 4]).unwrap();
        initiator_ep.write(2, &[4, 5, 6], target_mr.rkey(), 0, 0xBBBB).unwrap();
        let completion = target_ep.completion_queue().poll().unwrap();
        assert_eq!(completion.op_context, 2);
        assert_eq!(completion.imm_data, Some(0xBBBB));
    }

    #[test]
    fn recv_rejects_a_buffer_too_small_for_the_immediate_data_word() {
        let fabric = Fabric::open(Provider::Shm, ProviderCapabilities { connection_oriented: false, connectionless: true }).unwrap();
        let domain = fabric.open_domain(false, true);
        let ep = domain.open_endpoint();
        assert!(matches!(ep.recv(&[0u8; 2]), Err(FabricsError::InvalidArg { .. })));
    }

    #[test]
    fn write_to_unknown_rkey_is_not_found() {
        let fabric = Fabric::open(Provider::Shm, ProviderCapabilities { connection_oriented: false, connectionless: true }).unwrap();
        let domain = fabric.open_domain(false, false);
        let ep = domain.open_endpoint();
        assert!(matches!(ep.write(1, &[1], 0xDEAD, 0, 0), Err(FabricsError::NotFound { .. })));
    }

    #[test]
    fn connect_and_accept_deliver_connected_events_to_both_sides() {
        let fabric = Fabric::open(Provider::Tcp, ProviderCapabilities { connection_oriented: true, connectionless: false }).unwrap();
        let target_domain = fabric.open_domain(false, false);
        let initiator_domain = fabric.open_domain(false, false);

        let pep = target_domain.open_passive_endpoint();
        let initiator_ep = initiator_domain.open_endpoint();
        initiator_ep.connect(pep.address()).unwrap();

        let target_ep = pep.try_accept().expect("connection request should be queued");
        assert!(matches!(target_ep.event_queue().poll(), Some(Event::Connected)));
        assert!(matches!(initiator_ep.event_queue().poll(), Some(Event::Connected)));
    }

    #[test]
    fn close_delivers_shutdown_event() {
        let fabric = Fabric::open(Provider::Shm, ProviderCapabilities { connection_oriented: false, connectionless: true }).unwrap();
        let domain = fabric.open_domain(false, false);
        let ep = domain.open_endpoint();
        ep.close();
        assert!(matches!(ep.event_queue().poll(), Some(Event::Shutdown)));
    }

    #[test]
    fn close_on_a_connected_endpoint_notifies_its_peer() {
        let fabric = Fabric::open(Provider::Tcp, ProviderCapabilities { connection_oriented: true, connectionless: false }).unwrap();
        let target_domain = fabric.open_domain(false, false);
        let initiator_domain = fabric.open_domain(false, false);

        let pep = target_domain.open_passive_endpoint();
        let initiator_ep = initiator_domain.open_endpoint();
        initiator_ep.connect(pep.address()).unwrap();
        let target_ep = pep.try_accept().expect("connection request should be queued");
        target_ep.event_queue().poll();
        initiator_ep.event_queue().poll();

        initiator_ep.close();
        assert!(matches!(initiator_ep.event_queue().poll(), Some(Event::Shutdown)));
        assert!(matches!(target_ep.event_queue().poll(), Some(Event::Shutdown)));
    }

    #[test]
    fn address_vector_round_trips_little_endian_bytes() {
        let av = AddressVector::new();
        let bytes = 0x1122_3344_5566_7788u64.to_le_bytes();
        let handle = av.insert(&bytes).unwrap();
        assert_eq!(handle, 0x1122_3344_5566_7788);
        assert_eq!(av.resolve(&bytes), Some(handle));
        av.remove(&bytes);
        assert_eq!(av.resolve(&bytes), None);
    }
}
