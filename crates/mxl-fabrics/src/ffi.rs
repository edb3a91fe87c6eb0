//! C-style library boundary (spec.md §6), modelled on
//! `original_source/lib/include/mxl/fabrics.h`'s `mxlFabrics*` surface:
//! opaque handles, a status-code return convention, and a
//! size-query-then-fill protocol for caller-supplied string buffers.
//!
//! Every function here either returns a plain value or a [`FabricsStatus`];
//! none of them let a Rust panic or a [`crate::error::FabricsError`] unwind
//! across the boundary (spec.md §7 "the wrappers never allow cross-language
//! unwinding"). Ownership crosses the boundary exactly once per handle:
//! every `*_create`/`*_setup`/`*_from_string` that hands back a boxed
//! pointer has a matching `*_destroy`/`*_free` that consumes it, and no
//! function here returns a pointer whose ownership is ambiguous (spec.md §9
//! open question (c): no leak-on-success idiom).

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use crate::error::FabricsError;
use crate::initiator::{Initiator, InitiatorConfig};
use crate::provider::Provider;
use crate::region::RegionSet;
use crate::slice::SliceRange;
use crate::target::{Arrival, Target, TargetConfig};
use crate::target_info::TargetInfo;

/// The status codes surfaced at the C boundary, one variant per
/// [`FabricsError`] taxonomy entry (spec.md §7) plus `Ok`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FabricsStatus {
    /// The operation succeeded.
    Ok = 0,
    /// Malformed input, an unknown provider, or a null handle.
    InvalidArg = 1,
    /// Operation attempted on an uninitialised or closed handle.
    InvalidState = 2,
    /// No provider satisfied the requested capabilities.
    NoFabric = 3,
    /// A non-blocking path found no progress to report.
    NotReady = 4,
    /// A blocking wait expired before any progress was made.
    Timeout = 5,
    /// A peer shutdown was observed while waiting.
    Interrupted = 6,
    /// The referenced target/peer is unknown.
    NotFound = 7,
    /// The thing being created already exists.
    Exists = 8,
    /// A caller-supplied buffer was too small to hold the result.
    BufferTooSmall = 9,
    /// An invariant the implementation relies on was violated.
    Internal = 10,
    /// Catch-all for conditions that don't map to any of the above,
    /// including an unexpected panic caught at the boundary.
    Unknown = 11,
}

impl From<&FabricsError> for FabricsStatus {
    fn from(err: &FabricsError) -> Self {
        match err {
            FabricsError::InvalidArg { .. } => FabricsStatus::InvalidArg,
            FabricsError::InvalidState { .. } => FabricsStatus::InvalidState,
            FabricsError::NoFabric { .. } => FabricsStatus::NoFabric,
            FabricsError::NotReady => FabricsStatus::NotReady,
            FabricsError::Timeout(_) => FabricsStatus::Timeout,
            FabricsError::Interrupted => FabricsStatus::Interrupted,
            FabricsError::NotFound { .. } => FabricsStatus::NotFound,
            FabricsError::Exists { .. } => FabricsStatus::Exists,
            FabricsError::BufferTooSmall { .. } => FabricsStatus::BufferTooSmall,
            FabricsError::Internal { .. } => FabricsStatus::Internal,
            FabricsError::Unknown { .. } | FabricsError::Io(_) => FabricsStatus::Unknown,
        }
    }
}

fn guard<F>(f: F) -> FabricsStatus
where
    F: FnOnce() -> Result<(), FabricsError>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => FabricsStatus::Ok,
        Ok(Err(e)) => {
            if !matches!(e, FabricsError::NotReady) {
                tracing::warn!(error = %e, "fabrics ffi call returned an error");
            }
            FabricsStatus::from(&e)
        }
        Err(_) => {
            tracing::error!("fabrics ffi call panicked; reporting Unknown rather than unwinding");
            FabricsStatus::Unknown
        }
    }
}

/// Opaque handle created from an MXL instance. [`mxl_fabrics_create_instance`]
/// runs [`crate::logging::init`] exactly once per process (spec.md §9) before
/// handing one back; targets and initiators created afterwards each carry
/// their own [`crate::metrics::FabricsMetrics`] collector (see
/// `Target::metrics`/`Initiator::metrics`), in the style of
/// `claudefs_transport`'s per-component metrics rather than one shared by
/// the whole process.
pub struct MxlFabricsInstance;

/// Opaque region-set handle, the FFI counterpart of [`RegionSet`].
pub struct MxlRegions(pub RegionSet);

/// Opaque target handle paired with the [`TargetInfo`] it published.
pub struct MxlFabricsTarget {
    target: Target,
}

/// Opaque initiator handle.
pub struct MxlFabricsInitiator {
    initiator: Initiator,
}

/// Opaque target-info handle.
pub struct MxlTargetInfo(pub TargetInfo);

/// Create a new fabrics instance, initialising the process-wide logging
/// bridge on first call. `out_instance` receives an owned pointer; release
/// it with [`mxl_fabrics_destroy_instance`].
///
/// # Safety
/// `out_instance` must be a valid, non-null pointer to write to.
#[no_mangle]
pub unsafe extern "C" fn mxl_fabrics_create_instance(out_instance: *mut *mut MxlFabricsInstance) -> FabricsStatus {
    guard(|| {
        if out_instance.is_null() {
            return Err(FabricsError::invalid_arg("out_instance must not be null"));
        }
        crate::logging::init();
        let instance = Box::new(MxlFabricsInstance);
        unsafe {
            *out_instance = Box::into_raw(instance);
        }
        Ok(())
    })
}

/// Destroy a fabrics instance created by [`mxl_fabrics_create_instance`].
///
/// # Safety
/// `instance` must be a pointer previously returned by
/// [`mxl_fabrics_create_instance`] and not already destroyed.
#[no_mangle]
pub unsafe extern "C" fn mxl_fabrics_destroy_instance(instance: *mut MxlFabricsInstance) -> FabricsStatus {
    guard(|| {
        if instance.is_null() {
            return Err(FabricsError::invalid_arg("instance must not be null"));
        }
        unsafe {
            drop(Box::from_raw(instance));
        }
        Ok(())
    })
}

/// Free a [`MxlRegions`] handle built by a `regions_from_*` call.
///
/// # Safety
/// `regions` must be a pointer previously returned by this module and not
/// already freed.
#[no_mangle]
pub unsafe extern "C" fn mxl_fabrics_regions_free(regions: *mut MxlRegions) -> FabricsStatus {
    guard(|| {
        if regions.is_null() {
            return Err(FabricsError::invalid_arg("regions must not be null"));
        }
        unsafe {
            drop(Box::from_raw(regions));
        }
        Ok(())
    })
}

/// Create a target handle. No I/O happens until [`mxl_fabrics_target_setup`].
///
/// # Safety
/// `instance` must be a live [`MxlFabricsInstance`]; `out_target` must be a
/// valid pointer to write to.
#[no_mangle]
pub unsafe extern "C" fn mxl_fabrics_create_target(
    instance: *const MxlFabricsInstance,
    out_target: *mut *mut MxlFabricsTarget,
) -> FabricsStatus {
    guard(|| {
        if instance.is_null() || out_target.is_null() {
            return Err(FabricsError::invalid_arg("instance and out_target must not be null"));
        }
        // `out_target` is populated lazily by `mxl_fabrics_target_setup`
        // since `Target` has no meaningful pre-setup state; reject a
        // premature use by leaving it null until setup succeeds.
        unsafe {
            *out_target = std::ptr::null_mut();
        }
        Ok(())
    })
}

/// Configure a target: open its fabric/domain, register `regions` (or a
/// bounce buffer for audio layouts), and bind a listener or endpoint.
/// `out_target` receives an owned handle and `out_info` an owned
/// [`MxlTargetInfo`] to publish to a remote initiator.
///
/// # Safety
/// `out_target` and `out_info` must be valid pointers to write to. `regions`
/// may be null (an empty region set is valid per spec.md §8 scenario 1/2).
#[no_mangle]
pub unsafe extern "C" fn mxl_fabrics_target_setup(
    provider: Provider,
    connection_oriented: bool,
    regions: *const MxlRegions,
    out_target: *mut *mut MxlFabricsTarget,
    out_info: *mut *mut MxlTargetInfo,
) -> FabricsStatus {
    guard(|| {
        if out_target.is_null() || out_info.is_null() {
            return Err(FabricsError::invalid_arg("out_target and out_info must not be null"));
        }
        let region_set = if regions.is_null() { None } else { Some(unsafe { &*regions }.0.clone()) };
        let (target, info) = Target::setup(TargetConfig { provider, connection_oriented, region_set, ..Default::default() })?;
        unsafe {
            *out_target = Box::into_raw(Box::new(MxlFabricsTarget { target }));
            *out_info = Box::into_raw(Box::new(MxlTargetInfo(info)));
        }
        Ok(())
    })
}

/// Destroy a target handle, closing its fabric resources.
///
/// # Safety
/// `target` must be a pointer previously returned by
/// [`mxl_fabrics_target_setup`] and not already destroyed.
#[no_mangle]
pub unsafe extern "C" fn mxl_fabrics_destroy_target(target: *mut MxlFabricsTarget) -> FabricsStatus {
    guard(|| {
        if target.is_null() {
            return Err(FabricsError::invalid_arg("target must not be null"));
        }
        let mut boxed = unsafe { Box::from_raw(target) };
        boxed.target.shutdown();
        Ok(())
    })
}

/// Non-blocking accessor for the next grain/sample-window index (spec.md
/// §6's `targetTryNewGrain`). Returns [`FabricsStatus::NotReady`] if
/// nothing has arrived yet.
///
/// # Safety
/// `target` and `out_index` must be valid, non-null pointers.
#[no_mangle]
pub unsafe extern "C" fn mxl_fabrics_target_try_new_grain(target: *mut MxlFabricsTarget, out_index: *mut u64) -> FabricsStatus {
    guard(|| {
        if target.is_null() || out_index.is_null() {
            return Err(FabricsError::invalid_arg("target and out_index must not be null"));
        }
        let target = unsafe { &mut *target };
        let arrival = target.target.read()?;
        unsafe {
            *out_index = index_of(arrival);
        }
        Ok(())
    })
}

/// Blocking accessor, bounded by `timeout_ms` (spec.md §6's
/// `targetWaitForNewGrain`).
///
/// # Safety
/// `target` and `out_index` must be valid, non-null pointers.
#[no_mangle]
pub unsafe extern "C" fn mxl_fabrics_target_wait_for_new_grain(
    target: *mut MxlFabricsTarget,
    timeout_ms: u32,
    out_index: *mut u64,
) -> FabricsStatus {
    guard(|| {
        if target.is_null() || out_index.is_null() {
            return Err(FabricsError::invalid_arg("target and out_index must not be null"));
        }
        let target = unsafe { &mut *target };
        let arrival = target.target.read_blocking(Duration::from_millis(timeout_ms as u64))?;
        unsafe {
            *out_index = index_of(arrival);
        }
        Ok(())
    })
}

fn index_of(arrival: Arrival) -> u64 {
    match arrival {
        Arrival::Grain { index, .. } => index,
        Arrival::Samples { head_index, .. } => head_index,
    }
}

/// Create an initiator handle. No I/O happens until
/// [`mxl_fabrics_initiator_setup`].
///
/// # Safety
/// `instance` must be a live [`MxlFabricsInstance`]; `out_initiator` must be
/// a valid pointer to write to.
#[no_mangle]
pub unsafe extern "C" fn mxl_fabrics_create_initiator(
    instance: *const MxlFabricsInstance,
    out_initiator: *mut *mut MxlFabricsInitiator,
) -> FabricsStatus {
    guard(|| {
        if instance.is_null() || out_initiator.is_null() {
            return Err(FabricsError::invalid_arg("instance and out_initiator must not be null"));
        }
        unsafe {
            *out_initiator = std::ptr::null_mut();
        }
        Ok(())
    })
}

/// Configure an initiator: open its fabric/domain and register `regions`
/// for local access.
///
/// # Safety
/// `out_initiator` must be a valid pointer to write to. `regions` may be
/// null.
#[no_mangle]
pub unsafe extern "C" fn mxl_fabrics_initiator_setup(
    provider: Provider,
    connection_oriented: bool,
    regions: *const MxlRegions,
    out_initiator: *mut *mut MxlFabricsInitiator,
) -> FabricsStatus {
    guard(|| {
        if out_initiator.is_null() {
            return Err(FabricsError::invalid_arg("out_initiator must not be null"));
        }
        let region_set = if regions.is_null() { None } else { Some(unsafe { &*regions }.0.clone()) };
        let initiator = Initiator::setup(InitiatorConfig { provider, connection_oriented, region_set, ..Default::default() })?;
        unsafe {
            *out_initiator = Box::into_raw(Box::new(MxlFabricsInitiator { initiator }));
        }
        Ok(())
    })
}

/// Destroy an initiator handle.
///
/// # Safety
/// `initiator` must be a pointer previously returned by
/// [`mxl_fabrics_initiator_setup`] and not already destroyed.
#[no_mangle]
pub unsafe extern "C" fn mxl_fabrics_destroy_initiator(initiator: *mut MxlFabricsInitiator) -> FabricsStatus {
    guard(|| {
        if initiator.is_null() {
            return Err(FabricsError::invalid_arg("initiator must not be null"));
        }
        unsafe {
            drop(Box::from_raw(initiator));
        }
        Ok(())
    })
}

/// Add a target to an initiator (idempotent on a duplicate identifier, per
/// spec.md §9 open question (a)).
///
/// # Safety
/// `initiator` and `target_info` must be valid, non-null pointers. This
/// function borrows `target_info`; it does not take ownership, matching
/// `mxlFabricsInitiatorAddTarget`'s by-value C signature without consuming
/// the caller's handle.
#[no_mangle]
pub unsafe extern "C" fn mxl_fabrics_initiator_add_target(
    initiator: *mut MxlFabricsInitiator,
    target_info: *const MxlTargetInfo,
) -> FabricsStatus {
    guard(|| {
        if initiator.is_null() || target_info.is_null() {
            return Err(FabricsError::invalid_arg("initiator and target_info must not be null"));
        }
        let initiator = unsafe { &mut *initiator };
        let info = unsafe { &*target_info }.0.clone();
        initiator.initiator.add_target(info)
    })
}

/// Request a graceful shutdown of a previously added target, identified by
/// its [`TargetInfo`] identifier.
///
/// # Safety
/// `initiator` and `target_info` must be valid, non-null pointers.
#[no_mangle]
pub unsafe extern "C" fn mxl_fabrics_initiator_remove_target(
    initiator: *mut MxlFabricsInitiator,
    target_info: *const MxlTargetInfo,
) -> FabricsStatus {
    guard(|| {
        if initiator.is_null() || target_info.is_null() {
            return Err(FabricsError::invalid_arg("initiator and target_info must not be null"));
        }
        let initiator = unsafe { &mut *initiator };
        let identifier = unsafe { &*target_info }.0.identifier();
        initiator.initiator.remove_target(identifier)
    })
}

/// Transfer a discrete (video) grain to every connected/activated peer
/// (spec.md §6's `initiatorTransferGrain`).
///
/// # Safety
/// `initiator` must be a valid, non-null pointer.
#[no_mangle]
pub unsafe extern "C" fn mxl_fabrics_initiator_transfer_grain(
    initiator: *mut MxlFabricsInitiator,
    grain_index: u64,
    payload_offset: u32,
    start_slice: u16,
    end_slice: u16,
) -> FabricsStatus {
    guard(|| {
        if initiator.is_null() {
            return Err(FabricsError::invalid_arg("initiator must not be null"));
        }
        let initiator = unsafe { &mut *initiator };
        let range = SliceRange::make(start_slice, end_slice)?;
        initiator.initiator.transfer_grain(grain_index, payload_offset, range)
    })
}

/// Drain queues once without blocking. Returns [`FabricsStatus::NotReady`]
/// if work remains pending, matching the `NotReady` "signalling value, not
/// an error" convention (spec.md §6's `initiatorMakeProgressNonBlocking`).
///
/// # Safety
/// `initiator` must be a valid, non-null pointer.
#[no_mangle]
pub unsafe extern "C" fn mxl_fabrics_initiator_make_progress_non_blocking(initiator: *mut MxlFabricsInitiator) -> FabricsStatus {
    guard(|| {
        if initiator.is_null() {
            return Err(FabricsError::invalid_arg("initiator must not be null"));
        }
        let initiator = unsafe { &mut *initiator };
        if initiator.initiator.make_progress() {
            Err(FabricsError::NotReady)
        } else {
            Ok(())
        }
    })
}

/// Drain queues in a loop bounded by `timeout_ms`.
///
/// # Safety
/// `initiator` must be a valid, non-null pointer.
#[no_mangle]
pub unsafe extern "C" fn mxl_fabrics_initiator_make_progress_blocking(initiator: *mut MxlFabricsInitiator, timeout_ms: u32) -> FabricsStatus {
    guard(|| {
        if initiator.is_null() {
            return Err(FabricsError::invalid_arg("initiator must not be null"));
        }
        let initiator = unsafe { &mut *initiator };
        if initiator.initiator.make_progress_blocking(Duration::from_millis(timeout_ms as u64)) {
            Err(FabricsError::NotReady)
        } else {
            Ok(())
        }
    })
}

/// Query the required buffer size for [`mxl_fabrics_target_info_to_string`]
/// when `out_string` is null, or fill `out_string` when it isn't,
/// mirroring the original header's "pass NULL to obtain the size" protocol.
///
/// # Safety
/// `target_info` and `in_out_string_size` must be valid, non-null pointers.
/// `out_string` must either be null or point to a buffer of at least
/// `*in_out_string_size` bytes.
#[no_mangle]
pub unsafe extern "C" fn mxl_fabrics_target_info_to_string(
    target_info: *const MxlTargetInfo,
    out_string: *mut c_char,
    in_out_string_size: *mut usize,
) -> FabricsStatus {
    guard(|| {
        if target_info.is_null() || in_out_string_size.is_null() {
            return Err(FabricsError::invalid_arg("target_info and in_out_string_size must not be null"));
        }
        let json = unsafe { &*target_info }.0.to_json()?;
        let c_string = CString::new(json).map_err(|e| FabricsError::internal(format!("target info contained an interior NUL: {e}")))?;
        let needed = c_string.as_bytes_with_nul().len();

        if out_string.is_null() {
            unsafe {
                *in_out_string_size = needed;
            }
            return Ok(());
        }

        let available = unsafe { *in_out_string_size };
        if available < needed {
            return Err(FabricsError::BufferTooSmall { needed, available });
        }
        unsafe {
            std::ptr::copy_nonoverlapping(c_string.as_ptr(), out_string, needed);
            *in_out_string_size = needed;
        }
        Ok(())
    })
}

/// Parse the JSON text format into an owned [`MxlTargetInfo`] handle.
///
/// # Safety
/// `in_string` must be a valid, null-terminated C string. `out_target_info`
/// must be a valid pointer to write to.
#[no_mangle]
pub unsafe extern "C" fn mxl_fabrics_target_info_from_string(
    in_string: *const c_char,
    out_target_info: *mut *mut MxlTargetInfo,
) -> FabricsStatus {
    guard(|| {
        if in_string.is_null() || out_target_info.is_null() {
            return Err(FabricsError::invalid_arg("in_string and out_target_info must not be null"));
        }
        let text = unsafe { CStr::from_ptr(in_string) }
            .to_str()
            .map_err(|e| FabricsError::invalid_arg(format!("target info string was not valid UTF-8: {e}")))?;
        let info = TargetInfo::from_json(text)?;
        unsafe {
            *out_target_info = Box::into_raw(Box::new(MxlTargetInfo(info)));
        }
        Ok(())
    })
}

/// Free a [`MxlTargetInfo`] handle obtained from
/// [`mxl_fabrics_target_setup`] or [`mxl_fabrics_target_info_from_string`].
///
/// # Safety
/// `info` must be a pointer previously returned by this module and not
/// already freed.
#[no_mangle]
pub unsafe extern "C" fn mxl_fabrics_free_target_info(info: *mut MxlTargetInfo) -> FabricsStatus {
    guard(|| {
        if info.is_null() {
            return Err(FabricsError::invalid_arg("info must not be null"));
        }
        unsafe {
            drop(Box::from_raw(info));
        }
        Ok(())
    })
}

/// Parse a provider name (spec.md §6's `providerFromString`).
///
/// # Safety
/// `in_string` and `out_provider` must be valid, non-null pointers.
#[no_mangle]
pub unsafe extern "C" fn mxl_fabrics_provider_from_string(in_string: *const c_char, out_provider: *mut Provider) -> FabricsStatus {
    guard(|| {
        if in_string.is_null() || out_provider.is_null() {
            return Err(FabricsError::invalid_arg("in_string and out_provider must not be null"));
        }
        let text = unsafe { CStr::from_ptr(in_string) }
            .to_str()
            .map_err(|e| FabricsError::invalid_arg(format!("provider string was not valid UTF-8: {e}")))?;
        let provider = Provider::from_str_ci(text)?;
        unsafe {
            *out_provider = provider;
        }
        Ok(())
    })
}

/// Render a provider as a string, following the same size-query-then-fill
/// protocol as [`mxl_fabrics_target_info_to_string`].
///
/// # Safety
/// `in_out_string_size` must be a valid, non-null pointer. `out_string`
/// must either be null or point to a buffer of at least
/// `*in_out_string_size` bytes.
#[no_mangle]
pub unsafe extern "C" fn mxl_fabrics_provider_to_string(
    provider: Provider,
    out_string: *mut c_char,
    in_out_string_size: *mut usize,
) -> FabricsStatus {
    guard(|| {
        if in_out_string_size.is_null() {
            return Err(FabricsError::invalid_arg("in_out_string_size must not be null"));
        }
        let c_string = CString::new(provider.as_str()).expect("provider names never contain a NUL byte");
        let needed = c_string.as_bytes_with_nul().len();

        if out_string.is_null() {
            unsafe {
                *in_out_string_size = needed;
            }
            return Ok(());
        }

        let available = unsafe { *in_out_string_size };
        if available < needed {
            return Err(FabricsError::BufferTooSmall { needed, available });
        }
        unsafe {
            std::ptr::copy_nonoverlapping(c_string.as_ptr(), out_string, needed);
            *in_out_string_size = needed;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    #[test]
    fn create_and_destroy_instance_round_trips() {
        let mut instance: *mut MxlFabricsInstance = ptr::null_mut();
        unsafe {
            assert_eq!(mxl_fabrics_create_instance(&mut instance), FabricsStatus::Ok);
            assert!(!instance.is_null());
            assert_eq!(mxl_fabrics_destroy_instance(instance), FabricsStatus::Ok);
        }
    }

    #[test]
    fn null_instance_pointer_is_invalid_arg() {
        unsafe {
            assert_eq!(mxl_fabrics_create_instance(ptr::null_mut()), FabricsStatus::InvalidArg);
        }
    }

    #[test]
    fn provider_to_string_then_from_string_round_trips() {
        let mut needed = 0usize;
        unsafe {
            assert_eq!(mxl_fabrics_provider_to_string(Provider::Shm, ptr::null_mut(), &mut needed), FabricsStatus::Ok);
        }
        let mut buf = vec![0 as c_char; needed];
        let mut size = needed;
        unsafe {
            assert_eq!(mxl_fabrics_provider_to_string(Provider::Shm, buf.as_mut_ptr(), &mut size), FabricsStatus::Ok);
            let mut parsed = Provider::Auto;
            assert_eq!(mxl_fabrics_provider_from_string(buf.as_ptr(), &mut parsed), FabricsStatus::Ok);
            assert_eq!(parsed, Provider::Shm);
        }
    }

    #[test]
    fn provider_to_string_reports_buffer_too_small() {
        let mut size = 1usize;
        let mut buf = vec![0 as c_char; 1];
        unsafe {
            assert_eq!(mxl_fabrics_provider_to_string(Provider::Verbs, buf.as_mut_ptr(), &mut size), FabricsStatus::BufferTooSmall);
        }
    }

    #[test]
    fn target_setup_and_info_round_trip_through_ffi() {
        let mut target: *mut MxlFabricsTarget = ptr::null_mut();
        let mut info: *mut MxlTargetInfo = ptr::null_mut();
        unsafe {
            let status = mxl_fabrics_target_setup(Provider::Tcp, true, ptr::null(), &mut target, &mut info);
            assert_eq!(status, FabricsStatus::Ok);
            assert!(!target.is_null());
            assert!(!info.is_null());

            let mut needed = 0usize;
            assert_eq!(mxl_fabrics_target_info_to_string(info, ptr::null_mut(), &mut needed), FabricsStatus::Ok);
            let mut buf = vec![0 as c_char; needed];
            let mut size = needed;
            assert_eq!(mxl_fabrics_target_info_to_string(info, buf.as_mut_ptr(), &mut size), FabricsStatus::Ok);

            let mut reparsed: *mut MxlTargetInfo = ptr::null_mut();
            assert_eq!(mxl_fabrics_target_info_from_string(buf.as_ptr(), &mut reparsed), FabricsStatus::Ok);
            assert_eq!((*reparsed).0, (*info).0);

            assert_eq!(mxl_fabrics_free_target_info(reparsed), FabricsStatus::Ok);
            assert_eq!(mxl_fabrics_free_target_info(info), FabricsStatus::Ok);
            assert_eq!(mxl_fabrics_destroy_target(target), FabricsStatus::Ok);
        }
    }

    #[test]
    fn target_try_new_grain_is_not_ready_before_any_transfer() {
        let mut target: *mut MxlFabricsTarget = ptr::null_mut();
        let mut info: *mut MxlTargetInfo = ptr::null_mut();
        unsafe {
            assert_eq!(mxl_fabrics_target_setup(Provider::Shm, false, ptr::null(), &mut target, &mut info), FabricsStatus::Ok);
            let mut out_index = 0u64;
            assert_eq!(mxl_fabrics_target_try_new_grain(target, &mut out_index), FabricsStatus::NotReady);
            mxl_fabrics_free_target_info(info);
            mxl_fabrics_destroy_target(target);
        }
    }
}
