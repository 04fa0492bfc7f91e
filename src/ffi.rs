use crate::error::TransportError;
use crate::Hierarchy::context::{Emit, ProducerUnitContext};
use crate::Lifecycle::config::TransportBuilder;
use crate::Lifecycle::manager::EventTransport;
use crate::Schema::registry::SchemaRegistry;
use std::ffi::{c_char, CStr};
use std::ptr;

// Error codes
pub const DMXP_EVT_SUCCESS: i64 = 0;
pub const DMXP_EVT_ERROR_NULL_POINTER: i64 = -1;
pub const DMXP_EVT_ERROR_INVALID_ARG: i64 = -2;
pub const DMXP_EVT_ERROR_MONITOR_GONE: i64 = -3;
pub const DMXP_EVT_ERROR_DECLINED: i64 = -4;
pub const DMXP_EVT_ERROR_FULL: i64 = -5;
pub const DMXP_EVT_ERROR_BUSY: i64 = -6;

/// Handle to a started transport (opaque pointer)
pub struct TransportHandle {
    inner: EventTransport,
    top: ProducerUnitContext,
}

fn error_code(e: &TransportError) -> i64 {
    match e {
        TransportError::MonitorGone => DMXP_EVT_ERROR_MONITOR_GONE,
        TransportError::KindDeclined { .. } => DMXP_EVT_ERROR_DECLINED,
        TransportError::RetryLimit(_) => DMXP_EVT_ERROR_FULL,
        TransportError::TransactionInProgress => DMXP_EVT_ERROR_BUSY,
        TransportError::RecordTooLarge { .. }
        | TransportError::SignatureMismatch { .. }
        | TransportError::UnknownEvent(_) => DMXP_EVT_ERROR_INVALID_ARG,
    }
}

unsafe fn c_str<'a>(p: *const c_char) -> Option<&'a str> {
    if p.is_null() {
        return None;
    }
    CStr::from_ptr(p).to_str().ok()
}

/// Define the schema, create the top segment and block until a monitor
/// attaches and negotiates.
///
/// # Arguments
/// * `key` - Segment name, or NULL for `DMXP_EVT_KEY` / the default.
/// * `capacity` - Data bytes of the top segment, 0 for the default.
/// * `names`, `signatures` - `n` NUL-terminated strings each.
///
/// # Returns
/// * Pointer to `TransportHandle`, or NULL on failure.
#[no_mangle]
pub extern "C" fn dmxp_evt_startup(
    key: *const c_char,
    capacity: usize,
    names: *const *const c_char,
    signatures: *const *const c_char,
    n: usize,
) -> *mut TransportHandle {
    if n > 0 && (names.is_null() || signatures.is_null()) {
        return ptr::null_mut();
    }

    let mut decls = Vec::with_capacity(n);
    for i in 0..n {
        let (name, sig) = unsafe { (c_str(*names.add(i)), c_str(*signatures.add(i))) };
        match (name, sig) {
            (Some(name), Some(sig)) => decls.push((name, sig)),
            _ => {
                tracing::error!(index = i, "FFI: event name or signature is not valid UTF-8");
                return ptr::null_mut();
            }
        }
    }

    let schema = match SchemaRegistry::define(decls) {
        Ok(schema) => schema,
        Err(e) => {
            tracing::error!(error = %e, "FFI: invalid schema");
            return ptr::null_mut();
        }
    };

    let mut builder = TransportBuilder::from_env();
    if let Some(key) = unsafe { c_str(key) } {
        builder = builder.with_key(key);
    }
    if capacity > 0 {
        builder = builder.with_capacity(capacity);
    }

    match EventTransport::startup(&schema, builder.build()) {
        Ok(transport) => {
            let top = transport.top_context();
            Box::into_raw(Box::new(TransportHandle {
                inner: transport,
                top,
            }))
        }
        Err(e) => {
            tracing::error!(error = %e, "FFI: transport startup failed");
            ptr::null_mut()
        }
    }
}

/// Negotiated kind of event `index`; 0 when declined or out of range.
#[no_mangle]
pub extern "C" fn dmxp_evt_kind(handle: *const TransportHandle, index: usize) -> u64 {
    if handle.is_null() {
        return 0;
    }
    let transport = unsafe { &(*handle).inner };
    transport
        .events()
        .get(index)
        .map_or(0, |e| e.assigned_kind)
}

/// Emit one event into the top segment: start, push, finish in one call.
///
/// # Arguments
/// * `fixed` - `fixed_len` bytes of fixed payload in signature order.
/// * `var_ptrs`, `var_lens` - `nvar` variable fields in signature order.
///
/// # Returns
/// * The record id (> 0) on success, a negative error code otherwise.
///   A declined event returns `DMXP_EVT_ERROR_DECLINED` without writing.
#[no_mangle]
pub extern "C" fn dmxp_evt_emit(
    handle: *mut TransportHandle,
    index: usize,
    fixed: *const u8,
    fixed_len: usize,
    var_ptrs: *const *const u8,
    var_lens: *const usize,
    nvar: usize,
) -> i64 {
    if handle.is_null() || (fixed_len > 0 && fixed.is_null()) {
        return DMXP_EVT_ERROR_NULL_POINTER;
    }
    if nvar > 0 && (var_ptrs.is_null() || var_lens.is_null()) {
        return DMXP_EVT_ERROR_NULL_POINTER;
    }

    let ctx = unsafe { &(*handle).top };
    let result = ctx.emit(index, |txn| {
        if fixed_len > 0 {
            txn.push_fixed(unsafe { std::slice::from_raw_parts(fixed, fixed_len) });
        }
        for i in 0..nvar {
            let (p, len) = unsafe { (*var_ptrs.add(i), *var_lens.add(i)) };
            let data: &[u8] = if len == 0 || p.is_null() {
                &[]
            } else {
                unsafe { std::slice::from_raw_parts(p, len) }
            };
            txn.push_variable(data)?;
        }
        Ok(())
    });

    match result {
        Ok(Emit::Emitted(id)) => id as i64,
        Ok(Emit::Skipped) => DMXP_EVT_ERROR_DECLINED,
        Err(e) => error_code(&e),
    }
}

/// Tear the transport down. The handle stays valid for `dmxp_evt_free`.
#[no_mangle]
pub extern "C" fn dmxp_evt_teardown(handle: *mut TransportHandle) -> i64 {
    if handle.is_null() {
        return DMXP_EVT_ERROR_NULL_POINTER;
    }
    let report = unsafe { (*handle).inner.teardown() };
    report.events as i64
}

/// Free a transport handle (tearing it down if still live).
#[no_mangle]
pub extern "C" fn dmxp_evt_free(handle: *mut TransportHandle) {
    if !handle.is_null() {
        unsafe {
            let _ = Box::from_raw(handle);
        }
    }
}
