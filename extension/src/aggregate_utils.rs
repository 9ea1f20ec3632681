use std::ptr::null_mut;

use pgrx::pg_sys;

/// Runs one observation through [`agg_core::StatsState::observe`],
/// logging a `debug1` line before turning a type-mismatch ("monomorphism
/// violation" -- a variable observed once as one `stat` kind and again
/// as another) into a hard `ereport` error. Every other error kind from
/// `observe` goes straight to `error!` uncommented; a mismatched kind is
/// the one judgment call worth a breadcrumb, since it's usually a caller
/// bug in the document producer rather than a malformed single document.
pub fn observe_logged(
    state: &mut agg_core::StatsState,
    name: &str,
    stat: &agg_core::Stat,
) {
    if let Err(e) = state.observe(name, stat) {
        if matches!(e, agg_core::StatsError::TypeMismatch { .. }) {
            pgrx::debug1!("rejecting observation for {:?}: {}", name, e);
        }
        pgrx::error!("{}", e);
    }
}

pub unsafe fn get_collation(fcinfo: pg_sys::FunctionCallInfo) -> Option<pg_sys::Oid> {
    if (*fcinfo).fncollation == pg_sys::Oid::INVALID {
        None
    } else {
        Some((*fcinfo).fncollation)
    }
}

pub unsafe fn in_aggregate_context<T, F: FnOnce() -> T>(
    fcinfo: pg_sys::FunctionCallInfo,
    f: F,
) -> T {
    let mctx =
        aggregate_mctx(fcinfo).unwrap_or_else(|| pgrx::error!("cannot call as non-aggregate"));
    crate::palloc::in_memory_context(mctx, f)
}

pub unsafe fn aggregate_mctx(fcinfo: pg_sys::FunctionCallInfo) -> Option<pg_sys::MemoryContext> {
    if fcinfo.is_null() {
        return Some(pg_sys::CurrentMemoryContext);
    }
    let mut mctx = null_mut();
    let is_aggregate = pg_sys::AggCheckCallContext(fcinfo, &mut mctx);
    if is_aggregate == 0 {
        None
    } else {
        debug_assert!(!mctx.is_null());
        Some(mctx)
    }
}
