//! The runtime slot shared by every native entry point.
//!
//! Simulators call into the library on their own thread, one callback at a
//! time. The runtime lives in a thread-local slot; each trampoline borrows
//! it for the duration of one dispatch. A callback arriving while the slot
//! is borrowed means the simulator re-entered the library from inside a
//! procedural-interface call, which the runtime cannot survive, so the
//! process aborts.

use std::cell::RefCell;
use std::ffi::{c_char, CStr};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

use gpi_config::RuntimeConfig;
use gpi_core::{logging, Backend, CallbackId, Edge, ImageEnvironment, RunState, Runtime};
use tracing::{debug, error, info, warn};

thread_local! {
    static RUNTIME: RefCell<Option<Runtime>> = const { RefCell::new(None) };
}

/// Runs `f` on the installed runtime, `None` if there is none.
fn with_runtime<R>(f: impl FnOnce(&mut Runtime) -> R) -> Option<R> {
    RUNTIME.with(|slot| match slot.try_borrow_mut() {
        Ok(mut slot) => slot.as_mut().map(f),
        Err(_) => {
            error!("native callback re-entered the runtime");
            std::process::abort();
        }
    })
}

/// Runs a trampoline body, aborting instead of unwinding into the simulator.
pub(crate) fn guarded(what: &str, f: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!("panic in {what}");
        std::process::abort();
    }
}

/// Brings the runtime up from a simulator start routine.
///
/// The first interface to start owns the runtime; later ones only add
/// their backend, for mixed-language designs. A missing image leaves the
/// simulation running without a runtime; any other configuration problem,
/// or an image that cannot be loaded, aborts.
pub(crate) fn bootstrap(backend: Box<dyn Backend>) {
    if with_runtime(|_| ()).is_some() {
        let name = backend.name().to_string();
        with_runtime(|rt| rt.add_backend(backend));
        info!(backend = %name, "backend added to running runtime");
        return;
    }

    let config = match gpi_config::resolve_from_env() {
        Ok(config) => config,
        Err(e) => {
            logging::init(&RuntimeConfig::new(PathBuf::new()));
            if e.is_fatal() {
                error!("invalid runtime configuration: {e}");
                std::process::abort();
            }
            warn!("{e}; runtime not started");
            return;
        }
    };

    let mut rt = Runtime::with_backend(config, backend);
    match rt.initialize(Box::new(ImageEnvironment::new())) {
        Ok(()) => RUNTIME.with(|slot| {
            if let Ok(mut slot) = slot.try_borrow_mut() {
                *slot = Some(rt);
            }
        }),
        Err(e) if e.is_fatal() => {
            error!("runtime not started: {e}");
            std::process::abort();
        }
        Err(e) => error!("runtime not started: {e}"),
    }
}

/// Trampoline body shared by every interface.
///
/// A refused dispatch is fatal. Once end of simulation has finalized the
/// runtime it is dropped, releasing the test image.
pub(crate) fn dispatch(id: CallbackId) {
    match with_runtime(|rt| (rt.dispatch(id), rt.state())) {
        None => debug!(%id, "callback with no runtime installed"),
        Some((Err(e), _)) if e.is_fatal() => {
            error!(%id, "{e}");
            std::process::abort();
        }
        Some((Err(e), _)) => error!(%id, "{e}"),
        Some((Ok(()), RunState::Finished)) => {
            RUNTIME.with(|slot| {
                if let Ok(mut slot) = slot.try_borrow_mut() {
                    slot.take();
                }
            });
            info!("runtime released");
        }
        Some((Ok(()), _)) => {}
    }
}

/// Callback user data: the callback id shifted left two bits, the low bits
/// holding the edge filter of value-change registrations.
pub(crate) fn pack_user_data(id: CallbackId, edge: Edge) -> usize {
    let tag = match edge {
        Edge::Any => 0,
        Edge::Rising => 1,
        Edge::Falling => 2,
    };
    ((id.as_raw() as usize) << 2) | tag
}

/// Inverse of [`pack_user_data`].
pub(crate) fn unpack_user_data(data: usize) -> (CallbackId, Edge) {
    let edge = match data & 0b11 {
        1 => Edge::Rising,
        2 => Edge::Falling,
        _ => Edge::Any,
    };
    (CallbackId::from_raw((data >> 2) as u64), edge)
}

/// Copies a simulator-owned C string, `None` for null.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that stays valid
/// for the duration of the call.
pub(crate) unsafe fn owned_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
}
