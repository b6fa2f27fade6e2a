//! C ABI over backend-dispatch.
//!
//! Strings returned to the caller are owned by it and must be released with
//! `backend_dispatch_free_string`. Model info structs are released with
//! `backend_dispatch_model_info_free`.

use backend_dispatch::{
    config::Config, Backend, ContainerRegistry, DecodeError, DecodeOptions, RuntimeProvisioner,
};
use libc::{c_char, c_int};
use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::path::PathBuf;
use std::ptr;
use std::sync::OnceLock;
use tracing::warn;

pub const BACKEND_DISPATCH_OK: c_int = 0;
pub const BACKEND_DISPATCH_UNRECOGNIZED: c_int = 1;
pub const BACKEND_DISPATCH_MALFORMED: c_int = 2;
pub const BACKEND_DISPATCH_IO: c_int = 3;
pub const BACKEND_DISPATCH_INVALID_ARGUMENT: c_int = -1;

#[repr(C)]
pub struct BackendDispatchModelInfo {
    pub container: *mut c_char,
    pub backend: *mut c_char,
    pub model_family: *mut c_char,
    pub model_type: *mut c_char,
    pub file_type: *mut c_char,
    pub num_ctx: u32,
    pub num_embed: u32,
    pub num_head: u32,
    pub num_head_kv: u32,
    pub num_gqa: u32,
    pub num_layers: u32,
}

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = RefCell::new(None);
}

static REGISTRY: OnceLock<ContainerRegistry> = OnceLock::new();
static PROVISIONER: OnceLock<RuntimeProvisioner> = OnceLock::new();

fn set_last_error(message: impl Into<String>) {
    let message = CString::new(message.into().replace('\0', " ")).ok();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = message);
}

fn owned_c_string(value: &str) -> *mut c_char {
    CString::new(value.replace('\0', " "))
        .map(CString::into_raw)
        .unwrap_or(ptr::null_mut())
}

/// # Safety
/// `ptr` must be null or a valid NUL-terminated string.
unsafe fn borrowed_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

fn default_provisioner() -> &'static RuntimeProvisioner {
    PROVISIONER.get_or_init(|| {
        let config = Config::from_env().unwrap_or_else(|e| {
            warn!("Invalid backend-dispatch configuration, using defaults: {:#}", e);
            Config::default()
        });
        RuntimeProvisioner::detect(config.provision_options())
    })
}

/// Message for the last failed call on this thread, or null. The pointer
/// stays valid until the next failing call on the same thread.
#[no_mangle]
pub extern "C" fn backend_dispatch_last_error() -> *const c_char {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map(|s| s.as_ptr())
            .unwrap_or(ptr::null())
    })
}

/// Decodes the model file at `path` into `out`.
///
/// # Safety
/// `path` must be a valid NUL-terminated string and `out` must point to
/// writable memory for one `BackendDispatchModelInfo`.
#[no_mangle]
pub unsafe extern "C" fn backend_dispatch_decode_file(
    path: *const c_char,
    out: *mut BackendDispatchModelInfo,
) -> c_int {
    if out.is_null() {
        set_last_error("output pointer is null");
        return BACKEND_DISPATCH_INVALID_ARGUMENT;
    }
    let Some(path) = borrowed_str(path) else {
        set_last_error("path is null or not valid UTF-8");
        return BACKEND_DISPATCH_INVALID_ARGUMENT;
    };

    let registry = REGISTRY.get_or_init(ContainerRegistry::new);
    match registry.decode_path(&PathBuf::from(path), &DecodeOptions::default()) {
        Ok(model) => {
            let info = model.info();
            out.write(BackendDispatchModelInfo {
                container: owned_c_string(&info.container),
                backend: owned_c_string(info.backend.as_str()),
                model_family: owned_c_string(&info.model_family),
                model_type: owned_c_string(&info.model_type),
                file_type: owned_c_string(&info.file_type),
                num_ctx: info.num_ctx,
                num_embed: info.num_embed,
                num_head: info.num_head,
                num_head_kv: info.num_head_kv,
                num_gqa: info.num_gqa,
                num_layers: info.num_layers,
            });
            BACKEND_DISPATCH_OK
        }
        Err(e) => {
            set_last_error(e.to_string());
            match e {
                DecodeError::UnrecognizedFormat { .. } => BACKEND_DISPATCH_UNRECOGNIZED,
                DecodeError::MalformedArtifact { .. } => BACKEND_DISPATCH_MALFORMED,
                DecodeError::Io(_) => BACKEND_DISPATCH_IO,
            }
        }
    }
}

/// Releases the strings inside `info` and nulls them.
///
/// # Safety
/// `info` must be null or point to a struct filled by
/// `backend_dispatch_decode_file`.
#[no_mangle]
pub unsafe extern "C" fn backend_dispatch_model_info_free(info: *mut BackendDispatchModelInfo) {
    let Some(info) = info.as_mut() else { return };
    for field in [
        &mut info.container,
        &mut info.backend,
        &mut info.model_family,
        &mut info.model_type,
        &mut info.file_type,
    ] {
        backend_dispatch_free_string(*field);
        *field = ptr::null_mut();
    }
}

/// Stages the runtime for `backend` and returns its directory, or null on
/// failure. A null `staging_dir` uses the environment configuration.
///
/// # Safety
/// `backend` must be a valid NUL-terminated string; `staging_dir` must be
/// null or one.
#[no_mangle]
pub unsafe extern "C" fn backend_dispatch_provision(
    backend: *const c_char,
    staging_dir: *const c_char,
) -> *mut c_char {
    let Some(backend) = borrowed_str(backend) else {
        set_last_error("backend is null or not valid UTF-8");
        return ptr::null_mut();
    };
    let backend: Backend = match backend.parse() {
        Ok(b) => b,
        Err(e) => {
            set_last_error(format!("{}", e));
            return ptr::null_mut();
        }
    };

    let result = match borrowed_str(staging_dir) {
        Some(dir) => {
            let mut config = Config::default();
            config.staging_dir = PathBuf::from(dir);
            RuntimeProvisioner::detect(config.provision_options()).ensure(backend)
        }
        None => default_provisioner().ensure(backend),
    };
    match result {
        Ok(staged) => owned_c_string(&staged.dir.to_string_lossy()),
        Err(e) => {
            set_last_error(e.to_string());
            ptr::null_mut()
        }
    }
}

/// # Safety
/// `s` must be null or a string returned by this library, freed once.
#[no_mangle]
pub unsafe extern "C" fn backend_dispatch_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}
