//! C FFI interface.
//!
//! Naming convention: sshexec_<action>. Strings returned to the caller are
//! JSON and must be released with `sshexec_string_free`.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::OnceLock;

use crate::ssh::error::ExecError;
use crate::ssh::runner::{RemoteCommandRunner, RunnerConfig};
use crate::ssh::{CommandResult, ExecRequest};

/// Global tokio runtime for async SSH operations.
fn ssh_runtime() -> &'static tokio::runtime::Runtime {
    static RUNTIME: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("Failed to create SSH tokio runtime")
    })
}

/// Parse a JSON request. Malformed input is reported like a missing field.
fn parse_request(json: &str) -> Result<ExecRequest, ExecError> {
    serde_json::from_str(json).map_err(|e| {
        log::debug!("Rejecting request JSON: {}", e);
        ExecError::InvalidRequest
    })
}

fn render_outcome(outcome: &Result<Vec<CommandResult>, ExecError>) -> String {
    let value = match outcome {
        Ok(results) => serde_json::json!({ "results": results }),
        Err(e) => serde_json::json!({ "error": e.to_string() }),
    };
    value.to_string()
}

/// Run a batch of commands.
///
/// `request_json`: `{"host": "...", "port": 22, "username": "...", "commands": ["..."]}`
/// Returns `{"results": [{"result": "...", "code": N}, ...]}` or `{"error": "..."}`.
/// Returns null if the argument is null or not UTF-8, or if called from a
/// thread already driving a tokio runtime (blocking there would panic).
/// Caller must free with sshexec_string_free.
#[no_mangle]
pub extern "C" fn sshexec_run(request_json: *const c_char) -> *mut c_char {
    if request_json.is_null() {
        return std::ptr::null_mut();
    }

    let json = match unsafe { CStr::from_ptr(request_json) }.to_str() {
        Ok(s) => s,
        Err(_) => return std::ptr::null_mut(),
    };

    let outcome = match parse_request(json) {
        Ok(request) => {
            if tokio::runtime::Handle::try_current().is_ok() {
                log::error!("sshexec_run called from inside a tokio runtime");
                return std::ptr::null_mut();
            }
            let runner = RemoteCommandRunner::new(RunnerConfig::system());
            ssh_runtime().block_on(runner.run(request))
        }
        Err(e) => Err(e),
    };
    if let Err(e) = &outcome {
        log::error!("sshexec run failed: {}", e);
    }

    match CString::new(render_outcome(&outcome)) {
        Ok(cs) => cs.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Free a string allocated by Rust.
#[no_mangle]
pub extern "C" fn sshexec_string_free(s: *mut c_char) {
    if !s.is_null() {
        unsafe {
            drop(CString::from_raw(s));
        }
    }
}

/// Initialize the Rust logger.
#[no_mangle]
pub extern "C" fn sshexec_init() {
    let _ = env_logger::try_init();
    log::info!("sshexec core initialized");
}
