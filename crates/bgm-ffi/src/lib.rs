//! C FFI surface for bgm.
//!
//! Pattern: opaque DispatcherHandle + C strings + JSON serialization.
//!
//! A C or C++ game engine links the cdylib/staticlib and drives music through
//! these calls; any platform with a C FFI (Swift, Kotlin, C#) can do the same.
//! Calls returning `i32` report 1 on success and 0 on error, with the message
//! available from `bgm_last_error`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use bgm_core::{
    attach_interruptions, AudioContentKind, Config, Interruption, InterruptionBroadcaster,
    MusicDispatcher, SharedDispatcher,
};

// ---------------------------------------------------------------------------
// Error handling (thread-local last error)
// ---------------------------------------------------------------------------

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

fn set_error(msg: String) {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = Some(msg));
}

fn clear_error() {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = None);
}

/// Returns the last error message (caller frees with `bgm_string_free`).
#[no_mangle]
pub extern "C" fn bgm_last_error() -> *mut c_char {
    LAST_ERROR.with(|cell| {
        cell.borrow_mut()
            .take()
            .and_then(|s| CString::new(s).ok())
            .map(|s| s.into_raw())
            .unwrap_or(ptr::null_mut())
    })
}

/// Frees a string returned from bgm FFI.
///
/// # Safety
/// Must be a pointer returned from this FFI and not already freed.
#[no_mangle]
pub unsafe extern "C" fn bgm_string_free(ptr: *mut c_char) {
    if !ptr.is_null() {
        let _ = CString::from_raw(ptr);
    }
}

// ---------------------------------------------------------------------------
// Opaque handle
// ---------------------------------------------------------------------------

#[repr(C)]
pub struct DispatcherHandle {
    _private: [u8; 0],
}

struct DispatcherHandleInner {
    dispatcher: SharedDispatcher,
}

pub const BGM_INTERRUPTION_BEGAN: i32 = 0;
pub const BGM_INTERRUPTION_ENDED: i32 = 1;

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Opens a music dispatcher. `config_json` may be NULL for defaults.
/// The dispatcher listens to the process-wide interruption broadcaster.
///
/// The broadcaster's registry is append-only: each open adds a listener that
/// outlives `bgm_close` as an inert weak reference, still invoked on every
/// interruption. Prefer one handle for the whole game over one per level.
///
/// # Safety
/// `config_json` must be NULL or a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn bgm_open(config_json: *const c_char) -> *mut DispatcherHandle {
    clear_error();
    let config = if config_json.is_null() {
        Config::default()
    } else {
        let text = match read_cstr(config_json) {
            Ok(t) => t,
            Err(e) => {
                set_error(e);
                return ptr::null_mut();
            }
        };
        match Config::from_json(&text) {
            Ok(c) => c,
            Err(e) => {
                set_error(e.to_string());
                return ptr::null_mut();
            }
        }
    };

    let dispatcher = MusicDispatcher::shared(config);
    attach_interruptions(&dispatcher, &InterruptionBroadcaster::shared());
    log::info!("bgm: dispatcher opened over FFI");
    Box::into_raw(Box::new(DispatcherHandleInner { dispatcher })) as *mut DispatcherHandle
}

/// Closes the dispatcher, tearing down its backend.
#[no_mangle]
pub extern "C" fn bgm_close(handle: *mut DispatcherHandle) {
    if !handle.is_null() {
        unsafe {
            drop(Box::from_raw(handle as *mut DispatcherHandleInner));
        }
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Play `path` as `kind` ("streamed" or "sequenced").
#[no_mangle]
pub extern "C" fn bgm_play(
    handle: *mut DispatcherHandle,
    path: *const c_char,
    kind: *const c_char,
) -> i32 {
    clear_error();
    let inner = match handle_ref(handle) {
        Ok(h) => h,
        Err(e) => return err_code(e),
    };
    let path = match read_cstr(path) {
        Ok(p) => p,
        Err(e) => return err_code(e),
    };
    let kind = match read_cstr(kind) {
        Ok(k) => k,
        Err(e) => return err_code(e),
    };
    let Some(kind) = AudioContentKind::from_name(&kind) else {
        return err_code(format!("unknown content kind: {}", kind));
    };
    status(inner.dispatcher.lock().play(&path, kind))
}

#[no_mangle]
pub extern "C" fn bgm_pause(handle: *mut DispatcherHandle) -> i32 {
    clear_error();
    match handle_ref(handle) {
        Ok(inner) => status(inner.dispatcher.lock().pause()),
        Err(e) => err_code(e),
    }
}

#[no_mangle]
pub extern "C" fn bgm_resume(handle: *mut DispatcherHandle) -> i32 {
    clear_error();
    match handle_ref(handle) {
        Ok(inner) => status(inner.dispatcher.lock().resume()),
        Err(e) => err_code(e),
    }
}

/// `volume` must lie in [0.0, 1.0].
#[no_mangle]
pub extern "C" fn bgm_set_volume(handle: *mut DispatcherHandle, volume: f32) -> i32 {
    clear_error();
    match handle_ref(handle) {
        Ok(inner) => status(inner.dispatcher.lock().set_volume(volume)),
        Err(e) => err_code(e),
    }
}

#[no_mangle]
pub extern "C" fn bgm_stop(handle: *mut DispatcherHandle) -> i32 {
    clear_error();
    match handle_ref(handle) {
        Ok(inner) => status(inner.dispatcher.lock().stop()),
        Err(e) => err_code(e),
    }
}

/// Release the audio engine while keeping the handle usable; the next
/// `bgm_play` builds a fresh one.
#[no_mangle]
pub extern "C" fn bgm_tear_down(handle: *mut DispatcherHandle) -> i32 {
    clear_error();
    match handle_ref(handle) {
        Ok(inner) => status(inner.dispatcher.lock().tear_down()),
        Err(e) => err_code(e),
    }
}

/// Current playback snapshot as JSON (caller frees).
#[no_mangle]
pub extern "C" fn bgm_state(handle: *mut DispatcherHandle) -> *mut c_char {
    clear_error();
    let inner = match handle_ref(handle) {
        Ok(h) => h,
        Err(e) => return err_null(e),
    };
    let snapshot = inner.dispatcher.lock().snapshot();
    json_to_cstr(&snapshot.to_value())
}

// ---------------------------------------------------------------------------
// Interruptions
// ---------------------------------------------------------------------------

/// Forward an OS audio-session interruption (`BGM_INTERRUPTION_BEGAN` or
/// `BGM_INTERRUPTION_ENDED`) to every listener in the process.
#[no_mangle]
pub extern "C" fn bgm_interruption(kind: i32) -> i32 {
    clear_error();
    let event = match kind {
        BGM_INTERRUPTION_BEGAN => Interruption::Began,
        BGM_INTERRUPTION_ENDED => Interruption::Ended,
        other => return err_code(format!("unknown interruption kind: {}", other)),
    };
    let failed = InterruptionBroadcaster::shared().notify(event);
    if failed > 0 {
        return err_code(format!("{} interruption handler(s) failed", failed));
    }
    1
}

/// ABI version of this surface.
#[no_mangle]
pub extern "C" fn bgm_version() -> u32 {
    1
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn handle_ref<'a>(handle: *mut DispatcherHandle) -> Result<&'a DispatcherHandleInner, String> {
    if handle.is_null() {
        return Err("null dispatcher handle".into());
    }
    unsafe { Ok(&*(handle as *const DispatcherHandleInner)) }
}

fn read_cstr(ptr: *const c_char) -> Result<String, String> {
    if ptr.is_null() {
        return Err("null string pointer".into());
    }
    unsafe {
        CStr::from_ptr(ptr)
            .to_str()
            .map(String::from)
            .map_err(|_| "invalid utf-8".into())
    }
}

fn status<E: std::fmt::Display>(result: Result<(), E>) -> i32 {
    match result {
        Ok(()) => 1,
        Err(e) => err_code(e.to_string()),
    }
}

fn json_to_cstr(value: &serde_json::Value) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => CString::new(json)
            .map(|c| c.into_raw())
            .unwrap_or(ptr::null_mut()),
        Err(e) => err_null(e.to_string()),
    }
}

fn err_code(msg: String) -> i32 {
    set_error(msg);
    0
}

fn err_null(msg: String) -> *mut c_char {
    set_error(msg);
    ptr::null_mut()
}

// ---------------------------------------------------------------------------
// FFI Integration Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::ffi::CString;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Interruptions fan out to every open handle in the process.
    static BROADCAST_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    /// Open a headless dispatcher. Returns (handle, guard).
    fn ffi_dispatcher() -> (*mut DispatcherHandle, std::sync::MutexGuard<'static, ()>) {
        let guard = BROADCAST_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        let config = c(r#"{"output":"null"}"#);
        let handle = unsafe { bgm_open(config.as_ptr()) };
        assert!(!handle.is_null(), "bgm_open returned null");
        (handle, guard)
    }

    /// Read a *mut c_char into a String and free it.
    fn read_ffi_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null(), "FFI returned null string");
        let s = unsafe { CStr::from_ptr(ptr).to_str().unwrap().to_string() };
        unsafe { bgm_string_free(ptr) };
        s
    }

    fn c(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    fn state(handle: *mut DispatcherHandle) -> serde_json::Value {
        serde_json::from_str(&read_ffi_string(bgm_state(handle))).unwrap()
    }

    fn write_midi(dir: &Path) -> CString {
        let path = bgm_core::fixtures::write_midi(dir, "theme.mid");
        c(path.to_str().unwrap())
    }

    // -------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------

    #[test]
    fn ffi_version() {
        assert_eq!(bgm_version(), 1);
    }

    #[test]
    fn ffi_open_close_lifecycle() {
        let (handle, _guard) = ffi_dispatcher();
        bgm_close(handle);
        bgm_close(ptr::null_mut());
    }

    #[test]
    fn ffi_open_rejects_bad_config() {
        let config = c(r#"{"buffer_seconds": -1}"#);
        let handle = unsafe { bgm_open(config.as_ptr()) };
        assert!(handle.is_null());
        let msg = read_ffi_string(bgm_last_error());
        assert!(msg.contains("buffer_seconds"), "{}", msg);
    }

    #[test]
    fn ffi_open_rejects_oversized_buffer() {
        let config = c(r#"{"output":"null","buffer_seconds":1e18}"#);
        let handle = unsafe { bgm_open(config.as_ptr()) };
        assert!(handle.is_null());
        let msg = read_ffi_string(bgm_last_error());
        assert!(msg.contains("buffer_seconds"), "{}", msg);
    }

    #[test]
    fn ffi_null_handle_returns_error() {
        assert_eq!(bgm_pause(ptr::null_mut()), 0);
        let msg = read_ffi_string(bgm_last_error());
        assert!(msg.contains("null"));

        assert!(bgm_state(ptr::null_mut()).is_null());
    }

    // -------------------------------------------------------------------
    // Transport via FFI
    // -------------------------------------------------------------------

    #[test]
    fn ffi_initial_state_is_idle() {
        let (handle, _guard) = ffi_dispatcher();
        let state = state(handle);
        assert_eq!(state["playing"], false);
        assert_eq!(state["paused"], false);
        assert!(state["kind"].is_null());
        bgm_close(handle);
    }

    #[test]
    fn ffi_play_pause_resume_stop() {
        let dir = TempDir::new().unwrap();
        let theme = write_midi(dir.path());
        let (handle, _guard) = ffi_dispatcher();

        assert_eq!(bgm_play(handle, theme.as_ptr(), c("sequenced").as_ptr()), 1);
        let s = state(handle);
        assert_eq!(s["playing"], true);
        assert_eq!(s["kind"], "synthesized_sequence");

        assert_eq!(bgm_pause(handle), 1);
        assert_eq!(state(handle)["paused"], true);
        assert_eq!(bgm_resume(handle), 1);
        assert_eq!(bgm_resume(handle), 0);
        read_ffi_string(bgm_last_error());

        assert_eq!(bgm_stop(handle), 1);
        assert_eq!(state(handle)["playing"], false);

        assert_eq!(bgm_tear_down(handle), 1);
        assert!(state(handle)["kind"].is_null());
        bgm_close(handle);
    }

    #[test]
    fn ffi_play_errors_are_reported() {
        let (handle, _guard) = ffi_dispatcher();

        let missing = c("/nonexistent/d_e1m1.mid");
        assert_eq!(bgm_play(handle, missing.as_ptr(), c("sequenced").as_ptr()), 0);
        assert!(!read_ffi_string(bgm_last_error()).is_empty());

        assert_eq!(bgm_play(handle, missing.as_ptr(), c("tracker").as_ptr()), 0);
        let msg = read_ffi_string(bgm_last_error());
        assert!(msg.contains("unknown content kind"));

        bgm_close(handle);
    }

    #[test]
    fn ffi_volume_validation() {
        let (handle, _guard) = ffi_dispatcher();
        assert_eq!(bgm_set_volume(handle, 0.5), 1);
        assert_eq!(bgm_set_volume(handle, 1.5), 0);
        read_ffi_string(bgm_last_error());
        let volume = state(handle)["volume"].as_f64().unwrap();
        assert!((volume - 0.5).abs() < 1e-6);
        bgm_close(handle);
    }

    // -------------------------------------------------------------------
    // Interruptions via FFI
    // -------------------------------------------------------------------

    #[test]
    fn ffi_interruption_pauses_and_resumes() {
        let dir = TempDir::new().unwrap();
        let theme = write_midi(dir.path());
        let (handle, _guard) = ffi_dispatcher();
        assert_eq!(bgm_play(handle, theme.as_ptr(), c("midi").as_ptr()), 1);

        assert_eq!(bgm_interruption(BGM_INTERRUPTION_BEGAN), 1);
        assert_eq!(state(handle)["paused"], true);
        assert_eq!(bgm_interruption(BGM_INTERRUPTION_ENDED), 1);
        assert_eq!(state(handle)["paused"], false);

        bgm_close(handle);
    }

    #[test]
    fn ffi_unknown_interruption_kind() {
        assert_eq!(bgm_interruption(7), 0);
        let msg = read_ffi_string(bgm_last_error());
        assert!(msg.contains("unknown interruption"));
    }

    #[test]
    fn ffi_string_free_null_safe() {
        unsafe { bgm_string_free(ptr::null_mut()) };
    }
}
