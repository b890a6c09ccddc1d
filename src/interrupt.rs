//! Cleanup of partially downloaded archives on Ctrl-C.
//!
//! While an [`InterruptGuard`] is alive, SIGINT removes the guarded file and
//! terminates the process with status 130. Dropping the guard restores the
//! previous handler.

use std::path::Path;

/// Exit status used after an interrupted download.
pub const INTERRUPT_EXIT_CODE: i32 = 130;

#[cfg(unix)]
mod imp {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;
    use std::ptr;
    use std::sync::atomic::{AtomicPtr, Ordering};

    use libc::{c_char, c_int};

    use super::INTERRUPT_EXIT_CODE;
    use crate::error::RefgenError;

    static GUARDED_PATH: AtomicPtr<c_char> = AtomicPtr::new(ptr::null_mut());

    const MESSAGE: &[u8] = b"\nThe download was interrupted; removing partial archive\n";

    extern "C" fn handle_interrupt(_signal: c_int) {
        // Only async-signal-safe calls below.
        unsafe {
            libc::write(2, MESSAGE.as_ptr().cast(), MESSAGE.len());
            let path = GUARDED_PATH.load(Ordering::SeqCst);
            if !path.is_null() {
                libc::unlink(path);
            }
            libc::_exit(INTERRUPT_EXIT_CODE);
        }
    }

    pub struct InterruptGuard {
        previous: libc::sigaction,
    }

    impl InterruptGuard {
        pub fn install(path: &Path) -> Result<Self, RefgenError> {
            let raw = CString::new(path.as_os_str().as_bytes())
                .map_err(|err| RefgenError::Filesystem(err.to_string()))?;
            let old = GUARDED_PATH.swap(raw.into_raw(), Ordering::SeqCst);
            free_path(old);

            let previous = unsafe {
                let mut action: libc::sigaction = std::mem::zeroed();
                action.sa_sigaction = handle_interrupt as extern "C" fn(c_int) as usize;
                libc::sigemptyset(&mut action.sa_mask);
                let mut previous: libc::sigaction = std::mem::zeroed();
                if libc::sigaction(libc::SIGINT, &action, &mut previous) != 0 {
                    free_path(GUARDED_PATH.swap(ptr::null_mut(), Ordering::SeqCst));
                    return Err(RefgenError::Filesystem(format!(
                        "install SIGINT handler: {}",
                        std::io::Error::last_os_error()
                    )));
                }
                previous
            };
            Ok(Self { previous })
        }
    }

    impl Drop for InterruptGuard {
        fn drop(&mut self) {
            unsafe {
                libc::sigaction(libc::SIGINT, &self.previous, ptr::null_mut());
            }
            free_path(GUARDED_PATH.swap(ptr::null_mut(), Ordering::SeqCst));
        }
    }

    fn free_path(raw: *mut c_char) {
        if !raw.is_null() {
            drop(unsafe { CString::from_raw(raw) });
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use std::path::Path;

    use crate::error::RefgenError;

    pub struct InterruptGuard;

    impl InterruptGuard {
        pub fn install(_path: &Path) -> Result<Self, RefgenError> {
            Ok(Self)
        }
    }
}

pub use imp::InterruptGuard;

/// Installs a guard for `path`, logging instead of failing when the handler
/// cannot be registered.
pub fn guard(path: &Path) -> Option<InterruptGuard> {
    match InterruptGuard::install(path) {
        Ok(guard) => Some(guard),
        Err(err) => {
            tracing::warn!("Partial download cleanup unavailable: {err}");
            None
        }
    }
}
