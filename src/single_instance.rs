use windows::{
    Win32::{
        Foundation::{CloseHandle, ERROR_ALREADY_EXISTS, GetLastError, HANDLE},
        System::Threading::CreateMutexW,
    },
    core::w,
};

/// Holds the named mutex for the life of the process.
pub struct SingleInstanceGuard {
    handle: Option<HANDLE>,
}

unsafe impl Send for SingleInstanceGuard {}
unsafe impl Sync for SingleInstanceGuard {}

impl Drop for SingleInstanceGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            unsafe {
                let _ = CloseHandle(handle);
            }
        }
    }
}

/// `None` when another control plane already owns the mutex. A failure to
/// create the mutex is logged and treated as acquired.
pub fn acquire() -> Option<SingleInstanceGuard> {
    let result = unsafe { CreateMutexW(None, true, w!("Global\\FrpDesktop_SingleInstance")) };

    match result {
        Ok(handle) => {
            if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
                unsafe {
                    let _ = CloseHandle(handle);
                }
                return None;
            }

            Some(SingleInstanceGuard {
                handle: Some(handle),
            })
        }
        Err(error) => {
            log::warn!("[single_instance] CreateMutexW failed: {error}");
            Some(SingleInstanceGuard { handle: None })
        }
    }
}
