use std::{
    io,
    os::windows::process::CommandExt,
    path::Path,
    process::{Child, Command},
};

use super::{CREATE_NO_WINDOW, ChildProcess};

const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;

mod win32 {
    use windows::Win32::{
        Foundation::{CloseHandle, HANDLE},
        System::{
            JobObjects::{
                AssignProcessToJobObject, CreateJobObjectW, JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE,
                JOBOBJECT_EXTENDED_LIMIT_INFORMATION, JobObjectExtendedLimitInformation,
                SetInformationJobObject,
            },
            Threading::{OpenProcess, PROCESS_TERMINATE, TerminateProcess},
        },
    };

    pub fn terminate(process_id: u32, exit_code: u32) -> bool {
        unsafe {
            let handle = match OpenProcess(PROCESS_TERMINATE, false, process_id) {
                Ok(handle) => handle,
                Err(error) => {
                    log::warn!(
                        "[win32] OpenProcess failed for pid {}: {}",
                        process_id,
                        error,
                    );
                    return false;
                }
            };
            let result = TerminateProcess(handle, exit_code);
            let _ = CloseHandle(handle);
            if let Err(error) = result {
                log::warn!(
                    "[win32] TerminateProcess failed for pid {}: {}",
                    process_id,
                    error,
                );
                return false;
            }
            true
        }
    }

    /// All assigned processes die when the last handle closes (even on crash).
    pub fn create_kill_on_close_job() -> Option<HANDLE> {
        unsafe {
            let job = match CreateJobObjectW(None, None) {
                Ok(job) => job,
                Err(error) => {
                    log::warn!("[win32] CreateJobObjectW failed: {error}");
                    return None;
                }
            };

            let mut info = JOBOBJECT_EXTENDED_LIMIT_INFORMATION::default();
            info.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;

            let result = SetInformationJobObject(
                job,
                JobObjectExtendedLimitInformation,
                &info as *const _ as *const std::ffi::c_void,
                std::mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
            );

            if let Err(error) = result {
                log::warn!("[win32] SetInformationJobObject failed: {error}");
                let _ = CloseHandle(job);
                return None;
            }

            Some(job)
        }
    }

    pub fn assign_process_to_job(job: HANDLE, process: HANDLE) -> bool {
        unsafe {
            match AssignProcessToJobObject(job, process) {
                Ok(()) => true,
                Err(error) => {
                    log::warn!("[win32] AssignProcessToJobObject failed: {error}");
                    false
                }
            }
        }
    }
}

pub struct JobGuard {
    handle: windows::Win32::Foundation::HANDLE,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        log::debug!("[job] closing job object handle");
        unsafe {
            let _ = windows::Win32::Foundation::CloseHandle(self.handle);
        }
    }
}

unsafe impl Send for JobGuard {}
unsafe impl Sync for JobGuard {}

fn create_child_job_guard(child: &Child) -> Option<JobGuard> {
    use std::os::windows::io::AsRawHandle;
    use windows::Win32::Foundation::HANDLE;

    let job = win32::create_kill_on_close_job()?;
    let process_handle = HANDLE(child.as_raw_handle());
    if win32::assign_process_to_job(job, process_handle) {
        log::info!(
            "[job] child pid={} assigned to kill-on-close job object",
            child.id(),
        );
        Some(JobGuard { handle: job })
    } else {
        unsafe {
            let _ = windows::Win32::Foundation::CloseHandle(job);
        }
        None
    }
}

pub fn terminate_process(process_id: u32) -> bool {
    log::info!("[process] terminating pid {} via native API", process_id);
    win32::terminate(process_id, 1)
}

pub fn spawn(mut command: Command) -> io::Result<ChildProcess> {
    command
        .creation_flags(CREATE_NO_WINDOW | CREATE_NEW_PROCESS_GROUP)
        .spawn()
        .map(|child| {
            let _job_guard = create_child_job_guard(&child);
            ChildProcess { child, _job_guard }
        })
}

pub fn make_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}
