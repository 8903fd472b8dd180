//! Named kernel mutex
//!
//! Created in the `Global\` namespace with a NULL DACL so that services and
//! user sessions share one object.

use razer_pwm_core::{GuardConfig, RazerPwmError, Result};
use std::ffi::c_void;
use std::mem;
use std::ptr;
use tracing::warn;
use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, HANDLE, WAIT_ABANDONED, WAIT_OBJECT_0,
};
use windows_sys::Win32::Security::{
    InitializeSecurityDescriptor, SetSecurityDescriptorDacl, SECURITY_ATTRIBUTES,
    SECURITY_DESCRIPTOR,
};
use windows_sys::Win32::System::SystemServices::SECURITY_DESCRIPTOR_REVISION;
use windows_sys::Win32::System::Threading::{
    CreateMutexW, ReleaseMutex, WaitForSingleObject, INFINITE,
};

#[derive(Debug)]
pub(super) struct NamedLock {
    handle: HANDLE,
    name: String,
}

// SAFETY: a mutex handle may be waited on and released from any thread; the
// ownership rules are enforced by the kernel, not by the handle value.
unsafe impl Send for NamedLock {}
unsafe impl Sync for NamedLock {}

impl NamedLock {
    pub(super) fn open(config: &GuardConfig) -> Result<Self> {
        let name = format!("Global\\{}", config.name);
        let wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();

        // SAFETY: the descriptor and attributes outlive the CreateMutexW call,
        // and `wide` is NUL-terminated.
        let handle = unsafe {
            let mut descriptor: SECURITY_DESCRIPTOR = mem::zeroed();
            let descriptor_ptr = &mut descriptor as *mut SECURITY_DESCRIPTOR as *mut c_void;
            if InitializeSecurityDescriptor(descriptor_ptr, SECURITY_DESCRIPTOR_REVISION) == 0 {
                return Err(last_error("initialize security descriptor for", &name));
            }
            if SetSecurityDescriptorDacl(descriptor_ptr, 1, ptr::null(), 0) == 0 {
                return Err(last_error("set DACL for", &name));
            }

            let attributes = SECURITY_ATTRIBUTES {
                nLength: mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
                lpSecurityDescriptor: descriptor_ptr,
                bInheritHandle: 0,
            };
            CreateMutexW(&attributes, 0, wide.as_ptr())
        };

        if handle.is_null() {
            return Err(last_error("create", &name));
        }
        Ok(Self { handle, name })
    }

    pub(super) fn lock(&self) -> Result<()> {
        loop {
            // SAFETY: `handle` is a valid mutex handle until drop
            let result = unsafe { WaitForSingleObject(self.handle, INFINITE) };
            if result == WAIT_OBJECT_0 {
                return Ok(());
            }
            if result == WAIT_ABANDONED {
                // We own it now, but in an inconsistent state: hand it back and wait again
                warn!("Access guard {} was abandoned, recovering", self.name);
                // SAFETY: this thread owns the mutex after WAIT_ABANDONED
                unsafe { ReleaseMutex(self.handle) };
                continue;
            }
            return Err(last_error("wait on", &self.name));
        }
    }

    pub(super) fn unlock(&self) {
        // SAFETY: `handle` is valid; releasing an unowned mutex only fails
        if unsafe { ReleaseMutex(self.handle) } == 0 {
            warn!("{}", last_error("release", &self.name));
        }
    }
}

impl Drop for NamedLock {
    fn drop(&mut self) {
        // SAFETY: the handle was returned by CreateMutexW and is closed once
        unsafe { CloseHandle(self.handle) };
    }
}

fn last_error(action: &str, name: &str) -> RazerPwmError {
    // SAFETY: no preconditions
    let code = unsafe { GetLastError() };
    RazerPwmError::Guard(format!("Failed to {} {} (error {})", action, name, code))
}
