// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Memory-mapped register access.
//!
//! [`RegisterBus`] is the seam between the dispatch protocol and the
//! device: [`RegisterWindow`] maps the accelerator's register page from a
//! memory device with `rustix::mm::mmap`, tests substitute a recording
//! fake.

use crate::DispatchError;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsFd;
use std::path::Path;
use std::ptr::NonNull;

/// 32-bit register access at byte offsets.
pub trait RegisterBus: Send + std::fmt::Debug {
    fn read(&self, offset: usize) -> Result<u32, DispatchError>;

    fn write(&mut self, offset: usize, value: u32) -> Result<(), DispatchError>;

    /// Writes a 64-bit value as two 32-bit registers, low word first.
    fn write64(&mut self, offset: usize, value: u64) -> Result<(), DispatchError> {
        self.write(offset, value as u32)?;
        self.write(offset + 4, (value >> 32) as u32)
    }
}

/// The accelerator's register page mapped into the process.
#[derive(Debug)]
pub struct RegisterWindow {
    ptr: NonNull<u8>,
    span: usize,
    _file: File,
}

// SAFETY: the window owns its mapping exclusively; the mapping is
// process-wide, so moving it to another thread keeps it valid.
unsafe impl Send for RegisterWindow {}

impl RegisterWindow {
    /// Maps `span` bytes at physical address `base` from `device`
    /// (normally `/dev/mem`).
    pub fn open(device: &Path, base: u64, span: usize) -> Result<Self, DispatchError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(device)
            .map_err(|source| DispatchError::Device {
                path: device.to_path_buf(),
                source,
            })?;

        // SAFETY: the fd was just opened read/write and stays open for the
        // lifetime of the mapping (stored in `_file`); span is non-zero and
        // base is page aligned for the register page; the mapping is
        // released in Drop.
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                span,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                base,
            )
        }
        .map_err(|e| DispatchError::MapFailed {
            what: "register window",
            detail: format!("{base:#x}+{span:#x} from {}: {e}", device.display()),
        })?;

        let ptr = NonNull::new(addr.cast::<u8>()).ok_or(DispatchError::MapFailed {
            what: "register window",
            detail: "mmap returned null".into(),
        })?;
        tracing::info!("mapped accelerator registers {base:#x}+{span:#x} at {ptr:p}");
        Ok(Self {
            ptr,
            span,
            _file: file,
        })
    }

    fn check(&self, offset: usize) -> Result<(), DispatchError> {
        if offset & 0x3 != 0 {
            return Err(DispatchError::UnalignedRegister { offset });
        }
        if offset + 4 > self.span {
            return Err(DispatchError::RegisterOutOfBounds {
                offset,
                span: self.span,
            });
        }
        Ok(())
    }
}

impl RegisterBus for RegisterWindow {
    fn read(&self, offset: usize) -> Result<u32, DispatchError> {
        self.check(offset)?;
        // SAFETY: offset is 4-byte aligned and offset + 4 <= span (checked
        // above), the pointer comes from a live mapping of `span` bytes, and
        // the read must be volatile because the device updates the value.
        let value = unsafe { self.ptr.as_ptr().add(offset).cast::<u32>().read_volatile() };
        Ok(value)
    }

    fn write(&mut self, offset: usize, value: u32) -> Result<(), DispatchError> {
        self.check(offset)?;
        tracing::trace!("reg[{offset:#04x}] <- {value:#x}");
        // SAFETY: same bounds and alignment as `read`; the write has side
        // effects on the device and must not be elided or reordered.
        unsafe { self.ptr.as_ptr().add(offset).cast::<u32>().write_volatile(value) };
        Ok(())
    }
}

impl Drop for RegisterWindow {
    fn drop(&mut self) {
        // SAFETY: ptr/span describe exactly the mapping created in `open`,
        // and no references into it outlive `self`.
        if let Err(e) = unsafe { munmap(self.ptr.as_ptr().cast(), self.span) } {
            tracing::warn!("munmap of register window failed: {e}");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Register bus that records writes and reports every run as done.
    #[derive(Debug, Default, Clone)]
    pub(crate) struct RecordingBus {
        pub writes: Arc<Mutex<Vec<(usize, u32)>>>,
        pub busy_polls: usize,
        polls: Arc<Mutex<usize>>,
    }

    impl RecordingBus {
        pub(crate) fn with_busy_polls(busy_polls: usize) -> Self {
            Self {
                busy_polls,
                ..Self::default()
            }
        }

        pub(crate) fn take(&self) -> Vec<(usize, u32)> {
            std::mem::take(&mut *self.writes.lock().unwrap())
        }

        pub(crate) fn polls(&self) -> usize {
            *self.polls.lock().unwrap()
        }
    }

    impl RegisterBus for RecordingBus {
        fn read(&self, offset: usize) -> Result<u32, DispatchError> {
            assert_eq!(offset, crate::regs::CTRL);
            let mut polls = self.polls.lock().unwrap();
            *polls += 1;
            if *polls > self.busy_polls {
                Ok(crate::regs::ctrl::DONE)
            } else {
                Ok(0)
            }
        }

        fn write(&mut self, offset: usize, value: u32) -> Result<(), DispatchError> {
            self.writes.lock().unwrap().push((offset, value));
            Ok(())
        }
    }

    #[test]
    fn test_write64_low_word_first() {
        let mut bus = RecordingBus::default();
        bus.write64(0x10, 0x1234_5678_9abc_def0).unwrap();
        assert_eq!(bus.take(), vec![(0x10, 0x9abc_def0), (0x14, 0x1234_5678)]);
    }

    #[test]
    fn test_open_missing_device() {
        let err = RegisterWindow::open(Path::new("/nonexistent/mem"), 0xA000_0000, 0x1000)
            .unwrap_err();
        assert!(matches!(err, DispatchError::Device { .. }));
    }
}
