/*! Character device interface for the host link.

Byte-oriented, non-blocking devices: a UART, a USB CDC endpoint, a
pseudo terminal. Reads may return less than asked, including nothing.

[`LoopChardev`] is the in-memory implementation used by the host
build and the tests: the "host" talks to one end, the link layer to
the other.
*/
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::{Error, Result};

/// Device control operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ioctl {
    /// Flush pending output to the wire.
    Sync = 100,
    /// Discard buffered input.
    Flush = 101,
    /// Change the line speed, argument in baud.
    SetSpeed = 102,
}

/// A byte-oriented character device.
pub trait Chardev: Send {
    /// Bring the device up.
    fn init(&mut self) -> Result<()>;

    /// Shut the device down and release its resources.
    fn terminate(&mut self) -> Result<()>;

    /// Non-blocking read; returns the number of bytes read, possibly
    /// zero and possibly less than the buffer size.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write; returns the number of bytes accepted.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Device control. Unsupported commands report
    /// [`Error::InvalidArgument`].
    fn ioctl(&mut self, _cmd: Ioctl, _arg: u32) -> Result<()> {
        Err(Error::InvalidArgument)
    }
}

#[derive(Default)]
struct LoopInner {
    to_device: VecDeque<u8>,
    from_device: Vec<u8>,
    open: bool,
}

/// In-memory character device pair.
///
/// Clones share the same queues: hand one clone to the link layer
/// and keep another as the "host" side.
#[derive(Clone, Default)]
pub struct LoopChardev {
    inner: Arc<Mutex<LoopInner>>,
}

impl LoopChardev {
    /// New closed loop device.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LoopInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Host side: queue bytes for the device to read.
    pub fn host_write(&self, data: &[u8]) {
        self.lock().to_device.extend(data.iter().copied());
    }

    /// Host side: take everything the device wrote so far.
    pub fn host_read(&self) -> Vec<u8> {
        std::mem::take(&mut self.lock().from_device)
    }
}

impl Chardev for LoopChardev {
    fn init(&mut self) -> Result<()> {
        self.lock().open = true;
        Ok(())
    }

    fn terminate(&mut self) -> Result<()> {
        let mut inner = self.lock();
        inner.open = false;
        inner.to_device.clear();
        inner.from_device.clear();
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut inner = self.lock();
        if !inner.open {
            return Err(Error::NotPermitted);
        }
        let n = buf.len().min(inner.to_device.len());
        for slot in buf[..n].iter_mut() {
            *slot = inner.to_device.pop_front().unwrap_or(0);
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let mut inner = self.lock();
        if !inner.open {
            return Err(Error::NotPermitted);
        }
        inner.from_device.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn ioctl(&mut self, cmd: Ioctl, _arg: u32) -> Result<()> {
        match cmd {
            Ioctl::Sync | Ioctl::Flush => Ok(()),
            Ioctl::SetSpeed => Ok(()),
        }
    }
}
