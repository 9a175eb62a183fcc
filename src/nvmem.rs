/*! Nonvolatile memory area directory.

The platform declares its nonvolatile memories (external flash,
EEPROM, a settings file on a host build) as named, typed areas with
fixed sizes. The host link protocols enumerate and transfer whole
areas; nothing here is resized at runtime.
*/
use std::sync::{Arc, Mutex};

use crate::{Error, Result};

/// Kind of memory backing an area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvmType {
    /// NOR/NAND flash.
    Flash = 1,
    /// EEPROM.
    Eeprom = 2,
    /// Battery-backed or emulated RAM.
    Ram = 3,
    /// Regular file on a host build.
    File = 4,
}

/// Device operations behind an area.
pub trait NvmDevice: Send + Sync {
    /// Total size in bytes.
    fn size(&self) -> usize;

    /// Read `buf.len()` bytes starting at `offset`.
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()>;

    /// Write `data` starting at `offset`.
    fn write(&self, offset: usize, data: &[u8]) -> Result<()>;

    /// Erase a range. Memories without erase semantics report
    /// [`Error::NotPermitted`].
    fn erase(&self, _offset: usize, _len: usize) -> Result<()> {
        Err(Error::NotPermitted)
    }
}

/// A named window of nonvolatile memory.
#[derive(Clone)]
pub struct NvmArea {
    name: String,
    kind: NvmType,
    dev: Arc<dyn NvmDevice>,
}

impl NvmArea {
    /// Declare an area.
    pub fn new(name: &str, kind: NvmType, dev: Arc<dyn NvmDevice>) -> Self {
        Self {
            name: name.to_owned(),
            kind,
            dev,
        }
    }

    /// Area name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Memory kind.
    #[must_use]
    pub fn kind(&self) -> NvmType {
        self.kind
    }

    /// Size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.dev.size()
    }

    /// Read from the area.
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.dev.read(offset, buf)
    }

    /// Write to the area.
    pub fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        self.dev.write(offset, data)
    }

    /// Erase part of the area.
    pub fn erase(&self, offset: usize, len: usize) -> Result<()> {
        self.dev.erase(offset, len)
    }
}

/// In-memory NVM device for host builds and tests.
pub struct MemNvm {
    data: Mutex<Vec<u8>>,
}

impl MemNvm {
    /// A zero-filled memory of `size` bytes.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            data: Mutex::new(vec![0; size]),
        }
    }

    /// A memory initialised with `content`.
    #[must_use]
    pub fn with_content(content: &[u8]) -> Self {
        Self {
            data: Mutex::new(content.to_vec()),
        }
    }
}

impl NvmDevice for MemNvm {
    fn size(&self) -> usize {
        self.data.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let data = self.data.lock().unwrap_or_else(|p| p.into_inner());
        let end = offset.checked_add(buf.len()).ok_or(Error::InvalidArgument)?;
        if end > data.len() {
            return Err(Error::InvalidArgument);
        }
        buf.copy_from_slice(&data[offset..end]);
        Ok(())
    }

    fn write(&self, offset: usize, input: &[u8]) -> Result<()> {
        let mut data = self.data.lock().unwrap_or_else(|p| p.into_inner());
        let end = offset
            .checked_add(input.len())
            .ok_or(Error::InvalidArgument)?;
        if end > data.len() {
            return Err(Error::InvalidArgument);
        }
        data[offset..end].copy_from_slice(input);
        Ok(())
    }

    fn erase(&self, offset: usize, len: usize) -> Result<()> {
        let mut data = self.data.lock().unwrap_or_else(|p| p.into_inner());
        let end = offset.checked_add(len).ok_or(Error::InvalidArgument)?;
        if end > data.len() {
            return Err(Error::InvalidArgument);
        }
        for b in data[offset..end].iter_mut() {
            *b = 0xFF;
        }
        Ok(())
    }
}
