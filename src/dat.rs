/*! Bulk data transfer over the host link.

A half-duplex, Xmodem-flavoured loop for moving whole nonvolatile
memory areas. Blocks carry a `{number, !number}` header followed by
up to 1024 payload bytes; the receiving side answers `ACK` (0x06) to
advance and `NAK` (0x15) to have a block resent.

Reading is device-driven: each host `ACK` fetches the next block
until the area is exhausted and the transfer returns to idle.
Writing is host-driven: the device acknowledges the setup with an
`ACK`, checks every block header and sequence number, and the host
decides when it is done; [`Dat::reset`] puts the slot back to idle.
*/
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info};

use crate::nvmem::NvmArea;
use crate::rtxlink::{Protocol, RtxLink};
use crate::{Error, Result};

/// Payload bytes per block.
pub const DAT_PAYLOAD_SIZE: usize = 1024;

/// Positive acknowledge.
pub const ACK: u8 = 0x06;
/// Negative acknowledge, block will be resent.
pub const NAK: u8 = 0x15;

/// State of the transfer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatStatus {
    /// No transfer active.
    Idle,
    /// Read set up, waiting for the host's first `ACK`.
    StartRead,
    /// Read in progress.
    Read,
    /// Write in progress.
    Write,
}

struct DatInner {
    status: DatStatus,
    area: Option<NvmArea>,
    block_cnt: u8,
    cur_addr: usize,
    read_size: usize,
}

/// The data transfer slot. Clones share state with the registered
/// protocol handler.
#[derive(Clone)]
pub struct Dat {
    inner: Arc<Mutex<DatInner>>,
}

impl Default for Dat {
    fn default() -> Self {
        Self::new()
    }
}

impl Dat {
    /// An idle transfer slot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(DatInner {
                status: DatStatus::Idle,
                area: None,
                block_cnt: 0,
                cur_addr: 0,
                read_size: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DatInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Current transfer status.
    #[must_use]
    pub fn status(&self) -> DatStatus {
        self.lock().status
    }

    /// Start sending `area` to the host. The transfer runs off host
    /// `ACK`s and idles itself at the area end.
    pub fn read_area(&self, link: &mut RtxLink, area: &NvmArea) -> Result<()> {
        {
            let mut st = self.lock();
            if st.status != DatStatus::Idle {
                return Err(Error::Busy);
            }
            st.status = DatStatus::StartRead;
            st.area = Some(area.clone());
            st.block_cnt = 0;
            st.cur_addr = 0;
            st.read_size = 0;
        }

        let inner = self.inner.clone();
        if !link.set_protocol_handler(
            Protocol::Dat,
            Box::new(move |rx, tx| read_handler(&inner, rx, tx)),
        ) {
            self.lock().status = DatStatus::Idle;
            return Err(Error::Busy);
        }
        info!("dat: read of '{}' armed", area.name());
        Ok(())
    }

    /// Start receiving `area` from the host. An `ACK` goes out to
    /// tell the host the device is ready.
    pub fn write_area(&self, link: &mut RtxLink, area: &NvmArea) -> Result<()> {
        {
            let mut st = self.lock();
            if st.status != DatStatus::Idle {
                return Err(Error::Busy);
            }
            st.status = DatStatus::Write;
            st.area = Some(area.clone());
            st.block_cnt = 0;
            st.cur_addr = 0;
            st.read_size = 0;
        }

        let inner = self.inner.clone();
        if !link.set_protocol_handler(
            Protocol::Dat,
            Box::new(move |rx, tx| write_handler(&inner, rx, tx)),
        ) {
            self.lock().status = DatStatus::Idle;
            return Err(Error::Busy);
        }

        link.send(Protocol::Dat, &[ACK])?;
        info!("dat: write of '{}' armed", area.name());
        Ok(())
    }

    /// Abort whatever is in flight and free the protocol slot.
    pub fn reset(&self, link: &mut RtxLink) {
        link.remove_protocol_handler(Protocol::Dat);
        let mut st = self.lock();
        st.status = DatStatus::Idle;
        st.area = None;
    }
}

fn read_handler(inner: &Arc<Mutex<DatInner>>, rx: &[u8], tx: &mut [u8]) -> usize {
    let mut st = inner.lock().unwrap_or_else(|p| p.into_inner());

    if rx.first() == Some(&ACK) {
        match st.status {
            DatStatus::StartRead => st.status = DatStatus::Read,
            DatStatus::Read => {
                st.block_cnt = st.block_cnt.wrapping_add(1);
                st.cur_addr += st.read_size;
            }
            _ => return 0,
        }

        let Some(size) = st.area.as_ref().map(NvmArea::size) else {
            return 0;
        };
        let remaining = size.saturating_sub(st.cur_addr);
        if remaining == 0 {
            info!("dat: read complete");
            st.status = DatStatus::Idle;
            return 0;
        }
        let max = DAT_PAYLOAD_SIZE.min(tx.len().saturating_sub(2));
        st.read_size = remaining.min(max);
    }

    // Anything but an ACK falls through to a resend of the current
    // block.
    if st.status != DatStatus::Read || st.read_size == 0 {
        return 0;
    }

    tx[0] = st.block_cnt;
    tx[1] = st.block_cnt ^ 0xFF;
    let (addr, len) = (st.cur_addr, st.read_size);
    let Some(area) = st.area.as_ref() else {
        return 0;
    };
    if let Err(e) = area.read(addr, &mut tx[2..2 + len]) {
        debug!("dat: area read failed: {e}");
        return 0;
    }
    len + 2
}

fn write_handler(inner: &Arc<Mutex<DatInner>>, rx: &[u8], tx: &mut [u8]) -> usize {
    let mut st = inner.lock().unwrap_or_else(|p| p.into_inner());
    if st.status != DatStatus::Write {
        return 0;
    }

    // NAK unless everything below checks out.
    tx[0] = NAK;

    if rx.len() < 2 {
        return 1;
    }
    let block = rx[0];
    if block ^ rx[1] != 0xFF || block != st.block_cnt {
        debug!("dat: bad block header {block}/{}", rx[1]);
        return 1;
    }

    let addr = st.cur_addr;
    let Some(area) = st.area.as_ref() else {
        return 0;
    };
    if area.write(addr, &rx[2..]).is_err() {
        return 1;
    }

    st.block_cnt = st.block_cnt.wrapping_add(1);
    st.cur_addr += rx.len() - 2;
    tx[0] = ACK;
    1
}
