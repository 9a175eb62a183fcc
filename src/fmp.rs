/*! Firmware/memory protocol handler.

Command frames are `cmd(1) nargs(1) args(..)`. The one command a
device must answer is `MEMINFO`, enumerating the declared nonvolatile
memory areas; everything else comes back with a not-permitted status
so hosts can probe capabilities safely.
*/
use std::sync::Arc;

use crate::nvmem::NvmArea;
use crate::rtxlink::{Protocol, RtxLink};

/// Enumerate memory areas.
pub const CMD_MEMINFO: u8 = 0x01;
/// Dump a whole memory.
pub const CMD_DUMP: u8 = 0x02;
/// Flash a firmware image.
pub const CMD_FLASH: u8 = 0x03;
/// Read a memory range.
pub const CMD_READ: u8 = 0x04;
/// Write a memory range.
pub const CMD_WRITE: u8 = 0x05;

/// Status: success.
pub const STATUS_OK: u8 = 0;
/// Status: operation not permitted.
pub const STATUS_EPERM: u8 = 1;
/// Status: malformed request.
pub const STATUS_EPROTO: u8 = 71;

// Serialized size of one memory information block.
const MEMINFO_BLOCK: usize = 32;
const NAME_FIELD: usize = 27;

const MAX_REPLY_SIZE: usize = 512;

/// Register the FMP handler on its protocol slot. Returns false when
/// the slot is taken.
pub fn attach(link: &mut RtxLink, areas: Arc<Vec<NvmArea>>) -> bool {
    link.set_protocol_handler(
        Protocol::Fmp,
        Box::new(move |request, reply| handle(&areas, request, reply)),
    )
}

/// Remove the FMP handler.
pub fn detach(link: &mut RtxLink) {
    link.remove_protocol_handler(Protocol::Fmp);
}

fn handle(areas: &[NvmArea], request: &[u8], reply: &mut [u8]) -> usize {
    // A command frame carries at least command and argument count.
    if request.len() < 2 {
        reply[0] = request.first().copied().unwrap_or(0);
        reply[1] = STATUS_EPROTO;
        return 2;
    }

    let cmd = request[0];
    match cmd {
        CMD_MEMINFO => meminfo(areas, reply),
        _ => {
            reply[0] = cmd;
            reply[1] = STATUS_EPERM;
            2
        }
    }
}

fn meminfo(areas: &[NvmArea], reply: &mut [u8]) -> usize {
    reply[0] = CMD_MEMINFO;
    reply[1] = STATUS_OK;
    reply[2] = areas.len() as u8;
    let mut size = 3;

    // One length byte per parameter block, then the blocks.
    for _ in areas {
        reply[size] = MEMINFO_BLOCK as u8;
        size += 1;
    }

    for area in areas {
        if size + MEMINFO_BLOCK > MAX_REPLY_SIZE {
            break;
        }

        reply[size..size + 4].copy_from_slice(&(area.size() as u32).to_le_bytes());
        reply[size + 4] = area.kind() as u8;

        let name = area.name().as_bytes();
        let n = name.len().min(NAME_FIELD);
        reply[size + 5..size + 5 + n].copy_from_slice(&name[..n]);
        for b in reply[size + 5 + n..size + MEMINFO_BLOCK].iter_mut() {
            *b = 0;
        }
        size += MEMINFO_BLOCK;
    }

    size
}
