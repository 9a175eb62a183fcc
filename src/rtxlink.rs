/*! Host link: framed, CRC-protected protocol multiplexer.

Several host-side protocols share one character device. A frame on
the wire is `protocol(1) payload(0..1028) crc16(2)`, CRC-16/CCITT
over protocol and payload, big-endian, the whole thing SLIP framed.

[`RtxLink::task`] is cooperative: each invocation reads one chunk
from the device, feeds the decoder, dispatches at most what arrived
and pushes queued reply bytes in small chunks, then returns to the
caller. It never blocks.

Protocol handlers are registered per protocol id; a handler gets the
received payload and a reply buffer, and schedules a reply by
returning a non-zero length.
*/
use log::{debug, trace};

use crate::chardev::Chardev;
use crate::crc::crc_ccitt;
use crate::slip::SlipFrame;
use crate::{Error, Result};

/// Number of protocol slots.
pub const NUM_PROTOCOLS: usize = 4;

/// Maximum payload of one frame.
pub const MAX_PAYLOAD: usize = 1028;

// protocol + payload + crc
const MAX_FRAME: usize = MAX_PAYLOAD + 3;

// Read chunk per task invocation.
const READ_CHUNK: usize = 512;

// Reply bytes pushed to the device per task invocation. Keeps one
// tick short even on a slow line.
const SEND_CHUNK: usize = 64;

/// Well-known protocol ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Console input/output.
    Stdio = 0,
    /// Transceiver control.
    Cat = 1,
    /// Firmware and memory access.
    Fmp = 2,
    /// Bulk data transfer.
    Dat = 3,
}

/// A protocol handler: `(payload, reply_buf) → reply_len`, zero for
/// no reply.
pub type ProtocolHandler = Box<dyn FnMut(&[u8], &mut [u8]) -> usize + Send>;

/// The host link multiplexer.
pub struct RtxLink {
    dev: Box<dyn Chardev>,
    handlers: [Option<ProtocolHandler>; NUM_PROTOCOLS],
    rx_frame: SlipFrame,
    tx_queue: Vec<u8>,
}

impl RtxLink {
    /// Bring up the link on a character device.
    pub fn new(mut dev: Box<dyn Chardev>) -> Result<Self> {
        dev.init()?;
        Ok(Self {
            dev,
            handlers: [None, None, None, None],
            rx_frame: SlipFrame::new(MAX_FRAME),
            tx_queue: Vec::new(),
        })
    }

    /// Shut the link down.
    pub fn terminate(&mut self) -> Result<()> {
        self.dev.terminate()
    }

    /// Register a handler. Returns false when the slot is occupied.
    pub fn set_protocol_handler(&mut self, proto: Protocol, handler: ProtocolHandler) -> bool {
        let slot = &mut self.handlers[proto as usize];
        if slot.is_some() {
            return false;
        }
        *slot = Some(handler);
        true
    }

    /// Unregister a handler.
    pub fn remove_protocol_handler(&mut self, proto: Protocol) {
        self.handlers[proto as usize] = None;
    }

    /// Queue a device-initiated frame.
    ///
    /// Fails with [`Error::Again`] while a previous reply is still
    /// draining and [`Error::TooBig`] for oversized payloads.
    pub fn send(&mut self, proto: Protocol, data: &[u8]) -> Result<()> {
        if !self.tx_queue.is_empty() {
            return Err(Error::Again);
        }
        if data.len() > MAX_PAYLOAD {
            return Err(Error::TooBig);
        }

        let mut frame = Vec::with_capacity(data.len() + 3);
        frame.push(proto as u8);
        frame.extend_from_slice(data);
        let crc = crc_ccitt(&frame);
        frame.extend_from_slice(&crc.to_be_bytes());
        self.queue_tx(&frame)
    }

    /// One cooperative tick: pump input, dispatch complete frames,
    /// push a chunk of queued output.
    pub fn task(&mut self) -> Result<()> {
        let mut buf = [0u8; READ_CHUNK];
        let len = self.dev.read(&mut buf)?;

        let mut consumed = 0;
        while consumed < len {
            match self.rx_frame.decode(&buf[consumed..len]) {
                Ok((n, frame_end)) => {
                    consumed += n;
                    if frame_end {
                        let frame = self.rx_frame.pop_frame();
                        self.dispatch(&frame);
                    }
                }
                Err(Error::NoMemory) => {
                    // Buffer overrun without a frame end. Drop the
                    // partial frame and what is left of this chunk:
                    // the next tick reads fresh data from the device
                    // rather than resuming from a truncated tail.
                    debug!("rtxlink: oversized frame dropped");
                    self.rx_frame.clear();
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        self.pump_tx();
        Ok(())
    }

    fn dispatch(&mut self, frame: &[u8]) {
        if frame.len() < 3 {
            trace!("rtxlink: runt frame");
            return;
        }

        let (body, crc_bytes) = frame.split_at(frame.len() - 2);
        let wire_crc = u16::from_be_bytes([crc_bytes[0], crc_bytes[1]]);
        if crc_ccitt(body) != wire_crc {
            debug!("rtxlink: CRC mismatch, frame dropped");
            return;
        }

        let protocol = body[0] as usize;
        let payload = &body[1..];
        let Some(handler) = self.handlers.get_mut(protocol).and_then(|h| h.as_mut()) else {
            trace!("rtxlink: no handler for protocol {protocol}");
            return;
        };

        let mut reply = vec![0u8; MAX_FRAME];
        reply[0] = body[0];
        let reply_len = handler(payload, &mut reply[1..1 + MAX_PAYLOAD]);
        if reply_len == 0 || reply_len > MAX_PAYLOAD {
            return;
        }

        let crc = crc_ccitt(&reply[..reply_len + 1]);
        reply.truncate(reply_len + 1);
        reply.extend_from_slice(&crc.to_be_bytes());
        if let Err(e) = self.queue_tx(&reply) {
            debug!("rtxlink: reply dropped: {e}");
        }
    }

    fn queue_tx(&mut self, frame: &[u8]) -> Result<()> {
        let mut slip = SlipFrame::new(2 * MAX_FRAME + 2);
        slip.encode(frame, true)?;
        // Append rather than replace: an earlier reply may still be
        // draining in chunks, and frames self-delimit on the wire.
        self.tx_queue.extend(slip.pop_frame());
        Ok(())
    }

    fn pump_tx(&mut self) {
        if self.tx_queue.is_empty() {
            return;
        }
        let n = self.tx_queue.len().min(SEND_CHUNK);
        match self.dev.write(&self.tx_queue[..n]) {
            Ok(written) => {
                self.tx_queue.drain(..written);
            }
            Err(e) => {
                debug!("rtxlink: write failed: {e}");
            }
        }
    }
}
