/*! SLIP framing.

Frames are delimited by `END` (0xC0); `END` and `ESC` bytes inside a
frame are escaped as `ESC ESC_END` and `ESC ESC_ESC`. The encoder
prepends an `END` when starting a fresh frame and appends the closing
one when the caller flags the last chunk, so a frame can be fed in
pieces. The decoder likewise eats its input in whatever chunks the
device hands over and reports when a frame-end marker went by.

Both directions run over one bounded buffer per [`SlipFrame`];
overflowing it reports [`Error::NoMemory`] so the caller can discard
the truncated frame instead of silently forwarding it.
*/
use crate::{Error, Result};

/// Frame delimiter.
pub const END: u8 = 0xC0;
/// Escape marker.
pub const ESC: u8 = 0xDB;
/// Escaped `END`.
pub const ESC_END: u8 = 0xDC;
/// Escaped `ESC`.
pub const ESC_ESC: u8 = 0xDD;

/// Buffer for one SLIP frame being encoded or decoded.
pub struct SlipFrame {
    data: Vec<u8>,
    max_len: usize,
    esc_pending: bool,
}

impl SlipFrame {
    /// New frame buffer holding at most `max_len` bytes.
    #[must_use]
    pub fn new(max_len: usize) -> Self {
        Self {
            data: Vec::with_capacity(max_len),
            max_len,
            esc_pending: false,
        }
    }

    /// Bytes currently in the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Drop the buffered frame and any partial decode state.
    pub fn clear(&mut self) {
        self.data.clear();
        self.esc_pending = false;
    }

    /// Take the buffered frame, resetting for the next one.
    #[must_use]
    pub fn pop_frame(&mut self) -> Vec<u8> {
        self.esc_pending = false;
        std::mem::take(&mut self.data)
    }

    fn push(&mut self, byte: u8) -> Result<()> {
        if self.data.len() >= self.max_len {
            return Err(Error::NoMemory);
        }
        self.data.push(byte);
        Ok(())
    }

    /// Append `input` to the frame, escaping as needed. A fresh
    /// frame gets the opening `END`; `last` appends the closing one.
    /// Returns the total encoded length so far.
    pub fn encode(&mut self, input: &[u8], last: bool) -> Result<usize> {
        if self.data.is_empty() {
            self.push(END)?;
        }

        for byte in input {
            match *byte {
                END => {
                    self.push(ESC)?;
                    self.push(ESC_END)?;
                }
                ESC => {
                    self.push(ESC)?;
                    self.push(ESC_ESC)?;
                }
                b => self.push(b)?,
            }
        }

        if last {
            self.push(END)?;
        }
        Ok(self.data.len())
    }

    /// Decode a chunk of wire bytes into the frame buffer.
    ///
    /// Returns `(consumed, frame_end)`: how much of `input` was
    /// eaten, and whether a frame-end marker terminated the frame.
    /// Leading and empty `END` markers are skipped. On overflow the
    /// buffer is left as-is and [`Error::NoMemory`] comes back; the
    /// caller decides whether to drop.
    pub fn decode(&mut self, input: &[u8]) -> Result<(usize, bool)> {
        for (pos, byte) in input.iter().enumerate() {
            match *byte {
                END => {
                    self.esc_pending = false;
                    // An END with nothing buffered is a leading
                    // delimiter or an empty frame: skip it.
                    if !self.data.is_empty() {
                        return Ok((pos + 1, true));
                    }
                }
                ESC => {
                    self.esc_pending = true;
                }
                ESC_END if self.esc_pending => {
                    self.esc_pending = false;
                    self.push(END)?;
                }
                ESC_ESC if self.esc_pending => {
                    self.esc_pending = false;
                    self.push(ESC)?;
                }
                b => {
                    self.esc_pending = false;
                    self.push(b)?;
                }
            }
        }
        Ok((input.len(), false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_all(data: &[u8]) -> Vec<u8> {
        let mut frame = SlipFrame::new(1024);
        frame.encode(data, true).unwrap();
        frame.pop_frame()
    }

    fn decode_all(wire: &[u8]) -> Vec<u8> {
        let mut frame = SlipFrame::new(1024);
        let (consumed, end) = frame.decode(wire).unwrap();
        assert!(end, "no frame end in {wire:02x?}");
        assert!(consumed <= wire.len());
        frame.pop_frame()
    }

    #[test]
    fn escapes_specials() {
        // The classic vector: END and ESC in the body.
        let encoded = encode_all(&[0xC0, 0xDB, 0x01]);
        assert_eq!(encoded, vec![0xC0, 0xDB, 0xDC, 0xDB, 0xDD, 0x01, 0xC0]);
    }

    #[test]
    fn roundtrip_all_byte_values() {
        let data: Vec<u8> = (0..=255).collect();
        let encoded = encode_all(&data);
        // Exactly the two framing ENDs survive unescaped.
        assert_eq!(encoded.iter().filter(|&&b| b == END).count(), 2);
        assert_eq!(decode_all(&encoded), data);
    }

    #[test]
    fn chunked_encode_and_decode() {
        let mut enc = SlipFrame::new(64);
        enc.encode(b"he", false).unwrap();
        enc.encode(b"llo", true).unwrap();
        let wire = enc.pop_frame();

        let mut dec = SlipFrame::new(64);
        // Feed one byte at a time, splitting escape sequences too.
        let mut done = false;
        for b in &wire {
            let (_, end) = dec.decode(std::slice::from_ref(b)).unwrap();
            done |= end;
        }
        assert!(done);
        assert_eq!(dec.pop_frame(), b"hello");
    }

    #[test]
    fn escape_split_across_chunks() {
        let wire = encode_all(&[0xC0]);
        let mut dec = SlipFrame::new(16);
        let (n, end) = dec.decode(&wire[..2]).unwrap(); // END, ESC
        assert_eq!((n, end), (2, false));
        let (_, end) = dec.decode(&wire[2..]).unwrap(); // ESC_END, END
        assert!(end);
        assert_eq!(dec.pop_frame(), vec![0xC0]);
    }

    #[test]
    fn bare_escape_substitutes_pass_through() {
        // ESC_END without a preceding ESC is a plain byte.
        assert_eq!(decode_all(&[0xDC, 0xDD, 0xC0]), vec![0xDC, 0xDD]);
    }

    #[test]
    fn leading_and_empty_frames_skipped() {
        assert_eq!(decode_all(&[0xC0, 0xC0, 0xC0, 0x41, 0xC0]), vec![0x41]);
    }

    #[test]
    fn overflow_reports_no_memory() {
        let mut dec = SlipFrame::new(4);
        let err = dec.decode(&[1, 2, 3, 4, 5, 6]).unwrap_err();
        assert!(matches!(err, Error::NoMemory));
    }

    #[test]
    fn decoder_stops_at_frame_end() {
        let mut dec = SlipFrame::new(64);
        let wire = [0xC0, 0x41, 0x42, 0xC0, 0x43, 0x44];
        let (consumed, end) = dec.decode(&wire).unwrap();
        assert!(end);
        assert_eq!(consumed, 4);
        assert_eq!(dec.pop_frame(), b"AB");
        // The rest belongs to the next frame.
        let (consumed, end) = dec.decode(&wire[consumed..]).unwrap();
        assert_eq!((consumed, end), (2, false));
        assert_eq!(dec.len(), 2);
    }
}
