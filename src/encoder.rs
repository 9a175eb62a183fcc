/*! Frame encoder: from payload bytes to coded over-the-air frames.

Runs the transmit side of the coding pipeline: convolutional
encoding, puncturing, LICH insertion for stream frames, interleaving,
decorrelation and syncword placement.
*/
use crate::convolutional::ConvEncoder;
use crate::decorrelator::decorrelate;
use crate::frame::{
    Frame, LSF_SYNC_WORD, PAYLOAD_BYTES, PREAMBLE_BYTE, STREAM_SYNC_WORD, StreamFrame,
};
use crate::interleaver::interleave;
use crate::lsf::{LICH_SEGMENTS, LICH_SIZE, LinkSetupFrame};
use crate::puncture::{LSF_PUNCTURE, STREAM_PUNCTURE, puncture};

/// Stateful frame encoder for one transmission session.
///
/// Keeps the LICH rotation and the stream frame counter between
/// frames; [`FrameEncoder::reset`] rewinds both for a new session.
pub struct FrameEncoder {
    encoder: ConvEncoder,
    lich_segments: [[u8; LICH_SIZE]; LICH_SEGMENTS],
    current_lich: usize,
    stream_frame_number: u16,
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameEncoder {
    /// A fresh encoder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            encoder: ConvEncoder::new(),
            lich_segments: [[0; LICH_SIZE]; LICH_SEGMENTS],
            current_lich: 0,
            stream_frame_number: 0,
        }
    }

    /// Clear the frame counter, the LICH rotation and the cached
    /// segments.
    pub fn reset(&mut self) {
        self.current_lich = 0;
        self.stream_frame_number = 0;
        self.lich_segments = [[0; LICH_SIZE]; LICH_SEGMENTS];
    }

    /// Fill a frame with the transmission preamble.
    pub fn fill_preamble(output: &mut Frame) {
        output.fill(PREAMBLE_BYTE);
    }

    /// Encode a link setup frame.
    ///
    /// Refreshes the LSF CRC, precomputes the six LICH segments used
    /// by the following stream frames, and writes the coded frame to
    /// `output`.
    pub fn encode_lsf(&mut self, lsf: &mut LinkSetupFrame, output: &mut Frame) {
        lsf.update_crc();

        for (num, segment) in self.lich_segments.iter_mut().enumerate() {
            *segment = lsf.lich_segment(num as u8);
        }

        let mut coded = [0u8; 61];
        self.encoder.reset();
        self.encoder.encode(lsf.as_bytes(), &mut coded[..60]);
        coded[60] = self.encoder.flush();

        let mut punctured = [0u8; PAYLOAD_BYTES];
        puncture(&coded, &mut punctured, &LSF_PUNCTURE);
        interleave(&mut punctured);
        decorrelate(&mut punctured);

        output[..2].copy_from_slice(&LSF_SYNC_WORD);
        output[2..].copy_from_slice(&punctured);
    }

    /// Encode one stream frame carrying `payload`.
    ///
    /// Stamps the running 11-bit frame number (wrapping at 2048),
    /// sets the last-frame flag when `is_last`, prepends the current
    /// LICH segment and writes the coded frame to `output`. Returns
    /// the frame number used.
    pub fn encode_stream(&mut self, payload: &[u8; 16], output: &mut Frame, is_last: bool) -> u16 {
        let mut sf = StreamFrame::new();
        sf.set_frame_number(self.stream_frame_number);
        self.stream_frame_number = (self.stream_frame_number + 1) & 0x07FF;
        if is_last {
            sf.set_last_frame();
        }
        sf.payload_mut().copy_from_slice(payload);

        let mut coded = [0u8; 37];
        self.encoder.reset();
        self.encoder.encode(sf.as_bytes(), &mut coded[..36]);
        coded[36] = self.encoder.flush();

        let mut punctured = [0u8; 34];
        puncture(&coded, &mut punctured, &STREAM_PUNCTURE);

        let mut data = [0u8; PAYLOAD_BYTES];
        data[..LICH_SIZE].copy_from_slice(&self.lich_segments[self.current_lich]);
        data[LICH_SIZE..].copy_from_slice(&punctured);
        self.current_lich = (self.current_lich + 1) % LICH_SEGMENTS;

        interleave(&mut data);
        decorrelate(&mut data);

        output[..2].copy_from_slice(&STREAM_SYNC_WORD);
        output[2..].copy_from_slice(&data);

        sf.frame_number()
    }
}
