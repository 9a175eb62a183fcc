/*! Frame decoder: from raw demodulated frames back to payloads.

Runs the receive side of the coding pipeline and keeps the live link
setup frame for the session, updating it either from a decoded LSF
frame or, for late joiners, from reassembled link information
channel segments.

Per-segment LICH errors are swallowed: the channel is redundant
across frames. A stream frame that fails error correction is still
delivered; the Viterbi decoder always returns its best guess and the
voice decoder downstream is the real quality gate.
*/
use log::{debug, info, trace};

use crate::decorrelator::decorrelate;
use crate::demodulator::MAX_SYNC_ERRORS;
use crate::frame::{
    BERT_SYNC_WORD, Frame, FrameKind, LSF_SYNC_WORD, PACKET_SYNC_WORD, PAYLOAD_BYTES,
    PREAMBLE_BYTE, STREAM_SYNC_WORD, StreamFrame,
};
use crate::interleaver::deinterleave;
use crate::lsf::{LICH_SEGMENTS, LICH_SIZE, LinkSetupFrame, decode_lich};
use crate::puncture::{LSF_PUNCTURE, STREAM_PUNCTURE};
use crate::viterbi::Viterbi;

// All six segments seen.
const LICH_COMPLETE: u8 = 0b0011_1111;

/// Stateful frame decoder for one receive session.
pub struct FrameDecoder {
    viterbi: Viterbi,
    lsf: LinkSetupFrame,
    lsf_from_lich: LinkSetupFrame,
    segment_map: u8,
    stream_frame: StreamFrame,
    decoded: u64,
    lich_errors: u64,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FrameDecoder {
    fn drop(&mut self) {
        info!(
            "FrameDecoder: {} frames decoded, {} LICH block errors",
            self.decoded, self.lich_errors
        );
    }
}

impl FrameDecoder {
    /// A fresh decoder with a cleared link setup frame.
    #[must_use]
    pub fn new() -> Self {
        Self {
            viterbi: Viterbi::new(),
            lsf: LinkSetupFrame::new(),
            lsf_from_lich: LinkSetupFrame::new(),
            segment_map: 0,
            stream_frame: StreamFrame::new(),
            decoded: 0,
            lich_errors: 0,
        }
    }

    /// Drop all session state.
    pub fn reset(&mut self) {
        self.lsf.clear();
        self.lsf_from_lich.clear();
        self.segment_map = 0;
        self.stream_frame.clear();
    }

    /// The live link setup frame for the session.
    ///
    /// Updated by a decoded LSF frame, or by a complete set of LICH
    /// segments whose reassembled CRC validates.
    #[must_use]
    pub fn lsf(&self) -> &LinkSetupFrame {
        &self.lsf
    }

    /// The most recently decoded stream frame. Valid until the next
    /// call to [`FrameDecoder::decode`].
    #[must_use]
    pub fn stream_frame(&self) -> &StreamFrame {
        &self.stream_frame
    }

    /// Decode one raw 48-byte frame and classify it.
    pub fn decode(&mut self, frame: &Frame) -> FrameKind {
        let syncword = [frame[0], frame[1]];
        let mut data = [0u8; PAYLOAD_BYTES];
        data.copy_from_slice(&frame[2..]);

        // Re-correlating is the same operation as decorrelating.
        decorrelate(&mut data);
        deinterleave(&mut data);

        if syncword == [PREAMBLE_BYTE, PREAMBLE_BYTE] {
            return FrameKind::Preamble;
        }

        match classify(&syncword) {
            FrameKind::LinkSetup => {
                self.decode_lsf(&data);
                self.decoded += 1;
                FrameKind::LinkSetup
            }
            FrameKind::Stream => {
                self.decode_stream(&data);
                self.decoded += 1;
                FrameKind::Stream
            }
            kind => kind,
        }
    }

    fn decode_lsf(&mut self, data: &[u8; PAYLOAD_BYTES]) {
        let mut decoded = [0u8; 30];
        let cost = self.viterbi.decode_punctured(data, &mut decoded, &LSF_PUNCTURE);
        self.lsf = LinkSetupFrame::from_bytes(decoded);
        debug!(
            "FrameDecoder: LSF, path cost {cost}, crc {}",
            if self.lsf.valid() { "ok" } else { "BAD" }
        );
    }

    fn decode_stream(&mut self, data: &[u8; PAYLOAD_BYTES]) {
        let lich: &[u8; LICH_SIZE] = (&data[..LICH_SIZE]).try_into().expect("fixed slice");
        match decode_lich(lich) {
            Some((chunk, num)) => self.collect_lich_chunk(num, &chunk),
            None => {
                // Uncorrectable block. The same slice comes around
                // again in six frames.
                self.lich_errors += 1;
                trace!("FrameDecoder: dropping uncorrectable LICH segment");
            }
        }

        let punctured: &[u8] = &data[LICH_SIZE..];
        let mut decoded = [0u8; 18];
        self.viterbi
            .decode_punctured(punctured, &mut decoded, &STREAM_PUNCTURE);
        self.stream_frame = StreamFrame::from_bytes(decoded);
    }

    fn collect_lich_chunk(&mut self, num: u8, chunk: &[u8; 5]) {
        self.lsf_from_lich.set_lich_chunk(num, chunk);
        self.segment_map |= 1 << (num % LICH_SEGMENTS as u8);

        if self.segment_map == LICH_COMPLETE {
            if self.lsf_from_lich.valid() {
                debug!("FrameDecoder: LSF reassembled from LICH");
                self.lsf = self.lsf_from_lich;
            }
            self.segment_map = 0;
            self.lsf_from_lich.clear();
        }
    }
}

fn classify(syncword: &[u8; 2]) -> FrameKind {
    // The demodulator keeps its lock, and delivers the frame, for
    // syncwords within MAX_SYNC_ERRORS bit errors; classification
    // works to the same budget, by nearest known pattern, so nothing
    // the demodulator considered good enough gets dropped here.
    let candidates = [
        (LSF_SYNC_WORD, FrameKind::LinkSetup),
        (STREAM_SYNC_WORD, FrameKind::Stream),
        (PACKET_SYNC_WORD, FrameKind::Packet),
        (BERT_SYNC_WORD, FrameKind::Bert),
    ];

    let mut best = FrameKind::Unknown;
    let mut best_distance = u32::MAX;
    for (word, kind) in candidates {
        let distance = (u16::from_be_bytes(word) ^ u16::from_be_bytes(*syncword)).count_ones();
        if distance < best_distance {
            best_distance = distance;
            best = kind;
        }
    }
    if best_distance <= MAX_SYNC_ERRORS {
        best
    } else {
        FrameKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::FrameEncoder;
    use crate::lsf::StreamType;
    use rand::RngCore;

    fn sample_lsf() -> LinkSetupFrame {
        let mut lsf = LinkSetupFrame::new();
        lsf.set_source("AB1CDE").unwrap();
        lsf.set_stream_type(StreamType::voice_stream(0));
        lsf.update_crc();
        lsf
    }

    #[test]
    fn lsf_roundtrip() {
        let mut lsf = sample_lsf();
        let mut enc = FrameEncoder::new();
        let mut dec = FrameDecoder::new();
        let mut frame: Frame = [0; 48];

        enc.encode_lsf(&mut lsf, &mut frame);
        assert_eq!(dec.decode(&frame), FrameKind::LinkSetup);
        assert_eq!(dec.lsf().as_bytes(), lsf.as_bytes());
        assert!(dec.lsf().valid());
        assert_eq!(dec.lsf().source().unwrap(), "AB1CDE");
        assert!(dec.lsf().is_broadcast());
        let st = dec.lsf().stream_type();
        assert!(st.stream());
        assert_eq!(st.data_type(), StreamType::DATA_VOICE);
        assert_eq!(st.can(), 0);
    }

    #[test]
    fn stream_roundtrip() {
        let mut rng = rand::rng();
        let mut lsf = sample_lsf();
        let mut enc = FrameEncoder::new();
        let mut dec = FrameDecoder::new();
        let mut frame: Frame = [0; 48];
        enc.encode_lsf(&mut lsf, &mut frame);
        dec.decode(&frame);

        for n in 0..8u16 {
            let mut payload = [0u8; 16];
            rng.fill_bytes(&mut payload);
            let last = n == 7;
            enc.encode_stream(&payload, &mut frame, last);
            assert_eq!(dec.decode(&frame), FrameKind::Stream);
            let sf = dec.stream_frame();
            assert_eq!(sf.frame_number(), n);
            assert_eq!(sf.is_last_frame(), last);
            assert_eq!(sf.payload(), &payload);
        }
    }

    #[test]
    fn preamble_is_recognised() {
        let mut dec = FrameDecoder::new();
        let mut frame: Frame = [0; 48];
        FrameEncoder::fill_preamble(&mut frame);
        assert_eq!(dec.decode(&frame), FrameKind::Preamble);
    }

    #[test]
    fn lsf_reassembled_from_lich_only() {
        // A late joiner never sees the LSF frame, only stream
        // frames. After six of them the session data is back.
        let mut lsf = sample_lsf();
        let mut enc = FrameEncoder::new();
        let mut dec = FrameDecoder::new();
        let mut frame: Frame = [0; 48];
        enc.encode_lsf(&mut lsf, &mut frame); // not fed to decoder

        let payload = [0u8; 16];
        for n in 0..6 {
            enc.encode_stream(&payload, &mut frame, false);
            assert_eq!(dec.decode(&frame), FrameKind::Stream);
            if n < 5 {
                assert_ne!(dec.lsf().as_bytes(), lsf.as_bytes());
            }
        }
        assert_eq!(dec.lsf().as_bytes(), lsf.as_bytes());
        assert!(dec.lsf().valid());
    }

    #[test]
    fn syncword_with_one_bit_error_classified() {
        let mut lsf = sample_lsf();
        let mut enc = FrameEncoder::new();
        let mut dec = FrameDecoder::new();
        let mut frame: Frame = [0; 48];
        enc.encode_lsf(&mut lsf, &mut frame);
        frame[0] ^= 0x01;
        assert_eq!(dec.decode(&frame), FrameKind::LinkSetup);
    }

    #[test]
    fn syncword_errors_up_to_the_demodulator_budget_classified() {
        // The demodulator keeps delivering frames with up to
        // MAX_SYNC_ERRORS flipped syncword bits; each of them must
        // still classify and decode. The masks sit on even bit
        // positions, clear of the pairwise differences between the
        // known syncwords, so the nearest pattern stays the true
        // one.
        for (hi, lo, errors) in [(0x50u8, 0x00u8, 2u32), (0x50, 0x40, 3), (0x50, 0x50, 4)] {
            let mut lsf = sample_lsf();
            let mut enc = FrameEncoder::new();
            let mut dec = FrameDecoder::new();
            let mut frame: Frame = [0; 48];

            enc.encode_lsf(&mut lsf, &mut frame);
            frame[0] ^= hi;
            frame[1] ^= lo;
            assert_eq!(
                dec.decode(&frame),
                FrameKind::LinkSetup,
                "LSF with {errors} sync errors"
            );
            assert!(dec.lsf().valid());
            assert_eq!(dec.lsf().source().unwrap(), "AB1CDE");

            enc.encode_stream(&[0x42; 16], &mut frame, false);
            frame[0] ^= hi;
            frame[1] ^= lo;
            assert_eq!(
                dec.decode(&frame),
                FrameKind::Stream,
                "stream with {errors} sync errors"
            );
            assert_eq!(dec.stream_frame().frame_number(), 0);
            assert_eq!(dec.stream_frame().payload(), &[0x42; 16]);
        }
    }

    #[test]
    fn syncword_past_the_budget_rejected() {
        // Five errors is one past MAX_SYNC_ERRORS: the frame no
        // longer classifies.
        let mut lsf = sample_lsf();
        let mut enc = FrameEncoder::new();
        let mut dec = FrameDecoder::new();
        let mut frame: Frame = [0; 48];
        enc.encode_lsf(&mut lsf, &mut frame);
        frame[0] ^= 0x50;
        frame[1] ^= 0x54;
        assert_eq!(dec.decode(&frame), FrameKind::Unknown);
    }

    #[test]
    fn unknown_syncword_rejected() {
        let mut dec = FrameDecoder::new();
        let mut frame: Frame = [0; 48];
        frame[0] = 0x12;
        frame[1] = 0x34;
        assert_eq!(dec.decode(&frame), FrameKind::Unknown);
    }
}
