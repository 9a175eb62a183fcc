/*! M17 transmission manager.

Drives one voice transmission session: builds the link setup frame
from the configured callsigns, opens the modulator, sends the
preamble and LSF, then turns 16-byte voice payloads into stream
frames until the caller flags the last one.
*/
use log::info;

use crate::audio_stream::Audio;
use crate::encoder::FrameEncoder;
use crate::frame::Frame;
use crate::lsf::{LinkSetupFrame, StreamType};
use crate::modulator::Modulator;
use crate::Result;

/// Transmission session manager.
pub struct Transmitter {
    encoder: FrameEncoder,
    lsf: LinkSetupFrame,
}

impl Default for Transmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Transmitter {
    /// New, idle transmitter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            encoder: FrameEncoder::new(),
            lsf: LinkSetupFrame::new(),
        }
    }

    /// Start a broadcast transmission.
    pub fn start(
        &mut self,
        source: &str,
        modulator: &mut Modulator,
        audio: &mut Audio,
    ) -> Result<()> {
        self.start_to(source, "", modulator, audio)
    }

    /// Start a transmission towards `destination`; an empty
    /// destination selects broadcast.
    ///
    /// Opens the modulator and sends one preamble frame followed by
    /// the link setup frame. Fails only when the modulator cannot
    /// acquire its output path.
    pub fn start_to(
        &mut self,
        source: &str,
        destination: &str,
        modulator: &mut Modulator,
        audio: &mut Audio,
    ) -> Result<()> {
        self.encoder.reset();
        self.lsf.clear();
        self.lsf.set_source(source)?;
        self.lsf.set_destination(destination)?;
        self.lsf.set_stream_type(StreamType::voice_stream(0));
        self.lsf.update_crc();

        modulator.start(audio)?;

        info!(
            "transmission start: {source} → {}",
            if destination.is_empty() {
                "broadcast"
            } else {
                destination
            }
        );

        let mut frame: Frame = [0; 48];
        FrameEncoder::fill_preamble(&mut frame);
        modulator.send_frame(audio, &frame)?;

        self.encoder.encode_lsf(&mut self.lsf, &mut frame);
        modulator.send_frame(audio, &frame)
    }

    /// Send one 16-byte voice payload; `is_last` closes the stream.
    /// Returns the frame number used.
    pub fn send(
        &mut self,
        payload: &[u8; 16],
        is_last: bool,
        modulator: &mut Modulator,
        audio: &mut Audio,
    ) -> Result<u16> {
        let mut frame: Frame = [0; 48];
        let number = self.encoder.encode_stream(payload, &mut frame, is_last);
        modulator.send_frame(audio, &frame)?;
        Ok(number)
    }

    /// Release the modulator. No trailing frame is generated beyond
    /// the one already flagged last.
    pub fn stop(&mut self, modulator: &mut Modulator, audio: &mut Audio) {
        modulator.stop(audio);
        info!("transmission stop");
    }

    /// The session's link setup frame.
    #[must_use]
    pub fn link_setup(&self) -> &LinkSetupFrame {
        &self.lsf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_device::BufferOutput;
    use crate::audio_path::AudioSink;
    use crate::modulator::TX_FRAME_SAMPLES;
    use std::sync::Arc;

    fn setup() -> (Audio, Arc<BufferOutput>, Modulator, Transmitter) {
        let mut audio = Audio::new();
        let out = Arc::new(BufferOutput::new(AudioSink::Rtx));
        audio.devices.register_output(out.clone());
        (audio, out, Modulator::new(false), Transmitter::new())
    }

    #[test]
    fn session_produces_preamble_lsf_and_stream() {
        let (mut audio, out, mut modulator, mut tx) = setup();
        tx.start("AB1CDE", &mut modulator, &mut audio).unwrap();

        assert!(tx.link_setup().valid());
        assert!(tx.link_setup().is_broadcast());
        assert_eq!(tx.link_setup().source().unwrap(), "AB1CDE");
        let st = tx.link_setup().stream_type();
        assert!(st.stream());
        assert_eq!(st.data_type(), StreamType::DATA_VOICE);
        assert_eq!(st.can(), 0);

        // Preamble + LSF already on the air.
        assert_eq!(out.captured().lock().unwrap().len(), 2 * TX_FRAME_SAMPLES);

        let n0 = tx.send(&[0u8; 16], false, &mut modulator, &mut audio).unwrap();
        let n1 = tx.send(&[1u8; 16], false, &mut modulator, &mut audio).unwrap();
        let n2 = tx.send(&[2u8; 16], true, &mut modulator, &mut audio).unwrap();
        assert_eq!((n0, n1, n2), (0, 1, 2));
        assert_eq!(out.captured().lock().unwrap().len(), 5 * TX_FRAME_SAMPLES);

        tx.stop(&mut modulator, &mut audio);
        assert!(!modulator.is_running());
    }

    #[test]
    fn restart_rewinds_frame_numbers() {
        let (mut audio, _, mut modulator, mut tx) = setup();
        tx.start("AB1CDE", &mut modulator, &mut audio).unwrap();
        tx.send(&[0u8; 16], false, &mut modulator, &mut audio).unwrap();
        tx.send(&[0u8; 16], true, &mut modulator, &mut audio).unwrap();
        tx.stop(&mut modulator, &mut audio);

        tx.start_to("AB1CDE", "SP5WWP", &mut modulator, &mut audio)
            .unwrap();
        assert!(!tx.link_setup().is_broadcast());
        let n = tx.send(&[0u8; 16], false, &mut modulator, &mut audio).unwrap();
        assert_eq!(n, 0);
        tx.stop(&mut modulator, &mut audio);
    }

    #[test]
    fn invalid_callsign_refuses_the_session() {
        let (mut audio, _, mut modulator, mut tx) = setup();
        assert!(tx.start("BAD#CALL", &mut modulator, &mut audio).is_err());
    }
}
