/*! M17 operating mode.

Ties the modem to the RTX task. In receive the demodulator runs off a
double-buffered input stream, half a frame per buffer, and decoded
frames land in the frame decoder. On PTT the receive side is torn
down and the transmitter streams voice payloads pulled from the codec
hand-off buffer until the key is released.
*/
use std::sync::Arc;

use log::{debug, info, warn};

use crate::audio_device::StreamMode;
use crate::audio_path::{AudioPriority, AudioSink, AudioSource, PathId};
use crate::audio_stream::{Audio, StreamId};
use crate::decoder::FrameDecoder;
use crate::demodulator::{Demodulator, RX_SAMPLE_RATE, UPDATE_SAMPLES};
use crate::frame::FrameKind;
use crate::modulator::Modulator;
use crate::ringbuf::RingBuffer;
use crate::rtx::{OpStatus, Radio, RtxStatus};
use crate::transmitter::Transmitter;

/// One encoded voice frame as produced by the codec layer.
pub type VoiceFrame = [u8; 16];

/// Hand-off buffer between the codec layer and the modem: newest
/// audio wins when the consumer falls behind.
pub type VoiceBuffer = RingBuffer<VoiceFrame, 4>;

/// M17 mode handler.
pub struct OpModeM17 {
    modulator: Modulator,
    transmitter: Transmitter,
    demodulator: Demodulator,
    decoder: FrameDecoder,
    voice: Arc<VoiceBuffer>,
    rx_path: Option<PathId>,
    rx_stream: Option<StreamId>,
    enter_rx: bool,
    stream_frames: u64,
}

impl OpModeM17 {
    /// New handler pulling transmit payloads from `voice`.
    /// `pwm_compensation` is forwarded to the modulator.
    #[must_use]
    pub fn new(voice: Arc<VoiceBuffer>, pwm_compensation: bool) -> Self {
        Self {
            modulator: Modulator::new(pwm_compensation),
            transmitter: Transmitter::new(),
            demodulator: Demodulator::new(),
            decoder: FrameDecoder::new(),
            voice,
            rx_path: None,
            rx_stream: None,
            enter_rx: false,
            stream_frames: 0,
        }
    }

    /// Called when the mode becomes active.
    pub fn enable(&mut self) {
        self.enter_rx = true;
        self.stream_frames = 0;
    }

    /// Called when the mode is left: all streams, paths and the
    /// modulator go away.
    pub fn disable(&mut self, audio: &mut Audio, radio: &mut dyn Radio) {
        self.stop_rx(audio);
        self.modulator.stop(audio);
        radio.disable();
        self.enter_rx = false;
    }

    /// The demodulator is locked onto a transmission.
    #[must_use]
    pub fn locked(&self) -> bool {
        self.demodulator.is_locked()
    }

    /// Live session data recovered by the receiver.
    #[must_use]
    pub fn decoder(&self) -> &FrameDecoder {
        &self.decoder
    }

    /// Stream frames received since the mode was enabled.
    #[must_use]
    pub fn stream_frames(&self) -> u64 {
        self.stream_frames
    }

    /// One tick of the M17 state machine.
    pub fn update(&mut self, status: &mut RtxStatus, audio: &mut Audio, radio: &mut dyn Radio) {
        match status.op_status {
            OpStatus::Off if self.enter_rx => self.start_rx(status, audio, radio),
            OpStatus::Rx => self.update_rx(status, audio),
            OpStatus::Tx => self.update_tx(status, audio, radio),
            _ => {}
        }

        // PTT edge into transmission, from whatever state RX was in.
        if status.ptt && status.op_status != OpStatus::Tx && !status.tx_disable {
            self.start_tx(status, audio, radio);
        }
    }

    fn start_rx(&mut self, status: &mut RtxStatus, audio: &mut Audio, radio: &mut dyn Radio) {
        let Some(path) = audio
            .paths
            .request(AudioSource::Rtx, AudioSink::Mcu, AudioPriority::Rx)
        else {
            return;
        };

        match audio.streams.start(
            &audio.paths,
            &audio.devices,
            path,
            2 * UPDATE_SAMPLES,
            RX_SAMPLE_RATE as u32,
            StreamMode::input_double(),
        ) {
            Ok(stream) => {
                self.rx_path = Some(path);
                self.rx_stream = Some(stream);
                self.demodulator.reset();
                self.decoder.reset();
                radio.enable_rx();
                status.op_status = OpStatus::Rx;
                self.enter_rx = false;
                info!("m17: receiver started");
            }
            Err(e) => {
                // No input device (or all slots taken): stay off and
                // retry on a later tick.
                warn!("m17: cannot start baseband input: {e}");
                audio.paths.release(path);
            }
        }
    }

    fn update_rx(&mut self, status: &mut RtxStatus, audio: &mut Audio) {
        let Some(stream) = self.rx_stream else {
            return;
        };

        let Some(block) = audio.streams.input_get_data(&audio.paths, stream) else {
            return;
        };
        if !self.demodulator.update(block, status.invert_rx_phase) {
            return;
        }

        let frame = *self.demodulator.frame();
        match self.decoder.decode(&frame) {
            FrameKind::Stream => {
                self.stream_frames += 1;
                let sf = self.decoder.stream_frame();
                debug!(
                    "m17: stream frame {}{}",
                    sf.frame_number(),
                    if sf.is_last_frame() { " (last)" } else { "" }
                );
            }
            FrameKind::LinkSetup => {
                debug!(
                    "m17: link setup from {}",
                    self.decoder.lsf().source().unwrap_or_default()
                );
            }
            _ => {}
        }
    }

    fn start_tx(&mut self, status: &mut RtxStatus, audio: &mut Audio, radio: &mut dyn Radio) {
        self.stop_rx(audio);

        let source = status.source_address.clone();
        let destination = status.destination_address.clone();
        match self
            .transmitter
            .start_to(&source, &destination, &mut self.modulator, audio)
        {
            Ok(()) => {
                radio.enable_tx();
                status.op_status = OpStatus::Tx;
            }
            Err(e) => {
                // Session abandoned; back to RX on a later tick.
                warn!("m17: transmission failed to start: {e}");
                self.enter_rx = true;
                status.op_status = OpStatus::Off;
            }
        }
    }

    fn update_tx(&mut self, status: &mut RtxStatus, audio: &mut Audio, radio: &mut dyn Radio) {
        if status.ptt {
            if let Some(payload) = self.voice.pop(false)
                && self
                    .transmitter
                    .send(&payload, false, &mut self.modulator, audio)
                    .is_err()
            {
                warn!("m17: transmission died");
                self.end_tx(status, radio);
            }
            return;
        }

        // Key released: flag the last frame and shut down.
        let payload = self.voice.pop(false).unwrap_or_default();
        if self
            .transmitter
            .send(&payload, true, &mut self.modulator, audio)
            .is_err()
        {
            warn!("m17: last frame lost");
        }
        self.transmitter.stop(&mut self.modulator, audio);
        self.end_tx(status, radio);
    }

    fn end_tx(&mut self, status: &mut RtxStatus, radio: &mut dyn Radio) {
        radio.disable();
        status.op_status = OpStatus::Off;
        self.enter_rx = true;
    }

    fn stop_rx(&mut self, audio: &mut Audio) {
        if let Some(stream) = self.rx_stream.take() {
            audio.streams.stop(stream);
        }
        if let Some(path) = self.rx_path.take() {
            audio.paths.release(path);
        }
    }
}
