/*! 4-FSK modulator.

Maps frame bytes MSB-first onto dibits, dibits onto the four symbol
deviations, zero-stuffs to ten samples per symbol at 48 kHz and pulse
shapes with a root-raised-cosine filter, all in fixed point. The
resulting baseband goes out through a double-buffered output stream:
one frame of samples per buffer half.

On platforms whose output stage is a PWM DAC the baseband is
additionally pre-emphasised against the reconstruction filter, and
the signal phase can be inverted where the analog chain flips it.
*/
use log::debug;

use crate::audio_path::{AudioPriority, AudioSink, AudioSource, PathId};
use crate::audio_stream::{Audio, StreamId};
use crate::dsp::{self, FilterState};
use crate::fir::IntegerFir;
use crate::frame::{FRAME_SYMBOLS, Frame};
use crate::{Error, Result, Sample};

/// Baseband sample rate of the transmit path.
pub const TX_SAMPLE_RATE: usize = 48_000;

/// Output samples per symbol.
pub const TX_SAMPLES_PER_SYMBOL: usize = TX_SAMPLE_RATE / crate::frame::SYMBOL_RATE;

/// Baseband samples per frame: 40 ms at 48 kHz.
pub const TX_FRAME_SAMPLES: usize = FRAME_SYMBOLS * TX_SAMPLES_PER_SYMBOL;

// Dibit value to symbol deviation: 00→+1, 01→+3, 10→-1, 11→-3.
const SYMBOL_MAP: [i8; 4] = [1, 3, -1, -3];

/// Expand one byte into its four symbols, MSB first.
#[must_use]
pub fn byte_to_symbols(byte: u8) -> [i8; 4] {
    [
        SYMBOL_MAP[usize::from((byte >> 6) & 0x3)],
        SYMBOL_MAP[usize::from((byte >> 4) & 0x3)],
        SYMBOL_MAP[usize::from((byte >> 2) & 0x3)],
        SYMBOL_MAP[usize::from(byte & 0x3)],
    ]
}

// Root-raised-cosine taps, 0.5 roll-off, ten samples per symbol,
// quantised so an outer symbol peaks near three quarters of full
// scale after the normalisation shift.
const RRC_TAPS: [i32; 79] = [
    -2125, -1407, -258, 1122, 2458, 3453, 3851, 3499, 2392, 695, -1269, -3074, -4266, -4460,
    -3441, -1236, 1847, 5233, 8145, 9735, 9233, 6128, 316, -7786, -17209, -26472, -33727, -36975,
    -34336, -24337, -6175, 20088, 53429, 91888, 132724, 172680, 208333, 236478, 254506, 260713,
    254506, 236478, 208333, 172680, 132724, 91888, 53429, 20088, -6175, -24337, -34336, -36975,
    -33727, -26472, -17209, -7786, 316, 6128, 9233, 9735, 8145, 5233, 1847, -1236, -3441, -4460,
    -4266, -3074, -1269, 695, 2392, 3499, 3851, 3453, 2458, 1122, -258, -1407, -2125,
];

const RRC_SHIFT: u32 = 5;

/// M17 baseband modulator.
pub struct Modulator {
    rrc: IntegerFir<79>,
    pwm_compensation: bool,
    pwm_state: FilterState,
    invert_phase: bool,
    path: Option<PathId>,
    stream: Option<StreamId>,
}

impl Modulator {
    /// New modulator. `pwm_compensation` enables the output
    /// pre-emphasis stage.
    #[must_use]
    pub fn new(pwm_compensation: bool) -> Self {
        Self {
            rrc: IntegerFir::new(RRC_TAPS, RRC_SHIFT),
            pwm_compensation,
            pwm_state: FilterState::new(),
            invert_phase: false,
            path: None,
            stream: None,
        }
    }

    /// Invert the baseband phase before output.
    pub fn set_invert_phase(&mut self, invert: bool) {
        self.invert_phase = invert;
    }

    /// True between a successful [`Modulator::start`] and the
    /// matching [`Modulator::stop`].
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }

    /// Acquire the baseband output path and open the output stream.
    ///
    /// The only failure the transmit side cannot work around: the
    /// caller abandons the session and may retry later.
    pub fn start(&mut self, audio: &mut Audio) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let path = audio
            .paths
            .request(AudioSource::Mcu, AudioSink::Rtx, AudioPriority::Tx)
            .ok_or(Error::Busy)?;

        let stream = match audio.streams.start(
            &audio.paths,
            &audio.devices,
            path,
            2 * TX_FRAME_SAMPLES,
            TX_SAMPLE_RATE as u32,
            crate::audio_device::StreamMode::output_double(),
        ) {
            Ok(id) => id,
            Err(e) => {
                audio.paths.release(path);
                return Err(e);
            }
        };

        self.rrc.reset();
        self.pwm_state.reset();
        self.path = Some(path);
        self.stream = Some(stream);
        debug!("modulator started");
        Ok(())
    }

    /// Modulate one 48-byte frame into the idle buffer half and hand
    /// it to the output stream, blocking until the driver frees the
    /// next half.
    pub fn send_frame(&mut self, audio: &mut Audio, frame: &Frame) -> Result<()> {
        let stream = self.stream.ok_or(Error::NotPermitted)?;

        let filled = match audio.streams.output_get_idle_buffer(&audio.paths, stream) {
            Some(buffer) => {
                let mut pos = 0;
                for byte in frame {
                    for symbol in byte_to_symbols(*byte) {
                        for k in 0..TX_SAMPLES_PER_SYMBOL {
                            let stuffed = if k == 0 { i32::from(symbol) } else { 0 };
                            let shaped = self.rrc.process(stuffed);
                            buffer[pos] = shaped
                                .clamp(i32::from(Sample::MIN), i32::from(Sample::MAX))
                                as Sample;
                            pos += 1;
                        }
                    }
                }
                if self.pwm_compensation {
                    dsp::pwm_compensate(&mut self.pwm_state, buffer);
                }
                if self.invert_phase {
                    dsp::invert_phase(buffer);
                }
                true
            }
            // Path closed under us: the stream is already gone.
            None => false,
        };
        if !filled {
            self.stream = None;
            self.release_path(audio);
            return Err(Error::NotPermitted);
        }

        if !audio.streams.output_sync(&audio.paths, stream, true) {
            self.stream = None;
            self.release_path(audio);
            return Err(Error::NotPermitted);
        }
        Ok(())
    }

    /// Stop the output stream and release the path.
    pub fn stop(&mut self, audio: &mut Audio) {
        if let Some(stream) = self.stream.take() {
            audio.streams.stop(stream);
        }
        self.release_path(audio);
        debug!("modulator stopped");
    }

    fn release_path(&mut self, audio: &mut Audio) {
        if let Some(path) = self.path.take() {
            audio.paths.release(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_device::BufferOutput;
    use crate::encoder::FrameEncoder;
    use std::sync::Arc;

    fn audio_with_rtx_out() -> (Audio, Arc<BufferOutput>) {
        let mut audio = Audio::new();
        let out = Arc::new(BufferOutput::new(AudioSink::Rtx));
        audio.devices.register_output(out.clone());
        (audio, out)
    }

    #[test]
    fn symbol_mapping() {
        assert_eq!(byte_to_symbols(0x00), [1, 1, 1, 1]);
        assert_eq!(byte_to_symbols(0x77), [3, -3, 3, -3]);
        assert_eq!(byte_to_symbols(0xFF), [-3, -3, -3, -3]);
        assert_eq!(byte_to_symbols(0x1B), [1, 3, -1, -3]);
    }

    #[test]
    fn one_frame_one_buffer_half() {
        let (mut audio, out) = audio_with_rtx_out();
        let mut modulator = Modulator::new(false);
        modulator.start(&mut audio).unwrap();

        let mut frame: Frame = [0; 48];
        FrameEncoder::fill_preamble(&mut frame);
        modulator.send_frame(&mut audio, &frame).unwrap();

        let captured = out.captured();
        let captured = captured.lock().unwrap();
        assert_eq!(captured.len(), TX_FRAME_SAMPLES);
        // The preamble is a strong alternating tone; the shaped
        // baseband must carry real energy.
        let peak = captured.iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert!(peak > 10_000, "peak only {peak}");
    }

    #[test]
    fn start_is_idempotent_and_stop_releases() {
        let (mut audio, _) = audio_with_rtx_out();
        let mut modulator = Modulator::new(false);
        modulator.start(&mut audio).unwrap();
        modulator.start(&mut audio).unwrap();
        assert!(modulator.is_running());

        modulator.stop(&mut audio);
        assert!(!modulator.is_running());

        // The Tx path is free again.
        let path = audio
            .paths
            .request(AudioSource::Mcu, AudioSink::Rtx, AudioPriority::Tx)
            .unwrap();
        audio.paths.release(path);
    }

    #[test]
    fn closed_path_fails_the_session() {
        let (mut audio, _) = audio_with_rtx_out();
        let mut modulator = Modulator::new(false);
        modulator.start(&mut audio).unwrap();

        // Something higher priority cannot exist above Tx, so close
        // the path behind the modulator's back instead.
        let path = modulator.path.unwrap();
        audio.paths.release(path);

        let frame: Frame = [0x77; 48];
        assert!(modulator.send_frame(&mut audio, &frame).is_err());
        assert!(!modulator.is_running());
    }
}
