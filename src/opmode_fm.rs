/*! Analog FM operating mode.

The per-tick state machine for plain FM: carrier squelch with a
little hysteresis on the RSSI, receive audio routed to the speaker
through the arbiter while the squelch is open, microphone routed to
the modulator on PTT.
*/
use log::debug;

use crate::audio_path::{AudioPriority, AudioSink, AudioSource, PathId};
use crate::audio_stream::Audio;
use crate::rtx::{OpStatus, Radio, RtxStatus};

/// FM mode handler.
#[derive(Default)]
pub struct OpModeFm {
    sql_open: bool,
    enter_rx: bool,
    speaker_path: Option<PathId>,
    mic_path: Option<PathId>,
}

impl OpModeFm {
    /// New, disabled handler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called when the mode becomes active: close the squelch and
    /// arm the RX entry.
    pub fn enable(&mut self) {
        self.sql_open = false;
        self.enter_rx = true;
    }

    /// Called when the mode is left. Audio paths go away and the
    /// radio stage is shut off.
    pub fn disable(&mut self, audio: &mut Audio, radio: &mut dyn Radio) {
        self.release_speaker(audio);
        self.release_mic(audio);
        radio.disable();
        self.sql_open = false;
        self.enter_rx = false;
    }

    /// Squelch state.
    #[must_use]
    pub fn squelch_open(&self) -> bool {
        self.sql_open
    }

    /// One tick of the FM state machine.
    pub fn update(
        &mut self,
        status: &mut RtxStatus,
        rssi: f32,
        audio: &mut Audio,
        radio: &mut dyn Radio,
    ) {
        // RX logic: squelch level 0..15 maps onto -127..-61 dBm with
        // 0.1 dB of hysteresis around the threshold.
        if status.op_status == OpStatus::Rx {
            let squelch = -127.0 + f32::from(status.sql_level) * 66.0 / 15.0;

            if !self.sql_open && rssi > squelch + 0.1 {
                self.speaker_path =
                    audio
                        .paths
                        .request(AudioSource::Rtx, AudioSink::Speaker, AudioPriority::Rx);
                self.sql_open = true;
                debug!("fm: squelch open ({rssi:.1} dBm)");
            }

            if self.sql_open && rssi < squelch - 0.1 {
                self.release_speaker(audio);
                self.sql_open = false;
                debug!("fm: squelch closed");
            }
        } else if status.op_status == OpStatus::Off && self.enter_rx {
            radio.disable();
            radio.enable_rx();
            status.op_status = OpStatus::Rx;
            self.enter_rx = false;
        }

        // TX logic.
        if status.ptt && status.op_status != OpStatus::Tx && !status.tx_disable {
            self.release_speaker(audio);
            self.sql_open = false;
            radio.disable();

            self.mic_path =
                audio
                    .paths
                    .request(AudioSource::Mic, AudioSink::Rtx, AudioPriority::Tx);
            radio.enable_tx();
            status.op_status = OpStatus::Tx;
        }

        if !status.ptt && status.op_status == OpStatus::Tx {
            self.release_mic(audio);
            radio.disable();
            status.op_status = OpStatus::Off;
            self.enter_rx = true;
        }
    }

    fn release_speaker(&mut self, audio: &mut Audio) {
        if let Some(path) = self.speaker_path.take() {
            audio.paths.release(path);
        }
    }

    fn release_mic(&mut self, audio: &mut Audio) {
        if let Some(path) = self.mic_path.take() {
            audio.paths.release(path);
        }
    }
}
