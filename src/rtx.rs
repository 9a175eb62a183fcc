/*! RTX control task.

Owns the radio configuration and the per-mode state machines and gets
ticked periodically. Configuration changes arrive through a one-slot
mailbox: a writer that posts twice before the task runs simply
replaces the pending value, so the radio always picks up the most
recent settings.

The operating modes are a closed set, dispatched as an enum rather
than through a vtable: the match in [`OpMode::update`] is the whole
dispatch table.
*/
use std::sync::{Arc, Mutex};

use log::info;

use crate::audio_stream::Audio;
use crate::opmode_fm::OpModeFm;
use crate::opmode_m17::{OpModeM17, VoiceBuffer};

/// Operating mode selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpModeId {
    /// No mode active.
    #[default]
    None,
    /// Analog FM.
    Fm,
    /// DMR. Recognised but not serviced by this core.
    Dmr,
    /// M17 digital voice.
    M17,
}

/// Operating status of the radio stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpStatus {
    /// Idle.
    #[default]
    Off,
    /// Receiving.
    Rx,
    /// Transmitting.
    Tx,
}

/// Channel bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Bandwidth {
    /// 12.5 kHz.
    B12_5,
    /// 20 kHz.
    B20,
    /// 25 kHz.
    #[default]
    B25,
}

/// The RTX configuration and status block.
#[derive(Debug, Clone)]
pub struct RtxStatus {
    /// Selected operating mode.
    pub op_mode: OpModeId,
    /// Channel bandwidth.
    pub bandwidth: Bandwidth,
    /// Receive frequency, Hz.
    pub rx_frequency: u32,
    /// Transmit frequency, Hz.
    pub tx_frequency: u32,
    /// Transmit power, watts.
    pub tx_power: f32,
    /// Squelch level, 0..15.
    pub sql_level: u8,
    /// CTCSS squelch enabled (FM only).
    pub rx_tone_en: bool,
    /// CTCSS receive tone, 0.1 Hz units.
    pub rx_tone: u16,
    /// CTCSS tone transmission enabled (FM only).
    pub tx_tone_en: bool,
    /// CTCSS transmit tone, 0.1 Hz units.
    pub tx_tone: u16,
    /// Transmission inhibited.
    pub tx_disable: bool,
    /// Push-to-talk asserted.
    pub ptt: bool,
    /// Own callsign for M17.
    pub source_address: String,
    /// Destination callsign for M17; empty selects broadcast.
    pub destination_address: String,
    /// Invert the receive baseband phase (M17).
    pub invert_rx_phase: bool,
    /// Current operating status, managed by the mode handler.
    pub op_status: OpStatus,
}

impl Default for RtxStatus {
    fn default() -> Self {
        Self {
            op_mode: OpModeId::None,
            bandwidth: Bandwidth::B25,
            rx_frequency: 430_000_000,
            tx_frequency: 430_000_000,
            tx_power: 0.0,
            sql_level: 1,
            rx_tone_en: false,
            rx_tone: 0,
            tx_tone_en: false,
            tx_tone: 0,
            tx_disable: false,
            ptt: false,
            source_address: String::new(),
            destination_address: String::new(),
            invert_rx_phase: false,
            op_status: OpStatus::Off,
        }
    }
}

/// One-slot configuration mailbox: the newest posted value wins.
#[derive(Default)]
pub struct ConfigMailbox {
    slot: Mutex<Option<RtxStatus>>,
}

impl ConfigMailbox {
    /// New, empty mailbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Post a configuration, replacing any pending one.
    pub fn post(&self, cfg: RtxStatus) {
        let mut slot = self.slot.lock().unwrap_or_else(|p| p.into_inner());
        *slot = Some(cfg);
    }

    /// Take the pending configuration, if any.
    #[must_use]
    pub fn take(&self) -> Option<RtxStatus> {
        self.slot
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
    }
}

/// Low-level radio stage as seen by the control task. Implemented by
/// the platform layer.
pub trait Radio: Send {
    /// Tell the hardware which mode it will run.
    fn set_opmode(&mut self, mode: OpModeId);

    /// Apply a new configuration (frequencies, power, tones).
    fn update_config(&mut self, status: &RtxStatus);

    /// Current received signal strength, dBm.
    fn rssi(&mut self) -> f32;

    /// Open the receiver.
    fn enable_rx(&mut self);

    /// Key the transmitter.
    fn enable_tx(&mut self);

    /// Shut both directions off.
    fn disable(&mut self);
}

/// Radio stage that does nothing; host builds and tests.
pub struct NullRadio;

impl Radio for NullRadio {
    fn set_opmode(&mut self, _mode: OpModeId) {}
    fn update_config(&mut self, _status: &RtxStatus) {}
    fn rssi(&mut self) -> f32 {
        -127.0
    }
    fn enable_rx(&mut self) {}
    fn enable_tx(&mut self) {}
    fn disable(&mut self) {}
}

/// The closed set of mode handlers.
pub enum OpMode {
    /// No mode: every tick is a no-op.
    None,
    /// Analog FM.
    Fm(OpModeFm),
    /// M17 digital voice.
    M17(Box<OpModeM17>),
}

impl OpMode {
    fn id(&self) -> OpModeId {
        match self {
            OpMode::None => OpModeId::None,
            OpMode::Fm(_) => OpModeId::Fm,
            OpMode::M17(_) => OpModeId::M17,
        }
    }

    fn enable(&mut self) {
        match self {
            OpMode::None => {}
            OpMode::Fm(fm) => fm.enable(),
            OpMode::M17(m17) => m17.enable(),
        }
    }

    fn disable(&mut self, audio: &mut Audio, radio: &mut dyn Radio) {
        match self {
            OpMode::None => {}
            OpMode::Fm(fm) => fm.disable(audio, radio),
            OpMode::M17(m17) => m17.disable(audio, radio),
        }
    }

    fn update(
        &mut self,
        status: &mut RtxStatus,
        rssi: f32,
        audio: &mut Audio,
        radio: &mut dyn Radio,
    ) {
        match self {
            OpMode::None => {}
            OpMode::Fm(fm) => fm.update(status, rssi, audio, radio),
            OpMode::M17(m17) => m17.update(status, audio, radio),
        }
    }
}

/// The RTX control task.
pub struct Rtx {
    status: RtxStatus,
    mailbox: Arc<ConfigMailbox>,
    mode: OpMode,
    rssi: f32,
    reinit_filter: bool,
    radio: Box<dyn Radio>,
    voice: Arc<VoiceBuffer>,
    pwm_compensation: bool,
    /// The audio subsystem, owned by this task.
    pub audio: Audio,
}

impl Rtx {
    /// Bring up the control task.
    ///
    /// `voice` is the codec hand-off buffer the M17 mode transmits
    /// from; `pwm_compensation` is forwarded to the modulator.
    pub fn new(
        mailbox: Arc<ConfigMailbox>,
        radio: Box<dyn Radio>,
        audio: Audio,
        voice: Arc<VoiceBuffer>,
        pwm_compensation: bool,
    ) -> Self {
        let mut rtx = Self {
            status: RtxStatus::default(),
            mailbox,
            mode: OpMode::None,
            rssi: -127.0,
            reinit_filter: false,
            radio,
            voice,
            pwm_compensation,
            audio,
        };
        rtx.radio.update_config(&rtx.status);
        rtx.rssi = rtx.radio.rssi();
        rtx
    }

    /// Snapshot of the current configuration and status.
    #[must_use]
    pub fn current_status(&self) -> RtxStatus {
        self.status.clone()
    }

    /// Filtered RSSI, dBm.
    #[must_use]
    pub fn rssi(&self) -> f32 {
        self.rssi
    }

    /// Access the active M17 handler, when that mode is selected.
    #[must_use]
    pub fn m17(&self) -> Option<&OpModeM17> {
        match &self.mode {
            OpMode::M17(m17) => Some(m17),
            _ => None,
        }
    }

    /// Shut the task down: disable the active mode and the radio.
    pub fn terminate(&mut self) {
        self.status.op_status = OpStatus::Off;
        self.status.op_mode = OpModeId::None;
        self.mode.disable(&mut self.audio, self.radio.as_mut());
        self.mode = OpMode::None;
        self.radio.disable();
    }

    /// One tick of the control task: apply pending configuration,
    /// filter the RSSI, run the active mode's state machine.
    pub fn task(&mut self) {
        let reconfigure = self.apply_pending_config();

        // RSSI low-pass, time constant around 60 ms at the usual tick
        // rate. Skipped right after a reconfiguration since many
        // radio chips report full-scale garbage for a moment, and
        // re-seeded whenever the stage returns to RX.
        if self.status.op_status == OpStatus::Rx {
            if !reconfigure {
                if self.reinit_filter {
                    self.rssi = self.radio.rssi();
                    self.reinit_filter = false;
                } else {
                    self.rssi = 0.74 * self.radio.rssi() + 0.26 * self.rssi;
                }
            }
        } else {
            self.reinit_filter = true;
        }

        let Self {
            status,
            mode,
            audio,
            radio,
            rssi,
            ..
        } = self;
        mode.update(status, *rssi, audio, radio.as_mut());
    }

    fn apply_pending_config(&mut self) -> bool {
        let Some(new_cfg) = self.mailbox.take() else {
            return false;
        };

        // The mode handler owns the operating status; everything else
        // is replaced wholesale.
        let op_status = self.status.op_status;
        self.status = new_cfg;
        self.status.op_status = op_status;

        // Tone squelch is an FM thing.
        if self.status.op_mode != OpModeId::Fm {
            self.status.rx_tone_en = false;
            self.status.tx_tone_en = false;
        }

        if self.mode.id() != self.status.op_mode {
            self.switch_mode();
        }

        self.radio.update_config(&self.status);
        true
    }

    fn switch_mode(&mut self) {
        info!("rtx: switching to {:?}", self.status.op_mode);
        self.radio.set_opmode(self.status.op_mode);

        self.mode.disable(&mut self.audio, self.radio.as_mut());
        self.status.op_status = OpStatus::Off;

        self.mode = match self.status.op_mode {
            OpModeId::Fm => OpMode::Fm(OpModeFm::new()),
            OpModeId::M17 => OpMode::M17(Box::new(OpModeM17::new(
                self.voice.clone(),
                self.pwm_compensation,
            ))),
            // DMR has no handler in this core; it behaves like None.
            OpModeId::None | OpModeId::Dmr => OpMode::None,
        };
        self.mode.enable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_device::{BufferInput, BufferOutput};
    use crate::audio_path::{AudioSink, AudioSource};
    use std::sync::Mutex as StdMutex;

    struct ScriptRadio {
        rssi: Arc<StdMutex<f32>>,
        log: Arc<StdMutex<Vec<String>>>,
    }

    impl Radio for ScriptRadio {
        fn set_opmode(&mut self, mode: OpModeId) {
            self.log.lock().unwrap().push(format!("opmode {mode:?}"));
        }
        fn update_config(&mut self, _status: &RtxStatus) {
            self.log.lock().unwrap().push("config".into());
        }
        fn rssi(&mut self) -> f32 {
            *self.rssi.lock().unwrap()
        }
        fn enable_rx(&mut self) {
            self.log.lock().unwrap().push("rx".into());
        }
        fn enable_tx(&mut self) {
            self.log.lock().unwrap().push("tx".into());
        }
        fn disable(&mut self) {
            self.log.lock().unwrap().push("off".into());
        }
    }

    fn setup() -> (Rtx, Arc<ConfigMailbox>, Arc<StdMutex<f32>>, Arc<StdMutex<Vec<String>>>) {
        let mut audio = Audio::new();
        audio
            .devices
            .register_output(Arc::new(BufferOutput::new(AudioSink::Rtx)));
        audio
            .devices
            .register_input(Arc::new(BufferInput::new(AudioSource::Rtx)));

        let rssi = Arc::new(StdMutex::new(-127.0f32));
        let log = Arc::new(StdMutex::new(Vec::new()));
        let radio = ScriptRadio {
            rssi: rssi.clone(),
            log: log.clone(),
        };
        let mailbox = Arc::new(ConfigMailbox::new());
        let rtx = Rtx::new(
            mailbox.clone(),
            Box::new(radio),
            audio,
            Arc::new(VoiceBuffer::new()),
            false,
        );
        (rtx, mailbox, rssi, log)
    }

    #[test]
    fn mailbox_newest_wins() {
        let mb = ConfigMailbox::new();
        mb.post(RtxStatus {
            sql_level: 3,
            ..RtxStatus::default()
        });
        mb.post(RtxStatus {
            sql_level: 9,
            ..RtxStatus::default()
        });
        assert_eq!(mb.take().unwrap().sql_level, 9);
        assert!(mb.take().is_none());
    }

    #[test]
    fn mode_switch_disables_old_and_enables_new() {
        let (mut rtx, mailbox, _, log) = setup();
        mailbox.post(RtxStatus {
            op_mode: OpModeId::M17,
            source_address: "AB1CDE".into(),
            ..RtxStatus::default()
        });
        rtx.task();
        assert!(rtx.m17().is_some());
        assert_eq!(rtx.current_status().op_status, OpStatus::Rx);
        assert!(log.lock().unwrap().iter().any(|e| e == "opmode M17"));

        mailbox.post(RtxStatus {
            op_mode: OpModeId::Fm,
            ..RtxStatus::default()
        });
        rtx.task();
        assert!(rtx.m17().is_none());
    }

    #[test]
    fn tones_forced_off_outside_fm() {
        let (mut rtx, mailbox, _, _) = setup();
        mailbox.post(RtxStatus {
            op_mode: OpModeId::M17,
            rx_tone_en: true,
            tx_tone_en: true,
            source_address: "AB1CDE".into(),
            ..RtxStatus::default()
        });
        rtx.task();
        let status = rtx.current_status();
        assert!(!status.rx_tone_en);
        assert!(!status.tx_tone_en);
    }

    #[test]
    fn rssi_filter_settles() {
        let (mut rtx, mailbox, rssi, _) = setup();
        mailbox.post(RtxStatus {
            op_mode: OpModeId::Fm,
            ..RtxStatus::default()
        });
        rtx.task(); // reconfigure, mode off -> rx on this tick
        *rssi.lock().unwrap() = -80.0;
        for _ in 0..20 {
            rtx.task();
        }
        assert!((rtx.rssi() - -80.0).abs() < 0.5, "rssi {}", rtx.rssi());
    }

    #[test]
    fn dmr_falls_back_to_no_mode() {
        let (mut rtx, mailbox, _, _) = setup();
        mailbox.post(RtxStatus {
            op_mode: OpModeId::Dmr,
            ..RtxStatus::default()
        });
        rtx.task();
        assert_eq!(rtx.current_status().op_status, OpStatus::Off);
    }

    #[test]
    fn terminate_shuts_everything_off() {
        let (mut rtx, mailbox, _, log) = setup();
        mailbox.post(RtxStatus {
            op_mode: OpModeId::M17,
            source_address: "AB1CDE".into(),
            ..RtxStatus::default()
        });
        rtx.task();
        rtx.terminate();
        assert_eq!(rtx.current_status().op_mode, OpModeId::None);
        assert!(log.lock().unwrap().iter().any(|e| e == "off"));
    }
}
