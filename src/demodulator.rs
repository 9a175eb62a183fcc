/*! M17 demodulator.

Recovers raw 48-byte frames from a 24 kHz baseband stream, five
samples per symbol. A frame is 192 symbols, 960 samples; the caller
feeds half a frame per update so scheduling lines up with the double
buffer boundary of the input stream.

State machine:

```text
INIT → UNLOCKED → SYNCED → LOCKED ↔ SYNC_UPDATE
          ↑__________________|
```

* `INIT` lets the baseline filter settle.
* `UNLOCKED` cross-correlates against the syncword template at every
  sample position. The link setup syncword is the exact negation of
  the stream syncword, so one template serves both: the sign of the
  correlation peak tells which one went by.
* `SYNCED` re-checks the candidate peak: the eight symbol positions
  must carry the detected syncword's pattern with the right signs.
* `LOCKED` slices one symbol every five samples at the locked phase
  against the deviation estimator thresholds.
* `SYNC_UPDATE` covers the syncword of each following frame:
  deviation and offset estimates are refreshed and the received
  syncword is checked, with a bit error budget, against the known
  patterns. Too many consecutive misses drop back to `UNLOCKED`.

The correlation threshold adapts to the signal level: a syncword must
reach three quarters of the theoretical maximum for the energy
currently in the correlator window.

Platforms whose receive chain inverts the baseband phase set the
`invert_phase` flag; polarity is part of the modulation, so it cannot
be guessed from the signal itself.
*/
use log::{debug, trace};

use crate::Sample;
use crate::correlator::{Correlator, SyncDetector};
use crate::dev_estimator::DevEstimator;
use crate::frame::{
    FRAME_SYMBOLS, Frame, LSF_SYNC_SYMBOLS, LSF_SYNC_WORD, STREAM_SYNC_SYMBOLS, STREAM_SYNC_WORD,
    SYNCWORD_SYMBOLS,
};
use crate::iir::Iir;

/// Baseband sample rate of the receive path.
pub const RX_SAMPLE_RATE: usize = 24_000;

/// Input samples per symbol.
pub const SAMPLES_PER_SYMBOL: usize = RX_SAMPLE_RATE / crate::frame::SYMBOL_RATE;

/// Samples per full frame.
pub const FRAME_SAMPLES: usize = FRAME_SYMBOLS * SAMPLES_PER_SYMBOL;

/// Samples the caller should hand to each [`Demodulator::update`]:
/// half a frame.
pub const UPDATE_SAMPLES: usize = FRAME_SAMPLES / 2;

const SYNCWORD_SAMPLES: usize = SYNCWORD_SYMBOLS * SAMPLES_PER_SYMBOL;

// Samples spent in INIT letting the baseline filter converge.
const INIT_SAMPLES: usize = UPDATE_SAMPLES;

/// Bit error budget when accepting a received syncword, shared by
/// the lock check here and the frame decoder's classification: a
/// frame kept under this budget must also still classify.
pub const MAX_SYNC_ERRORS: u32 = 4;

// Consecutive bad syncwords before giving the lock up.
const MAX_MISSED_SYNCS: u8 = 3;

// Baseline estimation filter, a narrow low-pass biquad at 24 kHz.
const SF_NUM: [f32; 3] = [4.244_336_8e-5, 8.488_673_6e-5, 4.244_336_8e-5];
const SF_DEN: [f32; 3] = [1.0, -1.981_488_5, 0.981_658_28];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DemodState {
    Init,
    Unlocked,
    Synced,
    Locked,
    SyncUpdate,
}

/// M17 baseband demodulator.
pub struct Demodulator {
    state: DemodState,
    init_count: usize,
    baseline_filter: Iir<3>,
    baseline: i32,
    correlator: Correlator<SYNCWORD_SAMPLES>,
    detector: SyncDetector,
    estimator: DevEstimator,
    frame: Frame,
    ready: Frame,
    symbol_index: usize,
    next_sample_in: usize,
    missed_syncs: u8,
}

impl Default for Demodulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Demodulator {
    /// A demodulator in its reset state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: DemodState::Init,
            init_count: INIT_SAMPLES,
            baseline_filter: Iir::new(SF_NUM, SF_DEN),
            baseline: 0,
            correlator: Correlator::new(SAMPLES_PER_SYMBOL),
            detector: SyncDetector::new(SAMPLES_PER_SYMBOL),
            estimator: DevEstimator::new(),
            frame: [0; 48],
            ready: [0; 48],
            symbol_index: 0,
            next_sample_in: 0,
            missed_syncs: 0,
        }
    }

    /// Drop the lock and all signal statistics, returning to `INIT`.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// True once a syncword has been validated and symbols are being
    /// sliced.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        matches!(self.state, DemodState::Locked | DemodState::SyncUpdate)
    }

    /// The last completed raw frame. Valid until the next `update`
    /// that returns `true`.
    #[must_use]
    pub fn frame(&self) -> &Frame {
        &self.ready
    }

    /// Process a chunk of baseband, normally [`UPDATE_SAMPLES`] of
    /// it. Returns `true` when a frame completed during this call.
    pub fn update(&mut self, samples: &[Sample], invert_phase: bool) -> bool {
        let mut new_frame = false;
        for raw in samples {
            let raw = if invert_phase {
                i32::from(*raw).saturating_neg()
            } else {
                i32::from(*raw)
            };
            if self.process_sample(raw) {
                new_frame = true;
            }
        }
        new_frame
    }

    fn process_sample(&mut self, raw: i32) -> bool {
        // The baseline tracker only runs while searching: the
        // preamble is zero-mean at symbol rate, so the narrow
        // low-pass converges on the true DC level. Once locked the
        // deviation estimator's zero offset takes over; letting the
        // tracker run on payload would make it follow symbol runs.
        if matches!(self.state, DemodState::Init | DemodState::Unlocked) {
            self.baseline = self.baseline_filter.process(raw as f32) as i32;
        }
        let value = raw - self.baseline;
        self.correlator.sample(value);

        match self.state {
            DemodState::Init => {
                self.init_count -= 1;
                if self.init_count == 0 {
                    trace!("demodulator: INIT done");
                    self.state = DemodState::Unlocked;
                }
                false
            }
            DemodState::Unlocked => {
                self.search_syncword();
                false
            }
            DemodState::Synced => {
                // Candidate validation happens inline when the
                // correlation peak is pinned down; the state only
                // shows up transiently.
                false
            }
            DemodState::Locked | DemodState::SyncUpdate => self.process_locked(value),
        }
    }

    fn search_syncword(&mut self) {
        let threshold = 9 * self.correlator.magnitude_sum(SYNCWORD_SYMBOLS) / 4;
        let conv = self.correlator.convolve(&STREAM_SYNC_SYMBOLS);
        if let Some(event) = self.detector.update(conv, threshold) {
            // The template matches the stream syncword on a positive
            // peak; a negative one is the link setup syncword.
            if event.negative {
                self.try_lock(event.delay, &LSF_SYNC_SYMBOLS, LSF_SYNC_WORD);
            } else {
                self.try_lock(event.delay, &STREAM_SYNC_SYMBOLS, STREAM_SYNC_WORD);
            }
        }
    }

    /// Validate a correlation peak: the eight symbol-spaced samples
    /// behind it must carry the syncword pattern. On success the
    /// symbol phase and initial deviation both fall out of the same
    /// window.
    fn try_lock(&mut self, delay: usize, symbols: &[i8; 8], syncword: [u8; 2]) {
        self.state = DemodState::Synced;

        let mut pos_sum = 0i32;
        let mut neg_sum = 0i32;
        let mut valid = true;
        for (j, sym) in symbols.iter().enumerate() {
            let v = self
                .correlator
                .sample_at(delay + (7 - j) * SAMPLES_PER_SYMBOL);
            if *sym > 0 {
                valid &= v > 0;
                pos_sum += v;
            } else {
                valid &= v < 0;
                neg_sum += v;
            }
        }

        if !valid {
            trace!("demodulator: candidate failed symbol check");
            self.state = DemodState::Unlocked;
            return;
        }

        debug!("demodulator: locked, sampling phase {delay}");
        self.state = DemodState::Locked;
        self.estimator.init((pos_sum / 4, neg_sum / 4));
        self.frame[..2].copy_from_slice(&syncword);
        self.symbol_index = SYNCWORD_SYMBOLS;
        self.next_sample_in = SAMPLES_PER_SYMBOL - delay;
        self.missed_syncs = 0;
        self.detector.reset();
    }

    fn process_locked(&mut self, value: i32) -> bool {
        self.next_sample_in -= 1;
        if self.next_sample_in > 0 {
            return false;
        }
        self.next_sample_in = SAMPLES_PER_SYMBOL;

        let symbol = self.slice(value);
        self.estimator.sample(value);
        self.push_dibit(symbol);

        if self.symbol_index == SYNCWORD_SYMBOLS && self.state == DemodState::SyncUpdate {
            self.state = DemodState::Locked;
            if !self.check_syncword() {
                debug!("demodulator: sync lost");
                self.unlock();
                return false;
            }
        }

        if self.symbol_index == FRAME_SYMBOLS {
            self.ready = self.frame;
            self.symbol_index = 0;
            self.estimator.update();
            self.state = DemodState::SyncUpdate;
            return true;
        }
        false
    }

    fn unlock(&mut self) {
        self.state = DemodState::Unlocked;
        self.symbol_index = 0;
        self.missed_syncs = 0;
        self.detector.reset();
    }

    fn slice(&self, value: i32) -> i8 {
        let (pos, neg) = self.estimator.outer_deviation();
        let v = value - self.estimator.zero_offset();
        if v > 2 * pos / 3 {
            3
        } else if v > 0 {
            1
        } else if v > 2 * neg / 3 {
            -1
        } else {
            -3
        }
    }

    fn push_dibit(&mut self, symbol: i8) {
        let dibit: u8 = match symbol {
            3 => 0b01,
            1 => 0b00,
            -1 => 0b10,
            _ => 0b11,
        };
        let byte = self.symbol_index / 4;
        let shift = 6 - 2 * (self.symbol_index % 4);
        self.frame[byte] = (self.frame[byte] & !(0b11 << shift)) | (dibit << shift);
        self.symbol_index += 1;
    }

    /// The syncword slots of every following frame are re-sliced like
    /// payload; accept them within a small bit error budget.
    fn check_syncword(&mut self) -> bool {
        let got = u16::from_be_bytes([self.frame[0], self.frame[1]]);
        let distance = [LSF_SYNC_WORD, STREAM_SYNC_WORD]
            .iter()
            .map(|w| (u16::from_be_bytes(*w) ^ got).count_ones())
            .min()
            .unwrap_or(u32::MAX);

        if distance <= MAX_SYNC_ERRORS {
            self.missed_syncs = 0;
            return true;
        }
        self.missed_syncs += 1;
        trace!("demodulator: missed sync {}", self.missed_syncs);
        self.missed_syncs < MAX_MISSED_SYNCS
    }
}
