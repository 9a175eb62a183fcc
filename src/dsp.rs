/*! Signal conditioning helpers for the baseband paths.

These operate in place on sample buffers and keep their state in an
explicit [`FilterState`], so one instance can be carried across
buffer-sized chunks of a continuous stream.
*/
use crate::{Float, Sample};

/// State of a first/second order conditioning filter across calls.
#[derive(Default)]
pub struct FilterState {
    u: [Float; 3],
    y: [Float; 3],
    initialised: bool,
}

impl FilterState {
    /// Fresh, zeroed state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the state variables.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Remove the DC offset from a buffer of samples, in place.
///
/// Single pole DC blocker, `y[k] = x[k] - x[k-1] + α·y[k-1]`.
pub fn dc_removal(state: &mut FilterState, buffer: &mut [Sample]) {
    const ALPHA: Float = 0.999;

    for sample in buffer.iter_mut() {
        let x = Float::from(*sample);
        if !state.initialised {
            // Seed the history so the first buffer does not start
            // with a full-scale step.
            state.u[0] = x;
            state.y[0] = 0.0;
            state.initialised = true;
        }
        let y = x - state.u[0] + ALPHA * state.y[0];
        state.u[0] = x;
        state.y[0] = y;
        *sample = clamp_sample(y);
    }
}

// Pole of the PWM output reconstruction filter at 4.8 kHz, sampled at
// 48 kHz: alpha = exp(-2*pi*4800/48000).
const PWM_POLE: Float = 0.533_488;

/// Pre-emphasise a buffer so that the PWM reconstruction filter on
/// the output stage yields a flat response, in place.
pub fn pwm_compensate(state: &mut FilterState, buffer: &mut [Sample]) {
    for sample in buffer.iter_mut() {
        let x = Float::from(*sample);
        if !state.initialised {
            state.u[0] = x;
            state.initialised = true;
        }
        let y = (x - PWM_POLE * state.u[0]) / (1.0 - PWM_POLE);
        state.u[0] = x;
        *sample = clamp_sample(y);
    }
}

/// Invert the phase of a sample buffer, in place.
pub fn invert_phase(buffer: &mut [Sample]) {
    for sample in buffer.iter_mut() {
        *sample = sample.saturating_neg();
    }
}

fn clamp_sample(value: Float) -> Sample {
    value.clamp(Float::from(Sample::MIN), Float::from(Sample::MAX)) as Sample
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dc_removal_kills_constant_offset() {
        let mut state = FilterState::new();
        let mut buf = [1000i16; 512];
        dc_removal(&mut state, &mut buf);
        // After settling, a constant input maps to (almost) zero.
        assert!(buf[511].abs() < 10, "residual dc {}", buf[511]);
    }

    #[test]
    fn dc_removal_keeps_ac() {
        let mut state = FilterState::new();
        let mut buf = [0i16; 256];
        for (i, s) in buf.iter_mut().enumerate() {
            *s = if i % 2 == 0 { 4000 } else { -4000 };
        }
        dc_removal(&mut state, &mut buf);
        // The alternating component survives with roughly its level.
        assert!(buf[255].unsigned_abs() > 3000);
    }

    #[test]
    fn invert() {
        let mut buf = [100, -200, i16::MIN];
        invert_phase(&mut buf);
        assert_eq!(buf, [-100, 200, i16::MAX]);
    }

    #[test]
    fn pwm_flattens_its_own_pole() {
        // Compensator followed by the modelled RC pole is identity.
        let mut state = FilterState::new();
        let mut buf = [0i16; 64];
        for (i, s) in buf.iter_mut().enumerate() {
            *s = (i as i16) * 100;
        }
        let original = buf;
        pwm_compensate(&mut state, &mut buf);

        let mut y = Float::from(original[0]);
        for (i, s) in buf.iter().enumerate() {
            y = (1.0 - PWM_POLE) * Float::from(*s) + PWM_POLE * y;
            assert!(
                (y - Float::from(original[i])).abs() < 2.0,
                "sample {i}: {} vs {}",
                y,
                original[i]
            );
        }
    }
}
