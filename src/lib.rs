#![warn(missing_docs)]
/*! Core stack for a digital voice transceiver.

This crate implements the M17 digital voice mode, 4-FSK at 4800
symbols per second, together with the plumbing a radio firmware needs
around it: an audio path arbiter, a double-buffered sample streaming
layer, and a SLIP-framed host link multiplexing several maintenance
protocols over one character device.

The pieces compose in two directions, symmetric around the modem:

```text
      [ voice payloads ]                [ 24 kHz baseband in ]
             ↓                                    ↓
      [ Transmitter ]                      [ Demodulator ]
             ↓                                    ↓
      [ FrameEncoder ]                     [ FrameDecoder ]
             ↓                                    ↓
      [ Modulator ]                      [ LSF + stream frames ]
             ↓
      [ 48 kHz baseband out ]
```

Baseband samples move through the [`audio_stream`] layer, which binds
an audio device driver to a path granted by the [`audio_path`]
arbiter. The [`rtx`] module ties everything together into a
periodically-ticked radio task with per-mode state machines, and
[`rtxlink`] serves the host side.

All of the coding blocks (Golay, convolutional code, Viterbi,
puncturing, interleaving, decorrelation) are usable on their own.

# Example

Encoding a link setup frame and the first voice frame of a stream:

```
use rtxcore::encoder::FrameEncoder;
use rtxcore::lsf::{LinkSetupFrame, StreamType};

let mut lsf = LinkSetupFrame::new();
lsf.set_source("AB1CDE")?;
lsf.set_stream_type(StreamType::voice_stream(0));

let mut enc = FrameEncoder::new();
let mut frame = [0u8; 48];
enc.encode_lsf(&mut lsf, &mut frame);

let payload = [0u8; 16];
let number = enc.encode_stream(&payload, &mut frame, false);
assert_eq!(number, 0);
# Ok::<(), rtxcore::Error>(())
```
*/

// DSP primitives.
pub mod dsp;
pub mod fir;
pub mod iir;
pub mod ringbuf;

// M17 data types and coding blocks.
pub mod callsign;
pub mod convolutional;
pub mod crc;
pub mod decorrelator;
pub mod frame;
pub mod golay;
pub mod interleaver;
pub mod lsf;
pub mod puncture;
pub mod viterbi;

// M17 modem.
pub mod correlator;
pub mod decoder;
pub mod demodulator;
pub mod dev_estimator;
pub mod encoder;
pub mod modulator;
pub mod transmitter;

// Audio routing and streaming.
pub mod audio_device;
pub mod audio_path;
pub mod audio_stream;

// Host link.
pub mod chardev;
pub mod dat;
pub mod fmp;
pub mod nvmem;
pub mod rtxlink;
pub mod slip;

// RTX control.
pub mod opmode_fm;
pub mod opmode_m17;
pub mod rtx;

/// Float type used. Usually f32, but not guaranteed.
pub type Float = f32;

/// Baseband audio sample.
pub type Sample = i16;

/// Crate-wide error type.
///
/// Fallible operations either succeed, or fail with one of these
/// conditions. There are no panicking paths reachable from the public
/// API outside of tests.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An argument was out of range or malformed.
    #[error("invalid argument")]
    InvalidArgument,

    /// The operation is not permitted in the current state.
    #[error("operation not permitted")]
    NotPermitted,

    /// A finite resource (stream slot, path, transfer) is in use.
    #[error("resource busy")]
    Busy,

    /// No device serves the requested endpoint.
    #[error("no such device")]
    NoDevice,

    /// A fixed-size buffer ran out of space.
    #[error("out of buffer space")]
    NoMemory,

    /// Transient condition, retry later.
    #[error("try again")]
    Again,

    /// Payload exceeds the maximum frame size.
    #[error("payload too big")]
    TooBig,

    /// Malformed protocol data.
    #[error("protocol error")]
    Protocol,

    /// Error from a host-side character device.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type commonly used in this crate.
pub type Result<T> = std::result::Result<T, Error>;
