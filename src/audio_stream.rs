/*! Sample streaming layer.

Binds an open audio path to the device serving its endpoint and moves
samples through a (usually double-buffered) buffer owned by the
stream slot. At most [`MAX_STREAMS`] streams exist at a time.

Every data or sync call first re-checks that the underlying path is
still open: a path that got released or suspended tears the stream
down transparently and the caller sees `None`. That is the
cancellation mechanism for the whole audio side: long-running
transfers end as soon as the arbiter takes their path away.
*/
use log::{debug, info};

use crate::audio_device::{AudioDeviceList, Endpoint, StreamCtx, StreamDir, StreamMode};
use crate::audio_path::{AudioPaths, PathId, PathStatus};
use crate::{Error, Result, Sample};

/// Maximum number of concurrently open streams.
pub const MAX_STREAMS: usize = 3;

/// Handle to an open stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamId(usize);

struct StreamSlot {
    dev: std::sync::Arc<dyn crate::audio_device::AudioDevice>,
    ctx: StreamCtx,
    path: PathId,
}

/// The stream table.
#[derive(Default)]
pub struct AudioStreams {
    slots: [Option<StreamSlot>; MAX_STREAMS],
}

impl AudioStreams {
    /// Empty stream table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a stream of `len` samples over `path`.
    ///
    /// The device is picked by matching the path's source (input) or
    /// sink (output) endpoint against the registry. Fails with
    /// [`Error::NotPermitted`] if the path is not open,
    /// [`Error::NoDevice`] if no device serves the endpoint and
    /// [`Error::Busy`] when all slots are taken.
    pub fn start(
        &mut self,
        paths: &AudioPaths,
        devices: &AudioDeviceList,
        path: PathId,
        len: usize,
        sample_rate: u32,
        mode: StreamMode,
    ) -> Result<StreamId> {
        if len == 0 {
            return Err(Error::InvalidArgument);
        }

        let info = paths.info(path).ok_or(Error::NotPermitted)?;
        if info.status != PathStatus::Open {
            return Err(Error::NotPermitted);
        }

        let endpoint = match mode.dir {
            StreamDir::Input => Endpoint::Source(info.source),
            StreamDir::Output => Endpoint::Sink(info.sink),
        };
        let dev = devices.find(mode.dir, endpoint).ok_or(Error::NoDevice)?;

        let slot_index = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(Error::Busy)?;

        let mut ctx = StreamCtx {
            buffer: vec![0; len],
            buf_mode: mode.buffering,
            sample_rate,
            running: false,
            idle_half: 0,
        };
        dev.start(&mut ctx)?;

        debug!("stream {slot_index} started on path {path:?}, {len} samples @ {sample_rate} Hz");
        self.slots[slot_index] = Some(StreamSlot { dev, ctx, path });
        Ok(StreamId(slot_index))
    }

    /// Check that the stream's path is still open; tear the stream
    /// down if not.
    fn validate(&mut self, paths: &AudioPaths, id: StreamId) -> bool {
        let Some(slot) = self.slots.get_mut(id.0).and_then(|s| s.as_mut()) else {
            return false;
        };
        if paths.status(slot.path) == PathStatus::Open {
            return true;
        }

        info!("stream {} lost its path, terminating", id.0);
        slot.dev.terminate(&mut slot.ctx);
        self.slots[id.0] = None;
        false
    }

    /// Fetch the freshly captured block of an input stream.
    ///
    /// Returns `None` when no data is available, tearing the stream
    /// down first if its path closed.
    pub fn input_get_data(&mut self, paths: &AudioPaths, id: StreamId) -> Option<&[Sample]> {
        if !self.validate(paths, id) {
            return None;
        }
        let slot = self.slots[id.0].as_mut()?;
        slot.dev.sync(&mut slot.ctx, false).ok()?;
        let range = slot.dev.data(&mut slot.ctx).ok()?;
        Some(&slot.ctx.buffer[range])
    }

    /// Fetch the idle (application-owned) half of an output stream.
    pub fn output_get_idle_buffer(
        &mut self,
        paths: &AudioPaths,
        id: StreamId,
    ) -> Option<&mut [Sample]> {
        if !self.validate(paths, id) {
            return None;
        }
        let slot = self.slots[id.0].as_mut()?;
        let range = slot.dev.data(&mut slot.ctx).ok()?;
        Some(&mut slot.ctx.buffer[range])
    }

    /// Wait for the device to finish the buffer in flight.
    /// `buf_changed` tells the driver the idle half was refilled.
    pub fn output_sync(&mut self, paths: &AudioPaths, id: StreamId, buf_changed: bool) -> bool {
        if !self.validate(paths, id) {
            return false;
        }
        let Some(slot) = self.slots[id.0].as_mut() else {
            return false;
        };
        slot.dev.sync(&mut slot.ctx, buf_changed).is_ok()
    }

    /// Stop a stream, letting the transfer drain.
    pub fn stop(&mut self, id: StreamId) {
        if let Some(slot) = self.slots.get_mut(id.0).and_then(|s| s.as_mut()) {
            slot.dev.stop(&mut slot.ctx);
            let _ = slot.dev.sync(&mut slot.ctx, false);
            self.slots[id.0] = None;
        }
    }

    /// Abort a stream without draining.
    pub fn terminate(&mut self, id: StreamId) {
        if let Some(slot) = self.slots.get_mut(id.0).and_then(|s| s.as_mut()) {
            slot.dev.terminate(&mut slot.ctx);
            self.slots[id.0] = None;
        }
    }
}

/// The audio subsystem: arbiter, device registry and stream table,
/// passed as one unit to whatever task owns the audio side.
#[derive(Default)]
pub struct Audio {
    /// Path arbiter.
    pub paths: AudioPaths,
    /// Platform device registry.
    pub devices: AudioDeviceList,
    /// Stream table.
    pub streams: AudioStreams,
}

impl Audio {
    /// Audio subsystem with the default compatibility oracle and no
    /// devices.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_device::{BufferInput, BufferOutput};
    use crate::audio_path::{AudioPriority, AudioSink, AudioSource};
    use std::sync::Arc;

    fn audio_with_devices() -> (Audio, Arc<BufferOutput>, Arc<BufferInput>) {
        let mut audio = Audio::new();
        let out = Arc::new(BufferOutput::new(AudioSink::Rtx));
        let input = Arc::new(BufferInput::new(AudioSource::Rtx));
        audio.devices.register_output(out.clone());
        audio.devices.register_input(input.clone());
        (audio, out, input)
    }

    #[test]
    fn output_stream_moves_samples() {
        let (mut audio, out, _) = audio_with_devices();
        let path = audio
            .paths
            .request(AudioSource::Mcu, AudioSink::Rtx, AudioPriority::Tx)
            .unwrap();
        let id = audio
            .streams
            .start(
                &audio.paths,
                &audio.devices,
                path,
                8,
                48_000,
                StreamMode::output_double(),
            )
            .unwrap();

        let buf = audio
            .streams
            .output_get_idle_buffer(&audio.paths, id)
            .unwrap();
        buf.copy_from_slice(&[9, 9, 9, 9]);
        assert!(audio.streams.output_sync(&audio.paths, id, true));
        assert_eq!(*out.captured().lock().unwrap(), vec![9, 9, 9, 9]);
    }

    #[test]
    fn input_stream_reads_samples() {
        let (mut audio, _, input) = audio_with_devices();
        input.push_samples(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let path = audio
            .paths
            .request(AudioSource::Rtx, AudioSink::Mcu, AudioPriority::Rx)
            .unwrap();
        let id = audio
            .streams
            .start(
                &audio.paths,
                &audio.devices,
                path,
                8,
                24_000,
                StreamMode::input_double(),
            )
            .unwrap();

        let block = audio.streams.input_get_data(&audio.paths, id).unwrap();
        assert_eq!(block, &[1, 2, 3, 4]);
    }

    #[test]
    fn closed_path_tears_stream_down() {
        let (mut audio, _, _) = audio_with_devices();
        let path = audio
            .paths
            .request(AudioSource::Mcu, AudioSink::Rtx, AudioPriority::Tx)
            .unwrap();
        let id = audio
            .streams
            .start(
                &audio.paths,
                &audio.devices,
                path,
                8,
                48_000,
                StreamMode::output_double(),
            )
            .unwrap();

        audio.paths.release(path);
        assert!(
            audio
                .streams
                .output_get_idle_buffer(&audio.paths, id)
                .is_none()
        );
        // Idempotent: the slot is gone, further calls stay None.
        assert!(
            audio
                .streams
                .output_get_idle_buffer(&audio.paths, id)
                .is_none()
        );
        assert!(!audio.streams.output_sync(&audio.paths, id, false));
    }

    #[test]
    fn slot_exhaustion_reports_busy() {
        let mut audio = Audio::new();
        for _ in 0..MAX_STREAMS + 1 {
            audio
                .devices
                .register_output(Arc::new(BufferOutput::new(AudioSink::Speaker)));
        }
        // Distinct compatible paths: same sink would conflict, so use
        // a permissive oracle.
        let audio_paths = AudioPaths::new(|_, _, _, _| true);
        audio.paths = audio_paths;

        let mut ids = Vec::new();
        for i in 0..MAX_STREAMS + 1 {
            let path = audio
                .paths
                .request(AudioSource::Mcu, AudioSink::Speaker, AudioPriority::Bg)
                .unwrap();
            let res = audio.streams.start(
                &audio.paths,
                &audio.devices,
                path,
                4,
                8_000,
                StreamMode::output_double(),
            );
            if i < MAX_STREAMS {
                ids.push(res.unwrap());
            } else {
                assert!(matches!(res, Err(Error::Busy)));
            }
        }

        // Freeing one slot makes room again.
        audio.streams.stop(ids[0]);
        let path = audio
            .paths
            .request(AudioSource::Mcu, AudioSink::Speaker, AudioPriority::Bg)
            .unwrap();
        assert!(
            audio
                .streams
                .start(
                    &audio.paths,
                    &audio.devices,
                    path,
                    4,
                    8_000,
                    StreamMode::output_double(),
                )
                .is_ok()
        );
    }

    #[test]
    fn unopen_path_is_rejected() {
        let (mut audio, _, _) = audio_with_devices();
        let path = audio
            .paths
            .request(AudioSource::Mcu, AudioSink::Rtx, AudioPriority::Tx)
            .unwrap();
        audio.paths.release(path);
        let res = audio.streams.start(
            &audio.paths,
            &audio.devices,
            path,
            8,
            48_000,
            StreamMode::output_double(),
        );
        assert!(matches!(res, Err(Error::NotPermitted)));
    }

    #[test]
    fn missing_device_is_reported() {
        let mut audio = Audio::new();
        let path = audio
            .paths
            .request(AudioSource::Mic, AudioSink::Speaker, AudioPriority::Rx)
            .unwrap();
        let res = audio.streams.start(
            &audio.paths,
            &audio.devices,
            path,
            8,
            8_000,
            StreamMode::output_double(),
        );
        assert!(matches!(res, Err(Error::NoDevice)));
    }
}
