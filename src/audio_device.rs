/*! Audio device interface.

A device driver moves samples between a stream buffer and actual
hardware. The streaming layer owns the buffer and hands the driver a
[`StreamCtx`] describing it; the driver reports which part of the
buffer the application may touch via byte ranges rather than raw
pointers, so ownership stays checkable.

For double-circular buffering exactly one half is application-owned at
any time; `sync` commits the filled half and flips ownership.

Two in-memory devices are provided. They serve the host build and the
tests, standing in for the DMA-driven drivers of a real platform.
*/
use std::collections::VecDeque;
use std::ops::Range;
use std::sync::{Arc, Mutex};

use crate::audio_path::{AudioSink, AudioSource};
use crate::{Error, Result, Sample};

/// Buffer handling policy of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufMode {
    /// One-shot transfer of the whole buffer.
    Linear,
    /// Continuous transfer over a single circular buffer.
    Circular,
    /// Continuous transfer with two alternating halves.
    CircularDouble,
}

/// Direction of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDir {
    /// Device fills the buffer.
    Input,
    /// Device drains the buffer.
    Output,
}

/// Direction plus buffering policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamMode {
    /// Direction of the transfer.
    pub dir: StreamDir,
    /// Buffering policy.
    pub buffering: BufMode,
}

impl StreamMode {
    /// Double-buffered input.
    #[must_use]
    pub fn input_double() -> Self {
        Self {
            dir: StreamDir::Input,
            buffering: BufMode::CircularDouble,
        }
    }

    /// Double-buffered output.
    #[must_use]
    pub fn output_double() -> Self {
        Self {
            dir: StreamDir::Output,
            buffering: BufMode::CircularDouble,
        }
    }
}

/// Endpoint a device serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// The device produces samples from this source.
    Source(AudioSource),
    /// The device consumes samples into this sink.
    Sink(AudioSink),
}

/// Stream state shared between the streaming layer and the driver.
pub struct StreamCtx {
    /// Sample buffer; for double buffering both halves.
    pub buffer: Vec<Sample>,
    /// Buffering policy.
    pub buf_mode: BufMode,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Transfer running.
    pub running: bool,
    /// Which half currently belongs to the application.
    pub idle_half: usize,
}

impl StreamCtx {
    fn half_range(&self, half: usize) -> Range<usize> {
        match self.buf_mode {
            BufMode::CircularDouble => {
                let half_len = self.buffer.len() / 2;
                half * half_len..(half + 1) * half_len
            }
            _ => 0..self.buffer.len(),
        }
    }
}

/// An audio device driver.
pub trait AudioDevice: Send + Sync {
    /// The endpoint this device serves.
    fn endpoint(&self) -> Endpoint;

    /// Start a transfer on the given stream.
    fn start(&self, ctx: &mut StreamCtx) -> Result<()>;

    /// Stop the transfer at the next convenient boundary.
    fn stop(&self, ctx: &mut StreamCtx);

    /// Abort the transfer immediately.
    fn terminate(&self, ctx: &mut StreamCtx);

    /// The buffer region currently owned by the application: for
    /// input the freshly filled part, for output the idle half.
    fn data(&self, ctx: &mut StreamCtx) -> Result<Range<usize>>;

    /// Wait until the hardware is done with the current buffer;
    /// `buf_changed` tells the driver the application refilled the
    /// idle half.
    fn sync(&self, ctx: &mut StreamCtx, buf_changed: bool) -> Result<()>;
}

/// Output device capturing everything "played" into a growing vector.
pub struct BufferOutput {
    sink: AudioSink,
    captured: Arc<Mutex<Vec<Sample>>>,
}

impl BufferOutput {
    /// New capture device for a sink endpoint.
    pub fn new(sink: AudioSink) -> Self {
        Self {
            sink,
            captured: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handle to the captured samples.
    pub fn captured(&self) -> Arc<Mutex<Vec<Sample>>> {
        self.captured.clone()
    }
}

impl AudioDevice for BufferOutput {
    fn endpoint(&self) -> Endpoint {
        Endpoint::Sink(self.sink)
    }

    fn start(&self, ctx: &mut StreamCtx) -> Result<()> {
        if ctx.buffer.is_empty() {
            return Err(Error::InvalidArgument);
        }
        ctx.running = true;
        ctx.idle_half = 0;
        Ok(())
    }

    fn stop(&self, ctx: &mut StreamCtx) {
        ctx.running = false;
    }

    fn terminate(&self, ctx: &mut StreamCtx) {
        ctx.running = false;
    }

    fn data(&self, ctx: &mut StreamCtx) -> Result<Range<usize>> {
        if !ctx.running {
            return Err(Error::NotPermitted);
        }
        Ok(ctx.half_range(ctx.idle_half))
    }

    fn sync(&self, ctx: &mut StreamCtx, buf_changed: bool) -> Result<()> {
        if !ctx.running {
            return Err(Error::NotPermitted);
        }
        if buf_changed {
            // "Play" the committed half right away. Real hardware
            // would block here until its DMA released a half.
            let range = ctx.half_range(ctx.idle_half);
            let mut captured = self.captured.lock().unwrap_or_else(|p| p.into_inner());
            captured.extend_from_slice(&ctx.buffer[range]);
            if ctx.buf_mode == BufMode::CircularDouble {
                ctx.idle_half ^= 1;
            }
        }
        Ok(())
    }
}

/// Input device feeding queued samples into the stream buffer.
pub struct BufferInput {
    source: AudioSource,
    queue: Arc<Mutex<VecDeque<Sample>>>,
}

impl BufferInput {
    /// New playback device for a source endpoint.
    pub fn new(source: AudioSource) -> Self {
        Self {
            source,
            queue: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Handle for pushing samples to be "recorded".
    pub fn feed(&self) -> Arc<Mutex<VecDeque<Sample>>> {
        self.queue.clone()
    }

    /// Queue samples directly.
    pub fn push_samples(&self, samples: &[Sample]) {
        let mut q = self.queue.lock().unwrap_or_else(|p| p.into_inner());
        q.extend(samples.iter().copied());
    }
}

impl AudioDevice for BufferInput {
    fn endpoint(&self) -> Endpoint {
        Endpoint::Source(self.source)
    }

    fn start(&self, ctx: &mut StreamCtx) -> Result<()> {
        if ctx.buffer.is_empty() {
            return Err(Error::InvalidArgument);
        }
        ctx.running = true;
        ctx.idle_half = 0;
        Ok(())
    }

    fn stop(&self, ctx: &mut StreamCtx) {
        ctx.running = false;
    }

    fn terminate(&self, ctx: &mut StreamCtx) {
        ctx.running = false;
    }

    fn data(&self, ctx: &mut StreamCtx) -> Result<Range<usize>> {
        if !ctx.running {
            return Err(Error::NotPermitted);
        }
        let range = ctx.half_range(ctx.idle_half);
        let mut q = self.queue.lock().unwrap_or_else(|p| p.into_inner());
        if q.len() < range.len() {
            // No full buffer of data yet.
            return Err(Error::Again);
        }
        for slot in ctx.buffer[range.clone()].iter_mut() {
            *slot = q.pop_front().unwrap_or(0);
        }
        if ctx.buf_mode == BufMode::CircularDouble {
            ctx.idle_half ^= 1;
        }
        Ok(range)
    }

    fn sync(&self, ctx: &mut StreamCtx, _buf_changed: bool) -> Result<()> {
        if !ctx.running {
            return Err(Error::NotPermitted);
        }
        Ok(())
    }
}

/// Registry of the audio devices present on the platform.
#[derive(Default)]
pub struct AudioDeviceList {
    inputs: Vec<Arc<dyn AudioDevice>>,
    outputs: Vec<Arc<dyn AudioDevice>>,
}

impl AudioDeviceList {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an input device.
    pub fn register_input(&mut self, dev: Arc<dyn AudioDevice>) {
        self.inputs.push(dev);
    }

    /// Register an output device.
    pub fn register_output(&mut self, dev: Arc<dyn AudioDevice>) {
        self.outputs.push(dev);
    }

    /// Find the device serving an endpoint in the given direction.
    #[must_use]
    pub fn find(&self, dir: StreamDir, endpoint: Endpoint) -> Option<Arc<dyn AudioDevice>> {
        let list = match dir {
            StreamDir::Input => &self.inputs,
            StreamDir::Output => &self.outputs,
        };
        list.iter().find(|d| d.endpoint() == endpoint).cloned()
    }
}
