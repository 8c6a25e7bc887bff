//! Playback stream

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use smallvec::SmallVec;

use crate::mainloop::ThreadLoop;
use crate::server::{
    DataChunk, DataPlane, Direction, ObjectId, ServerClient, StreamEvents, StreamFlags,
    StreamHandle, StreamProps, StreamState, StreamTime, ID_ANY,
};
use crate::{
    monotonic_ns, BackendError, BackendResult, ClockLatency, DeviceChannels, DeviceConfig,
    EventManager, Mixer, SampleType, MAX_OUTPUT_CHANNELS,
};

const APP_NAME: &str = "ambiweave";
const NANOS_PER_SEC: i128 = 1_000_000_000;

static OPEN_COUNT: AtomicU32 = AtomicU32::new(0);

/// State shared with the real-time process callback.
struct PlaybackShared {
    mixer: Arc<dyn Mixer>,
    /// Per-tick size reported by the server; 0 while unknown.
    rate_match: AtomicU32,
    update_size: AtomicU32,
    num_channels: AtomicUsize,
}

/// A playback stream bound to one target device.
pub struct PlaybackStream {
    manager: Arc<EventManager>,
    server: Arc<dyn ServerClient>,
    shared: Arc<PlaybackShared>,
    device: DeviceConfig,
    target_id: ObjectId,
    loop_: Option<Arc<ThreadLoop<()>>>,
    stream: Option<Box<dyn StreamHandle>>,
    /// Time accumulated by the streams of previous resets.
    time_base: Duration,
}

impl PlaybackStream {
    pub fn new(
        manager: Arc<EventManager>,
        server: Arc<dyn ServerClient>,
        mixer: Arc<dyn Mixer>,
        device: DeviceConfig,
    ) -> Self {
        Self {
            manager,
            server,
            shared: Arc::new(PlaybackShared {
                mixer,
                rate_match: AtomicU32::new(0),
                update_size: AtomicU32::new(device.update_size),
                num_channels: AtomicUsize::new(0),
            }),
            device,
            target_id: ID_ANY,
            loop_: None,
            stream: None,
            time_base: Duration::ZERO,
        }
    }

    pub fn device(&self) -> &DeviceConfig {
        &self.device
    }

    /// Locate the target device and lazily start the stream's loop.
    pub fn open(&mut self, name: Option<&str>) -> BackendResult<()> {
        let (target_id, dev_name) = {
            let mut guard = self.manager.lock();
            self.manager.wait_for_init(&mut guard);

            let dir = &guard.dir;
            let node = match name {
                None => {
                    let by_default = if !dir.default_sink_dev.is_empty() {
                        dir.devices
                            .iter()
                            .find(|n| n.dev_name == dir.default_sink_dev)
                    } else {
                        None
                    };
                    by_default
                        .or_else(|| dir.devices.iter().find(|n| !n.is_capture))
                        .ok_or(BackendError::NoDevice)?
                }
                Some(name) => dir
                    .devices
                    .iter()
                    .find(|n| !n.is_capture && n.name == name)
                    .ok_or(BackendError::NoDevice)?,
            };
            (node.id, node.name.clone())
        };

        if self.loop_.is_none() {
            let count = OPEN_COUNT.fetch_add(1, Ordering::Relaxed);
            let mut loop_ = ThreadLoop::new(format!("aw-play-{count}"), ());
            loop_
                .start()
                .map_err(|e| BackendError::DeviceError(format!("failed to start loop: {e}")))?;
            self.loop_ = Some(Arc::new(loop_));
        }

        self.target_id = target_id;
        self.device.name = if dev_name.is_empty() {
            "Audio Output".to_string()
        } else {
            dev_name
        };
        Ok(())
    }

    fn stream_events(&self, loop_: &Arc<ThreadLoop<()>>) -> StreamEvents {
        let state_loop = Arc::clone(loop_);
        let io_shared = Arc::clone(&self.shared);
        let shared = Arc::clone(&self.shared);

        StreamEvents {
            state_changed: Box::new(move |_state, _error| state_loop.signal()),
            io_changed: Box::new(move |size| io_shared.rate_match.store(size, Ordering::Relaxed)),
            process: Box::new(move |planes: &mut [DataPlane]| {
                // Each plane holds one channel. Cap the render length by the
                // smallest plane in case one is shorter than wanted.
                let chancount = shared.num_channels.load(Ordering::Relaxed).min(planes.len());
                let rate_match = shared.rate_match.load(Ordering::Relaxed);
                let mut length = if rate_match > 0 {
                    rate_match
                } else {
                    shared.update_size.load(Ordering::Relaxed)
                } as usize;
                for plane in planes[..chancount].iter() {
                    length = length.min(plane.max_size / std::mem::size_of::<f32>());
                }

                {
                    let mut spans: SmallVec<[&mut [f32]; MAX_OUTPUT_CHANNELS]> = planes
                        [..chancount]
                        .iter_mut()
                        .map(|plane| &mut plane.data[..length])
                        .collect();
                    shared.mixer.render_samples(&mut spans, length as u32);
                }

                for plane in planes[..chancount].iter_mut() {
                    plane.chunk = DataChunk {
                        offset: 0,
                        stride: std::mem::size_of::<f32>() as u32,
                        size: (length * std::mem::size_of::<f32>()) as u32,
                    };
                }
            }),
        }
    }

    /// Recreate the stream, adopting the target device's preferred format
    /// unless the application requested explicit values.
    pub fn reset(&mut self) -> BackendResult<bool> {
        if let Some(loop_) = &self.loop_ {
            if self.stream.is_some() {
                let _guard = loop_.lock();
                self.stream = None;
            }
        }
        self.shared.rate_match.store(0, Ordering::Relaxed);
        self.time_base = self.shared.mixer.clock_time();

        self.device.flags.direct_ear = false;
        if self.target_id != ID_ANY {
            let guard = self.manager.lock();
            if let Some(node) = guard.dir.find(self.target_id) {
                if !self.device.flags.frequency_request && node.sample_rate > 0 {
                    // Scale the update size if the sample rate changes.
                    let scale = node.sample_rate as f64 / self.device.frequency as f64;
                    self.device.frequency = node.sample_rate;
                    self.device.update_size =
                        ((self.device.update_size as f64 * scale + 0.5).clamp(64.0, 8192.0)) as u32;
                    self.device.buffer_size = self.device.update_size * 2;
                }
                if !self.device.flags.channels_request {
                    if let Some(channels) = node.channels {
                        self.device.channels = channels;
                    }
                }
                if node.channels == Some(DeviceChannels::Stereo) && node.is_headphones {
                    self.device.flags.direct_ear = true;
                }
            }
        }

        // Force planar 32-bit float output; it's what the server handles
        // internally.
        self.device.sample_type = SampleType::F32;
        let info = self.device.audio_info(true);

        let loop_ = self
            .loop_
            .clone()
            .ok_or_else(|| BackendError::DeviceError("stream has not been opened".to_string()))?;

        self.shared
            .num_channels
            .store(self.device.channel_count(), Ordering::Relaxed);
        self.shared
            .update_size
            .store(self.device.update_size, Ordering::Relaxed);

        let props = StreamProps {
            app_name: APP_NAME.to_string(),
            node_latency: (self.device.update_size, self.device.frequency),
            node_rate: Some((1, self.device.frequency)),
        };
        let stream = self
            .server
            .create_stream("Playback Stream", props, self.stream_events(&loop_))
            .map_err(|e| {
                log::error!("Failed to create stream: {}", e);
                BackendError::NoDevice
            })?;

        {
            let mut guard = loop_.lock();
            stream
                .connect(
                    Direction::Output,
                    self.target_id,
                    &info,
                    StreamFlags::AUTOCONNECT
                        | StreamFlags::INACTIVE
                        | StreamFlags::MAP_BUFFERS
                        | StreamFlags::RT_PROCESS,
                )
                .map_err(|e| BackendError::DeviceError(format!("error connecting stream: {e}")))?;

            // Wait for the stream to become paused (ready to start).
            loop {
                let (state, error) = stream.state();
                match state {
                    StreamState::Paused => break,
                    StreamState::Error => {
                        return Err(BackendError::DeviceError(format!(
                            "error connecting stream: \"{}\"",
                            error.unwrap_or_default()
                        )))
                    }
                    _ => loop_.wait(&mut guard),
                }
            }
        }

        self.device.buffer_size = self.device.update_size * 2;
        self.stream = Some(stream);
        Ok(true)
    }

    /// Activate the stream and adopt the definitive update size, which is
    /// only available once streaming.
    pub fn start(&mut self) -> BackendResult<()> {
        let loop_ = self
            .loop_
            .clone()
            .ok_or_else(|| BackendError::DeviceError("stream has not been opened".to_string()))?;

        let mut adopted = None;
        {
            let stream = self.stream.as_ref().ok_or_else(|| {
                BackendError::DeviceError("stream has not been reset".to_string())
            })?;
            let mut guard = loop_.lock();
            stream
                .set_active(true)
                .map_err(|e| BackendError::DeviceError(format!("failed to start stream: {e}")))?;

            loop {
                let (state, error) = stream.state();
                match state {
                    StreamState::Paused => loop_.wait(&mut guard),
                    StreamState::Error => {
                        return Err(BackendError::DeviceError(
                            error.unwrap_or_else(|| "(unknown)".to_string()),
                        ))
                    }
                    StreamState::Streaming => {
                        let rate_match = self.shared.rate_match.load(Ordering::Relaxed);
                        if rate_match != 0 {
                            adopted = Some(rate_match);
                        }
                        break;
                    }
                    _ => break,
                }
            }
        }

        if let Some(update_size) = adopted {
            self.device.update_size = update_size;
            self.device.buffer_size = update_size * 2;
            self.shared.update_size.store(update_size, Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn stop(&mut self) -> BackendResult<()> {
        let loop_ = self
            .loop_
            .clone()
            .ok_or_else(|| BackendError::DeviceError("stream has not been opened".to_string()))?;
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| BackendError::DeviceError("stream has not been reset".to_string()))?;

        let mut guard = loop_.lock();
        stream
            .set_active(false)
            .map_err(|e| BackendError::DeviceError(format!("failed to stop stream: {e}")))?;

        while stream.state().0 == StreamState::Streaming {
            loop_.wait(&mut guard);
        }
        Ok(())
    }

    /// The mixer clock time and the total delay until a sample rendered now
    /// reaches the device output.
    pub fn get_clock_latency(&self) -> ClockLatency {
        // First, get the stream time info (tick delay, ticks played, and
        // the monotonic time closest to when the last tick was played).
        let mut stream_time = StreamTime::default();
        if let (Some(loop_), Some(stream)) = (&self.loop_, &self.stream) {
            let _guard = loop_.lock();
            stream_time = stream.time();
        }

        // Now sample the mixer time and the monotonic clock atomically.
        let mixer = &self.shared.mixer;
        let (mix_time, mono_clock) = loop {
            let refcount = mixer.wait_for_mix();
            let mix_time = mixer.clock_time();
            let mono_clock = monotonic_ns();
            std::sync::atomic::fence(Ordering::Acquire);
            if refcount == mixer.mix_count() {
                break (mix_time, mono_clock);
            }
        };

        // Convert the stream ticks and delay to nanoseconds. Intermediate
        // values are widened so large buffers and tick counts can't
        // overflow a signed 64-bit nanosecond count.
        let mix_ns = mix_time.as_nanos() as i128;
        let now: i128;
        let current_tick: i128;
        let mut delay: i128;
        if stream_time.rate_denom < 1 {
            // No stream rate means the stream hasn't gotten going yet.
            now = mono_clock as i128;
            current_tick = mix_ns;
            delay = self.device.buffer_size as i128 * NANOS_PER_SEC
                / self.device.frequency.max(1) as i128;
        } else {
            let num = stream_time.rate_num as i128;
            let denom = stream_time.rate_denom as i128;
            now = stream_time.now_ns as i128;
            // The stream is recreated on each reset, so include the time
            // that had already passed with previous streams.
            current_tick = self.time_base.as_nanos() as i128
                + (stream_time.ticks as i128 / denom) * num * NANOS_PER_SEC
                + (stream_time.ticks as i128 % denom) * num * NANOS_PER_SEC / denom;
            delay = stream_time.delay as i128 * num * NANOS_PER_SEC / denom;
        }

        // If the mixer is ahead of the stream time, that much more delay
        // sits between them.
        if mix_ns > current_tick {
            delay += mix_ns - current_tick;
        }
        // Reduce the delay by the time passed since the known stream time.
        delay -= mono_clock as i128 - now;

        ClockLatency {
            clock_time: mix_time,
            latency: Duration::from_nanos(delay.clamp(0, u64::MAX as i128) as u64),
        }
    }
}

impl Drop for PlaybackStream {
    fn drop(&mut self) {
        // The loop must be locked when destroying the stream from
        // application threads.
        if let Some(loop_) = &self.loop_ {
            if self.stream.is_some() {
                let _guard = loop_.lock();
                self.stream = None;
            }
        }
    }
}
