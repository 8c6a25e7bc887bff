//! Capture stream

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::mainloop::ThreadLoop;
use crate::ringbuf::AudioRingBuffer;
use crate::server::{
    DataPlane, Direction, ObjectId, ServerClient, StreamEvents, StreamFlags, StreamHandle,
    StreamProps, StreamState, ID_ANY,
};
use crate::{
    BackendError, BackendResult, DeviceConfig, EventManager, SampleType, MONITOR_PREFIX,
};

const APP_NAME: &str = "ambiweave";

static OPEN_COUNT: AtomicU32 = AtomicU32::new(0);

/// A capture stream feeding an interleaved ring buffer.
pub struct CaptureStream {
    manager: Arc<EventManager>,
    server: Arc<dyn ServerClient>,
    device: DeviceConfig,
    target_id: ObjectId,
    loop_: Option<Arc<ThreadLoop<()>>>,
    stream: Option<Box<dyn StreamHandle>>,
    ring: Option<Arc<AudioRingBuffer>>,
}

impl CaptureStream {
    pub fn new(
        manager: Arc<EventManager>,
        server: Arc<dyn ServerClient>,
        device: DeviceConfig,
    ) -> Self {
        Self {
            manager,
            server,
            device,
            target_id: ID_ANY,
            loop_: None,
            stream: None,
            ring: None,
        }
    }

    pub fn device(&self) -> &DeviceConfig {
        &self.device
    }

    /// Locate the target device, connect the stream, and size the ring
    /// buffer. A `"Monitor of <sink>"` name selects a sink's monitor.
    pub fn open(&mut self, name: Option<&str>) -> BackendResult<()> {
        let (target_id, dev_name) = {
            let mut guard = self.manager.lock();
            self.manager.wait_for_init(&mut guard);

            let dir = &guard.dir;
            match name {
                None => {
                    let by_default = if !dir.default_source_dev.is_empty() {
                        dir.devices
                            .iter()
                            .find(|n| n.dev_name == dir.default_source_dev)
                    } else {
                        None
                    };
                    let node = by_default
                        .or_else(|| dir.devices.iter().find(|n| n.is_capture))
                        .or_else(|| dir.devices.iter().find(|n| !n.is_capture))
                        .ok_or(BackendError::NoDevice)?;
                    let dev_name = if node.is_capture {
                        node.name.clone()
                    } else {
                        format!("{}{}", MONITOR_PREFIX, node.name)
                    };
                    (node.id, dev_name)
                }
                Some(name) => {
                    let node = dir
                        .devices
                        .iter()
                        .find(|n| n.is_capture && n.name == name)
                        .or_else(|| {
                            // "Monitor of <sink>" matches sinks only.
                            name.strip_prefix(MONITOR_PREFIX).and_then(|sink_name| {
                                dir.devices
                                    .iter()
                                    .find(|n| !n.is_capture && n.name == sink_name)
                            })
                        })
                        .ok_or(BackendError::NoDevice)?;
                    (node.id, name.to_string())
                }
            }
        };

        if self.loop_.is_none() {
            let count = OPEN_COUNT.fetch_add(1, Ordering::Relaxed);
            let mut loop_ = ThreadLoop::new(format!("aw-cap-{count}"), ());
            loop_
                .start()
                .map_err(|e| BackendError::DeviceError(format!("failed to start loop: {e}")))?;
            self.loop_ = Some(Arc::new(loop_));
        }
        let loop_ = self.loop_.clone().expect("loop just created");

        self.target_id = target_id;
        self.device.name = dev_name;

        // The in-tree transport delivers 32-bit float interleaved data.
        self.device.sample_type = SampleType::F32;
        let info = self.device.audio_info(false);

        // Ensure at least a 100ms capture buffer.
        let frames = (self.device.frequency / 10).max(self.device.buffer_size) as usize;
        let ring = Arc::new(AudioRingBuffer::new(frames * self.device.channel_count()));

        let state_loop = Arc::clone(&loop_);
        let process_ring = Arc::clone(&ring);
        let events = StreamEvents {
            state_changed: Box::new(move |_state, _error| state_loop.signal()),
            io_changed: Box::new(|_| {}),
            process: Box::new(move |planes: &mut [DataPlane]| {
                let Some(plane) = planes.first() else {
                    return;
                };
                let max = plane.max_size as u32;
                let offset = plane.chunk.offset.min(max);
                let size = plane.chunk.size.min(max - offset);
                let start = offset as usize / std::mem::size_of::<f32>();
                let count = size as usize / std::mem::size_of::<f32>();
                process_ring.push(&plane.data[start..start + count]);
            }),
        };

        // Request a ~20ms node latency; the server-side default is far
        // larger than is useful for capture.
        let props = StreamProps {
            app_name: APP_NAME.to_string(),
            node_latency: ((self.device.frequency + 25) / 50, self.device.frequency),
            node_rate: None,
        };
        let stream = self
            .server
            .create_stream("Capture Stream", props, events)
            .map_err(|e| {
                log::error!("Failed to create stream: {}", e);
                BackendError::NoDevice
            })?;

        {
            let mut guard = loop_.lock();
            stream
                .connect(
                    Direction::Input,
                    self.target_id,
                    &info,
                    StreamFlags::AUTOCONNECT
                        | StreamFlags::INACTIVE
                        | StreamFlags::MAP_BUFFERS
                        | StreamFlags::RT_PROCESS,
                )
                .map_err(|e| BackendError::DeviceError(format!("error connecting stream: {e}")))?;

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

        self.ring = Some(ring);
        self.stream = Some(stream);
        Ok(())
    }

    pub fn start(&mut self) -> BackendResult<()> {
        let loop_ = self
            .loop_
            .clone()
            .ok_or_else(|| BackendError::DeviceError("stream has not been opened".to_string()))?;
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| BackendError::DeviceError("stream has not been opened".to_string()))?;

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
                _ => break,
            }
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
            .ok_or_else(|| BackendError::DeviceError("stream has not been opened".to_string()))?;

        let mut guard = loop_.lock();
        stream
            .set_active(false)
            .map_err(|e| BackendError::DeviceError(format!("failed to stop stream: {e}")))?;

        while stream.state().0 == StreamState::Streaming {
            loop_.wait(&mut guard);
        }
        Ok(())
    }

    /// Frames ready to be read.
    pub fn available_samples(&self) -> usize {
        match &self.ring {
            Some(ring) => ring.available_read() / self.device.channel_count(),
            None => 0,
        }
    }

    /// Read `frames` interleaved frames. The caller is responsible for not
    /// asking for more than [`available_samples`](Self::available_samples).
    pub fn capture_samples(&self, out: &mut [f32], frames: usize) -> usize {
        let channels = self.device.channel_count();
        match &self.ring {
            Some(ring) => ring.pop(&mut out[..frames * channels]) / channels,
            None => 0,
        }
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        if let Some(loop_) = &self.loop_ {
            if self.stream.is_some() {
                let _guard = loop_.lock();
                self.stream = None;
            }
        }
    }
}
