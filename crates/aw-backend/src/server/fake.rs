//! In-memory server transport
//!
//! A deterministic implementation of the [`super`] boundary for the test
//! suites: registry globals are scripted, events are delivered inline (in
//! order) from the calls that cause them, and stream process cycles are
//! driven explicitly instead of by a real-time clock.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{
    keys, AudioInfo, ChannelPosition, Choice, CoreEvent, CoreEventSink, CoreHandle, DataChunk,
    DataPlane, Direction, FormatPod, FormatProp, Global, InterfaceType, ObjectId, PodValue, Props,
    ServerClient, ServerError, StreamEvents, StreamFlags, StreamHandle, StreamProps, StreamState,
    StreamTime, ID_CORE,
};

/// A scripted device node.
#[derive(Debug, Clone)]
pub struct FakeNode {
    pub id: ObjectId,
    pub media_class: String,
    pub dev_name: String,
    pub description: String,
    pub form_factor: Option<String>,
    pub rate: Option<Choice<i32>>,
    pub positions: Option<Vec<ChannelPosition>>,
    pub channel_count: Option<i32>,
}

impl FakeNode {
    pub fn sink(id: ObjectId, dev_name: &str, description: &str) -> Self {
        Self {
            id,
            media_class: "Audio/Sink".to_string(),
            dev_name: dev_name.to_string(),
            description: description.to_string(),
            form_factor: None,
            rate: None,
            positions: None,
            channel_count: None,
        }
    }

    pub fn source(id: ObjectId, dev_name: &str, description: &str) -> Self {
        Self {
            media_class: "Audio/Source".to_string(),
            ..Self::sink(id, dev_name, description)
        }
    }

    pub fn with_rate(mut self, rate: Choice<i32>) -> Self {
        self.rate = Some(rate);
        self
    }

    pub fn with_positions(mut self, positions: &[ChannelPosition]) -> Self {
        self.positions = Some(positions.to_vec());
        self
    }

    pub fn with_channel_count(mut self, count: i32) -> Self {
        self.channel_count = Some(count);
        self
    }

    pub fn with_form_factor(mut self, form_factor: &str) -> Self {
        self.form_factor = Some(form_factor.to_string());
        self
    }

    fn props(&self) -> Props {
        let mut props: Props = [
            (keys::MEDIA_CLASS, self.media_class.as_str()),
            (keys::NODE_NAME, self.dev_name.as_str()),
            (keys::NODE_DESCRIPTION, self.description.as_str()),
        ]
        .into_iter()
        .collect();
        if let Some(form) = &self.form_factor {
            props.set(keys::DEVICE_FORM_FACTOR, form);
        }
        props
    }

    fn format_pod(&self) -> Option<FormatPod> {
        let mut pod = FormatPod::new();
        let mut any = false;
        if let Some(rate) = &self.rate {
            pod = pod.with(FormatProp::Rate, PodValue::Int(rate.clone()));
            any = true;
        }
        if let Some(positions) = &self.positions {
            let ids = positions.iter().map(|p| p.id()).collect();
            pod = pod.with(FormatProp::Position, PodValue::IdArray(ids));
            any = true;
        }
        if let Some(count) = self.channel_count {
            pod = pod.with(FormatProp::Channels, PodValue::Int(Choice::None(count)));
            any = true;
        }
        any.then_some(pod)
    }
}

struct FakeState {
    sink: Option<CoreEventSink>,
    nodes: Vec<FakeNode>,
    metadata_id: Option<ObjectId>,
    metadata_bound: bool,
    default_sink: Option<String>,
    default_source: Option<String>,
    seq: i32,
    quantum: Option<u32>,
    streams: Vec<Arc<FakeStreamInner>>,
}

impl FakeState {
    fn deliver(&self, event: CoreEvent) {
        if let Some(sink) = &self.sink {
            sink(event);
        }
    }

    fn deliver_default(&self, is_capture: bool) {
        let Some(metadata_id) = self.metadata_id else {
            return;
        };
        if !self.metadata_bound {
            return;
        }
        let (key, value) = if is_capture {
            ("default.audio.source", &self.default_source)
        } else {
            ("default.audio.sink", &self.default_sink)
        };
        let event = match value {
            Some(name) => CoreEvent::MetadataProperty {
                proxy: metadata_id,
                subject: ID_CORE,
                key: key.to_string(),
                value_type: Some("Spa:String:JSON".to_string()),
                value: Some(serde_json::json!({ "name": name }).to_string()),
            },
            None => CoreEvent::MetadataProperty {
                proxy: metadata_id,
                subject: ID_CORE,
                key: key.to_string(),
                value_type: None,
                value: None,
            },
        };
        self.deliver(event);
    }
}

/// The in-memory server.
pub struct FakeServer {
    inner: Arc<Mutex<FakeState>>,
}

impl Default for FakeServer {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeServer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeState {
                sink: None,
                nodes: Vec::new(),
                metadata_id: None,
                metadata_bound: false,
                default_sink: None,
                default_source: None,
                seq: 0,
                quantum: None,
                streams: Vec::new(),
            })),
        }
    }

    /// Announce a node; delivered immediately when connected.
    pub fn add_node(&self, node: FakeNode) {
        let mut state = self.inner.lock();
        let global = Global {
            id: node.id,
            interface: InterfaceType::Node,
            props: node.props(),
        };
        state.nodes.push(node);
        state.deliver(CoreEvent::Global(global));
    }

    /// Announce the `default` metadata object.
    pub fn add_metadata(&self, id: ObjectId) {
        let mut state = self.inner.lock();
        state.metadata_id = Some(id);
        let props: Props = [(keys::METADATA_NAME, "default")].into_iter().collect();
        state.deliver(CoreEvent::Global(Global {
            id,
            interface: InterfaceType::Metadata,
            props,
        }));
    }

    /// Drop a global and notify listeners.
    pub fn remove_global(&self, id: ObjectId) {
        let mut state = self.inner.lock();
        state.nodes.retain(|n| n.id != id);
        if state.metadata_id == Some(id) {
            state.metadata_id = None;
            state.metadata_bound = false;
        }
        state.deliver(CoreEvent::GlobalRemove(id));
    }

    pub fn set_default_sink(&self, dev_name: Option<&str>) {
        let mut state = self.inner.lock();
        state.default_sink = dev_name.map(str::to_string);
        state.deliver_default(false);
    }

    pub fn set_default_source(&self, dev_name: Option<&str>) {
        let mut state = self.inner.lock();
        state.default_source = dev_name.map(str::to_string);
        state.deliver_default(true);
    }

    /// Whether a client has bound the `default` metadata object yet.
    pub fn metadata_bound(&self) -> bool {
        self.inner.lock().metadata_bound
    }

    /// Per-tick size reported through `io_changed` when streams activate.
    pub fn set_quantum(&self, quantum: u32) {
        self.inner.lock().quantum = Some(quantum);
    }

    /// Apply a time snapshot to every stream.
    pub fn set_stream_time(&self, time: StreamTime) {
        let streams: Vec<_> = self.inner.lock().streams.clone();
        for stream in streams {
            *stream.time.lock() = time;
        }
    }

    /// Run `cycles` process callbacks on every streaming playback stream.
    pub fn drive_playback(&self, cycles: usize) {
        let (streams, quantum) = {
            let state = self.inner.lock();
            (state.streams.clone(), state.quantum.unwrap_or(256))
        };
        for _ in 0..cycles {
            for stream in &streams {
                stream.process_playback(quantum as usize);
            }
        }
    }

    /// Deliver one interleaved buffer to every streaming capture stream.
    pub fn push_capture(&self, samples: &[f32]) {
        let streams: Vec<_> = self.inner.lock().streams.clone();
        for stream in &streams {
            stream.process_capture(samples);
        }
    }
}

impl ServerClient for FakeServer {
    fn connect(&self, events: CoreEventSink) -> Result<Box<dyn CoreHandle>, ServerError> {
        let mut state = self.inner.lock();
        state.sink = Some(events);

        // Replay the current registry contents, in announcement order.
        for node in &state.nodes {
            state.deliver(CoreEvent::Global(Global {
                id: node.id,
                interface: InterfaceType::Node,
                props: node.props(),
            }));
        }
        if let Some(id) = state.metadata_id {
            let props: Props = [(keys::METADATA_NAME, "default")].into_iter().collect();
            state.deliver(CoreEvent::Global(Global {
                id,
                interface: InterfaceType::Metadata,
                props,
            }));
        }

        Ok(Box::new(FakeCoreHandle {
            inner: Arc::clone(&self.inner),
        }))
    }

    fn create_stream(
        &self,
        _name: &str,
        _props: StreamProps,
        events: StreamEvents,
    ) -> Result<Box<dyn StreamHandle>, ServerError> {
        let mut state = self.inner.lock();
        let inner = Arc::new(FakeStreamInner {
            direction: Mutex::new(None),
            info: Mutex::new(None),
            state: Mutex::new((StreamState::Unconnected, None)),
            time: Mutex::new(StreamTime::default()),
            events: Mutex::new(events),
            quantum: state.quantum,
        });
        state.streams.push(Arc::clone(&inner));
        Ok(Box::new(FakeStream { inner }))
    }
}

struct FakeCoreHandle {
    inner: Arc<Mutex<FakeState>>,
}

impl CoreHandle for FakeCoreHandle {
    fn sync(&self, _id: ObjectId, _seq: i32) -> i32 {
        let mut state = self.inner.lock();
        state.seq += 1;
        let seq = state.seq;
        state.deliver(CoreEvent::Done { id: ID_CORE, seq });
        seq
    }

    fn bind_node(&self, id: ObjectId) -> Result<(), ServerError> {
        let state = self.inner.lock();
        let Some(node) = state.nodes.iter().find(|n| n.id == id) else {
            return Err(ServerError(format!("no such node: {id}")));
        };
        state.deliver(CoreEvent::NodeInfo {
            id,
            props: node.props(),
        });
        if let Some(pod) = node.format_pod() {
            state.deliver(CoreEvent::NodeParam { id, param: pod });
        }
        Ok(())
    }

    fn bind_metadata(&self, id: ObjectId) -> Result<(), ServerError> {
        let mut state = self.inner.lock();
        if state.metadata_id != Some(id) {
            return Err(ServerError(format!("no such metadata: {id}")));
        }
        state.metadata_bound = true;
        if state.default_sink.is_some() {
            state.deliver_default(false);
        }
        if state.default_source.is_some() {
            state.deliver_default(true);
        }
        Ok(())
    }

    fn unbind(&self, _id: ObjectId) {}
}

struct FakeStreamInner {
    direction: Mutex<Option<Direction>>,
    info: Mutex<Option<AudioInfo>>,
    state: Mutex<(StreamState, Option<String>)>,
    time: Mutex<StreamTime>,
    events: Mutex<StreamEvents>,
    quantum: Option<u32>,
}

impl FakeStreamInner {
    fn transition(&self, new_state: StreamState) {
        *self.state.lock() = (new_state, None);
        (self.events.lock().state_changed)(new_state, None);
    }

    fn process_playback(&self, frames: usize) {
        if self.state.lock().0 != StreamState::Streaming {
            return;
        }
        if *self.direction.lock() != Some(Direction::Output) {
            return;
        }
        let channels = self
            .info
            .lock()
            .as_ref()
            .map(|info| info.channels as usize)
            .unwrap_or(0);
        if channels == 0 {
            return;
        }
        let mut planes: Vec<DataPlane> = (0..channels).map(|_| DataPlane::new(frames)).collect();
        (self.events.lock().process)(&mut planes);
    }

    fn process_capture(&self, samples: &[f32]) {
        if self.state.lock().0 != StreamState::Streaming {
            return;
        }
        if *self.direction.lock() != Some(Direction::Input) {
            return;
        }
        let mut plane = DataPlane::new(samples.len());
        plane.data.copy_from_slice(samples);
        plane.chunk = DataChunk {
            offset: 0,
            stride: std::mem::size_of::<f32>() as u32,
            size: (samples.len() * std::mem::size_of::<f32>()) as u32,
        };
        let mut planes = [plane];
        (self.events.lock().process)(&mut planes);
    }
}

struct FakeStream {
    inner: Arc<FakeStreamInner>,
}

impl StreamHandle for FakeStream {
    fn connect(
        &self,
        direction: Direction,
        _target: ObjectId,
        info: &AudioInfo,
        _flags: StreamFlags,
    ) -> Result<(), ServerError> {
        *self.inner.direction.lock() = Some(direction);
        *self.inner.info.lock() = Some(info.clone());
        self.inner.transition(StreamState::Connecting);
        self.inner.transition(StreamState::Paused);
        Ok(())
    }

    fn set_active(&self, active: bool) -> Result<(), ServerError> {
        if active {
            if let Some(quantum) = self.inner.quantum {
                (self.inner.events.lock().io_changed)(quantum);
            }
            self.inner.transition(StreamState::Streaming);
        } else {
            self.inner.transition(StreamState::Paused);
        }
        Ok(())
    }

    fn state(&self) -> (StreamState, Option<String>) {
        self.inner.state.lock().clone()
    }

    fn time(&self) -> StreamTime {
        *self.inner.time.lock()
    }
}
