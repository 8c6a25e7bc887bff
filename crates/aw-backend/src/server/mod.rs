//! Audio server client boundary
//!
//! The server's client library is an external collaborator; this module
//! defines the exact surface the backend consumes from it: a core/registry
//! channel delivering ordered events, per-node format enumeration, metadata
//! watching, and streams with state/process callbacks. [`fake`] provides a
//! deterministic in-memory implementation used by the test suites; a
//! production transport implements the same traits over the real client
//! library.

pub mod fake;
mod pod;

pub use pod::*;

use std::collections::HashMap;
use std::ops::BitOr;

use thiserror::Error;

/// Opaque 32-bit server object handle.
pub type ObjectId = u32;

/// Matches any object id when used as a stream target.
pub const ID_ANY: ObjectId = u32::MAX;
/// The core object's id.
pub const ID_CORE: ObjectId = 0;

/// Well-known property keys on registry globals and node info.
pub mod keys {
    pub const MEDIA_CLASS: &str = "media.class";
    pub const NODE_NAME: &str = "node.name";
    pub const NODE_DESCRIPTION: &str = "node.description";
    pub const NODE_NICK: &str = "node.nick";
    pub const DEVICE_FORM_FACTOR: &str = "device.form-factor";
    pub const METADATA_NAME: &str = "metadata.name";
}

/// A string property dictionary.
#[derive(Debug, Clone, Default)]
pub struct Props(HashMap<String, String>);

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.0.insert(key.to_string(), value.to_string());
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for Props {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        let mut props = Props::new();
        for (k, v) in iter {
            props.set(k, v);
        }
        props
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceType {
    Node,
    Metadata,
}

/// A registry global announcement.
#[derive(Debug, Clone)]
pub struct Global {
    pub id: ObjectId,
    pub interface: InterfaceType,
    pub props: Props,
}

/// Events delivered, in order, over a core connection.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// An object appeared in the registry.
    Global(Global),
    /// An object left the registry.
    GlobalRemove(ObjectId),
    /// A sync request completed.
    Done { id: ObjectId, seq: i32 },
    /// A bound node's properties changed.
    NodeInfo { id: ObjectId, props: Props },
    /// A bound node published a format-enumeration parameter.
    NodeParam { id: ObjectId, param: FormatPod },
    /// A bound metadata object's property changed. A null `value_type`
    /// means the property was cleared.
    MetadataProperty {
        proxy: ObjectId,
        subject: ObjectId,
        key: String,
        value_type: Option<String>,
        value: Option<String>,
    },
}

/// Receives core events from the transport's dispatch context.
pub type CoreEventSink = Box<dyn Fn(CoreEvent) + Send + Sync>;

/// A server-side call failure, carrying the server's error string.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct ServerError(pub String);

/// The connected core/registry channel.
pub trait CoreHandle: Send + Sync {
    /// Issue a sync request; the returned sequence id comes back in a
    /// [`CoreEvent::Done`] after all currently pending events.
    fn sync(&self, id: ObjectId, seq: i32) -> i32;

    /// Bind a node proxy and subscribe to its format enumeration. Info
    /// events always precede param events for a subscription cycle.
    fn bind_node(&self, id: ObjectId) -> Result<(), ServerError>;

    /// Bind a metadata proxy; current properties are replayed.
    fn bind_metadata(&self, id: ObjectId) -> Result<(), ServerError>;

    /// Release a bound proxy.
    fn unbind(&self, id: ObjectId);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Unconnected,
    Connecting,
    Paused,
    Streaming,
    Error,
}

/// Stream connection flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFlags(u32);

impl StreamFlags {
    pub const NONE: Self = Self(0);
    /// Connect to a target automatically.
    pub const AUTOCONNECT: Self = Self(1 << 0);
    /// Start inactive; activation is explicit.
    pub const INACTIVE: Self = Self(1 << 1);
    /// The server maps buffer memory for us.
    pub const MAP_BUFFERS: Self = Self(1 << 2);
    /// The process callback runs on the real-time thread.
    pub const RT_PROCESS: Self = Self(1 << 3);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for StreamFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Channel position ids used in format descriptors and position arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ChannelPosition {
    Mono = 1,
    FrontLeft,
    FrontRight,
    FrontCenter,
    Lfe,
    SideLeft,
    SideRight,
    RearLeft,
    RearRight,
    RearCenter,
}

impl ChannelPosition {
    pub fn id(self) -> u32 {
        self as u32
    }
}

/// Raw audio format descriptor for a stream connection.
#[derive(Debug, Clone)]
pub struct AudioInfo {
    pub sample_type: crate::SampleType,
    pub planar: bool,
    pub rate: u32,
    pub channels: u32,
    /// Empty for unpositioned (e.g. ambisonic) layouts.
    pub positions: Vec<ChannelPosition>,
}

/// Properties attached to a stream at creation.
#[derive(Debug, Clone)]
pub struct StreamProps {
    pub app_name: String,
    /// Requested node latency as `samples/rate`.
    pub node_latency: (u32, u32),
    /// Requested node rate as `1/rate`.
    pub node_rate: Option<(u32, u32)>,
}

/// A stream time snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamTime {
    /// Monotonic time closest to when the last tick was played.
    pub now_ns: i64,
    /// Ticks played, in `rate` units.
    pub ticks: u64,
    /// Tick delay to the device, in `rate` units.
    pub delay: i64,
    pub rate_num: u32,
    pub rate_denom: u32,
}

/// Valid region metadata of one data plane.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataChunk {
    pub offset: u32,
    pub stride: u32,
    pub size: u32,
}

/// One plane of a dequeued buffer.
#[derive(Debug)]
pub struct DataPlane {
    pub data: Vec<f32>,
    /// Plane capacity in bytes.
    pub max_size: usize,
    pub chunk: DataChunk,
}

impl DataPlane {
    pub fn new(samples: usize) -> Self {
        Self {
            data: vec![0.0; samples],
            max_size: samples * std::mem::size_of::<f32>(),
            chunk: DataChunk::default(),
        }
    }
}

/// Stream callbacks. `process` runs on the server's real-time thread and
/// must not block, allocate, or take the loop mutex.
pub struct StreamEvents {
    pub state_changed: Box<dyn Fn(StreamState, Option<&str>) + Send + Sync>,
    /// Reports the per-tick rate-match size.
    pub io_changed: Box<dyn Fn(u32) + Send + Sync>,
    pub process: Box<dyn FnMut(&mut [DataPlane]) + Send>,
}

/// One server stream.
pub trait StreamHandle: Send {
    fn connect(
        &self,
        direction: Direction,
        target: ObjectId,
        info: &AudioInfo,
        flags: StreamFlags,
    ) -> Result<(), ServerError>;

    fn set_active(&self, active: bool) -> Result<(), ServerError>;

    fn state(&self) -> (StreamState, Option<String>);

    fn time(&self) -> StreamTime;
}

/// The client library's connection factory.
pub trait ServerClient: Send + Sync {
    /// Connect the core/registry channel. Events are delivered to `events`
    /// in server order.
    fn connect(&self, events: CoreEventSink) -> Result<Box<dyn CoreHandle>, ServerError>;

    /// Create a stream. Its callbacks fire once it is connected.
    fn create_stream(
        &self,
        name: &str,
        props: StreamProps,
        events: StreamEvents,
    ) -> Result<Box<dyn StreamHandle>, ServerError>;
}
