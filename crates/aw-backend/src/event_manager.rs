//! Event manager
//!
//! Tracks active devices and their default formats so streams can be
//! configured to match. The device list is updated asynchronously by the
//! manager's loop thread; callers hold the manager lock while reading it
//! or issuing server calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::MutexGuard;

use crate::mainloop::ThreadLoop;
use crate::proxy::{MetadataProxy, NodeProxy};
use crate::server::{
    keys, CoreEvent, CoreEventSink, CoreHandle, Global, InterfaceType, ObjectId, ServerClient,
    ID_CORE,
};
use crate::{BackendError, BackendResult, DeviceChannels};

pub const AUDIO_SINK_CLASS: &str = "Audio/Sink";
pub const AUDIO_SOURCE_CLASS: &str = "Audio/Source";
pub const MONITOR_PREFIX: &str = "Monitor of ";

/// One enumerated device node.
#[derive(Debug, Clone)]
pub struct DeviceNode {
    /// Display name.
    pub name: String,
    /// Stable device key, used to match default-device metadata.
    pub dev_name: String,
    pub id: ObjectId,
    pub is_capture: bool,
    pub is_headphones: bool,
    /// Preferred rate in Hz; 0 while unknown.
    pub sample_rate: u32,
    /// Preferred layout; `None` while unknown.
    pub channels: Option<DeviceChannels>,
}

/// The device list and default-device names.
#[derive(Debug, Default)]
pub struct DeviceDirectory {
    pub devices: Vec<DeviceNode>,
    pub default_sink_dev: String,
    pub default_source_dev: String,
}

impl DeviceDirectory {
    /// Find or create the node with `id`.
    pub(crate) fn add(&mut self, id: ObjectId) -> &mut DeviceNode {
        if let Some(idx) = self.devices.iter().position(|n| n.id == id) {
            return &mut self.devices[idx];
        }
        self.devices.push(DeviceNode {
            name: String::new(),
            dev_name: String::new(),
            id,
            is_capture: false,
            is_headphones: false,
            sample_rate: 0,
            channels: None,
        });
        self.devices.last_mut().expect("just pushed")
    }

    pub fn find(&self, id: ObjectId) -> Option<&DeviceNode> {
        self.devices.iter().find(|n| n.id == id)
    }

    pub(crate) fn find_mut(&mut self, id: ObjectId) -> Option<&mut DeviceNode> {
        self.devices.iter_mut().find(|n| n.id == id)
    }

    pub(crate) fn remove(&mut self, id: ObjectId) {
        self.devices.retain(|n| n.id != id);
    }
}

enum ProxyEntry {
    Node(NodeProxy),
    Metadata(MetadataProxy),
}

/// State guarded by the manager's loop mutex.
pub struct RegistryState {
    pub dir: DeviceDirectory,
    proxies: HashMap<ObjectId, ProxyEntry>,
    metadata_id: Option<ObjectId>,
    init_seq: i32,
    init_done: Arc<AtomicBool>,
    core: Option<Arc<dyn CoreHandle>>,
}

impl RegistryState {
    fn handle_event(&mut self, event: CoreEvent) {
        match event {
            CoreEvent::Global(global) => self.handle_global(global),
            CoreEvent::GlobalRemove(id) => {
                self.dir.remove(id);
                self.proxies.remove(&id);
                if self.metadata_id == Some(id) {
                    self.metadata_id = None;
                }
            }
            CoreEvent::Done { id, seq } => {
                if id == ID_CORE && seq == self.init_seq {
                    self.init_done.store(true, Ordering::Release);
                }
            }
            CoreEvent::NodeInfo { id, props } => {
                let Self { dir, proxies, .. } = self;
                if let Some(ProxyEntry::Node(proxy)) = proxies.get_mut(&id) {
                    proxy.info(dir, &props);
                }
            }
            CoreEvent::NodeParam { id, param } => {
                let Self { dir, proxies, .. } = self;
                if let Some(ProxyEntry::Node(proxy)) = proxies.get_mut(&id) {
                    proxy.param(dir, &param);
                }
            }
            CoreEvent::MetadataProperty { proxy, subject, key, value_type, value } => {
                let Self { dir, proxies, .. } = self;
                if let Some(ProxyEntry::Metadata(meta)) = proxies.get_mut(&proxy) {
                    meta.property(dir, subject, &key, value_type.as_deref(), value.as_deref());
                }
            }
        }
    }

    fn handle_global(&mut self, global: Global) {
        let Some(core) = self.core.clone() else {
            return;
        };

        match global.interface {
            InterfaceType::Node => {
                // Only audio sinks and sources are interesting.
                let Some(media_class) = global.props.get(keys::MEDIA_CLASS) else {
                    return;
                };
                let good = media_class.eq_ignore_ascii_case(AUDIO_SINK_CLASS)
                    || media_class.eq_ignore_ascii_case(AUDIO_SOURCE_CLASS);
                if !good {
                    return;
                }

                if let Err(e) = core.bind_node(global.id) {
                    log::error!("Failed to create node proxy object: {}", e);
                    return;
                }
                self.proxies
                    .insert(global.id, ProxyEntry::Node(NodeProxy::new(global.id, core)));
                self.sync_init();
            }
            InterfaceType::Metadata => {
                let Some(name) = global.props.get(keys::METADATA_NAME) else {
                    return;
                };
                if name != "default" {
                    log::debug!("Ignoring metadata \"{}\"", name);
                    return;
                }
                if self.metadata_id.is_some() {
                    log::error!("Duplicate default metadata");
                    return;
                }

                if let Err(e) = core.bind_metadata(global.id) {
                    log::error!("Failed to create metadata proxy object: {}", e);
                    return;
                }
                self.metadata_id = Some(global.id);
                self.proxies.insert(
                    global.id,
                    ProxyEntry::Metadata(MetadataProxy::new(global.id, core)),
                );
                self.sync_init();
            }
        }
    }

    /// While initialization is incomplete, push the completion sequence id
    /// past the events the global just scheduled.
    fn sync_init(&mut self) {
        if !self.init_done.load(Ordering::Relaxed) {
            if let Some(core) = &self.core {
                self.init_seq = core.sync(ID_CORE, self.init_seq);
            }
        }
    }
}

/// Which kind of backend a probe enumerates for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Playback,
    Capture,
}

/// The global watcher for registry events.
pub struct EventManager {
    loop_: ThreadLoop<RegistryState>,
    init_done: Arc<AtomicBool>,
}

impl EventManager {
    /// Connect to the audio server, subscribe to its registry, and start
    /// the loop thread.
    pub fn init(server: &dyn ServerClient) -> BackendResult<Self> {
        let init_done = Arc::new(AtomicBool::new(false));
        let state = RegistryState {
            dir: DeviceDirectory::default(),
            proxies: HashMap::new(),
            metadata_id: None,
            init_seq: 0,
            init_done: Arc::clone(&init_done),
            core: None,
        };

        let mut loop_ = ThreadLoop::new("aw-event", state);
        let sender = loop_.sender();
        let sink: CoreEventSink = Box::new(move |event| {
            sender.invoke(move |state: &mut RegistryState| state.handle_event(event));
        });

        let core: Arc<dyn CoreHandle> = server
            .connect(sink)
            .map_err(|e| BackendError::ServerUnavailable(e.to_string()))?
            .into();

        {
            // Set an initial sequence id for initialization, to trigger
            // after the registry is first populated.
            let mut state = loop_.lock();
            state.core = Some(Arc::clone(&core));
            state.init_seq = core.sync(ID_CORE, 0);
        }

        loop_
            .start()
            .map_err(|e| BackendError::ServerUnavailable(format!("loop start failed: {e}")))?;

        Ok(Self { loop_, init_done })
    }

    /// Acquire the manager lock. While held, the device list and default
    /// device names are stable and server calls may be issued.
    pub fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.loop_.lock()
    }

    /// Wait for initialization to finish. The manager must be locked.
    pub fn wait_for_init(&self, guard: &mut MutexGuard<'_, RegistryState>) {
        if self.init_done.load(Ordering::Relaxed) {
            return;
        }
        while !self.init_done.load(Ordering::Acquire) {
            self.loop_.wait(guard);
        }
    }

    /// Enumerate device names as a NUL-terminated list, default first.
    pub fn probe(&self, backend_type: BackendType) -> String {
        let mut guard = self.lock();
        self.wait_for_init(&mut guard);

        guard.dir.devices.sort_by_key(|n| n.id);
        let dir = &guard.dir;

        let mut names = String::new();
        let mut append = |name: &str, monitor: bool| {
            if monitor {
                names.push_str(MONITOR_PREFIX);
            }
            names.push_str(name);
            names.push('\0');
        };

        match backend_type {
            BackendType::Playback => {
                let defmatch = dir
                    .devices
                    .iter()
                    .position(|n| n.dev_name == dir.default_sink_dev);
                if let Some(idx) = defmatch {
                    append(&dir.devices[idx].name, false);
                }
                for (idx, node) in dir.devices.iter().enumerate() {
                    if Some(idx) != defmatch && !node.is_capture {
                        append(&node.name, false);
                    }
                }
            }
            BackendType::Capture => {
                let defmatch = dir
                    .devices
                    .iter()
                    .position(|n| n.dev_name == dir.default_source_dev);
                if let Some(idx) = defmatch {
                    append(&dir.devices[idx].name, !dir.devices[idx].is_capture);
                }
                for (idx, node) in dir.devices.iter().enumerate() {
                    if Some(idx) != defmatch && node.is_capture {
                        append(&node.name, false);
                    }
                }
                for (idx, node) in dir.devices.iter().enumerate() {
                    if Some(idx) != defmatch && !node.is_capture {
                        append(&node.name, true);
                    }
                }
            }
        }

        names
    }
}
