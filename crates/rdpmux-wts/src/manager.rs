use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, warn};

use rdpmux_connector::{ClientConnector, Config, ConnectionResult};
use rdpmux_dvc::{DrdynvcClient, DvcListener, DvcProcessor, DynamicChannelId};
use rdpmux_pdu::gcc::{ChannelName, ChannelOptions};
use rdpmux_svc::{SvcProcessor, StaticChannelSet};

use crate::router::{StaticChannelRouter, STATIC_CHANNELS_MAX};
use crate::worker::WorkerMessage;
use crate::{ChannelError, ChannelEvent, ChannelEventProc, ChannelResult, SharedEventProc, StreamPool};

/// Handle to a registration made through `virtual_channel_init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitHandle(u32);

/// Handle to one open channel, static or dynamic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct OpenHandle(u32);

#[derive(Debug, Clone)]
pub(crate) enum HandleKind {
    Static { mcs_channel_id: u16 },
    Dynamic { channel_id: DynamicChannelId },
}

#[derive(Debug)]
pub(crate) struct HandleRecord {
    pub(crate) kind: HandleKind,
    pub(crate) event_proc: SharedEventProc,
}

/// State shared between the manager, the reader thread and the worker thread.
pub(crate) struct Shared {
    pub(crate) static_channels: Mutex<StaticChannelSet>,
    pub(crate) router: Mutex<StaticChannelRouter>,
    pub(crate) handles: Mutex<BTreeMap<u32, HandleRecord>>,
    pub(crate) init_event_procs: Vec<SharedEventProc>,
    pub(crate) pool: StreamPool,
    pub(crate) user_channel_id: u16,
    pub(crate) drdynvc_channel_id: Option<u16>,
    pub(crate) chunk_size: usize,
    pub(crate) async_dispatch: bool,
}

impl Shared {
    /// Runs `f` with the DRDYNVC engine under the static channel set lock.
    pub(crate) fn with_drdynvc<T>(&self, f: impl FnOnce(&mut DrdynvcClient) -> T) -> ChannelResult<T> {
        let mut set = self.static_channels.lock().expect("static channel set poisoned");

        let drdynvc = set
            .get_by_type_mut::<DrdynvcClient>()
            .and_then(|processor| processor.as_any_mut().downcast_mut::<DrdynvcClient>())
            .ok_or(ChannelError::NotReady)?;

        Ok(f(drdynvc))
    }
}

/// Builds a channel session: channel registrations happen here, before the
/// connection is established.
pub struct SessionBuilder {
    config: Config,
    static_channels: StaticChannelSet,
    listeners: Vec<Box<dyn DvcListener>>,
    router: StaticChannelRouter,
    init_event_procs: Vec<SharedEventProc>,
    init_handles: u32,
    connector_built: bool,
    async_dispatch: bool,
}

impl SessionBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            static_channels: StaticChannelSet::new(),
            listeners: Vec::new(),
            router: StaticChannelRouter::new(),
            init_event_procs: Vec::new(),
            init_handles: 0,
            connector_built: false,
            async_dispatch: false,
        }
    }

    /// When enabled, plugin data events are handed from the reader to the
    /// worker thread instead of being delivered inline.
    pub fn set_async_dispatch(&mut self, async_dispatch: bool) {
        self.async_dispatch = async_dispatch;
    }

    /// Registers up to 31 static channels for a plugin.
    ///
    /// Must be called before the connector is built (that is, from the
    /// plugin's entry function); later calls fail with `AlreadyConnected`.
    pub fn virtual_channel_init(
        &mut self,
        channel_defs: &[(ChannelName, ChannelOptions)],
        event_proc: ChannelEventProc,
    ) -> ChannelResult<InitHandle> {
        if self.connector_built {
            return Err(ChannelError::AlreadyConnected);
        }

        // One slot stays reserved for the drdynvc channel that
        // `make_connector` adds implicitly.
        let reserved = 1;

        if self.static_channels.len() + self.router.len() + channel_defs.len() + reserved > STATIC_CHANNELS_MAX {
            return Err(ChannelError::TooManyChannels);
        }

        for (name, options) in channel_defs {
            self.router.register(name.clone(), *options)?;
        }

        let event_proc = SharedEventProc::new(event_proc);
        event_proc.post(ChannelEvent::Initialized);
        self.init_event_procs.push(event_proc);

        let handle = InitHandle(self.init_handles);
        self.init_handles += 1;
        Ok(handle)
    }

    /// Registers a typed static channel processor (library-level consumers).
    pub fn attach_static_channel<T>(&mut self, channel: T)
    where
        T: SvcProcessor + 'static,
    {
        self.static_channels.insert(channel);
    }

    /// Registers a listener accepting server-created dynamic channels.
    pub fn attach_listener(&mut self, listener: Box<dyn DvcListener>) {
        self.listeners.push(listener);
    }

    /// Builds the connector that drives the connection sequence.
    ///
    /// The typed static channels (with the DRDYNVC engine appended) move
    /// into the connector; they come back through the
    /// [`ConnectionResult`].
    pub fn make_connector(&mut self) -> ClientConnector {
        let mut drdynvc = DrdynvcClient::new().with_chunk_size(self.config.chunk_size());
        for listener in self.listeners.drain(..) {
            drdynvc.attach_listener(listener);
        }

        self.static_channels.insert(drdynvc);
        self.connector_built = true;

        let mut connector = ClientConnector::new(self.config.clone());
        for def in self.router.channel_defs() {
            connector.attach_extra_channel(def);
        }

        core::mem::swap(&mut connector.static_channels, &mut self.static_channels);

        connector
    }

    /// Starts the session runtime over an established connection.
    ///
    /// `read` and `write` are the two halves of the (possibly upgraded)
    /// transport the connection sequence ran on.
    pub fn start<R, W>(mut self, connection: ConnectionResult, read: R, write: W) -> ChannelResult<(ChannelManager, Session)>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        if !self.connector_built {
            return Err(ChannelError::InitializationError);
        }

        self.router.bind_ids(&connection.extra_channel_ids);

        let static_channels = connection.static_channels;
        let drdynvc_channel_id = static_channels.get_channel_id_by_type::<DrdynvcClient>();

        if drdynvc_channel_id.is_none() {
            warn!("No drdynvc channel was joined; dynamic channels are unavailable");
        }

        let chunk_size = self.config.chunk_size();

        let shared = Arc::new(Shared {
            static_channels: Mutex::new(static_channels),
            router: Mutex::new(self.router),
            handles: Mutex::new(BTreeMap::new()),
            init_event_procs: self.init_event_procs,
            pool: StreamPool::new(chunk_size),
            user_channel_id: connection.user_channel_id,
            drdynvc_channel_id,
            chunk_size,
            async_dispatch: self.async_dispatch,
        });

        for event_proc in &shared.init_event_procs {
            event_proc.post(ChannelEvent::Connected {
                hostname: self.config.server_hostname.clone(),
            });
        }

        let (to_worker, from_manager) = mpsc::channel::<WorkerMessage>();

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("rdpmux-channel-worker".to_owned())
            .spawn(move || crate::worker::run_worker(write, from_manager, worker_shared))
            .map_err(ChannelError::Io)?;

        let reader_shared = Arc::clone(&shared);
        let reader_sender = to_worker.clone();
        let reader = std::thread::Builder::new()
            .name("rdpmux-channel-reader".to_owned())
            .spawn(move || crate::reader::run_reader(read, reader_shared, reader_sender))
            .map_err(ChannelError::Io)?;

        let manager = ChannelManager {
            shared,
            to_worker,
            next_open_handle: Mutex::new(0),
        };

        let session = Session { reader, worker };

        Ok((manager, session))
    }
}

/// The running session's threads.
pub struct Session {
    reader: JoinHandle<()>,
    worker: JoinHandle<()>,
}

impl Session {
    /// Waits for both threads to finish.
    pub fn join(self) {
        let _ = self.reader.join();
        let _ = self.worker.join();
    }
}

/// The WTS-style facade exposed to plugins once the session runs.
pub struct ChannelManager {
    shared: Arc<Shared>,
    to_worker: mpsc::Sender<WorkerMessage>,
    next_open_handle: Mutex<u32>,
}

impl ChannelManager {
    fn allocate_handle(&self, record: HandleRecord) -> OpenHandle {
        let mut next = self.next_open_handle.lock().expect("handle counter poisoned");
        let handle = OpenHandle(*next);
        *next += 1;

        self.shared
            .handles
            .lock()
            .expect("handle table poisoned")
            .insert(handle.0, record);

        handle
    }

    fn handle_record(&self, handle: OpenHandle) -> ChannelResult<HandleRecord> {
        let handles = self.shared.handles.lock().expect("handle table poisoned");
        let record = handles.get(&handle.0).ok_or(ChannelError::NotOpen)?;

        Ok(HandleRecord {
            kind: record.kind.clone(),
            event_proc: record.event_proc.clone(),
        })
    }

    /// Binds the plugin to one previously registered static channel.
    pub fn virtual_channel_open(
        &self,
        name: &ChannelName,
        event_proc: ChannelEventProc,
    ) -> ChannelResult<OpenHandle> {
        let event_proc = SharedEventProc::new(event_proc);

        let mcs_channel_id = {
            let mut router = self.shared.router.lock().expect("router poisoned");
            router.open(name, event_proc.clone())?
        };

        debug!(name = ?name.as_str(), mcs_channel_id, "Static channel opened");

        Ok(self.allocate_handle(HandleRecord {
            kind: HandleKind::Static { mcs_channel_id },
            event_proc,
        }))
    }

    /// Opens a dynamic channel by issuing a create request over drdynvc.
    ///
    /// The handle is usable once the server accepts; writes before that
    /// complete as cancelled.
    pub fn virtual_channel_open_dynamic(
        &self,
        processor: Box<dyn DvcProcessor>,
        event_proc: ChannelEventProc,
    ) -> ChannelResult<OpenHandle> {
        let drdynvc_channel_id = self.shared.drdynvc_channel_id.ok_or(ChannelError::NotReady)?;

        let (channel_id, messages) = self
            .shared
            .with_drdynvc(|drdynvc| drdynvc.open_channel(processor))?
            .map_err(ChannelError::Pdu)?;

        let chunks = rdpmux_svc::chunkify(messages, self.shared.chunk_size)
            .map_err(|e| ChannelError::Pdu(rdpmux_pdu::encode_err!(e)))?;

        self.to_worker
            .send(WorkerMessage::SendRaw {
                mcs_channel_id: drdynvc_channel_id,
                chunks,
            })
            .map_err(|_| ChannelError::NotReady)?;

        Ok(self.allocate_handle(HandleRecord {
            kind: HandleKind::Dynamic { channel_id },
            event_proc: SharedEventProc::new(event_proc),
        }))
    }

    /// Writes asynchronously on an open channel.
    ///
    /// Ownership of `buffer` transfers to the manager until the matching
    /// `WriteComplete` (or `WriteCancelled`) event fires with `user_data`.
    pub fn virtual_channel_write(&self, handle: OpenHandle, buffer: Vec<u8>, user_data: usize) -> ChannelResult<()> {
        let record = self.handle_record(handle)?;

        if buffer.is_empty() {
            // Historical overload of the write verb; kept for compatibility.
            warn!("Zero-length write treated as a close request; use virtual_channel_close instead");
            return self.virtual_channel_close(handle);
        }

        let message = match record.kind {
            HandleKind::Dynamic { channel_id } => WorkerMessage::WriteDynamic {
                channel_id,
                payload: buffer,
                user_data,
                event_proc: record.event_proc,
            },
            HandleKind::Static { mcs_channel_id } => {
                if !self.shared.router.lock().expect("router poisoned").is_open(mcs_channel_id) {
                    return Err(ChannelError::NotOpen);
                }

                WorkerMessage::WriteStatic {
                    mcs_channel_id,
                    payload: buffer,
                    user_data,
                    event_proc: record.event_proc,
                }
            }
        };

        self.to_worker.send(message).map_err(|_| ChannelError::NotReady)
    }

    /// Closes an open channel.
    ///
    /// For dynamic channels a close PDU goes out on the wire and the
    /// processor observes its final close callback.
    pub fn virtual_channel_close(&self, handle: OpenHandle) -> ChannelResult<()> {
        let record = {
            let mut handles = self.shared.handles.lock().expect("handle table poisoned");
            handles.remove(&handle.0).ok_or(ChannelError::NotOpen)?
        };

        match record.kind {
            HandleKind::Dynamic { channel_id } => {
                let drdynvc_channel_id = self.shared.drdynvc_channel_id.ok_or(ChannelError::NotReady)?;

                let messages = self
                    .shared
                    .with_drdynvc(|drdynvc| drdynvc.close_channel(channel_id))?
                    .map_err(ChannelError::Pdu)?;

                let chunks = rdpmux_svc::chunkify(messages, self.shared.chunk_size)
                    .map_err(|e| ChannelError::Pdu(rdpmux_pdu::encode_err!(e)))?;

                self.to_worker
                    .send(WorkerMessage::SendRaw {
                        mcs_channel_id: drdynvc_channel_id,
                        chunks,
                    })
                    .map_err(|_| ChannelError::NotReady)?;
            }
            HandleKind::Static { mcs_channel_id } => {
                self.shared.router.lock().expect("router poisoned").close(mcs_channel_id);
            }
        }

        Ok(())
    }

    /// Notifies every plugin that the session was attached to a client.
    pub fn post_attached(&self) {
        for event_proc in &self.shared.init_event_procs {
            event_proc.post(ChannelEvent::Attached);
        }
    }

    /// Notifies every plugin that the session was detached from its client.
    pub fn post_detached(&self) {
        for event_proc in &self.shared.init_event_procs {
            event_proc.post(ChannelEvent::Detached);
        }
    }

    /// Initiates an orderly shutdown: pending writes complete as cancelled,
    /// every running channel observes its close callback, then the transport
    /// goes down.
    pub fn shutdown(&self) {
        let _ = self.to_worker.send(WorkerMessage::Quit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdpmux_connector::DesktopSize;

    fn config() -> Config {
        Config {
            desktop_size: DesktopSize { width: 1024, height: 768 },
            server_hostname: "server.example".to_owned(),
            client_name: "rdpmux-test".to_owned(),
            client_build: 2600,
            keyboard_layout: 0x409,
            keyboard_type: 4,
            keyboard_subtype: 0,
            keyboard_functional_keys_count: 12,
            ime_file_name: String::new(),
            tls_security: true,
            nla_security: true,
            rdp_security: true,
            request_data: None,
            virtual_channel_chunk_size: Config::DEFAULT_CHUNK_SIZE,
        }
    }

    fn channel_defs(count: usize) -> Vec<(ChannelName, ChannelOptions)> {
        (0..count)
            .map(|i| {
                let name = ChannelName::from_utf8(&format!("chan{i:02}")).expect("ASCII channel name");
                (name, ChannelOptions::INITIALIZED)
            })
            .collect()
    }

    #[test]
    fn init_reserves_a_slot_for_drdynvc() {
        let mut builder = SessionBuilder::new(config());

        // 31 registrations plus the implicit drdynvc channel would exceed
        // the 31-channel limit.
        let e = builder
            .virtual_channel_init(&channel_defs(31), Box::new(|_| {}))
            .unwrap_err();
        assert!(matches!(e, ChannelError::TooManyChannels));
    }

    #[test]
    fn thirty_registrations_fill_the_table() {
        let mut builder = SessionBuilder::new(config());

        builder
            .virtual_channel_init(&channel_defs(30), Box::new(|_| {}))
            .unwrap();

        // The table is full: even one more registration is refused.
        let one_more = channel_defs(31).split_off(30);
        let e = builder.virtual_channel_init(&one_more, Box::new(|_| {})).unwrap_err();
        assert!(matches!(e, ChannelError::TooManyChannels));

        // 30 registered channels plus drdynvc make exactly 31 definitions.
        let connector = builder.make_connector();
        assert_eq!(connector.extra_channels.len(), 30);
        assert_eq!(connector.static_channels.len() + connector.extra_channels.len(), 31);
    }
}
