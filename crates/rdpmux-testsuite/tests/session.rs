use std::any::TypeId;
use std::io::{self, Read, Write};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use rdpmux_connector::ConnectionResult;
use rdpmux_core::{decode, encode_vec};
use rdpmux_dvc::DrdynvcClient;
use rdpmux_echo::client::{EchoClient, EchoListener};
use rdpmux_pdu::find_size;
use rdpmux_pdu::gcc::{ChannelName, ChannelOptions, EncryptionMethod};
use rdpmux_pdu::mcs::{SendDataIndication, SendDataRequest};
use rdpmux_pdu::nego::SecurityProtocol;
use rdpmux_pdu::x224::X224;
use rdpmux_svc::{chunkify, SvcMessage};
use rdpmux_testsuite::test_config;
use rdpmux_wts::{ChannelEvent, ChannelEventProc, SessionBuilder};

/// A transport read half fed frame-by-frame from the test body; EOF once the
/// sender is dropped.
struct ChanneledReader {
    rx: mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
    pos: usize,
}

impl ChanneledReader {
    fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            pending: Vec::new(),
            pos: 0,
        }
    }
}

impl Read for ChanneledReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos == self.pending.len() {
            match self.rx.recv() {
                Ok(bytes) => {
                    self.pending = bytes;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }

        let n = core::cmp::min(buf.len(), self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// A write half collecting everything the worker puts on the wire.
#[derive(Clone)]
struct WriteSink(Arc<Mutex<Vec<u8>>>);

impl Write for WriteSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Clone, Default)]
struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    fn recorder(&self) -> ChannelEventProc {
        let log = self.clone();
        Box::new(move |event| {
            let entry = match &event {
                ChannelEvent::Initialized => "initialized".to_owned(),
                ChannelEvent::Connected { hostname } => format!("connected:{hostname}"),
                ChannelEvent::DataReceived { data } => format!("data:{}", data.len()),
                ChannelEvent::WriteComplete { user_data } => format!("write-complete:{user_data}"),
                ChannelEvent::WriteCancelled { user_data } => format!("write-cancelled:{user_data}"),
                ChannelEvent::Attached => "attached".to_owned(),
                ChannelEvent::Detached => "detached".to_owned(),
                ChannelEvent::Disconnected => "disconnected".to_owned(),
                ChannelEvent::Terminated => "terminated".to_owned(),
            };
            log.0.lock().unwrap().push(entry);
        })
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

fn indication(channel_id: u16, user_data: Vec<u8>) -> Vec<u8> {
    encode_vec(&X224(SendDataIndication {
        initiator_id: 1002,
        channel_id,
        user_data,
    }))
    .unwrap()
}

fn split_frames(mut bytes: &[u8]) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    while !bytes.is_empty() {
        let length = find_size(bytes).unwrap().expect("whole frame");
        frames.push(bytes[..length].to_vec());
        bytes = &bytes[length..];
    }
    frames
}

const TEST_CHANNEL: &[u8; 8] = b"testch\0\0";

#[test]
fn async_dispatch_delivers_data_from_the_worker() {
    let init_log = EventLog::default();
    let open_log = EventLog::default();

    let mut builder = SessionBuilder::new(test_config());
    builder.set_async_dispatch(true);

    builder
        .virtual_channel_init(
            &[(ChannelName::from_static(TEST_CHANNEL), ChannelOptions::INITIALIZED)],
            init_log.recorder(),
        )
        .unwrap();

    let mut connector = builder.make_connector();
    let static_channels = connector.static_channels.take();

    let connection = ConnectionResult {
        io_channel_id: 1003,
        user_channel_id: 1007,
        static_channels,
        extra_channel_ids: vec![1004],
        selected_protocol: SecurityProtocol::HYBRID,
        encryption_methods: EncryptionMethod::empty(),
    };

    let (frame_tx, frame_rx) = mpsc::channel::<Vec<u8>>();
    let sink = WriteSink(Arc::default());

    let (manager, session) = builder
        .start(connection, ChanneledReader::new(frame_rx), sink)
        .unwrap();

    manager
        .virtual_channel_open(&ChannelName::from_static(TEST_CHANNEL), open_log.recorder())
        .unwrap();

    let chunks = chunkify(vec![SvcMessage::from(vec![0xAB; 16])], 1600).unwrap();
    frame_tx.send(indication(1004, chunks[0].clone())).unwrap();

    drop(frame_tx);
    session.join();

    assert!(open_log.entries().contains(&"data:16".to_owned()));
}

#[test]
fn session_runtime_end_to_end() {
    let init_log = EventLog::default();
    let open_log = EventLog::default();
    let dvc_log = EventLog::default();

    let mut builder = SessionBuilder::new(test_config());

    builder
        .virtual_channel_init(
            &[(ChannelName::from_static(TEST_CHANNEL), ChannelOptions::INITIALIZED)],
            init_log.recorder(),
        )
        .unwrap();
    builder.attach_listener(Box::new(EchoListener::new()));

    let mut connector = builder.make_connector();

    // Stand in for a completed connection sequence: the drdynvc channel was
    // joined as 1005, the facade channel as 1004.
    let mut static_channels = connector.static_channels.take();
    static_channels.attach_channel_id(TypeId::of::<DrdynvcClient>(), 1005);

    let connection = ConnectionResult {
        io_channel_id: 1003,
        user_channel_id: 1007,
        static_channels,
        extra_channel_ids: vec![1004],
        selected_protocol: SecurityProtocol::HYBRID,
        encryption_methods: EncryptionMethod::empty(),
    };

    let (frame_tx, frame_rx) = mpsc::channel::<Vec<u8>>();
    let sink = WriteSink(Arc::default());

    let (manager, session) = builder
        .start(connection, ChanneledReader::new(frame_rx), sink.clone())
        .unwrap();

    let handle = manager
        .virtual_channel_open(&ChannelName::from_static(TEST_CHANNEL), open_log.recorder())
        .unwrap();

    // Traffic for a channel id outside the join set is dropped...
    frame_tx.send(indication(9999, vec![0xDE, 0xAD])).unwrap();

    // ...and legitimate traffic afterwards is still delivered.
    let chunks = chunkify(vec![SvcMessage::from(b"hello".to_vec())], 1600).unwrap();
    assert_eq!(chunks.len(), 1);
    frame_tx.send(indication(1004, chunks[0].clone())).unwrap();

    // An asynchronous plugin write completes with its user data.
    manager.virtual_channel_write(handle, b"ping".to_vec(), 7).unwrap();

    // A write on a dynamic channel still waiting for its create response is
    // cancelled rather than escaping to the wire.
    let dvc_handle = manager
        .virtual_channel_open_dynamic(Box::new(EchoClient::new()), dvc_log.recorder())
        .unwrap();
    manager.virtual_channel_write(dvc_handle, b"early".to_vec(), 9).unwrap();

    drop(frame_tx);
    session.join();

    let init_events = init_log.entries();
    assert_eq!(init_events[0], "initialized");
    assert_eq!(init_events[1], "connected:server.example");
    assert_eq!(
        &init_events[init_events.len() - 2..],
        ["disconnected".to_owned(), "terminated".to_owned()]
    );

    let open_events = open_log.entries();
    assert!(open_events.contains(&"data:5".to_owned()));
    assert!(open_events.contains(&"write-complete:7".to_owned()));

    assert!(dvc_log.entries().contains(&"write-cancelled:9".to_owned()));

    // On the wire: a create request for the ECHO channel over drdynvc (1005)
    // and the static channel write on 1004.
    let written = sink.0.lock().unwrap().clone();
    let frames = split_frames(&written);

    let mut saw_create_request = false;
    let mut saw_static_write = false;

    for frame in &frames {
        // The tail of the stream is the orderly disconnect (ultimatum plus
        // X.224 disconnect request), which is not a send-data request.
        let Ok(request) = decode::<X224<SendDataRequest>>(&frame[..]) else {
            continue;
        };
        let request = request.0;
        assert_eq!(request.initiator_id, 1007);

        match request.channel_id {
            1005 => saw_create_request = true,
            1004 => {
                // CHANNEL_PDU_HEADER: total length 4, FIRST | LAST
                assert_eq!(&request.user_data[..8], [0x04, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00]);
                assert_eq!(&request.user_data[8..], b"ping");
                saw_static_write = true;
            }
            other => panic!("unexpected channel id on the wire: {other}"),
        }
    }

    assert!(saw_create_request);
    assert!(saw_static_write);
}
