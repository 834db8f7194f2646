use core::fmt;
use std::collections::BTreeMap;

use tracing::{debug, warn};

use rdpmux_core::ReadCursor;
use rdpmux_pdu::gcc::ChannelName;
use rdpmux_pdu::{decode_err, pdu_other_err, PduResult};
use rdpmux_svc::{ChannelFlags, CompressionCondition, SvcMessage, SvcProcessor, CHANNEL_CHUNK_LENGTH};

use crate::complete_data::CompleteData;
use crate::pdu::{
    CapabilitiesRequestPdu, CapabilitiesResponsePdu, CapsVersion, ClosePdu, Cmd, CreateRequestPdu, CreateResponsePdu,
    CreationStatus, DrdynvcClientPdu, Header,
};
use crate::{encode_dvc_messages, DvcListener, DvcProcessor, DynamicChannelId};

/// Channel ids allocated for locally initiated channels start here, far from
/// the range servers hand out, so the two spaces never collide.
const LOCAL_CHANNEL_ID_BASE: DynamicChannelId = 0x4000_0000;

/// Upper bound on simultaneously open dynamic channels; a create request
/// beyond it is answered with STATUS_NO_MEMORY.
const MAX_DYNAMIC_CHANNELS: usize = 256;

/// Lifecycle of one dynamic virtual channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Created locally, waiting for the peer to confirm.
    Init,
    /// Open in both directions.
    Running,
}

/// The state of the DRDYNVC static channel itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrdynvcState {
    /// No capability exchange happened yet.
    Initial,
    /// Capabilities were exchanged; data PDUs are accepted.
    Ready,
}

struct DynamicChannel {
    name: String,
    processor: Box<dyn DvcProcessor>,
    complete_data: CompleteData,
    state: ChannelState,
    locally_initiated: bool,
}

impl DynamicChannel {
    fn new(name: String, processor: Box<dyn DvcProcessor>, state: ChannelState, locally_initiated: bool) -> Self {
        Self {
            name,
            processor,
            complete_data: CompleteData::new(),
            state,
            locally_initiated,
        }
    }
}

/// DRDYNVC Static Virtual Channel (the Remote Desktop Protocol: Dynamic
/// Virtual Channel Extension).
///
/// Multiplexes dynamic virtual channels over one static channel: capability
/// negotiation, channel creation against the registered listeners, data
/// reassembly and per-channel dispatch.
pub struct DrdynvcClient {
    listeners: BTreeMap<String, Box<dyn DvcListener>>,
    channels: BTreeMap<DynamicChannelId, DynamicChannel>,
    state: DrdynvcState,
    chunk_size: usize,
    next_local_channel_id: DynamicChannelId,
}

impl fmt::Debug for DrdynvcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DrdynvcClient([")?;

        for (i, listener) in self.listeners.values().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", listener.channel_name())?;
        }

        write!(f, "])")
    }
}

impl DrdynvcClient {
    pub const NAME: ChannelName = ChannelName::from_static(b"drdynvc\0");

    pub fn new() -> Self {
        Self {
            listeners: BTreeMap::new(),
            channels: BTreeMap::new(),
            state: DrdynvcState::Initial,
            chunk_size: CHANNEL_CHUNK_LENGTH,
            next_local_channel_id: LOCAL_CHANNEL_ID_BASE,
        }
    }

    /// Sets the chunk budget used when fragmenting outgoing messages.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    #[must_use]
    pub fn with_listener<T>(mut self, listener: T) -> Self
    where
        T: DvcListener + 'static,
    {
        self.attach_listener(Box::new(listener));
        self
    }

    pub fn attach_listener(&mut self, listener: Box<dyn DvcListener>) {
        let name = listener.channel_name().to_owned();
        self.listeners.insert(name, listener);
    }

    pub fn is_ready(&self) -> bool {
        self.state == DrdynvcState::Ready
    }

    /// Looks up the lifecycle state of a channel, if it is still alive.
    pub fn channel_state(&self, channel_id: DynamicChannelId) -> Option<ChannelState> {
        self.channels.get(&channel_id).map(|channel| channel.state)
    }

    pub fn channel_id_by_name(&self, name: &str) -> Option<DynamicChannelId> {
        self.channels
            .iter()
            .find(|(_, channel)| channel.name == name)
            .map(|(id, _)| *id)
    }

    /// Opens a dynamic channel from the client side by issuing a create
    /// request; the channel stays in [`ChannelState::Init`] until the peer
    /// confirms it.
    pub fn open_channel(
        &mut self,
        processor: Box<dyn DvcProcessor>,
    ) -> PduResult<(DynamicChannelId, Vec<SvcMessage>)> {
        let channel_id = self.next_local_channel_id;
        self.next_local_channel_id += 1;

        let name = processor.channel_name().to_owned();

        debug!(channel_id, name = %name, "Opening local dynamic channel");

        if self.state == DrdynvcState::Initial {
            // Client-initiated channels can legitimately race the server's
            // capability request.
            warn!("Create request issued before the capability exchange completed");
        }

        // A locally initiated create carries the channel name, exactly like
        // a server-side create request.
        let messages = vec![SvcMessage::from(CreateRequestPdu::new(channel_id, name.clone()))];

        self.channels
            .insert(channel_id, DynamicChannel::new(name, processor, ChannelState::Init, true));

        Ok((channel_id, messages))
    }

    /// Closes a dynamic channel from the client side.
    ///
    /// The peer is notified with a close PDU and the processor observes its
    /// final `close` callback.
    pub fn close_channel(&mut self, channel_id: DynamicChannelId) -> PduResult<Vec<SvcMessage>> {
        let Some(mut channel) = self.channels.remove(&channel_id) else {
            return Err(pdu_other_err!("DRDYNVC", "close of an unknown channel id"));
        };

        debug!(channel_id, name = %channel.name, "Closing dynamic channel");
        channel.processor.close(channel_id);

        Ok(vec![SvcMessage::from(DrdynvcClientPdu::Close(ClosePdu::new(channel_id)))])
    }

    /// Fragments and frames a complete DVC message for this channel.
    ///
    /// Fails when the channel is not in [`ChannelState::Running`].
    pub fn encode_data(
        &mut self,
        channel_id: DynamicChannelId,
        messages: Vec<crate::DvcMessage>,
    ) -> PduResult<Vec<SvcMessage>> {
        match self.channels.get(&channel_id).map(|channel| channel.state) {
            Some(ChannelState::Running) => {}
            Some(ChannelState::Init) => {
                return Err(pdu_other_err!("DRDYNVC", "write on a channel that is not open yet"))
            }
            None => return Err(pdu_other_err!("DRDYNVC", "write on a closed channel")),
        }

        encode_dvc_messages(channel_id, messages, ChannelFlags::empty(), self.chunk_size)
    }

    /// Tears down every live channel, invoking the processors' close
    /// callbacks. Used on connection loss and shutdown; nothing goes out on
    /// the wire.
    pub fn drain_channels(&mut self) {
        for (channel_id, mut channel) in std::mem::take(&mut self.channels) {
            debug!(channel_id, name = %channel.name, "Draining dynamic channel");
            channel.processor.close(channel_id);
        }
    }

    fn create_capabilities_response(&mut self, version: CapsVersion) -> SvcMessage {
        let caps_response = DrdynvcClientPdu::Capabilities(CapabilitiesResponsePdu::new(version));
        debug!(?version, "Send DVC Capabilities Response PDU");
        self.state = DrdynvcState::Ready;
        SvcMessage::from(caps_response)
    }

    fn process_capability_request(&mut self, src: &mut ReadCursor<'_>) -> PduResult<Vec<SvcMessage>> {
        // Parsed leniently instead of through `CapabilitiesRequestPdu`:
        // some servers advertise versions this client has never heard of,
        // and the observed behavior is to answer those with version 3.
        if src.len() < 3 {
            return Err(pdu_other_err!("DRDYNVC", "capability request truncated"));
        }

        let _pad = src.read_u8();
        let raw_version = src.read_u16();

        let version = match CapsVersion::try_from(raw_version) {
            Ok(version) => version,
            Err(_) => {
                warn!(raw_version, "Unknown DVC capabilities version, forcing version 3");
                CapsVersion::V3
            }
        };

        let charges = if version != CapsVersion::V1 && src.len() >= CapabilitiesRequestPdu::PRIORITY_CHARGE_COUNT * 2 {
            let mut charges = [0u16; CapabilitiesRequestPdu::PRIORITY_CHARGE_COUNT];
            for charge in charges.iter_mut() {
                *charge = src.read_u16();
            }
            Some(charges)
        } else {
            None
        };

        debug!(?version, ?charges, "Got DVC Capabilities Request PDU");

        Ok(vec![self.create_capabilities_response(version)])
    }

    fn process_create(&mut self, header: Header, src: &mut ReadCursor<'_>) -> PduResult<Vec<SvcMessage>> {
        let channel_id = header.cb_id.decode_val(src).map_err(|e| decode_err!(e))?;

        // A create-tagged PDU addressed at a pending locally initiated
        // channel is the peer's response to our create request.
        if let Some(channel) = self.channels.get(&channel_id) {
            if channel.locally_initiated && channel.state == ChannelState::Init {
                return self.process_create_response(channel_id, src);
            }

            return Err(pdu_other_err!(
                "DRDYNVC",
                "create request re-uses the id of a live channel"
            ));
        }

        let pdu = CreateRequestPdu::decode_with_channel_id(header, channel_id, src).map_err(|e| decode_err!(e))?;
        debug!(channel_id, name = %pdu.channel_name, "Got DVC Create Request PDU");

        let mut responses = Vec::new();

        if self.state == DrdynvcState::Initial {
            // Tolerated server quirk: some servers skip the capability
            // exchange entirely and open their first channel right away.
            warn!("Got a DVC Create Request PDU before any Capabilities Request PDU, synthesizing a version 3 response");
            responses.push(self.create_capabilities_response(CapsVersion::V3));
        }

        if self.channels.len() >= MAX_DYNAMIC_CHANNELS {
            warn!(channel_id, "Dynamic channel table exhausted");
            responses.push(SvcMessage::from(DrdynvcClientPdu::Create(CreateResponsePdu::new(
                channel_id,
                CreationStatus::NO_MEMORY,
            ))));
            return Ok(responses);
        }

        let listener = self.listeners.get_mut(&pdu.channel_name);

        let processor = match listener {
            Some(listener) => listener.on_new_channel(channel_id),
            None => {
                warn!(name = %pdu.channel_name, "No listener for dynamic channel");
                None
            }
        };

        let Some(mut processor) = processor else {
            responses.push(SvcMessage::from(DrdynvcClientPdu::Create(CreateResponsePdu::new(
                channel_id,
                CreationStatus::NO_LISTENER,
            ))));
            return Ok(responses);
        };

        responses.push(SvcMessage::from(DrdynvcClientPdu::Create(CreateResponsePdu::new(
            channel_id,
            CreationStatus::OK,
        ))));

        let start_messages = processor.start(channel_id)?;

        self.channels.insert(
            channel_id,
            DynamicChannel::new(pdu.channel_name, processor, ChannelState::Running, false),
        );

        responses.extend(encode_dvc_messages(
            channel_id,
            start_messages,
            ChannelFlags::empty(),
            self.chunk_size,
        )?);

        Ok(responses)
    }

    fn process_create_response(
        &mut self,
        channel_id: DynamicChannelId,
        src: &mut ReadCursor<'_>,
    ) -> PduResult<Vec<SvcMessage>> {
        if src.len() < 4 {
            return Err(pdu_other_err!("DRDYNVC", "create response truncated"));
        }

        let creation_status = CreationStatus::from(src.read_u32());

        if !creation_status.is_success() {
            let name = self
                .channels
                .remove(&channel_id)
                .map(|channel| channel.name)
                .unwrap_or_default();
            warn!(
                channel_id,
                status = u32::from(creation_status),
                name = %name,
                "Peer refused locally initiated dynamic channel"
            );
            return Ok(Vec::new());
        }

        let channel = self
            .channels
            .get_mut(&channel_id)
            .expect("presence established by the caller");
        channel.state = ChannelState::Running;

        debug!(channel_id, name = %channel.name, "Locally initiated channel is open");

        let start_messages = channel.processor.start(channel_id)?;
        encode_dvc_messages(channel_id, start_messages, ChannelFlags::empty(), self.chunk_size)
    }

    fn process_data_first(&mut self, header: Header, src: &mut ReadCursor<'_>) -> PduResult<Vec<SvcMessage>> {
        let channel_id = header.cb_id.decode_val(src).map_err(|e| decode_err!(e))?;
        let total_length = header.sp.decode_val(src).map_err(|e| decode_err!(e))?;
        let payload = src.read_remaining().to_vec();

        let Some(channel) = self.channels.get_mut(&channel_id) else {
            warn!(channel_id, "DataFirst PDU for an unknown channel id, ignoring");
            return Ok(Vec::new());
        };

        let complete = channel
            .complete_data
            .process_data_first_pdu(total_length as usize, payload);

        match complete {
            Some(complete_payload) => self.dispatch_payload(channel_id, &complete_payload),
            None => Ok(Vec::new()),
        }
    }

    fn process_data(&mut self, header: Header, src: &mut ReadCursor<'_>) -> PduResult<Vec<SvcMessage>> {
        let channel_id = header.cb_id.decode_val(src).map_err(|e| decode_err!(e))?;
        let payload = src.read_remaining().to_vec();

        let Some(channel) = self.channels.get_mut(&channel_id) else {
            warn!(channel_id, "Data PDU for an unknown channel id, ignoring");
            return Ok(Vec::new());
        };

        match channel.complete_data.process_data_pdu(payload) {
            Ok(Some(complete_payload)) => self.dispatch_payload(channel_id, &complete_payload),
            Ok(None) => Ok(Vec::new()),
            Err(e) => {
                // Reassembly overflow: the channel is corrupt, close it.
                warn!(channel_id, error = %e, "Dynamic channel reassembly failed, closing the channel");
                let mut channel = self.channels.remove(&channel_id).expect("looked up above");
                channel.processor.close(channel_id);
                Ok(vec![SvcMessage::from(DrdynvcClientPdu::Close(ClosePdu::new(channel_id)))])
            }
        }
    }

    fn dispatch_payload(&mut self, channel_id: DynamicChannelId, payload: &[u8]) -> PduResult<Vec<SvcMessage>> {
        let channel = self
            .channels
            .get_mut(&channel_id)
            .expect("channel presence checked by the caller");

        let responses = channel.processor.process(channel_id, payload)?;

        encode_dvc_messages(channel_id, responses, ChannelFlags::empty(), self.chunk_size)
    }

    fn process_close(&mut self, header: Header, src: &mut ReadCursor<'_>) -> PduResult<Vec<SvcMessage>> {
        let channel_id = header.cb_id.decode_val(src).map_err(|e| decode_err!(e))?;

        let Some(mut channel) = self.channels.remove(&channel_id) else {
            warn!(channel_id, "Close PDU for an unknown channel id, ignoring");
            return Ok(Vec::new());
        };

        debug!(channel_id, name = %channel.name, "Got DVC Close Request PDU");
        channel.processor.close(channel_id);

        if channel.locally_initiated {
            // Our own close request came back confirmed, nothing to send.
            return Ok(Vec::new());
        }

        Ok(vec![SvcMessage::from(DrdynvcClientPdu::Close(ClosePdu::new(channel_id)))])
    }
}

impl rdpmux_core::AsAny for DrdynvcClient {
    fn as_any(&self) -> &dyn core::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn core::any::Any {
        self
    }
}

impl Default for DrdynvcClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SvcProcessor for DrdynvcClient {
    fn channel_name(&self) -> ChannelName {
        DrdynvcClient::NAME
    }

    fn compression_condition(&self) -> CompressionCondition {
        CompressionCondition::WhenRdpDataIsCompressed
    }

    fn process(&mut self, payload: &[u8]) -> PduResult<Vec<SvcMessage>> {
        let mut src = ReadCursor::new(payload);
        let header: Header = decode_header(&mut src)?;

        if self.state != DrdynvcState::Ready && !matches!(header.cmd, Cmd::Capability | Cmd::Create) {
            warn!(cmd = ?header.cmd, "DRDYNVC PDU received before the capability exchange, ignoring");
            return Ok(Vec::new());
        }

        match header.cmd {
            Cmd::Capability => self.process_capability_request(&mut src),
            Cmd::Create => self.process_create(header, &mut src),
            Cmd::DataFirst => self.process_data_first(header, &mut src),
            Cmd::Data => self.process_data(header, &mut src),
            Cmd::Close => self.process_close(header, &mut src),
        }
    }

    fn is_drdynvc(&self) -> bool {
        true
    }
}

fn decode_header(src: &mut ReadCursor<'_>) -> PduResult<Header> {
    Header::decode(src).map_err(|e| decode_err!(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DvcMessage;
    use rdpmux_core::impl_as_any;

    #[derive(Debug)]
    struct EchoBack;

    impl DvcProcessor for EchoBack {
        fn channel_name(&self) -> &str {
            "TEST"
        }

        fn start(&mut self, _channel_id: DynamicChannelId) -> PduResult<Vec<DvcMessage>> {
            Ok(Vec::new())
        }

        fn process(&mut self, _channel_id: DynamicChannelId, payload: &[u8]) -> PduResult<Vec<DvcMessage>> {
            Ok(vec![Box::new(payload.to_vec())])
        }
    }

    impl_as_any!(EchoBack);

    struct TestListener {
        accept: bool,
    }

    impl DvcListener for TestListener {
        fn channel_name(&self) -> &str {
            "TEST"
        }

        fn on_new_channel(&mut self, _channel_id: DynamicChannelId) -> Option<Box<dyn DvcProcessor>> {
            self.accept.then(|| Box::new(EchoBack) as Box<dyn DvcProcessor>)
        }
    }

    fn ready_client(accept: bool) -> DrdynvcClient {
        let mut client = DrdynvcClient::new().with_listener(TestListener { accept });
        let caps_request = [0x50, 0x00, 0x01, 0x00];
        let responses = client.process(&caps_request).unwrap();
        assert_eq!(responses.len(), 1);
        assert!(client.is_ready());
        client
    }

    fn create_request(channel_id: u8, name: &str) -> Vec<u8> {
        let mut request = vec![0x10, channel_id];
        request.extend_from_slice(name.as_bytes());
        request.push(0);
        request
    }

    #[test]
    fn capability_request_moves_to_ready() {
        let client = ready_client(true);
        assert!(client.is_ready());
    }

    #[test]
    fn unknown_capability_version_is_answered_with_v3() {
        let mut client = DrdynvcClient::new();
        let caps_request = [0x50, 0x00, 0x09, 0x00];
        let responses = client.process(&caps_request).unwrap();

        let encoded = rdpmux_core::encode_vec(responses[0].pdu()).unwrap();
        assert_eq!(encoded, [0x50, 0x00, 0x03, 0x00]);
        assert!(client.is_ready());
    }

    #[test]
    fn create_request_before_capabilities_synthesizes_caps_response() {
        let mut client = DrdynvcClient::new().with_listener(TestListener { accept: true });

        let responses = client.process(&create_request(5, "TEST")).unwrap();

        assert_eq!(responses.len(), 2);
        let caps = rdpmux_core::encode_vec(responses[0].pdu()).unwrap();
        assert_eq!(caps, [0x50, 0x00, 0x03, 0x00]);
        let create = rdpmux_core::encode_vec(responses[1].pdu()).unwrap();
        assert_eq!(create, [0x10, 0x05, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(client.channel_state(5), Some(ChannelState::Running));
    }

    #[test]
    fn create_request_without_listener_is_refused() {
        let mut client = ready_client(true);

        let responses = client.process(&create_request(7, "NOBODY")).unwrap();

        assert_eq!(responses.len(), 1);
        let create = rdpmux_core::encode_vec(responses[0].pdu()).unwrap();
        assert_eq!(create, [0x10, 0x07, 0x01, 0x00, 0x00, 0xc0]);
        assert_eq!(client.channel_state(7), None);
    }

    #[test]
    fn rejecting_listener_yields_no_listener_status() {
        let mut client = ready_client(false);

        let responses = client.process(&create_request(7, "TEST")).unwrap();

        let create = rdpmux_core::encode_vec(responses[0].pdu()).unwrap();
        assert_eq!(create, [0x10, 0x07, 0x01, 0x00, 0x00, 0xc0]);
    }

    #[test]
    fn duplicate_live_channel_id_is_a_protocol_error() {
        let mut client = ready_client(true);

        client.process(&create_request(5, "TEST")).unwrap();
        assert!(client.process(&create_request(5, "TEST")).is_err());
    }

    #[test]
    fn data_is_dispatched_and_echoed() {
        let mut client = ready_client(true);
        client.process(&create_request(5, "TEST")).unwrap();

        // DATA, channel 5, payload
        let responses = client.process(&[0x30, 0x05, 0xAA, 0xBB]).unwrap();
        assert_eq!(responses.len(), 1);

        let encoded = rdpmux_core::encode_vec(responses[0].pdu()).unwrap();
        assert_eq!(encoded, [0x30, 0x05, 0xAA, 0xBB]);
    }

    #[test]
    fn fragmented_data_is_reassembled_before_dispatch() {
        let mut client = ready_client(true);
        client.process(&create_request(5, "TEST")).unwrap();

        // DATA_FIRST with total 4, carrying 2 bytes
        let responses = client.process(&[0x24, 0x05, 0x04, 0x00, 0x01, 0x02]).unwrap();
        assert!(responses.is_empty());

        // DATA carrying the remaining 2 bytes triggers the dispatch
        let responses = client.process(&[0x30, 0x05, 0x03, 0x04]).unwrap();
        assert_eq!(responses.len(), 1);

        let encoded = rdpmux_core::encode_vec(responses[0].pdu()).unwrap();
        assert_eq!(encoded, [0x30, 0x05, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn reassembly_overflow_closes_the_channel() {
        let mut client = ready_client(true);
        client.process(&create_request(5, "TEST")).unwrap();

        client.process(&[0x24, 0x05, 0x04, 0x00, 0x01, 0x02]).unwrap();

        // three more bytes exceed the declared total of 4
        let responses = client.process(&[0x30, 0x05, 0x03, 0x04, 0x05]).unwrap();
        assert_eq!(responses.len(), 1);

        let encoded = rdpmux_core::encode_vec(responses[0].pdu()).unwrap();
        assert_eq!(encoded, [0x40, 0x05]);
        assert_eq!(client.channel_state(5), None);
    }

    #[test]
    fn close_request_is_confirmed_and_removes_the_channel() {
        let mut client = ready_client(true);
        client.process(&create_request(5, "TEST")).unwrap();

        let responses = client.process(&[0x40, 0x05]).unwrap();
        assert_eq!(responses.len(), 1);

        let encoded = rdpmux_core::encode_vec(responses[0].pdu()).unwrap();
        assert_eq!(encoded, [0x40, 0x05]);
        assert_eq!(client.channel_state(5), None);

        // data for the closed channel is dropped silently
        let responses = client.process(&[0x30, 0x05, 0xAA]).unwrap();
        assert!(responses.is_empty());
    }

    #[test]
    fn unknown_channel_data_is_ignored() {
        let mut client = ready_client(true);

        let responses = client.process(&[0x30, 0x63, 0xAA]).unwrap();
        assert!(responses.is_empty());
    }

    #[test]
    fn write_on_missing_channel_is_rejected() {
        let mut client = ready_client(true);
        assert!(client.encode_data(42, vec![Box::new(vec![1u8, 2, 3])]).is_err());
    }
}
