use rdpmux_core::{decode, impl_as_any};
use rdpmux_dvc::{DvcListener, DvcMessage, DvcProcessor, DynamicChannelId};
use rdpmux_pdu::{decode_err, PduResult};
use tracing::debug;

use crate::pdu::{EchoRequestPdu, EchoResponsePdu};
use crate::CHANNEL_NAME;

/// A client for the ECHO virtual channel.
#[derive(Debug, Default)]
pub struct EchoClient;

impl EchoClient {
    pub fn new() -> Self {
        Self
    }
}

impl_as_any!(EchoClient);

impl DvcProcessor for EchoClient {
    fn channel_name(&self) -> &str {
        CHANNEL_NAME
    }

    fn start(&mut self, _channel_id: DynamicChannelId) -> PduResult<Vec<DvcMessage>> {
        Ok(Vec::new())
    }

    fn process(&mut self, _channel_id: DynamicChannelId, payload: &[u8]) -> PduResult<Vec<DvcMessage>> {
        let request: EchoRequestPdu = decode(payload).map_err(|e| decode_err!(e))?;
        debug!(size = request.payload().len(), "Received ECHO request");

        let response = EchoResponsePdu::new(request.into_payload());
        Ok(vec![Box::new(response)])
    }
}

/// Accepts every inbound ECHO channel with a fresh [`EchoClient`].
#[derive(Debug, Default)]
pub struct EchoListener;

impl EchoListener {
    pub fn new() -> Self {
        Self
    }
}

impl DvcListener for EchoListener {
    fn channel_name(&self) -> &str {
        CHANNEL_NAME
    }

    fn on_new_channel(&mut self, channel_id: DynamicChannelId) -> Option<Box<dyn DvcProcessor>> {
        debug!(channel_id, "Accepting ECHO channel");
        Some(Box::new(EchoClient::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echoes_the_request_payload() {
        let mut client = EchoClient::new();

        let responses = client.process(1, &[0x01, 0x02, 0x03]).unwrap();
        assert_eq!(responses.len(), 1);

        let encoded = rdpmux_core::encode_vec(responses[0].as_ref()).unwrap();
        assert_eq!(encoded, [0x01, 0x02, 0x03]);
    }

    #[test]
    fn listener_accepts_every_channel() {
        let mut listener = EchoListener::new();
        assert!(listener.on_new_channel(42).is_some());
    }
}
