#![cfg_attr(doc, doc = include_str!("../README.md"))]

mod client;
mod complete_data;

pub mod pdu;

pub use client::*;

use rdpmux_core::{cast_length, AsAny, Encode};
use rdpmux_pdu::{pdu_other_err, PduResult};
use rdpmux_svc::{ChannelFlags, SvcMessage};

use crate::pdu::{DataFirstPdu, DataPdu, DrdynvcDataPdu};

pub type DynamicChannelName = String;
pub type DynamicChannelId = u32;

/// Marker trait for messages that form one complete dynamic virtual channel
/// PDU once encoded, ready to be wrapped into DataFirst/Data PDUs (split
/// over several of them when necessary).
pub trait DvcEncode: Encode + Send {}

impl DvcEncode for Vec<u8> {}

pub type DvcMessage = Box<dyn DvcEncode>;

/// A dynamic virtual channel consumer.
///
/// Dynamic virtual channels may be created at any point during the session;
/// they exist to lift the limitations of static virtual channels (fixed
/// count, declared at connect time).
pub trait DvcProcessor: AsAny + Send {
    /// The name of the channel, e.g. "Microsoft::Windows::RDS::Geometry::v08.01"
    fn channel_name(&self) -> &str;

    /// Returns any messages that should be sent immediately upon the channel
    /// being opened.
    fn start(&mut self, channel_id: DynamicChannelId) -> PduResult<Vec<DvcMessage>>;

    fn process(&mut self, channel_id: DynamicChannelId, payload: &[u8]) -> PduResult<Vec<DvcMessage>>;

    fn close(&mut self, _channel_id: DynamicChannelId) {}
}

rdpmux_core::assert_obj_safe!(DvcProcessor);

/// A named registration accepting inbound create requests for dynamic
/// channels of that name.
pub trait DvcListener: Send {
    /// The advertised channel name the listener answers for (case-sensitive).
    fn channel_name(&self) -> &str;

    /// Called when the server creates a channel matching this listener.
    ///
    /// Returning `None` refuses the channel; the peer receives a failure
    /// creation status.
    fn on_new_channel(&mut self, channel_id: DynamicChannelId) -> Option<Box<dyn DvcProcessor>>;
}

rdpmux_core::assert_obj_safe!(DvcListener);

/// Fragments complete DVC messages into DataFirst/Data PDUs no larger than
/// `chunk_size` and wraps each into a static channel message.
pub fn encode_dvc_messages(
    channel_id: DynamicChannelId,
    messages: Vec<DvcMessage>,
    flags: ChannelFlags,
    chunk_size: usize,
) -> PduResult<Vec<SvcMessage>> {
    let data_budget = chunk_size
        .checked_sub(DrdynvcDataPdu::CMD_SIZE + DrdynvcDataPdu::MAX_CHANNEL_ID_SIZE)
        .ok_or_else(|| pdu_other_err!("encode_dvc_messages", "chunk size smaller than the PDU header"))?;

    let mut res = Vec::new();

    for msg in messages {
        let total_length = msg.size();
        let msg = rdpmux_core::encode_vec(msg.as_ref()).map_err(|e| rdpmux_pdu::encode_err!(e))?;

        if total_length <= data_budget {
            let pdu = DrdynvcDataPdu::Data(DataPdu::new(channel_id, msg));
            res.push(SvcMessage::from(pdu).with_flags(flags));
            continue;
        }

        let total_length_u32: u32 = cast_length!("encode_dvc_messages", "totalLength", total_length)
            .map_err(|e: rdpmux_core::EncodeError| rdpmux_pdu::encode_err!(e))?;
        let first_budget = data_budget
            .checked_sub(pdu::FieldType::for_val(total_length_u32).size_of_val())
            .ok_or_else(|| pdu_other_err!("encode_dvc_messages", "chunk size smaller than the PDU header"))?;

        let mut off = 0;

        while off < total_length {
            let first = off == 0;
            let budget = if first { first_budget } else { data_budget };
            let end = core::cmp::min(off + budget, total_length);

            let pdu = if first {
                DrdynvcDataPdu::DataFirst(DataFirstPdu::new(channel_id, total_length_u32, msg[off..end].to_vec()))
            } else {
                DrdynvcDataPdu::Data(DataPdu::new(channel_id, msg[off..end].to_vec()))
            };

            res.push(SvcMessage::from(pdu).with_flags(flags));
            off = end;
        }
    }

    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHUNK_SIZE: usize = 1600;

    #[test]
    fn small_message_is_a_single_data_pdu() {
        let messages = encode_dvc_messages(5, vec![Box::new(vec![0xAA; 100])], ChannelFlags::empty(), CHUNK_SIZE)
            .unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].pdu().name(), "DYNVC_DATA");
    }

    #[test]
    fn large_message_starts_with_data_first() {
        let payload = vec![0x55; 3000];
        let messages =
            encode_dvc_messages(5, vec![Box::new(payload)], ChannelFlags::empty(), CHUNK_SIZE).unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].pdu().name(), "DYNVC_DATA_FIRST");
        assert_eq!(messages[1].pdu().name(), "DYNVC_DATA");

        // chunk budget: 1600 minus cmd byte, reserved channel id, 2-byte length
        let first = rdpmux_core::encode_vec(messages[0].pdu()).unwrap();
        let second = rdpmux_core::encode_vec(messages[1].pdu()).unwrap();
        let first_payload_len = 1600 - 1 - 4 - 2;
        assert_eq!(first_payload_len, 1593);

        let first_decoded: pdu::DrdynvcServerPdu = rdpmux_core::decode(&first).unwrap();
        match first_decoded {
            pdu::DrdynvcServerPdu::Data(pdu::DrdynvcDataPdu::DataFirst(d)) => {
                assert_eq!(d.length, 3000);
                assert_eq!(d.data.len(), first_payload_len);
            }
            _ => panic!("expected DataFirst"),
        }

        let second_decoded: pdu::DrdynvcServerPdu = rdpmux_core::decode(&second).unwrap();
        match second_decoded {
            pdu::DrdynvcServerPdu::Data(pdu::DrdynvcDataPdu::Data(d)) => {
                assert_eq!(d.data.len(), 3000 - first_payload_len);
            }
            _ => panic!("expected Data"),
        }
    }

    #[test]
    fn fragment_payloads_concatenate_to_the_original() {
        let payload: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
        let messages =
            encode_dvc_messages(9, vec![Box::new(payload.clone())], ChannelFlags::empty(), CHUNK_SIZE).unwrap();

        let mut reassembled = Vec::new();
        for message in &messages {
            let encoded = rdpmux_core::encode_vec(message.pdu()).unwrap();
            match rdpmux_core::decode(&encoded).unwrap() {
                pdu::DrdynvcServerPdu::Data(pdu::DrdynvcDataPdu::DataFirst(d)) => reassembled.extend(d.data),
                pdu::DrdynvcServerPdu::Data(pdu::DrdynvcDataPdu::Data(d)) => reassembled.extend(d.data),
                _ => panic!("expected data PDUs"),
            }
        }

        assert_eq!(reassembled, payload);
    }
}
