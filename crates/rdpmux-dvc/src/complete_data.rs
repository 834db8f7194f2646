use core::cmp;

use rdpmux_core::{invalid_field_err, DecodeResult};
use tracing::warn;

/// Reassembles one dynamic virtual channel message out of a DataFirst PDU
/// and its following Data PDUs.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct CompleteData {
    total_size: usize,
    data: Vec<u8>,
}

impl CompleteData {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Starts a new reassembly sequence.
    ///
    /// A declared total equal to the first fragment (including a zero-length
    /// message) completes immediately. An unfinished previous sequence is
    /// discarded with a warning.
    pub(crate) fn process_data_first_pdu(&mut self, total_size: usize, data: Vec<u8>) -> Option<Vec<u8>> {
        if self.total_size != 0 || !self.data.is_empty() {
            warn!("Incomplete DVC message was interrupted by a new DataFirst PDU, discarding it");
            self.data.clear();
        }

        if total_size == data.len() {
            self.total_size = 0;
            Some(data)
        } else {
            self.total_size = total_size;
            self.data = data;

            None
        }
    }

    /// Appends one Data PDU.
    ///
    /// Outside of a reassembly sequence the payload is complete on its own.
    /// Overflowing the declared total is a protocol error: the buffer is
    /// dropped and the caller is expected to close the channel.
    pub(crate) fn process_data_pdu(&mut self, mut data: Vec<u8>) -> DecodeResult<Option<Vec<u8>>> {
        if self.total_size == 0 && self.data.is_empty() {
            // message is not fragmented
            return Ok(Some(data));
        }

        let actual_data_length = self
            .data
            .len()
            .checked_add(data.len())
            .ok_or_else(|| invalid_field_err!("data", "DVC message size overflow"))?;

        match actual_data_length.cmp(&self.total_size) {
            cmp::Ordering::Less => {
                self.data.append(&mut data);
                Ok(None)
            }
            cmp::Ordering::Equal => {
                self.total_size = 0;
                self.data.append(&mut data);
                Ok(Some(core::mem::take(&mut self.data)))
            }
            cmp::Ordering::Greater => {
                self.total_size = 0;
                self.data.clear();
                Err(invalid_field_err!(
                    "data",
                    "actual DVC message size exceeds the declared total size"
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unfragmented_data_is_complete() {
        let mut complete_data = CompleteData::new();

        let result = complete_data.process_data_pdu(vec![1, 2, 3]).unwrap();
        assert_eq!(result, Some(vec![1, 2, 3]));
    }

    #[test]
    fn data_first_covering_whole_message_is_complete() {
        let mut complete_data = CompleteData::new();

        let result = complete_data.process_data_first_pdu(3, vec![1, 2, 3]);
        assert_eq!(result, Some(vec![1, 2, 3]));
        assert_eq!(complete_data, CompleteData::new());
    }

    #[test]
    fn zero_length_message_completes_immediately() {
        let mut complete_data = CompleteData::new();

        let result = complete_data.process_data_first_pdu(0, Vec::new());
        assert_eq!(result, Some(Vec::new()));
    }

    #[test]
    fn fragmented_message_reassembles() {
        let mut complete_data = CompleteData::new();

        assert_eq!(complete_data.process_data_first_pdu(6, vec![1, 2, 3]), None);
        assert_eq!(complete_data.process_data_pdu(vec![4, 5]).unwrap(), None);
        assert_eq!(
            complete_data.process_data_pdu(vec![6]).unwrap(),
            Some(vec![1, 2, 3, 4, 5, 6])
        );
    }

    #[test]
    fn second_data_first_discards_unfinished_sequence() {
        let mut complete_data = CompleteData::new();

        assert_eq!(complete_data.process_data_first_pdu(10, vec![1, 2, 3]), None);
        assert_eq!(complete_data.process_data_first_pdu(2, vec![9, 9]), Some(vec![9, 9]));
    }

    #[test]
    fn overflow_is_a_protocol_error() {
        let mut complete_data = CompleteData::new();

        assert_eq!(complete_data.process_data_first_pdu(4, vec![1, 2, 3]), None);
        assert!(complete_data.process_data_pdu(vec![4, 5]).is_err());

        // the buffer was dropped, the next message starts clean
        assert_eq!(complete_data.process_data_pdu(vec![7]).unwrap(), Some(vec![7]));
    }
}
