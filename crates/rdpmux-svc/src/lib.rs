#![cfg_attr(doc, doc = include_str!("../README.md"))]

use core::any::TypeId;
use core::fmt;
use std::collections::BTreeMap;

use bitflags::bitflags;
use tracing::error;

use rdpmux_core::{
    cast_length, ensure_fixed_part_size, invalid_field_err, AsAny, Decode, DecodeResult, Encode, EncodeResult,
    ReadCursor, WriteCursor,
};
use rdpmux_pdu::gcc::{ChannelDef, ChannelName, ChannelOptions};
use rdpmux_pdu::PduResult;

pub type StaticChannelId = u16;

/// The default maximum size of one static virtual channel chunk, header
/// included (MS-RDPBCGR CHANNEL_CHUNK_LENGTH).
pub const CHANNEL_CHUNK_LENGTH: usize = 1600;

bitflags! {
    /// Channel control flags, as specified in [MS-RDPBCGR 2.2.6.1.1].
    ///
    /// [MS-RDPBCGR 2.2.6.1.1]: https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdpbcgr/f125c65e-6901-43c3-8071-d7d5aaee7ae4
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ChannelFlags: u32 {
        const FIRST = 0x0000_0001;
        const LAST = 0x0000_0002;
        const SHOW_PROTOCOL = 0x0000_0010;
        const SUSPEND = 0x0000_0020;
        const RESUME = 0x0000_0040;
        const SHADOW_PERSISTENT = 0x0000_0080;
        const COMPRESSED = 0x0020_0000;
        const AT_FRONT = 0x0040_0000;
        const FLUSHED = 0x0080_0000;
    }
}

/// Channel PDU Header (CHANNEL_PDU_HEADER)
///
/// Prefixes every chunk written to a static virtual channel. The length
/// field carries the total size of the reassembled payload, not the size of
/// the chunk it prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPduHeader {
    pub length: u32,
    pub flags: ChannelFlags,
}

impl ChannelPduHeader {
    pub const NAME: &'static str = "ChannelPduHeader";

    pub const FIXED_PART_SIZE: usize = 4 /* length */ + 4 /* flags */;
}

impl Encode for ChannelPduHeader {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u32(self.length);
        dst.write_u32(self.flags.bits());
        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for ChannelPduHeader {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let total_length = src.read_u32();
        let flags = ChannelFlags::from_bits_truncate(src.read_u32());
        Ok(Self {
            length: total_length,
            flags,
        })
    }
}

/// Marker trait for PDUs that may be carried over a static virtual channel.
pub trait SvcPduEncode: Encode + Send {}

// Raw byte payloads are always fair game on a static channel.
impl SvcPduEncode for Vec<u8> {}

/// A PDU ready to be chunked and sent over a static virtual channel,
/// along with the channel flags to set on every chunk carrying it.
pub struct SvcMessage {
    pdu: Box<dyn SvcPduEncode>,
    flags: ChannelFlags,
}

impl SvcMessage {
    /// Adds additional flags to be set on the chunks of this message,
    /// on top of FIRST/LAST which the chunking layer controls.
    #[must_use]
    pub fn with_flags(mut self, flags: ChannelFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn pdu(&self) -> &dyn SvcPduEncode {
        self.pdu.as_ref()
    }

    pub fn flags(&self) -> ChannelFlags {
        self.flags
    }
}

impl<T: SvcPduEncode + 'static> From<T> for SvcMessage {
    fn from(pdu: T) -> Self {
        Self {
            pdu: Box::new(pdu),
            flags: ChannelFlags::empty(),
        }
    }
}

impl fmt::Debug for SvcMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SvcMessage")
            .field("pdu", &self.pdu.name())
            .field("flags", &self.flags)
            .finish()
    }
}

/// Defines which compression flag should be sent along the Channel Definition Structure (CHANNEL_DEF)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionCondition {
    /// Virtual channel data will not be compressed
    Never,
    /// Virtual channel data MUST be compressed if RDP data is being compressed (CHANNEL_OPTION_COMPRESS_RDP)
    WhenRdpDataIsCompressed,
    /// Virtual channel data MUST be compressed, regardless of RDP compression settings (CHANNEL_OPTION_COMPRESS)
    Always,
}

/// A static virtual channel consumer.
///
/// Static virtual channels are created once at the beginning of the RDP
/// session and allow lossless communication between client and server
/// components over the main data connection. At most 31 static channels can
/// be declared for a single connection.
pub trait SvcProcessor: AsAny + fmt::Debug + Send {
    /// The name advertised in the Channel Definition Structure.
    fn channel_name(&self) -> ChannelName;

    fn compression_condition(&self) -> CompressionCondition {
        CompressionCondition::Never
    }

    /// Processes one complete, reassembled payload (chunks are assembled by
    /// the calling code) and returns the messages to send in response.
    fn process(&mut self, payload: &[u8]) -> PduResult<Vec<SvcMessage>>;

    #[doc(hidden)]
    fn is_drdynvc(&self) -> bool {
        false
    }
}

rdpmux_core::assert_obj_safe!(SvcProcessor);

/// Builds the `ChannelOptions` bitfield to be used in the Channel Definition Structure.
pub fn make_channel_options(channel: &dyn SvcProcessor) -> ChannelOptions {
    let compression = match channel.compression_condition() {
        CompressionCondition::Never => ChannelOptions::empty(),
        CompressionCondition::WhenRdpDataIsCompressed => ChannelOptions::COMPRESS_RDP,
        CompressionCondition::Always => ChannelOptions::COMPRESS,
    };

    ChannelOptions::INITIALIZED | compression
}

/// Builds the Channel Definition Structure (CHANNEL_DEF) for this channel.
pub fn make_channel_definition(channel: &dyn SvcProcessor) -> ChannelDef {
    ChannelDef {
        name: channel.channel_name(),
        options: make_channel_options(channel),
    }
}

/// Splits messages into chunks of at most `max_chunk_len` bytes (header
/// included), each prefixed by a [`ChannelPduHeader`] carrying the total
/// payload length and the FIRST/LAST flags.
pub fn chunkify(messages: Vec<SvcMessage>, max_chunk_len: usize) -> EncodeResult<Vec<Vec<u8>>> {
    let mut results = Vec::new();
    for message in messages {
        results.extend(chunkify_one(message, max_chunk_len)?);
    }
    Ok(results)
}

fn chunkify_one(message: SvcMessage, max_chunk_len: usize) -> EncodeResult<Vec<Vec<u8>>> {
    let payload = rdpmux_core::encode_vec(message.pdu())?;
    let total_length: u32 = cast_length!("totalLength", payload.len())?;
    let chunk_payload_len = max_chunk_len
        .checked_sub(ChannelPduHeader::FIXED_PART_SIZE)
        .ok_or_else(|| invalid_field_err!("maxChunkLen", "smaller than the chunk header"))?;

    let mut chunks = Vec::new();
    let mut chunk_start = 0;

    loop {
        let chunk_end = core::cmp::min(chunk_start + chunk_payload_len, payload.len());

        let mut flags = message.flags();
        if chunk_start == 0 {
            flags |= ChannelFlags::FIRST;
        }
        if chunk_end == payload.len() {
            flags |= ChannelFlags::LAST;
        }

        let header = ChannelPduHeader {
            length: total_length,
            flags,
        };

        let mut chunk = vec![0; ChannelPduHeader::FIXED_PART_SIZE + (chunk_end - chunk_start)];
        let mut cursor = WriteCursor::new(&mut chunk);
        header.encode(&mut cursor)?;
        cursor.write_slice(&payload[chunk_start..chunk_end]);

        chunks.push(chunk);

        if chunk_end == payload.len() {
            break;
        }
        chunk_start = chunk_end;
    }

    Ok(chunks)
}

/// Reassembles the chunk stream of one static virtual channel.
///
/// Chunks arrive prefixed by a [`ChannelPduHeader`]; the payload is complete
/// when the LAST flag is observed and the accumulated size matches the
/// declared total.
#[derive(Debug, Default)]
pub struct ChunkProcessor {
    buffer: Vec<u8>,
    total_length: usize,
}

impl ChunkProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Processes one chunk, returning the reassembled payload once the last
    /// chunk arrived.
    pub fn process(&mut self, chunk: &[u8]) -> DecodeResult<Option<Vec<u8>>> {
        let mut src = ReadCursor::new(chunk);
        let header = ChannelPduHeader::decode(&mut src)?;
        let payload = src.read_remaining();

        if header.flags.contains(ChannelFlags::FIRST) {
            if !self.buffer.is_empty() {
                error!("Reassembly of a previous static channel payload was never completed, discarding it");
                self.buffer.clear();
            }

            self.total_length = cast_length!("length", header.length)?;
            self.buffer.reserve(self.total_length);
        }

        if self.buffer.len() + payload.len() > self.total_length {
            self.buffer.clear();
            self.total_length = 0;
            return Err(invalid_field_err!(
                "length",
                "static channel chunks exceed the declared total length"
            ));
        }

        self.buffer.extend_from_slice(payload);

        if header.flags.contains(ChannelFlags::LAST) {
            if self.buffer.len() != self.total_length {
                self.buffer.clear();
                self.total_length = 0;
                return Err(invalid_field_err!(
                    "length",
                    "last chunk seen before the declared total length was accumulated"
                ));
            }

            self.total_length = 0;
            Ok(Some(core::mem::take(&mut self.buffer)))
        } else {
            Ok(None)
        }
    }
}

/// The set of static virtual channels declared for one connection, addressed
/// by processor type or by the channel id the server bound them to.
#[derive(Debug)]
pub struct StaticChannelSet {
    channels: BTreeMap<TypeId, Box<dyn SvcProcessor>>,
    chunk_processors: BTreeMap<TypeId, ChunkProcessor>,
    to_channel_id: BTreeMap<TypeId, StaticChannelId>,
    to_type_id: BTreeMap<StaticChannelId, TypeId>,
}

impl StaticChannelSet {
    #[inline]
    pub fn new() -> Self {
        Self {
            channels: BTreeMap::new(),
            chunk_processors: BTreeMap::new(),
            to_channel_id: BTreeMap::new(),
            to_type_id: BTreeMap::new(),
        }
    }

    pub fn insert<T: SvcProcessor + 'static>(&mut self, val: T) -> Option<Box<dyn SvcProcessor>> {
        self.chunk_processors.insert(TypeId::of::<T>(), ChunkProcessor::new());
        self.channels.insert(TypeId::of::<T>(), Box::new(val))
    }

    pub fn get_by_type_id(&self, type_id: TypeId) -> Option<&dyn SvcProcessor> {
        self.channels.get(&type_id).map(|boxed| boxed.as_ref())
    }

    pub fn get_by_type_id_mut(&mut self, type_id: TypeId) -> Option<&mut dyn SvcProcessor> {
        if let Some(boxed) = self.channels.get_mut(&type_id) {
            Some(boxed.as_mut())
        } else {
            None
        }
    }

    pub fn get_by_type<T: SvcProcessor + 'static>(&self) -> Option<&dyn SvcProcessor> {
        self.get_by_type_id(TypeId::of::<T>())
    }

    pub fn get_by_type_mut<T: SvcProcessor + 'static>(&mut self) -> Option<&mut dyn SvcProcessor> {
        self.get_by_type_id_mut(TypeId::of::<T>())
    }

    pub fn get_by_channel_id(&self, channel_id: StaticChannelId) -> Option<&dyn SvcProcessor> {
        self.get_type_id_by_channel_id(channel_id)
            .and_then(|type_id| self.get_by_type_id(type_id))
    }

    pub fn get_by_channel_id_mut(&mut self, channel_id: StaticChannelId) -> Option<&mut dyn SvcProcessor> {
        self.get_type_id_by_channel_id(channel_id)
            .and_then(|type_id| self.get_by_type_id_mut(type_id))
    }

    /// Returns both the processor and its chunk reassembly state.
    ///
    /// Needed by the reader loop, which feeds chunks through the chunk
    /// processor before handing complete payloads to the channel processor.
    pub fn get_with_chunk_processor_mut(
        &mut self,
        channel_id: StaticChannelId,
    ) -> Option<(&mut dyn SvcProcessor, &mut ChunkProcessor)> {
        let type_id = self.get_type_id_by_channel_id(channel_id)?;
        let processor = self.channels.get_mut(&type_id)?;
        let chunk_processor = self.chunk_processors.get_mut(&type_id)?;
        Some((processor.as_mut(), chunk_processor))
    }

    pub fn attach_channel_id(&mut self, type_id: TypeId, channel_id: StaticChannelId) -> Option<StaticChannelId> {
        self.to_type_id.insert(channel_id, type_id);
        self.to_channel_id.insert(type_id, channel_id)
    }

    pub fn get_channel_id_by_type_id(&self, type_id: TypeId) -> Option<StaticChannelId> {
        self.to_channel_id.get(&type_id).copied()
    }

    pub fn get_channel_id_by_type<T: SvcProcessor + 'static>(&self) -> Option<StaticChannelId> {
        self.get_channel_id_by_type_id(TypeId::of::<T>())
    }

    pub fn get_type_id_by_channel_id(&self, channel_id: StaticChannelId) -> Option<TypeId> {
        self.to_type_id.get(&channel_id).copied()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &dyn SvcProcessor)> {
        self.channels.iter().map(|(type_id, boxed)| (*type_id, boxed.as_ref()))
    }

    #[inline]
    pub fn values(&self) -> impl Iterator<Item = &dyn SvcProcessor> {
        self.channels.values().map(|boxed| boxed.as_ref())
    }

    #[inline]
    pub fn type_ids(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.channels.keys().copied()
    }

    #[inline]
    pub fn channel_ids(&self) -> impl Iterator<Item = StaticChannelId> + '_ {
        self.to_channel_id.values().copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.channels.clear();
        self.chunk_processors.clear();
        self.to_channel_id.clear();
        self.to_type_id.clear();
    }

    #[inline]
    pub fn take(&mut self) -> Self {
        Self {
            channels: core::mem::take(&mut self.channels),
            chunk_processors: core::mem::take(&mut self.chunk_processors),
            to_channel_id: core::mem::take(&mut self.to_channel_id),
            to_type_id: core::mem::take(&mut self.to_type_id),
        }
    }
}

impl Default for StaticChannelSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_chunk_carries_first_and_last() {
        let chunks = chunkify(vec![SvcMessage::from(vec![0xAA; 100])], CHANNEL_CHUNK_LENGTH).unwrap();

        assert_eq!(chunks.len(), 1);

        let mut src = ReadCursor::new(&chunks[0]);
        let header = ChannelPduHeader::decode(&mut src).unwrap();
        assert_eq!(header.length, 100);
        assert!(header.flags.contains(ChannelFlags::FIRST | ChannelFlags::LAST));
        assert_eq!(src.read_remaining().len(), 100);
    }

    #[test]
    fn large_payload_is_split_and_reassembles() {
        let payload = (0..4000u32).map(|i| i as u8).collect::<Vec<_>>();
        let chunks = chunkify(vec![SvcMessage::from(payload.clone())], CHANNEL_CHUNK_LENGTH).unwrap();

        // 4000 bytes at 1592 bytes of payload per chunk
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert!(chunk.len() <= CHANNEL_CHUNK_LENGTH);
        }

        let mut reassembly = ChunkProcessor::new();
        let mut result = None;
        for chunk in &chunks {
            result = reassembly.process(chunk).unwrap();
        }

        assert_eq!(result.unwrap(), payload);
    }

    #[test]
    fn chunk_overflow_is_a_protocol_error() {
        let mut reassembly = ChunkProcessor::new();

        let mut first = Vec::new();
        let header = ChannelPduHeader {
            length: 4,
            flags: ChannelFlags::FIRST,
        };
        first.extend_from_slice(&rdpmux_core::encode_vec(&header).unwrap());
        first.extend_from_slice(&[1, 2, 3]);
        assert!(reassembly.process(&first).unwrap().is_none());

        let mut second = Vec::new();
        let header = ChannelPduHeader {
            length: 4,
            flags: ChannelFlags::LAST,
        };
        second.extend_from_slice(&rdpmux_core::encode_vec(&header).unwrap());
        second.extend_from_slice(&[4, 5, 6]);
        assert!(reassembly.process(&second).is_err());
    }

    #[test]
    fn interrupted_reassembly_restarts_on_first() {
        let mut reassembly = ChunkProcessor::new();

        let mut stale = Vec::new();
        let header = ChannelPduHeader {
            length: 100,
            flags: ChannelFlags::FIRST,
        };
        stale.extend_from_slice(&rdpmux_core::encode_vec(&header).unwrap());
        stale.extend_from_slice(&[0xFF; 10]);
        assert!(reassembly.process(&stale).unwrap().is_none());

        let chunks = chunkify(vec![SvcMessage::from(vec![0x42; 8])], CHANNEL_CHUNK_LENGTH).unwrap();
        let result = reassembly.process(&chunks[0]).unwrap();
        assert_eq!(result.unwrap(), vec![0x42; 8]);
    }
}
