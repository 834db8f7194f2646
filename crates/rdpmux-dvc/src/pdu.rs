//! Dynamic virtual channel PDUs, as specified in [MS-RDPEDYC 2.2].
//!
//! Every PDU starts with one byte packing the command in the high nibble,
//! a command-dependent `Sp` field and the channel-id width tag `cbChId` in
//! the two low bit pairs. All multi-byte integers are little-endian.
//!
//! [MS-RDPEDYC 2.2]: https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdpedyc/0b07a750-bf51-4042-bcf2-a991b6729d6e

#[cfg(test)]
mod tests;

use rdpmux_core::{
    cast_length, ensure_size, invalid_field_err, unexpected_message_type_err, Decode, DecodeResult, Encode,
    EncodeResult, ReadCursor, WriteCursor,
};
use rdpmux_svc::SvcPduEncode;

use crate::DynamicChannelId;

/// Dynamic Virtual Channel PDUs that are sent by both client and server.
#[derive(Debug, PartialEq)]
pub enum DrdynvcDataPdu {
    DataFirst(DataFirstPdu),
    Data(DataPdu),
}

impl DrdynvcDataPdu {
    pub(crate) const CMD_SIZE: usize = 1;

    /// The channel id space reserved in every chunk.
    ///
    /// The id is budgeted at its maximum width so that a chunk computed
    /// against a given chunk size can never outgrow it once the actual
    /// field widths are written.
    pub(crate) const MAX_CHANNEL_ID_SIZE: usize = 4;

    pub fn channel_id(&self) -> DynamicChannelId {
        match self {
            DrdynvcDataPdu::DataFirst(pdu) => pdu.channel_id,
            DrdynvcDataPdu::Data(pdu) => pdu.channel_id,
        }
    }
}

impl Encode for DrdynvcDataPdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        match self {
            DrdynvcDataPdu::DataFirst(pdu) => pdu.encode(dst),
            DrdynvcDataPdu::Data(pdu) => pdu.encode(dst),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            DrdynvcDataPdu::DataFirst(pdu) => pdu.name(),
            DrdynvcDataPdu::Data(pdu) => pdu.name(),
        }
    }

    fn size(&self) -> usize {
        match self {
            DrdynvcDataPdu::DataFirst(pdu) => pdu.size(),
            DrdynvcDataPdu::Data(pdu) => pdu.size(),
        }
    }
}

/// Dynamic Virtual Channel PDUs that are sent by the client.
#[derive(Debug, PartialEq)]
pub enum DrdynvcClientPdu {
    Capabilities(CapabilitiesResponsePdu),
    Create(CreateResponsePdu),
    Close(ClosePdu),
    Data(DrdynvcDataPdu),
}

impl Encode for DrdynvcClientPdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        match self {
            DrdynvcClientPdu::Capabilities(pdu) => pdu.encode(dst),
            DrdynvcClientPdu::Create(pdu) => pdu.encode(dst),
            DrdynvcClientPdu::Close(pdu) => pdu.encode(dst),
            DrdynvcClientPdu::Data(pdu) => pdu.encode(dst),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            DrdynvcClientPdu::Capabilities(pdu) => pdu.name(),
            DrdynvcClientPdu::Create(pdu) => pdu.name(),
            DrdynvcClientPdu::Close(pdu) => pdu.name(),
            DrdynvcClientPdu::Data(pdu) => pdu.name(),
        }
    }

    fn size(&self) -> usize {
        match self {
            DrdynvcClientPdu::Capabilities(pdu) => pdu.size(),
            DrdynvcClientPdu::Create(pdu) => pdu.size(),
            DrdynvcClientPdu::Close(pdu) => pdu.size(),
            DrdynvcClientPdu::Data(pdu) => pdu.size(),
        }
    }
}

impl Decode<'_> for DrdynvcClientPdu {
    fn decode(src: &mut ReadCursor<'_>) -> DecodeResult<Self> {
        let header = Header::decode(src)?;
        match header.cmd {
            Cmd::Create => Ok(Self::Create(CreateResponsePdu::decode(header, src)?)),
            Cmd::DataFirst => Ok(Self::Data(DrdynvcDataPdu::DataFirst(DataFirstPdu::decode(header, src)?))),
            Cmd::Data => Ok(Self::Data(DrdynvcDataPdu::Data(DataPdu::decode(header, src)?))),
            Cmd::Close => Ok(Self::Close(ClosePdu::decode(header, src)?)),
            Cmd::Capability => Ok(Self::Capabilities(CapabilitiesResponsePdu::decode(header, src)?)),
        }
    }
}

/// Dynamic Virtual Channel PDUs that are sent by the server.
#[derive(Debug, PartialEq)]
pub enum DrdynvcServerPdu {
    Capabilities(CapabilitiesRequestPdu),
    Create(CreateRequestPdu),
    Close(ClosePdu),
    Data(DrdynvcDataPdu),
}

impl Encode for DrdynvcServerPdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        match self {
            DrdynvcServerPdu::Capabilities(pdu) => pdu.encode(dst),
            DrdynvcServerPdu::Create(pdu) => pdu.encode(dst),
            DrdynvcServerPdu::Close(pdu) => pdu.encode(dst),
            DrdynvcServerPdu::Data(pdu) => pdu.encode(dst),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            DrdynvcServerPdu::Capabilities(pdu) => pdu.name(),
            DrdynvcServerPdu::Create(pdu) => pdu.name(),
            DrdynvcServerPdu::Close(pdu) => pdu.name(),
            DrdynvcServerPdu::Data(pdu) => pdu.name(),
        }
    }

    fn size(&self) -> usize {
        match self {
            DrdynvcServerPdu::Capabilities(pdu) => pdu.size(),
            DrdynvcServerPdu::Create(pdu) => pdu.size(),
            DrdynvcServerPdu::Close(pdu) => pdu.size(),
            DrdynvcServerPdu::Data(pdu) => pdu.size(),
        }
    }
}

impl Decode<'_> for DrdynvcServerPdu {
    fn decode(src: &mut ReadCursor<'_>) -> DecodeResult<Self> {
        let header = Header::decode(src)?;
        match header.cmd {
            Cmd::Create => Ok(Self::Create(CreateRequestPdu::decode(header, src)?)),
            Cmd::DataFirst => Ok(Self::Data(DrdynvcDataPdu::DataFirst(DataFirstPdu::decode(header, src)?))),
            Cmd::Data => Ok(Self::Data(DrdynvcDataPdu::Data(DataPdu::decode(header, src)?))),
            Cmd::Close => Ok(Self::Close(ClosePdu::decode(header, src)?)),
            Cmd::Capability => Ok(Self::Capabilities(CapabilitiesRequestPdu::decode(header, src)?)),
        }
    }
}

// Dynamic virtual channel PDUs are sent over a static virtual channel.
impl SvcPduEncode for DrdynvcDataPdu {}
impl SvcPduEncode for DrdynvcClientPdu {}
impl SvcPduEncode for DrdynvcServerPdu {}

/// The one-byte header of every DRDYNVC PDU:
/// `(Cmd << 4) | (Sp << 2) | cbChId`.
#[derive(Debug, PartialEq)]
pub struct Header {
    pub(crate) cb_id: FieldType,
    pub(crate) sp: FieldType,
    pub(crate) cmd: Cmd,
}

impl Header {
    pub(crate) const FIXED_PART_SIZE: usize = 1;

    /// Creates a new `Header` for `cmd` with minimum-width field tags.
    ///
    /// When `cb_id_val` or `sp_val` is not relevant for the given `cmd`, it
    /// must be 0.
    pub(crate) fn new(cb_id_val: u32, sp_val: u32, cmd: Cmd) -> Self {
        Self {
            cb_id: FieldType::for_val(cb_id_val),
            sp: FieldType::for_val(sp_val),
            cmd,
        }
    }

    pub(crate) fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: Self::size());
        dst.write_u8((self.cmd as u8) << 4 | u8::from(self.sp) << 2 | u8::from(self.cb_id));
        Ok(())
    }

    pub(crate) fn decode(src: &mut ReadCursor<'_>) -> DecodeResult<Self> {
        ensure_size!(in: src, size: Self::size());
        let byte = src.read_u8();
        let cmd = Cmd::try_from(byte >> 4)?;
        let sp = FieldType::from((byte >> 2) & 0b11);
        let cb_id = FieldType::from(byte & 0b11);
        Ok(Self { cb_id, sp, cmd })
    }

    pub(crate) fn size() -> usize {
        Self::FIXED_PART_SIZE
    }
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) enum Cmd {
    Create = 0x01,
    DataFirst = 0x02,
    Data = 0x03,
    Close = 0x04,
    Capability = 0x05,
}

impl TryFrom<u8> for Cmd {
    type Error = rdpmux_core::DecodeError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0x01 => Ok(Self::Create),
            0x02 => Ok(Self::DataFirst),
            0x03 => Ok(Self::Data),
            0x04 => Ok(Self::Close),
            0x05 => Ok(Self::Capability),
            _ => Err(unexpected_message_type_err!("Cmd", byte)),
        }
    }
}

/// The 2-bit width tag selecting how wide a channel id or length field is
/// encoded.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FieldType(u8);

impl FieldType {
    pub const U8: Self = Self(0x00);
    pub const U16: Self = Self(0x01);
    pub const U32: Self = Self(0x02);

    pub(crate) fn encode_val(self, value: u32, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size_of_val());
        match self {
            FieldType::U8 => dst.write_u8(cast_length!("FieldType::encode", value)?),
            FieldType::U16 => dst.write_u16(cast_length!("FieldType::encode", value)?),
            FieldType::U32 => dst.write_u32(value),
            _ => return Err(invalid_field_err!("FieldType", "invalid field type")),
        };
        Ok(())
    }

    pub(crate) fn decode_val(self, src: &mut ReadCursor<'_>) -> DecodeResult<u32> {
        ensure_size!(in: src, size: self.size_of_val());
        match self {
            FieldType::U8 => Ok(u32::from(src.read_u8())),
            FieldType::U16 => Ok(u32::from(src.read_u16())),
            FieldType::U32 => Ok(src.read_u32()),
            _ => Err(invalid_field_err!("FieldType", "invalid field type")),
        }
    }

    /// Returns the size of the value in bytes.
    pub(crate) fn size_of_val(self) -> usize {
        match self {
            FieldType::U8 => 1,
            FieldType::U16 => 2,
            FieldType::U32 => 4,
            _ => 0,
        }
    }

    /// Picks the minimum width that fits `value`.
    pub(crate) fn for_val(value: u32) -> Self {
        if value <= u32::from(u8::MAX) {
            FieldType::U8
        } else if value <= u32::from(u16::MAX) {
            FieldType::U16
        } else {
            FieldType::U32
        }
    }
}

impl From<u8> for FieldType {
    fn from(byte: u8) -> Self {
        match byte {
            0x00 => Self::U8,
            0x01 => Self::U16,
            0x02 => Self::U32,
            _ => Self(byte),
        }
    }
}

impl From<FieldType> for u8 {
    fn from(field_type: FieldType) -> Self {
        field_type.0
    }
}

/// 2.2.3.1 DVC Data First PDU (DYNVC_DATA_FIRST)
#[derive(Debug, PartialEq)]
pub struct DataFirstPdu {
    header: Header,
    pub channel_id: DynamicChannelId,
    /// The *total* length of the message, including the length of the data
    /// that will be sent by subsequent Data PDUs.
    pub length: u32,
    /// The data carried by this PDU alone.
    pub data: Vec<u8>,
}

impl DataFirstPdu {
    pub fn new(channel_id: DynamicChannelId, total_length: u32, data: Vec<u8>) -> Self {
        Self {
            header: Header::new(channel_id, total_length, Cmd::DataFirst),
            channel_id,
            length: total_length,
            data,
        }
    }

    fn decode(header: Header, src: &mut ReadCursor<'_>) -> DecodeResult<Self> {
        ensure_size!(in: src, size: header.cb_id.size_of_val() + header.sp.size_of_val());
        let channel_id = header.cb_id.decode_val(src)?;
        let length = header.sp.decode_val(src)?;
        let data = src.read_remaining().to_vec();
        Ok(Self {
            header,
            channel_id,
            length,
            data,
        })
    }

    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());
        self.header.encode(dst)?;
        self.header.cb_id.encode_val(self.channel_id, dst)?;
        self.header.sp.encode_val(self.length, dst)?;
        dst.write_slice(&self.data);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "DYNVC_DATA_FIRST"
    }

    fn size(&self) -> usize {
        Header::size()
            + self.header.cb_id.size_of_val() // ChannelId
            + self.header.sp.size_of_val() // Length
            + self.data.len() // Data
    }
}

/// 2.2.3.2 DVC Data PDU (DYNVC_DATA)
#[derive(Debug, PartialEq)]
pub struct DataPdu {
    header: Header,
    pub channel_id: DynamicChannelId,
    pub data: Vec<u8>,
}

impl DataPdu {
    pub fn new(channel_id: DynamicChannelId, data: Vec<u8>) -> Self {
        Self {
            header: Header::new(channel_id, 0, Cmd::Data),
            channel_id,
            data,
        }
    }

    fn decode(header: Header, src: &mut ReadCursor<'_>) -> DecodeResult<Self> {
        ensure_size!(in: src, size: header.cb_id.size_of_val());
        let channel_id = header.cb_id.decode_val(src)?;
        let data = src.read_remaining().to_vec();
        Ok(Self {
            header,
            channel_id,
            data,
        })
    }

    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());
        self.header.encode(dst)?;
        self.header.cb_id.encode_val(self.channel_id, dst)?;
        dst.write_slice(&self.data);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "DYNVC_DATA"
    }

    fn size(&self) -> usize {
        Header::size()
            + self.header.cb_id.size_of_val() // ChannelId
            + self.data.len() // Data
    }
}

/// 2.2.2.1 DVC Create Request PDU (DYNVC_CREATE_REQ)
#[derive(Debug, PartialEq)]
pub struct CreateRequestPdu {
    header: Header,
    pub channel_id: DynamicChannelId,
    pub channel_name: String,
}

impl CreateRequestPdu {
    pub fn new(channel_id: DynamicChannelId, channel_name: String) -> Self {
        Self {
            header: Header::new(channel_id, 0, Cmd::Create),
            channel_id,
            channel_name,
        }
    }

    pub(crate) fn decode(header: Header, src: &mut ReadCursor<'_>) -> DecodeResult<Self> {
        ensure_size!(in: src, size: header.cb_id.size_of_val());
        let channel_id = header.cb_id.decode_val(src)?;
        Self::decode_with_channel_id(header, channel_id, src)
    }

    /// Continues decoding after the caller already consumed the channel id.
    pub(crate) fn decode_with_channel_id(
        header: Header,
        channel_id: DynamicChannelId,
        src: &mut ReadCursor<'_>,
    ) -> DecodeResult<Self> {
        let channel_name = read_null_terminated_string(src)?;
        Ok(Self {
            header,
            channel_id,
            channel_name,
        })
    }

    fn encode_impl(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size_impl());
        self.header.encode(dst)?;
        self.header.cb_id.encode_val(self.channel_id, dst)?;
        dst.write_slice(self.channel_name.as_bytes());
        dst.write_u8(0); // null terminator
        Ok(())
    }

    fn size_impl(&self) -> usize {
        Header::size()
            + self.header.cb_id.size_of_val() // ChannelId
            + self.channel_name.len() + 1 // ChannelName + null terminator
    }
}

// A create request is normally a server-side PDU, but a locally initiated
// dynamic channel sends one too, so it is encodable on its own.
impl Encode for CreateRequestPdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        self.encode_impl(dst)
    }

    fn name(&self) -> &'static str {
        "DYNVC_CREATE_REQ"
    }

    fn size(&self) -> usize {
        self.size_impl()
    }
}

impl SvcPduEncode for CreateRequestPdu {}

/// 2.2.2.2 DVC Create Response PDU (DYNVC_CREATE_RSP)
#[derive(Debug, PartialEq)]
pub struct CreateResponsePdu {
    header: Header,
    pub channel_id: DynamicChannelId,
    pub creation_status: CreationStatus,
}

impl CreateResponsePdu {
    pub fn new(channel_id: DynamicChannelId, creation_status: CreationStatus) -> Self {
        Self {
            header: Header::new(channel_id, 0, Cmd::Create),
            channel_id,
            creation_status,
        }
    }

    pub(crate) fn decode(header: Header, src: &mut ReadCursor<'_>) -> DecodeResult<Self> {
        ensure_size!(in: src, size: header.cb_id.size_of_val() + CreationStatus::SIZE);
        let channel_id = header.cb_id.decode_val(src)?;
        let creation_status = CreationStatus(src.read_u32());
        Ok(Self {
            header,
            channel_id,
            creation_status,
        })
    }

    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());
        self.header.encode(dst)?;
        self.header.cb_id.encode_val(self.channel_id, dst)?;
        self.creation_status.encode(dst)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "DYNVC_CREATE_RSP"
    }

    fn size(&self) -> usize {
        Header::size()
            + self.header.cb_id.size_of_val() // ChannelId
            + CreationStatus::SIZE
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CreationStatus(u32);

impl CreationStatus {
    pub const OK: Self = Self(0x0000_0000);
    /// STATUS_UNSUCCESSFUL, sent when no listener matches the channel name.
    pub const NO_LISTENER: Self = Self(0xC000_0001);
    /// STATUS_NO_MEMORY, sent on resource exhaustion.
    pub const NO_MEMORY: Self = Self(0xC000_0017);

    const SIZE: usize = 4;

    pub fn is_success(self) -> bool {
        self == Self::OK
    }

    fn encode(self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: Self::SIZE);
        dst.write_u32(self.0);
        Ok(())
    }
}

impl From<CreationStatus> for u32 {
    fn from(val: CreationStatus) -> Self {
        val.0
    }
}

impl From<u32> for CreationStatus {
    fn from(val: u32) -> Self {
        Self(val)
    }
}

/// 2.2.4 Closing a DVC (DYNVC_CLOSE)
#[derive(Debug, PartialEq)]
pub struct ClosePdu {
    header: Header,
    pub channel_id: DynamicChannelId,
}

impl ClosePdu {
    pub fn new(channel_id: DynamicChannelId) -> Self {
        Self {
            header: Header::new(channel_id, 0, Cmd::Close),
            channel_id,
        }
    }

    pub(crate) fn decode(header: Header, src: &mut ReadCursor<'_>) -> DecodeResult<Self> {
        let channel_id = header.cb_id.decode_val(src)?;
        Ok(Self { header, channel_id })
    }

    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());
        self.header.encode(dst)?;
        self.header.cb_id.encode_val(self.channel_id, dst)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "DYNVC_CLOSE"
    }

    fn size(&self) -> usize {
        Header::size() + self.header.cb_id.size_of_val()
    }
}

#[repr(u16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CapsVersion {
    V1 = 0x0001,
    V2 = 0x0002,
    V3 = 0x0003,
}

impl CapsVersion {
    const SIZE: usize = 2;

    fn encode(self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: Self::SIZE);
        dst.write_u16(self as u16);
        Ok(())
    }
}

impl TryFrom<u16> for CapsVersion {
    type Error = rdpmux_core::DecodeError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(Self::V1),
            0x0002 => Ok(Self::V2),
            0x0003 => Ok(Self::V3),
            _ => Err(invalid_field_err!("CapsVersion", "unknown capabilities version")),
        }
    }
}

impl From<CapsVersion> for u16 {
    fn from(version: CapsVersion) -> Self {
        version as u16
    }
}

/// 2.2.1.1 DVC Capabilities Request PDU
#[derive(Debug, PartialEq)]
pub enum CapabilitiesRequestPdu {
    V1 {
        header: Header,
    },
    V2 {
        header: Header,
        charges: [u16; CapabilitiesRequestPdu::PRIORITY_CHARGE_COUNT],
    },
    V3 {
        header: Header,
        charges: [u16; CapabilitiesRequestPdu::PRIORITY_CHARGE_COUNT],
    },
}

impl CapabilitiesRequestPdu {
    const HEADERLESS_FIXED_PART_SIZE: usize = 1 /* Pad */ + CapsVersion::SIZE;
    const FIXED_PART_SIZE: usize = Header::FIXED_PART_SIZE + Self::HEADERLESS_FIXED_PART_SIZE;
    const PRIORITY_CHARGE_SIZE: usize = 2;
    pub const PRIORITY_CHARGE_COUNT: usize = 4;
    const PRIORITY_CHARGES_SIZE: usize = Self::PRIORITY_CHARGE_COUNT * Self::PRIORITY_CHARGE_SIZE;

    pub fn new(version: CapsVersion, charges: Option<[u16; Self::PRIORITY_CHARGE_COUNT]>) -> Self {
        let header = Header::new(0, 0, Cmd::Capability);
        let charges = charges.unwrap_or_default();
        match version {
            CapsVersion::V1 => Self::V1 { header },
            CapsVersion::V2 => Self::V2 { header, charges },
            CapsVersion::V3 => Self::V3 { header, charges },
        }
    }

    pub fn version(&self) -> CapsVersion {
        match self {
            Self::V1 { .. } => CapsVersion::V1,
            Self::V2 { .. } => CapsVersion::V2,
            Self::V3 { .. } => CapsVersion::V3,
        }
    }

    pub fn charges(&self) -> Option<&[u16; Self::PRIORITY_CHARGE_COUNT]> {
        match self {
            Self::V1 { .. } => None,
            Self::V2 { charges, .. } | Self::V3 { charges, .. } => Some(charges),
        }
    }

    pub(crate) fn decode(header: Header, src: &mut ReadCursor<'_>) -> DecodeResult<Self> {
        ensure_size!(in: src, size: Self::HEADERLESS_FIXED_PART_SIZE);
        let _pad = src.read_u8();
        let version = CapsVersion::try_from(src.read_u16())?;
        match version {
            CapsVersion::V1 => Ok(Self::V1 { header }),
            _ => {
                ensure_size!(in: src, size: Self::PRIORITY_CHARGES_SIZE);
                let mut charges = [0u16; Self::PRIORITY_CHARGE_COUNT];
                for charge in charges.iter_mut() {
                    *charge = src.read_u16();
                }

                match version {
                    CapsVersion::V2 => Ok(Self::V2 { header, charges }),
                    CapsVersion::V3 => Ok(Self::V3 { header, charges }),
                    CapsVersion::V1 => unreachable!(),
                }
            }
        }
    }

    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());
        match self {
            CapabilitiesRequestPdu::V1 { header }
            | CapabilitiesRequestPdu::V2 { header, .. }
            | CapabilitiesRequestPdu::V3 { header, .. } => header.encode(dst)?,
        };
        dst.write_u8(0x00); // Pad, MUST be 0x00
        self.version().encode(dst)?;
        if let Some(charges) = self.charges() {
            for charge in charges.iter() {
                dst.write_u16(*charge);
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        match self {
            Self::V1 { .. } => "DYNVC_CAPS_VERSION1",
            Self::V2 { .. } => "DYNVC_CAPS_VERSION2",
            Self::V3 { .. } => "DYNVC_CAPS_VERSION3",
        }
    }

    fn size(&self) -> usize {
        match self {
            Self::V1 { .. } => Self::FIXED_PART_SIZE,
            _ => Self::FIXED_PART_SIZE + Self::PRIORITY_CHARGES_SIZE,
        }
    }
}

/// 2.2.1.2 DVC Capabilities Response PDU (DYNVC_CAPS_RSP)
#[derive(Debug, PartialEq)]
pub struct CapabilitiesResponsePdu {
    header: Header,
    pub version: CapsVersion,
}

impl CapabilitiesResponsePdu {
    const HEADERLESS_FIXED_PART_SIZE: usize = 1 /* Pad */ + CapsVersion::SIZE;

    pub fn new(version: CapsVersion) -> Self {
        Self {
            header: Header::new(0, 0, Cmd::Capability),
            version,
        }
    }

    pub(crate) fn decode(header: Header, src: &mut ReadCursor<'_>) -> DecodeResult<Self> {
        ensure_size!(in: src, size: Self::HEADERLESS_FIXED_PART_SIZE);
        let _pad = src.read_u8();
        let version = CapsVersion::try_from(src.read_u16())?;
        Ok(Self { header, version })
    }

    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());
        self.header.encode(dst)?;
        dst.write_u8(0x00); // Pad, MUST be 0x00
        self.version.encode(dst)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "DYNVC_CAPS_RSP"
    }

    fn size(&self) -> usize {
        Header::size() + Self::HEADERLESS_FIXED_PART_SIZE
    }
}

/// Reads a null-terminated UTF-8 string, consuming the terminator.
pub(crate) fn read_null_terminated_string(src: &mut ReadCursor<'_>) -> DecodeResult<String> {
    let bytes = src.remaining();
    let terminator = bytes
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| invalid_field_err!("string", "missing null terminator"))?;

    let string = core::str::from_utf8(&bytes[..terminator])
        .map_err(|_| invalid_field_err!("string", "not valid UTF-8"))?
        .to_owned();

    src.advance(terminator + 1);

    Ok(string)
}
