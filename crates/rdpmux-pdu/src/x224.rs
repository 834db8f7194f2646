use rdpmux_core::{
    cast_length, ensure_size, invalid_field_err, Decode, DecodeResult, Encode, EncodeResult, ReadCursor, WriteCursor,
};

use crate::tpdu::{TpduCode, TpduHeader};
use crate::tpkt::TpktHeader;

/// A PDU carried inside one TPKT frame and one X.224 TPDU.
pub trait X224Pdu: Sized {
    const X224_NAME: &'static str;

    const TPDU_CODE: TpduCode;

    fn x224_body_encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()>;

    fn x224_body_decode(src: &mut ReadCursor<'_>, tpkt: &TpktHeader, tpdu: &TpduHeader) -> DecodeResult<Self>;

    fn tpdu_header_variable_part_size(&self) -> usize;

    fn tpdu_user_data_size(&self) -> usize;
}

/// Adds the TPKT and TPDU framing around an [`X224Pdu`] body.
pub struct X224<T>(pub T);

impl<T: X224Pdu> Encode for X224<T> {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        let packet_length = self.size();

        ensure_size!(in: dst, size: packet_length);

        TpktHeader {
            packet_length: cast_length!(T::X224_NAME, "packetLength", packet_length)?,
        }
        .write(dst)?;

        TpduHeader {
            li: cast_length!(
                T::X224_NAME,
                "li",
                T::TPDU_CODE.header_fixed_part_size() + self.0.tpdu_header_variable_part_size() - 1
            )?,
            code: T::TPDU_CODE,
        }
        .write(dst)?;

        self.0.x224_body_encode(dst)
    }

    fn name(&self) -> &'static str {
        T::X224_NAME
    }

    fn size(&self) -> usize {
        TpktHeader::SIZE
            + T::TPDU_CODE.header_fixed_part_size()
            + self.0.tpdu_header_variable_part_size()
            + self.0.tpdu_user_data_size()
    }
}

impl<'de, T: X224Pdu> Decode<'de> for X224<T> {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        let tpkt = TpktHeader::read(src)?;

        ensure_size!(in: src, size: tpkt.packet_length().saturating_sub(TpktHeader::SIZE));

        let tpdu = TpduHeader::read(src, &tpkt)?;
        tpdu.code.check_expected(T::TPDU_CODE)?;

        if tpdu.size() < tpdu.fixed_part_size() {
            return Err(invalid_field_err(
                TpduHeader::NAME,
                "li",
                "fixed part bigger than total header size",
            ));
        }

        T::x224_body_decode(src, &tpkt, &tpdu).map(X224)
    }
}

/// An X.224 data TPDU carrying an opaque payload.
pub struct X224Data {
    pub data: Vec<u8>,
}

impl X224Pdu for X224Data {
    const X224_NAME: &'static str = "X.224 Data";

    const TPDU_CODE: TpduCode = TpduCode::DATA;

    fn x224_body_encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.data.len());
        dst.write_slice(&self.data);

        Ok(())
    }

    fn x224_body_decode(src: &mut ReadCursor<'_>, tpkt: &TpktHeader, tpdu: &TpduHeader) -> DecodeResult<Self> {
        let user_data_size = user_data_size(tpkt, tpdu);

        ensure_size!(in: src, size: user_data_size);
        let data = src.read_slice(user_data_size);

        Ok(Self { data: data.to_vec() })
    }

    fn tpdu_header_variable_part_size(&self) -> usize {
        0
    }

    fn tpdu_user_data_size(&self) -> usize {
        self.data.len()
    }
}

/// An X.224 disconnect request TPDU, sent for an orderly teardown.
pub struct X224DisconnectRequest;

impl X224Pdu for X224DisconnectRequest {
    const X224_NAME: &'static str = "X.224 Disconnect Request";

    const TPDU_CODE: TpduCode = TpduCode::DISCONNECT_REQUEST;

    fn x224_body_encode(&self, _dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        Ok(())
    }

    fn x224_body_decode(_src: &mut ReadCursor<'_>, _tpkt: &TpktHeader, _tpdu: &TpduHeader) -> DecodeResult<Self> {
        Ok(Self)
    }

    fn tpdu_header_variable_part_size(&self) -> usize {
        0
    }

    fn tpdu_user_data_size(&self) -> usize {
        0
    }
}

pub fn user_data_size(tpkt: &TpktHeader, tpdu: &TpduHeader) -> usize {
    tpkt.packet_length() - TpktHeader::SIZE - tpdu.size()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdpmux_core::{decode, encode_vec};

    #[test]
    fn data_tpdu_round_trip() {
        let pdu = X224(X224Data {
            data: vec![0x01, 0x02, 0x03],
        });

        let encoded = encode_vec(&pdu).unwrap();
        assert_eq!(encoded, [0x03, 0x00, 0x00, 0x0a, 0x02, 0xf0, 0x80, 0x01, 0x02, 0x03]);

        let decoded: X224<X224Data> = decode(&encoded).unwrap();
        assert_eq!(decoded.0.data, vec![0x01, 0x02, 0x03]);
    }

    #[test]
    fn payload_is_length_minus_framing() {
        let encoded = [0x03, 0x00, 0x00, 0x07, 0x02, 0xf0, 0x80];
        let decoded: X224<X224Data> = decode(&encoded).unwrap();
        assert!(decoded.0.data.is_empty());
    }
}
