use std::io::{self, Read, Write};

use bytes::{Bytes, BytesMut};

use rdpmux_pdu::PduHint;

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Accumulates bytes from a blocking stream and hands out whole frames.
///
/// Partial reads stay buffered; a frame is only returned once every byte the
/// TPKT header announced is available.
pub struct Framed<S> {
    stream: S,
    buf: BytesMut,
}

impl<S> Framed<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
        }
    }

    pub fn into_inner(self) -> (S, BytesMut) {
        (self.stream, self.buf)
    }

    pub fn into_inner_no_leftover(self) -> S {
        let (stream, leftover) = self.into_inner();
        debug_assert_eq!(leftover.len(), 0, "unexpected leftover");
        stream
    }

    pub fn get_inner(&self) -> (&S, &BytesMut) {
        (&self.stream, &self.buf)
    }

    pub fn get_inner_mut(&mut self) -> (&mut S, &mut BytesMut) {
        (&mut self.stream, &mut self.buf)
    }

    pub fn peek(&self) -> &[u8] {
        &self.buf
    }
}

impl<S> Framed<S>
where
    S: Read,
{
    /// Accumulates at least `length` bytes and returns exactly `length` bytes,
    /// keeping the leftover in the internal buffer.
    pub fn read_exact(&mut self, length: usize) -> io::Result<BytesMut> {
        loop {
            if self.buf.len() >= length {
                return Ok(self.buf.split_to(length));
            }

            let len = self.read()?;

            // Handle EOF
            if len == 0 {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "not enough bytes"));
            }
        }
    }

    /// Reads one whole TPKT frame.
    pub fn read_pdu(&mut self) -> io::Result<BytesMut> {
        loop {
            // Try decoding and see if a frame has been received already
            match rdpmux_pdu::find_size(self.peek()) {
                Ok(Some(length)) => {
                    return self.read_exact(length);
                }
                Ok(None) => {
                    let len = self.read()?;

                    // Handle EOF
                    if len == 0 {
                        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "not enough bytes"));
                    }
                }
                Err(e) => return Err(io::Error::other(e)),
            };
        }
    }

    /// Reads a frame using the provided `PduHint`.
    pub fn read_by_hint(&mut self, hint: &dyn PduHint) -> io::Result<Bytes> {
        loop {
            match hint.find_size(self.peek()).map_err(io::Error::other)? {
                Some(length) => {
                    return Ok(self.read_exact(length)?.freeze());
                }
                None => {
                    let len = self.read()?;

                    // Handle EOF
                    if len == 0 {
                        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "not enough bytes"));
                    }
                }
            };
        }
    }

    /// Reads from the stream into the internal buffer, returning how many bytes were read.
    fn read(&mut self) -> io::Result<usize> {
        let mut read_bytes = [0u8; READ_BUFFER_SIZE];
        let len = self.stream.read(&mut read_bytes)?;
        self.buf.extend_from_slice(&read_bytes[..len]);

        Ok(len)
    }
}

impl<S> Framed<S>
where
    S: Write,
{
    /// Attempts to write an entire buffer into this `Framed`'s stream.
    pub fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf)?;
        self.stream.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_frame_is_returned_in_one_piece() {
        let stream = io::Cursor::new(vec![0x03, 0x00, 0x00, 0x07, 0x02, 0xf0, 0x80, 0xFF]);
        let mut framed = Framed::new(stream);

        let frame = framed.read_pdu().unwrap();
        assert_eq!(frame.as_ref(), [0x03, 0x00, 0x00, 0x07, 0x02, 0xf0, 0x80]);

        // the leftover byte stays buffered
        assert_eq!(framed.peek(), [0xFF]);
    }

    #[test]
    fn eof_before_a_whole_frame_is_an_error() {
        let stream = io::Cursor::new(vec![0x03, 0x00, 0x00, 0x0a, 0x02]);
        let mut framed = Framed::new(stream);

        let e = framed.read_pdu().unwrap_err();
        assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn non_tpkt_bytes_are_an_error() {
        let stream = io::Cursor::new(vec![0x55, 0x00, 0x00, 0x07]);
        let mut framed = Framed::new(stream);

        assert!(framed.read_pdu().is_err());
    }
}
