//! Wire codec for [`ActionMessage`](crate::ActionMessage).
//!
//! Adapted from the bincode-over-`tokio_util::codec` pattern used for the federate/RTI stream:
//! bincode's own varint-prefixed collection encoding is self-delimiting, so a single `Decoder`
//! that tracks how many bytes it consumed is enough to frame a stream of records with no
//! separate length prefix. `packetize`/`depacketize` below are this crate's names for exactly
//! that framing, applied to `ActionMessage` instead of a generic `T`.

use std::io::{self, Read};

use bincode::Options;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::ActionMessage;

fn options() -> impl Options + Copy {
    bincode::options()
}

/// Serializes a single message to its binary wire form.
pub fn to_byte_array(msg: &ActionMessage) -> Result<Vec<u8>, bincode::Error> {
    options().serialize(msg)
}

/// Deserializes a single message from a binary wire form produced by [`to_byte_array`].
pub fn from_byte_array(bytes: &[u8]) -> Result<ActionMessage, bincode::Error> {
    options().deserialize(bytes)
}

/// Serializes a message with an explicit `u32` length prefix -- used when an `ActionMessage`
/// needs to be embedded as an opaque blob inside another message's payload (a filter round trip
/// carrying the original message along for the return leg).
pub fn packetize(msg: &ActionMessage) -> Result<Vec<u8>, bincode::Error> {
    let body = to_byte_array(msg)?;
    let mut framed = Vec::with_capacity(4 + body.len());
    framed.extend_from_slice(&(body.len() as u32).to_be_bytes());
    framed.extend_from_slice(&body);
    Ok(framed)
}

/// Inverse of [`packetize`].
pub fn depacketize(bytes: &[u8]) -> Result<ActionMessage, bincode::Error> {
    if bytes.len() < 4 {
        return Err(Box::new(bincode::ErrorKind::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "packetized buffer shorter than its length prefix",
        ))));
    }
    let len = u32::from_be_bytes(bytes[..4].try_into().unwrap()) as usize;
    from_byte_array(&bytes[4..4 + len])
}

/// A `tokio_util` codec that frames a byte stream into [`ActionMessage`]s.
///
/// Used to wrap any `AsyncRead + AsyncWrite` transport (a `TcpStream`, a duplex pipe) with
/// `tokio_util::codec::Framed` so that sending and receiving deal in whole messages.
#[derive(Debug, Default)]
pub struct ActionMessageCodec;

impl Decoder for ActionMessageCodec {
    type Item = ActionMessage;
    type Error = bincode::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if buf.is_empty() {
            return Ok(None);
        }
        let mut reader = ConsumeCountingReader::new(&buf[..]);
        match options().deserialize_from(&mut reader) {
            Ok(msg) => {
                buf.advance(reader.consumed());
                Ok(Some(msg))
            }
            // Not enough bytes buffered yet for a complete record; wait for more.
            Err(e) => match *e {
                bincode::ErrorKind::Io(ref io_err)
                    if io_err.kind() == io::ErrorKind::UnexpectedEof =>
                {
                    Ok(None)
                }
                _ => Err(e),
            },
        }
    }
}

impl Encoder<ActionMessage> for ActionMessageCodec {
    type Error = bincode::Error;

    fn encode(&mut self, item: ActionMessage, buf: &mut BytesMut) -> Result<(), Self::Error> {
        let size = options().serialized_size(&item)?;
        buf.reserve(size as usize);
        let encoded = options().serialize(&item)?;
        buf.put(&encoded[..]);
        Ok(())
    }
}

struct ConsumeCountingReader<'buf> {
    buf: &'buf [u8],
    consumed: usize,
}

impl<'buf> ConsumeCountingReader<'buf> {
    fn new(buf: &'buf [u8]) -> Self {
        Self { buf, consumed: 0 }
    }

    fn consumed(&self) -> usize {
        self.consumed
    }
}

impl<'buf, 'a> Read for &'a mut ConsumeCountingReader<'buf> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let n = self.buf.read(out)?;
        self.consumed += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ActionCode;
    use cosim_core::Time;

    #[test]
    fn byte_array_round_trips() {
        let msg = ActionMessage::new(ActionCode::Pub)
            .with_time(Time::from_seconds(1.25))
            .with_payload(vec![1, 2, 3])
            .with_string_data(["x".to_string()]);
        let bytes = to_byte_array(&msg).unwrap();
        let decoded = from_byte_array(&bytes).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn packetize_round_trips() {
        let msg = ActionMessage::new(ActionCode::SendMessage).with_payload(vec![9; 64]);
        let framed = packetize(&msg).unwrap();
        assert_eq!(depacketize(&framed).unwrap(), msg);
    }

    #[test]
    fn json_round_trips() {
        let msg = ActionMessage::new(ActionCode::Query).with_string_data(["federate_map".into()]);
        let json = msg.to_json_string().unwrap();
        let decoded = ActionMessage::from_json_string(&json).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn codec_decodes_two_packed_messages() {
        let mut codec = ActionMessageCodec;
        let mut buf = BytesMut::new();
        let a = ActionMessage::new(ActionCode::Tick);
        let b = ActionMessage::new(ActionCode::Stop);
        codec.encode(a.clone(), &mut buf).unwrap();
        codec.encode(b.clone(), &mut buf).unwrap();

        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first, a);
        assert_eq!(second, b);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
