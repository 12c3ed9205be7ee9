//! The multistream-select protocol.
//!
//! A tiny text protocol used to agree on what a freshly opened pipe will
//! speak next. Every message is a framed line:
//!
//! ```text
//! <varint length><payload>\n
//! ```
//!
//! where the length counts the payload plus the trailing newline. The
//! [`Negotiator`] runs either side of the exchange: the initiator proposes
//! protocols in preference order until one is echoed back, the responder
//! answers proposals with an echo, a listing (`ls`) or `na`.

use crate::upgrade::ProtocolName;
use log::{debug, trace};
use strand_traits::{ReadEx, WriteEx};
use thiserror::Error;
use std::io;

/// The version header exchanged before any negotiation.
pub const MSS_HEADER: &[u8] = b"/multistream/1.0.0";

const MSG_NA: &[u8] = b"na";
const MSG_LS: &[u8] = b"ls";

/// Multistream payloads are short protocol identifiers.
const MAX_FRAME_LEN: usize = 1024;

/// A varint that has not terminated within this many bytes is malformed.
const MAX_VARINT_BYTES: usize = 10;

/// Errors produced while negotiating a protocol.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed or unterminated varint")]
    BadVarint,
    #[error("frame of {0} bytes exceeds the multistream limit")]
    OverlongFrame(usize),
    #[error("frame is not newline-terminated")]
    MalformedFrame,
    #[error("remote speaks an incompatible multistream version")]
    IncorrectVersion,
    #[error("remote answered a proposal with an unrelated protocol")]
    ProtocolMismatch,
    #[error("none of the proposed protocols was accepted")]
    Failed,
}

/// Reads one unsigned LEB128 varint, one byte at a time.
pub(crate) async fn read_varint<R: ReadEx>(io: &mut R) -> Result<usize, NegotiationError> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    for _ in 0..MAX_VARINT_BYTES {
        let mut byte = [0u8; 1];
        if io.read2(&mut byte).await? == 0 {
            // EOF in the middle of a varint
            return Err(NegotiationError::BadVarint);
        }
        let b = byte[0];
        if shift >= 63 && b > 1 {
            return Err(NegotiationError::BadVarint);
        }
        value |= u64::from(b & 0x7f) << shift;
        if b & 0x80 == 0 {
            return Ok(value as usize);
        }
        shift += 7;
    }
    Err(NegotiationError::BadVarint)
}

/// Writes one framed multistream message.
pub(crate) async fn write_message<W: WriteEx>(io: &mut W, payload: &[u8]) -> Result<(), NegotiationError> {
    let mut uvi_buf = unsigned_varint::encode::usize_buffer();
    let header = unsigned_varint::encode::usize(payload.len() + 1, &mut uvi_buf);

    let mut frame = Vec::with_capacity(header.len() + payload.len() + 1);
    frame.extend_from_slice(header);
    frame.extend_from_slice(payload);
    frame.push(b'\n');
    io.write_all2(&frame).await?;
    io.flush2().await?;
    Ok(())
}

/// Reads one framed multistream message, without its trailing newline.
pub(crate) async fn read_message<R: ReadEx>(io: &mut R) -> Result<Vec<u8>, NegotiationError> {
    let len = read_varint(io).await?;
    if len == 0 {
        return Err(NegotiationError::MalformedFrame);
    }
    if len > MAX_FRAME_LEN {
        return Err(NegotiationError::OverlongFrame(len));
    }
    let mut frame = vec![0u8; len];
    io.read_exact2(&mut frame).await?;
    if frame.pop() != Some(b'\n') {
        return Err(NegotiationError::MalformedFrame);
    }
    Ok(frame)
}

/// Runs one side of a multistream-select exchange over a borrowed pipe.
///
/// On success the pipe is positioned exactly after the selection frame;
/// on failure the negotiator closes the pipe before reporting the error.
#[derive(Debug, Clone)]
pub struct Negotiator<TProto> {
    protocols: Vec<TProto>,
}

impl<TProto: ProtocolName + Clone> Negotiator<TProto> {
    pub fn new() -> Self {
        Negotiator { protocols: Vec::new() }
    }

    pub fn new_with_protocols(protocols: Vec<TProto>) -> Self {
        Negotiator { protocols }
    }

    pub fn add_protocol(&mut self, proto: TProto) {
        self.protocols.push(proto);
    }

    /// Initiator side: proposes our protocols in preference order and
    /// returns the first one the remote echoes back.
    pub async fn select_one<C>(&self, io: &mut C) -> Result<TProto, NegotiationError>
    where
        C: ReadEx + WriteEx + Send,
    {
        write_message(io, MSS_HEADER).await?;

        // The very first frame we read back may be the remote's own
        // multistream header; anything after that must answer a proposal.
        let mut first_response = true;
        for proto in &self.protocols {
            trace!("proposing protocol {}", name_of(proto));
            write_message(io, proto.protocol_name()).await?;

            loop {
                let msg = read_message(io).await?;
                if first_response {
                    first_response = false;
                    if msg == MSS_HEADER {
                        continue;
                    }
                }
                if msg == proto.protocol_name() {
                    trace!("negotiated protocol {}", name_of(proto));
                    return Ok(proto.clone());
                }
                if msg == MSG_NA {
                    debug!("protocol {} refused by remote", name_of(proto));
                    break;
                }
                return Err(close_with(io, NegotiationError::ProtocolMismatch).await);
            }
        }
        Err(close_with(io, NegotiationError::Failed).await)
    }

    /// Responder side: answers proposals until one matches our supported
    /// set, which is then echoed back and returned.
    pub async fn negotiate<C>(&self, io: &mut C) -> Result<TProto, NegotiationError>
    where
        C: ReadEx + WriteEx + Send,
    {
        let header = read_message(io).await?;
        if header != MSS_HEADER {
            return Err(close_with(io, NegotiationError::IncorrectVersion).await);
        }
        write_message(io, MSS_HEADER).await?;

        loop {
            let msg = read_message(io).await?;
            if msg == MSG_LS {
                for proto in &self.protocols {
                    write_message(io, proto.protocol_name()).await?;
                }
                continue;
            }
            if let Some(proto) = self.protocols.iter().find(|p| p.protocol_name() == &msg[..]) {
                let proto = proto.clone();
                write_message(io, &msg).await?;
                trace!("negotiated protocol {}", name_of(&proto));
                return Ok(proto);
            }
            debug!("unsupported proposal {:?}", String::from_utf8_lossy(&msg));
            write_message(io, MSG_NA).await?;
        }
    }
}

impl<TProto: ProtocolName + Clone> Default for Negotiator<TProto> {
    fn default() -> Self {
        Negotiator::new()
    }
}

fn name_of<TProto: ProtocolName>(proto: &TProto) -> String {
    String::from_utf8_lossy(proto.protocol_name()).into_owned()
}

async fn close_with<C: WriteEx>(io: &mut C, err: NegotiationError) -> NegotiationError {
    let _ = io.close2().await;
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemorySocket;
    use async_std::task;
    use futures::io::Cursor;

    fn varint_bytes(mut n: usize) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let mut b = (n & 0x7f) as u8;
            n >>= 7;
            if n > 0 {
                b |= 0x80;
            }
            out.push(b);
            if n == 0 {
                return out;
            }
        }
    }

    #[test]
    fn varint_roundtrip() {
        task::block_on(async {
            for n in [0usize, 1, 127, 128, 300, 1024, 1 << 20] {
                let mut io = Cursor::new(varint_bytes(n));
                assert_eq!(read_varint(&mut io).await.unwrap(), n);
            }
        });
    }

    #[test]
    fn varint_rejects_unterminated() {
        task::block_on(async {
            let mut io = Cursor::new(vec![0x80u8; 12]);
            assert!(matches!(read_varint(&mut io).await, Err(NegotiationError::BadVarint)));
        });
    }

    #[test]
    fn varint_rejects_eof() {
        task::block_on(async {
            let mut io = Cursor::new(vec![0x80u8]);
            assert!(matches!(read_varint(&mut io).await, Err(NegotiationError::BadVarint)));
        });
    }

    #[test]
    fn message_roundtrip() {
        task::block_on(async {
            let mut io = Cursor::new(Vec::new());
            write_message(&mut io, b"/noise").await.unwrap();
            io.set_position(0);
            assert_eq!(read_message(&mut io).await.unwrap(), b"/noise");
        });
    }

    #[test]
    fn message_is_newline_framed() {
        task::block_on(async {
            let mut io = Cursor::new(Vec::new());
            write_message(&mut io, b"/noise").await.unwrap();
            // varint(7) "/noise" \n
            assert_eq!(io.get_ref().as_slice(), b"\x07/noise\n");
        });
    }

    #[test]
    fn rejects_overlong_frame() {
        task::block_on(async {
            let mut bytes = varint_bytes(2000);
            bytes.extend_from_slice(&[b'x'; 64]);
            let mut io = Cursor::new(bytes);
            assert!(matches!(
                read_message(&mut io).await,
                Err(NegotiationError::OverlongFrame(2000))
            ));
        });
    }

    #[test]
    fn rejects_missing_newline() {
        task::block_on(async {
            let mut bytes = varint_bytes(3);
            bytes.extend_from_slice(b"abc");
            let mut io = Cursor::new(bytes);
            assert!(matches!(read_message(&mut io).await, Err(NegotiationError::MalformedFrame)));
        });
    }

    #[test]
    fn selects_first_common_protocol() {
        task::block_on(async {
            let (mut a, mut b) = MemorySocket::unbounded_pair();
            let server = task::spawn(async move {
                let neg = Negotiator::new_with_protocols(vec!["/noise"]);
                neg.negotiate(&mut b).await
            });
            let neg = Negotiator::new_with_protocols(vec!["/noise", "/plaintext/1.0.0"]);
            let selected = neg.select_one(&mut a).await.unwrap();
            assert_eq!(selected, "/noise");
            assert_eq!(server.await.unwrap(), "/noise");
        });
    }

    #[test]
    fn falls_back_after_na() {
        task::block_on(async {
            let (mut a, mut b) = MemorySocket::unbounded_pair();
            let server = task::spawn(async move {
                let neg = Negotiator::new_with_protocols(vec!["/yamux/1.0.0"]);
                neg.negotiate(&mut b).await
            });
            let neg = Negotiator::new_with_protocols(vec!["/mplex/6.7.0", "/yamux/1.0.0"]);
            let selected = neg.select_one(&mut a).await.unwrap();
            assert_eq!(selected, "/yamux/1.0.0");
            assert_eq!(server.await.unwrap(), "/yamux/1.0.0");
        });
    }

    #[test]
    fn no_common_protocol_fails() {
        task::block_on(async {
            let (mut a, mut b) = MemorySocket::unbounded_pair();
            let server = task::spawn(async move {
                let neg = Negotiator::new_with_protocols(vec!["/yamux/1.0.0"]);
                neg.negotiate(&mut b).await
            });
            let neg = Negotiator::new_with_protocols(vec!["/mplex/6.7.0"]);
            assert!(matches!(neg.select_one(&mut a).await, Err(NegotiationError::Failed)));
            // The initiator closed the pipe, so the responder sees an error.
            assert!(server.await.is_err());
        });
    }

    #[test]
    fn responder_rejects_bad_header() {
        task::block_on(async {
            let (mut a, mut b) = MemorySocket::unbounded_pair();
            let server = task::spawn(async move {
                let neg = Negotiator::new_with_protocols(vec!["/noise"]);
                neg.negotiate(&mut b).await
            });
            write_message(&mut a, b"/multistream/9.9.9").await.unwrap();
            assert!(matches!(server.await, Err(NegotiationError::IncorrectVersion)));
        });
    }

    #[test]
    fn responder_lists_protocols() {
        task::block_on(async {
            let (mut a, mut b) = MemorySocket::unbounded_pair();
            let _server = task::spawn(async move {
                let neg = Negotiator::new_with_protocols(vec!["/noise", "/yamux/1.0.0"]);
                neg.negotiate(&mut b).await
            });
            write_message(&mut a, MSS_HEADER).await.unwrap();
            assert_eq!(read_message(&mut a).await.unwrap(), MSS_HEADER);
            write_message(&mut a, MSG_LS).await.unwrap();
            assert_eq!(read_message(&mut a).await.unwrap(), b"/noise");
            assert_eq!(read_message(&mut a).await.unwrap(), b"/yamux/1.0.0");
            write_message(&mut a, b"/noise").await.unwrap();
            assert_eq!(read_message(&mut a).await.unwrap(), b"/noise");
        });
    }

    #[test]
    fn initiator_detects_mismatched_echo() {
        task::block_on(async {
            let (mut a, mut b) = MemorySocket::unbounded_pair();
            let server = task::spawn(async move {
                // A confused responder that echoes the wrong protocol.
                assert_eq!(read_message(&mut b).await.unwrap(), MSS_HEADER);
                write_message(&mut b, MSS_HEADER).await.unwrap();
                let _proposal = read_message(&mut b).await.unwrap();
                write_message(&mut b, b"/something/else").await.unwrap();
            });
            let neg = Negotiator::new_with_protocols(vec!["/noise"]);
            assert!(matches!(
                neg.select_one(&mut a).await,
                Err(NegotiationError::ProtocolMismatch)
            ));
            server.await;
        });
    }
}
