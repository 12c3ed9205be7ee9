//! Record framing: `<u16 be length><ciphertext>`.

use crate::error::NoiseError;
use strand_traits::{ReadEx, WriteEx};

/// Largest noise message, handshake or transport, on the wire.
pub(crate) const MAX_RECORD_LEN: usize = 65535;

/// AEAD tag appended to every encrypted record.
pub(crate) const TAG_LEN: usize = 16;

/// Largest plaintext that still fits a single record.
pub(crate) const MAX_PLAINTEXT_LEN: usize = MAX_RECORD_LEN - TAG_LEN;

/// Sends one length-prefixed record.
pub(crate) async fn send_record<W: WriteEx>(io: &mut W, record: &[u8]) -> Result<(), NoiseError> {
    if record.len() > MAX_RECORD_LEN {
        return Err(NoiseError::OversizedRecord(record.len()));
    }
    let mut frame = Vec::with_capacity(2 + record.len());
    frame.extend_from_slice(&(record.len() as u16).to_be_bytes());
    frame.extend_from_slice(record);
    io.write_all2(&frame).await?;
    io.flush2().await?;
    Ok(())
}

/// Receives one length-prefixed record. Returns `None` on a clean end of
/// stream between records; EOF inside a record is an error.
pub(crate) async fn recv_record<R: ReadEx>(io: &mut R) -> std::io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 2];
    let n = io.read2(&mut len_buf[..1]).await?;
    if n == 0 {
        return Ok(None);
    }
    io.read_exact2(&mut len_buf[1..]).await?;
    let len = u16::from_be_bytes(len_buf) as usize;
    let mut record = vec![0u8; len];
    io.read_exact2(&mut record).await?;
    Ok(Some(record))
}

/// Receives one record, treating end of stream as an error. Used during
/// the handshake where every message is mandatory.
pub(crate) async fn recv_record_required<R: ReadEx>(io: &mut R) -> Result<Vec<u8>, NoiseError> {
    match recv_record(io).await? {
        Some(record) => Ok(record),
        None => Err(NoiseError::Io(std::io::ErrorKind::UnexpectedEof.into())),
    }
}
