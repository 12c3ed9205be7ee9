//! The XX handshake with libp2p identity payloads.
//!
//! Message flow, with `payload` being the protobuf of
//! [`crate::handshake_proto::NoiseHandshakePayload`]:
//!
//! ```text
//! initiator -> responder : e
//! responder -> initiator : e, ee, s, es  (payload)
//! initiator -> responder : s, se        (payload)
//! ```
//!
//! Each party signs `"noise-libp2p-static-key:" || static_pub` with its
//! identity key; the receiver checks the signature against the static
//! key it saw inside the encrypted handshake, which authenticates the
//! remote identity.

use crate::error::NoiseError;
use crate::handshake_proto::NoiseHandshakePayload;
use crate::io::framed;
use crate::NOISE_PARAMS;
use log::trace;
use prost::Message;
use snow::params::NoiseParams;
use snow::StatelessTransportState;
use strand_core::identity::Keypair;
use strand_core::PublicKey;
use strand_traits::{ReadEx, WriteEx};

const STATIC_KEY_DOMAIN: &[u8] = b"noise-libp2p-static-key:";

fn params() -> Result<NoiseParams, NoiseError> {
    NOISE_PARAMS.parse::<NoiseParams>().map_err(NoiseError::from)
}

/// Builds the signed payload that vouches for `static_pub`.
pub(crate) fn make_payload(keypair: &Keypair, static_pub: &[u8]) -> Result<Vec<u8>, NoiseError> {
    let mut msg = Vec::with_capacity(STATIC_KEY_DOMAIN.len() + static_pub.len());
    msg.extend_from_slice(STATIC_KEY_DOMAIN);
    msg.extend_from_slice(static_pub);
    let identity_sig = keypair.sign(&msg).map_err(|_| NoiseError::SigningFailed)?;

    let payload = NoiseHandshakePayload {
        identity_key: keypair.public().into_protobuf_encoding(),
        identity_sig,
        data: Vec::new(),
    };
    let mut buf = Vec::with_capacity(payload.encoded_len());
    payload.encode(&mut buf).expect("Vec<u8> provides capacity as needed");
    Ok(buf)
}

/// Checks a received payload against the remote's static key and returns
/// the authenticated identity key.
pub(crate) fn verify_payload(payload: &[u8], remote_static: &[u8]) -> Result<PublicKey, NoiseError> {
    let payload = NoiseHandshakePayload::decode(payload)?;
    let identity_key =
        PublicKey::from_protobuf_encoding(&payload.identity_key).map_err(|_| NoiseError::InvalidKey)?;

    let mut msg = Vec::with_capacity(STATIC_KEY_DOMAIN.len() + remote_static.len());
    msg.extend_from_slice(STATIC_KEY_DOMAIN);
    msg.extend_from_slice(remote_static);
    if !identity_key.verify(&msg, &payload.identity_sig) {
        return Err(NoiseError::AuthenticationFailed);
    }
    Ok(identity_key)
}

/// Runs the initiator side of the handshake over `socket`.
///
/// On success returns the transport session and the authenticated
/// identity key of the responder.
pub(crate) async fn initiate<T>(
    socket: &mut T,
    keypair: &Keypair,
) -> Result<(StatelessTransportState, PublicKey), NoiseError>
where
    T: ReadEx + WriteEx + Send,
{
    let params = params()?;
    let static_key = snow::Builder::new(params.clone()).generate_keypair()?;
    let payload = make_payload(keypair, &static_key.public)?;
    let mut hs = snow::Builder::new(params)
        .local_private_key(&static_key.private)
        .build_initiator()?;

    let mut buf = vec![0u8; framed::MAX_RECORD_LEN];

    // -> e
    let n = hs.write_message(&[], &mut buf)?;
    framed::send_record(socket, &buf[..n]).await?;
    trace!("handshake: sent e");

    // <- e, ee, s, es (payload)
    let msg = framed::recv_record_required(socket).await?;
    let mut plaintext = vec![0u8; msg.len()];
    let n = hs.read_message(&msg, &mut plaintext)?;
    let remote_static = hs
        .get_remote_static()
        .ok_or(NoiseError::AuthenticationFailed)?
        .to_vec();
    let identity = verify_payload(&plaintext[..n], &remote_static)?;
    trace!("handshake: authenticated responder");

    // -> s, se (payload)
    let n = hs.write_message(&payload, &mut buf)?;
    framed::send_record(socket, &buf[..n]).await?;

    let session = hs.into_stateless_transport_mode()?;
    Ok((session, identity))
}

/// Runs the responder side of the handshake over `socket`.
pub(crate) async fn respond<T>(
    socket: &mut T,
    keypair: &Keypair,
) -> Result<(StatelessTransportState, PublicKey), NoiseError>
where
    T: ReadEx + WriteEx + Send,
{
    let params = params()?;
    let static_key = snow::Builder::new(params.clone()).generate_keypair()?;
    let payload = make_payload(keypair, &static_key.public)?;
    let mut hs = snow::Builder::new(params)
        .local_private_key(&static_key.private)
        .build_responder()?;

    let mut buf = vec![0u8; framed::MAX_RECORD_LEN];

    // <- e
    let msg = framed::recv_record_required(socket).await?;
    let mut plaintext = vec![0u8; msg.len()];
    hs.read_message(&msg, &mut plaintext)?;
    trace!("handshake: received e");

    // -> e, ee, s, es (payload)
    let n = hs.write_message(&payload, &mut buf)?;
    framed::send_record(socket, &buf[..n]).await?;

    // <- s, se (payload)
    let msg = framed::recv_record_required(socket).await?;
    let mut plaintext = vec![0u8; msg.len()];
    let n = hs.read_message(&msg, &mut plaintext)?;
    let remote_static = hs
        .get_remote_static()
        .ok_or(NoiseError::AuthenticationFailed)?
        .to_vec();
    let identity = verify_payload(&plaintext[..n], &remote_static)?;
    trace!("handshake: authenticated initiator");

    let session = hs.into_stateless_transport_mode()?;
    Ok((session, identity))
}
