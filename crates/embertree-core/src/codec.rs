//! MessagePack encoding of request and response roots

use bytes::Bytes;

use crate::message::Root;
use crate::Result;

/// Encode a root into one frame payload
pub fn encode(root: &Root) -> Result<Bytes> {
    let buf = rmp_serde::to_vec_named(root)?;
    Ok(Bytes::from(buf))
}

/// Decode a frame payload into a root
pub fn decode(bytes: &[u8]) -> Result<Root> {
    Ok(rmp_serde::from_slice(bytes)?)
}
