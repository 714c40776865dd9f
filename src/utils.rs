#![allow(dead_code)]

use anyhow::{Context, Result};
use prost::Message;

/// Encode the given model into a bytes vec.
pub fn encode_model<M: Message>(model: &M) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(model.encoded_len());
    model.encode(&mut buf).context("error serializing data model")?;
    Ok(buf)
}

/// Decode an object from the given buffer.
pub fn decode_model<M: Message + Default>(data: &[u8]) -> Result<M> {
    M::decode(data).context("error decoding object from buffer")
}

/// Pack a backend identifier and a per-backend sequence number into a single work id.
///
/// The backend id occupies the high 32 bits and the sequence the low 32 bits, so ids
/// minted by different backends can never collide without any central coordination.
pub fn pack_work_id(backend_id: u32, seq: u32) -> u64 {
    ((backend_id as u64) << 32) | seq as u64
}

/// Split a packed work id back into its backend identifier and sequence number.
pub fn unpack_work_id(work_id: u64) -> (u32, u32) {
    ((work_id >> 32) as u32, work_id as u32)
}
