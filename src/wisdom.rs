//! Sharing planner wisdom across a process group.
//!
//! Wisdom is the set of transform lengths a planner has built tables for.
//! The blob format is `magic || blake3(payload) || payload`, with the
//! payload a sequence of little-endian u64 lengths; importing a blob plans
//! the union. Rank pairs ship blobs as two point-to-point messages: a
//! length first, then the opaque bytes.
//!
//! `gather_wisdom` consolidates every rank's wisdom onto the first rank of
//! the group in logarithmic depth: the group recursively splits into its
//! even- and odd-indexed halves, each half consolidates onto its own head,
//! and the odd head finally merges into the even head. A blob that fails
//! verification is fatal to the whole group.

use core::fmt;

use crate::comm::{CommError, Communicator, Tag};
use crate::error::Result;
use crate::fft::ScalarFft;
use crate::num::Float;

const TAG_WISDOM_LEN: Tag = 0x0511;
const TAG_WISDOM_DATA: Tag = 0x0512;

const MAGIC: &[u8; 4] = b"PWF1";
const CHECKSUM_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WisdomError {
    /// Truncated blob, bad magic, or a payload that is not a whole number
    /// of lengths.
    Malformed,
    /// Payload bytes do not match the embedded checksum.
    Checksum,
}

impl fmt::Display for WisdomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WisdomError::Malformed => write!(f, "malformed wisdom blob"),
            WisdomError::Checksum => write!(f, "wisdom blob failed checksum verification"),
        }
    }
}

impl std::error::Error for WisdomError {}

/// Serializes the planner's accumulated wisdom.
pub fn export_wisdom<T: Float>(fft: &ScalarFft<T>) -> Vec<u8> {
    let sizes = fft.planned_sizes();
    let mut payload = Vec::with_capacity(sizes.len() * 8);
    for n in sizes {
        payload.extend_from_slice(&(n as u64).to_le_bytes());
    }
    let mut blob = Vec::with_capacity(MAGIC.len() + CHECKSUM_LEN + payload.len());
    blob.extend_from_slice(MAGIC);
    blob.extend_from_slice(blake3::hash(&payload).as_bytes());
    blob.extend_from_slice(&payload);
    blob
}

/// Verifies a blob and merges it into the planner (the union of planned
/// lengths).
pub fn import_wisdom<T: Float>(fft: &ScalarFft<T>, blob: &[u8]) -> core::result::Result<(), WisdomError> {
    if blob.len() < MAGIC.len() + CHECKSUM_LEN || &blob[..MAGIC.len()] != MAGIC {
        return Err(WisdomError::Malformed);
    }
    let (checksum, payload) = blob[MAGIC.len()..].split_at(CHECKSUM_LEN);
    if blake3::hash(payload).as_bytes() != checksum {
        return Err(WisdomError::Checksum);
    }
    if payload.len() % 8 != 0 {
        return Err(WisdomError::Malformed);
    }
    for chunk in payload.chunks_exact(8) {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(chunk);
        let n = u64::from_le_bytes(raw) as usize;
        if n == 0 {
            return Err(WisdomError::Malformed);
        }
        fft.plan(n);
    }
    Ok(())
}

/// Consolidates wisdom from every rank in `ranks` onto `ranks[0]`.
pub fn gather_wisdom<T: Float, C: Communicator>(
    comm: &C,
    fft: &ScalarFft<T>,
    ranks: &[usize],
) -> Result<()> {
    let me = comm.rank();
    let Some(pos) = ranks.iter().position(|&r| r == me) else {
        return Ok(());
    };
    if ranks.len() > 2 {
        // Recurse on my parity class; its head ends up holding the class's
        // merged wisdom.
        let half: Vec<usize> = ranks
            .iter()
            .copied()
            .enumerate()
            .filter(|(i, _)| i % 2 == pos % 2)
            .map(|(_, r)| r)
            .collect();
        gather_wisdom(comm, fft, &half)?;
    }
    if ranks.len() > 1 && pos < 2 {
        if pos == 1 {
            send_blob(comm, ranks[0], &export_wisdom(fft))?;
        } else {
            let blob = recv_blob(comm, ranks[1])?;
            import_wisdom(fft, &blob)?;
        }
    }
    Ok(())
}

/// Pushes rank 0's consolidated wisdom to every other rank in `ranks`.
pub fn broadcast_wisdom<T: Float, C: Communicator>(
    comm: &C,
    fft: &ScalarFft<T>,
    ranks: &[usize],
) -> Result<()> {
    if ranks.len() < 2 {
        return Ok(());
    }
    let me = comm.rank();
    let root = ranks[0];
    if me == root {
        let blob = export_wisdom(fft);
        for &r in &ranks[1..] {
            send_blob(comm, r, &blob)?;
        }
    } else if ranks.contains(&me) {
        let blob = recv_blob(comm, root)?;
        import_wisdom(fft, &blob)?;
    }
    Ok(())
}

fn send_blob<C: Communicator>(comm: &C, dest: usize, blob: &[u8]) -> Result<()> {
    comm.send_slice::<u64>(dest, TAG_WISDOM_LEN, &[blob.len() as u64])?;
    comm.send_bytes(dest, TAG_WISDOM_DATA, blob)?;
    Ok(())
}

fn recv_blob<C: Communicator>(comm: &C, source: usize) -> Result<Vec<u8>> {
    let mut len = [0u64; 1];
    comm.recv_slice_into(source, TAG_WISDOM_LEN, &mut len)?;
    let blob = comm.recv_bytes(source, TAG_WISDOM_DATA)?;
    if blob.len() as u64 != len[0] {
        return Err(CommError::PayloadSize {
            expected: len[0] as usize,
            got: blob.len(),
        }
        .into());
    }
    Ok(blob)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{LocalGroup, ThreadLevel};

    #[test]
    fn blob_round_trip() {
        let a = ScalarFft::<f64>::default();
        a.plan(8);
        a.plan(12);
        let blob = export_wisdom(&a);
        let b = ScalarFft::<f64>::default();
        b.plan(16);
        import_wisdom(&b, &blob).unwrap();
        assert_eq!(b.planned_sizes(), vec![8, 12, 16]);
    }

    #[test]
    fn corrupted_blob_is_rejected() {
        let a = ScalarFft::<f64>::default();
        a.plan(8);
        let mut blob = export_wisdom(&a);
        let last = blob.len() - 1;
        blob[last] ^= 0xff;
        assert_eq!(import_wisdom(&a, &blob), Err(WisdomError::Checksum));
        assert_eq!(import_wisdom(&a, b"nonsense"), Err(WisdomError::Malformed));
    }

    #[test]
    fn gather_consolidates_onto_rank_zero() {
        for size in [1usize, 2, 3, 5, 8] {
            let code = LocalGroup::run(size, ThreadLevel::Multiple, move |comm| {
                let fft = ScalarFft::<f64>::default();
                // Every rank knows one distinct length.
                fft.plan(4 + comm.rank());
                let ranks: Vec<usize> = (0..comm.size()).collect();
                gather_wisdom(&comm, &fft, &ranks).unwrap();
                if comm.rank() == 0 {
                    let expected: Vec<usize> = (0..size).map(|r| 4 + r).collect();
                    assert_eq!(fft.planned_sizes(), expected);
                }
                0
            });
            assert_eq!(code, 0, "group size {size}");
        }
    }

    #[test]
    fn broadcast_spreads_rank_zero_wisdom() {
        let code = LocalGroup::run(4, ThreadLevel::Multiple, |comm| {
            let fft = ScalarFft::<f64>::default();
            if comm.rank() == 0 {
                fft.plan(32);
                fft.plan(9);
            }
            let ranks: Vec<usize> = (0..comm.size()).collect();
            broadcast_wisdom(&comm, &fft, &ranks).unwrap();
            assert_eq!(fft.planned_sizes(), vec![9, 32]);
            0
        });
        assert_eq!(code, 0);
    }
}
