//! Collecting distributed blocks into a full array held by rank 0.
//!
//! Every sender ships only its raw block contents; the collector recomputes
//! each sender's geometry from the deterministic decomposition and places
//! the data purely by global offset. Blocks of one variant never overlap,
//! so placement order is irrelevant and repeating a gather reproduces the
//! identical array. A set of blocks that does not exactly cover the full
//! array is a configuration error, not something to recover from.

use bytemuck::{Pod, Zeroable};

use crate::comm::{Communicator, Tag};
use crate::error::Result;
use crate::num::Complex64;
use crate::split::{GlobalShape, ProcessGrid, Split3, SplitError};

const TAG_GATHER_XY: Tag = 0x0401;
const TAG_GATHER_YZ: Tag = 0x0402;

/// The collector rank.
pub const ROOT: usize = 0;

/// Gathers the xy-split real blocks. Returns the assembled (X, Y, Z) array
/// on rank 0 and `None` on every other rank.
pub fn gather_xy<C: Communicator>(
    comm: &C,
    grid: &ProcessGrid,
    shape: &GlobalShape,
    local: &[f64],
) -> Result<Option<Vec<f64>>> {
    gather_impl(comm, grid, local, TAG_GATHER_XY, shape.real_len(), |rank| {
        Split3::xy(shape, grid, rank)
    })
}

/// Gathers the yz-split complex blocks into the (X, Y, Z/2 + 1) array.
pub fn gather_yz<C: Communicator>(
    comm: &C,
    grid: &ProcessGrid,
    shape: &GlobalShape,
    local: &[Complex64],
) -> Result<Option<Vec<Complex64>>> {
    gather_impl(comm, grid, local, TAG_GATHER_YZ, shape.complex_len(), |rank| {
        Split3::yz(shape, grid, rank)
    })
}

fn gather_impl<T, C, G>(
    comm: &C,
    grid: &ProcessGrid,
    local: &[T],
    tag: Tag,
    full_len: usize,
    geometry: G,
) -> Result<Option<Vec<T>>>
where
    T: Pod,
    C: Communicator,
    G: Fn(usize) -> core::result::Result<Split3, SplitError>,
{
    let me = comm.rank();
    let mine = geometry(me)?;
    if mine.len() != local.len() {
        return Err(SplitError::GeometryMismatch {
            expected: mine.len(),
            got: local.len(),
        }
        .into());
    }
    if me != ROOT {
        comm.send_slice(ROOT, tag, local)?;
        return Ok(None);
    }
    let mut full = vec![T::zeroed(); full_len];
    let mut covered = 0usize;
    for rank in 0..grid.active_count() {
        let block = geometry(rank)?;
        covered += block.len();
        if rank == ROOT {
            place_block(&mut full, local, &block);
        } else {
            let data = comm.recv_slice::<T>(rank, tag)?;
            if data.len() != block.len() {
                return Err(SplitError::GeometryMismatch {
                    expected: block.len(),
                    got: data.len(),
                }
                .into());
            }
            place_block(&mut full, &data, &block);
        }
    }
    if covered != full_len {
        return Err(SplitError::GeometryMismatch {
            expected: full_len,
            got: covered,
        }
        .into());
    }
    log::debug!("gathered {covered} elements from {} ranks", grid.active_count());
    Ok(Some(full))
}

/// Copies one block into its global position; the innermost extent is
/// contiguous on both sides.
fn place_block<T: Copy>(full: &mut [T], block: &[T], d: &Split3) {
    let mut src = 0;
    for i in 0..d.xl {
        for j in 0..d.yl {
            let base = ((d.x0 + i) * d.gy + d.y0 + j) * d.gz + d.z0;
            full[base..base + d.zl].copy_from_slice(&block[src..src + d.zl]);
            src += d.zl;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{LocalGroup, ThreadLevel};
    use crate::harness::init_field;

    #[test]
    fn gather_xy_reassembles_global_field() {
        let shape = GlobalShape::new(4, 6, 3).unwrap();
        let code = LocalGroup::run(4, ThreadLevel::Multiple, |comm| {
            let grid = ProcessGrid::with_dims(2, 2, 4, comm.rank()).unwrap();
            let d = Split3::xy(&shape, &grid, comm.rank()).unwrap();
            let mut f = vec![0.0; d.len()];
            init_field(&mut f, &d);
            let full = gather_xy(&comm, &grid, &shape, &f).unwrap();
            match (comm.rank(), full) {
                (0, Some(full)) => {
                    let mut expected = vec![0.0; shape.real_len()];
                    init_field(&mut expected, &Split3::full_real(&shape));
                    assert_eq!(full, expected);
                }
                (0, None) => panic!("root received nothing"),
                (_, None) => {}
                (r, Some(_)) => panic!("rank {r} should not hold the gathered array"),
            }
            0
        });
        assert_eq!(code, 0);
    }

    #[test]
    fn gather_yz_reassembles_complex_blocks() {
        let shape = GlobalShape::new(4, 4, 4).unwrap();
        let code = LocalGroup::run(2, ThreadLevel::Multiple, |comm| {
            let grid = ProcessGrid::with_dims(2, 1, 2, comm.rank()).unwrap();
            let d = Split3::yz(&shape, &grid, comm.rank()).unwrap();
            // Tag every element with its global coordinate.
            let mut g = vec![Complex64::zero(); d.len()];
            let mut c = 0;
            for i in 0..d.xl {
                for j in 0..d.yl {
                    for k in 0..d.zl {
                        let gidx = ((d.x0 + i) * d.gy + d.y0 + j) * d.gz + d.z0 + k;
                        g[c] = Complex64::new(gidx as f64, -(gidx as f64));
                        c += 1;
                    }
                }
            }
            let full = gather_yz(&comm, &grid, &shape, &g).unwrap();
            if comm.rank() == 0 {
                let full = full.expect("root holds the gathered array");
                assert_eq!(full.len(), shape.complex_len());
                for (idx, v) in full.iter().enumerate() {
                    assert_eq!(v.re, idx as f64);
                    assert_eq!(v.im, -(idx as f64));
                }
            }
            0
        });
        assert_eq!(code, 0);
    }

    #[test]
    fn repeated_gather_is_bit_identical() {
        let shape = GlobalShape::new(4, 4, 4).unwrap();
        let code = LocalGroup::run(4, ThreadLevel::Multiple, |comm| {
            let grid = ProcessGrid::with_dims(2, 2, 4, comm.rank()).unwrap();
            let d = Split3::xy(&shape, &grid, comm.rank()).unwrap();
            let mut f = vec![0.0; d.len()];
            init_field(&mut f, &d);
            let first = gather_xy(&comm, &grid, &shape, &f).unwrap();
            let second = gather_xy(&comm, &grid, &shape, &f).unwrap();
            if comm.rank() == 0 {
                let a = first.expect("first gather");
                let b = second.expect("second gather");
                assert!(a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits()));
            }
            0
        });
        assert_eq!(code, 0);
    }

    #[test]
    fn wrong_local_length_is_fatal() {
        let shape = GlobalShape::new(4, 4, 4).unwrap();
        let code = LocalGroup::run(1, ThreadLevel::Multiple, |comm| {
            let grid = ProcessGrid::with_dims(1, 1, 1, 0).unwrap();
            let f = vec![0.0; 7];
            match gather_xy(&comm, &grid, &shape, &f) {
                Err(crate::error::Error::Split(SplitError::GeometryMismatch { .. })) => 0,
                other => panic!("unexpected result: {other:?}"),
            }
        });
        assert_eq!(code, 0);
    }
}
