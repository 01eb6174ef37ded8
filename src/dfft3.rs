//! Distributed real-to-complex 3D FFT over a 2D process grid.
//!
//! The forward transform walks the pencil decomposition in three local
//! stages glued by two exchange phases:
//!
//! 1. real-to-complex along Z on the xy-split block;
//! 2. exchange inside each grid **row**, trading the Y split for a split of
//!    the complex depth, so Y becomes fully local;
//! 3. FFT along Y;
//! 4. exchange inside each grid **column**, trading the X split for a Y
//!    split, so X becomes fully local;
//! 5. FFT along X, leaving the yz-split complex block.
//!
//! `backward` runs the mirror image with unscaled inverses; `normalize` is
//! the explicit `1/(X*Y*Z)` step. The shifted variants modulate the real
//! samples by `(-1)^(x+y)` in global coordinates, identically to the
//! reference transform, so shifted runs validate bin-for-bin too.
//!
//! All communication is blocking point-to-point through [`Communicator`];
//! each rank stays single-threaded in the protocol. With the `parallel`
//! feature the purely local stages may fan out on a bounded rayon pool.

use std::sync::Arc;

use crate::comm::{Communicator, Tag};
use crate::error::Result;
use crate::fft::{fft_with_twiddles, irfft_pencil_with, lane_with, rfft_pencil_with, FftError, ScalarFft};
use crate::num::Complex64;
use crate::split::{partition, partition_max, GlobalShape, ProcessGrid, Split3};

const TAG_FWD_ROW: Tag = 0x0101;
const TAG_FWD_COL: Tag = 0x0102;
const TAG_BWD_COL: Tag = 0x0103;
const TAG_BWD_ROW: Tag = 0x0104;

/// Exchange routine selection (`-s`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExchangeKind {
    /// Rotation schedule: at step `s` send to `me+s` and receive from
    /// `me-s`, pairing every send with a matching receive.
    #[default]
    Pairwise,
    /// Post every send up front, then drain the receives.
    PostAll,
}

impl ExchangeKind {
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => ExchangeKind::PostAll,
            _ => ExchangeKind::Pairwise,
        }
    }
}

/// Engine tuning, passed by value into the constructor; there is no
/// process-wide mutable configuration.
#[derive(Debug, Clone, Copy)]
pub struct TuneOptions {
    /// Splits every exchange payload into this many messages (0 or 1 keeps
    /// one message per peer).
    pub divisor: usize,
    pub exchange: ExchangeKind,
    /// Local transform threads per rank; only effective with the
    /// `parallel` feature.
    pub threads: usize,
}

impl Default for TuneOptions {
    fn default() -> Self {
        Self {
            divisor: 0,
            exchange: ExchangeKind::Pairwise,
            threads: 1,
        }
    }
}

/// Bounded worker pool for the local stages. Without the `parallel`
/// feature every stage runs inline.
struct Workers {
    #[cfg(feature = "parallel")]
    pool: Option<rayon::ThreadPool>,
}

impl Workers {
    fn new(threads: usize) -> Self {
        #[cfg(feature = "parallel")]
        {
            let pool = if threads > 1 {
                match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
                    Ok(pool) => Some(pool),
                    Err(e) => {
                        log::warn!("falling back to serial transforms: {e}");
                        None
                    }
                }
            } else {
                None
            };
            Workers { pool }
        }
        #[cfg(not(feature = "parallel"))]
        {
            let _ = threads;
            Workers {}
        }
    }

    /// Applies `op` to every `chunk`-sized piece of `data`, handing each
    /// invocation a scratch vector of `scratch_len` complex slots.
    fn run_chunks<T, F>(&self, data: &mut [T], chunk: usize, scratch_len: usize, op: F)
    where
        T: Send,
        F: Fn(&mut Vec<Complex64>, usize, &mut [T]) + Send + Sync,
    {
        if chunk == 0 || data.is_empty() {
            return;
        }
        #[cfg(feature = "parallel")]
        if let Some(pool) = &self.pool {
            use rayon::prelude::*;
            pool.install(|| {
                data.par_chunks_mut(chunk).enumerate().for_each_init(
                    || vec![Complex64::zero(); scratch_len],
                    |scr, (idx, piece)| op(scr, idx, piece),
                );
            });
            return;
        }
        let mut scr = vec![Complex64::zero(); scratch_len];
        for (idx, piece) in data.chunks_mut(chunk).enumerate() {
            op(&mut scr, idx, piece);
        }
    }
}

pub struct DistRcfft3<'a, C: Communicator> {
    comm: &'a C,
    grid: ProcessGrid,
    shape: GlobalShape,
    df: Split3,
    dg: Split3,
    row: usize,
    col: usize,
    opts: TuneOptions,
    workers: Workers,
    tw_x: Arc<[Complex64]>,
    tw_y: Arc<[Complex64]>,
    tw_z: Arc<[Complex64]>,
    /// (xl, yl, Zp): z pencils after the real-to-complex pass.
    c1: Vec<Complex64>,
    /// (xl, Y, zl): full-Y pencils after the row exchange.
    c2: Vec<Complex64>,
    /// Staging copy of the yz-split block for the backward pass.
    gwork: Vec<Complex64>,
    /// Lane-major transpose buffer for the X stage.
    xpose: Vec<Complex64>,
    sendbuf: Vec<Complex64>,
    recvbuf: Vec<Complex64>,
}

impl<'a, C: Communicator> DistRcfft3<'a, C> {
    pub fn new(
        comm: &'a C,
        grid: &ProcessGrid,
        shape: GlobalShape,
        fft: &ScalarFft<f64>,
        opts: TuneOptions,
    ) -> Result<Self> {
        let rank = grid.rank;
        let df = Split3::xy(&shape, grid, rank)?;
        let dg = Split3::yz(&shape, grid, rank)?;
        let (row, col) = grid.coords_of(rank);
        let zp = shape.complex_depth();
        let workers = Workers::new(opts.threads);
        let tw_x = fft.twiddles(shape.x);
        let tw_y = fft.twiddles(shape.y);
        let tw_z = fft.twiddles(shape.z);
        let exchange_max = (df.xl * partition_max(shape.y, grid.cols) * dg.zl)
            .max(partition_max(shape.x, grid.rows) * dg.yl * dg.zl);
        log::debug!(
            "rank {rank}: grid {}x{}, real block {}x{}x{}, complex block {}x{}x{}",
            grid.rows, grid.cols, df.xl, df.yl, df.zl, dg.xl, dg.yl, dg.zl
        );
        Ok(Self {
            comm,
            grid: *grid,
            shape,
            df,
            dg,
            row,
            col,
            opts,
            workers,
            tw_x,
            tw_y,
            tw_z,
            c1: vec![Complex64::zero(); df.xl * df.yl * zp],
            c2: vec![Complex64::zero(); df.xl * shape.y * dg.zl],
            gwork: vec![Complex64::zero(); dg.len()],
            xpose: vec![Complex64::zero(); dg.len()],
            sendbuf: Vec::with_capacity(exchange_max),
            recvbuf: Vec::with_capacity(exchange_max),
        })
    }

    /// Geometry of the local real block.
    pub fn real_split(&self) -> &Split3 {
        &self.df
    }

    /// Geometry of the local complex block.
    pub fn complex_split(&self) -> &Split3 {
        &self.dg
    }

    pub fn forward(&mut self, f: &[f64], g: &mut [Complex64]) -> Result<()> {
        self.forward_impl(f, g, false)
    }

    /// Frequency-shifted forward.
    pub fn forward0(&mut self, f: &[f64], g: &mut [Complex64]) -> Result<()> {
        self.forward_impl(f, g, true)
    }

    pub fn backward(&mut self, g: &[Complex64], f: &mut [f64]) -> Result<()> {
        self.backward_impl(g, f, false)
    }

    pub fn backward0(&mut self, g: &[Complex64], f: &mut [f64]) -> Result<()> {
        self.backward_impl(g, f, true)
    }

    /// Divides every local element by `X*Y*Z`.
    pub fn normalize(&self, f: &mut [f64]) {
        let s = 1.0 / self.shape.real_len() as f64;
        for v in f.iter_mut() {
            *v *= s;
        }
    }

    fn forward_impl(&mut self, f: &[f64], g: &mut [Complex64], shift: bool) -> Result<()> {
        if f.len() != self.df.len() || g.len() != self.dg.len() {
            return Err(FftError::MismatchedLengths.into());
        }
        let z = self.shape.z;
        let zp = self.shape.complex_depth();
        // Real-to-complex along the local z pencils.
        {
            let (x0, y0, yl) = (self.df.x0, self.df.y0, self.df.yl);
            let tw_z = self.tw_z.clone();
            self.workers
                .run_chunks(&mut self.c1, zp, z, |scr, p, dst| {
                    let scale = shift_scale(shift, x0 + p / yl + y0 + p % yl);
                    rfft_pencil_with(&f[p * z..(p + 1) * z], scale, dst, &tw_z, scr);
                });
        }
        self.row_exchange_forward()?;
        self.y_lanes(false);
        self.col_exchange_forward(g)?;
        self.x_lanes(g, false);
        Ok(())
    }

    fn backward_impl(&mut self, g: &[Complex64], f: &mut [f64], shift: bool) -> Result<()> {
        if f.len() != self.df.len() || g.len() != self.dg.len() {
            return Err(FftError::MismatchedLengths.into());
        }
        let z = self.shape.z;
        self.gwork.copy_from_slice(g);
        let mut gwork = core::mem::take(&mut self.gwork);
        self.x_lanes(&mut gwork, true);
        let res = self.col_exchange_backward(&gwork);
        self.gwork = gwork;
        res?;
        self.y_lanes(true);
        self.row_exchange_backward()?;
        // Complex-to-real along the local z pencils.
        {
            let (x0, y0, yl) = (self.df.x0, self.df.y0, self.df.yl);
            let zp = self.shape.complex_depth();
            let tw_z = self.tw_z.clone();
            let c1 = &self.c1;
            self.workers.run_chunks(f, z, z, |scr, p, dst| {
                let scale = shift_scale(shift, x0 + p / yl + y0 + p % yl);
                irfft_pencil_with(&c1[p * zp..(p + 1) * zp], scale, dst, &tw_z, scr);
            });
        }
        Ok(())
    }

    /// FFTs along Y on the (xl, Y, zl) block.
    fn y_lanes(&mut self, inverse: bool) {
        let y = self.shape.y;
        let zl = self.dg.zl;
        let tw_y = self.tw_y.clone();
        self.workers
            .run_chunks(&mut self.c2, y * zl, y, |scr, _i, slab| {
                for k in 0..zl {
                    lane_with(slab, k, zl, y, &tw_y, inverse, scr);
                }
            });
    }

    /// FFTs along X on a (X, ylp, zl) block via the lane-major transpose
    /// buffer, so every lane is contiguous while it is transformed.
    fn x_lanes(&mut self, data: &mut [Complex64], inverse: bool) {
        let x = self.shape.x;
        let lanes = self.dg.yl * self.dg.zl;
        if lanes == 0 || x == 0 {
            return;
        }
        let xpose = &mut self.xpose[..x * lanes];
        for i in 0..x {
            let slab = &data[i * lanes..(i + 1) * lanes];
            for (lane, &v) in slab.iter().enumerate() {
                xpose[lane * x + i] = v;
            }
        }
        let tw_x = self.tw_x.clone();
        self.workers.run_chunks(xpose, x, 0, |_scr, _lane, piece| {
            fft_with_twiddles(piece, &tw_x, inverse);
        });
        for i in 0..x {
            let slab = &mut data[i * lanes..(i + 1) * lanes];
            for (lane, slot) in slab.iter_mut().enumerate() {
                *slot = xpose[lane * x + i];
            }
        }
    }

    /// Row phase: (xl, yl, Zp) pencils become (xl, Y, zl) pencils by
    /// trading y ranges for complex-depth ranges inside the grid row.
    fn row_exchange_forward(&mut self) -> Result<()> {
        let comm = self.comm;
        let n = self.grid.cols;
        let peers = self.grid.row_members(self.row);
        let me = self.col;
        let y = self.shape.y;
        let zp = self.shape.complex_depth();
        let (xl, yl, y0) = (self.df.xl, self.df.yl, self.df.y0);
        let (zl, z0) = (self.dg.zl, self.dg.z0);
        let parts = self.opts.divisor.max(1);
        let kind = self.opts.exchange;
        let c1 = &self.c1;
        let c2 = &mut self.c2;
        // Own share moves without a message.
        copy_rows(c1, zp, z0, zl, c2, zl, 0, zl, xl, yl, |i, j| (i * yl + j, i * y + y0 + j));
        exchange(
            comm,
            &peers,
            me,
            TAG_FWD_ROW,
            kind,
            parts,
            &mut self.sendbuf,
            &mut self.recvbuf,
            |t, buf| {
                let (tz0, tzl) = partition(zp, n, t);
                for i in 0..xl {
                    for j in 0..yl {
                        let base = (i * yl + j) * zp + tz0;
                        buf.extend_from_slice(&c1[base..base + tzl]);
                    }
                }
            },
            |t| {
                let (_, tyl) = partition(y, n, t);
                xl * tyl * zl
            },
            |t, data| {
                let (ty0, tyl) = partition(y, n, t);
                let mut src = 0;
                for i in 0..xl {
                    for j in 0..tyl {
                        let base = (i * y + ty0 + j) * zl;
                        c2[base..base + zl].copy_from_slice(&data[src..src + zl]);
                        src += zl;
                    }
                }
            },
        )
    }

    /// Column phase: (xl, Y, zl) pencils become the (X, ylp, zl) output by
    /// trading x ranges for y ranges inside the grid column.
    fn col_exchange_forward(&mut self, g: &mut [Complex64]) -> Result<()> {
        let comm = self.comm;
        let n = self.grid.rows;
        let peers = self.grid.col_members(self.col);
        let me = self.row;
        let x = self.shape.x;
        let y = self.shape.y;
        let (xl, x0) = (self.df.xl, self.df.x0);
        let (ylp, yp0, zl) = (self.dg.yl, self.dg.y0, self.dg.zl);
        let parts = self.opts.divisor.max(1);
        let kind = self.opts.exchange;
        let c2 = &self.c2;
        for i in 0..xl {
            for j in 0..ylp {
                let src = (i * y + yp0 + j) * zl;
                let dst = ((x0 + i) * ylp + j) * zl;
                g[dst..dst + zl].copy_from_slice(&c2[src..src + zl]);
            }
        }
        exchange(
            comm,
            &peers,
            me,
            TAG_FWD_COL,
            kind,
            parts,
            &mut self.sendbuf,
            &mut self.recvbuf,
            |t, buf| {
                let (ty0, tyl) = partition(y, n, t);
                for i in 0..xl {
                    for j in 0..tyl {
                        let base = (i * y + ty0 + j) * zl;
                        buf.extend_from_slice(&c2[base..base + zl]);
                    }
                }
            },
            |t| {
                let (_, txl) = partition(x, n, t);
                txl * ylp * zl
            },
            |t, data| {
                let (tx0, txl) = partition(x, n, t);
                let mut src = 0;
                for i in 0..txl {
                    for j in 0..ylp {
                        let base = ((tx0 + i) * ylp + j) * zl;
                        g[base..base + zl].copy_from_slice(&data[src..src + zl]);
                        src += zl;
                    }
                }
            },
        )
    }

    /// Mirror of [`Self::col_exchange_forward`].
    fn col_exchange_backward(&mut self, gwork: &[Complex64]) -> Result<()> {
        let comm = self.comm;
        let n = self.grid.rows;
        let peers = self.grid.col_members(self.col);
        let me = self.row;
        let x = self.shape.x;
        let y = self.shape.y;
        let (xl, x0) = (self.df.xl, self.df.x0);
        let (ylp, yp0, zl) = (self.dg.yl, self.dg.y0, self.dg.zl);
        let parts = self.opts.divisor.max(1);
        let kind = self.opts.exchange;
        let c2 = &mut self.c2;
        for i in 0..xl {
            for j in 0..ylp {
                let src = ((x0 + i) * ylp + j) * zl;
                let dst = (i * y + yp0 + j) * zl;
                c2[dst..dst + zl].copy_from_slice(&gwork[src..src + zl]);
            }
        }
        exchange(
            comm,
            &peers,
            me,
            TAG_BWD_COL,
            kind,
            parts,
            &mut self.sendbuf,
            &mut self.recvbuf,
            |t, buf| {
                let (tx0, txl) = partition(x, n, t);
                for i in 0..txl {
                    for j in 0..ylp {
                        let base = ((tx0 + i) * ylp + j) * zl;
                        buf.extend_from_slice(&gwork[base..base + zl]);
                    }
                }
            },
            |t| {
                let (_, tyl) = partition(y, n, t);
                xl * tyl * zl
            },
            |t, data| {
                let (ty0, tyl) = partition(y, n, t);
                let mut src = 0;
                for i in 0..xl {
                    for j in 0..tyl {
                        let base = (i * y + ty0 + j) * zl;
                        c2[base..base + zl].copy_from_slice(&data[src..src + zl]);
                        src += zl;
                    }
                }
            },
        )
    }

    /// Mirror of [`Self::row_exchange_forward`].
    fn row_exchange_backward(&mut self) -> Result<()> {
        let comm = self.comm;
        let n = self.grid.cols;
        let peers = self.grid.row_members(self.row);
        let me = self.col;
        let y = self.shape.y;
        let zp = self.shape.complex_depth();
        let (xl, yl, y0) = (self.df.xl, self.df.yl, self.df.y0);
        let (zl, z0) = (self.dg.zl, self.dg.z0);
        let parts = self.opts.divisor.max(1);
        let kind = self.opts.exchange;
        let c2 = &self.c2;
        let c1 = &mut self.c1;
        copy_rows(c2, zl, 0, zl, c1, zp, z0, zl, xl, yl, |i, j| (i * y + y0 + j, i * yl + j));
        exchange(
            comm,
            &peers,
            me,
            TAG_BWD_ROW,
            kind,
            parts,
            &mut self.sendbuf,
            &mut self.recvbuf,
            |t, buf| {
                let (ty0, tyl) = partition(y, n, t);
                for i in 0..xl {
                    for j in 0..tyl {
                        let base = (i * y + ty0 + j) * zl;
                        buf.extend_from_slice(&c2[base..base + zl]);
                    }
                }
            },
            |t| {
                let (_, tzl) = partition(zp, n, t);
                xl * yl * tzl
            },
            |t, data| {
                let (tz0, tzl) = partition(zp, n, t);
                let mut src = 0;
                for i in 0..xl {
                    for j in 0..yl {
                        let base = (i * yl + j) * zp + tz0;
                        c1[base..base + tzl].copy_from_slice(&data[src..src + tzl]);
                        src += tzl;
                    }
                }
            },
        )
    }
}

#[inline]
fn shift_scale(shift: bool, parity: usize) -> f64 {
    if shift && parity % 2 == 1 {
        -1.0
    } else {
        1.0
    }
}

/// Copies the rank's own share between two pencil layouts: `runs` elements
/// starting at the per-row offsets, for each (i, j) produced by `rows_of`.
#[allow(clippy::too_many_arguments)]
fn copy_rows(
    src: &[Complex64],
    src_depth: usize,
    src_off: usize,
    runs: usize,
    dst: &mut [Complex64],
    dst_depth: usize,
    dst_off: usize,
    dst_runs: usize,
    xl: usize,
    yl: usize,
    rows_of: impl Fn(usize, usize) -> (usize, usize),
) {
    debug_assert_eq!(runs, dst_runs);
    for i in 0..xl {
        for j in 0..yl {
            let (srow, drow) = rows_of(i, j);
            let s = srow * src_depth + src_off;
            let d = drow * dst_depth + dst_off;
            dst[d..d + runs].copy_from_slice(&src[s..s + runs]);
        }
    }
}

/// All-to-all style exchange inside one peer group. `pack` fills the
/// outgoing payload for a peer index, `recv_len` sizes the incoming one,
/// `unpack` places it. The caller's own share never touches the wire.
#[allow(clippy::too_many_arguments)]
fn exchange<C: Communicator>(
    comm: &C,
    peers: &[usize],
    me: usize,
    tag: Tag,
    kind: ExchangeKind,
    parts: usize,
    sendbuf: &mut Vec<Complex64>,
    recvbuf: &mut Vec<Complex64>,
    mut pack: impl FnMut(usize, &mut Vec<Complex64>),
    recv_len: impl Fn(usize) -> usize,
    mut unpack: impl FnMut(usize, &[Complex64]),
) -> Result<()> {
    let n = peers.len();
    match kind {
        ExchangeKind::Pairwise => {
            for step in 1..n {
                let to = (me + step) % n;
                let from = (me + n - step) % n;
                sendbuf.clear();
                pack(to, sendbuf);
                comm.send_slice_parts(peers[to], tag, sendbuf, parts)?;
                let len = recv_len(from);
                recvbuf.resize(len, Complex64::zero());
                comm.recv_slice_parts_into(peers[from], tag, &mut recvbuf[..len], parts)?;
                unpack(from, &recvbuf[..len]);
            }
        }
        ExchangeKind::PostAll => {
            for step in 1..n {
                let to = (me + step) % n;
                sendbuf.clear();
                pack(to, sendbuf);
                comm.send_slice_parts(peers[to], tag, sendbuf, parts)?;
            }
            for step in 1..n {
                let from = (me + n - step) % n;
                let len = recv_len(from);
                recvbuf.resize(len, Complex64::zero());
                comm.recv_slice_parts_into(peers[from], tag, &mut recvbuf[..len], parts)?;
                unpack(from, &recvbuf[..len]);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{LocalGroup, ThreadLevel};
    use crate::harness::init_field;
    use crate::rcfft3::Rcfft3;

    #[test]
    fn single_rank_engine_matches_reference() {
        let shape = GlobalShape::new(4, 4, 4).unwrap();
        let code = LocalGroup::run(1, ThreadLevel::Multiple, |comm| {
            let grid = ProcessGrid::with_dims(1, 1, 1, 0).unwrap();
            let fft = ScalarFft::default();
            let mut engine =
                DistRcfft3::new(&comm, &grid, shape, &fft, TuneOptions::default()).unwrap();
            let d = Split3::xy(&shape, &grid, 0).unwrap();
            let mut f = vec![0.0; d.len()];
            init_field(&mut f, &d);
            let mut g = vec![Complex64::zero(); engine.complex_split().len()];
            engine.forward(&f, &mut g).unwrap();

            let mut reference = Rcfft3::new(shape, &fft);
            let mut gref = vec![Complex64::zero(); shape.complex_len()];
            reference.forward(&f, &mut gref).unwrap();
            for (a, b) in g.iter().zip(gref.iter()) {
                assert!((a.re - b.re).abs() < 1e-9 && (a.im - b.im).abs() < 1e-9);
            }

            let mut back = vec![0.0; d.len()];
            engine.backward(&g, &mut back).unwrap();
            engine.normalize(&mut back);
            for (a, b) in back.iter().zip(f.iter()) {
                assert!((a - b).abs() < 1e-10);
            }
            0
        });
        assert_eq!(code, 0);
    }

    #[test]
    fn rejects_mismatched_buffers() {
        let shape = GlobalShape::new(4, 4, 4).unwrap();
        let code = LocalGroup::run(1, ThreadLevel::Multiple, |comm| {
            let grid = ProcessGrid::with_dims(1, 1, 1, 0).unwrap();
            let fft = ScalarFft::default();
            let mut engine =
                DistRcfft3::new(&comm, &grid, shape, &fft, TuneOptions::default()).unwrap();
            let f = vec![0.0; 3];
            let mut g = vec![Complex64::zero(); engine.complex_split().len()];
            match engine.forward(&f, &mut g) {
                Err(crate::error::Error::Fft(FftError::MismatchedLengths)) => 0,
                other => panic!("unexpected result: {other:?}"),
            }
        });
        assert_eq!(code, 0);
    }

    #[test]
    fn inactive_rank_cannot_build_an_engine() {
        let shape = GlobalShape::new(4, 4, 4).unwrap();
        let code = LocalGroup::run(2, ThreadLevel::Multiple, |comm| {
            let grid = ProcessGrid::with_dims(1, 1, 2, comm.rank()).unwrap();
            let fft = ScalarFft::default();
            let result = DistRcfft3::new(&comm, &grid, shape, &fft, TuneOptions::default());
            match (comm.rank(), result) {
                (0, Ok(_)) => 0,
                (1, Err(_)) => 0,
                (r, other) => panic!("rank {r}: unexpected {:?}", other.is_ok()),
            }
        });
        assert_eq!(code, 0);
    }
}
