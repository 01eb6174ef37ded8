//! Validation and timing harness.
//!
//! Test mode runs three checkpoints against the single-node reference
//! transform: the gathered initial field (validating the decomposition and
//! gather before any transform runs), the gathered forward output, and the
//! gathered result of the full forward/backward/normalize round trip. Each
//! failed region adds one to the returned value, which becomes the process
//! exit code; the run always completes so the report covers every stage.
//!
//! Timing mode repeats forward+backward+normalize on freshly initialized
//! data and reports summary statistics; it never validates.

use std::time::Instant;

use crate::comm::{Communicator, ThreadLevel};
use crate::dfft3::{DistRcfft3, TuneOptions};
use crate::error::Result;
use crate::fft::ScalarFft;
use crate::gather::{gather_xy, gather_yz};
use crate::num::Complex64;
use crate::rcfft3::Rcfft3;
use crate::split::{GlobalShape, ProcessGrid, Split3};
use crate::stats::{self, Statistic};
use crate::wisdom::{broadcast_wisdom, gather_wisdom};

/// Largest `X*Y` for which per-stage arrays are printed.
pub const OUTPUT_LIMIT: usize = 3000;

/// Default total transform budget the timing iteration count is derived
/// from.
pub const DEFAULT_BUDGET: usize = 10_000_000;

/// Fewest timing iterations ever run when the count is budget-derived.
pub const MIN_ITERATIONS: usize = 10;

/// Default comparison tolerance for double precision.
pub const DEFAULT_EPSILON: f64 = 1e-10;

#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub shape: GlobalShape,
    /// Explicit timing iteration count; `None` derives one from `budget`.
    pub iterations: Option<usize>,
    pub budget: usize,
    pub stat: Statistic,
    /// Out-of-tolerance threshold: an element fails when
    /// `|a - b| > epsilon * max(1, |b|)`.
    pub epsilon: f64,
    pub quiet: bool,
    pub test: bool,
    pub shift: bool,
    pub tune: TuneOptions,
}

impl Config {
    pub fn new(shape: GlobalShape) -> Self {
        Self {
            shape,
            iterations: None,
            budget: DEFAULT_BUDGET,
            stat: Statistic::default(),
            epsilon: DEFAULT_EPSILON,
            quiet: false,
            test: false,
            shift: false,
            tune: TuneOptions::default(),
        }
    }
}

/// Budget-derived timing iteration count, never below [`MIN_ITERATIONS`].
pub fn derive_iterations(budget: usize, shape: &GlobalShape) -> usize {
    (budget / shape.real_len()).max(MIN_ITERATIONS)
}

/// Local transform threads for one rank. A zero request means hardware
/// concurrency; a group of more than one rank on a messaging layer below
/// `Funneled` is forced down to a single thread.
pub fn effective_threads(requested: usize, active: usize, level: ThreadLevel) -> usize {
    let threads = if requested == 0 {
        num_cpus::get()
    } else {
        requested
    };
    if active > 1 && level < ThreadLevel::Funneled {
        1
    } else {
        threads.max(1)
    }
}

/// Deterministic synthetic input: `f[x, y, z] = x + y + z` in global
/// coordinates. Cheap, reproducible, and asymmetric enough that any layout
/// mistake shows up in the comparisons.
pub fn init_field(buf: &mut [f64], d: &Split3) {
    debug_assert_eq!(buf.len(), d.len());
    let mut c = 0;
    for i in 0..d.xl {
        let gx = d.x0 + i;
        for j in 0..d.yl {
            let gy = d.y0 + j;
            for k in 0..d.zl {
                buf[c] = (gx + gy + d.z0 + k) as f64;
                c += 1;
            }
        }
    }
}

/// Outcome of one element-wise comparison region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionCheck {
    /// Elements beyond tolerance.
    pub bad: usize,
    /// Largest absolute deviation seen.
    pub max_dev: f64,
}

impl RegionCheck {
    pub fn passed(&self) -> bool {
        self.bad == 0
    }
}

pub fn check_real(expected: &[f64], got: &[f64], eps: f64) -> RegionCheck {
    let mut bad = expected.len().abs_diff(got.len());
    let mut max_dev = 0.0f64;
    for (e, g) in expected.iter().zip(got.iter()) {
        let dev = (e - g).abs();
        if dev > eps * e.abs().max(1.0) {
            bad += 1;
        }
        max_dev = max_dev.max(dev);
    }
    RegionCheck { bad, max_dev }
}

pub fn check_complex(expected: &[Complex64], got: &[Complex64], eps: f64) -> RegionCheck {
    let mut bad = expected.len().abs_diff(got.len());
    let mut max_dev = 0.0f64;
    for (e, g) in expected.iter().zip(got.iter()) {
        let dev = (e.re - g.re).abs().max((e.im - g.im).abs());
        let tol = eps * e.re.abs().max(e.im.abs()).max(1.0);
        if dev > tol {
            bad += 1;
        }
        max_dev = max_dev.max(dev);
    }
    RegionCheck { bad, max_dev }
}

fn report_region(quiet: bool, label: &str, check: &RegionCheck) -> i32 {
    if check.passed() {
        if !quiet {
            println!("{label}: ok (max deviation {:.3e})", check.max_dev);
        }
        0
    } else {
        if !quiet {
            println!(
                "{label}: {} elements out of tolerance (max deviation {:.3e})",
                check.bad, check.max_dev
            );
        }
        1
    }
}

/// Rank-ordered print of each rank's local block.
fn show_block<T, C>(comm: &C, grid: &ProcessGrid, d: &Split3, buf: &[T]) -> Result<()>
where
    T: std::fmt::Display,
    C: Communicator,
{
    let ranks = grid.active_ranks();
    for &r in &ranks {
        comm.barrier(&ranks)?;
        if comm.rank() == r {
            println!(
                "rank {r}: {}x{}x{} at ({}, {}, {})",
                d.xl, d.yl, d.zl, d.x0, d.y0, d.z0
            );
            print_rows(buf, d.xl, d.yl, d.zl);
        }
    }
    comm.barrier(&ranks)?;
    Ok(())
}

fn print_full<T: std::fmt::Display>(label: &str, buf: &[T], d: &Split3) {
    println!("{label}:");
    print_rows(buf, d.xl, d.yl, d.zl);
}

fn print_rows<T: std::fmt::Display>(buf: &[T], xl: usize, yl: usize, zl: usize) {
    let mut c = 0;
    for _ in 0..xl {
        for _ in 0..yl {
            let row: Vec<String> = buf[c..c + zl].iter().map(|v| v.to_string()).collect();
            println!("  {}", row.join(" "));
            c += zl;
        }
        println!();
    }
}

/// Runs the harness on one rank. Returns the accumulated number of failed
/// comparison regions (always 0 in timing mode); inactive ranks return
/// immediately.
pub fn run<C: Communicator>(comm: &C, cfg: &Config) -> Result<i32> {
    let start = Instant::now();
    let grid = ProcessGrid::new(comm.size(), comm.rank(), &cfg.shape);
    if !grid.is_active() {
        log::debug!("rank {} is not part of the {}x{} grid", comm.rank(), grid.rows, grid.cols);
        return Ok(0);
    }
    let rank = comm.rank();
    let main = rank == 0;
    let shape = cfg.shape;
    let mut tune = cfg.tune;
    tune.threads = effective_threads(cfg.tune.threads, grid.active_count(), comm.thread_level());
    if main && !cfg.quiet {
        println!(
            "Configuration: {} nodes x {} threads/node",
            grid.active_count(),
            tune.threads
        );
        println!(
            "nx={}, ny={}, nz={}, nzp={}",
            shape.x,
            shape.y,
            shape.z,
            shape.complex_depth()
        );
        println!("grid: {} x {}", grid.rows, grid.cols);
    }
    let df = Split3::xy(&shape, &grid, rank)?;
    let dg = Split3::yz(&shape, &grid, rank)?;
    let fft = ScalarFft::default();
    let active = grid.active_ranks();
    broadcast_wisdom(comm, &fft, &active)?;
    let mut engine = DistRcfft3::new(comm, &grid, shape, &fft, tune)?;
    let mut f = vec![0.0f64; df.len()];
    let mut g = vec![Complex64::zero(); dg.len()];
    if main && !cfg.quiet {
        println!("Initialized after {:.3} seconds.", start.elapsed().as_secs_f64());
    }
    let verbose = !cfg.quiet && shape.x * shape.y < OUTPUT_LIMIT;
    let retval = if cfg.test {
        run_test(comm, cfg, &grid, &df, &dg, &fft, &mut engine, &mut f, &mut g, verbose)?
    } else {
        run_timing(comm, cfg, &grid, &df, &mut engine, &mut f, &mut g, verbose)?
    };
    gather_wisdom(comm, &fft, &active)?;
    Ok(retval)
}

#[allow(clippy::too_many_arguments)]
fn run_test<C: Communicator>(
    comm: &C,
    cfg: &Config,
    grid: &ProcessGrid,
    df: &Split3,
    dg: &Split3,
    fft: &ScalarFft<f64>,
    engine: &mut DistRcfft3<'_, C>,
    f: &mut [f64],
    g: &mut [Complex64],
    verbose: bool,
) -> Result<i32> {
    let shape = cfg.shape;
    let main = comm.rank() == 0;
    let mut retval = 0;
    init_field(f, df);
    if verbose {
        if main {
            println!("\ninput:");
        }
        show_block(comm, grid, df, f)?;
    }
    // The reference transform and its full arrays live on the collector
    // only.
    let mut reference = if main { Some(Rcfft3::new(shape, fft)) } else { None };
    let mut flocal = vec![0.0f64; if main { shape.real_len() } else { 0 }];
    let mut glocal = vec![Complex64::zero(); if main { shape.complex_len() } else { 0 }];
    if main {
        init_field(&mut flocal, &Split3::full_real(&shape));
    }

    // Checkpoint 1: the decomposition and gather, before any transform.
    if let Some(fg) = gather_xy(comm, grid, &shape, f)? {
        if verbose {
            print_full("gathered input", &fg, &Split3::full_real(&shape));
            print_full("local input", &flocal, &Split3::full_real(&shape));
        }
        retval += report_region(cfg.quiet, "input", &check_real(&flocal, &fg, cfg.epsilon));
    }

    if cfg.shift {
        engine.forward0(f, g)?;
    } else {
        engine.forward(f, g)?;
    }
    if let Some(rc) = reference.as_mut() {
        if cfg.shift {
            rc.forward0(&flocal, &mut glocal)?;
        } else {
            rc.forward(&flocal, &mut glocal)?;
        }
    }
    if verbose {
        if main {
            println!("distributed output:");
        }
        show_block(comm, grid, dg, g)?;
    }

    // Checkpoint 2: the forward transform.
    if let Some(gg) = gather_yz(comm, grid, &shape, g)? {
        if verbose {
            print_full("gathered output", &gg, &Split3::full_complex(&shape));
            print_full("local output", &glocal, &Split3::full_complex(&shape));
        }
        retval += report_region(
            cfg.quiet,
            "forward output",
            &check_complex(&glocal, &gg, cfg.epsilon),
        );
    }

    if cfg.shift {
        engine.backward0(g, f)?;
    } else {
        engine.backward(g, f)?;
    }
    engine.normalize(f);
    if let Some(rc) = reference.as_mut() {
        if cfg.shift {
            rc.backward0(&glocal, &mut flocal)?;
        } else {
            rc.backward(&glocal, &mut flocal)?;
        }
        rc.normalize(&mut flocal);
    }
    if verbose {
        if main {
            println!("distributed back to input:");
        }
        show_block(comm, grid, df, f)?;
    }

    // Checkpoint 3: the full round trip.
    if let Some(fg) = gather_xy(comm, grid, &shape, f)? {
        if verbose {
            print_full("gathered back to input", &fg, &Split3::full_real(&shape));
            print_full("local back to input", &flocal, &Split3::full_real(&shape));
        }
        retval += report_region(
            cfg.quiet,
            "round trip",
            &check_real(&flocal, &fg, cfg.epsilon),
        );
    }

    if main {
        if !cfg.quiet {
            println!();
        }
        println!("{}", if retval == 0 { "pass" } else { "FAIL" });
    }
    Ok(retval)
}

#[allow(clippy::too_many_arguments)]
fn run_timing<C: Communicator>(
    comm: &C,
    cfg: &Config,
    grid: &ProcessGrid,
    df: &Split3,
    engine: &mut DistRcfft3<'_, C>,
    f: &mut [f64],
    g: &mut [Complex64],
    verbose: bool,
) -> Result<i32> {
    let n = cfg
        .iterations
        .unwrap_or_else(|| derive_iterations(cfg.budget, &cfg.shape))
        .max(1);
    let main = comm.rank() == 0;
    if main && !cfg.quiet {
        println!("N={n}");
    }
    let active = grid.active_ranks();
    let mut samples = vec![0.0f64; n];
    for slot in samples.iter_mut() {
        init_field(f, df);
        comm.barrier(&active)?;
        let t0 = Instant::now();
        engine.forward(f, g)?;
        engine.backward(g, f)?;
        engine.normalize(f);
        *slot = t0.elapsed().as_secs_f64();
    }
    if verbose {
        show_block(comm, grid, df, f)?;
    }
    if main && !cfg.quiet {
        println!("{}", stats::report("FFT timing", cfg.shape.x, &samples, cfg.stat));
    }
    Ok(0)
}
