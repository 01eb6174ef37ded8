use clap::Parser;

use pencilfft::dfft3::{ExchangeKind, TuneOptions};
use pencilfft::harness::{self, Config, DEFAULT_BUDGET, DEFAULT_EPSILON};
use pencilfft::split::GlobalShape;
use pencilfft::stats::Statistic;
use pencilfft::{Communicator, LocalGroup, ThreadLevel};

/// Distributed 3D real-to-complex FFT correctness and timing harness.
#[derive(Parser)]
#[command(name = "pencilfft", version, about)]
struct Args {
    /// Transform size along x
    #[arg(short = 'x', default_value_t = 4)]
    nx: usize,

    /// Transform size along y (0 = same as x)
    #[arg(short = 'y', default_value_t = 0)]
    ny: usize,

    /// Transform size along z (0 = same as x)
    #[arg(short = 'z', default_value_t = 0)]
    nz: usize,

    /// Set all three transform sizes at once
    #[arg(short = 'm')]
    size: Option<usize>,

    /// Timing iterations (overrides the budget-derived count)
    #[arg(short = 'N')]
    iterations: Option<usize>,

    /// Total transform budget the iteration count is derived from
    #[arg(short = 'n', default_value_t = DEFAULT_BUDGET)]
    budget: usize,

    /// Local transform threads per rank (0 = hardware concurrency)
    #[arg(short = 'T', default_value_t = 0)]
    threads: usize,

    /// Timing statistic: 0 mean, 1 min, 2 max, 3 median
    #[arg(short = 'S', default_value_t = 0)]
    stat: u32,

    /// Split every exchange payload into this many messages (0 = one)
    #[arg(short = 'a', default_value_t = 0)]
    divisor: usize,

    /// Exchange routine: 0 pairwise rotation, 1 post-all
    #[arg(short = 's', default_value_t = 0)]
    exchange: u32,

    /// Frequency-shift the transform variants (0 = off)
    #[arg(short = 'O', default_value_t = 0)]
    shift: u32,

    /// Run the correctness test instead of the timing loop
    #[arg(short = 't')]
    test: bool,

    /// Only print the final verdict
    #[arg(short = 'q')]
    quiet: bool,

    /// Cooperating ranks in the local group
    #[arg(short = 'p', long = "procs", default_value_t = 1)]
    procs: usize,

    /// Comparison tolerance for test mode
    #[arg(short = 'e', default_value_t = DEFAULT_EPSILON)]
    epsilon: f64,
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    let nx = args.size.unwrap_or(args.nx);
    let ny = args.size.unwrap_or(if args.ny == 0 { nx } else { args.ny });
    let nz = args.size.unwrap_or(if args.nz == 0 { nx } else { args.nz });
    let shape = match GlobalShape::new(nx, ny, nz) {
        Ok(shape) => shape,
        Err(e) => {
            eprintln!("invalid problem size {nx}x{ny}x{nz}: {e}");
            std::process::exit(1);
        }
    };
    let mut cfg = Config::new(shape);
    cfg.iterations = args.iterations;
    cfg.budget = args.budget;
    cfg.stat = Statistic::from_code(args.stat);
    cfg.epsilon = args.epsilon;
    cfg.quiet = args.quiet;
    cfg.test = args.test;
    cfg.shift = args.shift != 0;
    cfg.tune = TuneOptions {
        divisor: args.divisor,
        exchange: ExchangeKind::from_code(args.exchange),
        threads: args.threads,
    };
    let code = LocalGroup::run(args.procs.max(1), ThreadLevel::Multiple, move |comm| {
        match harness::run(&comm, &cfg) {
            Ok(failures) => failures,
            Err(e) => {
                log::error!("rank {} aborted: {e}", comm.rank());
                1
            }
        }
    });
    std::process::exit(code);
}
