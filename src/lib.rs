//! # pencilfft - distributed 3D real-to-complex FFT harness
//!
//! Correctness and timing harness for a real-to-complex 3D FFT distributed
//! over a 2D grid of cooperating ranks, plus a utility for consolidating
//! planner wisdom across the group.
//!
//! The crate is built around a small set of pieces:
//!
//! - [`split`]: deterministic domain decomposition - which rank owns which
//!   sub-block of the global array, before and after the transform.
//! - [`comm`]: the message-passing seam ([`Communicator`]) and an
//!   in-memory process group ([`LocalGroup`]) that runs each rank on its
//!   own thread, so the whole protocol is testable in a single process.
//! - [`dfft3`]: the pencil-decomposed distributed transform engine.
//! - [`rcfft3`]: the single-node reference transform used as ground truth.
//! - [`gather`]: collection of distributed blocks into a full array on
//!   rank 0, addressed purely by block geometry.
//! - [`harness`]: the test/timing driver - element-wise validation with an
//!   accumulated failure count, or repeated round-trip timing.
//! - [`wisdom`]: logarithmic-depth gather and broadcast of planner wisdom.
//!
//! ## Example
//!
//! Validate a 4x4x4 transform across four virtual ranks:
//!
//! ```
//! use pencilfft::{harness, Config, GlobalShape, LocalGroup, ThreadLevel};
//!
//! let shape = GlobalShape::new(4, 4, 4).unwrap();
//! let mut cfg = Config::new(shape);
//! cfg.test = true;
//! cfg.quiet = true;
//! let code = LocalGroup::run(4, ThreadLevel::Multiple, move |comm| {
//!     harness::run(&comm, &cfg).unwrap_or(1)
//! });
//! assert_eq!(code, 0);
//! ```

pub mod comm;
pub mod dfft3;
pub mod error;
pub mod fft;
pub mod gather;
pub mod harness;
pub mod num;
pub mod rcfft3;
pub mod split;
pub mod stats;
pub mod wisdom;

pub use comm::{Communicator, LocalGroup, ThreadLevel};
pub use dfft3::{DistRcfft3, ExchangeKind, TuneOptions};
pub use error::{Error, Result};
pub use fft::{FftPlanner, ScalarFft};
pub use harness::Config;
pub use num::{Complex, Complex32, Complex64, Float};
pub use rcfft3::Rcfft3;
pub use split::{GlobalShape, ProcessGrid, Split3};
pub use stats::Statistic;
