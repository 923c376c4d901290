// Tactus meter-fitting engine.
//
// Given a set of candidate meters and an offset counter (rational offset
// → observed attack count), the engine selects the sequence of meters
// that best describes the rhythm, walking the passage left to right with
// one-step lookahead. Pure computation: exact rational arithmetic, no
// I/O, deterministic for identical inputs.
//
// Architecture:
// - meter.rs: Meter value type (time signature + beat grouping) and
//   kernel generation (resampling the accent hierarchy onto a grid)
// - kernel.rs: OffsetKernel accent table with sparse inner-product
//   scoring against offset windows
// - session.rs: FittingSession (kernel table, memoized window cache,
//   greedy selection loop), FitConfig, the fit_meters driver, and the
//   fit_passages parallel batch helper
// - error.rs: FitError taxonomy
//
// The rational time types (Offset, Weight, OffsetCounter) come from
// tactus_duration and are re-exported here for convenience.

pub mod error;
pub mod kernel;
pub mod meter;
pub mod session;

pub use error::FitError;
pub use kernel::OffsetKernel;
pub use meter::{Meter, ParseMeterError};
pub use session::{
    FitConfig, FittingSession, MAX_KERNEL_DENOMINATOR, fit_meters, fit_passages,
};
pub use tactus_duration::{Offset, OffsetCounter, Weight};
