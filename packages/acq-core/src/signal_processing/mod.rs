//! Signal Processing Module
//!
//! Recursive filtering and reductions over interleaved `i16` blocks:
//! - `BiquadFilter` with four state retention modes
//! - `LiveFilter` for the display path, swappable while acquiring
//! - `BiquadChunkFilter` adapting a biquad to the filtered stream walker
//! - `Tally` spike rates and peak-to-peak maps

mod biquad;
mod chunk;
mod display;
mod live;
mod tally;

pub use biquad::{BandpassChain, BiquadCoeffs, BiquadFilter, BiquadType};
pub use chunk::BiquadChunkFilter;
pub use display::{dc_average, downsample_extremum};
pub use live::{LiveFilter, BIQUAD_TRANS_WIDE};
pub use tally::{Tally, TALLY_CHUNK_SECS};
