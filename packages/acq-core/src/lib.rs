pub mod clock;
pub mod config;
pub mod error;
pub mod signal_processing;
pub mod stream;
pub mod trigger;

pub use config::{LinearAdc, ProbeConfig, ProbeLayout, StreamConfig, SyncParams, ThresholdConverter};
pub use error::{AcqError, Result};
pub use stream::{EdgeScan, Placement, StreamBuffer};
pub use trigger::{TriggerController, TriggerPolicy};
