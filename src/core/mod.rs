//! Shared primitives: error taxonomy and timestamp sources.

pub mod clock;
pub mod error;

pub use clock::{Clock, QuantaClock, StepClock, SystemClock};
pub use error::{DecodeFault, Error, Result};
