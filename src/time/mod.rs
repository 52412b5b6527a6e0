//! Timer utilities for `rill`.

mod delay;
pub use delay::{delay, sleep, Delay};
