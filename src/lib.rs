//! Minimal single-threaded cooperative runtime.
//!
//! `rill` multiplexes tasks over byte-oriented streams and wall-clock
//! timers from one thread, with structured parent/child relationships and
//! best-effort cancellation. Tasks suspend only at `delay`, `write_all`,
//! `read_all`, and `join`; readiness on every watched stream and the
//! earliest timer deadline are collected into a single blocking `poll(2)`
//! wait per scheduler tick.
//!
//! ```no_run
//! use rill::{http, time, Runtime};
//!
//! fn main() -> Result<(), rill::Error> {
//!     let rt = Runtime::new();
//!
//!     let body = rt.block_on(async {
//!         time::delay(0.0).await?;
//!         let response = http::fetch("http://example.com/", &Default::default()).await?;
//!         Ok(response.text().into_owned())
//!     })?;
//!
//!     println!("{body}");
//!     Ok(())
//! }
//! ```

#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub
)]
#![deny(unused_must_use)]

#[cfg(not(unix))]
compile_error!("The readiness layer requires a Unix system with poll(2) support.");

pub mod combine;
pub mod http;
pub mod net;
pub mod rt;
pub mod time;

mod error;

pub use error::Error;
pub use rt::{run, spawn, Runtime, Task};
