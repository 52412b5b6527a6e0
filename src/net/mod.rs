//! Networking bindings for `rill`.

mod stream;
pub use stream::{ReadAll, Stream, WriteAll};
