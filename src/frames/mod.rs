//! Frame splitting and joining.
//!
//! Image decoding and encoding is CPU-bound and runs on the blocking pool;
//! everything that touches the workspace stays async.

pub mod codec;
pub mod join;
pub mod split;

pub use join::{join, JoinedImage};
pub use split::split;
