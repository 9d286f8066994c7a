//! Frame buffering and reduction.
pub mod buffer;
pub mod reduction;

pub use buffer::{BufferStore, SharedBuffer};
pub use reduction::{BufferHandler, HandlerRegistry, ReduceFn, DEFAULT_HANDLER};
