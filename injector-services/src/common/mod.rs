//! Cancellation and timeout primitives shared across the request pipeline.
pub mod cancel;
mod timeout;

pub use cancel::{CancelToken, Cancelled};
pub use timeout::{with_timeout, TimeoutError};
