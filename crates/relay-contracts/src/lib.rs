pub mod envelope;
pub mod error;
pub mod events;
pub mod request;
pub mod workflow;

pub use error::{RelayError, RelayResult};
