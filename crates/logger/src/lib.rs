//! Process-wide tracing setup shared by the linkwatch binaries.

mod subscriber;

pub use subscriber::{LogFormat, init_tracing, try_init_tracing};
