//! Runtime: running the server and its background tasks until shutdown.

pub mod lifecycle;

pub use lifecycle::Application;
