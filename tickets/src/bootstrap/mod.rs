//! Application initialisation.
//!
//! - **`resources`**: storage and outbound clients, and wiring them into services
//! - **`builder`**: step-by-step construction of a runnable [`Application`](crate::runtime::Application)

pub mod builder;
pub mod resources;

pub use builder::ApplicationBuilder;
pub use resources::{Resources, Services, assemble};
