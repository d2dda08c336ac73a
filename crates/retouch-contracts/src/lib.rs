pub mod codec;
pub mod commands;
pub mod errors;
pub mod events;
pub mod presets;
pub mod progress;
pub mod session;
