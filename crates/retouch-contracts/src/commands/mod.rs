mod parser;
mod registry;

pub use parser::{parse_command, SessionCommand};
pub use registry::EDIT_HELP_COMMANDS;
