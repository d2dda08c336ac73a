use crate::presets::PresetCatalog;

use super::registry::{
    CommandKind, CommandSpec, LOAD_COMMANDS, NO_ARG_COMMANDS, PRESET_COMMAND, SAVE_COMMANDS,
};

/// One line of user input, mapped onto the session's event vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Noop,
    Help,
    Quit,
    ListPresets,
    Status,
    Load { path: String },
    Save { path: String },
    Preset { id: String },
    Instruction { text: String },
    Revert,
    Reset,
    Unknown { command: String, arg: String },
}

fn find_kind(command: &str, specs: &[CommandSpec]) -> Option<CommandKind> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.kind)
}

fn parse_path_arg(arg: &str) -> String {
    if arg.trim().is_empty() {
        return String::new();
    }
    let parts: Vec<String> = match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    };
    parts.join(" ")
}

/// Parses a line of interactive input. Anything that is not a slash command
/// is a free-text instruction.
pub fn parse_command(text: &str, catalog: &PresetCatalog) -> SessionCommand {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return SessionCommand::Noop;
    }

    let Some(slash_tail) = raw_trimmed.strip_prefix('/') else {
        return SessionCommand::Instruction {
            text: raw_trimmed.to_string(),
        };
    };
    let command_len = slash_tail
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_' || *ch == '-')
        .count();
    if command_len == 0 {
        return SessionCommand::Instruction {
            text: raw_trimmed.to_string(),
        };
    }

    let command = slash_tail[..command_len].to_ascii_lowercase();
    let arg = slash_tail[command_len..].trim();

    if let Some(kind) = find_kind(&command, NO_ARG_COMMANDS) {
        return match kind {
            CommandKind::Help => SessionCommand::Help,
            CommandKind::Quit => SessionCommand::Quit,
            CommandKind::ListPresets => SessionCommand::ListPresets,
            CommandKind::Status => SessionCommand::Status,
            CommandKind::Revert => SessionCommand::Revert,
            CommandKind::Reset => SessionCommand::Reset,
        };
    }

    if LOAD_COMMANDS.contains(&command.as_str()) {
        return SessionCommand::Load {
            path: parse_path_arg(arg),
        };
    }

    if SAVE_COMMANDS.contains(&command.as_str()) {
        return SessionCommand::Save {
            path: parse_path_arg(arg),
        };
    }

    if command == PRESET_COMMAND {
        return SessionCommand::Preset {
            id: arg.to_string(),
        };
    }

    if let Some(preset) = catalog.get(&command) {
        return SessionCommand::Preset {
            id: preset.id.to_string(),
        };
    }

    SessionCommand::Unknown {
        command,
        arg: arg.to_string(),
    }
}
