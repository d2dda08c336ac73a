#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CommandKind {
    Help,
    Quit,
    ListPresets,
    Status,
    Revert,
    Reset,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub kind: CommandKind,
}

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "help",
        kind: CommandKind::Help,
    },
    CommandSpec {
        command: "quit",
        kind: CommandKind::Quit,
    },
    CommandSpec {
        command: "exit",
        kind: CommandKind::Quit,
    },
    CommandSpec {
        command: "presets",
        kind: CommandKind::ListPresets,
    },
    CommandSpec {
        command: "status",
        kind: CommandKind::Status,
    },
    CommandSpec {
        command: "revert",
        kind: CommandKind::Revert,
    },
    CommandSpec {
        command: "original",
        kind: CommandKind::Revert,
    },
    CommandSpec {
        command: "reset",
        kind: CommandKind::Reset,
    },
];

pub(crate) const LOAD_COMMANDS: &[&str] = &["load", "open"];
pub(crate) const SAVE_COMMANDS: &[&str] = &["save", "download"];
pub(crate) const PRESET_COMMAND: &str = "preset";

pub const EDIT_HELP_COMMANDS: &[&str] = &[
    "/load <path>",
    "/preset <id>",
    "/<preset-id>",
    "/presets",
    "/revert",
    "/reset",
    "/status",
    "/save <path>",
    "/help",
    "/quit",
];
