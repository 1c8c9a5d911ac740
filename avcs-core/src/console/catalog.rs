//! Operator command table shared by the parser and the help listing.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandTag {
    Rpm,
    Oil,
    Target,
    Phase,
    Run,
    Drop,
    Glitch,
    Status,
    Faults,
    Set,
    Help,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub tag: CommandTag,
    pub usage: &'static str,
    pub summary: &'static str,
}

const COMMANDS: [CommandSpec; 11] = [
    CommandSpec {
        name: "rpm",
        tag: CommandTag::Rpm,
        usage: "rpm <0-12000>",
        summary: "set simulated engine speed",
    },
    CommandSpec {
        name: "oil",
        tag: CommandTag::Oil,
        usage: "oil <deg C>",
        summary: "set oil temperature",
    },
    CommandSpec {
        name: "target",
        tag: CommandTag::Target,
        usage: "target <left|right|both> <deg> | target auto",
        summary: "hold a phase target or follow the rpm curve",
    },
    CommandSpec {
        name: "phase",
        tag: CommandTag::Phase,
        usage: "phase <left|right> <deg>",
        summary: "offset a cam's mechanical timing",
    },
    CommandSpec {
        name: "run",
        tag: CommandTag::Run,
        usage: "run <N>ms | run <N>s",
        summary: "advance the simulation",
    },
    CommandSpec {
        name: "drop",
        tag: CommandTag::Drop,
        usage: "drop <crank|left|right> <N>ms",
        summary: "silence a sensor",
    },
    CommandSpec {
        name: "glitch",
        tag: CommandTag::Glitch,
        usage: "glitch <crank|left|right>",
        summary: "inject a bounced edge",
    },
    CommandSpec {
        name: "status",
        tag: CommandTag::Status,
        usage: "status",
        summary: "show mode, speeds and phase",
    },
    CommandSpec {
        name: "faults",
        tag: CommandTag::Faults,
        usage: "faults",
        summary: "list recorded faults",
    },
    CommandSpec {
        name: "set",
        tag: CommandTag::Set,
        usage: "set <baseline|feedback|filter> <value>",
        summary: "change controller policy",
    },
    CommandSpec {
        name: "help",
        tag: CommandTag::Help,
        usage: "help [command]",
        summary: "list commands",
    },
];

/// Returns the full command catalog.
#[must_use]
pub const fn commands() -> &'static [CommandSpec] {
    &COMMANDS
}

/// Finds a command by name (case insensitive).
#[must_use]
pub fn find(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|command| command.name.eq_ignore_ascii_case(name))
}
