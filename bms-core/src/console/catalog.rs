//! Command table shared by the parser and the help output.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandTag {
    Request,
    Tick,
    Status,
    Stall,
    Ready,
    Help,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub tag: CommandTag,
    pub usage: &'static str,
    pub summary: &'static str,
}

pub const COMMANDS: [CommandSpec; 6] = [
    CommandSpec {
        name: "request",
        tag: CommandTag::Request,
        usage: "request <init|error|N>",
        summary: "submit a state request to the sequencer",
    },
    CommandSpec {
        name: "tick",
        tag: CommandTag::Tick,
        usage: "tick [N|<duration>]",
        summary: "advance the sequencer by up to 100000 ticks, or by a duration such as 50ms",
    },
    CommandSpec {
        name: "status",
        tag: CommandTag::Status,
        usage: "status",
        summary: "show phase, counters and pending request",
    },
    CommandSpec {
        name: "stall",
        tag: CommandTag::Stall,
        usage: "stall <subsystem>",
        summary: "make a subsystem never report ready",
    },
    CommandSpec {
        name: "ready",
        tag: CommandTag::Ready,
        usage: "ready <subsystem> [after=N]",
        summary: "make a subsystem ready after N not-ready polls",
    },
    CommandSpec {
        name: "help",
        tag: CommandTag::Help,
        usage: "help [topic]",
        summary: "list commands or describe one",
    },
];

/// Case-insensitive lookup by command keyword.
pub fn find(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|spec| spec.name.eq_ignore_ascii_case(name))
}
