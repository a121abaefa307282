//! Console command dispatcher.
//!
//! Turns parsed console commands into sequencer requests, ticks and script
//! changes. It stays `no_std` so the emulator and tests share it.

use core::fmt;

use crate::diagnostics::Diagnostics;
use crate::sequencer::{
    MainState, PhaseSnapshot, RequestError, RequestKind, Sequencer, TickOutcome,
};
use crate::subsystems::scripted::Readiness;
use crate::subsystems::{RetainedFlags, ScriptControl, SubsystemId, Subsystems};

use super::catalog::{self, COMMANDS, CommandSpec};
use super::grammar::{self, Command, MAX_TICKS_PER_COMMAND, ParseError, TickSpan};

/// Command execution successes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    Accepted(RequestKind),
    Ticked(TickReport),
    Status(StatusReport),
    Scripted(SubsystemId, Readiness),
    Help(Option<&'static CommandSpec>),
}

/// Summary of a `tick` command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickReport {
    pub ticks: u32,
    pub transitions: u32,
    pub snapshot: PhaseSnapshot,
}

/// Everything `status` shows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusReport {
    pub snapshot: PhaseSnapshot,
    pub countdown: u16,
    pub retry_counter: u16,
    pub retry_budget: u16,
    pub illegal_requests: u32,
    pub pending: Option<RequestKind>,
}

/// Errors surfaced while executing a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandError<'a> {
    Parse(ParseError<'a>),
    Rejected(RequestError),
    UnknownTopic(&'a str),
    /// A duration spans more ticks than one command may run.
    TickLimit { requested: u64 },
}

impl<'a> From<ParseError<'a>> for CommandError<'a> {
    fn from(error: ParseError<'a>) -> Self {
        Self::Parse(error)
    }
}

impl fmt::Display for CommandError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Parse(err) => err.fmt(f),
            CommandError::Rejected(err) => write!(f, "request rejected: {err}"),
            CommandError::UnknownTopic(topic) => write!(f, "no help for `{topic}`"),
            CommandError::TickLimit { requested } => write!(
                f,
                "{requested} ticks exceed the limit of {MAX_TICKS_PER_COMMAND} per command"
            ),
        }
    }
}

/// Dispatches console commands against a sequencer.
pub struct CommandExecutor<'a, S, D, R> {
    sequencer: Sequencer<'a, S, D, R>,
}

impl<'a, S, D, R> CommandExecutor<'a, S, D, R>
where
    S: Subsystems + ScriptControl,
    D: Diagnostics,
    R: RetainedFlags,
{
    pub const fn new(sequencer: Sequencer<'a, S, D, R>) -> Self {
        Self { sequencer }
    }

    pub fn sequencer(&self) -> &Sequencer<'a, S, D, R> {
        &self.sequencer
    }

    pub fn sequencer_mut(&mut self) -> &mut Sequencer<'a, S, D, R> {
        &mut self.sequencer
    }

    pub fn into_inner(self) -> Sequencer<'a, S, D, R> {
        self.sequencer
    }

    /// Parses and executes one console line.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the line does not parse, the sequencer
    /// rejects a request, or a help topic is unknown.
    pub fn execute<'l>(&mut self, line: &'l str) -> Result<CommandOutcome, CommandError<'l>> {
        let command = grammar::parse(line)?;
        self.dispatch(command)
    }

    fn dispatch<'l>(&mut self, command: Command<'l>) -> Result<CommandOutcome, CommandError<'l>> {
        match command {
            Command::Request(kind) => self
                .sequencer
                .shared()
                .request(kind)
                .map(|()| CommandOutcome::Accepted(kind))
                .map_err(CommandError::Rejected),
            Command::Tick(span) => {
                let ticks = self.ticks_for(span)?;
                Ok(CommandOutcome::Ticked(self.run_ticks(ticks)))
            }
            Command::Status => Ok(CommandOutcome::Status(self.status())),
            Command::Stall(subsystem) => Ok(self.script(subsystem, Readiness::Never)),
            Command::Ready { subsystem, after } => {
                Ok(self.script(subsystem, Readiness::After(after)))
            }
            Command::Help { topic: None } => Ok(CommandOutcome::Help(None)),
            Command::Help { topic: Some(topic) } => catalog::find(topic)
                .map(|spec| CommandOutcome::Help(Some(spec)))
                .ok_or(CommandError::UnknownTopic(topic)),
        }
    }

    fn run_ticks(&mut self, ticks: u32) -> TickReport {
        let mut transitions = 0;
        for _ in 0..ticks {
            if let TickOutcome::Transitioned(_) = self.sequencer.tick() {
                transitions += 1;
            }
        }

        TickReport {
            ticks,
            transitions,
            snapshot: self.sequencer.shared().snapshot(),
        }
    }

    /// Converts a span into whole ticks, rounding durations up.
    fn ticks_for<'l>(&self, span: TickSpan) -> Result<u32, CommandError<'l>> {
        let ticks = match span {
            TickSpan::Ticks(ticks) => u128::from(ticks),
            TickSpan::Duration(duration) => {
                let period = u128::from(self.sequencer.plan().config().tick_period_ms);
                duration.as_millis().div_ceil(period)
            }
        };
        match u32::try_from(ticks) {
            Ok(ticks) if ticks <= MAX_TICKS_PER_COMMAND => Ok(ticks),
            _ => Err(CommandError::TickLimit {
                requested: u64::try_from(ticks).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Captures the current sequencer status.
    pub fn status(&self) -> StatusReport {
        let shared = self.sequencer.shared();
        StatusReport {
            snapshot: shared.snapshot(),
            countdown: self.sequencer.countdown(),
            retry_counter: self.sequencer.retry_counter(),
            retry_budget: self.sequencer.plan().retry_budget(),
            illegal_requests: self.sequencer.illegal_request_count(),
            pending: shared.pending_request(),
        }
    }

    fn script(&mut self, subsystem: SubsystemId, readiness: Readiness) -> CommandOutcome {
        self.sequencer
            .subsystems_mut()
            .set_readiness(subsystem, readiness);
        CommandOutcome::Scripted(subsystem, readiness)
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandOutcome::Accepted(kind) => write!(f, "request {kind} accepted"),
            CommandOutcome::Ticked(report) => report.fmt(f),
            CommandOutcome::Status(report) => report.fmt(f),
            CommandOutcome::Scripted(subsystem, Readiness::Never) => {
                write!(f, "{subsystem} will never report ready")
            }
            CommandOutcome::Scripted(subsystem, Readiness::After(polls)) => {
                write!(f, "{subsystem} ready after {polls} not-ready polls")
            }
            CommandOutcome::Help(Some(spec)) => write!(f, "{}\n  {}", spec.usage, spec.summary),
            CommandOutcome::Help(None) => {
                f.write_str("commands:")?;
                for spec in &COMMANDS {
                    write!(f, "\n  {:<28} {}", spec.usage, spec.summary)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ticked {} ({} transitions), now {}/{}",
            self.ticks, self.transitions, self.snapshot.main, self.snapshot.sub
        )?;
        if self.snapshot.main == MainState::Fault {
            f.write_str(" [fault]")?;
        }
        Ok(())
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "phase:     {}/{}", self.snapshot.main, self.snapshot.sub)?;
        writeln!(
            f,
            "previous:  {}/{}",
            self.snapshot.last_main, self.snapshot.last_sub
        )?;
        writeln!(f, "countdown: {}", self.countdown)?;
        writeln!(f, "retries:   {}/{}", self.retry_counter, self.retry_budget)?;
        writeln!(f, "illegal:   {}", self.illegal_requests)?;
        match self.pending {
            Some(kind) => write!(f, "pending:   {kind}"),
            None => f.write_str("pending:   none"),
        }
    }
}
