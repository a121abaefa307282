use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant as HostInstant};

use bms_core::console::{CommandError, CommandExecutor, CommandOutcome};
use bms_core::diagnostics::{DiagnosticsLog, DiagnosticsRecord};
use bms_core::sequencer::{ConfigError, Sequencer, SequencerConfig, SequencerShared, StagePlan};
use bms_core::subsystems::scripted::{self, Readiness};
use bms_core::subsystems::{ScriptedRetainedFlags, ScriptedSubsystems};

type Executor =
    CommandExecutor<'static, ScriptedSubsystems, DiagnosticsLog, ScriptedRetainedFlags>;

/// Controller profile selected on the command line.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub config: SequencerConfig,
    pub deep_discharge: bool,
    pub transcript: Option<PathBuf>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            config: SequencerConfig::new(),
            deep_discharge: false,
            transcript: None,
        }
    }
}

/// One interactive emulator run.
pub struct Session {
    executor: Executor,
    transcript: Option<TranscriptLogger>,
    started_at: HostInstant,
    next_record: u32,
}

impl Session {
    pub fn new(options: &SessionOptions) -> io::Result<Self> {
        let plan = StagePlan::new(options.config).map_err(invalid_config)?;
        // The REPL lives for the whole process, like the firmware's static block.
        let shared: &'static SequencerShared = Box::leak(Box::new(SequencerShared::new()));
        let sequencer = Sequencer::with_collaborators(
            shared,
            plan,
            ScriptedSubsystems::new(),
            DiagnosticsLog::new(),
            ScriptedRetainedFlags::new(options.deep_discharge),
        );

        let transcript = options
            .transcript
            .as_deref()
            .map(TranscriptLogger::new)
            .transpose()?;

        Ok(Self {
            executor: CommandExecutor::new(sequencer),
            transcript,
            started_at: HostInstant::now(),
            next_record: 0,
        })
    }

    /// Lines describing the active profile, shown once at start-up.
    pub fn banner(&self) -> Vec<String> {
        let plan = self.executor.sequencer().plan();
        let stages: Vec<String> = plan.stages().map(|stage| format!("{stage:?}")).collect();
        let mut lines = vec![
            format!(
                "tick {} ms, retry budget {} polls",
                plan.config().tick_period_ms,
                plan.retry_budget()
            ),
            format!("stages: {}", stages.join(" -> ")),
        ];
        let scripts: Vec<String> = scripted::scripts(self.executor.sequencer().subsystems())
            .iter()
            .map(|(id, readiness)| format!("{id}={}", describe_readiness(*readiness)))
            .collect();
        lines.push(format!("scripts: {}", scripts.join(", ")));
        lines
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.started_at.elapsed();
        self.record(elapsed, TranscriptRole::Host, &[trimmed.to_string()])?;

        let mut lines = match self.executor.execute(trimmed) {
            Ok(outcome) => describe_outcome(&outcome),
            Err(CommandError::Parse(err)) => vec![format!("ERR syntax {err}")],
            Err(err) => vec![format!("ERR {err}")],
        };
        lines.extend(self.drain_diagnostics());

        self.record(elapsed, TranscriptRole::Emulator, &lines)?;
        Ok(lines)
    }

    /// Formats diagnostics records written since the previous command.
    fn drain_diagnostics(&mut self) -> Vec<String> {
        let next = self.next_record;
        let fresh: Vec<DiagnosticsRecord> = self
            .executor
            .sequencer()
            .diagnostics()
            .records()
            .filter(|record| record.id >= next)
            .copied()
            .collect();

        if let Some(last) = fresh.last() {
            self.next_record = last.id.wrapping_add(1);
        }

        fresh
            .iter()
            .map(|record| {
                format!(
                    "  [tick {:>5}] {:#06x} {}",
                    record.tick,
                    record.event.to_raw(),
                    record.event
                )
            })
            .collect()
    }

    fn record(&mut self, elapsed: Duration, role: TranscriptRole, lines: &[String]) -> io::Result<()> {
        match self.transcript.as_mut() {
            Some(transcript) => lines
                .iter()
                .try_for_each(|line| transcript.append_line(elapsed, role, line)),
            None => Ok(()),
        }
    }
}

fn describe_outcome(outcome: &CommandOutcome) -> Vec<String> {
    outcome.to_string().lines().map(str::to_string).collect()
}

fn describe_readiness(readiness: Readiness) -> String {
    match readiness {
        Readiness::After(0) => "immediate".to_string(),
        Readiness::After(polls) => format!("after {polls}"),
        Readiness::Never => "never".to_string(),
    }
}

fn invalid_config(error: ConfigError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, error.to_string())
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        logger.write_header()?;
        Ok(logger)
    }

    fn write_header(&mut self) -> io::Result<()> {
        writeln!(self.writer, "# BMS sequencer emulator transcript")?;
        writeln!(
            self.writer,
            "# Timestamps are milliseconds since session start"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

#[derive(Clone, Copy, Debug)]
enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(self) -> &'static str {
        match self {
            TranscriptRole::Host => ">",
            TranscriptRole::Emulator => "<",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(config: SequencerConfig) -> Session {
        let options = SessionOptions {
            config,
            ..SessionOptions::default()
        };
        Session::new(&options).expect("session should start")
    }

    #[test]
    fn bring_up_reports_phase_changes() {
        let mut session = session(SequencerConfig::new());
        session
            .handle_command("request init")
            .expect("command should run");
        let lines = session.handle_command("tick 1s").expect("command should run");

        assert!(lines[0].contains("now running/entry"), "{lines:?}");
        assert!(lines.iter().any(|line| line.contains("phase init-bms")));
    }

    #[test]
    fn stalled_subsystem_ends_in_fault() {
        let mut session = session(SequencerConfig::new());
        session
            .handle_command("stall contactors")
            .expect("command should run");
        session
            .handle_command("request init")
            .expect("command should run");
        let lines = session.handle_command("tick 50").expect("command should run");

        assert!(lines[0].ends_with("[fault]"), "{lines:?}");
    }

    #[test]
    fn syntax_errors_are_prefixed() {
        let mut session = session(SequencerConfig::new());
        let lines = session.handle_command("tick five").expect("command should run");
        assert!(lines[0].starts_with("ERR syntax"), "{lines:?}");
    }

    #[test]
    fn oversized_tick_is_refused_without_running() {
        let mut session = session(SequencerConfig::new());
        let lines = session
            .handle_command("tick 4294967295")
            .expect("command should run");
        assert!(lines[0].starts_with("ERR syntax"), "{lines:?}");

        let lines = session.handle_command("tick 3600s").expect("command should run");
        assert!(lines[0].starts_with("ERR 360000 ticks"), "{lines:?}");
    }

    #[test]
    fn diagnostics_are_only_printed_once() {
        let mut session = session(SequencerConfig::new());
        session
            .handle_command("request init")
            .expect("command should run");
        let first = session.handle_command("tick").expect("command should run");
        let second = session.handle_command("status").expect("command should run");

        assert_eq!(first.len(), 2, "{first:?}");
        assert!(second.iter().all(|line| !line.contains("[tick")));
    }

    #[test]
    fn zero_tick_period_is_rejected() {
        let options = SessionOptions {
            config: SequencerConfig::new().with_tick_period_ms(0),
            ..SessionOptions::default()
        };
        assert!(Session::new(&options).is_err());
    }
}
