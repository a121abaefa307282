//! Sequencer configuration and the stage plan derived from it.
//!
//! Optional stages are selected here rather than at compile time: the plan
//! walks the canonical stage order and skips every stage the configuration
//! leaves out. The retry budget is computed once from the initialization
//! window and the tick period and shared by all waiting stages.

use core::fmt;

use crate::subsystems::BalancingPolicy;

use super::phase::{Phase, StageStep};

/// Default period between two ticks.
pub const DEFAULT_TICK_PERIOD_MS: u16 = 10;
/// Default window a stage is given to report ready.
pub const DEFAULT_INIT_TIMEOUT_MS: u16 = 100;
/// Default countdown armed between ordinary steps.
pub const DEFAULT_SHORT_DELAY: u16 = 1;
/// Default countdown armed between measurement and sensor polls.
pub const DEFAULT_MEDIUM_DELAY: u16 = 5;
/// Default countdown armed in steady phases and for triggered sensors.
pub const DEFAULT_LONG_DELAY: u16 = 100;

/// How the current sensor delivers its readings.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CurrentSensorConfig {
    /// Trigger-based sensors only answer after a trigger frame, so the
    /// presence check waits longer before the first poll.
    pub triggered: bool,
}

impl CurrentSensorConfig {
    pub const CYCLIC: CurrentSensorConfig = CurrentSensorConfig { triggered: false };
    pub const TRIGGERED: CurrentSensorConfig = CurrentSensorConfig { triggered: true };
}

/// Build-time description of the controller the sequencer brings up.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SequencerConfig {
    pub tick_period_ms: u16,
    pub init_timeout_ms: u16,
    pub short_delay: u16,
    pub medium_delay: u16,
    pub long_delay: u16,
    pub interlock: bool,
    pub contactors: bool,
    pub isoguard: bool,
    pub current_sensor: Option<CurrentSensorConfig>,
    pub balancing_default: BalancingPolicy,
}

impl SequencerConfig {
    /// Configuration with every optional stage present and a cyclic sensor.
    pub const fn new() -> Self {
        Self {
            tick_period_ms: DEFAULT_TICK_PERIOD_MS,
            init_timeout_ms: DEFAULT_INIT_TIMEOUT_MS,
            short_delay: DEFAULT_SHORT_DELAY,
            medium_delay: DEFAULT_MEDIUM_DELAY,
            long_delay: DEFAULT_LONG_DELAY,
            interlock: true,
            contactors: true,
            isoguard: true,
            current_sensor: Some(CurrentSensorConfig::CYCLIC),
            balancing_default: BalancingPolicy::Inactive,
        }
    }

    #[must_use]
    pub const fn with_tick_period_ms(mut self, tick_period_ms: u16) -> Self {
        self.tick_period_ms = tick_period_ms;
        self
    }

    #[must_use]
    pub const fn with_init_timeout_ms(mut self, init_timeout_ms: u16) -> Self {
        self.init_timeout_ms = init_timeout_ms;
        self
    }

    #[must_use]
    pub const fn with_delays(mut self, short: u16, medium: u16, long: u16) -> Self {
        self.short_delay = short;
        self.medium_delay = medium;
        self.long_delay = long;
        self
    }

    #[must_use]
    pub const fn with_interlock(mut self, present: bool) -> Self {
        self.interlock = present;
        self
    }

    #[must_use]
    pub const fn with_contactors(mut self, present: bool) -> Self {
        self.contactors = present;
        self
    }

    #[must_use]
    pub const fn with_isoguard(mut self, present: bool) -> Self {
        self.isoguard = present;
        self
    }

    #[must_use]
    pub const fn with_current_sensor(mut self, sensor: Option<CurrentSensorConfig>) -> Self {
        self.current_sensor = sensor;
        self
    }

    #[must_use]
    pub const fn with_balancing_default(mut self, policy: BalancingPolicy) -> Self {
        self.balancing_default = policy;
        self
    }
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration rejected by [`StagePlan::new`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    ZeroTickPeriod,
    /// The init window spans `u16::MAX` ticks or more, which the retry
    /// counter cannot exceed.
    RetryBudgetTooLarge,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroTickPeriod => f.write_str("tick period must be non-zero"),
            ConfigError::RetryBudgetTooLarge => {
                f.write_str("init window must be shorter than 65535 tick periods")
            }
        }
    }
}

/// Countdown class armed by a transition.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Delay {
    /// Leave the countdown at zero; dispatch again on the next tick.
    None,
    Short,
    Medium,
    Long,
}

/// Stages that follow `Initialized`, in canonical order.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Stage {
    Interlock,
    Contactors,
    Balancing,
    Isoguard,
    FirstMeasurement,
    CurrentSensor,
    Misc,
    Bms,
    Running,
}

/// Number of distinct [`Stage`] variants.
pub const STAGE_COUNT: usize = 9;

/// Canonical bring-up order.
pub const CANONICAL_STAGES: [Stage; STAGE_COUNT] = [
    Stage::Interlock,
    Stage::Contactors,
    Stage::Balancing,
    Stage::Isoguard,
    Stage::FirstMeasurement,
    Stage::CurrentSensor,
    Stage::Misc,
    Stage::Bms,
    Stage::Running,
];

impl Stage {
    const fn as_index(self) -> usize {
        match self {
            Stage::Interlock => 0,
            Stage::Contactors => 1,
            Stage::Balancing => 2,
            Stage::Isoguard => 3,
            Stage::FirstMeasurement => 4,
            Stage::CurrentSensor => 5,
            Stage::Misc => 6,
            Stage::Bms => 7,
            Stage::Running => 8,
        }
    }

    /// Phase the sequencer enters when it advances to this stage.
    pub const fn entry_phase(self) -> Phase {
        match self {
            Stage::Interlock => Phase::InitializeInterlock(StageStep::Entry),
            Stage::Contactors => Phase::InitializeContactors(StageStep::Entry),
            Stage::Balancing => Phase::InitializeBalancing(StageStep::Entry),
            Stage::Isoguard => Phase::InitializeIsoguard,
            Stage::FirstMeasurement => Phase::FirstMeasurementCycle(StageStep::Entry),
            Stage::CurrentSensor => Phase::CheckCurrentSensorPresence(StageStep::Entry),
            Stage::Misc => Phase::InitializeMisc,
            Stage::Bms => Phase::InitializeBms(StageStep::Entry),
            Stage::Running => Phase::Running,
        }
    }
}

/// Ordered list of active stages plus the timing derived from the config.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StagePlan {
    config: SequencerConfig,
    enabled: [bool; STAGE_COUNT],
    retry_budget: u16,
}

impl StagePlan {
    pub fn new(config: SequencerConfig) -> Result<Self, ConfigError> {
        if config.tick_period_ms == 0 {
            return Err(ConfigError::ZeroTickPeriod);
        }
        let retry_budget = config.init_timeout_ms / config.tick_period_ms;
        if retry_budget == u16::MAX {
            return Err(ConfigError::RetryBudgetTooLarge);
        }

        let enabled = CANONICAL_STAGES.map(|stage| match stage {
            Stage::Interlock => config.interlock,
            Stage::Contactors => config.contactors,
            Stage::CurrentSensor => config.current_sensor.is_some(),
            _ => true,
        });

        Ok(Self {
            config,
            enabled,
            retry_budget,
        })
    }

    pub const fn config(&self) -> &SequencerConfig {
        &self.config
    }

    /// Failed polls tolerated before a stage escalates.
    pub const fn retry_budget(&self) -> u16 {
        self.retry_budget
    }

    pub const fn contains(&self, stage: Stage) -> bool {
        self.enabled[stage.as_index()]
    }

    /// First stage after `Initialized`.
    pub fn first(&self) -> Stage {
        self.next_enabled(0)
    }

    /// Stage the sequencer advances to once `stage` completes.
    pub fn after(&self, stage: Stage) -> Stage {
        match stage {
            Stage::Running => Stage::Running,
            other => self.next_enabled(other.as_index() + 1),
        }
    }

    /// Iterates over the active stages in bring-up order.
    pub fn stages(&self) -> impl Iterator<Item = Stage> + '_ {
        CANONICAL_STAGES
            .iter()
            .copied()
            .filter(|stage| self.contains(*stage))
    }

    /// Countdown value for a delay class.
    pub const fn ticks(&self, delay: Delay) -> u16 {
        match delay {
            Delay::None => 0,
            Delay::Short => self.config.short_delay,
            Delay::Medium => self.config.medium_delay,
            Delay::Long => self.config.long_delay,
        }
    }

    fn next_enabled(&self, from: usize) -> Stage {
        // `Running` is always enabled, so the scan always finds a stage.
        CANONICAL_STAGES[from.min(STAGE_COUNT - 1)..]
            .iter()
            .copied()
            .find(|stage| self.contains(*stage))
            .unwrap_or(Stage::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapless::Vec;

    fn plan(config: SequencerConfig) -> StagePlan {
        StagePlan::new(config).expect("config should be valid")
    }

    #[test]
    fn default_budget_is_ten_polls() {
        assert_eq!(plan(SequencerConfig::new()).retry_budget(), 10);
    }

    #[test]
    fn budget_rounds_down() {
        let config = SequencerConfig::new().with_tick_period_ms(30);
        assert_eq!(plan(config).retry_budget(), 3);
    }

    #[test]
    fn zero_tick_period_is_rejected() {
        let config = SequencerConfig::new().with_tick_period_ms(0);
        assert_eq!(StagePlan::new(config), Err(ConfigError::ZeroTickPeriod));
    }

    #[test]
    fn budget_the_counter_cannot_exceed_is_rejected() {
        let config = SequencerConfig::new()
            .with_tick_period_ms(1)
            .with_init_timeout_ms(u16::MAX);
        assert_eq!(StagePlan::new(config), Err(ConfigError::RetryBudgetTooLarge));

        let widest = config.with_init_timeout_ms(u16::MAX - 1);
        assert_eq!(plan(widest).retry_budget(), u16::MAX - 1);
    }

    #[test]
    fn full_config_visits_every_stage() {
        let stages: Vec<Stage, STAGE_COUNT> = plan(SequencerConfig::new()).stages().collect();
        assert_eq!(stages.as_slice(), &CANONICAL_STAGES);
    }

    #[test]
    fn optional_stages_are_skipped() {
        let config = SequencerConfig::new()
            .with_interlock(false)
            .with_contactors(false)
            .with_current_sensor(None);
        let plan = plan(config);

        assert_eq!(plan.first(), Stage::Balancing);
        assert_eq!(plan.after(Stage::FirstMeasurement), Stage::Misc);
        assert!(!plan.contains(Stage::CurrentSensor));
    }

    #[test]
    fn interlock_skips_to_balancing_without_contactors() {
        let plan = plan(SequencerConfig::new().with_contactors(false));
        assert_eq!(plan.first(), Stage::Interlock);
        assert_eq!(plan.after(Stage::Interlock), Stage::Balancing);
    }

    #[test]
    fn running_is_its_own_successor() {
        assert_eq!(plan(SequencerConfig::new()).after(Stage::Running), Stage::Running);
    }
}
