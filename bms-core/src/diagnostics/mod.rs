//! Diagnostics collaborator and an in-memory recorder.
//!
//! The sequencer reports liveness on every tick, the deep-discharge verdict
//! once during initialization, and (through default-empty hooks) every phase
//! change and illegal request. [`DiagnosticsLog`] keeps the most recent
//! events in a fixed-size ring so `no_std` targets and the emulator can both
//! inspect them. Event kinds map to compact numeric codes for transport.

use core::fmt;

use heapless::{HistoryBuf, OldestOrdered};

use crate::sequencer::{PhaseSnapshot, RequestKind};

/// Number of diagnostics records retained by [`DiagnosticsLog`].
pub const DIAGNOSTICS_CAPACITY: usize = 32;

/// Components that report liveness to the system monitor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ComponentId {
    Sys,
}

/// Number of distinct [`ComponentId`] variants.
pub const COMPONENT_COUNT: usize = 1;

impl ComponentId {
    const fn as_index(self) -> usize {
        match self {
            ComponentId::Sys => 0,
        }
    }
}

/// Diagnostic channels the sequencer reports on.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DiagChannel {
    /// Under-voltage safety limit violated before the last reset.
    DeepDischargeDetected,
}

/// Verdict attached to a diagnostic report.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DiagEvent {
    Ok,
    NotOk,
}

impl DiagEvent {
    /// Maps a "fault present" flag to a verdict.
    pub const fn from_fault(fault: bool) -> Self {
        if fault { DiagEvent::NotOk } else { DiagEvent::Ok }
    }
}

/// Diagnostics sink consumed by the sequencer.
pub trait Diagnostics {
    /// Signals that `component` is still being scheduled.
    fn notify_alive(&mut self, component: ComponentId);

    /// Reports a verdict on a diagnostic channel.
    fn report(&mut self, channel: DiagChannel, event: DiagEvent);

    /// Called after the sequencer committed a phase change.
    fn phase_changed(&mut self, _snapshot: PhaseSnapshot) {}

    /// Called when the dispatcher consumed a request it cannot act on.
    fn illegal_request(&mut self, _request: RequestKind, _total: u32) {}
}

/// Diagnostics sink that discards everything.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopDiagnostics;

impl NoopDiagnostics {
    pub const fn new() -> Self {
        Self
    }
}

impl Diagnostics for NoopDiagnostics {
    fn notify_alive(&mut self, _: ComponentId) {}

    fn report(&mut self, _: DiagChannel, _: DiagEvent) {}
}

/// Events captured by [`DiagnosticsLog`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DiagnosticsEvent {
    Report(DiagChannel, DiagEvent),
    PhaseChanged(PhaseSnapshot),
    IllegalRequest(RequestKind),
}

impl DiagnosticsEvent {
    const DEEP_DISCHARGE_OK: u16 = 0x0100;
    const DEEP_DISCHARGE_NOT_OK: u16 = 0x0101;
    const PHASE_CHANGED_BASE: u16 = 0x0200;
    const ILLEGAL_REQUEST_BASE: u16 = 0x0300;

    /// Encodes the event kind into a compact transport discriminant.
    ///
    /// Phase changes carry the new main state in the low byte; illegal
    /// requests carry the raw request code.
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            DiagnosticsEvent::Report(DiagChannel::DeepDischargeDetected, DiagEvent::Ok) => {
                Self::DEEP_DISCHARGE_OK
            }
            DiagnosticsEvent::Report(DiagChannel::DeepDischargeDetected, DiagEvent::NotOk) => {
                Self::DEEP_DISCHARGE_NOT_OK
            }
            DiagnosticsEvent::PhaseChanged(snapshot) => {
                Self::PHASE_CHANGED_BASE | snapshot.main.to_raw() as u16
            }
            DiagnosticsEvent::IllegalRequest(request) => {
                Self::ILLEGAL_REQUEST_BASE | request.to_raw() as u16
            }
        }
    }
}

impl fmt::Display for DiagnosticsEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticsEvent::Report(channel, event) => write!(f, "report {channel:?}={event:?}"),
            DiagnosticsEvent::PhaseChanged(snapshot) => write!(f, "phase {snapshot}"),
            DiagnosticsEvent::IllegalRequest(request) => write!(f, "illegal-request {request}"),
        }
    }
}

/// Single entry stored in [`DiagnosticsLog`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DiagnosticsRecord {
    pub id: u32,
    /// Sequencer liveness count when the event was recorded.
    pub tick: u32,
    pub event: DiagnosticsEvent,
}

/// Ring-buffer diagnostics recorder.
#[derive(Clone)]
pub struct DiagnosticsLog {
    ring: HistoryBuf<DiagnosticsRecord, DIAGNOSTICS_CAPACITY>,
    alive: [u32; COMPONENT_COUNT],
    next_id: u32,
    deep_discharge: Option<DiagEvent>,
}

impl DiagnosticsLog {
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            alive: [0; COMPONENT_COUNT],
            next_id: 0,
            deep_discharge: None,
        }
    }

    /// Number of liveness notifications received from `component`.
    pub fn alive_count(&self, component: ComponentId) -> u32 {
        self.alive[component.as_index()]
    }

    /// Last verdict reported on the deep-discharge channel.
    pub fn deep_discharge(&self) -> Option<DiagEvent> {
        self.deep_discharge
    }

    /// Returns the most recent record, if any.
    pub fn latest(&self) -> Option<&DiagnosticsRecord> {
        self.ring.recent()
    }

    /// Iterates over the retained records, oldest first.
    pub fn records(&self) -> OldestOrdered<'_, DiagnosticsRecord> {
        self.ring.oldest_ordered()
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.len() == 0
    }

    fn record(&mut self, event: DiagnosticsEvent) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.ring.write(DiagnosticsRecord {
            id,
            tick: self.alive_count(ComponentId::Sys),
            event,
        });
        id
    }
}

impl Default for DiagnosticsLog {
    fn default() -> Self {
        Self::new()
    }
}

impl Diagnostics for DiagnosticsLog {
    fn notify_alive(&mut self, component: ComponentId) {
        let slot = &mut self.alive[component.as_index()];
        *slot = slot.wrapping_add(1);
    }

    fn report(&mut self, channel: DiagChannel, event: DiagEvent) {
        match channel {
            DiagChannel::DeepDischargeDetected => self.deep_discharge = Some(event),
        }
        self.record(DiagnosticsEvent::Report(channel, event));
    }

    fn phase_changed(&mut self, snapshot: PhaseSnapshot) {
        self.record(DiagnosticsEvent::PhaseChanged(snapshot));
    }

    fn illegal_request(&mut self, request: RequestKind, _total: u32) {
        self.record(DiagnosticsEvent::IllegalRequest(request));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::{MainState, Substate};

    #[test]
    fn records_tick_stamp_from_liveness_count() {
        let mut log = DiagnosticsLog::new();
        log.notify_alive(ComponentId::Sys);
        log.notify_alive(ComponentId::Sys);
        log.report(DiagChannel::DeepDischargeDetected, DiagEvent::NotOk);

        let latest = log.latest().copied().expect("record missing");
        assert_eq!(latest.id, 0);
        assert_eq!(latest.tick, 2);
        assert_eq!(log.deep_discharge(), Some(DiagEvent::NotOk));
        assert_eq!(latest.event.to_raw(), 0x0101);
    }

    #[test]
    fn ring_keeps_most_recent_records() {
        let mut log = DiagnosticsLog::new();
        for _ in 0..DIAGNOSTICS_CAPACITY + 3 {
            log.report(DiagChannel::DeepDischargeDetected, DiagEvent::Ok);
        }

        assert_eq!(log.len(), DIAGNOSTICS_CAPACITY);
        let oldest = log.records().next().expect("records missing");
        assert_eq!(oldest.id, 3);
    }

    #[test]
    fn phase_change_code_carries_main_state() {
        let snapshot = PhaseSnapshot {
            main: MainState::Running,
            sub: Substate::Entry,
            last_main: MainState::InitializeBms,
            last_sub: Substate::WaitBms,
        };
        let code = DiagnosticsEvent::PhaseChanged(snapshot).to_raw();
        assert_eq!(code, 0x0200 + u16::from(MainState::Running.to_raw()));
    }
}
