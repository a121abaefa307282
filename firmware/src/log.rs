#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Log sinks for the sequencer and its tasks.
//!
//! On target every line goes out through `defmt`; host builds print to
//! stdout so the same call sites can be exercised by unit tests.

use bms_core::diagnostics::{ComponentId, DiagChannel, DiagEvent, Diagnostics};
use bms_core::sequencer::{PhaseSnapshot, RequestError, RequestKind};

use crate::config::HEARTBEAT_EVERY;
use crate::proxies::ProxyCommand;

/// [`Diagnostics`] sink that logs every report and keeps liveness counters.
pub struct LogDiagnostics {
    alive: u32,
    deep_discharge: Option<DiagEvent>,
}

impl LogDiagnostics {
    pub const fn new() -> Self {
        Self {
            alive: 0,
            deep_discharge: None,
        }
    }

    pub fn alive_count(&self) -> u32 {
        self.alive
    }

    /// Verdict of the boot-time deep-discharge check, once reported.
    pub fn deep_discharge(&self) -> Option<DiagEvent> {
        self.deep_discharge
    }
}

impl Default for LogDiagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl Diagnostics for LogDiagnostics {
    fn notify_alive(&mut self, component: ComponentId) {
        self.alive = self.alive.wrapping_add(1);
        if self.alive % HEARTBEAT_EVERY == 0 {
            heartbeat(component, self.alive);
        }
    }

    fn report(&mut self, channel: DiagChannel, event: DiagEvent) {
        if channel == DiagChannel::DeepDischargeDetected {
            self.deep_discharge = Some(event);
        }
        diag_report(channel, event);
    }

    fn phase_changed(&mut self, snapshot: PhaseSnapshot) {
        phase_changed(snapshot);
    }

    fn illegal_request(&mut self, request: RequestKind, total: u32) {
        illegal_request(request, total);
    }
}

#[cfg(target_os = "none")]
fn heartbeat(component: ComponentId, alive: u32) {
    defmt::debug!("alive {} n={}", defmt::Debug2Format(&component), alive);
}

#[cfg(not(target_os = "none"))]
fn heartbeat(component: ComponentId, alive: u32) {
    println!("alive {component:?} n={alive}");
}

#[cfg(target_os = "none")]
fn diag_report(channel: DiagChannel, event: DiagEvent) {
    match event {
        DiagEvent::Ok => defmt::info!("diag {} ok", defmt::Debug2Format(&channel)),
        DiagEvent::NotOk => defmt::error!("diag {} NOT OK", defmt::Debug2Format(&channel)),
    }
}

#[cfg(not(target_os = "none"))]
fn diag_report(channel: DiagChannel, event: DiagEvent) {
    println!("diag {channel:?} {event:?}");
}

#[cfg(target_os = "none")]
fn phase_changed(snapshot: PhaseSnapshot) {
    defmt::info!("sys {}", defmt::Display2Format(&snapshot));
}

#[cfg(not(target_os = "none"))]
fn phase_changed(snapshot: PhaseSnapshot) {
    println!("sys {snapshot}");
}

#[cfg(target_os = "none")]
fn illegal_request(request: RequestKind, total: u32) {
    defmt::warn!(
        "sys ignored request {} (total {})",
        defmt::Display2Format(&request),
        total
    );
}

#[cfg(not(target_os = "none"))]
fn illegal_request(request: RequestKind, total: u32) {
    println!("sys ignored request {request} (total {total})");
}

/// Logs entry into the terminal fault state.
#[cfg(target_os = "none")]
pub fn fault(snapshot: PhaseSnapshot) {
    defmt::error!("sys FAULT {}", defmt::Display2Format(&snapshot));
}

#[cfg(not(target_os = "none"))]
pub fn fault(snapshot: PhaseSnapshot) {
    println!("sys FAULT {snapshot}");
}

#[cfg(target_os = "none")]
pub fn reentered() {
    defmt::warn!("sys tick skipped: previous tick still active");
}

#[cfg(not(target_os = "none"))]
pub fn reentered() {
    println!("sys tick skipped: previous tick still active");
}

#[cfg(target_os = "none")]
pub fn request_accepted(request: RequestKind) {
    defmt::info!("engine submitted {}", defmt::Display2Format(&request));
}

#[cfg(not(target_os = "none"))]
pub fn request_accepted(request: RequestKind) {
    println!("engine submitted {request}");
}

#[cfg(target_os = "none")]
pub fn request_rejected(request: RequestKind, error: RequestError) {
    defmt::warn!(
        "engine {} rejected: {}",
        defmt::Display2Format(&request),
        defmt::Display2Format(&error)
    );
}

#[cfg(not(target_os = "none"))]
pub fn request_rejected(request: RequestKind, error: RequestError) {
    println!("engine {request} rejected: {error}");
}

#[cfg(target_os = "none")]
pub fn proxy_dropped(command: ProxyCommand, total: u32) {
    defmt::error!(
        "proxy queue full, dropped {} (total {})",
        defmt::Debug2Format(&command),
        total
    );
}

#[cfg(not(target_os = "none"))]
pub fn proxy_dropped(command: ProxyCommand, total: u32) {
    println!("proxy queue full, dropped {command:?} (total {total})");
}

#[cfg(target_os = "none")]
pub fn bench_ignored(command: ProxyCommand) {
    defmt::trace!("bench ignored {}", defmt::Debug2Format(&command));
}

#[cfg(not(target_os = "none"))]
pub fn bench_ignored(command: ProxyCommand) {
    println!("bench ignored {command:?}");
}
