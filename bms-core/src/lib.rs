#![no_std]

// Supervisory sequencing logic for the battery-management controller.
//
// The crate avoids the Rust standard library so the same state machine runs
// inside the MCU firmware and the host-side emulator and test suites.
pub mod console;
pub mod diagnostics;
pub mod sequencer;
pub mod subsystems;
