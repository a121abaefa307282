//! Deep-discharge flag kept in RAM that survives a warm reset.

use core::mem::MaybeUninit;
use core::ptr;

use bms_core::subsystems::RetainedFlags;

/// Left by the safety monitor before a protective reset.
const DEEP_DISCHARGE_MARK: u32 = 0xDD15_C4A6;

#[unsafe(link_section = ".uninit.RETAINED_FLAGS")]
static mut RETAINED_FLAGS: MaybeUninit<u32> = MaybeUninit::uninit();

/// Retained flags sampled once at boot.
pub struct RetainedWord {
    deep_discharge: bool,
}

impl RetainedWord {
    pub fn capture() -> Self {
        // SAFETY: read once from the executor main, before any task starts.
        let word = unsafe { ptr::addr_of!(RETAINED_FLAGS).cast::<u32>().read_volatile() };
        Self {
            deep_discharge: word == DEEP_DISCHARGE_MARK,
        }
    }
}

impl RetainedFlags for RetainedWord {
    fn deep_discharge_detected(&self) -> bool {
        self.deep_discharge
    }
}
