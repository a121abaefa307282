#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Boot-time request submission.

use bms_core::sequencer::{RequestError, RequestKind, SequencerShared};

use crate::log;

/// What the engine task should do after one submission attempt.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Submission {
    Done,
    /// The slot is still occupied; try again later.
    Retry,
}

/// Files the init request once, reporting whether to try again.
pub fn submit_init(shared: &SequencerShared) -> Submission {
    let request = RequestKind::InitRequest;
    match shared.request(request) {
        Ok(()) => {
            log::request_accepted(request);
            Submission::Done
        }
        Err(RequestError::RequestPending) => Submission::Retry,
        Err(error) => {
            log::request_rejected(request, error);
            Submission::Done
        }
    }
}
