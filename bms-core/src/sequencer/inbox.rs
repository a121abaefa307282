//! Single-slot request mailbox with admission control.
//!
//! Validation and the store happen inside one critical section so a
//! concurrent [`RequestInbox::take`] can never interleave with a submission.

use core::cell::Cell;
use core::fmt;

use critical_section::Mutex;

use super::phase::MainState;

/// External requests the sequencer understands.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RequestKind {
    /// Sentinel for "nothing requested"; never stored.
    NoRequest,
    InitRequest,
    /// Always admitted; replaces whatever is pending.
    ErrorRequest,
    /// Code that does not name any known request.
    Unknown(u8),
}

impl RequestKind {
    const NO_REQUEST: u8 = 0x00;
    const INIT_REQUEST: u8 = 0x01;
    const ERROR_REQUEST: u8 = 0x02;

    pub const fn to_raw(self) -> u8 {
        match self {
            RequestKind::NoRequest => Self::NO_REQUEST,
            RequestKind::InitRequest => Self::INIT_REQUEST,
            RequestKind::ErrorRequest => Self::ERROR_REQUEST,
            RequestKind::Unknown(raw) => raw,
        }
    }

    /// Decodes a raw request code, e.g. from a bus frame or the console.
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            Self::NO_REQUEST => RequestKind::NoRequest,
            Self::INIT_REQUEST => RequestKind::InitRequest,
            Self::ERROR_REQUEST => RequestKind::ErrorRequest,
            other => RequestKind::Unknown(other),
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::NoRequest => f.write_str("none"),
            RequestKind::InitRequest => f.write_str("init"),
            RequestKind::ErrorRequest => f.write_str("error"),
            RequestKind::Unknown(raw) => write!(f, "unknown({raw:#04x})"),
        }
    }
}

/// Reasons a request was not admitted.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RequestError {
    IllegalRequest,
    RequestPending,
    AlreadyInitialized,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::IllegalRequest => f.write_str("illegal request"),
            RequestError::RequestPending => f.write_str("request pending"),
            RequestError::AlreadyInitialized => f.write_str("already initialized"),
        }
    }
}

/// Single-slot mailbox shared between submitters and the dispatcher.
pub struct RequestInbox {
    slot: Mutex<Cell<Option<RequestKind>>>,
}

impl RequestInbox {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(Cell::new(None)),
        }
    }

    /// Validates `request` against the pending slot and `main_state`, storing
    /// it when admitted.
    ///
    /// `main_state` is sampled inside the critical section.
    pub fn submit(
        &self,
        request: RequestKind,
        main_state: impl FnOnce() -> MainState,
    ) -> Result<(), RequestError> {
        critical_section::with(|cs| {
            let slot = self.slot.borrow(cs);
            admit(request, slot.get(), main_state)?;
            slot.set(Some(request));
            Ok(())
        })
    }

    /// Reads and clears the pending request.
    pub fn take(&self) -> Option<RequestKind> {
        critical_section::with(|cs| self.slot.borrow(cs).take())
    }

    /// Reads the pending request without clearing it.
    pub fn peek(&self) -> Option<RequestKind> {
        critical_section::with(|cs| self.slot.borrow(cs).get())
    }
}

impl Default for RequestInbox {
    fn default() -> Self {
        Self::new()
    }
}

fn admit(
    request: RequestKind,
    pending: Option<RequestKind>,
    main_state: impl FnOnce() -> MainState,
) -> Result<(), RequestError> {
    if request == RequestKind::ErrorRequest {
        return Ok(());
    }

    if pending.is_some() {
        return Err(RequestError::RequestPending);
    }

    match request {
        RequestKind::InitRequest if main_state() == MainState::Uninitialized => Ok(()),
        RequestKind::InitRequest => Err(RequestError::AlreadyInitialized),
        _ => Err(RequestError::IllegalRequest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uninitialized() -> MainState {
        MainState::Uninitialized
    }

    #[test]
    fn init_is_admitted_once() {
        let inbox = RequestInbox::new();
        assert_eq!(inbox.submit(RequestKind::InitRequest, uninitialized), Ok(()));
        assert_eq!(
            inbox.submit(RequestKind::InitRequest, uninitialized),
            Err(RequestError::RequestPending)
        );
        assert_eq!(inbox.peek(), Some(RequestKind::InitRequest));
    }

    #[test]
    fn error_request_preempts_pending_request() {
        let inbox = RequestInbox::new();
        inbox
            .submit(RequestKind::InitRequest, uninitialized)
            .expect("init should be admitted");
        assert_eq!(inbox.submit(RequestKind::ErrorRequest, uninitialized), Ok(()));
        assert_eq!(inbox.take(), Some(RequestKind::ErrorRequest));
        assert_eq!(inbox.take(), None);
    }

    #[test]
    fn init_after_bring_up_reports_already_initialized() {
        let inbox = RequestInbox::new();
        assert_eq!(
            inbox.submit(RequestKind::InitRequest, || MainState::Running),
            Err(RequestError::AlreadyInitialized)
        );
        assert_eq!(inbox.peek(), None);
    }

    #[test]
    fn sentinel_and_unknown_codes_are_illegal() {
        let inbox = RequestInbox::new();
        assert_eq!(
            inbox.submit(RequestKind::NoRequest, uninitialized),
            Err(RequestError::IllegalRequest)
        );
        assert_eq!(
            inbox.submit(RequestKind::from_raw(0x42), uninitialized),
            Err(RequestError::IllegalRequest)
        );
        assert_eq!(inbox.peek(), None);
    }

    #[test]
    fn raw_codes_decode_known_requests() {
        assert_eq!(RequestKind::from_raw(1), RequestKind::InitRequest);
        assert_eq!(RequestKind::from_raw(2), RequestKind::ErrorRequest);
        assert_eq!(RequestKind::from_raw(9).to_raw(), 9);
    }
}
