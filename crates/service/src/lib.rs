pub mod service;

pub use service::{
    cancel_session, get_session, get_session_result, poll_session_events, start_session,
    CancelSessionResponse, JobKind, SessionRequest, SessionResult, SessionSnapshot, SessionStatus,
};
