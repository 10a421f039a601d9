//! Message dispatch: per-recipient attempts, message assembly and the bulk loop.

pub mod attempt;
pub mod bulk;
pub mod message;

pub use attempt::{
    Clock, LocalClock, STOPPED_CODE, STOPPED_MESSAGE, SendAttempt, SendOutcome, SendStatus,
    TRANSPORT_ERROR_CODE,
};
pub use bulk::{BulkJob, BulkSender, MessageSink, PacingHook, PreSendHook, Stop};
pub use message::{build_message, mailbox};
