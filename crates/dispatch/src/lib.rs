//! Message dispatch: builds one payload per message, fans it out to the
//! channel's active subscribers on a bounded pool, removes dead
//! subscriptions and marks the message notified.

pub mod dispatcher;
pub mod error;
pub mod fanout;
pub mod payload;

pub use {
    dispatcher::{CleanupReport, DispatchOutcome, DispatchSettings, Dispatcher},
    error::{Error, Result},
    fanout::FanOutReport,
    payload::PayloadTemplate,
};
