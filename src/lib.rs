//! Monthly mailer: validated monthly batches in, per-recipient mail out.

pub mod batch;
pub mod campaign;
pub mod config;
pub mod error;
pub mod logging;
pub mod output;
pub mod recipients;
pub mod rounds;
pub mod sending;
pub mod stage;
pub mod tabular;
pub mod template;
pub mod transport;
