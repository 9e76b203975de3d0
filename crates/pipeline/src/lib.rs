//! Request lifecycle for the courier bot.
//!
//! Incoming text is classified by [`Intake`] into a [`TransferRequest`];
//! [`DeliveryCoordinator`] then acquires the payload, plans and packages it
//! under the attachment ceiling, and delivers the units in order. Chat-level
//! bookkeeping (awaiting input, in-flight cancellation) lives in
//! [`SessionStore`].
//!
//! [`TransferRequest`]: courier_protocol::TransferRequest

pub mod acquire;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod intake;
pub mod session;
pub mod workspace;

#[cfg(test)]
mod testing;

pub use acquire::{Acquire, AcquireContext, SourceAcquirer};
pub use config::{AcquireConfig, PipelineConfig};
pub use coordinator::{DeliveryCoordinator, DeliveryEvent, DeliveryReport, DeliveryState};
pub use error::{AcquisitionError, AcquisitionErrorKind, PipelineError};
pub use intake::Intake;
pub use session::{CancelOutcome, SessionStore};
pub use workspace::RequestWorkspace;
