//! Core layer - object model shared by every object kind.
//!
//! This module provides:
//! - [`AnyValue`] - Tagged container for one parameter value
//! - [`ParameterTable`] - Per-object name to value mapping
//! - [`ObjectRecord`] / [`ObjectRef`] - Dual-refcounted objects with timestamps
//! - [`DeviceState`] - Registry, clock and deferred commit buffer
//! - Status reporting and [`DeviceConfig`]

mod any;
mod commit;
mod config;
mod object;
mod params;
mod state;
mod status;

pub use any::AnyValue;
pub use config::DeviceConfig;
pub use object::{CommitState, Handle, ObjectRecord, ObjectRef, ObserverRef, RefType};
pub use params::{ParameterTable, Provenance};
pub use state::{Clock, DeviceState, TimeStamp, UpdateRequests};
pub use status::{init_logging, Severity, StatusCallback, StatusMessage};

pub(crate) use object::{ObjectContext, ObjectImpl};
pub(crate) use state::Completion;

/// Whether a query may block until pending work completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum WaitMode {
    /// Return immediately with whatever is available
    NoWait,
    /// Block until pending commits and rebuilds are done
    #[default]
    Wait,
}
