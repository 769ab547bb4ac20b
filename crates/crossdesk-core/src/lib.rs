//! Core types: providers, canonical events and messages, time, conflicts, tracing

pub mod conflict;
pub mod event;
pub mod message;
pub mod provider;
pub mod time;
pub mod tracing;

pub use conflict::{ConflictPair, ConflictReport, EventSummary, detect_conflicts};
pub use event::{Attendee, CanonicalEvent, EventStatus, ResponseStatus};
pub use message::CanonicalMessage;
pub use provider::{ConnectedProviders, Provider, UnknownProvider};
pub use time::{
    TimeWindow, canonical_timestamp, normalize_date, normalize_timestamp,
    normalize_timestamp_in_zone, parse_timestamp,
};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
