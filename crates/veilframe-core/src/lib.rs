//! Veilframe Transport Core
//!
//! Turns a byte transport into an authenticated, confidential channel between
//! two contacts without sending any cleartext identifier.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────┐  tag  ┌──────────────────────────────┐
//! │ read_tag / StreamWriter│──────▶│ TransportKeyManager          │
//! └────────────────────────┘       │  (contact, transport) → set  │
//!            ▲                     │  TransportKeySet             │
//!            │ ConnectionContext   │   RotationWindow             │
//!            └─────────────────────│   ReorderingWindow per period│
//!                                  └──────────────┬───────────────┘
//!                                                 │ save
//!                                                 ▼
//!                                            KeyStore
//! ```
//!
//! The manager is synchronous and takes the current wall-clock time as a
//! parameter; callers read it from an [`Environment`]. Only the stream layer
//! is async.
//!
//! # Connection Lifecycle
//!
//! 1. Outgoing: [`TransportKeyManager::outgoing_context`] reserves and
//!    persists a connection number, then a [`StreamWriter`] sends the tag
//!    followed by frames
//! 2. Incoming: [`read_tag`] reads the tag, [`TransportKeyManager::recognize`]
//!    matches it against every candidate key and consumes the connection
//!    number, then a [`StreamReader`] opens the frames
//! 3. Either side erases the connection's keys when the stream closes or
//!    fails

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod context;
pub mod env;
pub mod error;
pub mod event;
pub mod ids;
pub mod manager;
pub mod replay;
pub mod schedule;
pub mod store;
pub mod stream;
pub mod window;

pub use context::ConnectionContext;
pub use env::{Environment, SystemEnv};
pub use error::TransportError;
pub use event::KeyEvent;
pub use ids::{ContactId, TransportId};
pub use manager::{Candidate, PeekedConnection, Recognized, TransportKeyManager};
pub use replay::{MAX_WINDOW_SIZE, ReorderingWindow};
pub use schedule::{
    ContactRegistration, MAX_CONNECTIONS_PER_PERIOD, OutgoingPhase, PreparedOutgoing,
    TransportKeySet,
};
pub use store::{KeyStore, MemoryKeyStore, PeriodRecord, StoreError, TransportKeyRecord};
pub use stream::{
    DEFAULT_READ_TIMEOUT, PaddingPolicy, StreamConfig, StreamReader, StreamWriter, read_tag,
};
pub use window::{
    DEFAULT_CLOCK_DIFF_DAMPING, DEFAULT_MAX_CLOCK_SKEW, DEFAULT_REORDERING_WINDOW_SIZE,
    DEFAULT_SKEW_ALERT_THRESHOLD, DEFAULT_WINDOW_RADIUS, MAX_WINDOW_RADIUS, MIN_PERIOD_LENGTH,
    RotationConfig, RotationWindow, TransportParams,
};
