//! Real-time fan-out for live quiz rooms.
//!
//! ```text
//! HubActor (singleton)
//! └── owns every Room, keyed by quiz code
//!     └── one bounded outbound queue per connection
//!         └── connection pump (writer task + reader loop)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single owner**: all membership changes go through the hub mailbox
//! - **Never block on a slow client**: a full outbound queue drops the connection
//! - **CancellationToken propagation**: connection pumps use child tokens of the hub
//!
//! # Modules
//!
//! - [`hub`] - `HubActor` and its handle
//! - [`connection`] - per-connection read/write pump
//! - [`envelope`] - `{type, data}` wire events in both directions
//! - [`messages`] - hub mailbox messages and registration types

pub mod connection;
pub mod envelope;
pub mod hub;
pub mod messages;

pub use connection::{run_connection, ConnectionContext, InboundHandler};
pub use envelope::{ClientMessage, EnvelopeError, QuestionPayload, ServerEvent};
pub use hub::{DepartureHandler, HubActor, HubHandle};
pub use messages::*;
