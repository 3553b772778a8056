//! Resilient socket connection and command routing for termhub
//!
//! The [`ConnectionManager`] owns at most one live socket and reconnects it on
//! a fixed schedule. It never performs I/O itself: sockets go through a
//! [`Transport`] and delays through a [`Scheduler`], so the same state machine
//! runs against tokio-tungstenite in production and against in-memory fakes in
//! tests.

pub mod endpoint;
pub mod manager;
pub mod router;
pub mod testing;
pub mod timer;
pub mod transport;
pub mod ws;

pub use endpoint::EndpointResolver;
pub use manager::{ConnectionManager, ConnectionMode, ConnectionOptions, ConnectionSignal, Link};
pub use router::{CommandRouter, DispatchOutcome, Registration, RouteKey};
pub use timer::{Scheduler, TimerId, TokioScheduler};
pub use transport::{Incoming, SocketEvent, SocketFailure, SocketId, Transport, TransportEvent};
pub use ws::WsTransport;
