//! # parley-core
//!
//! Message routing and connection lifecycle for the Parley chat service.
//!
//! - **Router** - Single task that owns the user directory and routes messages
//! - **User** - Registration record carrying a user's channels
//! - **Pumps** - Receiver and sender loops bridging a connection and channels
//! - **Handler** - Identification, registration, and teardown per connection
//!
//! ## Architecture
//!
//! ```text
//!              ┌──────────┐  inbound  ┌──────────┐  outbound  ┌──────────┐
//! client A ───▶│ Receiver │──────────▶│  Router  │───────────▶│  Sender  │───▶ client B
//!              └──────────┘  notify   └──────────┘            └──────────┘
//! ```

pub mod handler;
pub mod pump;
pub mod router;
pub mod user;

pub use handler::{ConnectionHandler, ConnectionState, HandlerConfig, HandlerError, SessionSummary};
pub use parley_protocol::Message;
pub use pump::{run_receiver, run_sender, DisconnectReason};
pub use router::{Router, RouterConfig, RouterError, RouterEvent, RouterHandle, RouterStats};
pub use user::{SessionId, User, UserEndpoints, Username};
