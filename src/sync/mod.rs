//! Client-side chat synchronization.
//!
//! A [`client::ChatClient`] applies every action to its local
//! [`session::ChatSession`] first, then confirms it with the server through a
//! [`transport::ChatTransport`]. Failures restore the state captured right
//! before the action; events from the gateway are merged idempotently.

pub mod client;
pub mod error;
pub mod session;
pub mod transport;
