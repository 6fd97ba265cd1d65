//! Single-room line broadcast hub.
//!
//! Clients connect over TCP and every line one of them sends is relayed to
//! all the others, prefixed with the sender's address. Each module focuses
//! on a concrete responsibility:
//!
//! - [`hub`] owns the set of connected clients. All membership changes and
//!   fan-out go through its single control loop, so no locks are involved.
//! - [`peer`] defines the per-client handle (an outgoing line queue) and the
//!   writer task that drains it into the socket.
//! - [`session`] runs one connection from welcome to departure.
//! - [`server`] accepts connections and spawns a session for each.
//! - [`message`] builds the lines the hub sends.
//! - [`cli`] and [`client`] provide the command-line interface and a small
//!   terminal client.

pub mod cli;
pub mod client;
pub mod hub;
pub mod message;
pub mod peer;
pub mod server;
pub mod session;
