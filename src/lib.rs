//! flash-policyd: a Flash cross-domain socket policy file server.
//!
//! Serves a fixed, NUL-terminated cross-domain policy document to any
//! client that sends the 23-byte `<policy-file-request/>\0` handshake over
//! a raw TCP connection, and echoes any other input back verbatim.
//!
//! Features:
//! - Policy document from a configured file or a built-in default
//! - Bounded connection concurrency with immediate rejection when saturated
//! - Graceful shutdown that drains in-flight connections
//! - Configuration via CLI arguments or TOML file

pub mod config;
pub mod handler;
pub mod policy;
pub mod server;

pub use config::Config;
pub use policy::{PolicyDocument, POLICY_REQUEST};
pub use server::PolicyServer;
