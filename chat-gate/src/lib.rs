//! chat-gate: per-user message quota for the chat endpoints
//!
//! Sits in front of the chat service and turns away `/chat` and
//! `/chat_stream` requests from users who have used up their message
//! allowance. Everything else is forwarded untouched.
//!
//! # Features
//!
//! - Exact-match gating of the chat routes
//! - Per-user ceilings from the database, default 100 when unset
//! - Fail-closed on lookup errors (500), 429 when over quota
//! - Explicit admission pipeline, testable without a server
//! - Health and readiness endpoints
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! listen_addr = "0.0.0.0:8080"
//!
//! [database]
//! url = "sqlite:///var/lib/chat/chat.db"
//!
//! [quota]
//! default_limit = 100
//! gated_paths = ["/chat", "/chat_stream"]
//!
//! [identity]
//! header = "x-user-id"
//!
//! [backend]
//! url = "http://localhost:3000"
//! health_check = "/health"
//! ```
//!
//! # Modules
//!
//! - [`admission`]: The quota decision
//! - [`pipeline`]: Ordered admission stages and the axum adapter
//! - [`identity`]: Typed request identity
//! - [`store`]: Message count and rate limit sources
//! - [`server`]: HTTP server wiring

pub mod admission;
pub mod config;
pub mod error;
pub mod forward;
pub mod health;
pub mod identity;
pub mod pipeline;
pub mod server;
pub mod store;

pub use admission::{Admission, AdmissionCheck};
pub use config::GateConfig;
pub use error::{AdmissionError, GateError, Result};
pub use pipeline::{Pipeline, Stage};
pub use server::GateServer;
