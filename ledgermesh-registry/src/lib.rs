//! # LedgerMesh Registry
//!
//! The centralised cluster directory: a single HTTP service, authoritative
//! for membership and reputation. Peers register on startup, deregister on
//! shutdown, and push reputation adjustments at the close of each consensus
//! round; everyone's in-memory peer directory is a cache of this service's
//! view.
//!
//! The crate ships both halves of the conversation:
//!
//! - [`RegistryService`]: the axum server (also available as the
//!   `ledgermesh-registry` binary)
//! - [`RegistryClient`]: the reqwest client SDK the peers and the admin
//!   CLI use
//!
//! ## Endpoints
//!
//! | Method | Path | Behaviour |
//! |---|---|---|
//! | POST | `/register` | 201 new, 200 same URL again, 409 conflicting URL |
//! | POST | `/deregister` | 200, 404 if absent |
//! | GET | `/nodes` | `node_id → {url, reputation}` |
//! | GET | `/total_nodes` | `{"total_nodes": N}` |
//! | POST | `/reputation/increase` | default +10, capped at 100 |
//! | POST | `/reputation/decrease` | default −20, floored at 0 |
//! | GET | `/reputation/{node_id}` | `{"node_id", "reputation"}` |
//!
//! New peers start at reputation 100.

mod client;
mod server;

pub use client::{RegisterOutcome, RegistryClient, RegistryError};
pub use server::{NodeEntry, RegistryConfig, RegistryService, DEFAULT_REPUTATION};
