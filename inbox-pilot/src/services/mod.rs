//! Business logic services
//!
//! Nothing here talks to IMAP, SQLite or Ollama directly; the coordinator
//! works against the traits in `mailbox`, `classifier` and `persistence`,
//! and the adapters implement them.

pub mod classifier;
pub mod coordinator;
pub mod mailbox;
pub mod persistence;
pub mod run_lock;
pub mod trace;
pub mod users;
