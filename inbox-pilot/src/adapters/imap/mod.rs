//! IMAP mailbox access: implicit TLS, LOGIN, read-only EXAMINE.

mod client;
pub mod connection;
pub mod messages;

pub use client::ImapMailbox;
