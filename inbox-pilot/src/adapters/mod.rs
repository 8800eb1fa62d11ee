pub mod imap;
pub mod ollama;
pub mod sqlite;
