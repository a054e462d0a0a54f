pub mod account;
pub mod action;
pub mod batch;
pub mod common;
pub mod context;
pub mod database;
pub mod draft;
pub mod envelope;
pub mod error;
pub mod events;
pub mod imap;
pub mod indexer;
pub mod logger;
pub mod mailbox;
pub mod mime;
pub mod outbound;
pub mod scheduler;
pub mod settings;
pub mod smtp;
pub mod snooze;
pub mod sync;
pub mod utils;
