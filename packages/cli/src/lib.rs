//! Terminal frontend for the chat client library.

pub mod formatter;
pub mod logger;
pub mod ui;
