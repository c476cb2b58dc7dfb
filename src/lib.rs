//! Email alerter: watches Gmail inboxes, scores new mail with Claude and
//! pushes the important ones to Pushover.

pub mod api;
pub mod config;
pub mod deploy;
pub mod error;
pub mod jobs;
pub mod llm;
pub mod mail;
pub mod notify;
pub mod pipeline;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod store;

#[cfg(test)]
mod testing;
