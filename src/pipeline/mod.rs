//! Mail processing pipeline.
//!
//! A check cycle flows through:
//! 1. `MailSource::fetch_new()` per active account
//! 2. sender lists: blacklisted senders are dropped, whitelisted ones boosted
//! 3. `Scorer::score()`: one LLM call plus learned adjustments
//! 4. `GateConfig::decide()`: alert now, hold for the digest, or just record
//!
//! The daily digest and feedback learning live alongside.

pub mod accounts;
pub mod checker;
pub mod digest;
pub mod feedback;
pub mod gate;
pub mod scorer;
pub mod sender_lists;

pub use checker::{AccountResult, CheckSummary, Checker};
pub use digest::{DigestOutcome, DigestSender};
pub use gate::{Alerter, GateConfig, GateDecision};
pub use scorer::Scorer;
