//! Query API over the local mirror
//!
//! Read-only functions for the CLI and other front ends.

mod senders;

pub use senders::{SenderAggregate, aggregate_by_sender, messages_from_sender, senders_by_size};
