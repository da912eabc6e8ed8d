//! Mailbox mutations
//!
//! Deletion goes to the server first, then to the local mirror.

mod handler;

pub use handler::{ActionHandler, DeleteReport};
