//! Domain models for the mirrored mailbox

mod message;
mod sync_state;

pub use message::{Message, MessageBuilder, MessageId, Sender, ThreadId};
pub use sync_state::SyncState;
