//! Conversations between riders and stable owners.

mod model;
mod traits;

pub use model::{ConversationDetails, Message};
pub use traits::ConversationRepositoryTrait;
