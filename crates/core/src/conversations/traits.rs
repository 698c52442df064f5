use super::model::ConversationDetails;
use crate::errors::Result;

pub trait ConversationRepositoryTrait: Send + Sync {
    fn get_conversation(&self, conversation_id: &str) -> Result<Option<ConversationDetails>>;
}
