use actix::Message as ActixMessage;
use std::sync::Arc;

/// A serialized outbound frame. Serialized once, shared across every
/// target connection's mailbox.
#[derive(ActixMessage, Clone)]
#[rtype(result = "()")]
pub struct Frame(pub Arc<String>);
