use actix::{Message as ActixMessage, Recipient};

use crate::events::ClientEvent;
use crate::messages::session::Frame;
use crate::registry::{ConnectionId, UserId};

/// Registers an authenticated connection with the relay. Rejected when
/// the connection id is already taken, so the session must not touch the
/// relay further until the reply arrives.
#[derive(ActixMessage)]
#[rtype(result = "Result<(), String>")]
pub struct Connect {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub addr: Recipient<Frame>,
    pub disconnect_addr: Recipient<ForceDisconnect>,
}

#[derive(ActixMessage)]
#[rtype(result = "()")]
pub struct Disconnect {
    pub connection_id: ConnectionId,
}

/// One parsed inbound frame from an authenticated connection.
#[derive(ActixMessage)]
#[rtype(result = "()")]
pub struct Inbound {
    pub connection_id: ConnectionId,
    pub event: ClientEvent,
}

/// Server-initiated disconnect, used when the relay's tables and the
/// session disagree about a connection.
#[derive(ActixMessage, Clone, Copy)]
#[rtype(result = "()")]
pub struct ForceDisconnect;
