pub mod clock;
pub mod connection;
pub mod dispatcher;
pub mod rating;
pub mod rooms;
pub mod settlement;

use std::sync::Arc;

use globaltalk_db::Database;

use crate::dispatcher::Dispatcher;
use crate::rooms::RoomRegistry;

/// Everything the socket layer needs to serve one connection.
#[derive(Clone)]
pub struct GatewayState {
    pub dispatcher: Dispatcher,
    pub rooms: Arc<RoomRegistry>,
    pub db: Arc<Database>,
    /// App id of the external conferencing SDK, handed to clients on join.
    pub agora_app_id: Option<String>,
}
