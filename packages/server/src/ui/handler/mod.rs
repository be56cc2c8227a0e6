//! Request handlers.

mod bridge;
mod http;
mod internal;
mod websocket;

pub use bridge::bridge_handler;
pub use http::{
    add_room_member, get_room_online, get_stats, get_user_online, health_check, publish_event,
    remove_room_member,
};
pub use internal::require_internal_token;
pub use websocket::websocket_handler;
