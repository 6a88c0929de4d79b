mod handler;
mod heartbeat;
pub mod manager;
pub mod protocol;
pub mod rooms;

pub use handler::ws_handler;
pub use heartbeat::{reap_stale, start_heartbeat};
pub use manager::{ConnectionRegistry, Delivery};
pub use rooms::RoomRouter;
