mod handlers;
mod routes;
mod ws;

pub use routes::create_router;
pub use ws::{ws_handler, SignalingHub};
