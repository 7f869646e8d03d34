pub mod pipeline;
pub mod ws_listener;
