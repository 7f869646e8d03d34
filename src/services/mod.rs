pub mod order_fill_poller;
pub mod position_monitor;
