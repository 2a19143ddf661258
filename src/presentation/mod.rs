// Presentation layer - Network entry points
pub mod udp_listener;
