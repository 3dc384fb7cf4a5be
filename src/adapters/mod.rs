// Adapters layer: concrete implementations for the host (processes, container engine) and HTTP.

pub mod client;
pub mod http;
pub mod launcher;
pub mod port_source;
