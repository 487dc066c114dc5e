//! WebSocket wire format shared by the gateway and browser clients.

pub mod events;
pub mod frames;
pub mod handshake;
pub mod methods;
