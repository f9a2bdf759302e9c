//! Shared vocabulary for parley: wire events, the chat message model, room
//! keys, and the storage seams the gateway consumes.

pub mod events;
pub mod models;
pub mod rooms;
pub mod store;
