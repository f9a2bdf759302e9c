pub mod connection;
pub mod error;
pub mod gateway;
pub mod registry;
mod session;
mod video;

#[cfg(test)]
mod testing;
