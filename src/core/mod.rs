pub mod consumer;
pub mod cursor;
pub mod delivery;
pub mod error;
pub mod listeners;
pub mod message;
pub mod ownership;
pub mod queue;
pub mod session;
