pub mod engine;
pub mod wire;

pub use engine::{ProbeConfig, ProbeEngine};
pub use wire::{Ping, Pong};
