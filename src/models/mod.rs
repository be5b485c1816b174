//! Domain models shared by the source adapters, the engine and the store.

pub mod tick;

pub use tick::{RawTick, Tick};
