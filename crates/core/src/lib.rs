//! Core interpreter primitives and traits.

pub mod cpu_mips_i;
pub mod instruction;
pub mod logging;

pub mod types {
    use serde::{Deserialize, Serialize};

    /// A serializable snapshot of the architectural CPU state.
    ///
    /// Memory is deliberately excluded; snapshots are debugging aids, not
    /// full machine images.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct CpuSnapshot {
        pub gpr: [u32; 32],
        pub pc: u32,
        pub hi: u32,
        pub lo: u32,
        pub steps: u64,
    }
}

use serde_json::Value;

/// A CPU-like component that can be stepped one instruction at a time.
pub trait Cpu {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Return the core to its power-on state.
    fn reset(&mut self);

    /// Execute exactly one fetch-decode-execute step.
    fn step(&mut self) -> Result<(), Self::Error>;
}

/// A high-level System trait tying components together.
pub trait System {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Reset to initial power-on state
    fn reset(&mut self);

    /// Run up to `steps` instructions; returns the number retired.
    fn run(&mut self, steps: u64) -> Result<u64, Self::Error>;

    /// Return a JSON-serializable save state for debugging.
    fn save_state(&self) -> Value;

    /// Load a JSON save state.
    fn load_state(&mut self, v: &Value) -> Result<(), serde_json::Error>;
}
