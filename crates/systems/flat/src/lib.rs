//! Flat-memory MIPS I machine.
//!
//! This crate ties the `mips-core` CPU to a flat byte-vector memory loaded
//! from a raw, headerless binary of big-endian instruction words:
//!
//! - **CPU**: MIPS I integer core from `mips-core`
//! - **Memory**: bounds-checked byte vector sized by the loaded image
//! - **Loader**: copies the binary verbatim to address 0
//! - **Driver**: bounded or unbounded fetch-decode-execute stepping
//!
//! The machine is strictly single-threaded; each step runs to completion
//! and mutates the state in place.

mod memory;

use mips_core::cpu_mips_i::{CpuError, CpuMipsI, SyscallHandler};
use mips_core::logging::{log, LogCategory, LogLevel};
use mips_core::types::CpuSnapshot;
use mips_core::System;
use thiserror::Error;

pub use memory::FlatMemory;

/// Largest loadable binary: the full 32-bit address space minus one byte.
pub const MAX_IMAGE_BYTES: u64 = u32::MAX as u64;

#[derive(Error, Debug)]
pub enum FlatError {
    #[error("binary image is {size} bytes, exceeding the 4 GiB addressable limit")]
    ImageTooLarge { size: u64 },
    #[error("failed to read binary image: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Exec(#[from] CpuError),
}

/// Flat MIPS I machine: CPU plus loader-populated memory.
pub struct FlatSystem {
    cpu: CpuMipsI<FlatMemory>,
    start_pc: u32,
}

impl FlatSystem {
    /// Create a machine whose execution starts at `start_pc`.
    ///
    /// Not all systems start at address 0; a loader may reserve the low
    /// part of the address space.
    pub fn new(start_pc: u32) -> Self {
        let mut cpu = CpuMipsI::new(FlatMemory::new());
        cpu.pc = start_pc;
        Self { cpu, start_pc }
    }

    /// Register the handler invoked by the `syscall` instruction.
    pub fn set_syscall_handler(&mut self, handler: Box<dyn SyscallHandler>) {
        self.cpu.set_syscall_handler(handler);
    }

    /// Load a raw binary image from a file into memory at index 0.
    pub fn load_image_from_path<P: AsRef<std::path::Path>>(
        &mut self,
        path: P,
    ) -> Result<(), FlatError> {
        let data = std::fs::read(path)?;
        self.load_image(&data)
    }

    /// Copy a binary image verbatim into memory at index 0 and reset the
    /// CPU to the configured start address.
    pub fn load_image(&mut self, data: &[u8]) -> Result<(), FlatError> {
        check_image_size(data.len() as u64)?;

        self.cpu.memory = FlatMemory::from_image(data);
        self.reset();

        log(LogCategory::Memory, LogLevel::Info, || {
            format!(
                "loaded {} byte image, execution starts at {:#010X}",
                data.len(),
                self.start_pc
            )
        });
        Ok(())
    }

    /// Extend memory by `extra` zero bytes above the loaded image, e.g.
    /// as stack headroom. The core imposes no stack layout; the program
    /// chooses what `$sp` points at.
    pub fn grow_memory(&mut self, extra: usize) {
        let size = self.cpu.memory.len() + extra;
        self.cpu.memory.grow_to(size);
    }

    /// Run until a fatal error. Only the driver refusing to step again
    /// stops a well-formed program; there is no halt instruction.
    pub fn run_forever(&mut self) -> Result<(), FlatError> {
        loop {
            self.cpu.step()?;
        }
    }

    pub fn cpu(&self) -> &CpuMipsI<FlatMemory> {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut CpuMipsI<FlatMemory> {
        &mut self.cpu
    }
}

impl Default for FlatSystem {
    fn default() -> Self {
        Self::new(0)
    }
}

fn check_image_size(size: u64) -> Result<(), FlatError> {
    if size > MAX_IMAGE_BYTES {
        return Err(FlatError::ImageTooLarge { size });
    }
    Ok(())
}

impl System for FlatSystem {
    type Error = FlatError;

    fn reset(&mut self) {
        self.cpu.reset();
        self.cpu.pc = self.start_pc;
    }

    fn run(&mut self, steps: u64) -> Result<u64, Self::Error> {
        for _ in 0..steps {
            self.cpu.step()?;
        }
        Ok(steps)
    }

    fn save_state(&self) -> serde_json::Value {
        serde_json::json!({
            "version": 1,
            "cpu": self.cpu.snapshot(),
        })
    }

    fn load_state(&mut self, v: &serde_json::Value) -> Result<(), serde_json::Error> {
        let snap: CpuSnapshot = serde_json::from_value(v["cpu"].clone())?;
        self.cpu.restore(&snap);
        Ok(())
    }
}
