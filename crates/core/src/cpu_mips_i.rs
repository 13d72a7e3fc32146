//! MIPS I CPU core implementation
//!
//! This module provides a reusable MIPS I interpreter core for big-endian,
//! flat-memory machines.
//!
//! The modeled subset is a 32-bit MIPS I integer pipeline with:
//! - 32 general-purpose 32-bit registers (R0 hardwired to zero)
//! - HI/LO multiply/divide registers
//! - a byte-addressed program counter
//!
//! Timing is not modeled: each instruction is a single atomic step. Branch
//! and load delay slots are not emulated; a branch or jump takes effect on
//! the very next step, so programs must tolerate the delay position being
//! skipped (the usual convention is a `nop` there).

use crate::instruction::Instruction;
use crate::logging::{log, LogCategory, LogLevel};
use thiserror::Error;

/// Raised when a memory access falls outside the backing store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("memory access out of bounds: {len}-byte access at {addr:#010X}, memory size {size:#X}")]
pub struct OutOfBounds {
    pub addr: u32,
    pub len: u32,
    pub size: usize,
}

/// Fatal execution errors. None of these are recoverable; callers surface
/// them as program termination with a nonzero exit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CpuError {
    #[error("unknown opcode {opcode:#04X} in word {word:#010X} at pc {pc:#010X}")]
    UnknownOpcode { opcode: u32, word: u32, pc: u32 },

    #[error("unknown funct {funct:#04X} in word {word:#010X} at pc {pc:#010X}")]
    UnknownFunct { funct: u32, word: u32, pc: u32 },

    /// `addi` is the trapping add-immediate; this core only implements the
    /// non-trapping `addiu`.
    #[error("addi is not implemented in word {word:#010X} at pc {pc:#010X}; use addiu")]
    UnimplementedAddi { word: u32, pc: u32 },

    #[error(transparent)]
    Memory(#[from] OutOfBounds),
}

/// Memory interface trait for the MIPS I CPU
///
/// Systems using the core must implement this trait to provide memory
/// access. Multi-byte accesses are big-endian: the byte at the lowest
/// address is the most significant. Implementations must not let a failed
/// multi-byte write be partially observable.
pub trait Memory {
    /// Read a byte from memory at the given address
    fn read_byte(&self, addr: u32) -> Result<u8, OutOfBounds>;

    /// Read a halfword (16-bit) from memory at the given address
    fn read_halfword(&self, addr: u32) -> Result<u16, OutOfBounds>;

    /// Read a word (32-bit) from memory at the given address
    fn read_word(&self, addr: u32) -> Result<u32, OutOfBounds>;

    /// Write a byte to memory at the given address
    fn write_byte(&mut self, addr: u32, val: u8) -> Result<(), OutOfBounds>;

    /// Write a halfword (16-bit) to memory at the given address
    fn write_halfword(&mut self, addr: u32, val: u16) -> Result<(), OutOfBounds>;

    /// Write a word (32-bit) to memory at the given address
    fn write_word(&mut self, addr: u32, val: u32) -> Result<(), OutOfBounds>;
}

/// Hook invoked by the `syscall` instruction.
///
/// The default handler is a no-op; host integration (program termination,
/// console I/O, heap services) is layered on top by registering a handler
/// at machine construction.
pub trait SyscallHandler {
    /// Handle one `syscall`. Conventionally the call number and arguments
    /// are read from the register file.
    fn syscall(&mut self, gpr: &mut [u32; 32], memory: &mut dyn Memory) -> Result<(), OutOfBounds>;
}

/// Default syscall handler: does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopSyscall;

impl SyscallHandler for NopSyscall {
    fn syscall(
        &mut self,
        _gpr: &mut [u32; 32],
        _memory: &mut dyn Memory,
    ) -> Result<(), OutOfBounds> {
        Ok(())
    }
}

/// MIPS I CPU state and execution engine
pub struct CpuMipsI<M: Memory> {
    /// General-purpose registers (R0-R31)
    /// Note: R0 is always zero
    pub gpr: [u32; 32],

    /// Program counter (byte address of the next fetch)
    pub pc: u32,

    /// HI register (upper multiply result / division remainder)
    pub hi: u32,

    /// LO register (lower multiply result / division quotient)
    pub lo: u32,

    /// Total instructions retired
    pub steps: u64,

    /// Memory interface
    pub memory: M,

    syscall_handler: Box<dyn SyscallHandler>,
}

impl<M: Memory> CpuMipsI<M> {
    /// Create a new MIPS I CPU with the given memory interface.
    ///
    /// All registers start at zero and the PC at address 0; systems that
    /// place their entry point elsewhere set `pc` after construction.
    pub fn new(memory: M) -> Self {
        Self {
            gpr: [0; 32],
            pc: 0,
            hi: 0,
            lo: 0,
            steps: 0,
            memory,
            syscall_handler: Box::new(NopSyscall),
        }
    }

    /// Register the handler invoked by the `syscall` instruction.
    pub fn set_syscall_handler(&mut self, handler: Box<dyn SyscallHandler>) {
        self.syscall_handler = handler;
    }

    /// Reset the CPU to initial power-on state. Memory is left untouched.
    pub fn reset(&mut self) {
        self.gpr = [0; 32];
        self.pc = 0;
        self.hi = 0;
        self.lo = 0;
        self.steps = 0;
    }

    /// Capture the architectural state (registers only, no memory).
    pub fn snapshot(&self) -> crate::types::CpuSnapshot {
        crate::types::CpuSnapshot {
            gpr: self.gpr,
            pc: self.pc,
            hi: self.hi,
            lo: self.lo,
            steps: self.steps,
        }
    }

    /// Restore a previously captured architectural state.
    pub fn restore(&mut self, snap: &crate::types::CpuSnapshot) {
        self.gpr = snap.gpr;
        self.pc = snap.pc;
        self.hi = snap.hi;
        self.lo = snap.lo;
        self.steps = snap.steps;
        self.gpr[0] = 0;
    }

    /// Execute a single fetch-decode-execute step.
    ///
    /// The PC is advanced by 4 right after the fetch; branch and jump
    /// handlers then adjust or overwrite it.
    pub fn step(&mut self) -> Result<(), CpuError> {
        let instr_pc = self.pc;

        // Fetch instruction (big-endian word at PC)
        let instr = Instruction(self.memory.read_word(instr_pc)?);

        log(LogCategory::Cpu, LogLevel::Trace, || {
            format!(
                "pc={:#010X} word={} op={:#04X}",
                instr_pc,
                instr,
                instr.opcode()
            )
        });

        self.pc = self.pc.wrapping_add(4);

        // Decode primary opcode (bits 26-31)
        match instr.opcode() {
            0x00 => self.execute_special(instr, instr_pc)?, // R-type instructions
            0x02 => self.execute_j(instr),                  // J
            0x03 => self.execute_jal(instr),                // JAL
            0x04 => self.execute_beq(instr),                // BEQ
            0x05 => self.execute_bne(instr),                // BNE
            0x06 => self.execute_blez(instr),               // BLEZ
            0x07 => self.execute_bgtz(instr),               // BGTZ
            0x08 => {
                // ADDI - reserved for the trapping add-immediate
                return Err(CpuError::UnimplementedAddi {
                    word: instr.raw(),
                    pc: instr_pc,
                });
            }
            0x09 => self.execute_addiu(instr), // ADDIU
            0x0E => self.execute_xori(instr),  // XORI
            0x0F => self.execute_lui(instr),   // LUI
            0x20 => self.execute_lb(instr)?,   // LB
            0x21 => self.execute_lh(instr)?,   // LH
            0x23 => self.execute_lw(instr)?,   // LW
            0x24 => self.execute_lbu(instr)?,  // LBU
            0x25 => self.execute_lhu(instr)?,  // LHU
            0x28 => self.execute_sb(instr)?,   // SB
            0x29 => self.execute_sh(instr)?,   // SH
            0x2B => self.execute_sw(instr)?,   // SW
            opcode => {
                return Err(CpuError::UnknownOpcode {
                    opcode,
                    word: instr.raw(),
                    pc: instr_pc,
                });
            }
        }

        // R0 is always zero
        self.gpr[0] = 0;

        self.steps += 1;
        Ok(())
    }

    /// Execute SPECIAL opcode instructions (opcode = 0x00)
    fn execute_special(&mut self, instr: Instruction, instr_pc: u32) -> Result<(), CpuError> {
        let rs = instr.rs();
        let rt = instr.rt();
        let rd = instr.rd();

        match instr.funct() {
            0x00 => {
                // SLL - Shift Left Logical (the all-zero word is the canonical nop)
                self.gpr[rd] = self.gpr[rt].wrapping_shl(instr.shamt());
            }
            0x02 => {
                // SRL - Shift Right Logical
                self.gpr[rd] = self.gpr[rt].wrapping_shr(instr.shamt());
            }
            0x08 => {
                // JR - Jump Register (no alignment check; a misaligned
                // target is undefined behavior for this core)
                self.pc = self.gpr[rs];
            }
            0x09 => {
                // JALR - Jump And Link Register
                let target = self.gpr[rs];
                self.gpr[rd] = self.pc;
                self.pc = target;
            }
            0x0C => {
                // SYSCALL - delegate to the registered handler
                log(LogCategory::Syscall, LogLevel::Debug, || {
                    format!("syscall at pc {:#010X}", instr_pc)
                });
                self.syscall_handler.syscall(&mut self.gpr, &mut self.memory)?;
            }
            0x10 => {
                // MFHI - Move From HI
                self.gpr[rd] = self.hi;
            }
            0x11 => {
                // MTHI - Move To HI
                self.hi = self.gpr[rs];
            }
            0x12 => {
                // MFLO - Move From LO
                self.gpr[rd] = self.lo;
            }
            0x13 => {
                // MTLO - Move To LO
                self.lo = self.gpr[rs];
            }
            0x18 => {
                // MULT - Multiply (signed 64-bit product split across HI:LO)
                let a = self.gpr[rs] as i32 as i64;
                let b = self.gpr[rt] as i32 as i64;
                let product = a.wrapping_mul(b);
                self.lo = product as u32;
                self.hi = (product >> 32) as u32;
            }
            0x19 => {
                // MULTU - Multiply Unsigned
                let a = self.gpr[rs] as u64;
                let b = self.gpr[rt] as u64;
                let product = a.wrapping_mul(b);
                self.lo = product as u32;
                self.hi = (product >> 32) as u32;
            }
            0x1A => {
                // DIV - Divide. MIPS I leaves HI/LO undefined on a zero
                // divisor; this core leaves them unchanged.
                let dividend = self.gpr[rs] as i32;
                let divisor = self.gpr[rt] as i32;
                if divisor != 0 {
                    self.lo = dividend.wrapping_div(divisor) as u32;
                    self.hi = dividend.wrapping_rem(divisor) as u32;
                } else {
                    log(LogCategory::Cpu, LogLevel::Warn, || {
                        format!("div by zero at pc {:#010X}, HI/LO unchanged", instr_pc)
                    });
                }
            }
            0x1B => {
                // DIVU - Divide Unsigned
                let dividend = self.gpr[rs];
                let divisor = self.gpr[rt];
                if divisor != 0 {
                    self.lo = dividend / divisor;
                    self.hi = dividend % divisor;
                } else {
                    log(LogCategory::Cpu, LogLevel::Warn, || {
                        format!("divu by zero at pc {:#010X}, HI/LO unchanged", instr_pc)
                    });
                }
            }
            0x20 => {
                // ADD - Add. MIPS I traps on signed overflow; this core
                // wraps instead.
                let a = self.gpr[rs] as i32;
                let b = self.gpr[rt] as i32;
                self.gpr[rd] = a.wrapping_add(b) as u32;
            }
            0x21 => {
                // ADDU - Add Unsigned
                self.gpr[rd] = self.gpr[rs].wrapping_add(self.gpr[rt]);
            }
            0x24 => {
                // AND
                self.gpr[rd] = self.gpr[rs] & self.gpr[rt];
            }
            0x25 => {
                // OR
                self.gpr[rd] = self.gpr[rs] | self.gpr[rt];
            }
            0x26 => {
                // XOR
                self.gpr[rd] = self.gpr[rs] ^ self.gpr[rt];
            }
            0x27 => {
                // NOR
                self.gpr[rd] = !(self.gpr[rs] | self.gpr[rt]);
            }
            0x29 => {
                // SLTU - Set on Less Than Unsigned
                self.gpr[rd] = u32::from(self.gpr[rs] < self.gpr[rt]);
            }
            0x2A => {
                // SLT - Set on Less Than
                self.gpr[rd] = u32::from((self.gpr[rs] as i32) < (self.gpr[rt] as i32));
            }
            funct => {
                return Err(CpuError::UnknownFunct {
                    funct,
                    word: instr.raw(),
                    pc: instr_pc,
                });
            }
        }
        Ok(())
    }

    // ============================================================================
    // J-Type Instructions
    // ============================================================================

    /// Execute J - Jump
    ///
    /// The 26-bit target (already shifted) replaces the low 28 bits of the
    /// PC; the upper four bits are preserved.
    fn execute_j(&mut self, instr: Instruction) {
        self.pc = (self.pc & 0xF000_0000) | instr.target();
    }

    /// Execute JAL - Jump And Link
    fn execute_jal(&mut self, instr: Instruction) {
        self.gpr[31] = self.pc;
        self.pc = (self.pc & 0xF000_0000) | instr.target();
    }

    // ============================================================================
    // I-Type Instructions
    // ============================================================================

    /// Branch offset: the sign-extended immediate in words, as a byte delta.
    fn branch_offset(instr: Instruction) -> u32 {
        instr.imm_sign_ext().wrapping_shl(2)
    }

    /// Execute BEQ - Branch on Equal
    fn execute_beq(&mut self, instr: Instruction) {
        if self.gpr[instr.rs()] == self.gpr[instr.rt()] {
            self.pc = self.pc.wrapping_add(Self::branch_offset(instr));
        }
    }

    /// Execute BNE - Branch on Not Equal
    fn execute_bne(&mut self, instr: Instruction) {
        if self.gpr[instr.rs()] != self.gpr[instr.rt()] {
            self.pc = self.pc.wrapping_add(Self::branch_offset(instr));
        }
    }

    /// Execute BLEZ - Branch on Less Than or Equal to Zero
    fn execute_blez(&mut self, instr: Instruction) {
        if (self.gpr[instr.rs()] as i32) <= 0 {
            self.pc = self.pc.wrapping_add(Self::branch_offset(instr));
        }
    }

    /// Execute BGTZ - Branch on Greater Than Zero
    fn execute_bgtz(&mut self, instr: Instruction) {
        if (self.gpr[instr.rs()] as i32) > 0 {
            self.pc = self.pc.wrapping_add(Self::branch_offset(instr));
        }
    }

    /// Execute ADDIU - Add Immediate Unsigned
    ///
    /// The immediate is sign-extended; two's-complement overflow is ignored.
    fn execute_addiu(&mut self, instr: Instruction) {
        self.gpr[instr.rt()] = self.gpr[instr.rs()].wrapping_add(instr.imm_sign_ext());
    }

    /// Execute XORI - XOR Immediate (immediate zero-extended)
    fn execute_xori(&mut self, instr: Instruction) {
        self.gpr[instr.rt()] = self.gpr[instr.rs()] ^ u32::from(instr.imm());
    }

    /// Execute LUI - Load Upper Immediate
    fn execute_lui(&mut self, instr: Instruction) {
        self.gpr[instr.rt()] = u32::from(instr.imm()) << 16;
    }

    // ============================================================================
    // Load/Store Instructions
    // ============================================================================

    /// Base register plus sign-extended displacement.
    fn effective_address(&self, instr: Instruction) -> u32 {
        self.gpr[instr.rs()].wrapping_add(instr.imm_sign_ext())
    }

    /// Execute LB - Load Byte (sign-extended)
    fn execute_lb(&mut self, instr: Instruction) -> Result<(), CpuError> {
        let addr = self.effective_address(instr);
        let val = self.memory.read_byte(addr)?;
        self.gpr[instr.rt()] = val as i8 as i32 as u32;
        Ok(())
    }

    /// Execute LH - Load Halfword (sign-extended)
    fn execute_lh(&mut self, instr: Instruction) -> Result<(), CpuError> {
        let addr = self.effective_address(instr);
        let val = self.memory.read_halfword(addr)?;
        self.gpr[instr.rt()] = val as i16 as i32 as u32;
        Ok(())
    }

    /// Execute LW - Load Word
    fn execute_lw(&mut self, instr: Instruction) -> Result<(), CpuError> {
        let addr = self.effective_address(instr);
        self.gpr[instr.rt()] = self.memory.read_word(addr)?;
        Ok(())
    }

    /// Execute LBU - Load Byte Unsigned
    fn execute_lbu(&mut self, instr: Instruction) -> Result<(), CpuError> {
        let addr = self.effective_address(instr);
        self.gpr[instr.rt()] = u32::from(self.memory.read_byte(addr)?);
        Ok(())
    }

    /// Execute LHU - Load Halfword Unsigned
    ///
    /// The two bytes are composed into a 16-bit value before the
    /// zero-extension to 32 bits.
    fn execute_lhu(&mut self, instr: Instruction) -> Result<(), CpuError> {
        let addr = self.effective_address(instr);
        self.gpr[instr.rt()] = u32::from(self.memory.read_halfword(addr)?);
        Ok(())
    }

    /// Execute SB - Store Byte
    fn execute_sb(&mut self, instr: Instruction) -> Result<(), CpuError> {
        let addr = self.effective_address(instr);
        self.memory.write_byte(addr, self.gpr[instr.rt()] as u8)?;
        Ok(())
    }

    /// Execute SH - Store Halfword
    fn execute_sh(&mut self, instr: Instruction) -> Result<(), CpuError> {
        let addr = self.effective_address(instr);
        self.memory.write_halfword(addr, self.gpr[instr.rt()] as u16)?;
        Ok(())
    }

    /// Execute SW - Store Word
    fn execute_sw(&mut self, instr: Instruction) -> Result<(), CpuError> {
        let addr = self.effective_address(instr);
        self.memory.write_word(addr, self.gpr[instr.rt()])?;
        Ok(())
    }
}

impl<M: Memory> crate::Cpu for CpuMipsI<M> {
    type Error = CpuError;

    fn reset(&mut self) {
        CpuMipsI::reset(self);
    }

    fn step(&mut self) -> Result<(), CpuError> {
        CpuMipsI::step(self)
    }
}

/// Simple array-backed memory for testing and benches
///
/// Fixed 8 MB, address masked; accesses never fail. Bounds-enforcing
/// memories live with the systems that need them.
pub struct ArrayMemory {
    data: Vec<u8>,
}

impl ArrayMemory {
    const MASK: usize = 0x7F_FFFF;

    pub fn new() -> Self {
        Self {
            data: vec![0; 8 * 1024 * 1024], // 8MB
        }
    }
}

impl Default for ArrayMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory for ArrayMemory {
    fn read_byte(&self, addr: u32) -> Result<u8, OutOfBounds> {
        Ok(self.data[addr as usize & Self::MASK])
    }

    fn read_halfword(&self, addr: u32) -> Result<u16, OutOfBounds> {
        let addr = addr as usize & Self::MASK;
        Ok(u16::from_be_bytes([self.data[addr], self.data[addr + 1]]))
    }

    fn read_word(&self, addr: u32) -> Result<u32, OutOfBounds> {
        let addr = addr as usize & Self::MASK;
        Ok(u32::from_be_bytes([
            self.data[addr],
            self.data[addr + 1],
            self.data[addr + 2],
            self.data[addr + 3],
        ]))
    }

    fn write_byte(&mut self, addr: u32, val: u8) -> Result<(), OutOfBounds> {
        self.data[addr as usize & Self::MASK] = val;
        Ok(())
    }

    fn write_halfword(&mut self, addr: u32, val: u16) -> Result<(), OutOfBounds> {
        let addr = addr as usize & Self::MASK;
        self.data[addr..addr + 2].copy_from_slice(&val.to_be_bytes());
        Ok(())
    }

    fn write_word(&mut self, addr: u32, val: u32) -> Result<(), OutOfBounds> {
        let addr = addr as usize & Self::MASK;
        self.data[addr..addr + 4].copy_from_slice(&val.to_be_bytes());
        Ok(())
    }
}
