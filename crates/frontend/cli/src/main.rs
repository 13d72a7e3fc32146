use anyhow::Result;
use clap::Parser;
use mips_core::logging::{LogCategory, LogConfig, LogLevel};
use mips_core::System;
use mips_flat::FlatSystem;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

/// Parse a byte address, accepting decimal or 0x-prefixed hex.
fn parse_address(s: &str) -> Result<u32, String> {
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        s.parse::<u32>()
    };
    parsed.map_err(|e| format!("invalid address {:?}: {}", s, e))
}

#[derive(Parser)]
struct Args {
    /// Path to a raw big-endian MIPS I binary
    binary: PathBuf,

    /// Start address for execution
    #[arg(long, default_value = "0", value_parser = parse_address)]
    pc: u32,

    /// Number of instructions to run (unbounded if omitted)
    #[arg(long)]
    steps: Option<u64>,

    /// Extra bytes of memory above the image (stack headroom)
    #[arg(long, default_value_t = 0)]
    stack: usize,

    /// Trace every executed instruction to the log output
    #[arg(long, default_value_t = false)]
    trace: bool,

    /// Global log level: off, error, warn, info, debug, trace
    #[arg(long)]
    log_level: Option<String>,

    /// Write log output to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Dump the final save-state to this file as JSON
    #[arg(long)]
    save: Option<PathBuf>,

    /// Print the register file after the run
    #[arg(long, default_value_t = false)]
    dump_regs: bool,
}

fn configure_logging(args: &Args) -> Result<()> {
    let config = LogConfig::global();

    if let Some(level) = args.log_level.as_deref() {
        let level = LogLevel::from_str(level)
            .ok_or_else(|| anyhow::anyhow!("unknown log level: {}", level))?;
        config.set_global_level(level);
    }
    if args.trace {
        config.set_level(LogCategory::Cpu, LogLevel::Trace);
    }
    if let Some(path) = args.log_file.as_ref() {
        config.set_log_file(path.clone())?;
    }

    Ok(())
}

fn dump_registers(sys: &FlatSystem) {
    let cpu = sys.cpu();
    for (i, val) in cpu.gpr.iter().enumerate() {
        println!("REGISTER #{:<2}: {:#010X}", i, val);
    }
    println!("HI          : {:#010X}", cpu.hi);
    println!("LO          : {:#010X}", cpu.lo);
    println!("PC          : {:#010X}", cpu.pc);
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    configure_logging(&args)?;

    let mut sys = FlatSystem::new(args.pc);
    sys.load_image_from_path(&args.binary)?;
    if args.stack > 0 {
        sys.grow_memory(args.stack);
    }

    let run_result = match args.steps {
        Some(steps) => sys.run(steps).map(|retired| {
            println!("Retired {} instructions, PC at {:#010X}", retired, sys.cpu().pc);
        }),
        None => sys.run_forever().map(|_| ()),
    };

    // State dumps happen even when execution stopped on an error
    if args.dump_regs {
        dump_registers(&sys);
    }
    if let Some(path) = args.save.as_ref() {
        let state = sys.save_state();
        let mut f = File::create(path)?;
        write!(f, "{}", serde_json::to_string_pretty(&state)?)?;
    }

    run_result?;
    Ok(())
}
