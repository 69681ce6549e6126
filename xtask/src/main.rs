use anyhow::{Context, Result};
use std::process::Command;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: cargo xtask <command>");
        eprintln!("Commands:");
        eprintln!("  build-preload    Build the memtrace-preload cdylib in release mode");
        std::process::exit(1);
    }

    match args[1].as_str() {
        "build-preload" => build_preload(),
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            std::process::exit(1);
        }
    }
}

fn build_preload() -> Result<()> {
    let status = Command::new("cargo")
        .args(["build", "--package", "memtrace-preload", "--release"])
        .status()
        .context("failed to execute cargo build for memtrace-preload")?;

    if !status.success() {
        anyhow::bail!("memtrace-preload build failed with exit code: {}", status);
    }

    println!("memtrace-preload built; preload with LD_PRELOAD=target/release/libmemtrace_preload.so");
    Ok(())
}
