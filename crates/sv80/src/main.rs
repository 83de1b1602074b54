//! SV80 runtime binary.
//!
//! Loads a raw 8080 image, boots it as process 0, and drives the machine
//! to completion. Guest output goes to stdout; traces and supervisor
//! events go to stderr.

use std::fs;
use std::process;

use sv80::{snapshot, Machine, MachineConfig};

struct CliArgs {
    image: Option<String>,
    debug_level: u8,
    quantum: u8,
    interrupt_buffer_base: u16,
    phys_size: usize,
    strict_opcodes: bool,
    watchdog: Option<u64>,
    snapshot_path: Option<String>,
    restore_path: Option<String>,
}

const USAGE: &str = "usage: sv80 <image> <debug-level 0..5> \
[--quantum n] [--int-buffer addr] [--phys-size bytes] [--watchdog n] \
[--strict-opcodes] [--snapshot path] [--restore path]";

fn parse_args() -> Result<CliArgs, String> {
    let defaults = MachineConfig::default();
    let mut cli = CliArgs {
        image: None,
        debug_level: 0,
        quantum: defaults.quantum,
        interrupt_buffer_base: defaults.interrupt_buffer_base,
        phys_size: defaults.phys_size,
        strict_opcodes: false,
        watchdog: None,
        snapshot_path: None,
        restore_path: None,
    };

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut positional = 0;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--quantum" => {
                i += 1;
                let value = args.get(i).ok_or("--quantum needs a value")?;
                cli.quantum = value.parse().map_err(|_| format!("bad quantum: {value}"))?;
                if cli.quantum == 0 {
                    return Err("quantum must be 1..=255".into());
                }
            }
            "--phys-size" => {
                i += 1;
                let value = args.get(i).ok_or("--phys-size needs a value")?;
                cli.phys_size = value.parse().map_err(|_| format!("bad size: {value}"))?;
            }
            "--watchdog" => {
                i += 1;
                let value = args.get(i).ok_or("--watchdog needs a value")?;
                cli.watchdog = Some(value.parse().map_err(|_| format!("bad count: {value}"))?);
            }
            "--int-buffer" => {
                i += 1;
                let value = args.get(i).ok_or("--int-buffer needs a value")?;
                cli.interrupt_buffer_base =
                    value.parse().map_err(|_| format!("bad address: {value}"))?;
            }
            "--strict-opcodes" => cli.strict_opcodes = true,
            "--snapshot" => {
                i += 1;
                cli.snapshot_path = args.get(i).cloned();
            }
            "--restore" => {
                i += 1;
                cli.restore_path = args.get(i).cloned();
            }
            arg if arg.starts_with("--") => return Err(format!("unknown flag: {arg}")),
            arg => {
                match positional {
                    0 => cli.image = Some(arg.to_string()),
                    1 => {
                        cli.debug_level =
                            arg.parse().map_err(|_| format!("bad debug level: {arg}"))?;
                        if cli.debug_level > 5 {
                            return Err("debug level is 0..=5".into());
                        }
                    }
                    _ => return Err(format!("unexpected argument: {arg}")),
                }
                positional += 1;
            }
        }
        i += 1;
    }

    if cli.image.is_none() && cli.restore_path.is_none() {
        return Err("an image file is required".into());
    }
    Ok(cli)
}

fn main() {
    let cli = match parse_args() {
        Ok(cli) => cli,
        Err(message) => {
            eprintln!("error: {message}");
            eprintln!("{USAGE}");
            process::exit(1);
        }
    };

    let max_level = match cli.debug_level {
        5 => tracing::Level::TRACE,
        4 => tracing::Level::DEBUG,
        _ => tracing::Level::WARN,
    };
    tracing_subscriber::fmt()
        .with_max_level(max_level)
        .with_writer(std::io::stderr)
        .init();

    let config = MachineConfig {
        debug_level: cli.debug_level,
        quantum: cli.quantum,
        interrupt_buffer_base: cli.interrupt_buffer_base,
        phys_size: cli.phys_size,
        strict_opcodes: cli.strict_opcodes,
        watchdog: cli.watchdog,
    };
    let mut machine = Machine::new(config);

    let boot_result = if let Some(path) = &cli.restore_path {
        fs::read(path)
            .map_err(|err| format!("cannot read snapshot {path}: {err}"))
            .and_then(|data| {
                snapshot::restore(&mut machine, &data).map_err(|err| err.to_string())
            })
    } else {
        let image = cli.image.as_deref().unwrap_or_default();
        machine.boot_image(image).map_err(|err| err.to_string())
    };
    if let Err(message) = boot_result {
        eprintln!("error: {message}");
        process::exit(1);
    }

    match machine.run() {
        Ok(summary) => {
            if let Some(path) = &cli.snapshot_path {
                let data = snapshot::save(&machine);
                if let Err(err) = fs::write(path, data) {
                    eprintln!("error: cannot write snapshot {path}: {err}");
                    process::exit(1);
                }
            }
            if cli.debug_level > 0 {
                eprintln!(
                    "stopped: {:?} after {} instructions ({} cycles)",
                    summary.reason, summary.instructions, summary.cycles
                );
            }
        }
        Err(err) => {
            eprintln!("fatal: {err}");
            process::exit(1);
        }
    }
}
