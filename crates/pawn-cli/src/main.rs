//! `pawnjit`: the host plugin shell for the AMX JIT.
//!
//! Loads a compiled AMX module from disk, resolves its natives against
//! a small built-in registry, compiles it through `pawn-jit`, and calls
//! a public function - exercising the host/core boundary end to end.
//! With `--interp`, runs the bundled reference interpreter instead (or
//! as well, with `--compare`), acting as the host's own fallback engine
//! and as ground truth for differential testing.

mod config;
mod host;
mod interp;
mod natives;
#[cfg(test)]
mod differential_tests;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Arg, ArgAction, Command};
use log::info;

use pawn_amx::AMX_EXEC_MAIN;

use config::JitConfig;
use host::{DefaultPlugin, Host};
use natives::NativeRegistry;

fn main() -> ExitCode {
    env_logger::init();

    let matches = Command::new("pawnjit")
        .about("JIT host shell for AMX modules")
        .arg(Arg::new("module").required(true).help("Path to a compiled .amx file"))
        .arg(
            Arg::new("public")
                .long("public")
                .num_args(1)
                .help("Public function to call (default: program entry point)"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .num_args(1)
                .help("Path to pawn-jit.toml"),
        )
        .arg(
            Arg::new("jit-log")
                .long("jit-log")
                .action(ArgAction::SetTrue)
                .help("Force-enable the assembly listing log (overrides config)"),
        )
        .arg(
            Arg::new("jit-sysreq-d")
                .long("jit-sysreq-d")
                .action(ArgAction::SetTrue)
                .help("Force-enable SYSREQ.C -> SYSREQ.D relocation (overrides config)"),
        )
        .arg(
            Arg::new("interp")
                .long("interp")
                .action(ArgAction::SetTrue)
                .help("Run the reference interpreter instead of the JIT"),
        )
        .arg(
            Arg::new("compare")
                .long("compare")
                .action(ArgAction::SetTrue)
                .help("Run both the JIT and the interpreter and report any mismatch"),
        )
        .get_matches();

    let module_path = matches.get_one::<String>("module").unwrap();
    let public = matches.get_one::<String>("public").map(|s| s.as_str());
    let config_path = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("pawn-jit.toml"));

    let mut jit_config = JitConfig::load(&config_path);
    if matches.get_flag("jit-log") {
        jit_config.jit_log = true;
    }
    if matches.get_flag("jit-sysreq-d") {
        jit_config.jit_sysreq_d = true;
    }

    let run_interp = matches.get_flag("interp");
    let run_compare = matches.get_flag("compare");

    let mut host = match Host::load(module_path, jit_config, NativeRegistry::new()) {
        Ok(h) => h,
        Err(err) => {
            eprintln!("failed to load {module_path}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let index = match public {
        Some(name) => match host.module().publics().position(|(n, _)| n == name) {
            Some(i) => i as i32,
            None => {
                eprintln!("no public function named {name:?}");
                return ExitCode::FAILURE;
            }
        },
        None => AMX_EXEC_MAIN,
    };

    if run_interp || run_compare {
        let (module, mut regs, mut data) = host.snapshot_for_interp();
        let (error, pri) = interp::interpret(module, &mut regs, &mut data, index);
        println!("interp: error={error:?} pri={pri}");
        if !run_compare {
            return ExitCode::SUCCESS;
        }
    }

    if let Err(err) = host.ensure_compiled(&mut DefaultPlugin) {
        eprintln!("compilation failed: {err}");
        return ExitCode::FAILURE;
    }
    info!("compiled {module_path}, calling index {index}");

    let (status, pri) = host.call(index);
    println!("jit: error={status:?} pri={pri}");

    if status as i32 != 0 {
        ExitCode::from(status as i32 as u8)
    } else {
        ExitCode::SUCCESS
    }
}

