use std::io::{stdin, stdout};
use std::process;

use minnow::log::{self, LogLevel};
use minnow::{jobs, shell};

fn main() {
    if let Ok(level) = std::env::var("MINNOW_LOG") {
        match level.as_str() {
            "debug" => log::set_level(LogLevel::Debug),
            "info" => log::set_level(LogLevel::Info),
            "warn" => log::set_level(LogLevel::Warn),
            "error" => log::set_level(LogLevel::Error),
            "off" => log::set_level(LogLevel::Off),
            other => eprintln!("minnow: unknown MINNOW_LOG level: {}", other),
        }
    }

    if jobs::init() < 0 {
        eprintln!("minnow: job runner initialization failed");
        process::exit(1);
    }

    let code = shell::repl(&mut stdin().lock(), &mut stdout());

    if jobs::fini() < 0 {
        eprintln!("minnow: job runner finalization failed");
        process::exit(1);
    }
    process::exit(code);
}
