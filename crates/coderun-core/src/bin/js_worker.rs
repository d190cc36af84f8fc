//! Evaluates one JavaScript submission read from stdin and writes the result
//! to stdout. Spawned by the interpreter executor, which kills it at the
//! deadline.

use coderun_core::executors::serve_worker;
use std::io;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .init();

    if let Err(e) = serve_worker(io::stdin().lock(), io::stdout().lock()) {
        log::error!("JavaScript worker failed: {}", e);
        std::process::exit(2);
    }
}
