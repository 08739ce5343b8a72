//! knit runtime driver entry point.

mod cli;

use clap::Parser;
use cli::Cli;
use knit_runtime::{ErrorKind, ObjRef, Runtime};
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let config = match cli.runtime_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    };

    // Under the exit policy any failure below terminates the process from
    // inside the runtime.
    let Ok(mut rt) = Runtime::with_config(config) else {
        std::process::exit(1);
    };

    run(&mut rt, &cli);

    if let Some(kind) = rt.error_kind() {
        debug!(%kind, "run finished with a pending error");
        match rt.error_message() {
            Some(message) if !message.is_empty() => eprintln!("{message}"),
            _ => eprintln!("an unknown error occurred (no error message)"),
        }
        std::process::exit(1);
    }
    let freed = rt.deinit();
    debug!(freed, "runtime torn down");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("KNIT_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Apply the command line to `rt`. Failures are latched in the runtime, so
/// every step runs even after an earlier one failed.
fn run(rt: &mut Runtime, cli: &Cli) {
    for (name, value) in &cli.strings {
        debug!(%name, len = value.len(), "binding string");
        if let Err(kind) = rt.set_string(name, value) {
            debug!(%name, %kind, "string binding failed");
        }
    }

    for (name, items) in &cli.lists {
        debug!(%name, %items, "binding list");
        if let Err(kind) = bind_list(rt, name, items) {
            debug!(%name, %kind, "list binding failed");
        }
    }

    for name in &cli.dumps {
        debug!(%name, "dumping variable");
        if let Err(kind) = rt.dump_variable(name) {
            debug!(%name, %kind, "dump failed");
        }
    }

    if cli.stats {
        print_stats(rt);
    }
}

fn bind_list(rt: &mut Runtime, name: &str, items: &str) -> Result<(), ErrorKind> {
    let list = rt.new_list()?;
    for item in items.split(',').filter(|item| !item.is_empty()) {
        if let Err(kind) = rt.list_push(list, item) {
            discard(rt, list);
            return Err(kind);
        }
    }
    rt.set(name, list).inspect_err(|_| discard(rt, list))
}

fn discard(rt: &mut Runtime, list: ObjRef) {
    if let Err(kind) = rt.destroy(list) {
        debug!(%list, %kind, "couldn't destroy an unbound list");
    }
}

fn print_stats(rt: &Runtime) {
    let stats = rt.heap().stats();
    println!("live blocks: {} (peak {})", stats.live_blocks, stats.peak_blocks);
    println!("live bytes: {}", stats.live_bytes);
    println!(
        "allocations: {}, reallocations: {} ({} moved), releases: {}",
        stats.allocations, stats.reallocations, stats.moves, stats.releases
    );
    if let Some(limit) = rt.heap().limit() {
        println!("limit: {limit} bytes");
    }
}
