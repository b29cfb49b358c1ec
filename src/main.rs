use clap::Parser;
use log::{error, info};
use nix::sys::signal::{self, SigHandler, Signal};
use resource_tuner::cli::Cli;
use resource_tuner::config::DaemonConfig;
use resource_tuner::daemon::Daemon;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn request_shutdown(_: libc::c_int) {
    SHUTDOWN.store(true, Ordering::Release);
}

/// Installs SIGTERM/SIGINT handlers so the worker pools get a chance to
/// drain before the process exits, instead of dying mid-apply.
fn install_signal_handlers() {
    let handler = SigHandler::Handler(request_shutdown);
    unsafe {
        let _ = signal::signal(Signal::SIGTERM, handler);
        let _ = signal::signal(Signal::SIGINT, handler);
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = resource_tuner::logging::init(cli.verbose) {
        eprintln!("failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let config = match DaemonConfig::load(&cli.daemon_config) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to load daemon config: {e}");
            std::process::exit(1);
        }
    };

    let daemon = Daemon::new(config);

    // Registration phase (§9): a host integration would call
    // `daemon.register_apply`/`register_tear` here, before the catalogue
    // freezes. None are built in; every resource falls back to the
    // built-in sysfs-path apply/tear.

    if let Err(e) = daemon.init_catalogue(
        cli.resource_config.as_deref(),
        cli.target_config.as_deref(),
    ) {
        error!("failed to initialize catalogue: {e}");
        std::process::exit(1);
    }

    info!(
        "resource-tuner ready: {} resources loaded",
        daemon.registry.len()
    );

    install_signal_handlers();

    // The Unix-socket listener that decodes wire frames and drives
    // `daemon.lifecycle` is an external collaborator (§1); this process
    // just needs to stay alive for its worker pools to keep running,
    // until SIGTERM/SIGINT asks it to stop.
    while !SHUTDOWN.load(Ordering::Acquire) {
        std::thread::park_timeout(Duration::from_millis(500));
    }
    info!("shutdown signal received, exiting");
}
