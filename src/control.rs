// src/control.rs

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

/// Introspection and lifecycle commands the engine reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Print per-port counters (SIGUSR1).
    DumpCounters,
    /// Dump the policy table (SIGUSR2).
    DumpRules,
    /// Recompile rules from the configuration file and swap them in (SIGHUP).
    Reload,
    /// Graceful shutdown (SIGINT / SIGTERM).
    Shutdown,
}

/// Spawn the task that owns the signal source and translates POSIX signals
/// into typed commands. Formatting and file I/O happen in the engine's
/// command loop, never in the signal-delivery context.
pub fn spawn_signal_watcher() -> std::io::Result<mpsc::Receiver<Command>> {
    let (tx, rx) = mpsc::channel(8);

    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut usr2 = signal(SignalKind::user_defined2())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        loop {
            let cmd = tokio::select! {
                _ = usr1.recv() => Command::DumpCounters,
                _ = usr2.recv() => Command::DumpRules,
                _ = hangup.recv() => Command::Reload,
                _ = interrupt.recv() => Command::Shutdown,
                _ = terminate.recv() => Command::Shutdown,
            };
            let stop = cmd == Command::Shutdown;
            if tx.send(cmd).await.is_err() || stop {
                break;
            }
        }
    });

    Ok(rx)
}
