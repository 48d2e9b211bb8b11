//! Process plumbing around the poll loop: command line and systemd.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Shortest keep-alive period, whatever `WATCHDOG_USEC` asks for.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
const MIN_WATCHDOG_PERIOD: Duration = Duration::from_millis(100);

/// Config path from `--config <path>` or `--config=<path>`. The last flag wins.
pub fn config_arg<I>(args: I) -> Option<String>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut path = None;
    while let Some(arg) = args.next() {
        if arg == "--config" {
            path = args.next().or(path);
        } else if let Some(value) = arg.strip_prefix("--config=") {
            path = Some(value.to_string());
        }
    }
    path
}

/// Keep-alive period for a watchdog timeout of `usec`, or `None` when the
/// watchdog is off or addressed to another process.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn watchdog_period(usec: Option<&str>, pid: Option<&str>, own_pid: u32) -> Option<Duration> {
    let usec = usec?.trim().parse::<u64>().ok().filter(|usec| *usec > 0)?;
    if let Some(pid) = pid.and_then(|value| value.trim().parse::<u32>().ok()) {
        if pid != own_pid {
            return None;
        }
    }
    Some(Duration::from_micros(usec / 2).max(MIN_WATCHDOG_PERIOD))
}

#[cfg(target_os = "linux")]
mod systemd {
    use std::env;

    use super::*;
    use sd_notify::NotifyState;
    use tracing::{debug, warn};

    fn notify(state: NotifyState, what: &str) {
        if let Err(err) = sd_notify::notify(false, &[state]) {
            warn!(error = %err, state = what, "systemd notify failed");
        }
    }

    pub fn ready() {
        notify(NotifyState::Ready, "ready");
    }

    pub fn stopping() {
        notify(NotifyState::Stopping, "stopping");
    }

    pub fn spawn_watchdog(mut shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        let period = watchdog_period(
            env::var("WATCHDOG_USEC").ok().as_deref(),
            env::var("WATCHDOG_PID").ok().as_deref(),
            std::process::id(),
        )?;
        debug!(period_ms = period.as_millis() as u64, "systemd watchdog enabled");

        Some(tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticks.tick() => notify(NotifyState::Watchdog, "watchdog"),
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        }))
    }
}

#[cfg(not(target_os = "linux"))]
mod systemd {
    use super::*;

    pub fn ready() {}

    pub fn stopping() {}

    pub fn spawn_watchdog(_shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        None
    }
}

pub use systemd::{ready as notify_ready, spawn_watchdog, stopping as notify_stopping};

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn config_arg_accepts_both_forms() {
        assert_eq!(
            config_arg(args(&["--config", "a.toml"])),
            Some("a.toml".to_string())
        );
        assert_eq!(
            config_arg(args(&["--config=b.json"])),
            Some("b.json".to_string())
        );
        assert_eq!(
            config_arg(args(&["--config=a.toml", "--config", "b.toml"])),
            Some("b.toml".to_string())
        );
        assert_eq!(config_arg(args(&["--verbose"])), None);
        assert_eq!(config_arg(args(&["--config"])), None);
    }

    #[test]
    fn watchdog_period_is_half_the_timeout() {
        assert_eq!(
            watchdog_period(Some("30000000"), None, 42),
            Some(Duration::from_secs(15))
        );
        assert_eq!(
            watchdog_period(Some("30000000"), Some("42"), 42),
            Some(Duration::from_secs(15))
        );
        assert_eq!(
            watchdog_period(Some("50000"), None, 42),
            Some(MIN_WATCHDOG_PERIOD)
        );
    }

    #[test]
    fn watchdog_is_off_for_other_processes_or_bad_values() {
        assert_eq!(watchdog_period(Some("30000000"), Some("7"), 42), None);
        assert_eq!(watchdog_period(None, None, 42), None);
        assert_eq!(watchdog_period(Some("0"), None, 42), None);
        assert_eq!(watchdog_period(Some("soon"), None, 42), None);
    }
}
