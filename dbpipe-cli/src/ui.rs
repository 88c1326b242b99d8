//! Progress feedback for dbpipe commands
//!
//! Spinners are suppressed when `--quiet` is passed, `DBPIPE_QUIET=1` is set,
//! or stderr is not a TTY. Row output on stdout is never affected.

use std::fmt::Display;
use std::future::Future;
use std::io::IsTerminal;
use std::sync::OnceLock;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

static QUIET_MODE: OnceLock<bool> = OnceLock::new();

fn quiet_from(flag: bool, env: Option<&str>, stderr_is_tty: bool) -> bool {
    flag || env == Some("1") || !stderr_is_tty
}

/// Call once at startup with the `--quiet` flag value.
pub fn init_quiet_mode(quiet_flag: bool) {
    let env = std::env::var("DBPIPE_QUIET").ok();
    let quiet = quiet_from(quiet_flag, env.as_deref(), std::io::stderr().is_terminal());
    QUIET_MODE.set(quiet).ok();
}

pub fn is_quiet() -> bool {
    QUIET_MODE.get().copied().unwrap_or(false)
}

/// Spinner on stderr, or `None` in quiet mode.
pub fn spinner(msg: impl Into<String>) -> Option<ProgressBar> {
    if is_quiet() {
        return None;
    }

    let style = ProgressStyle::default_spinner()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    let pb = ProgressBar::new_spinner().with_style(style);
    pb.set_message(msg.into());
    pb.enable_steady_tick(Duration::from_millis(80));
    Some(pb)
}

fn finish(pb: Option<ProgressBar>, msg: String) {
    if let Some(pb) = pb {
        if let Ok(style) = ProgressStyle::default_spinner().template("{msg}") {
            pb.set_style(style);
        }
        pb.finish_with_message(msg);
    }
}

pub fn finish_success(pb: Option<ProgressBar>, msg: impl Into<String>) {
    finish(pb, format!("✓ {}", msg.into()));
}

pub fn finish_error(pb: Option<ProgressBar>, msg: impl Into<String>) {
    finish(pb, format!("✗ {}", msg.into()));
}

/// Await `fut` behind a spinner that ends with `success_msg` or the error.
pub async fn with_spinner<T, E: Display>(
    msg: impl Into<String>,
    success_msg: impl FnOnce(&T) -> String,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, E> {
    let msg = msg.into();
    let pb = spinner(&msg);

    match fut.await {
        Ok(value) => {
            finish_success(pb, success_msg(&value));
            Ok(value)
        }
        Err(e) => {
            finish_error(pb, format!("{msg}: {e}"));
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_sources() {
        assert!(quiet_from(true, None, true));
        assert!(quiet_from(false, Some("1"), true));
        assert!(quiet_from(false, None, false));
        assert!(!quiet_from(false, Some("0"), true));
    }

    #[test]
    fn test_no_spinner_when_quiet() {
        init_quiet_mode(true);
        assert!(is_quiet());
        assert!(spinner("working").is_none());
    }
}
