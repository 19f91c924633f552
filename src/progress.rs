use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// A spinner on stderr for a long transfer; not drawn when stderr is not a
/// terminal
pub fn spinner(message: impl Into<String>) -> ProgressBar {
    let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
    let style = ProgressStyle::default_spinner()
        .template("  {spinner} {msg} ({elapsed})")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    bar.set_style(style);
    bar.set_message(message.into());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// Run `op` with a spinner showing `message`
pub fn with_spinner<T>(message: &str, op: impl FnOnce() -> T) -> T {
    let bar = spinner(message);
    let result = op();
    bar.finish_and_clear();
    result
}
