use std::path::Path;
use tracing_core::{Level, LevelFilter, Metadata};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{registry, Layer};

/// If a global tracing subscriber is not already configured, send every log
/// record to the given file and add a panic hook pointing to it.
///
/// Returns `false` when another subscriber was already installed.
pub fn install_file_logger(file_path: &str) -> bool {
    if !install_file_subscriber(file_path) {
        return false;
    }

    update_panic_hook(file_path);
    true
}

/// Sets the global subscriber writing to `file_path`, without touching the panic hook.
pub(crate) fn install_file_subscriber(file_path: &str) -> bool {
    let path = Path::new(file_path);
    let directory = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = match path.file_name() {
        Some(name) => name,
        None => {
            eprintln!("The log path '{file_path}' doesn't point to a file.");
            return false;
        }
    };

    let writer = tracing_appender::rolling::never(directory, file_name);
    let layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(LevelFilter::INFO)
        .with_filter(filter_fn(is_logged));

    registry().with(layer).try_init().is_ok()
}

fn is_logged(metadata: &Metadata<'_>) -> bool {
    let path = metadata.module_path().unwrap_or_else(|| metadata.target());
    // The wgpu crates log too much, so their `info` level is skipped.
    let is_wgpu = path.starts_with("wgpu") || metadata.target().starts_with("wgpu");

    !(is_wgpu && *metadata.level() >= Level::INFO)
}

fn update_panic_hook(file_path: &str) {
    let hook = std::panic::take_hook();
    let file_path = file_path.to_owned();

    std::panic::set_hook(Box::new(move |info| {
        log::error!("PANIC => {info}");
        eprintln!(
            "=== PANIC ===\nA fatal error happened, you can check the training logs here => \
             '{file_path}'\n============="
        );
        hook(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logs_are_written_to_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("training.log");
        let path = path.to_str().unwrap();

        // The panic hook stays untouched, the test harness relies on it.
        assert!(install_file_subscriber(path));
        log::info!("epoch finished");
        log::debug!("below the level filter");
        log::info!(target: "wgpu_core::device", "wgpu chatter");
        log::warn!(target: "wgpu_core::device", "wgpu warning");

        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("epoch finished"));
        assert!(!content.contains("below the level filter"));
        assert!(!content.contains("wgpu chatter"));
        assert!(content.contains("wgpu warning"));

        // The global subscriber can only be installed once, so no hook is added either.
        assert!(!install_file_logger(path));
    }
}
