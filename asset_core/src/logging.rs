//! Process-wide `log` backend with a swappable output sink.
//!
//! Library code logs through the `log` macros; hosts call [`install`] once
//! and may redirect output with [`set_sink`] (an editor console, a test
//! capture buffer). A sink must not log itself.

use std::sync::{Mutex, MutexGuard, OnceLock};

use log::{Level, LevelFilter, Log, Metadata, Record};

type Sink = Box<dyn Fn(Level, &str, &str) + Send + Sync + 'static>;

fn default_sink(level: Level, target: &str, message: &str) {
    eprintln!("[{}] {}: {}", level.as_str().to_ascii_lowercase(), target, message);
}

fn sink_cell() -> &'static Mutex<Sink> {
    static SINK: OnceLock<Mutex<Sink>> = OnceLock::new();
    SINK.get_or_init(|| Mutex::new(Box::new(default_sink)))
}

fn lock_sink() -> MutexGuard<'static, Sink> {
    match sink_cell().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct SinkLogger;

static LOGGER: SinkLogger = SinkLogger;

impl Log for SinkLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let message = record.args().to_string();
        let sink = lock_sink();
        (sink)(record.level(), record.target(), &message);
    }

    fn flush(&self) {}
}

/// Registers the backend and sets the max level. Returns false when some
/// other logger already owns the `log` facade; the level is left alone then.
pub fn install(level: LevelFilter) -> bool {
    static INSTALLED: OnceLock<bool> = OnceLock::new();
    let ours = *INSTALLED.get_or_init(|| log::set_logger(&LOGGER).is_ok());
    if ours {
        log::set_max_level(level);
    }
    ours
}

pub fn set_sink(sink: impl Fn(Level, &str, &str) + Send + Sync + 'static) {
    *lock_sink() = Box::new(sink);
}

pub fn reset_sink() {
    *lock_sink() = Box::new(default_sink);
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn sink_receives_records() {
        assert!(install(LevelFilter::Debug));
        let captured = Arc::new(Mutex::new(Vec::new()));
        let capture = Arc::clone(&captured);
        set_sink(move |level, target, message| {
            capture
                .lock()
                .unwrap()
                .push((level, target.to_string(), message.to_string()));
        });

        log::warn!(target: "asset_core::logging::probe", "probe {}", 7);
        reset_sink();

        let captured = captured.lock().unwrap();
        assert!(captured.iter().any(|(level, target, message)| {
            *level == Level::Warn && target == "asset_core::logging::probe" && message == "probe 7"
        }));
    }
}
