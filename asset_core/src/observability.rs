//! Last unrecovered failure, kept for hosts that poll instead of reading logs.

use std::any::Any;
use std::panic::{self, PanicHookInfo};
use std::sync::{Mutex, MutexGuard, OnceLock};

use log::error;

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn last_failure_cell() -> &'static Mutex<Option<String>> {
    static LAST_FAILURE: OnceLock<Mutex<Option<String>>> = OnceLock::new();
    LAST_FAILURE.get_or_init(|| Mutex::new(None))
}

pub fn record_failure(message: impl Into<String>) {
    let message = message.into();
    error!("{}", message);
    *lock_unpoisoned(last_failure_cell()) = Some(message);
}

pub fn last_failure() -> Option<String> {
    lock_unpoisoned(last_failure_cell()).clone()
}

pub fn clear_last_failure() {
    *lock_unpoisoned(last_failure_cell()) = None;
}

/// Chains a hook that records every panic before the previous hook runs.
pub fn install_panic_hook() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    if INSTALLED.set(()).is_err() {
        return;
    }
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        record_failure(describe_panic(info));
        previous(info);
    }));
}

pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn describe_panic(info: &PanicHookInfo<'_>) -> String {
    let location = info
        .location()
        .map(|loc| format!("{}:{}", loc.file(), loc.line()))
        .unwrap_or_else(|| "<unknown>".to_string());
    format!("panic at {}: {}", location, panic_message(info.payload()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_are_stringified() {
        let boxed: Box<dyn Any + Send> = Box::new("static text");
        assert_eq!(panic_message(boxed.as_ref()), "static text");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(17u32);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic payload");
    }
}
