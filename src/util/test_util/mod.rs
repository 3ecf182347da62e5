//! Helpers for the unit tests. Also exported with the `test_private` feature.

use crate::util::options::Options;
use lazy_static::lazy_static;
use std::panic;
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// Run `f` on another thread and panic if it does not finish within `millis`. Catches tests that
/// deadlock in a handshake.
pub fn panic_after<T, F>(millis: u64, f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T,
    F: Send + 'static,
{
    let (done_tx, done_rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let val = f();
        done_tx.send(()).expect("Unable to send completion signal");
        val
    });

    match done_rx.recv_timeout(Duration::from_millis(millis)) {
        Ok(_) => handle.join().expect("Thread panicked"),
        Err(e) => panic!("Thread took too long: {}", e),
    }
}

lazy_static! {
    static ref SERIAL_TEST_LOCK: Mutex<()> = Mutex::default();
}

/// Run tests that touch process-wide state, such as environment variables, one at a time.
pub fn serial_test<F>(f: F)
where
    F: FnOnce(),
{
    // A panicking test poisons the lock. The next test can still run.
    let _lock = SERIAL_TEST_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    f();
}

/// Run `cleanup` after `test`, even if `test` panics.
pub fn with_cleanup<T, C>(test: T, cleanup: C)
where
    T: FnOnce() + panic::UnwindSafe,
    C: FnOnce(),
{
    let res = panic::catch_unwind(test);
    cleanup();
    if let Err(e) = res {
        panic::resume_unwind(e);
    }
}

/// Built-in default options (the environment is ignored) with the given camel-case settings
/// applied. Panics on an unknown option or invalid value.
pub fn options_with(settings: &[(&str, &str)]) -> Options {
    let mut options = Options::builtin_defaults();
    for (name, value) in settings {
        assert!(
            options.set_from_camelcase_str(name, value),
            "cannot set {}={}",
            name,
            value
        );
    }
    options
}
