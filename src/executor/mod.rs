//! An executor is responsible for executing the test cases and generating results.

pub mod classify;
mod context;
pub mod pool;
pub mod results;
pub mod subject;
pub mod tmain;
pub mod tools;

pub use context::{interrupt_token, run_tmain, run_units};

/// Environment every subject invocation sees, for reproducible sorting and
/// message formatting.
pub const PINNED_ENV: [(&str, &str); 2] = [
    ("LC_ALL", "C"),
    ("MSYS2_ARG_CONV_EXCL", "--regex-;--_scopesep"),
];

/// Apply [`PINNED_ENV`] to this process so that every child inherits it.
/// Must run before any thread is started.
pub fn pin_environment() {
    for (key, value) in PINNED_ENV {
        std::env::set_var(key, value);
    }
}
