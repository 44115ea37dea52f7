//! Workspace test suite.

#[cfg(test)]
mod backend;
#[cfg(test)]
mod exec;
#[cfg(test)]
mod frontend;
#[cfg(test)]
mod ir;
#[cfg(test)]
mod tools;

/// Route `log` output through the test harness. Safe to call from
/// every test.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
