//! Named OS thread helpers.
use std::thread;

/// Spawn an OS thread with the given label.
pub fn spawn<D, F, T>(label: D, f: F) -> thread::JoinHandle<T>
where
    D: std::fmt::Display,
    F: FnOnce() -> T,
    F: Send + 'static,
    T: Send + 'static,
{
    thread::Builder::new()
        .name(label.to_string())
        .spawn(f)
        .expect("thread::spawn: thread label must not contain NULL bytes")
}

/// Spawn a scoped OS thread with the given label.
pub fn spawn_scoped<'scope, 'env, D, F, T>(
    label: D,
    scope: &'scope thread::Scope<'scope, 'env>,
    f: F,
) -> thread::ScopedJoinHandle<'scope, T>
where
    D: std::fmt::Display,
    F: FnOnce() -> T,
    F: Send + 'scope,
    T: Send + 'scope,
{
    thread::Builder::new()
        .name(label.to_string())
        .spawn_scoped(scope, f)
        .expect("thread::spawn_scoped: thread label must not contain NULL bytes")
}
