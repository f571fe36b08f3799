//! Wrapper around `tokio::task::block_in_place`, as used by the teacher in
//! `client/pull.rs` to run blocking filesystem/datastore calls from inside
//! an async task without stalling the executor's other work.

pub fn block_in_place<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    tokio::task::block_in_place(f)
}
