// Filesystem helpers for config and state files

pub mod common;

pub use common::{atomic_write, atomic_write_with_mode};
