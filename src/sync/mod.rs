//! Synchronization primitives for the kernel model.

pub mod spinlock;

pub use spinlock::{SpinLock, SpinLockGuard, WouldBlock};
