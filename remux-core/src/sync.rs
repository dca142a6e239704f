// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `sync` module provides the concurrency primitives used by demuxers and muxers.

use tokio::sync::oneshot;
pub use tokio::sync::MutexGuard;

/// An asynchronous mutual-exclusion lock with FIFO acquisition order: acquisitions resolve in
/// arrival order, so queued demuxer and muxer operations observe a consistent serialization.
///
/// This is a thin wrapper over tokio's fair mutex, which provides exactly that ordering.
pub struct AsyncMutex<T> {
    inner: tokio::sync::Mutex<T>,
}

impl<T> AsyncMutex<T> {
    /// Create the mutex holding `value`.
    pub fn new(value: T) -> Self {
        AsyncMutex { inner: tokio::sync::Mutex::new(value) }
    }

    /// Acquire the lock, suspending until it is available.
    pub async fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock().await
    }

    /// Attempt to acquire the lock without suspending.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.inner.try_lock().ok()
    }

    /// Get a mutable reference to the protected value without locking. Requires exclusive access
    /// to the mutex itself.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

/// The resolving half of a [`resolver_pair`].
pub struct Resolver<T> {
    tx: oneshot::Sender<T>,
}

impl<T> Resolver<T> {
    /// Resolve the paired waiter with `value`. Returns the value back if the waiter was dropped.
    pub fn resolve(self, value: T) -> Result<(), T> {
        self.tx.send(value)
    }
}

/// The waiting half of a [`resolver_pair`].
pub struct Waiter<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Waiter<T> {
    /// Suspend until the paired resolver resolves. Returns `None` if the resolver was dropped
    /// without resolving.
    pub async fn wait(self) -> Option<T> {
        self.rx.await.ok()
    }
}

/// Create a resolver/waiter promise pair. One side hands the `Resolver` to the code that will
/// produce a value; the other suspends on the `Waiter`.
pub fn resolver_pair<T>() -> (Resolver<T>, Waiter<T>) {
    let (tx, rx) = oneshot::channel();
    (Resolver { tx }, Waiter { rx })
}

#[cfg(test)]
mod tests {
    use super::{resolver_pair, AsyncMutex};

    #[tokio::test]
    async fn verify_mutex_serializes() {
        let mutex = AsyncMutex::new(0u32);

        {
            let mut guard = mutex.lock().await;
            *guard += 1;
            assert!(mutex.try_lock().is_none());
        }

        assert_eq!(*mutex.lock().await, 1);
    }

    #[tokio::test]
    async fn verify_resolver_pair() {
        let (resolver, waiter) = resolver_pair::<u32>();
        resolver.resolve(7).unwrap();
        assert_eq!(waiter.wait().await, Some(7));

        let (resolver, waiter) = resolver_pair::<u32>();
        drop(resolver);
        assert_eq!(waiter.wait().await, None);
    }
}
