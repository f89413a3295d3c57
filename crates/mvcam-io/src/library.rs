use std::sync::Arc;

use parking_lot::Mutex;

use crate::device::DeviceProvider;
use crate::error::DeviceError;

struct LibraryInner<P> {
    provider: P,
    leases: Mutex<usize>,
}

/// Shared handle on a device backend with reference-counted initialisation.
///
/// The backend is initialised when the first [`LibraryGuard`] is acquired and
/// closed when the last one is dropped. Clones share the same count.
pub struct DeviceLibrary<P: DeviceProvider> {
    inner: Arc<LibraryInner<P>>,
}

impl<P: DeviceProvider> Clone for DeviceLibrary<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: DeviceProvider> DeviceLibrary<P> {
    /// Wrap a backend. Nothing is initialised until the first lease.
    pub fn new(provider: P) -> Self {
        Self {
            inner: Arc::new(LibraryInner {
                provider,
                leases: Mutex::new(0),
            }),
        }
    }

    /// The wrapped backend.
    pub fn provider(&self) -> &P {
        &self.inner.provider
    }

    /// Number of live leases.
    pub fn leases(&self) -> usize {
        *self.inner.leases.lock()
    }

    /// Take a lease, initialising the backend if this is the first one.
    pub fn acquire(&self) -> Result<LibraryGuard<P>, DeviceError> {
        let mut leases = self.inner.leases.lock();
        if *leases == 0 {
            self.inner.provider.initialize()?;
            log::info!("device library initialised");
        }
        *leases += 1;
        Ok(LibraryGuard {
            inner: self.inner.clone(),
        })
    }
}

/// A lease on the device library. The last guard dropped closes the backend.
pub struct LibraryGuard<P: DeviceProvider> {
    inner: Arc<LibraryInner<P>>,
}

impl<P: DeviceProvider> LibraryGuard<P> {
    /// The wrapped backend.
    pub fn provider(&self) -> &P {
        &self.inner.provider
    }
}

impl<P: DeviceProvider> Drop for LibraryGuard<P> {
    fn drop(&mut self) {
        let mut leases = self.inner.leases.lock();
        *leases = leases.saturating_sub(1);
        if *leases == 0 {
            match self.inner.provider.close() {
                Ok(()) => log::info!("device library closed"),
                Err(e) => log::warn!("failed to close device library: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimProvider;

    #[test]
    fn test_first_lease_initialises_last_closes() -> Result<(), DeviceError> {
        let provider = SimProvider::new();
        let library = DeviceLibrary::new(provider.clone());

        let a = library.acquire()?;
        let b = library.clone().acquire()?;
        assert_eq!(library.leases(), 2);
        assert_eq!(provider.library_counts(), (1, 0));

        drop(a);
        assert_eq!(provider.library_counts(), (1, 0));
        drop(b);
        assert_eq!(provider.library_counts(), (1, 1));
        assert_eq!(library.leases(), 0);

        let _c = library.acquire()?;
        assert_eq!(provider.library_counts(), (2, 1));
        Ok(())
    }
}
