use std::sync::{Mutex, MutexGuard};

use prometheus_client::{encoding::text::encode, registry::Registry};

lazy_static! {
    pub(crate) static ref CORE: Core = Core::default();
}

/// The process wide registry.
#[derive(Default)]
pub(crate) struct Core {
    registry: Mutex<Registry>,
}

impl Core {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        // A panic while registering leaves the registry usable.
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn register<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&mut Registry) -> T,
    {
        f(&mut self.lock())
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = String::new();
        // Writing into a String cannot fail.
        let _ = encode(&mut buf, &self.lock());
        buf.into()
    }
}
