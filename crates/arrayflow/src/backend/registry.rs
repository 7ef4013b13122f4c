//! Runtime backend registry for selecting kernel backends by name.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use super::KernelBackend;

/// Factory function that creates a new backend instance.
pub type BackendConstructor = Box<dyn Fn() -> Arc<dyn KernelBackend> + Send + Sync>;

struct BackendRegistry {
    backends: RwLock<HashMap<String, BackendConstructor>>,
}

impl BackendRegistry {
    fn new() -> Self {
        Self {
            backends: RwLock::new(HashMap::new()),
        }
    }

    fn register(&self, name: String, constructor: BackendConstructor) {
        self.backends
            .write()
            .expect("backend registry lock poisoned")
            .insert(name, constructor);
    }

    fn create(&self, name: &str) -> Option<Arc<dyn KernelBackend>> {
        let registry = self.backends.read().expect("backend registry lock poisoned");
        let constructor = registry.get(name)?;
        Some(constructor())
    }

    fn list_backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .backends
            .read()
            .expect("backend registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn has_backend(&self, name: &str) -> bool {
        self.backends
            .read()
            .expect("backend registry lock poisoned")
            .contains_key(name)
    }
}

static GLOBAL_REGISTRY: OnceLock<BackendRegistry> = OnceLock::new();

fn global_registry() -> &'static BackendRegistry {
    GLOBAL_REGISTRY.get_or_init(BackendRegistry::new)
}

/// Registers a backend constructor under `name`, replacing any previous one.
///
/// The constructor runs each time the backend is requested via
/// [`create_backend`].
pub fn register_backend<F>(name: impl Into<String>, constructor: F)
where
    F: Fn() -> Arc<dyn KernelBackend> + Send + Sync + 'static,
{
    global_registry().register(name.into(), Box::new(constructor));
}

/// Returns `None` if no backend with the given name has been registered.
pub fn create_backend(name: &str) -> Option<Arc<dyn KernelBackend>> {
    global_registry().create(name)
}

/// Registered backend names, sorted.
pub fn list_backends() -> Vec<String> {
    global_registry().list_backends()
}

pub fn has_backend(name: &str) -> bool {
    global_registry().has_backend(name)
}
