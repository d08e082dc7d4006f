// src/registry.rs
// Index handle registry (spec §4.2): resolves `(source, mapSrc,
// reduceSrc)` to a persistent secondary store, creating it on first
// use. Grounded on `DatabaseCore::open`'s open-or-create shape in
// `ironbase-core/src/database.rs`.

use crate::error::Result;
use crate::index_handle::{index_name, IndexHandle};
use crate::source::{SecondaryStore, ViewSignature};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Opens and destroys named secondary stores. A production backend
/// implements this against whatever adapter the source DB itself uses
/// (spec §4.2 step 3: "using the same adapter as the source").
pub trait SecondaryStoreFactory<S: SecondaryStore>: Send + Sync {
    fn open_or_create(&self, name: &str) -> Result<S>;
    fn destroy(&self, name: &str) -> Result<()>;
}

/// Registry of live index handles for one source database.
pub struct ViewRegistry<S: SecondaryStore, F: SecondaryStoreFactory<S>> {
    db_name: String,
    factory: F,
    handles: RwLock<HashMap<String, Arc<IndexHandle<S>>>>,
}

impl<S: SecondaryStore, F: SecondaryStoreFactory<S>> ViewRegistry<S, F> {
    pub fn new(db_name: impl Into<String>, factory: F) -> Self {
        ViewRegistry { db_name: db_name.into(), factory, handles: RwLock::new(HashMap::new()) }
    }

    /// `getIndex(source, mapSrc, reduceSrc)` (spec §4.2): resolve the
    /// name, return the cached handle if one is already open, otherwise
    /// open-or-create the backing store and cache the new handle.
    pub fn get_index(&self, signature: &ViewSignature) -> Result<Arc<IndexHandle<S>>> {
        let name = index_name(&self.db_name, signature);

        if let Some(handle) = self.handles.read().get(&name) {
            return Ok(Arc::clone(handle));
        }

        let mut handles = self.handles.write();
        // Re-check under the write lock: another thread may have opened it first.
        if let Some(handle) = handles.get(&name) {
            return Ok(Arc::clone(handle));
        }

        let store = self.factory.open_or_create(&name)?;
        let handle = Arc::new(IndexHandle::open(name.clone(), signature.clone(), store)?);
        handles.insert(name, Arc::clone(&handle));
        Ok(handle)
    }

    /// `removeIndex`: tear down the backing store and drop the handle.
    /// Callers serialize this through the task queue's global lane
    /// (spec §4.2) so it can never interleave with an in-flight update.
    pub fn remove_index(&self, signature: &ViewSignature) -> Result<()> {
        let name = index_name(&self.db_name, signature);
        let mut handles = self.handles.write();
        if let Some(handle) = handles.remove(&name) {
            handle.store.lock().destroy()?;
        } else {
            self.factory.destroy(&name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_source::MemorySecondaryStore;
    use parking_lot::Mutex;
    use std::collections::HashMap as StdHashMap;

    struct MemoryFactory {
        stores: Mutex<StdHashMap<String, ()>>,
    }

    impl MemoryFactory {
        fn new() -> Self {
            MemoryFactory { stores: Mutex::new(StdHashMap::new()) }
        }
    }

    impl SecondaryStoreFactory<MemorySecondaryStore> for MemoryFactory {
        fn open_or_create(&self, name: &str) -> Result<MemorySecondaryStore> {
            self.stores.lock().insert(name.to_string(), ());
            Ok(MemorySecondaryStore::new())
        }

        fn destroy(&self, name: &str) -> Result<()> {
            self.stores.lock().remove(name);
            Ok(())
        }
    }

    #[test]
    fn get_index_caches_the_handle() {
        let reg = ViewRegistry::new("db", MemoryFactory::new());
        let sig = ViewSignature::map_only("emit(doc.x, null)");
        let h1 = reg.get_index(&sig).unwrap();
        let h2 = reg.get_index(&sig).unwrap();
        assert!(Arc::ptr_eq(&h1, &h2));
    }

    #[test]
    fn different_signatures_get_different_indexes() {
        let reg = ViewRegistry::new("db", MemoryFactory::new());
        let sig_a = ViewSignature::map_only("a");
        let sig_b = ViewSignature::map_only("b");
        let h1 = reg.get_index(&sig_a).unwrap();
        let h2 = reg.get_index(&sig_b).unwrap();
        assert_ne!(h1.name, h2.name);
    }

    #[test]
    fn remove_index_drops_the_cached_handle() {
        let reg = ViewRegistry::new("db", MemoryFactory::new());
        let sig = ViewSignature::map_only("a");
        let h1 = reg.get_index(&sig).unwrap();
        reg.remove_index(&sig).unwrap();
        let h2 = reg.get_index(&sig).unwrap();
        // New handle after removal - fresh store, fresh Arc.
        assert!(!Arc::ptr_eq(&h1, &h2));
    }
}
