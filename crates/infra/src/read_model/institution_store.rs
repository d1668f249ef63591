use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;

use coop_core::InstitutionId;
use std::sync::Arc;

/// Institution-isolated key/value store for disposable read models.
pub trait InstitutionStore<K, V>: Send + Sync {
    fn get(&self, institution_id: InstitutionId, key: &K) -> Option<V>;
    fn upsert(&self, institution_id: InstitutionId, key: K, value: V);
    /// Mutate the record under `key` in place, starting from `init()` when it
    /// does not exist yet. A new record is kept only if `update` returns
    /// `true`; the return value is `update`'s.
    fn upsert_with(
        &self,
        institution_id: InstitutionId,
        key: K,
        init: &dyn Fn() -> V,
        update: &mut dyn FnMut(&mut V) -> bool,
    ) -> bool;
    fn list(&self, institution_id: InstitutionId) -> Vec<V>;
}

impl<K, V, S> InstitutionStore<K, V> for Arc<S>
where
    S: InstitutionStore<K, V> + ?Sized,
{
    fn get(&self, institution_id: InstitutionId, key: &K) -> Option<V> {
        (**self).get(institution_id, key)
    }

    fn upsert(&self, institution_id: InstitutionId, key: K, value: V) {
        (**self).upsert(institution_id, key, value)
    }

    fn upsert_with(
        &self,
        institution_id: InstitutionId,
        key: K,
        init: &dyn Fn() -> V,
        update: &mut dyn FnMut(&mut V) -> bool,
    ) -> bool {
        (**self).upsert_with(institution_id, key, init, update)
    }

    fn list(&self, institution_id: InstitutionId) -> Vec<V> {
        (**self).list(institution_id)
    }
}

/// In-memory store, partitioned by institution.
///
/// `list` returns values in insertion order of their keys.
#[derive(Debug)]
pub struct InMemoryInstitutionStore<K, V> {
    inner: RwLock<HashMap<InstitutionId, Partition<K, V>>>,
}

#[derive(Debug)]
struct Partition<K, V> {
    order: Vec<K>,
    values: HashMap<K, V>,
}

impl<K, V> Default for Partition<K, V> {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            values: HashMap::new(),
        }
    }
}

impl<K, V> InMemoryInstitutionStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryInstitutionStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> InstitutionStore<K, V> for InMemoryInstitutionStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, institution_id: InstitutionId, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(&institution_id)?.values.get(key).cloned()
    }

    fn upsert(&self, institution_id: InstitutionId, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            let partition = map.entry(institution_id).or_default();
            if !partition.values.contains_key(&key) {
                partition.order.push(key.clone());
            }
            partition.values.insert(key, value);
        }
    }

    fn upsert_with(
        &self,
        institution_id: InstitutionId,
        key: K,
        init: &dyn Fn() -> V,
        update: &mut dyn FnMut(&mut V) -> bool,
    ) -> bool {
        let Ok(mut map) = self.inner.write() else {
            return false;
        };
        let partition = map.entry(institution_id).or_default();
        if let Some(existing) = partition.values.get_mut(&key) {
            return update(existing);
        }

        let mut fresh = init();
        let keep = update(&mut fresh);
        if keep {
            partition.order.push(key.clone());
            partition.values.insert(key, fresh);
        }
        keep
    }

    fn list(&self, institution_id: InstitutionId) -> Vec<V> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };

        match map.get(&institution_id) {
            Some(partition) => partition
                .order
                .iter()
                .filter_map(|k| partition.values.get(k).cloned())
                .collect(),
            None => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_is_scoped_and_ordered() {
        let store: InMemoryInstitutionStore<u32, &'static str> = InMemoryInstitutionStore::new();
        let a = InstitutionId::new();
        let b = InstitutionId::new();
        store.upsert(a, 2, "second");
        store.upsert(a, 1, "first");
        store.upsert(b, 9, "other");
        store.upsert(a, 2, "second, updated");

        assert_eq!(store.list(a), vec!["second, updated", "first"]);
        assert_eq!(store.get(b, &9), Some("other"));
        assert_eq!(store.get(a, &9), None);
        assert_eq!(store.list(b).len(), 1);
    }

    #[test]
    fn upsert_with_mutates_in_place_and_skips_rejected_inserts() {
        let store: InMemoryInstitutionStore<u32, Vec<u32>> = InMemoryInstitutionStore::new();
        let inst = InstitutionId::new();

        assert!(!store.upsert_with(inst, 1, &Vec::<u32>::new, &mut |_| false));
        assert!(store.list(inst).is_empty());

        assert!(store.upsert_with(inst, 1, &Vec::<u32>::new, &mut |v| {
            v.push(10);
            true
        }));
        store.upsert_with(inst, 1, &Vec::<u32>::new, &mut |v| {
            v.push(11);
            false
        });
        assert_eq!(store.get(inst, &1), Some(vec![10, 11]));
    }
}
