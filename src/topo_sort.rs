//! Stable topological ordering.

use std::hash::Hash;

use crate::FHashSet;

#[derive(Debug, PartialEq, Eq)]
pub struct TopologicalSortError<K> {
    /// Keys of items stuck in a dependency cycle (or downstream of one).
    pub cyclical: Vec<K>,
    /// Referenced keys that are not in the input set.
    pub external_dependencies: Vec<K>,
    /// Keys of items referencing a key outside the input set.
    pub external_dependents: Vec<K>,
}

impl<K: std::fmt::Debug> std::fmt::Display for TopologicalSortError<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "topological sort failed: cyclical {:?}, external dependencies {:?} referenced by {:?}",
            self.cyclical, self.external_dependencies, self.external_dependents,
        )
    }
}

/// Orders `items` so that every item comes after all its dependencies.
///
/// Items whose dependencies are satisfied are emitted in input order, so the
/// result is deterministic for a given input. Dependencies are referenced by
/// key; a reference to a key outside the input set is an error, as is a
/// cycle.
pub fn sort_by_dependencies<T, K>(
    items: Vec<T>,
    key_fn: impl Fn(&T) -> K,
    deps_fn: impl Fn(&T) -> Vec<K>,
) -> Result<Vec<T>, TopologicalSortError<K>>
where
    K: Eq + Hash + Clone,
{
    let keys: Vec<K> = items.iter().map(&key_fn).collect();
    let key_set: FHashSet<&K> = keys.iter().collect();
    let deps: Vec<Vec<K>> = items.iter().map(&deps_fn).collect();

    let mut emitted: FHashSet<&K> = FHashSet::default();
    let mut order = Vec::with_capacity(items.len());

    loop {
        let mut progressed = false;
        for (i, key) in keys.iter().enumerate() {
            if emitted.contains(key) {
                continue;
            }
            // self-references and external references never resolve, since
            // only emitted input keys land in `emitted`
            let ready = deps[i].iter().all(|dep| emitted.contains(dep));
            if ready {
                emitted.insert(key);
                order.push(i);
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }

    if order.len() != items.len() {
        let mut cyclical = Vec::new();
        let mut external_dependencies = Vec::new();
        let mut external_dependents = Vec::new();
        for (i, key) in keys.iter().enumerate() {
            if emitted.contains(key) {
                continue;
            }
            let missing: Vec<&K> = deps[i]
                .iter()
                .filter(|dep| !key_set.contains(dep))
                .collect();
            if missing.is_empty() {
                cyclical.push(key.clone());
            } else {
                external_dependents.push(key.clone());
                for dep in missing {
                    if !external_dependencies.contains(dep) {
                        external_dependencies.push(dep.clone());
                    }
                }
            }
        }
        return Err(TopologicalSortError {
            cyclical,
            external_dependencies,
            external_dependents,
        });
    }

    // consume `items` in emission order
    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .map(|i| slots[i].take().unwrap())
        .collect())
}
