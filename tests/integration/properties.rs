use chrono::{TimeZone, Utc};
use hashsync::diff::diff;
use hashsync::tree::hasher::content_hash;
use hashsync::tree::{EntryMetadata, Tree};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn path_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,6}(/[a-z]{1,6}){0,2}(\\.txt)?"
}

fn files_strategy() -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    prop::collection::btree_map(path_strategy(), prop::collection::vec(any::<u8>(), 0..32), 0..16)
}

fn build<'a, I>(device: &str, files: I) -> Tree
where
    I: IntoIterator<Item = (&'a String, &'a Vec<u8>)>,
{
    let stamp = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut tree = Tree::new(device);
    for (path, bytes) in files {
        tree.upsert(path, content_hash(bytes), EntryMetadata::new(bytes.len() as u64, stamp))
            .unwrap();
    }
    tree
}

proptest! {
    #[test]
    fn test_root_is_independent_of_insertion_order(
        files in files_strategy(),
        seed in any::<u64>(),
    ) {
        let forward = build("a", files.iter());

        let mut shuffled: Vec<_> = files.iter().collect();
        let len = shuffled.len().max(1);
        shuffled.rotate_left((seed as usize) % len);
        shuffled.reverse();
        let reordered = build("b", shuffled);

        prop_assert_eq!(forward.root_hash(), reordered.root_hash());
    }

    #[test]
    fn test_diff_partitions_the_changed_paths(
        base in files_strategy(),
        target in files_strategy(),
    ) {
        let a = build("a", base.iter());
        let b = build("b", target.iter());
        let result = diff(&a, &b);

        for entry in &result.added {
            prop_assert!(!base.contains_key(&entry.path));
            prop_assert!(target.contains_key(&entry.path));
        }
        for removal in &result.removed {
            prop_assert!(base.contains_key(&removal.path));
            prop_assert!(!target.contains_key(&removal.path));
        }
        for modification in &result.modified {
            prop_assert_ne!(modification.old_hash, modification.new_hash);
        }

        let expected_changes = base
            .keys()
            .chain(target.keys())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .filter(|path| match (base.get(*path), target.get(*path)) {
                (Some(x), Some(y)) => content_hash(x) != content_hash(y),
                _ => true,
            })
            .count();
        prop_assert_eq!(result.len(), expected_changes);
        prop_assert_eq!(result.is_empty(), a.root_hash() == b.root_hash());
    }

    #[test]
    fn test_self_diff_is_empty(files in files_strategy()) {
        let tree = build("a", files.iter());
        prop_assert!(diff(&tree, &tree).is_empty());
    }

    #[test]
    fn test_applying_a_diff_reaches_the_target_root(
        base in files_strategy(),
        target in files_strategy(),
    ) {
        let mut a = build("a", base.iter());
        let b = build("b", target.iter());
        let change = diff(&a, &b);
        a.apply_diff(&change).unwrap();
        prop_assert_eq!(a.root_hash(), b.root_hash());
    }

    #[test]
    fn test_serialized_tree_keeps_its_root(files in files_strategy()) {
        let tree = build("a", files.iter());
        let restored = Tree::deserialize(&tree.serialize().unwrap()).unwrap();
        prop_assert_eq!(restored.root_hash(), tree.root_hash());
        prop_assert_eq!(restored.version(), tree.version());
        prop_assert_eq!(restored.entries(), tree.entries());
    }

    #[test]
    fn test_removal_is_idempotent(files in files_strategy(), victim in path_strategy()) {
        let mut tree = build("a", files.iter());
        tree.remove(&victim);
        let root = tree.root_hash();
        let version = tree.version();

        prop_assert!(!tree.remove(&victim));
        prop_assert_eq!(tree.root_hash(), root);
        prop_assert_eq!(tree.version(), version);
    }
}
