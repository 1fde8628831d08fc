//! Cache tree: a bottom-up summary of the index that lets the commit
//! builder produce a root tree id without re-hashing unchanged
//! subdirectories (§4.4). Grounded in the teacher's `MergedTree` builder,
//! generalized from jj's merge-aware tree to a plain directory tree and
//! from its tree-store backend to the `TreeSink` abstraction below, since
//! this spec has no merged/conflicted tree representation at the index
//! layer (conflicts live as separate index stages instead, §4.3).

use std::collections::BTreeMap;

use crate::backend::{FileMode, TreeEntry, TreeObject};
use crate::index::{CacheEntry, EntryMode, Index};
use crate::object_id::{ObjectId, TreeId};

/// Where a built tree is written. The local store implements this
/// directly; tests can swap in an in-memory sink.
pub trait TreeSink {
    fn write_tree(&mut self, tree: &TreeObject) -> TreeId;
}

struct PathNode {
    children: BTreeMap<String, PathNode>,
    file: Option<(EntryMode, [u8; 20])>,
}

impl PathNode {
    fn new() -> Self {
        PathNode {
            children: BTreeMap::new(),
            file: None,
        }
    }
}

/// Builds the root tree id for every entry currently at stage 0 in
/// `index`, writing each subtree through `sink`. Two indexes with the same
/// set of stage-0 `(name, mode, oid)` triples always produce the same root
/// id regardless of insertion order, since the directory walk sorts by
/// name at every level and `TreeObject::serialize` sorts again.
pub fn build_cache_tree(index: &Index, sink: &mut dyn TreeSink) -> TreeId {
    let mut root = PathNode::new();
    for entry in index.entries() {
        if entry.stage != 0 {
            continue;
        }
        insert(&mut root, entry);
    }
    write_node(&root, sink)
}

fn insert(root: &mut PathNode, entry: &CacheEntry) {
    let mut node = root;
    let mut components: Vec<&str> = entry.name.split('/').collect();
    let leaf = components.pop().expect("entry name is never empty");
    for component in components {
        node = node
            .children
            .entry(component.to_string())
            .or_insert_with(PathNode::new);
    }
    if entry.mode == EntryMode::Directory {
        node.children.entry(leaf.to_string()).or_insert_with(PathNode::new);
    } else {
        let leaf_node = node.children.entry(leaf.to_string()).or_insert_with(PathNode::new);
        leaf_node.file = Some((entry.mode, entry.oid));
    }
}

fn write_node(node: &PathNode, sink: &mut dyn TreeSink) -> TreeId {
    let mut entries = Vec::with_capacity(node.children.len());
    for (name, child) in &node.children {
        if let Some((mode, oid)) = child.file {
            let file_mode = match mode {
                EntryMode::Regular => FileMode::Regular,
                EntryMode::Directory => FileMode::Directory,
            };
            entries.push(TreeEntry {
                mode: file_mode,
                name: name.clone(),
                id: oid.to_vec(),
            });
        } else {
            let child_id = write_node(child, sink);
            entries.push(TreeEntry {
                mode: FileMode::Directory,
                name: name.clone(),
                id: child_id.as_bytes().to_vec(),
            });
        }
    }
    let tree = TreeObject { entries };
    sink.write_tree(&tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Stat;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct MemSink {
        trees: RefCell<HashMap<TreeId, TreeObject>>,
    }

    impl MemSink {
        fn new() -> Self {
            MemSink {
                trees: RefCell::new(HashMap::new()),
            }
        }
    }

    impl TreeSink for MemSink {
        fn write_tree(&mut self, tree: &TreeObject) -> TreeId {
            let id = tree.id();
            self.trees.borrow_mut().insert(id.clone(), tree.clone());
            id
        }
    }

    fn stat() -> Stat {
        Stat {
            ctime_sec: 0,
            ctime_nsec: 0,
            mtime_sec: 0,
            mtime_nsec: 0,
            dev: 0,
            ino: 0,
            uid: 0,
            gid: 0,
            size: 0,
        }
    }

    fn file(name: &str, byte: u8) -> CacheEntry {
        CacheEntry::new(name.to_string(), EntryMode::Regular, [byte; 20], stat())
    }

    #[test]
    fn builds_nested_tree_deterministically() {
        let mut index_a = Index::default();
        index_a.add(file("a.txt", 1));
        index_a.add(file("dir/b.txt", 2));
        index_a.add(file("dir/c.txt", 3));

        let mut index_b = Index::default();
        index_b.add(file("dir/c.txt", 3));
        index_b.add(file("dir/b.txt", 2));
        index_b.add(file("a.txt", 1));

        let mut sink_a = MemSink::new();
        let mut sink_b = MemSink::new();
        let root_a = build_cache_tree(&index_a, &mut sink_a);
        let root_b = build_cache_tree(&index_b, &mut sink_b);
        assert_eq!(root_a, root_b);
    }

    #[test]
    fn ignores_higher_stage_entries() {
        let mut index = Index::default();
        index.add(file("a.txt", 1));
        let mut conflicted = file("b.txt", 2);
        conflicted.stage = 1;
        index.add(conflicted);

        let mut sink = MemSink::new();
        let root = build_cache_tree(&index, &mut sink);
        let tree = sink.trees.borrow().get(&root).cloned().unwrap();
        assert_eq!(tree.entries.len(), 1);
        assert_eq!(tree.entries[0].name, "a.txt");
    }

    #[test]
    fn empty_directory_sentinel_is_preserved() {
        let mut index = Index::default();
        index.add(CacheEntry::new(
            "empty".to_string(),
            EntryMode::Directory,
            [0; 20],
            stat(),
        ));
        let mut sink = MemSink::new();
        let root = build_cache_tree(&index, &mut sink);
        let tree = sink.trees.borrow().get(&root).cloned().unwrap();
        assert_eq!(tree.entries.len(), 1);
        assert_eq!(tree.entries[0].name, "empty");
        assert_eq!(tree.entries[0].mode, FileMode::Directory);
    }
}
