//! The in-memory indices `mount()` builds and keeps in sync: a checksum ->
//! backing-file/virtual-path map, a namespace tree for `readdir`/`lookup`,
//! and the inode <-> virtual-path table `fuser`'s inode-based API needs
//! (the original's `fusepy` surface was path-based and had no equivalent).
//! Grounded on `original_source/freezetag/freezefs.py`'s `FreezeFS.__init__`
//! and `_add_ftag`/`_add_file`/`_delete_if_dangling`.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

pub const ROOT_INODE: u64 = 1;

#[derive(Debug)]
enum TreeNode {
    Dir(BTreeMap<String, TreeNode>),
    File,
}

/// A real on-disk file whose stripped-audio checksum matches a
/// [`FrozenItem`]. A checksum can have more than one backing file (e.g. the
/// same track copied twice) and more than one freezetag entry pointing at
/// it (multiple freezetags covering the same audio).
#[derive(Debug, Clone)]
pub struct FrozenItemFileEntry {
    pub real_path: PathBuf,
    pub metadata_info: Vec<(String, u32)>,
    pub metadata_len: u32,
}

#[derive(Debug, Clone)]
pub struct FrozenItemFreezetagEntry {
    pub freezetag_path: PathBuf,
    pub virtual_path: Vec<String>,
    pub metadata_len: u32,
}

#[derive(Debug, Clone, Default)]
pub struct FrozenItem {
    pub file_entries: Vec<FrozenItemFileEntry>,
    pub freezetag_entries: Vec<FrozenItemFreezetagEntry>,
}

/// Splits a freezetag-internal `"a/b/c.flac"` path into virtual-fs path
/// components, dropping empty segments a leading/trailing slash would
/// otherwise produce.
pub fn split_virtual_path(path: &str) -> Vec<String> {
    path.split('/').filter(|s| !s.is_empty()).map(String::from).collect()
}

pub fn join_virtual_path(path: &[String]) -> String {
    format!("/{}", path.join("/"))
}

/// Strips the leading root-name component off a virtual path, recovering
/// the slash-joined path as it appears inside the freezetag's own `files`
/// list (`FrozenFileEntry::path`).
pub fn relative_from_virtual(virtual_path: &[String]) -> String {
    virtual_path[1..].join("/")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
}

pub struct FreezeIndex {
    tree: TreeNode,
    /// Every virtual path currently reachable through `readdir`/`lookup`,
    /// mapped to the checksum it serves. Kept consistent with `tree` by
    /// `sync_tree`.
    path_map: HashMap<Vec<String>, [u8; 20]>,
    checksum_map: HashMap<[u8; 20], FrozenItem>,
    abs_path_map: HashMap<PathBuf, [u8; 20]>,
    /// `ftag path -> (virtual root name, checksums it contributed)`.
    freezetag_map: HashMap<PathBuf, (String, Vec<[u8; 20]>)>,
    /// Freezetags whose root name collided with one already mounted, kept
    /// around so removing the active one can promote the next in line, per
    /// the first-writer-wins policy `_add_ftag` implements.
    inactive_freezetags: Vec<(String, PathBuf)>,
    ino_of_path: HashMap<Vec<String>, u64>,
    path_of_ino: HashMap<u64, Vec<String>>,
    next_ino: u64,
}

impl Default for FreezeIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl FreezeIndex {
    pub fn new() -> Self {
        let mut ino_of_path = HashMap::new();
        let mut path_of_ino = HashMap::new();
        ino_of_path.insert(Vec::new(), ROOT_INODE);
        path_of_ino.insert(ROOT_INODE, Vec::new());
        FreezeIndex {
            tree: TreeNode::Dir(BTreeMap::new()),
            path_map: HashMap::new(),
            checksum_map: HashMap::new(),
            abs_path_map: HashMap::new(),
            freezetag_map: HashMap::new(),
            inactive_freezetags: Vec::new(),
            ino_of_path,
            path_of_ino,
            next_ino: ROOT_INODE + 1,
        }
    }

    // -- freezetag lifecycle -------------------------------------------

    pub fn root_is_active(&self, root: &str) -> bool {
        self.freezetag_map.values().any(|(r, _)| r == root)
    }

    pub fn mark_inactive(&mut self, root: String, freezetag_path: PathBuf) {
        self.inactive_freezetags.push((root, freezetag_path));
    }

    pub fn take_inactive_for_root(&mut self, root: &str) -> Option<PathBuf> {
        let pos = self.inactive_freezetags.iter().position(|(r, _)| r == root)?;
        Some(self.inactive_freezetags.remove(pos).1)
    }

    pub fn register_freezetag(&mut self, path: PathBuf, root: String, checksums: Vec<[u8; 20]>) {
        self.freezetag_map.insert(path, (root, checksums));
    }

    pub fn add_freezetag_entry(&mut self, checksum: [u8; 20], entry: FrozenItemFreezetagEntry) {
        self.checksum_map
            .entry(checksum)
            .or_default()
            .freezetag_entries
            .push(entry);
        self.sync_tree(checksum);
    }

    /// Removes a freezetag's contribution entirely. Returns its root name
    /// so the caller can look for a promotable entry in
    /// `inactive_freezetags`. Returns `None` if `path` was only ever
    /// inactive (already removed from that list as a side effect).
    pub fn remove_freezetag(&mut self, path: &Path) -> Option<String> {
        match self.freezetag_map.remove(path) {
            Some((root, checksums)) => {
                for checksum in checksums {
                    if let Some(item) = self.checksum_map.get_mut(&checksum) {
                        item.freezetag_entries.retain(|e| e.freezetag_path != path);
                    }
                    self.sync_tree(checksum);
                    self.prune_if_empty(checksum);
                }
                Some(root)
            }
            None => {
                self.inactive_freezetags.retain(|(_, p)| p != path);
                None
            }
        }
    }

    pub fn rename_freezetag(&mut self, old: &Path, new: PathBuf) {
        if let Some((root, checksums)) = self.freezetag_map.remove(old) {
            for checksum in &checksums {
                if let Some(item) = self.checksum_map.get_mut(checksum) {
                    for e in item.freezetag_entries.iter_mut() {
                        if e.freezetag_path == old {
                            e.freezetag_path = new.clone();
                        }
                    }
                }
            }
            self.freezetag_map.insert(new, (root, checksums));
        } else if let Some(slot) = self.inactive_freezetags.iter_mut().find(|(_, p)| p == old) {
            slot.1 = new;
        }
    }

    // -- backing file lifecycle ------------------------------------------

    pub fn checksum_of_path(&self, path: &Path) -> Option<[u8; 20]> {
        self.abs_path_map.get(path).copied()
    }

    pub fn add_path_entry(&mut self, checksum: [u8; 20], entry: FrozenItemFileEntry) {
        self.abs_path_map.insert(entry.real_path.clone(), checksum);
        self.checksum_map
            .entry(checksum)
            .or_default()
            .file_entries
            .push(entry);
        self.sync_tree(checksum);
    }

    pub fn remove_path_entry(&mut self, real_path: &Path) {
        let Some(checksum) = self.abs_path_map.remove(real_path) else {
            return;
        };
        if let Some(item) = self.checksum_map.get_mut(&checksum) {
            item.file_entries.retain(|e| e.real_path != real_path);
        }
        self.sync_tree(checksum);
        self.prune_if_empty(checksum);
    }

    /// All real paths currently indexed beneath `dir`, used to rewrite every
    /// affected entry when the watcher reports a directory rename (which
    /// `notify` surfaces as a single event for the directory, not one per
    /// descendant).
    pub fn paths_under(&self, dir: &Path) -> Vec<PathBuf> {
        self.abs_path_map
            .keys()
            .filter(|p| p.starts_with(dir))
            .cloned()
            .collect()
    }

    pub fn rename_path_entry(&mut self, old: &Path, new: PathBuf) {
        if let Some(checksum) = self.abs_path_map.remove(old) {
            self.abs_path_map.insert(new.clone(), checksum);
            if let Some(item) = self.checksum_map.get_mut(&checksum) {
                for e in item.file_entries.iter_mut() {
                    if e.real_path == old {
                        e.real_path = new.clone();
                    }
                }
            }
        }
    }

    pub fn frozen_item(&self, checksum: &[u8; 20]) -> Option<&FrozenItem> {
        self.checksum_map.get(checksum)
    }

    pub fn checksum_at(&self, path: &[String]) -> Option<[u8; 20]> {
        self.path_map.get(path).copied()
    }

    fn prune_if_empty(&mut self, checksum: [u8; 20]) {
        let empty = self
            .checksum_map
            .get(&checksum)
            .map(|i| i.file_entries.is_empty() && i.freezetag_entries.is_empty())
            .unwrap_or(false);
        if empty {
            self.checksum_map.remove(&checksum);
        }
    }

    /// Reconciles `tree`/`path_map`/the inode tables for `checksum` against
    /// its current entries: a virtual path is only reachable while at least
    /// one real file backs its audio, matching `_delete_if_dangling`'s "no
    /// file left -> drop the freezetag's view of it" behavior.
    fn sync_tree(&mut self, checksum: [u8; 20]) {
        let has_backing_file = self
            .checksum_map
            .get(&checksum)
            .map(|i| !i.file_entries.is_empty())
            .unwrap_or(false);

        let wanted: Vec<Vec<String>> = if has_backing_file {
            self.checksum_map
                .get(&checksum)
                .map(|i| i.freezetag_entries.iter().map(|e| e.virtual_path.clone()).collect())
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        let currently: Vec<Vec<String>> = self
            .path_map
            .iter()
            .filter(|(_, &c)| c == checksum)
            .map(|(p, _)| p.clone())
            .collect();

        for path in &currently {
            if !wanted.contains(path) {
                remove_leaf(&mut self.tree, path);
                self.path_map.remove(path);
                self.release_ino(path);
            }
        }
        for path in &wanted {
            if !currently.contains(path) {
                insert_leaf(&mut self.tree, path);
                self.path_map.insert(path.clone(), checksum);
                self.ino_for_path(path);
            }
        }
    }

    // -- namespace lookup --------------------------------------------------

    pub fn entry_kind(&self, path: &[String]) -> Option<EntryKind> {
        let mut node = &self.tree;
        for name in path {
            match node {
                TreeNode::Dir(children) => node = children.get(name)?,
                TreeNode::File => return None,
            }
        }
        Some(match node {
            TreeNode::Dir(_) => EntryKind::Dir,
            TreeNode::File => EntryKind::File,
        })
    }

    /// Immediate children of a directory, as `(name, kind)` pairs in
    /// lexicographic order.
    pub fn children(&self, path: &[String]) -> Option<Vec<(String, EntryKind)>> {
        let mut node = &self.tree;
        for name in path {
            match node {
                TreeNode::Dir(children) => node = children.get(name)?,
                TreeNode::File => return None,
            }
        }
        match node {
            TreeNode::Dir(children) => Some(
                children
                    .iter()
                    .map(|(name, node)| {
                        (
                            name.clone(),
                            match node {
                                TreeNode::Dir(_) => EntryKind::Dir,
                                TreeNode::File => EntryKind::File,
                            },
                        )
                    })
                    .collect(),
            ),
            TreeNode::File => None,
        }
    }

    // -- inode table --------------------------------------------------------

    pub fn ino_for_path(&mut self, path: &[String]) -> u64 {
        if let Some(&ino) = self.ino_of_path.get(path) {
            return ino;
        }
        let ino = self.next_ino;
        self.next_ino += 1;
        self.ino_of_path.insert(path.to_vec(), ino);
        self.path_of_ino.insert(ino, path.to_vec());
        ino
    }

    pub fn existing_ino(&self, path: &[String]) -> Option<u64> {
        self.ino_of_path.get(path).copied()
    }

    pub fn path_for_ino(&self, ino: u64) -> Option<&[String]> {
        self.path_of_ino.get(&ino).map(|v| v.as_slice())
    }

    fn release_ino(&mut self, path: &[String]) {
        if let Some(ino) = self.ino_of_path.remove(path) {
            self.path_of_ino.remove(&ino);
        }
    }
}

fn insert_leaf(tree: &mut TreeNode, path: &[String]) {
    if path.is_empty() {
        return;
    }
    let mut node = tree;
    for name in &path[..path.len() - 1] {
        node = match node {
            TreeNode::Dir(children) => children
                .entry(name.clone())
                .or_insert_with(|| TreeNode::Dir(BTreeMap::new())),
            TreeNode::File => return,
        };
    }
    if let TreeNode::Dir(children) = node {
        children.insert(path[path.len() - 1].clone(), TreeNode::File);
    }
}

/// Removes the leaf at `path` and prunes any directory left empty by the
/// removal, stopping at (and never removing) the root.
fn remove_leaf(tree: &mut TreeNode, path: &[String]) {
    remove_leaf_rec(tree, path);
}

fn remove_leaf_rec(node: &mut TreeNode, path: &[String]) -> bool {
    match node {
        TreeNode::Dir(children) => {
            if path.len() == 1 {
                children.remove(&path[0]);
            } else if let Some(child) = children.get_mut(&path[0]) {
                if remove_leaf_rec(child, &path[1..]) {
                    children.remove(&path[0]);
                }
            }
            children.is_empty()
        }
        TreeNode::File => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vp(s: &str) -> Vec<String> {
        split_virtual_path(s)
    }

    #[test]
    fn freezetag_entry_is_invisible_until_a_file_backs_it() {
        let mut index = FreezeIndex::new();
        let checksum = [1u8; 20];

        index.add_freezetag_entry(
            checksum,
            FrozenItemFreezetagEntry {
                freezetag_path: PathBuf::from("/lib/a.ftag"),
                virtual_path: vp("my-album/01.flac"),
                metadata_len: 10,
            },
        );
        assert_eq!(index.entry_kind(&vp("my-album/01.flac")), None);
        assert_eq!(index.entry_kind(&vp("my-album")), None);

        index.add_path_entry(
            checksum,
            FrozenItemFileEntry {
                real_path: PathBuf::from("/lib/01.flac"),
                metadata_info: vec![],
                metadata_len: 0,
            },
        );
        assert_eq!(index.entry_kind(&vp("my-album")), Some(EntryKind::Dir));
        assert_eq!(index.entry_kind(&vp("my-album/01.flac")), Some(EntryKind::File));
        assert_eq!(
            index.children(&vp("my-album")).unwrap(),
            vec![("01.flac".to_string(), EntryKind::File)]
        );
    }

    #[test]
    fn removing_the_only_backing_file_hides_the_path_again() {
        let mut index = FreezeIndex::new();
        let checksum = [2u8; 20];
        index.add_freezetag_entry(
            checksum,
            FrozenItemFreezetagEntry {
                freezetag_path: PathBuf::from("/lib/a.ftag"),
                virtual_path: vp("album/track.flac"),
                metadata_len: 0,
            },
        );
        index.add_path_entry(
            checksum,
            FrozenItemFileEntry {
                real_path: PathBuf::from("/lib/track.flac"),
                metadata_info: vec![],
                metadata_len: 0,
            },
        );
        assert!(index.entry_kind(&vp("album/track.flac")).is_some());

        index.remove_path_entry(Path::new("/lib/track.flac"));
        assert_eq!(index.entry_kind(&vp("album/track.flac")), None);
        // an emptied directory is pruned too
        assert_eq!(index.entry_kind(&vp("album")), None);
    }

    #[test]
    fn removing_a_freezetag_drops_its_virtual_paths_but_not_others() {
        let mut index = FreezeIndex::new();
        let checksum = [3u8; 20];
        index.add_path_entry(
            checksum,
            FrozenItemFileEntry {
                real_path: PathBuf::from("/lib/track.flac"),
                metadata_info: vec![],
                metadata_len: 0,
            },
        );
        index.add_freezetag_entry(
            checksum,
            FrozenItemFreezetagEntry {
                freezetag_path: PathBuf::from("/lib/a.ftag"),
                virtual_path: vp("album-a/track.flac"),
                metadata_len: 0,
            },
        );
        index.register_freezetag(PathBuf::from("/lib/a.ftag"), "album-a".to_string(), vec![checksum]);
        index.add_freezetag_entry(
            checksum,
            FrozenItemFreezetagEntry {
                freezetag_path: PathBuf::from("/lib/b.ftag"),
                virtual_path: vp("album-b/track.flac"),
                metadata_len: 0,
            },
        );
        index.register_freezetag(PathBuf::from("/lib/b.ftag"), "album-b".to_string(), vec![checksum]);

        index.remove_freezetag(Path::new("/lib/a.ftag"));
        assert_eq!(index.entry_kind(&vp("album-a/track.flac")), None);
        assert_eq!(index.entry_kind(&vp("album-b/track.flac")), Some(EntryKind::File));
    }

    #[test]
    fn ino_assignment_is_stable_and_survives_rename() {
        let mut index = FreezeIndex::new();
        let path = vp("album/track.flac");
        let ino = index.ino_for_path(&path);
        assert_eq!(index.ino_for_path(&path), ino);
        assert_eq!(index.path_for_ino(ino), Some(path.as_slice()));
    }

    #[test]
    fn second_freezetag_claiming_same_root_goes_inactive() {
        let mut index = FreezeIndex::new();
        assert!(!index.root_is_active("my-album"));
        index.register_freezetag(PathBuf::from("/lib/a.ftag"), "my-album".to_string(), vec![]);
        assert!(index.root_is_active("my-album"));

        index.mark_inactive("my-album".to_string(), PathBuf::from("/lib/b.ftag"));
        assert_eq!(
            index.take_inactive_for_root("my-album"),
            Some(PathBuf::from("/lib/b.ftag"))
        );
        assert_eq!(index.take_inactive_for_root("my-album"), None);
    }
}
