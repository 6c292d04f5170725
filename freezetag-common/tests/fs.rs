use freezetag_common::fs::walk_relative;
use std::fs;
use std::path::Path;

#[test]
fn walk_relative_is_lexicographic_dirs_first() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    fs::create_dir(root.join("b")).unwrap();
    fs::create_dir(root.join("a")).unwrap();
    fs::write(root.join("z.txt"), b"").unwrap();
    fs::write(root.join("m.txt"), b"").unwrap();
    fs::write(root.join("b/2.txt"), b"").unwrap();
    fs::write(root.join("b/1.txt"), b"").unwrap();
    fs::write(root.join("a/only.txt"), b"").unwrap();

    let entries = walk_relative(root, |_| false).unwrap();
    let rel: Vec<_> = entries
        .iter()
        .map(|(_, r)| r.to_str().unwrap().to_string())
        .collect();

    assert_eq!(
        rel,
        vec!["m.txt", "z.txt", "a/only.txt", "b/1.txt", "b/2.txt"]
    );
}

#[test]
fn walk_relative_honors_skip_predicate() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    fs::write(root.join("keep.flac"), b"").unwrap();
    fs::write(root.join("ignore.ftag"), b"").unwrap();

    let entries = walk_relative(root, |p: &Path| {
        p.extension().and_then(|e| e.to_str()) == Some("ftag")
    })
    .unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].1, Path::new("keep.flac"));
}
