use log::debug;
use std::fs::{self, read_dir, rename};
use std::io;
use std::path::{Path, PathBuf};

/// Walk `root` in the deterministic order freezetag relies on: directories are
/// descended in lexicographic order and, within each directory, files are
/// visited in lexicographic order. Entries for which `skip` returns `true` are
/// left out of the result entirely. Returns `(absolute_path, relative_path)`
/// pairs.
pub fn walk_relative<P: AsRef<Path>>(
    root: P,
    skip: impl Fn(&Path) -> bool,
) -> io::Result<Vec<(PathBuf, PathBuf)>> {
    let root = root.as_ref();
    let mut out = Vec::new();
    walk_relative_into(root, root, &skip, &mut out)?;
    Ok(out)
}

fn walk_relative_into(
    root: &Path,
    dir: &Path,
    skip: &impl Fn(&Path) -> bool,
    out: &mut Vec<(PathBuf, PathBuf)>,
) -> io::Result<()> {
    let mut entries: Vec<_> = read_dir(dir)?.collect::<io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());

    let mut subdirs = Vec::new();
    for entry in entries {
        let path = entry.path();
        if skip(&path) {
            continue;
        }
        if entry.file_type()?.is_dir() {
            subdirs.push(path);
        } else {
            let rel = path.strip_prefix(root).unwrap().to_path_buf();
            out.push((path, rel));
        }
    }
    subdirs.sort();
    for subdir in subdirs {
        walk_relative_into(root, &subdir, skip, out)?;
    }
    Ok(())
}

/// Move a single file from one location to another.
///
/// This method uses [rename] at first. If [rename] fails because `from` and
/// `to` are on different filesystems, it falls back to copying `from` to
/// `to` and then removing `from`.
pub fn move_file<P1, P2>(from: P1, to: P2) -> io::Result<()>
where
    P1: AsRef<Path>,
    P2: AsRef<Path>,
{
    match rename(from.as_ref(), to.as_ref()) {
        Err(e) if is_cross_device_error(&e) => {
            debug!("Failed to rename across filesystems. Copying instead.");

            fs::copy(from.as_ref(), to.as_ref())?;
            debug!("Copying done. Removing source file.");

            fs::remove_file(from.as_ref())?;
            debug!("Source file removed.");

            Ok(())
        }
        other => other,
    }
}

fn is_cross_device_error(error: &io::Error) -> bool {
    let code = error.raw_os_error();
    #[cfg(windows)]
    {
        code == Some(17)
    }
    #[cfg(unix)]
    {
        code == Some(18)
    }
    #[cfg(all(not(windows), not(unix)))]
    {
        // unsupported platform
        false
    }
}
