//! Filesystem helpers: atomic writes, links and relative paths.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Write `content` to `path` atomically: write a sibling temp file, then rename.
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
  let dir = path.parent().unwrap_or(Path::new("."));
  let file_name = path
    .file_name()
    .map(|n| n.to_string_lossy().to_string())
    .unwrap_or_else(|| "file".to_string());
  let temp_path = dir.join(format!(".{}.tmp-{}", file_name, std::process::id()));
  fs::write(&temp_path, content)?;
  fs::rename(&temp_path, path).inspect_err(|_| {
    let _ = fs::remove_file(&temp_path);
  })
}

/// Create a symlink at `link` pointing to `target`.
#[cfg(unix)]
pub fn create_link(target: &Path, link: &Path) -> io::Result<()> {
  std::os::unix::fs::symlink(target, link)
}

/// Create a symlink at `link` pointing to `target`.
#[cfg(windows)]
pub fn create_link(target: &Path, link: &Path) -> io::Result<()> {
  let resolved = link.parent().map(|p| p.join(target)).unwrap_or_else(|| target.to_path_buf());
  if resolved.is_dir() {
    std::os::windows::fs::symlink_dir(target, link)
  } else {
    std::os::windows::fs::symlink_file(target, link)
  }
}

/// Whether something (including a dangling symlink) exists at `path`.
pub fn exists_no_follow(path: &Path) -> bool {
  path.symlink_metadata().is_ok()
}

/// Remove a path (file, directory, or symlink) without following links.
pub fn remove_path(path: &Path) -> io::Result<()> {
  let meta = path.symlink_metadata()?;
  if meta.is_dir() {
    fs::remove_dir_all(path)
  } else {
    fs::remove_file(path)
  }
}

/// Point `link` at `target`, replacing whatever is there.
///
/// Returns `false` when the link already pointed at `target` and nothing
/// changed.
///
/// Safe against other linkers placing the same link concurrently: a link
/// that disappears before removal, or reappears pointing at `target` before
/// creation, is not an error.
pub fn replace_link(target: &Path, link: &Path) -> io::Result<bool> {
  let points_at_target = || fs::read_link(link).ok().as_deref() == Some(target);
  if exists_no_follow(link) {
    if points_at_target() {
      return Ok(false);
    }
    match remove_path(link) {
      Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
      _ => {}
    }
  }
  if let Some(parent) = link.parent() {
    fs::create_dir_all(parent)?;
  }
  match create_link(target, link) {
    Ok(()) => Ok(true),
    Err(e) if e.kind() == io::ErrorKind::AlreadyExists && points_at_target() => Ok(false),
    Err(e) => Err(e),
  }
}

/// Compute the relative path that leads from directory `from` to `to`.
///
/// Both paths should be absolute (or both relative to the same base).
pub fn relative_path(from: &Path, to: &Path) -> PathBuf {
  let from: Vec<Component> = from.components().collect();
  let to: Vec<Component> = to.components().collect();

  let common = from.iter().zip(to.iter()).take_while(|(a, b)| a == b).count();

  let mut result = PathBuf::new();
  for _ in common..from.len() {
    result.push("..");
  }
  for component in &to[common..] {
    result.push(component.as_os_str());
  }
  if result.as_os_str().is_empty() {
    result.push(".");
  }
  result
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  mod relative {
    use super::*;

    #[test]
    fn sibling_directories() {
      let rel = relative_path(Path::new("/ws/packages/a"), Path::new("/ws/packages/b"));
      assert_eq!(rel, PathBuf::from("../b"));
    }

    #[test]
    fn nested_target() {
      let rel = relative_path(Path::new("/ws"), Path::new("/ws/packages/b"));
      assert_eq!(rel, PathBuf::from("packages/b"));
    }

    #[test]
    fn same_directory() {
      let rel = relative_path(Path::new("/ws/a"), Path::new("/ws/a"));
      assert_eq!(rel, PathBuf::from("."));
    }
  }

  #[test]
  fn atomic_write_replaces_content() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("package.json");
    atomic_write(&path, b"one").unwrap();
    atomic_write(&path, b"two").unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "two");
    assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
  }

  #[test]
  #[cfg(unix)]
  fn replace_link_recreates_stale_link() {
    let temp = TempDir::new().unwrap();
    let a = temp.path().join("a");
    let b = temp.path().join("b");
    fs::create_dir(&a).unwrap();
    fs::create_dir(&b).unwrap();
    let link = temp.path().join("deps/@scope/pkg");

    assert!(replace_link(&a, &link).unwrap());
    assert!(!replace_link(&a, &link).unwrap());
    assert!(replace_link(&b, &link).unwrap());
    assert_eq!(fs::read_link(&link).unwrap(), b);
  }

  #[test]
  #[cfg(unix)]
  fn replace_link_tolerates_concurrent_linkers() {
    let temp = TempDir::new().unwrap();
    let target = temp.path().join("target");
    fs::create_dir(&target).unwrap();
    let link = temp.path().join("deps/shared");

    std::thread::scope(|scope| {
      for _ in 0..8 {
        scope.spawn(|| {
          for _ in 0..50 {
            let _ = fs::remove_file(&link);
            replace_link(&target, &link).unwrap();
          }
        });
      }
    });
    assert_eq!(fs::read_link(&link).unwrap(), target);
  }

  #[test]
  #[cfg(unix)]
  fn replace_link_removes_real_directory() {
    let temp = TempDir::new().unwrap();
    let target = temp.path().join("target");
    fs::create_dir(&target).unwrap();
    let link = temp.path().join("slot");
    fs::create_dir(&link).unwrap();
    fs::write(link.join("stale.txt"), "x").unwrap();

    assert!(replace_link(&target, &link).unwrap());
    assert_eq!(fs::read_link(&link).unwrap(), target);
  }
}
