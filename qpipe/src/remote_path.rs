//! Remote path normalization.

use std::os::unix::ffi::OsStrExt;
use std::path::{Component, Path, PathBuf};

/// Makes `path` absolute and lexically normalized.
///
/// Relative paths are anchored at `/`; `.` is dropped and `..` removes the
/// previous component (never climbing above `/`). Repeated separators,
/// including a leading `//`, collapse to one.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                out.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    out
}

/// Normalized path as wire bytes.
pub fn to_wire(path: &Path) -> Vec<u8> {
    normalize(path).as_os_str().as_bytes().to_vec()
}
