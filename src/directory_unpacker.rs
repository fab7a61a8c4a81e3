use std::fs;
use std::io::*;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::*;

/// An [Unpacker] which reads each book from a file under a given root directory.
///
/// Book names are paths relative to the root, like `/b/c` (behavior with `\` is undefined).  A best effort is made to
/// disallow names which use relative segments to escape the root directory, primarily as a measure to detect bugs.
#[derive(Debug)]
pub struct DirectoryUnpacker {
    root_path: PathBuf,
}

fn conv_path(path: impl AsRef<Path>) -> Result<relative_path::RelativePathBuf> {
    relative_path::RelativePathBuf::from_path(path)
        .map_err(|_| Error::new(ErrorKind::Other, "Invalid path"))
}

impl DirectoryUnpacker {
    pub fn new(root_path: &Path) -> DirectoryUnpacker {
        DirectoryUnpacker {
            root_path: root_path.to_path_buf(),
        }
    }

    /// Resolve a book name to a file under the root.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        // On Windows, canonicalize is currently very broken when relative path segments appear in the middle of a
        // path, and stdlib doesn't help us out. Go via `RelativePathBuf` to clean it up.
        let absolute = conv_path(name.trim_start_matches('/'))?.to_logical_path(&self.root_path);
        if !absolute.starts_with(&self.root_path) {
            return Err(Error::new(
                ErrorKind::Other,
                "path is outside the unpacker root directory",
            ));
        }
        Ok(absolute)
    }
}

impl Unpacker for DirectoryUnpacker {
    type Error = Error;

    fn unpack(&self, name: &str) -> Result<Option<Book>> {
        let path = self.resolve(name)?;
        trace!(name, path = %path.display(), "reading book");
        match fs::read(&path) {
            Ok(content) => Ok(Some(Book::new(name, content))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}
