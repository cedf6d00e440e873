//! Persistence of the frequency map.
//!
//! - `scfg`: reader/writer for the block-structured text format shared with
//!   the configuration file
//! - `frequency_db`: the frequency database, written atomically

pub mod frequency_db;
pub mod scfg;

use std::io::{self, BufWriter, Write};
use std::path::Path;

use tempfile::NamedTempFile;

pub use frequency_db::{DbTarget, FrequencyDb, StoreError};
pub use scfg::{Directive, ScfgError};

/// Writes `path` through a uniquely named temporary file in the same
/// directory that is synced and then renamed over the target, so readers see
/// either the old or the new contents.
///
/// The temporary file is removed if `write` fails.
pub fn write_atomically<F>(path: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut BufWriter<NamedTempFile>) -> io::Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut writer = BufWriter::new(NamedTempFile::new_in(dir)?);
    write(&mut writer)?;
    writer.flush()?;
    let tmp = writer.into_inner().map_err(|e| e.into_error())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_write_atomically_replaces_target() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file");
        fs::write(&path, "old").unwrap();

        write_atomically(&path, |w| w.write_all(b"new")).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
        assert_eq!(entries(dir.path()), vec!["file"]);
    }

    #[test]
    fn test_write_atomically_failure_keeps_target() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file");
        fs::write(&path, "old").unwrap();

        let err = write_atomically(&path, |w| {
            w.write_all(b"partial")?;
            Err(io::Error::other("boom"))
        })
        .unwrap_err();

        assert_eq!(err.to_string(), "boom");
        assert_eq!(fs::read_to_string(&path).unwrap(), "old");
        assert_eq!(entries(dir.path()), vec!["file"]);
    }

    #[test]
    fn test_write_atomically_leaves_tmp_named_siblings_alone() {
        let dir = tempdir().unwrap();
        let sibling = dir.path().join("file.tmp");
        fs::write(&sibling, "unrelated").unwrap();

        write_atomically(&dir.path().join("file"), |w| w.write_all(b"new")).unwrap();

        assert_eq!(fs::read_to_string(&sibling).unwrap(), "unrelated");
        assert_eq!(entries(dir.path()), vec!["file", "file.tmp"]);
    }
}
