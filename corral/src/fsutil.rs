use std::fs;
use std::io;
use std::path::Path;

/// Write `contents` to `path` through a sibling temporary file and a rename,
/// creating parent directories as needed. Readers never observe a partial
/// write.
pub fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    let name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    fs::create_dir_all(parent)?;

    let tmp = parent.join(format!(".{}.tmp", name.to_string_lossy()));
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_through_a_rename() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("deep/nested/file");

        atomic_write(&path, b"contents").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"contents");
        assert_eq!(fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }
}
