//! Spool / moderation store (C9): one directory per list under the spool
//! root, atomic write-then-rename `.eml` files, lexicographic-descending
//! directory listing for the moderation queue.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use crate::Error;

pub struct Spool {
    root: PathBuf,
}

impl Spool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Spool { root: root.into() }
    }

    fn list_dir(&self, list_id: i64) -> PathBuf {
        self.root.join(list_id.to_string())
    }

    /// Writes `contents` (header + blank line + body) as a uniquely named
    /// `.eml` file under the list's directory, creating it (mode 0700) if
    /// needed. The write goes to a temp file first and is renamed into
    /// place so a reader never observes a partial file; the temp file is
    /// removed if any step fails mid-write.
    pub fn save(&self, list_id: i64, contents: &[u8]) -> Result<String, Error> {
        let dir = self.list_dir(list_id);
        fs::create_dir_all(&dir)?;
        set_private_mode(&dir)?;

        let filename = format!(
            "{}-{}.eml",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock before epoch")
                .as_secs(),
            rand::random::<u64>()
        );
        let final_path = dir.join(&filename);
        let tmp_path = dir.join(format!(".{filename}.tmp"));

        let write_result = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(contents)?;
            file.sync_all()?;
            fs::rename(&tmp_path, &final_path)?;
            Ok(())
        })();

        if let Err(e) = write_result {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        Ok(filename)
    }

    /// Rejects filenames containing `..` or `/` before reading, so a
    /// moderation UI can never be tricked into reading outside the list's
    /// directory.
    pub fn open(&self, list_id: i64, filename: &str) -> Result<Vec<u8>, Error> {
        validate_filename(filename)?;
        let path = self.list_dir(list_id).join(filename);
        Ok(fs::read(path)?)
    }

    pub fn delete(&self, list_id: i64, filename: &str) -> Result<(), Error> {
        if filename.is_empty() {
            return Err(Error::ProtocolViolation("empty spool filename".to_string()));
        }
        validate_filename(filename)?;
        let path = self.list_dir(list_id).join(filename);
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Lexicographically descending filenames (newest first, since names
    /// are prefixed with a unix timestamp).
    pub fn list(&self, list_id: i64) -> Result<Vec<String>, Error> {
        let dir = self.list_dir(list_id);
        let mut names = match fs::read_dir(&dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.file_name().into_string().ok())
                .filter(|name| !name.starts_with('.'))
                .collect::<Vec<_>>(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        names.sort_unstable_by(|a, b| b.cmp(a));
        Ok(names)
    }
}

fn validate_filename(filename: &str) -> Result<(), Error> {
    if filename.contains("..") || filename.contains('/') {
        return Err(Error::ProtocolViolation("invalid spool filename".to_string()));
    }
    Ok(())
}

#[cfg(unix)]
fn set_private_mode(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn set_private_mode(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_spool() -> Spool {
        let dir = std::env::temp_dir().join(format!("listmgr-spool-test-{}-{}", std::process::id(), rand::random::<u64>()));
        Spool::new(dir)
    }

    #[test]
    fn save_then_open_round_trips_bytes() {
        let spool = temp_spool();
        let name = spool.save(1, b"Subject: hi\r\n\r\nbody").unwrap();
        let read_back = spool.open(1, &name).unwrap();
        assert_eq!(read_back, b"Subject: hi\r\n\r\nbody");
    }

    #[test]
    fn open_rejects_path_traversal() {
        let spool = temp_spool();
        assert!(spool.open(1, "../../etc/passwd").is_err());
        assert!(spool.open(1, "sub/dir.eml").is_err());
    }

    #[test]
    fn delete_missing_file_is_not_an_error() {
        let spool = temp_spool();
        assert!(spool.delete(1, "missing.eml").is_ok());
    }

    #[test]
    fn delete_rejects_empty_filename() {
        let spool = temp_spool();
        assert!(spool.delete(1, "").is_err());
    }

    #[test]
    fn list_is_lexicographically_descending() {
        let spool = temp_spool();
        let a = spool.save(1, b"one").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = spool.save(1, b"two").unwrap();
        let listed = spool.list(1).unwrap();
        assert_eq!(listed.len(), 2);
        // Whichever sorts later lexicographically comes first.
        let mut expected = vec![a, b];
        expected.sort_unstable_by(|x, y| y.cmp(x));
        assert_eq!(listed, expected);
    }

    #[test]
    fn list_on_missing_directory_is_empty_not_error() {
        let spool = temp_spool();
        assert_eq!(spool.list(42).unwrap(), Vec::<String>::new());
    }
}
