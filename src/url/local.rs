use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{Mode, Stream, Url};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct LocalUrl {
    path: String,
    pub mode: Mode,
}

fn has_glob_chars(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

impl LocalUrl {
    pub fn new(path: &str, mode: Mode) -> Self {
        LocalUrl {
            path: path.to_string(),
            mode,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }

    pub fn open(&self) -> Result<Stream> {
        let path = Path::new(&self.path);
        match self.mode {
            Mode::Read => {
                debug!(path = %self.path, "opening local file for read");
                Ok(Stream::File(OpenOptions::new().read(true).open(path)?))
            }
            Mode::Write => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        fs::create_dir_all(parent)?;
                    }
                }
                debug!(path = %self.path, "opening local file for write");
                Ok(Stream::File(
                    OpenOptions::new()
                        .write(true)
                        .create(true)
                        .truncate(true)
                        .open(path)?,
                ))
            }
            Mode::Append => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        fs::create_dir_all(parent)?;
                    }
                }
                debug!(path = %self.path, "opening local file for append");
                Ok(Stream::File(
                    OpenOptions::new()
                        .read(true)
                        .write(true)
                        .create(true)
                        .open(path)?,
                ))
            }
        }
    }

    pub fn close(&self, _stream: Stream) -> Result<()> {
        Ok(())
    }

    pub fn exists(&self) -> Result<bool> {
        Ok(Path::new(&self.path).exists())
    }

    pub fn size(&self) -> Result<u64> {
        match fs::metadata(&self.path) {
            Ok(m) => Ok(m.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    pub fn delete(&self) -> Result<()> {
        let path = Path::new(&self.path);
        if path.is_dir() {
            fs::remove_dir_all(path)?;
        } else if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn expand(&self) -> Result<Vec<Url>> {
        let path = Path::new(&self.path);

        if has_glob_chars(&self.path) {
            let mut matches: Vec<PathBuf> = glob::glob(&self.path)
                .map_err(|e| crate::error::Error::config(format!("invalid glob pattern: {e}")))?
                .filter_map(|r| r.ok())
                .collect();
            matches.sort();
            if matches.is_empty() {
                return Ok(vec![Url::Local(self.clone())]);
            }
            return Ok(matches
                .into_iter()
                .map(|p| Url::Local(LocalUrl::new(&p.to_string_lossy(), self.mode)))
                .collect());
        }

        if path.is_dir() {
            let mut entries: Vec<PathBuf> = fs::read_dir(path)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect();
            entries.sort();
            return Ok(entries
                .into_iter()
                .map(|p| Url::Local(LocalUrl::new(&p.to_string_lossy(), self.mode)))
                .collect());
        }

        Ok(vec![Url::Local(self.clone())])
    }

    pub fn with_mode(&self, mode: Mode) -> LocalUrl {
        LocalUrl {
            path: self.path.clone(),
            mode,
        }
    }

    pub fn with_path(&self, p: &str) -> LocalUrl {
        let new_path = if has_glob_chars(&self.path) {
            let parent = Path::new(&self.path)
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_default();
            parent.join(p)
        } else {
            Path::new(&self.path).join(p)
        };
        LocalUrl {
            path: new_path.to_string_lossy().into_owned(),
            mode: self.mode,
        }
    }
}
