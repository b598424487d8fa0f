//! Storage abstraction: a uniform open/read/write/expand/size/delete
//! surface over local files, S3, Google Cloud Storage, and HTTP(S)
//! endpoints.
//!
//! The interface is kept deliberately narrow (eight methods) because three
//! of the four backends stage through a local scratch file or in-memory
//! buffer to give every caller a random-accessible, `Seek`-able byte
//! stream -- the contract every block-level algorithm in this crate
//! depends on.

mod gcs;
mod http;
mod local;
mod s3;
mod stream;

use std::fmt;

use crate::error::{Error, Result};

pub use stream::Stream;

/// Access mode a [`Url`] is opened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
    Append,
}

/// An opaque reference to a storage resource: a local path, an `s3://`
/// object, a `gs://` object, or an `http(s)://` endpoint.
#[derive(Debug, Clone)]
pub enum Url {
    Local(local::LocalUrl),
    S3(s3::S3Url),
    Gcs(gcs::GcsUrl),
    Http(http::HttpUrl),
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Url::Local(u) => write!(f, "{}", u.as_str()),
            Url::S3(u) => write!(f, "{}", u.as_str()),
            Url::Gcs(u) => write!(f, "{}", u.as_str()),
            Url::Http(u) => write!(f, "{}", u.as_str()),
        }
    }
}

impl Url {
    /// Parses a URL string, selecting a backend by scheme. Bare paths and
    /// `file://` URLs select the local backend.
    pub fn parse(raw: &str) -> Result<Url> {
        Self::parse_with_mode(raw, Mode::Read)
    }

    pub fn parse_with_mode(raw: &str, mode: Mode) -> Result<Url> {
        if let Some(rest) = raw.strip_prefix("s3://") {
            return Ok(Url::S3(s3::S3Url::new(rest, mode)?));
        }
        if let Some(rest) = raw.strip_prefix("gs://") {
            return Ok(Url::Gcs(gcs::GcsUrl::new(rest, mode)?));
        }
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Ok(Url::Http(http::HttpUrl::new(raw, mode)?));
        }
        if let Some(rest) = raw.strip_prefix("file://") {
            return Ok(Url::Local(local::LocalUrl::new(rest, mode)));
        }
        if raw.contains("://") {
            let scheme = raw.split("://").next().unwrap_or(raw);
            return Err(Error::config(format!("unsupported URL scheme: {scheme}")));
        }
        Ok(Url::Local(local::LocalUrl::new(raw, mode)))
    }

    pub fn mode(&self) -> Mode {
        match self {
            Url::Local(u) => u.mode,
            Url::S3(u) => u.mode,
            Url::Gcs(u) => u.mode,
            Url::Http(u) => u.mode,
        }
    }

    /// Opens the resource in its current mode, returning a uniform stream.
    /// Write/append modes create missing parent directories for the local
    /// backend and stage through a scratch file/buffer for remote backends.
    pub fn open(&self) -> Result<Stream> {
        match self {
            Url::Local(u) => u.open(),
            Url::S3(u) => u.open(),
            Url::Gcs(u) => u.open(),
            Url::Http(u) => u.open(),
        }
    }

    /// Finalizes a stream previously returned by [`Url::open`]: uploads
    /// staged bytes for write/append modes on remote backends, issues the
    /// buffered request for HTTP write mode. A no-op for local read/write
    /// once the file handle itself has been dropped.
    pub fn close(&self, stream: Stream) -> Result<()> {
        match self {
            Url::Local(u) => u.close(stream),
            Url::S3(u) => u.close(stream),
            Url::Gcs(u) => u.close(stream),
            Url::Http(u) => u.close(stream),
        }
    }

    pub fn exists(&self) -> Result<bool> {
        match self {
            Url::Local(u) => u.exists(),
            Url::S3(u) => u.exists(),
            Url::Gcs(u) => u.exists(),
            Url::Http(u) => u.exists(),
        }
    }

    /// Size in bytes. Returns `0` (not an error) when the remote object
    /// does not exist, matching the contract schema-reader probing relies
    /// on.
    pub fn size(&self) -> Result<u64> {
        match self {
            Url::Local(u) => u.size(),
            Url::S3(u) => u.size(),
            Url::Gcs(u) => u.size(),
            Url::Http(u) => u.size(),
        }
    }

    pub fn delete(&self) -> Result<()> {
        match self {
            Url::Local(u) => u.delete(),
            Url::S3(u) => u.delete(),
            Url::Gcs(u) => u.delete(),
            Url::Http(u) => u.delete(),
        }
    }

    /// Expands this URL into a finite, lexicographically ordered set of
    /// concrete resource URLs: a single file expands to itself; a
    /// directory or glob expands to its contents; a non-existent target
    /// expands to itself.
    pub fn expand(&self) -> Result<Vec<Url>> {
        match self {
            Url::Local(u) => u.expand(),
            Url::S3(u) => u.expand(),
            Url::Gcs(u) => u.expand(),
            Url::Http(u) => u.expand(),
        }
    }

    /// Returns a fresh URL pointed at the same target with a different
    /// mode.
    pub fn with_mode(&self, mode: Mode) -> Url {
        match self {
            Url::Local(u) => Url::Local(u.with_mode(mode)),
            Url::S3(u) => Url::S3(u.with_mode(mode)),
            Url::Gcs(u) => Url::Gcs(u.with_mode(mode)),
            Url::Http(u) => Url::Http(u.with_mode(mode)),
        }
    }

    /// Rewrites the path component: if the current path contains glob
    /// metacharacters, replaces the last segment; otherwise joins `p` as a
    /// child path segment.
    pub fn with_path(&self, p: &str) -> Url {
        match self {
            Url::Local(u) => Url::Local(u.with_path(p)),
            Url::S3(u) => Url::S3(u.with_path(p)),
            Url::Gcs(u) => Url::Gcs(u.with_path(p)),
            Url::Http(u) => Url::Http(u.with_path(p)),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Url::Local(u) => u.as_str(),
            Url::S3(u) => u.as_str(),
            Url::Gcs(u) => u.as_str(),
            Url::Http(u) => u.as_str(),
        }
    }

    fn basename(&self) -> String {
        self.as_str()
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or("")
            .to_string()
    }
}

/// If `src.expand()` yields exactly one URL, pairs it directly with `dst`.
/// Otherwise treats `dst` as a parent directory and pairs each expanded
/// source with `dst.with_path(basename(source))`.
pub fn create_url_mapping(src: &Url, dst: &Url) -> Result<Vec<(Url, Url)>> {
    let expanded = src.expand()?;
    if expanded.len() == 1 {
        return Ok(vec![(expanded.into_iter().next().unwrap(), dst.clone())]);
    }
    Ok(expanded
        .into_iter()
        .map(|s| {
            let basename = s.basename();
            let d = dst.with_path(&basename);
            (s, d)
        })
        .collect())
}

/// A value accepted by [`flatten_urls`]: a single URL, a list, or nothing.
pub enum UrlSpec {
    One(Url),
    Many(Vec<Url>),
    None,
}

/// Flattens scalar/list/empty URL inputs, optionally expanding each, and
/// deduplicates by URL string while preserving first-seen order.
pub fn flatten_urls(inputs: Vec<UrlSpec>, expand: bool) -> Result<Vec<Url>> {
    let mut out = Vec::new();
    let mut seen = std::collections::HashSet::new();

    let mut push = |u: Url, out: &mut Vec<Url>, seen: &mut std::collections::HashSet<String>| {
        let key = u.as_str().to_string();
        if seen.insert(key) {
            out.push(u);
        }
    };

    for input in inputs {
        let urls: Vec<Url> = match input {
            UrlSpec::One(u) => vec![u],
            UrlSpec::Many(us) => us,
            UrlSpec::None => Vec::new(),
        };
        for u in urls {
            if expand {
                for e in u.expand()? {
                    push(e, &mut out, &mut seen);
                }
            } else {
                push(u, &mut out, &mut seen);
            }
        }
    }
    Ok(out)
}
