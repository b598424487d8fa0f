use std::sync::OnceLock;

use tracing::debug;

use super::{Mode, Stream, Url};
use crate::error::{Error, Result};

fn http_client() -> &'static reqwest::blocking::Client {
    static CLIENT: OnceLock<reqwest::blocking::Client> = OnceLock::new();
    CLIENT.get_or_init(|| reqwest::blocking::Client::new())
}

/// HTTP(S) endpoint. Read mode downloads the full body up front; write
/// mode buffers the body in memory and issues a single `POST` request on
/// close. `expand` performs no discovery and always returns `[self]`.
#[derive(Debug, Clone)]
pub struct HttpUrl {
    url: String,
    pub mode: Mode,
}

impl HttpUrl {
    pub fn new(url: &str, mode: Mode) -> Result<Self> {
        url::Url::parse(url).map_err(|e| Error::config(format!("invalid HTTP URL: {e}")))?;
        Ok(HttpUrl {
            url: url.to_string(),
            mode,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn open(&self) -> Result<Stream> {
        match self.mode {
            Mode::Read | Mode::Append => {
                debug!(url = %self.url, "downloading HTTP body");
                let bytes = http_client()
                    .get(&self.url)
                    .send()
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| Error::Io {
                        source: std::io::Error::other(e.to_string()),
                    })?
                    .bytes()
                    .map_err(|e| Error::Io {
                        source: std::io::Error::other(e.to_string()),
                    })?;
                Ok(Stream::Memory(std::io::Cursor::new(bytes.to_vec())))
            }
            Mode::Write => Ok(Stream::Memory(std::io::Cursor::new(Vec::new()))),
        }
    }

    pub fn close(&self, stream: Stream) -> Result<()> {
        if self.mode == Mode::Write {
            let bytes = stream.into_inner_bytes()?;
            debug!(url = %self.url, bytes = bytes.len(), "issuing buffered HTTP POST");
            http_client()
                .post(&self.url)
                .header("content-type", "application/octet-stream")
                .body(bytes)
                .send()
                .and_then(|r| r.error_for_status())
                .map_err(|e| Error::Io {
                    source: std::io::Error::other(e.to_string()),
                })?;
        }
        Ok(())
    }

    pub fn exists(&self) -> Result<bool> {
        Ok(http_client()
            .head(&self.url)
            .send()
            .map(|r| r.status().is_success())
            .unwrap_or(false))
    }

    pub fn size(&self) -> Result<u64> {
        let resp = match http_client().head(&self.url).send() {
            Ok(r) if r.status().is_success() => r,
            _ => return Ok(0),
        };
        Ok(resp.content_length().unwrap_or(0))
    }

    pub fn delete(&self) -> Result<()> {
        http_client()
            .delete(&self.url)
            .send()
            .map_err(|e| Error::Io {
                source: std::io::Error::other(e.to_string()),
            })?;
        Ok(())
    }

    pub fn expand(&self) -> Result<Vec<Url>> {
        Ok(vec![Url::Http(self.clone())])
    }

    pub fn with_mode(&self, mode: Mode) -> HttpUrl {
        HttpUrl {
            url: self.url.clone(),
            mode,
        }
    }

    pub fn with_path(&self, p: &str) -> HttpUrl {
        let new_url = if self.url.ends_with('/') {
            format!("{}{}", self.url, p)
        } else {
            format!("{}/{}", self.url, p)
        };
        HttpUrl {
            url: new_url,
            mode: self.mode,
        }
    }
}
