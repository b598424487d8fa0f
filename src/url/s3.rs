use std::sync::OnceLock;

use tracing::{debug, warn};

use super::{Mode, Stream, Url};
use crate::error::{Error, Result};

/// Process-wide, lazily-initialized async runtime used to bridge the S3
/// SDK's async calls into this crate's otherwise-synchronous core. Kept
/// confined to this module rather than threaded through algorithm code.
fn runtime() -> &'static tokio::runtime::Runtime {
    static RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
    RT.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("failed to start S3 bridge runtime")
    })
}

fn client() -> &'static aws_sdk_s3::Client {
    static CLIENT: OnceLock<aws_sdk_s3::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        runtime().block_on(async {
            let config = aws_config::load_from_env().await;
            aws_sdk_s3::Client::new(&config)
        })
    })
}

#[derive(Debug, Clone)]
pub struct S3Url {
    bucket: String,
    key: String,
    url: String,
    pub mode: Mode,
}

impl S3Url {
    pub fn new(rest: &str, mode: Mode) -> Result<Self> {
        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| Error::config(format!("invalid s3:// URL: s3://{rest}")))?;
        Ok(S3Url::from_parts(bucket.to_string(), key.to_string(), mode))
    }

    fn from_parts(bucket: String, key: String, mode: Mode) -> Self {
        let url = format!("s3://{bucket}/{key}");
        S3Url { bucket, key, url, mode }
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn open(&self) -> Result<Stream> {
        match self.mode {
            Mode::Read | Mode::Append => {
                debug!(bucket = %self.bucket, key = %self.key, "staging S3 object to memory");
                let bytes = runtime().block_on(download(&self.bucket, &self.key));
                let bytes = match bytes {
                    Ok(b) => b,
                    Err(_) if self.mode == Mode::Append => Vec::new(),
                    Err(e) => return Err(e),
                };
                let mut cursor = std::io::Cursor::new(bytes);
                if self.mode == Mode::Append {
                    use std::io::Seek;
                    cursor.seek(std::io::SeekFrom::End(0))?;
                }
                Ok(Stream::Memory(cursor))
            }
            Mode::Write => Ok(Stream::Memory(std::io::Cursor::new(Vec::new()))),
        }
    }

    pub fn close(&self, stream: Stream) -> Result<()> {
        match self.mode {
            Mode::Write | Mode::Append => {
                let bytes = stream.into_inner_bytes()?;
                debug!(bucket = %self.bucket, key = %self.key, bytes = bytes.len(), "uploading S3 object");
                runtime().block_on(upload(&self.bucket, &self.key, bytes))
            }
            Mode::Read => Ok(()),
        }
    }

    pub fn exists(&self) -> Result<bool> {
        Ok(runtime().block_on(head(&self.bucket, &self.key)).is_ok())
    }

    pub fn size(&self) -> Result<u64> {
        match runtime().block_on(head(&self.bucket, &self.key)) {
            Ok(len) => Ok(len),
            Err(_) => Ok(0),
        }
    }

    pub fn delete(&self) -> Result<()> {
        runtime().block_on(async {
            client()
                .delete_object()
                .bucket(&self.bucket)
                .key(&self.key)
                .send()
                .await
                .map_err(|e| Error::Io {
                    source: std::io::Error::other(e.to_string()),
                })?;
            Ok(())
        })
    }

    pub fn expand(&self) -> Result<Vec<Url>> {
        let prefix = format!("{}/", self.key.trim_end_matches('/'));
        let keys = runtime().block_on(list(&self.bucket, &prefix));
        match keys {
            Ok(keys) if !keys.is_empty() => {
                let mut keys = keys;
                keys.sort();
                Ok(keys
                    .into_iter()
                    .map(|k| Url::S3(S3Url::from_parts(self.bucket.clone(), k, self.mode)))
                    .collect())
            }
            _ => Ok(vec![Url::S3(self.clone())]),
        }
    }

    pub fn with_mode(&self, mode: Mode) -> S3Url {
        S3Url::from_parts(self.bucket.clone(), self.key.clone(), mode)
    }

    pub fn with_path(&self, p: &str) -> S3Url {
        let has_glob = self.key.contains(['*', '?', '[']);
        let new_key = if has_glob {
            let parent = self
                .key
                .rsplit_once('/')
                .map(|(p, _)| p.to_string())
                .unwrap_or_default();
            format!("{parent}/{p}")
        } else {
            format!("{}/{}", self.key.trim_end_matches('/'), p)
        };
        S3Url::from_parts(self.bucket.clone(), new_key, self.mode)
    }
}

async fn download(bucket: &str, key: &str) -> Result<Vec<u8>> {
    let out = client()
        .get_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .map_err(|e| Error::Io {
            source: std::io::Error::other(e.to_string()),
        })?;
    let data = out.body.collect().await.map_err(|e| Error::Io {
        source: std::io::Error::other(e.to_string()),
    })?;
    Ok(data.into_bytes().to_vec())
}

async fn upload(bucket: &str, key: &str, bytes: Vec<u8>) -> Result<()> {
    client()
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(bytes.into())
        .send()
        .await
        .map_err(|e| Error::Io {
            source: std::io::Error::other(e.to_string()),
        })?;
    Ok(())
}

async fn head(bucket: &str, key: &str) -> Result<u64> {
    let out = client()
        .head_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .map_err(|e| Error::Io {
            source: std::io::Error::other(e.to_string()),
        })?;
    Ok(out.content_length().unwrap_or(0) as u64)
}

async fn list(bucket: &str, prefix: &str) -> Result<Vec<String>> {
    let mut keys = Vec::new();
    let mut continuation = None;
    loop {
        let mut req = client().list_objects_v2().bucket(bucket).prefix(prefix);
        if let Some(token) = continuation.take() {
            req = req.continuation_token(token);
        }
        let out = req.send().await.map_err(|e| Error::Io {
            source: std::io::Error::other(e.to_string()),
        })?;
        for obj in out.contents() {
            if let Some(k) = obj.key() {
                keys.push(k.to_string());
            }
        }
        if out.is_truncated().unwrap_or(false) {
            continuation = out.next_continuation_token().map(|s| s.to_string());
            if continuation.is_none() {
                break;
            }
        } else {
            break;
        }
    }
    if keys.is_empty() {
        warn!(bucket, prefix, "S3 listing returned no objects");
    }
    Ok(keys)
}
