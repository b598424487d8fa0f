use std::env;
use std::sync::OnceLock;

use tracing::debug;

use super::{Mode, Stream, Url};
use crate::error::{Error, Result};

const ENV_ENDPOINT: &str = "GOOGLE_CLOUD_STORAGE_API_ENDPOINT";
const ENV_ANONYMOUS: &str = "GOOGLE_CLOUD_STORAGE_USE_ANONYMOUS_CREDENTIALS";
const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com/storage/v1";

fn endpoint() -> String {
    env::var(ENV_ENDPOINT).unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string())
}

fn anonymous() -> bool {
    env::var(ENV_ANONYMOUS)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn http_client() -> &'static reqwest::blocking::Client {
    static CLIENT: OnceLock<reqwest::blocking::Client> = OnceLock::new();
    CLIENT.get_or_init(|| reqwest::blocking::Client::new())
}

/// Exchanges ambient application-default credentials for a bearer token via
/// a JWT-bearer OAuth flow. Skipped entirely when anonymous credentials are
/// requested (public buckets, emulators).
fn bearer_token() -> Result<Option<String>> {
    if anonymous() {
        return Ok(None);
    }
    let creds = goauth::credentials::Credentials::from_env()
        .map_err(|e| Error::config(format!("failed to load GCS credentials: {e}")))?;
    let claims = smpl_jwt::Jwt::new(
        goauth::scopes::Scope::DevStorageReadWrite.url(),
        creds.iss(),
        None,
    );
    let token = goauth::get_token_with_creds(&claims, &creds)
        .map_err(|e| Error::config(format!("failed to obtain GCS bearer token: {e}")))?;
    Ok(Some(token.access_token().to_string()))
}

#[derive(Debug, Clone)]
pub struct GcsUrl {
    bucket: String,
    key: String,
    url: String,
    pub mode: Mode,
}

impl GcsUrl {
    pub fn new(rest: &str, mode: Mode) -> Result<Self> {
        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| Error::config(format!("invalid gs:// URL: gs://{rest}")))?;
        Ok(GcsUrl::from_parts(bucket.to_string(), key.to_string(), mode))
    }

    fn from_parts(bucket: String, key: String, mode: Mode) -> Self {
        let url = format!("gs://{bucket}/{key}");
        GcsUrl { bucket, key, url, mode }
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    fn object_url(&self) -> String {
        format!(
            "{}/b/{}/o/{}",
            endpoint(),
            self.bucket,
            urlencode(&self.key)
        )
    }

    fn media_url(&self) -> String {
        format!("{}?alt=media", self.object_url())
    }

    fn upload_url(&self) -> String {
        format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            endpoint().trim_end_matches("/storage/v1"),
            self.bucket,
            urlencode(&self.key)
        )
    }

    fn authed(
        &self,
        builder: reqwest::blocking::RequestBuilder,
    ) -> Result<reqwest::blocking::RequestBuilder> {
        Ok(match bearer_token()? {
            Some(tok) => builder.bearer_auth(tok),
            None => builder,
        })
    }

    pub fn open(&self) -> Result<Stream> {
        match self.mode {
            Mode::Read | Mode::Append => {
                debug!(bucket = %self.bucket, key = %self.key, "staging GCS object to memory");
                let bytes = self.download().unwrap_or_default();
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

    fn download(&self) -> Result<Vec<u8>> {
        let req = self.authed(http_client().get(self.media_url()))?;
        let resp = req
            .send()
            .map_err(|e| Error::Io {
                source: std::io::Error::other(e.to_string()),
            })?
            .error_for_status()
            .map_err(|e| Error::Io {
                source: std::io::Error::other(e.to_string()),
            })?;
        resp.bytes()
            .map(|b| b.to_vec())
            .map_err(|e| Error::Io {
                source: std::io::Error::other(e.to_string()),
            })
    }

    pub fn close(&self, stream: Stream) -> Result<()> {
        match self.mode {
            Mode::Write | Mode::Append => {
                let bytes = stream.into_inner_bytes()?;
                debug!(bucket = %self.bucket, key = %self.key, bytes = bytes.len(), "uploading GCS object");
                let req = self.authed(http_client().post(self.upload_url()).body(bytes))?;
                req.send()
                    .map_err(|e| Error::Io {
                        source: std::io::Error::other(e.to_string()),
                    })?
                    .error_for_status()
                    .map_err(|e| Error::Io {
                        source: std::io::Error::other(e.to_string()),
                    })?;
                Ok(())
            }
            Mode::Read => Ok(()),
        }
    }

    pub fn exists(&self) -> Result<bool> {
        let req = self.authed(http_client().get(self.object_url()))?;
        Ok(req.send().map(|r| r.status().is_success()).unwrap_or(false))
    }

    pub fn size(&self) -> Result<u64> {
        let req = self.authed(http_client().get(self.object_url()))?;
        let resp = match req.send() {
            Ok(r) if r.status().is_success() => r,
            _ => return Ok(0),
        };
        #[derive(serde::Deserialize)]
        struct Meta {
            size: Option<String>,
        }
        let meta: Meta = resp.json().map_err(|e| Error::Io {
            source: std::io::Error::other(e.to_string()),
        })?;
        Ok(meta
            .size
            .and_then(|s| s.parse().ok())
            .unwrap_or(0))
    }

    pub fn delete(&self) -> Result<()> {
        let req = self.authed(http_client().delete(self.object_url()))?;
        req.send().map_err(|e| Error::Io {
            source: std::io::Error::other(e.to_string()),
        })?;
        Ok(())
    }

    pub fn expand(&self) -> Result<Vec<Url>> {
        let prefix = format!("{}/", self.key.trim_end_matches('/'));
        let list_url = format!(
            "{}/b/{}/o?prefix={}",
            endpoint(),
            self.bucket,
            urlencode(&prefix)
        );
        #[derive(serde::Deserialize)]
        struct Item {
            name: String,
        }
        #[derive(serde::Deserialize)]
        struct ListResponse {
            #[serde(default)]
            items: Vec<Item>,
        }

        let req = match self.authed(http_client().get(list_url)) {
            Ok(r) => r,
            Err(_) => return Ok(vec![Url::Gcs(self.clone())]),
        };
        let items: Vec<String> = match req.send() {
            Ok(r) if r.status().is_success() => r
                .json::<ListResponse>()
                .map(|lr| lr.items.into_iter().map(|i| i.name).collect())
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        if items.is_empty() {
            return Ok(vec![Url::Gcs(self.clone())]);
        }
        let mut items = items;
        items.sort();
        Ok(items
            .into_iter()
            .map(|k| Url::Gcs(GcsUrl::from_parts(self.bucket.clone(), k, self.mode)))
            .collect())
    }

    pub fn with_mode(&self, mode: Mode) -> GcsUrl {
        GcsUrl::from_parts(self.bucket.clone(), self.key.clone(), mode)
    }

    pub fn with_path(&self, p: &str) -> GcsUrl {
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
        GcsUrl::from_parts(self.bucket.clone(), new_key, self.mode)
    }
}

fn urlencode(s: &str) -> String {
    s.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{b:02X}"),
        })
        .collect()
}
