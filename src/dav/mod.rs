/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

pub mod propfind;

use std::time::Duration;

use anyhow::Context;
use log::debug;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::{Method, StatusCode};
use thiserror::Error;
use url::Url;

use crate::path::{paths_equal, segments};
use self::propfind::{parse_multistatus, DavEntry};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
/// Lock lifetime for read/write operations.
const LOCK_TIMEOUT_SECS: u32 = 600;
/// Lock lifetime for the parent collection during MKCOL.
const MKDIR_LOCK_TIMEOUT_SECS: u32 = 10;

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8" ?><D:propfind xmlns:D="DAV:"><D:prop><D:resourcetype/><D:getlastmodified/><D:getcontentlength/></D:prop></D:propfind>"#;
const LOCK_BODY: &str = r#"<?xml version="1.0" encoding="utf-8" ?><D:lockinfo xmlns:D="DAV:"><D:lockscope><D:exclusive/></D:lockscope><D:locktype><D:write/></D:locktype></D:lockinfo>"#;

#[derive(Error, Debug)]
pub enum DavError {
    #[error("{method} '{path}' failed with status {status}")]
    Status {
        method: &'static str,
        path: String,
        status: StatusCode,
    },
    #[error("failed to acquire lock for '{path}'")]
    Lock { path: String },
}

/// Blocking WebDAV client. Clones share immutable endpoint configuration
/// and are independently usable from worker threads.
#[derive(Clone)]
pub struct DavClient {
    http: Client,
    base: Url,
    username: String,
    password: String,
    use_locks: bool,
}

/// Outcome of lock acquisition: either locking is disabled or a token to
/// release.
enum DavLock {
    Disabled,
    Token(String),
}

impl DavClient {
    pub fn new(
        server: &str,
        port: u16,
        proto: &str,
        username: &str,
        password: &str,
        use_locks: bool,
    ) -> anyhow::Result<Self> {
        let endpoint = if port == 0 {
            format!("{}://{}", proto, server)
        } else {
            format!("{}://{}:{}", proto, server, port)
        };
        let base = Url::parse(&endpoint)
            .with_context(|| format!("invalid server endpoint '{}'", endpoint))?;
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .with_context(|| "failed to build HTTP client")?;
        Ok(Self {
            http,
            base,
            username: username.to_owned(),
            password: password.to_owned(),
            use_locks,
        })
    }

    pub fn exists(&self, path: &str) -> anyhow::Result<bool> {
        Ok(!self.propfind(path, 0)?.is_empty())
    }

    pub fn is_dir(&self, path: &str) -> anyhow::Result<bool> {
        Ok(self
            .propfind(path, 0)?
            .first()
            .map(|e| e.is_dir)
            .unwrap_or(false))
    }

    pub fn is_file(&self, path: &str) -> anyhow::Result<bool> {
        Ok(!self.is_dir(path)?)
    }

    pub fn stat(&self, path: &str) -> anyhow::Result<Option<DavEntry>> {
        Ok(self.propfind(path, 0)?.into_iter().next())
    }

    /// Children of the collection at `path`; the collection itself is
    /// excluded from the result.
    pub fn list(&self, path: &str) -> anyhow::Result<Vec<DavEntry>> {
        self.propfind(path, 1)
    }

    pub fn download(&self, path: &str) -> anyhow::Result<Vec<u8>> {
        let url = self.url_for(path, false)?;
        let lock = self.acquire_lock(&url, path, LOCK_TIMEOUT_SECS)?;
        let result = self.download_locked(&url, path);
        self.release_lock(&url, &lock);
        result
    }

    fn download_locked(&self, url: &Url, path: &str) -> anyhow::Result<Vec<u8>> {
        let response = self
            .request(Method::GET, url.clone())
            .send()
            .with_context(|| format!("failed to download '{}'", path))?;
        if response.status() != StatusCode::OK {
            return Err(status_error("GET", path, &response).into());
        }
        let bytes = response
            .bytes()
            .with_context(|| format!("failed to download '{}'", path))?;
        Ok(bytes.to_vec())
    }

    pub fn upload(&self, path: &str, content: &[u8]) -> anyhow::Result<()> {
        // Some servers refuse to create empty resources.
        let content = if content.is_empty() {
            b" ".to_vec()
        } else {
            content.to_vec()
        };
        let url = self.url_for(path, false)?;
        let lock = self.acquire_lock(&url, path, LOCK_TIMEOUT_SECS)?;
        let result = self.upload_locked(&url, path, content);
        self.release_lock(&url, &lock);
        result
    }

    fn upload_locked(&self, url: &Url, path: &str, content: Vec<u8>) -> anyhow::Result<()> {
        let response = self
            .request(Method::PUT, url.clone())
            .body(content)
            .send()
            .with_context(|| format!("failed to upload '{}'", path))?;
        if !response.status().is_success() {
            return Err(status_error("PUT", path, &response).into());
        }
        Ok(())
    }

    /// Already-gone is success.
    pub fn delete(&self, path: &str) -> anyhow::Result<()> {
        let url = self.url_for(path, false)?;
        let response = self
            .request(Method::DELETE, url)
            .send()
            .with_context(|| format!("failed to delete '{}'", path))?;
        let status = response.status();
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            return Err(status_error("DELETE", path, &response).into());
        }
        Ok(())
    }

    /// 405 from a collection that already exists is success.
    pub fn mkdir(&self, path: &str) -> anyhow::Result<()> {
        let parent = parent_path(path);
        let parent_url = self.url_for(&parent, true)?;
        let lock = self.acquire_lock(&parent_url, &parent, MKDIR_LOCK_TIMEOUT_SECS)?;
        let result = self.mkdir_locked(path);
        self.release_lock(&parent_url, &lock);
        result
    }

    fn mkdir_locked(&self, path: &str) -> anyhow::Result<()> {
        let url = self.url_for(path, true)?;
        let method = Method::from_bytes(b"MKCOL").unwrap();
        let response = self
            .request(method, url)
            .send()
            .with_context(|| format!("failed to create collection '{}'", path))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::METHOD_NOT_ALLOWED && self.is_dir(path)? {
            return Ok(());
        }
        Err(status_error("MKCOL", path, &response).into())
    }

    fn propfind(&self, path: &str, depth: u8) -> anyhow::Result<Vec<DavEntry>> {
        let url = self.url_for(path, true)?;
        let method = Method::from_bytes(b"PROPFIND").unwrap();
        let response = self
            .request(method, url)
            .header("Depth", depth.to_string())
            .header("Content-Type", "application/xml")
            .body(PROPFIND_BODY)
            .send()
            .with_context(|| format!("failed to query '{}'", path))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(vec![]);
        }
        if status != StatusCode::MULTI_STATUS && !status.is_success() {
            return Err(status_error("PROPFIND", path, &response).into());
        }
        let body = response
            .text()
            .with_context(|| format!("failed to query '{}'", path))?;
        let mut entries = parse_multistatus(&body)?;
        if depth > 0 {
            // The listed collection reports itself as the first response.
            entries.retain(|e| !paths_equal(&e.path, path));
        }
        Ok(entries)
    }

    fn acquire_lock(
        &self,
        url: &Url,
        path: &str,
        timeout_secs: u32,
    ) -> anyhow::Result<DavLock> {
        if !self.use_locks {
            return Ok(DavLock::Disabled);
        }
        let method = Method::from_bytes(b"LOCK").unwrap();
        let response = self
            .request(method, url.clone())
            .header("Timeout", format!("Second-{}", timeout_secs))
            .header("Content-Type", "application/xml")
            .body(LOCK_BODY)
            .send();
        let token = match response {
            Ok(response) if response.status().is_success() => response
                .headers()
                .get("Lock-Token")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_owned()),
            _ => None,
        };
        match token {
            Some(token) => Ok(DavLock::Token(token)),
            None => Err(DavError::Lock {
                path: path.to_owned(),
            }
            .into()),
        }
    }

    /// Best-effort: a lock left behind expires on its own timeout.
    fn release_lock(&self, url: &Url, lock: &DavLock) {
        let DavLock::Token(token) = lock else {
            return;
        };
        let method = Method::from_bytes(b"UNLOCK").unwrap();
        let result = self
            .request(method, url.clone())
            .header("Lock-Token", token.clone())
            .send();
        if let Err(err) = result {
            debug!("failed to unlock '{}': {}", url, err);
        }
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
    }

    /// Collections are addressed with a trailing slash, files without.
    fn url_for(&self, path: &str, trailing_slash: bool) -> anyhow::Result<Url> {
        let mut encoded = String::new();
        for segment in segments(path) {
            encoded.push('/');
            encoded.push_str(&urlencoding::encode(segment));
        }
        if encoded.is_empty() || (trailing_slash && !encoded.ends_with('/')) {
            encoded.push('/');
        }
        let mut url = self.base.clone();
        url.set_path(&encoded);
        Ok(url)
    }
}

fn parent_path(path: &str) -> String {
    let mut parts = segments(path);
    parts.pop();
    format!("/{}", parts.join("/"))
}

fn status_error(method: &'static str, path: &str, response: &Response) -> DavError {
    DavError::Status {
        method,
        path: path.to_owned(),
        status: response.status(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_encoding() {
        let client = DavClient::new("dav.example.com", 8443, "https", "u", "p", false).unwrap();
        let url = client.url_for("docs/a b/f#1.txt", false).unwrap();
        assert_eq!(
            "https://dav.example.com:8443/docs/a%20b/f%231.txt",
            url.as_str()
        );
        let url = client.url_for("docs", true).unwrap();
        assert_eq!("https://dav.example.com:8443/docs/", url.as_str());
    }

    #[test]
    fn test_default_port_omitted() {
        let client = DavClient::new("dav.example.com", 0, "https", "u", "p", false).unwrap();
        let url = client.url_for("x", false).unwrap();
        assert_eq!("https://dav.example.com/x", url.as_str());
    }

    #[test]
    fn test_parent_path() {
        assert_eq!("/a/b", parent_path("/a/b/c"));
        assert_eq!("/a/b", parent_path("a/b/c/"));
        assert_eq!("/", parent_path("/a"));
    }
}
