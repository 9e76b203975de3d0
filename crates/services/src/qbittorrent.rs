//! qBittorrent Web API v2 client.
//!
//! Authenticates with a username/password form login and keeps the session
//! cookie in the client's cookie store. Every call that comes back with
//! HTTP 403 logs in again and is retried once.

use std::sync::atomic::{AtomicBool, Ordering};

use courier_protocol::{ServiceError, ServiceFuture, TorrentDaemon, TorrentFile, TorrentFilter, TorrentInfo};
use reqwest::header::{HeaderMap, HeaderValue, REFERER};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::http_error;

/// qBittorrent Web UI client.
pub struct QbitClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    logged_in: AtomicBool,
}

impl QbitClient {
    /// Creates a client for the Web UI at `base_url` (e.g. `http://localhost:8080`).
    pub fn new(base_url: &str, username: &str, password: &str) -> Result<Self, ServiceError> {
        let base_url = base_url.trim_end_matches('/').to_string();

        // The Web UI rejects requests whose Referer does not match its origin.
        let mut headers = HeaderMap::new();
        headers.insert(
            REFERER,
            HeaderValue::from_str(&base_url)
                .map_err(|_| ServiceError::Invalid(format!("bad daemon URL: {base_url}")))?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .build()
            .map_err(http_error)?;

        Ok(Self {
            http,
            base_url,
            username: username.to_string(),
            password: password.to_string(),
            logged_in: AtomicBool::new(false),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/api/v2/{endpoint}", self.base_url)
    }

    async fn do_login(&self) -> Result<(), ServiceError> {
        debug!(url = %self.base_url, "logging in to qBittorrent");
        let resp = self
            .http
            .post(self.url("auth/login"))
            .form(&[("username", &self.username), ("password", &self.password)])
            .send()
            .await
            .map_err(http_error)?;

        let status = resp.status();
        if status == StatusCode::FORBIDDEN {
            return Err(ServiceError::Unauthorized);
        }
        let body = resp.text().await.map_err(http_error)?;
        if !status.is_success() {
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body,
            });
        }
        if body.trim() == "Fails." {
            return Err(ServiceError::Unauthorized);
        }

        self.logged_in.store(true, Ordering::SeqCst);
        info!(url = %self.base_url, "logged in to qBittorrent");
        Ok(())
    }

    async fn ensure_logged_in(&self) -> Result<(), ServiceError> {
        if self.logged_in.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.do_login().await
    }

    /// Sends the request built by `build`, re-authenticating once on 403.
    async fn call<F>(&self, build: F) -> Result<Response, ServiceError>
    where
        F: Fn() -> RequestBuilder,
    {
        self.ensure_logged_in().await?;
        let resp = build().send().await.map_err(http_error)?;
        if resp.status() != StatusCode::FORBIDDEN {
            return check(resp).await;
        }

        debug!("qBittorrent session expired, logging in again");
        self.logged_in.store(false, Ordering::SeqCst);
        self.do_login().await?;
        let resp = build().send().await.map_err(http_error)?;
        if resp.status() == StatusCode::FORBIDDEN {
            return Err(ServiceError::Unauthorized);
        }
        check(resp).await
    }

    async fn post_form(&self, endpoint: &str, form: &[(&str, &str)]) -> Result<(), ServiceError> {
        let url = self.url(endpoint);
        self.call(|| self.http.post(&url).form(form)).await?;
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ServiceError> {
        let url = self.url(endpoint);
        let resp = self.call(|| self.http.get(&url).query(query)).await?;
        let body = resp.bytes().await.map_err(http_error)?;
        serde_json::from_slice(&body)
            .map_err(|e| ServiceError::Invalid(format!("unexpected {endpoint} response: {e}")))
    }

    async fn add(&self, magnet: &str, save_path: Option<&str>) -> Result<(), ServiceError> {
        let mut form = vec![("urls", magnet), ("paused", "false"), ("root_folder", "true")];
        if let Some(path) = save_path {
            form.push(("savepath", path));
        }
        self.post_form("torrents/add", &form).await?;
        info!("magnet submitted to qBittorrent");
        Ok(())
    }

    async fn info(&self, filter: &TorrentFilter) -> Result<Vec<TorrentInfo>, ServiceError> {
        let hashes = filter.hashes.join("|");
        let mut query = vec![
            ("filter", filter.state.as_str()),
            ("sort", "added_on"),
            ("reverse", "true"),
        ];
        if !hashes.is_empty() {
            query.push(("hashes", hashes.as_str()));
        }
        self.get_json("torrents/info", &query).await
    }

    async fn files(&self, hash: &str) -> Result<Vec<TorrentFile>, ServiceError> {
        self.get_json("torrents/files", &[("hash", hash)]).await
    }

    async fn delete(&self, hash: &str, delete_files: bool) -> Result<(), ServiceError> {
        let flag = if delete_files { "true" } else { "false" };
        self.post_form("torrents/delete", &[("hashes", hash), ("deleteFiles", flag)])
            .await
    }

    /// Pauses a torrent.
    pub async fn pause(&self, hash: &str) -> Result<(), ServiceError> {
        self.post_form("torrents/pause", &[("hashes", hash)]).await
    }

    /// Resumes a paused torrent.
    pub async fn resume(&self, hash: &str) -> Result<(), ServiceError> {
        self.post_form("torrents/resume", &[("hashes", hash)]).await
    }
}

async fn check(resp: Response) -> Result<Response, ServiceError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => ServiceError::NotFound(body),
        _ => ServiceError::Status {
            status: status.as_u16(),
            body,
        },
    })
}

impl TorrentDaemon for QbitClient {
    fn login(&self) -> ServiceFuture<'_, ()> {
        Box::pin(self.do_login())
    }

    fn add_magnet<'a>(&'a self, magnet: &'a str, save_path: Option<&'a str>) -> ServiceFuture<'a, ()> {
        Box::pin(self.add(magnet, save_path))
    }

    fn list_torrents<'a>(&'a self, filter: &'a TorrentFilter) -> ServiceFuture<'a, Vec<TorrentInfo>> {
        Box::pin(self.info(filter))
    }

    fn list_files<'a>(&'a self, hash: &'a str) -> ServiceFuture<'a, Vec<TorrentFile>> {
        Box::pin(self.files(hash))
    }

    fn delete_torrent<'a>(&'a self, hash: &'a str, delete_files: bool) -> ServiceFuture<'a, ()> {
        Box::pin(self.delete(hash, delete_files))
    }
}
