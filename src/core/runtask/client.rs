//! Outbound calls to the platform API: configuration download, plan fetch,
//! and the task result callback. Every call is attempted exactly once.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Response, StatusCode, redirect};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_stream::StreamExt;
use tracing::debug;
use uuid::Uuid;

use super::{AccessToken, TaskResult, VND_API_JSON};
use crate::core::config::RedirectPolicy;

const USER_AGENT: &str = concat!("runtask/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("could not build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} responded with {status}")]
    Status { url: String, status: StatusCode },

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("plan document from {url} is not valid JSON: {source}")]
    InvalidPlan {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The platform API as seen by the stage dispatcher.
#[async_trait]
pub trait RunTaskPlatform: Send + Sync {
    /// Streams the configuration archive at `url` into `dest`, replacing any
    /// existing file. Returns the number of bytes written.
    async fn download_configuration(
        &self,
        url: &str,
        token: &AccessToken,
        dest: &Path,
    ) -> Result<u64, FetchError>;

    async fn fetch_plan(&self, url: &str, token: &AccessToken) -> Result<Value, FetchError>;

    async fn send_task_result(
        &self,
        url: &str,
        token: &AccessToken,
        result: &TaskResult,
    ) -> Result<(), FetchError>;
}

/// reqwest-backed platform client. Each call kind gets its own client so the
/// redirect policy is fixed per operation.
pub struct PlatformClient {
    download: reqwest::Client,
    plan: reqwest::Client,
    callback: reqwest::Client,
}

impl PlatformClient {
    pub fn new(redirects: RedirectPolicy) -> Result<Self, FetchError> {
        Ok(Self {
            download: build_client(redirects.config_max_hops)?,
            plan: build_client(redirects.plan_max_hops)?,
            callback: build_client(0)?,
        })
    }
}

fn build_client(max_hops: usize) -> Result<reqwest::Client, FetchError> {
    // `previous` already holds the URL that answered with the redirect, so its
    // length is the number of hops this attempt would make.
    let policy = if max_hops == 0 {
        redirect::Policy::none()
    } else {
        redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() > max_hops {
                attempt.error(format!("exceeded {max_hops} redirect hop(s)"))
            } else {
                attempt.follow()
            }
        })
    };
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .redirect(policy)
        .build()
        .map_err(FetchError::Client)
}

fn transport(url: &str) -> impl FnOnce(reqwest::Error) -> FetchError + '_ {
    move |source| FetchError::Transport {
        url: url.to_string(),
        source,
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> FetchError + '_ {
    move |source| FetchError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn require_success(url: &str, response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(FetchError::Status {
            url: url.to_string(),
            status,
        })
    }
}

/// Sibling of `dest` unique to one download, so concurrent downloads of the
/// same archive never share a file.
fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(format!(".{}.part", Uuid::new_v4().simple()));
    PathBuf::from(name)
}

async fn write_body(url: &str, response: Response, path: &Path) -> Result<u64, FetchError> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(io_error(path))?;

    let stream = response.bytes_stream();
    tokio::pin!(stream);

    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(transport(url))?;
        file.write_all(&chunk).await.map_err(io_error(path))?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(io_error(path))?;
    file.sync_all().await.map_err(io_error(path))?;
    Ok(written)
}

#[async_trait]
impl RunTaskPlatform for PlatformClient {
    async fn download_configuration(
        &self,
        url: &str,
        token: &AccessToken,
        dest: &Path,
    ) -> Result<u64, FetchError> {
        let response = self
            .download
            .get(url)
            .header(CONTENT_TYPE, VND_API_JSON)
            .bearer_auth(token.expose())
            .send()
            .await
            .map_err(transport(url))?;
        let response = require_success(url, response)?;

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_error(parent))?;
        }

        // The body lands in a sibling file first so an interrupted stream
        // never replaces a complete archive.
        let partial = partial_path(dest);
        let written = match write_body(url, response, &partial).await {
            Ok(written) => written,
            Err(err) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(err);
            }
        };
        if let Err(source) = tokio::fs::rename(&partial, dest).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(io_error(dest)(source));
        }
        debug!(path = %dest.display(), bytes = written, "configuration archive written");
        Ok(written)
    }

    async fn fetch_plan(&self, url: &str, token: &AccessToken) -> Result<Value, FetchError> {
        let response = self
            .plan
            .get(url)
            .bearer_auth(token.expose())
            .send()
            .await
            .map_err(transport(url))?;
        let response = require_success(url, response)?;
        if response.url().as_str() != url {
            debug!(from = url, to = %response.url(), "plan request was redirected");
        }

        let body = response.bytes().await.map_err(transport(url))?;
        serde_json::from_slice(&body).map_err(|source| FetchError::InvalidPlan {
            url: url.to_string(),
            source,
        })
    }

    async fn send_task_result(
        &self,
        url: &str,
        token: &AccessToken,
        result: &TaskResult,
    ) -> Result<(), FetchError> {
        let response = self
            .callback
            .patch(url)
            .header(CONTENT_TYPE, VND_API_JSON)
            .bearer_auth(token.expose())
            .json(&result.envelope())
            .send()
            .await
            .map_err(transport(url))?;
        require_success(url, response)?;
        Ok(())
    }
}
