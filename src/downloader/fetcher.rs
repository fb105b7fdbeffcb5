use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use reqwest::Client;
use reqwest::header::HeaderMap;
use serde::Serialize;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::error::FetchError;
use crate::config::EngineConfig;
use crate::parser::models::StreamSource;

const WRITE_BUFFER_SIZE: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Video => write!(f, "视频流"),
            StreamKind::Audio => write!(f, "音频流"),
        }
    }
}

/// 一次下载作业：源地址、请求头和落盘位置，构造后不可变
#[derive(Debug, Clone)]
pub struct StreamTarget {
    url: String,
    headers: HeaderMap,
    destination: PathBuf,
}

impl StreamTarget {
    pub fn new(url: impl Into<String>, headers: HeaderMap, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            headers,
            destination: destination.into(),
        }
    }

    pub fn from_source(source: StreamSource, destination: impl Into<PathBuf>) -> Self {
        Self::new(source.url, source.headers, destination)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }
}

/// 下载进度。服务器没给 Content-Length 时 fraction 停在 0，完成时跳到 1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchProgress {
    pub downloaded: u64,
    pub total: Option<u64>,
    pub fraction: f64,
}

/// 把一路 HTTP 字节流边下边写到本地文件
#[derive(Debug, Clone)]
pub struct StreamFetcher {
    client: Client,
    idle_timeout: Duration,
    max_bytes: u64,
}

impl StreamFetcher {
    pub fn new(
        connect_timeout: Duration,
        idle_timeout: Duration,
        max_bytes: u64,
    ) -> Result<Self, FetchError> {
        let client = Client::builder().connect_timeout(connect_timeout).build()?;
        Ok(Self {
            client,
            idle_timeout,
            max_bytes,
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, FetchError> {
        Self::new(
            config.connect_timeout,
            config.fetch_idle_timeout,
            config.max_file_size,
        )
    }

    /// 下载到 target 的目标路径，返回写入的字节数。
    /// 失败时已写入的部分文件保留，由调用方清理。
    pub async fn fetch<F>(&self, target: &StreamTarget, mut on_progress: F) -> Result<u64, FetchError>
    where
        F: FnMut(FetchProgress) + Send,
    {
        debug!("开始下载: {} -> {:?}", target.url, target.destination);

        let request = self.client.get(&target.url).headers(target.headers.clone());
        let response = timeout(self.idle_timeout, request.send())
            .await
            .map_err(|_| FetchError::Timeout(self.idle_timeout))??;

        let status = response.status();
        if !status.is_success() {
            warn!("❌ 非成功状态码: {}，URL: {}", status, target.url);
            return Err(FetchError::Http {
                status,
                url: target.url.clone(),
            });
        }

        let total = response.content_length().filter(|&len| len > 0);
        if let Some(total) = total {
            if total > self.max_bytes {
                return Err(FetchError::TooLarge {
                    limit: self.max_bytes,
                });
            }
        }

        let file = File::create(&target.destination).await?;
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);
        let mut stream = response.bytes_stream();

        let mut downloaded = 0u64;
        let mut fraction = 0.0f64;
        on_progress(FetchProgress {
            downloaded,
            total,
            fraction,
        });

        loop {
            let next = timeout(self.idle_timeout, stream.next())
                .await
                .map_err(|_| FetchError::Timeout(self.idle_timeout))?;
            let chunk = match next {
                Some(chunk) => chunk?,
                None => break,
            };

            downloaded += chunk.len() as u64;
            if downloaded > self.max_bytes {
                return Err(FetchError::TooLarge {
                    limit: self.max_bytes,
                });
            }
            writer.write_all(&chunk).await?;

            if let Some(total) = total {
                fraction = fraction.max((downloaded as f64 / total as f64).min(1.0));
            }
            on_progress(FetchProgress {
                downloaded,
                total,
                fraction,
            });
        }

        writer.flush().await?;

        if fraction < 1.0 {
            on_progress(FetchProgress {
                downloaded,
                total,
                fraction: 1.0,
            });
        }

        debug!("下载完成: {:?}，共 {} 字节", target.destination, downloaded);
        Ok(downloaded)
    }
}
