use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::fetcher::StreamKind;
use super::task::TaskState;

/// 单路流下载的错误
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("网络错误: {0}")]
    Network(#[from] reqwest::Error),

    #[error("网络超时: {0:?} 内没有收到数据")]
    Timeout(Duration),

    #[error("HTTP 请求失败，状态码: {status}，URL: {url}")]
    Http {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("写入文件失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("文件大小超过上限 {limit} 字节")]
    TooLarge { limit: u64 },
}

impl FetchError {
    /// 连接、读取或超时一类的网络错误
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

/// 合并工具的错误
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("输入文件不存在: {0:?}")]
    MissingInput(PathBuf),

    #[error("无法运行合并工具: {0}")]
    Io(#[from] std::io::Error),

    // stderr 原样保留，这是用户排查问题的主要依据
    #[error("合并工具异常退出（{status}）: {stderr}")]
    Tool { status: String, stderr: String },

    #[error("合并超时（{0:?}）")]
    Timeout(Duration),

    #[error("合并工具不可用: {0}")]
    Unavailable(String),
}

/// 下载任务内部的错误，最终写入任务的 Failed 状态
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("{kind}下载失败: {source}")]
    Fetch {
        kind: StreamKind,
        #[source]
        source: FetchError,
    },

    #[error("合并失败: {0}")]
    Merge(#[from] MergeError),

    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("任务已取消")]
    Cancelled,

    #[error("无效的状态转换: {from:?} -> {to:?}")]
    InvalidTransition { from: TaskState, to: TaskState },
}
