use thiserror::Error;

use crate::common::client::error::ApiError;

/// 解析视频地址与元数据时的错误（无法定位到视频）
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("无效的URL: {0}")]
    InvalidUrl(String),
    #[error("短链接解析失败: {0}")]
    InvalidShortUrl(String),
    #[error("网络错误: {0}")]
    NetworkError(String),
    #[error("API错误: {0}")]
    ApiError(String),
    #[error("解析错误: {0}")]
    ParseError(String),
}

impl From<ApiError> for ParseError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Reqwest(e) => ParseError::NetworkError(e.to_string()),
            ApiError::ApiError(_, msg) => ParseError::ApiError(msg),
            ApiError::InvalidResponse(msg) => ParseError::ParseError(msg),
            other => ParseError::ApiError(other.to_string()),
        }
    }
}

/// 选择画质、获取流地址时的错误
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("无效的画质代码: {0}")]
    InvalidQuality(u32),
    #[error("该视频不提供画质 {0}")]
    QualityUnavailable(u32),
    #[error("画质 {0} 需要先登录")]
    AuthRequired(u32),
    #[error("登录状态可能已失效，无法获取画质 {0}")]
    AuthRejected(u32),
    #[error("未找到可用的{0}流")]
    NoStream(&'static str),
    #[error("获取播放地址失败: {0}")]
    Api(#[from] ApiError),
}
