use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("网络请求失败: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("响应解析失败: {0}")]
    InvalidResponse(String),

    #[error("服务暂时不可用，请稍后重试")]
    RetryLater,

    #[error("HTTP 状态异常: {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error("B站 API 错误: {1} (code={0})")]
    ApiError(i64, String),
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidResponse(e.to_string())
    }
}
