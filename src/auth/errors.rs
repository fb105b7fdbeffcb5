use thiserror::Error;

use crate::common::client::error::ApiError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("网络请求失败: {0}")]
    Api(#[from] ApiError),

    #[error("二维码生成失败: {0}")]
    QrError(#[from] qrcode::types::QrError),

    #[error("IO操作失败: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Cookie 文件格式错误: {0}")]
    CookieFile(#[from] serde_json::Error),

    #[error("Cookie 文件加解密失败: {0}")]
    CookieCipher(String),

    #[error("未知的登录会话: {0}")]
    UnknownSession(String),

    #[error("二维码已过期，请重新获取")]
    Expired,

    #[error("API返回异常：{0}")]
    ApiError(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;
