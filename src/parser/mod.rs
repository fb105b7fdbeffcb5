use async_trait::async_trait;

use crate::common::models::AuthContext;
use errors::{ParseError, StreamError};
use models::{QualityOption, StreamId, StreamSource, VideoInfo, VideoQuality};

pub mod errors;
pub mod models;
pub mod stream_selector;
pub mod url_parser;
pub mod video_parser;

pub use video_parser::VideoParser;

/// 元数据提供方：把视频地址解析为标题、流标识和可选画质
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn resolve(&self, url: &str) -> Result<VideoInfo, ParseError>;
}

/// 流地址提供方：给出指定画质下的视频流与音频流直链
#[async_trait]
pub trait StreamUrlProvider: Send + Sync {
    async fn get_stream_urls(
        &self,
        stream: &StreamId,
        quality: VideoQuality,
        auth: &AuthContext,
    ) -> Result<(StreamSource, StreamSource), StreamError>;
}

/// 校验请求的画质是否可用、是否需要登录
pub fn select_quality(
    info: &VideoInfo,
    code: u32,
    auth: &AuthContext,
) -> Result<(VideoQuality, QualityOption), StreamError> {
    let quality = VideoQuality::from_code(code).ok_or(StreamError::InvalidQuality(code))?;

    let option = info
        .quality_options
        .iter()
        .find(|option| option.code == code)
        .cloned()
        .ok_or(StreamError::QualityUnavailable(code))?;

    if option.need_login && !auth.is_authenticated() {
        return Err(StreamError::AuthRequired(code));
    }

    Ok((quality, option))
}
