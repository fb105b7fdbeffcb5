use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

// 视频清晰度选项（仅接受下载请求里允许的几档）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoQuality {
    Q360P = 16,    // 流畅 360P
    Q480P = 32,    // 清晰 480P
    Q720P = 64,    // 高清 720P
    Q1080P = 80,   // 高清 1080P
    Q1080PP = 112, // 高清 1080P+
    Q4K = 120,     // 超清 4K
}

impl Default for VideoQuality {
    fn default() -> Self {
        Self::Q1080P
    }
}

impl VideoQuality {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            16 => Some(Self::Q360P),
            32 => Some(Self::Q480P),
            64 => Some(Self::Q720P),
            80 => Some(Self::Q1080P),
            112 => Some(Self::Q1080PP),
            120 => Some(Self::Q4K),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Q360P => "360P",
            Self::Q480P => "480P",
            Self::Q720P => "720P",
            Self::Q1080P => "1080P",
            Self::Q1080PP => "1080P+",
            Self::Q4K => "4K",
        }
    }
}

/// 未登录只能拿到 480P 及以下
pub fn code_needs_login(code: u32) -> bool {
    code >= VideoQuality::Q720P.code()
}

/// 流地址对应的视频标识
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamId {
    pub bvid: String,
    pub cid: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityOption {
    pub code: u32,
    pub description: String,
    pub need_login: bool,
}

/// 元数据提供方返回的视频信息
#[derive(Debug, Clone)]
pub struct VideoInfo {
    pub bvid: String,
    pub title: String,
    pub stream: StreamId,
    pub quality_options: Vec<QualityOption>,
}

/// 一路音频或视频流的直链及其请求头
#[derive(Debug, Clone)]
pub struct StreamSource {
    pub url: String,
    pub headers: HeaderMap,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_codes() {
        for code in [16, 32, 64, 80, 112, 120] {
            let quality = VideoQuality::from_code(code).expect("valid code");
            assert_eq!(quality.code(), code);
        }
        assert_eq!(VideoQuality::from_code(116), None);
        assert_eq!(VideoQuality::from_code(0), None);
    }

    #[test]
    fn test_login_threshold() {
        assert!(!code_needs_login(16));
        assert!(!code_needs_login(32));
        assert!(code_needs_login(64));
        assert!(code_needs_login(120));
    }
}
