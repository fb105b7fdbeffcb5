use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::common::client::client::BiliClient;
use crate::common::client::models::common::CommonResponse;
use crate::common::client::models::video::{PlayUrlData, ViewData};
use crate::common::models::AuthContext;

use super::errors::{ParseError, StreamError};
use super::models::{
    QualityOption, StreamId, StreamSource, VideoInfo, VideoQuality, code_needs_login,
};
use super::stream_selector::StreamSelector;
use super::url_parser::UrlParser;
use super::{MetadataProvider, StreamUrlProvider};

const API_BASE: &str = "https://api.bilibili.com";

// DASH 格式
const FNVAL_DASH: &str = "16";

/// 基于 B站 Web 接口的元数据与流地址提供方
pub struct VideoParser {
    client: BiliClient,
    url_parser: UrlParser,
    api_base: String,
}

impl VideoParser {
    pub fn new(client: BiliClient) -> Result<Self, ParseError> {
        Ok(Self {
            client,
            url_parser: UrlParser::new()?,
            api_base: API_BASE.to_string(),
        })
    }

    /// 替换接口根地址（测试时指向模拟服务器）
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    async fn get_view(&self, bvid: &str) -> Result<ViewData, ParseError> {
        let url = format!("{}/x/web-interface/view?bvid={}", self.api_base, bvid);
        let resp: CommonResponse<ViewData> =
            self.client.get_json(&url, &AuthContext::anonymous()).await?;

        resp.data
            .ok_or_else(|| ParseError::ParseError("未找到视频信息".to_string()))
    }

    async fn get_play_url(
        &self,
        stream: &StreamId,
        qn: u32,
        auth: &AuthContext,
    ) -> Result<PlayUrlData, StreamError> {
        let params = HashMap::from([
            ("bvid".to_string(), stream.bvid.clone()),
            ("cid".to_string(), stream.cid.to_string()),
            ("qn".to_string(), qn.to_string()),
            ("fnval".to_string(), FNVAL_DASH.to_string()),
            ("fourk".to_string(), "1".to_string()),
        ]);

        let resp: CommonResponse<PlayUrlData> = self
            .client
            .get_signed(&format!("{}/x/player/playurl", self.api_base), params, auth)
            .await?;

        resp.data.ok_or(StreamError::NoStream("DASH"))
    }

    fn quality_options(play: &PlayUrlData) -> Vec<QualityOption> {
        play.accept_quality
            .iter()
            .zip(play.accept_description.iter())
            .map(|(&code, description)| QualityOption {
                code,
                description: description.clone(),
                need_login: code_needs_login(code),
            })
            .collect()
    }
}

#[async_trait]
impl MetadataProvider for VideoParser {
    async fn resolve(&self, url: &str) -> Result<VideoInfo, ParseError> {
        let bvid = self.url_parser.parse(url).await?;
        debug!("解析到 BV 号: {}", bvid);

        let view = self.get_view(&bvid).await?;
        let stream = StreamId {
            bvid: view.bvid.clone(),
            cid: view.cid,
        };

        // 以最高画质请求一次，拿到完整的可选画质列表
        let play = self
            .get_play_url(&stream, VideoQuality::Q4K.code(), &AuthContext::anonymous())
            .await
            .map_err(|e| ParseError::ApiError(e.to_string()))?;

        info!("视频解析完成: {} ({})", view.title, view.bvid);

        Ok(VideoInfo {
            bvid: view.bvid,
            title: view.title,
            stream,
            quality_options: Self::quality_options(&play),
        })
    }
}

#[async_trait]
impl StreamUrlProvider for VideoParser {
    async fn get_stream_urls(
        &self,
        stream: &StreamId,
        quality: VideoQuality,
        auth: &AuthContext,
    ) -> Result<(StreamSource, StreamSource), StreamError> {
        let code = quality.code();
        if code_needs_login(code) && !auth.is_authenticated() {
            return Err(StreamError::AuthRequired(code));
        }

        let play = self.get_play_url(stream, code, auth).await?;
        let dash = play.dash.ok_or(StreamError::NoStream("DASH"))?;

        let video = StreamSelector::select_video(&dash.video, code)
            .ok_or(StreamError::NoStream("视频"))?;
        let audio = dash
            .audio
            .as_deref()
            .and_then(StreamSelector::select_audio)
            .ok_or(StreamError::NoStream("音频"))?;

        // 带着 Cookie 却拿不到需要登录的画质，说明 Cookie 已过期
        if video.id < code && code_needs_login(code) && !code_needs_login(video.id) {
            warn!("请求画质 {} 但只返回了 {}，登录状态可能已失效", code, video.id);
            return Err(StreamError::AuthRejected(code));
        }

        debug!("选中视频流 {} / 音频流 {}", video.id, audio.id);

        let headers = BiliClient::stream_headers(auth);
        Ok((
            StreamSource {
                url: video.base_url.clone(),
                headers: headers.clone(),
            },
            StreamSource {
                url: audio.base_url.clone(),
                headers,
            },
        ))
    }
}
