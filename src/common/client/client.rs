use std::collections::HashMap;
use std::{io::Read, sync::Arc, time::Duration};

use crate::common::client::error::ApiError;
use crate::common::models::{AuthContext, AuthCookies};
use crate::common::wbi_utils::WbiUtils;
use cookie_store::CookieStore;
use flate2::read::GzDecoder;
use reqwest::{
    Client, ClientBuilder, Response,
    header::{
        ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, COOKIE, HeaderMap, HeaderValue, ORIGIN,
        REFERER, USER_AGENT,
    },
};
use reqwest_cookie_store::CookieStoreMutex;
use serde::de::DeserializeOwned;
use serde_json::Value;

use tracing::{debug, error, warn};

const NAV_API: &str = "https://api.bilibili.com/x/web-interface/nav";
const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36";

// 支持自动携带认证状态的客户端
#[derive(Debug, Clone)]
pub struct BiliClient {
    pub inner: Client,
    pub cookie_store: Arc<CookieStoreMutex>,
    nav_api: String,
}

impl BiliClient {
    // 创建基础客户端，未认证
    pub fn new(timeout: Duration) -> Result<Self, ApiError> {
        let cookie_store = Arc::new(CookieStoreMutex::new(CookieStore::default()));

        let inner = ClientBuilder::new()
            .timeout(timeout)
            .cookie_provider(Arc::clone(&cookie_store))
            .default_headers(Self::get_default_headers())
            .build()
            .map_err(|e| {
                error!("创建 HTTP 客户端失败: {}", e);
                ApiError::Reqwest(e)
            })?;

        Ok(Self {
            inner,
            cookie_store,
            nav_api: NAV_API.to_string(),
        })
    }

    /// 替换获取 WBI 密钥用的 nav 接口地址
    pub fn with_nav_api(mut self, nav_api: impl Into<String>) -> Self {
        self.nav_api = nav_api.into();
        self
    }

    pub fn get_default_headers() -> HeaderMap {
        // 创建默认请求头
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("zh-CN,zh;q=0.9"));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate"));
        headers.insert(REFERER, HeaderValue::from_static("https://www.bilibili.com/"));
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));

        headers
    }

    // 获取音视频流专用的请求头，CDN 会校验 Referer
    pub fn stream_headers(auth: &AuthContext) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(REFERER, HeaderValue::from_static("https://www.bilibili.com/"));
        headers.insert(ORIGIN, HeaderValue::from_static("https://www.bilibili.com"));
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));

        if let Some(value) = Self::cookie_header(auth) {
            headers.insert(COOKIE, value);
        }

        headers
    }

    fn cookie_header(auth: &AuthContext) -> Option<HeaderValue> {
        let cookies = auth.cookies()?;
        match HeaderValue::from_str(&cookies.to_header_value()) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Cookie 含有非法字符，已忽略: {}", e);
                None
            }
        }
    }

    // 通用请求，按需带上登录 Cookie
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        auth: &AuthContext,
    ) -> Result<T, ApiError> {
        let mut request = self.inner.get(url);
        if let Some(value) = Self::cookie_header(auth) {
            request = request.header(COOKIE, value);
        }

        debug!("GET {}", url);
        let resp = request.send().await.map_err(|e| {
            error!("请求失败: {}", e);
            ApiError::Reqwest(e)
        })?;

        Self::handle_response::<T>(resp).await
    }

    // 带 WBI 签名的 GET 请求，拿不到密钥时退化为普通查询串
    pub async fn get_signed<T: DeserializeOwned>(
        &self,
        url: &str,
        params: HashMap<String, String>,
        auth: &AuthContext,
    ) -> Result<T, ApiError> {
        let query = match self.get_wbi_keys(auth).await {
            Ok((img_key, sub_key)) => WbiUtils::enc_wbi(params, &img_key, &sub_key),
            Err(e) => {
                debug!("获取 WBI 密钥失败，使用未签名请求: {}", e);
                serde_urlencoded::to_string(&params)
                    .map_err(|e| ApiError::InvalidResponse(e.to_string()))?
            }
        };

        self.get_json::<T>(&format!("{}?{}", url, query), auth).await
    }

    // 获取 wbi keys
    pub async fn get_wbi_keys(&self, auth: &AuthContext) -> Result<(String, String), ApiError> {
        // 未登录时 nav 接口返回 -101，但 wbi_img 依然存在，所以这里不走 handle_response 的 code 检查
        let mut request = self.inner.get(&self.nav_api);
        if let Some(value) = Self::cookie_header(auth) {
            request = request.header(COOKIE, value);
        }
        let resp = request.send().await?;
        let body = Self::read_body(resp).await?;
        let json: Value = serde_json::from_str(&body)?;

        let wbi_img = &json["data"]["wbi_img"];
        let img_key = wbi_img["img_url"]
            .as_str()
            .and_then(WbiUtils::key_from_url)
            .ok_or_else(|| ApiError::InvalidResponse("缺少 img_url".to_string()))?;
        let sub_key = wbi_img["sub_url"]
            .as_str()
            .and_then(WbiUtils::key_from_url)
            .ok_or_else(|| ApiError::InvalidResponse("缺少 sub_url".to_string()))?;

        Ok((img_key, sub_key))
    }

    /// 读出客户端 Cookie 仓库里尚未过期的全部 Cookie
    pub fn collect_cookies(&self) -> AuthCookies {
        let store = match self.cookie_store.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        store
            .iter_unexpired()
            .map(|c| (c.name().to_string(), c.value().to_string()))
            .collect()
    }

    async fn read_body(resp: Response) -> Result<String, ApiError> {
        let raw_body = resp.bytes().await?;

        match std::str::from_utf8(&raw_body) {
            Ok(text) => Ok(text.to_string()),
            Err(_) => {
                debug!("响应正文是非 UTF-8 格式，长度: {}，尝试 gzip 解压", raw_body.len());
                let mut gz = GzDecoder::new(&raw_body[..]);
                let mut decompressed = String::new();
                gz.read_to_string(&mut decompressed)
                    .map_err(|e| ApiError::InvalidResponse(format!("解压响应失败: {}", e)))?;
                Ok(decompressed)
            }
        }
    }

    async fn handle_response<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
        let status = resp.status();
        if status.is_server_error() {
            return Err(ApiError::RetryLater);
        }
        if !status.is_success() {
            return Err(ApiError::HttpStatus(status));
        }

        let text = Self::read_body(resp).await?;
        let json_value: Value = serde_json::from_str(&text)
            .map_err(|_| ApiError::InvalidResponse(text.chars().take(200).collect()))?;

        // 处理 B站 API 的标准返回格式
        if let Some(code) = json_value.get("code").and_then(|v| v.as_i64()) {
            if code != 0 {
                let message = json_value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Unknown error")
                    .to_string();
                return Err(ApiError::ApiError(code, message));
            }
        }

        serde_json::from_value::<T>(json_value)
            .map_err(|e| ApiError::InvalidResponse(format!("解析响应失败: {}", e)))
    }
}
