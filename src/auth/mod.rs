mod cookie_file;
pub mod errors;
pub mod qr_display;
pub mod session;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::common::client::client::BiliClient;
use crate::common::client::models::auth::{QrGenerateData, QrPollData};
use crate::common::client::models::common::CommonResponse;
use crate::common::logger::PrettyLogger;
use crate::common::models::{AuthContext, AuthCookies};
use crate::config::EngineConfig;

pub use cookie_file::FileCookieSink;
pub use errors::{AuthError, Result};
pub use qr_display::{display_qr, render_svg, render_unicode};
pub use session::{QrLoginSession, QrLoginState, QrPollOutcome};

const PASSPORT_BASE: &str = "https://passport.bilibili.com";

// 登录成功后跳转地址里携带的 Cookie
const URL_COOKIE_NAMES: [&str; 5] = [
    "SESSDATA",
    "bili_jct",
    "buvid3",
    "DedeUserID",
    "DedeUserID__ckMd5",
];

/// 登录接口下发的二维码
#[derive(Debug, Clone)]
pub struct QrChallenge {
    pub url: String,
    pub qrcode_key: String,
}

/// 二维码登录接口
#[async_trait]
pub trait QrLoginProvider: Send + Sync {
    async fn generate(&self) -> Result<QrChallenge>;
    async fn poll(&self, qrcode_key: &str) -> Result<QrPollOutcome>;
}

/// 登录得到的 Cookie 交给谁保存
pub trait CookieSink: Send + Sync {
    fn store(&self, cookies: &AuthCookies) -> Result<()>;
}

/// 只保存在内存里
#[derive(Debug, Default)]
pub struct MemoryCookieSink {
    latest: Mutex<Option<AuthCookies>>,
}

impl MemoryCookieSink {
    pub fn latest(&self) -> Option<AuthCookies> {
        self.latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl CookieSink for MemoryCookieSink {
    fn store(&self, cookies: &AuthCookies) -> Result<()> {
        *self.latest.lock().unwrap_or_else(|e| e.into_inner()) = Some(cookies.clone());
        Ok(())
    }
}

/// 对接 passport.bilibili.com 的扫码登录
#[derive(Debug, Clone)]
pub struct BiliQrProvider {
    passport_base: String,
    timeout: Duration,
}

impl BiliQrProvider {
    pub fn new(timeout: Duration) -> Self {
        Self {
            passport_base: PASSPORT_BASE.to_string(),
            timeout,
        }
    }

    pub fn with_passport_base(mut self, passport_base: impl Into<String>) -> Self {
        self.passport_base = passport_base.into();
        self
    }
}

#[async_trait]
impl QrLoginProvider for BiliQrProvider {
    async fn generate(&self) -> Result<QrChallenge> {
        let client = BiliClient::new(self.timeout)?;
        let url = format!(
            "{}/x/passport-login/web/qrcode/generate",
            self.passport_base
        );
        let resp: CommonResponse<QrGenerateData> =
            client.get_json(&url, &AuthContext::anonymous()).await?;

        let data = resp
            .data
            .ok_or_else(|| AuthError::ApiError("二维码数据缺失".to_string()))?;
        debug!("二维码生成成功: {}", data.qrcode_key);

        Ok(QrChallenge {
            url: data.url,
            qrcode_key: data.qrcode_key,
        })
    }

    async fn poll(&self, qrcode_key: &str) -> Result<QrPollOutcome> {
        // 每次轮询用新的客户端，登录成功时 Cookie 仓库里只有这次下发的 Cookie
        let client = BiliClient::new(self.timeout)?;
        let url = format!(
            "{}/x/passport-login/web/qrcode/poll?qrcode_key={}",
            self.passport_base,
            urlencoding::encode(qrcode_key)
        );
        let resp: CommonResponse<QrPollData> =
            client.get_json(&url, &AuthContext::anonymous()).await?;
        let data = resp
            .data
            .ok_or_else(|| AuthError::ApiError("登录状态数据缺失".to_string()))?;

        if data.code != 0 {
            return Ok(QrPollOutcome::from_code(data.code, data.message));
        }

        let mut cookies = cookies_from_url(&data.url);
        cookies.extend(client.collect_cookies());
        if cookies.is_empty() {
            return Err(AuthError::ApiError("登录成功但没有拿到 Cookie".to_string()));
        }
        Ok(QrPollOutcome::Confirmed(cookies))
    }
}

/// 从登录成功的跳转地址里取出 Cookie
pub fn cookies_from_url(url: &str) -> AuthCookies {
    let Ok(parsed) = Url::parse(url) else {
        return AuthCookies::new();
    };

    parsed
        .query_pairs()
        .filter(|(name, value)| URL_COOKIE_NAMES.contains(&&**name) && !value.is_empty())
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect()
}

/// 新建的二维码登录
#[derive(Debug, Clone)]
pub struct QrLoginTicket {
    pub qrcode_key: String,
    pub url: String,
    /// SVG 格式的二维码
    pub image: String,
}

/// 一次轮询的结果；只有刚确认登录的那一次带 Cookie
#[derive(Debug, Clone, PartialEq)]
pub struct QrPollStatus {
    pub state: QrLoginState,
    pub cookies: Option<AuthCookies>,
}

/// 管理进行中的扫码登录会话
pub struct QrLoginManager {
    provider: Arc<dyn QrLoginProvider>,
    sink: Arc<dyn CookieSink>,
    sessions: DashMap<String, QrLoginSession>,
    validity: Duration,
    poll_interval: Duration,
}

impl QrLoginManager {
    pub fn new(
        provider: Arc<dyn QrLoginProvider>,
        sink: Arc<dyn CookieSink>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            provider,
            sink,
            sessions: DashMap::new(),
            validity: config.qr_validity,
            poll_interval: config.qr_poll_interval,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub async fn create(&self) -> Result<QrLoginTicket> {
        let challenge = self.provider.generate().await?;
        let image = render_svg(&challenge.url)?;

        self.sessions.insert(
            challenge.qrcode_key.clone(),
            QrLoginSession::new(&challenge.qrcode_key, self.validity),
        );
        info!("🔐 新建扫码登录会话: {}", challenge.qrcode_key);

        Ok(QrLoginTicket {
            qrcode_key: challenge.qrcode_key,
            url: challenge.url,
            image,
        })
    }

    pub async fn poll(&self, qrcode_key: &str) -> Result<QrLoginState> {
        Ok(self.poll_status(qrcode_key).await?.state)
    }

    pub async fn poll_status(&self, qrcode_key: &str) -> Result<QrPollStatus> {
        let settled = {
            let mut session = self.session_mut(qrcode_key)?;
            session.expire_if_stale(Instant::now());
            // 已确认但上次没保存成功的 Cookie 还留在会话里
            if session.state().is_terminal() {
                Some((session.state(), session.take_cookies()))
            } else {
                None
            }
        };

        let (state, cookies) = match settled {
            Some(settled) => settled,
            None => {
                let outcome = self.provider.poll(qrcode_key).await?;
                let mut session = self.session_mut(qrcode_key)?;
                // 等待接口期间可能已经过期
                if session.expire_if_stale(Instant::now()) {
                    (session.state(), None)
                } else {
                    let state = session.apply(outcome);
                    (state, session.take_cookies())
                }
            }
        };

        if let Some(cookies) = &cookies {
            if let Err(e) = self.sink.store(cookies) {
                warn!("保存 Cookie 失败，下次轮询重试: {}", e);
                if let Some(mut session) = self.sessions.get_mut(qrcode_key) {
                    session.restore_cookies(cookies.clone());
                }
                return Err(e);
            }
            info!("✅ 扫码登录成功，获得 {} 个 Cookie", cookies.len());
        }

        Ok(QrPollStatus { state, cookies })
    }

    /// 清理已结束或已过期的会话，返回清理数量
    pub fn purge_stale(&self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_stale(now));
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            debug!("清理了 {} 个登录会话", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// 终端里的完整登录流程：显示二维码并轮询到结束
    pub async fn login_flow(&self) -> Result<AuthCookies> {
        let ticket = self.create().await?;
        PrettyLogger::login_prompt();
        display_qr(&ticket.url)?;

        let mut announced_scan = false;
        loop {
            tokio::time::sleep(self.poll_interval).await;

            let status = self.poll_status(&ticket.qrcode_key).await?;
            match status.state {
                QrLoginState::AwaitingScan => {}
                QrLoginState::Scanned => {
                    if !announced_scan {
                        PrettyLogger::waiting("二维码已扫描，请在手机上确认");
                        announced_scan = true;
                    }
                }
                QrLoginState::Confirmed => {
                    self.sessions.remove(&ticket.qrcode_key);
                    return status.cookies.ok_or_else(|| {
                        AuthError::ApiError("登录已确认但没有拿到 Cookie".to_string())
                    });
                }
                QrLoginState::Expired => {
                    warn!("二维码已过期: {}", ticket.qrcode_key);
                    self.sessions.remove(&ticket.qrcode_key);
                    return Err(AuthError::Expired);
                }
            }
        }
    }

    fn session_mut(
        &self,
        qrcode_key: &str,
    ) -> Result<dashmap::mapref::one::RefMut<'_, String, QrLoginSession>> {
        self.sessions
            .get_mut(qrcode_key)
            .ok_or_else(|| AuthError::UnknownSession(qrcode_key.to_string()))
    }
}
