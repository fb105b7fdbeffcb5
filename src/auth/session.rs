use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::common::models::AuthCookies;

/// 扫码登录的四个状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QrLoginState {
    AwaitingScan,
    Scanned,
    Confirmed,
    Expired,
}

impl QrLoginState {
    pub fn is_terminal(self) -> bool {
        matches!(self, QrLoginState::Confirmed | QrLoginState::Expired)
    }

    pub fn can_transition_to(self, next: QrLoginState) -> bool {
        use QrLoginState::*;
        matches!(
            (self, next),
            (AwaitingScan, Scanned)
                | (AwaitingScan, Confirmed)
                | (Scanned, Confirmed)
                | (AwaitingScan, Expired)
                | (Scanned, Expired)
        )
    }
}

/// 登录接口一次轮询的结果
#[derive(Debug, Clone, PartialEq)]
pub enum QrPollOutcome {
    Waiting,
    Scanned,
    Confirmed(AuthCookies),
    Expired,
    Unknown { code: i64, message: String },
}

impl QrPollOutcome {
    /// 86101 未扫码，86090 已扫码待确认，86038 已过期；0 需要另外带上 Cookie
    pub fn from_code(code: i64, message: impl Into<String>) -> Self {
        match code {
            86101 => QrPollOutcome::Waiting,
            86090 => QrPollOutcome::Scanned,
            86038 => QrPollOutcome::Expired,
            _ => QrPollOutcome::Unknown {
                code,
                message: message.into(),
            },
        }
    }
}

#[derive(Debug)]
pub struct QrLoginSession {
    qrcode_key: String,
    state: QrLoginState,
    created_at: Instant,
    validity: Duration,
    cookies: Option<AuthCookies>,
}

impl QrLoginSession {
    pub fn new(qrcode_key: impl Into<String>, validity: Duration) -> Self {
        Self {
            qrcode_key: qrcode_key.into(),
            state: QrLoginState::AwaitingScan,
            created_at: Instant::now(),
            validity,
            cookies: None,
        }
    }

    pub fn qrcode_key(&self) -> &str {
        &self.qrcode_key
    }

    pub fn state(&self) -> QrLoginState {
        self.state
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn is_past_validity(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.validity
    }

    /// 超过有效期且尚未结束的会话直接过期，返回是否发生了转换
    pub fn expire_if_stale(&mut self, now: Instant) -> bool {
        if self.state.is_terminal() || !self.is_past_validity(now) {
            return false;
        }
        info!("二维码 {} 已超过有效期", self.qrcode_key);
        self.state = QrLoginState::Expired;
        true
    }

    /// 已结束或已超过有效期，可以清理
    pub fn is_stale(&self, now: Instant) -> bool {
        self.state.is_terminal() || self.is_past_validity(now)
    }

    /// 应用一次轮询结果。状态只进不退，未知状态码保持原状态
    pub fn apply(&mut self, outcome: QrPollOutcome) -> QrLoginState {
        let next = match outcome {
            QrPollOutcome::Waiting => QrLoginState::AwaitingScan,
            QrPollOutcome::Scanned => QrLoginState::Scanned,
            QrPollOutcome::Expired => QrLoginState::Expired,
            QrPollOutcome::Confirmed(cookies) => {
                if self.state.can_transition_to(QrLoginState::Confirmed) {
                    self.cookies = Some(cookies);
                }
                QrLoginState::Confirmed
            }
            QrPollOutcome::Unknown { code, message } => {
                warn!("二维码 {} 返回未知状态码: {} ({})", self.qrcode_key, code, message);
                self.state
            }
        };

        if self.state.can_transition_to(next) {
            self.state = next;
        }
        self.state
    }

    /// 取走登录得到的 Cookie，之后会话里不再保存
    pub fn take_cookies(&mut self) -> Option<AuthCookies> {
        self.cookies.take()
    }

    /// 没能交付的 Cookie 放回会话，等下次轮询再交
    pub fn restore_cookies(&mut self, cookies: AuthCookies) {
        if self.state == QrLoginState::Confirmed && self.cookies.is_none() {
            self.cookies = Some(cookies);
        }
    }
}
