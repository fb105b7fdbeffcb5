use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 登录得到的 Cookie 集合（名称 -> 值）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthCookies(BTreeMap<String, String>);

impl AuthCookies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// 合并另一组 Cookie，同名时以后者为准
    pub fn extend(&mut self, other: AuthCookies) {
        self.0.extend(other.0);
    }

    /// 拼成 `Cookie` 请求头的值
    pub fn to_header_value(&self) -> String {
        self.0
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl FromIterator<(String, String)> for AuthCookies {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// 请求流地址时携带的认证上下文
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    cookies: Option<AuthCookies>,
}

impl AuthContext {
    pub fn anonymous() -> Self {
        Self { cookies: None }
    }

    pub fn with_cookies(cookies: AuthCookies) -> Self {
        if cookies.is_empty() {
            return Self::anonymous();
        }
        Self {
            cookies: Some(cookies),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.cookies.is_some()
    }

    pub fn cookies(&self) -> Option<&AuthCookies> {
        self.cookies.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_header_is_sorted_and_joined() {
        let mut cookies = AuthCookies::new();
        cookies.insert("bili_jct", "csrf");
        cookies.insert("SESSDATA", "abc");
        assert_eq!(cookies.to_header_value(), "SESSDATA=abc; bili_jct=csrf");
    }

    #[test]
    fn test_empty_cookies_stay_anonymous() {
        let ctx = AuthContext::with_cookies(AuthCookies::new());
        assert!(!ctx.is_authenticated());
        assert!(ctx.cookies().is_none());
    }
}
