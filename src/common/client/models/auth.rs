use serde_derive::Deserialize;

/// 二维码生成接口返回的数据
#[derive(Debug, Deserialize, Clone)]
pub struct QrGenerateData {
    pub url: String,
    pub qrcode_key: String,
}

/// 二维码轮询接口返回的数据
#[derive(Debug, Deserialize, Clone)]
pub struct QrPollData {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub timestamp: u64,
    pub code: i64,
    #[serde(default)]
    pub message: String,
}
