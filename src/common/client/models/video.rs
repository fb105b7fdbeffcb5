use serde_derive::Deserialize;

/// x/web-interface/view 返回的视频基础信息
#[derive(Debug, Deserialize, Clone)]
pub struct ViewData {
    pub bvid: String,
    pub title: String,
    pub cid: i64,
    #[serde(default)]
    pub pic: String,
}

/// x/player/playurl 返回的播放信息
#[derive(Debug, Deserialize, Clone)]
pub struct PlayUrlData {
    #[serde(default)]
    pub accept_description: Vec<String>,
    #[serde(default)]
    pub accept_quality: Vec<u32>,
    pub quality: Option<u32>,
    pub dash: Option<DashInfo>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashInfo {
    #[serde(default)]
    pub video: Vec<DashItem>,
    // 部分视频没有音轨，接口返回 null
    pub audio: Option<Vec<DashItem>>,
}

// 接口同时返回 baseUrl 和 base_url，这里只取驼峰那一份
#[derive(Debug, Deserialize, Clone)]
pub struct DashItem {
    pub id: u32,
    #[serde(rename = "baseUrl")]
    pub base_url: String,
    #[serde(rename = "backupUrl", default)]
    pub backup_url: Option<Vec<String>>,
    #[serde(default)]
    pub bandwidth: u64,
}
