use itertools::Itertools;
use md5::{Digest, Md5};
use std::collections::{BTreeMap, HashMap};
use time::OffsetDateTime;
use urlencoding::encode;

const MIXIN_KEY_ENC_TAB: [u8; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22, 25,
    54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

pub struct WbiUtils;

impl WbiUtils {
    /// 由 img_key 与 sub_key 打乱得到混合密钥
    pub fn mixin_key(img_key: &str, sub_key: &str) -> String {
        let orig: Vec<char> = format!("{}{}", img_key, sub_key).chars().collect();
        MIXIN_KEY_ENC_TAB
            .iter()
            .filter_map(|&i| orig.get(i as usize))
            .take(32)
            .collect()
    }

    /// 以当前时间签名，返回带 w_rid 的查询串
    pub fn enc_wbi(params: HashMap<String, String>, img_key: &str, sub_key: &str) -> String {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        Self::sign_at(params, img_key, sub_key, now)
    }

    /// 指定时间戳签名
    pub fn sign_at(
        params: HashMap<String, String>,
        img_key: &str,
        sub_key: &str,
        wts: i64,
    ) -> String {
        let mixin_key = Self::mixin_key(img_key, sub_key);

        // BTreeMap 保证按键排序，同时剔除值里的 !'()*
        let mut sorted: BTreeMap<String, String> = params
            .into_iter()
            .map(|(k, v)| (k, v.chars().filter(|c| !"!'()*".contains(*c)).collect()))
            .collect();
        sorted.insert("wts".to_string(), wts.to_string());

        let query = Self::to_query(&sorted);

        let mut hasher = Md5::new();
        hasher.update(format!("{}{}", query, mixin_key).as_bytes());
        let w_rid = format!("{:x}", hasher.finalize());

        format!("{}&w_rid={}", query, w_rid)
    }

    fn to_query(params: &BTreeMap<String, String>) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
            .join("&")
    }

    /// 从 wbi_img 的图片地址里取出文件名作为 key
    pub fn key_from_url(url: &str) -> Option<String> {
        url.rsplit('/')
            .next()
            .and_then(|name| name.split('.').next())
            .filter(|key| !key.is_empty())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMG_KEY: &str = "7cd084941338484aae1ad9425b84077c";
    const SUB_KEY: &str = "4932caff0ff746eab6f01bf08b70ac45";

    #[test]
    fn test_mixin_key() {
        assert_eq!(
            WbiUtils::mixin_key(IMG_KEY, SUB_KEY),
            "ea1db124af3c7062474693fa704f4ff8"
        );
    }

    #[test]
    fn test_sign_known_vector() {
        let params = HashMap::from([
            ("foo".to_string(), "114".to_string()),
            ("bar".to_string(), "514".to_string()),
            ("zab".to_string(), "1919810".to_string()),
        ]);
        let query = WbiUtils::sign_at(params, IMG_KEY, SUB_KEY, 1702204169);
        assert_eq!(
            query,
            "bar=514&foo=114&wts=1702204169&zab=1919810&w_rid=8f6f2b5b3d485fe1886cec6a0be8c5d4"
        );
    }

    #[test]
    fn test_key_from_url() {
        assert_eq!(
            WbiUtils::key_from_url("https://i0.hdslb.com/bfs/wbi/7cd084941338484aae1ad9425b84077c.png"),
            Some(IMG_KEY.to_string())
        );
        assert_eq!(WbiUtils::key_from_url(""), None);
    }
}
