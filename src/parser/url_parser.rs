use super::errors::ParseError;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{Client, redirect::Policy};
use tracing::debug;
use url::Url;

lazy_static! {
    static ref BV_PATTERN: Regex = Regex::new(r"BV[0-9A-Za-z]{10}").unwrap();
    static ref RAW_BV_PATTERN: Regex = Regex::new(r"^BV[0-9A-Za-z]{10}$").unwrap();
    static ref URL_PATTERN: Regex = Regex::new(r"https?://[^\s<>\x22']+").unwrap();
}

/// 把用户输入（完整链接、分享文案、短链接或裸 BV 号）规整为 BV 号
pub struct UrlParser {
    client: Client,
}

impl UrlParser {
    pub fn new() -> Result<Self, ParseError> {
        // 短链接需要读取 Location，不能自动跟随跳转
        let client = Client::builder()
            .redirect(Policy::none())
            .build()
            .map_err(|e| ParseError::NetworkError(e.to_string()))?;
        Ok(Self { client })
    }

    pub async fn parse(&self, input: &str) -> Result<String, ParseError> {
        let url = self.normalize_url(input).await?;
        debug!("规整后的地址: {}", url);

        extract_bvid(&url).ok_or_else(|| ParseError::InvalidUrl(input.to_string()))
    }

    async fn normalize_url(&self, input: &str) -> Result<String, ParseError> {
        let input = input.trim();

        if RAW_BV_PATTERN.is_match(input) {
            return Ok(format!("https://www.bilibili.com/video/{}", input));
        }

        // 分享文案里夹带的链接
        let url = extract_url(input).unwrap_or_else(|| input.to_string());

        // 处理短链接
        if url.contains("b23.tv") {
            return self.expand_short_url(&url).await;
        }

        // 处理移动端链接
        if url.contains("m.bilibili.com") {
            return Ok(url.replace("m.bilibili.com", "www.bilibili.com"));
        }

        match Url::parse(&url) {
            Ok(parsed) => Ok(parsed.into()),
            Err(_) => Err(ParseError::InvalidUrl(input.to_string())),
        }
    }

    async fn expand_short_url(&self, url: &str) -> Result<String, ParseError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ParseError::NetworkError(e.to_string()))?;

        match response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|location| location.to_str().ok())
        {
            Some(location) => Ok(location.to_string()),
            None => Err(ParseError::InvalidShortUrl(url.to_string())),
        }
    }
}

/// 从文本中取出 BV 号
pub fn extract_bvid(text: &str) -> Option<String> {
    BV_PATTERN.find(text).map(|m| m.as_str().to_string())
}

/// 从分享文案中取出第一个链接
pub fn extract_url(text: &str) -> Option<String> {
    URL_PATTERN.find(text).map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_extract_bvid() {
        assert_eq!(
            extract_bvid("https://www.bilibili.com/video/BV1N6nEzhEz6/?vd_source=eb10"),
            Some("BV1N6nEzhEz6".to_string())
        );
        assert_eq!(extract_bvid("https://www.bilibili.com/video/av170001"), None);
    }

    #[test]
    fn test_extract_url_from_share_text() {
        let text = "【示例视频】 https://b23.tv/abcdEFG 复制链接打开";
        assert_eq!(extract_url(text), Some("https://b23.tv/abcdEFG".to_string()));
        assert_eq!(extract_url("没有链接"), None);
    }

    #[tokio::test]
    async fn test_parse_plain_and_raw_inputs() {
        let parser = UrlParser::new().expect("parser");
        assert_eq!(
            parser.parse("BV1N6nEzhEz6").await.expect("raw id"),
            "BV1N6nEzhEz6"
        );
        assert_eq!(
            parser
                .parse("https://m.bilibili.com/video/BV1dRnjzGEc1")
                .await
                .expect("mobile"),
            "BV1dRnjzGEc1"
        );
        assert!(matches!(
            parser.parse("not a url").await,
            Err(ParseError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_expand_short_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/abc"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", "https://www.bilibili.com/video/BV1N6nEzhEz6"),
            )
            .mount(&server)
            .await;

        // 模拟服务器地址里不含 b23.tv，直接调用展开逻辑
        let parser = UrlParser::new().expect("parser");
        let expanded = parser
            .expand_short_url(&format!("{}/abc", server.uri()))
            .await
            .expect("expand");
        assert_eq!(extract_bvid(&expanded), Some("BV1N6nEzhEz6".to_string()));
    }
}
