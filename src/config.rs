use std::path::PathBuf;
use std::time::Duration;

/// 合并工具路径的环境变量
pub const FFMPEG_PATH_ENV: &str = "FFMPEG_PATH";

/// 引擎运行参数
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 临时文件与输出文件所在目录
    pub download_dir: PathBuf,
    /// 同时运行的下载任务上限
    pub max_concurrent_tasks: usize,
    /// 建立连接的超时
    pub connect_timeout: Duration,
    /// 接口请求（元数据、二维码）的整体超时
    pub api_timeout: Duration,
    /// 流下载时两次数据块之间允许的最长间隔
    pub fetch_idle_timeout: Duration,
    /// 单次合并允许的最长时间
    pub merge_timeout: Duration,
    /// 单个流文件的大小上限
    pub max_file_size: u64,
    /// 结束的任务及其文件保留多久
    pub retention: Duration,
    /// 清理任务的执行间隔
    pub sweep_interval: Duration,
    /// 二维码有效期
    pub qr_validity: Duration,
    /// 推荐的二维码轮询间隔
    pub qr_poll_interval: Duration,
    /// 合并工具（ffmpeg）可执行文件
    pub ffmpeg_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("./downloads"),
            max_concurrent_tasks: 3,
            connect_timeout: Duration::from_secs(10),
            api_timeout: Duration::from_secs(30),
            fetch_idle_timeout: Duration::from_secs(60),
            merge_timeout: Duration::from_secs(30 * 60),
            max_file_size: 5 * 1024 * 1024 * 1024,
            retention: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(600),
            qr_validity: Duration::from_secs(180),
            qr_poll_interval: Duration::from_secs(2),
            ffmpeg_path: default_ffmpeg_path(),
        }
    }
}

impl EngineConfig {
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }
}

/// 优先使用 FFMPEG_PATH 环境变量，否则从 PATH 中查找 ffmpeg
pub fn default_ffmpeg_path() -> PathBuf {
    std::env::var_os(FFMPEG_PATH_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("ffmpeg"))
}
