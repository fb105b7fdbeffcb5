use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use bilidl_engine::config::EngineConfig;

/// B站视频下载器
#[derive(Parser, Debug)]
#[command(name = "bilidl")]
#[command(version = "1.0")]
#[command(author = "rpeng252@gmail.com")]
#[command(about = "B站 DASH 音视频下载工具", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// 视频保存目录
    #[arg(long, value_name = "DIR", global = true)]
    #[arg(default_value = "./downloads")]
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub output_dir: PathBuf,

    /// 登录信息保存位置
    #[arg(long, value_name = "FILE", global = true)]
    #[arg(default_value = "./sessions/cookies.json")]
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub cookie_file: PathBuf,

    #[arg(long, value_name = "并发数", default_value_t = 3, global = true)]
    pub concurrency: usize,

    /// 流下载时允许的最长无数据间隔（秒）
    #[arg(long, value_name = "SECS", default_value_t = 60, global = true)]
    pub idle_timeout: u64,

    /// 合并允许的最长时间（秒）
    #[arg(long, value_name = "SECS", default_value_t = 1800, global = true)]
    pub merge_timeout: u64,

    /// 输出调试日志
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 下载一个视频
    Download {
        /// 视频链接、分享文案、短链接或 BV 号
        #[arg(value_name = "URL")]
        #[arg(value_hint = clap::ValueHint::Url)]
        url: String,

        #[arg(short, long)]
        #[arg(value_name = "QUALITY")]
        #[arg(default_value_t = 80)]
        #[arg(help = "视频质量: 120=4K, 112=1080P+, 80=1080P, 64=720P, 32=480P, 16=360P")]
        quality: u32,

        /// 下载前先扫码登录 (需要下载高清视频时使用)
        #[arg(long)]
        login: bool,
    },

    /// 扫码登录并保存 Cookie
    Login,

    /// 查看视频标题和可选画质
    Info {
        #[arg(value_name = "URL")]
        #[arg(value_hint = clap::ValueHint::Url)]
        url: String,
    },
}

impl Cli {
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default().with_download_dir(&self.output_dir);
        config.max_concurrent_tasks = self.concurrency.max(1);
        config.fetch_idle_timeout = Duration::from_secs(self.idle_timeout);
        config.merge_timeout = Duration::from_secs(self.merge_timeout);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_download() {
        let cli = Cli::parse_from([
            "bilidl",
            "download",
            "BV1N6nEzhEz6",
            "-q",
            "64",
            "--output-dir",
            "/tmp/out",
        ]);
        match &cli.command {
            Command::Download {
                url,
                quality,
                login,
            } => {
                assert_eq!(url, "BV1N6nEzhEz6");
                assert_eq!(*quality, 64);
                assert!(!login);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let config = cli.engine_config();
        assert_eq!(config.download_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.max_concurrent_tasks, 3);
    }
}
