use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use tracing::{debug, info};

use bilidl_engine::auth::{BiliQrProvider, FileCookieSink, QrLoginManager};
use bilidl_engine::common::client::client::BiliClient;
use bilidl_engine::common::logger::{PrettyLogger, init_tracing};
use bilidl_engine::common::models::{AuthContext, AuthCookies};
use bilidl_engine::config::EngineConfig;
use bilidl_engine::downloader::{
    DownloadRequest, MediaMerger, Phase, TaskRegistry, TaskSnapshot, TaskState,
};
use bilidl_engine::parser::models::VideoQuality;
use bilidl_engine::parser::{MetadataProvider, VideoParser};
use bilidl_engine::{log_error, log_info, log_step, log_success};

mod cli;

use cli::{Cli, Command};

const BAR_LENGTH: u64 = 1000;

fn video_parser(config: &EngineConfig) -> anyhow::Result<Arc<VideoParser>> {
    let client = BiliClient::new(config.api_timeout)?;
    Ok(Arc::new(VideoParser::new(client)?))
}

/// 扫码登录，Cookie 写入 cookie 文件
async fn qr_login(args: &Cli, config: &EngineConfig) -> anyhow::Result<AuthCookies> {
    let provider = Arc::new(BiliQrProvider::new(config.api_timeout));
    let sink = Arc::new(FileCookieSink::new(&args.cookie_file));
    let manager = QrLoginManager::new(provider, sink, config);

    let cookies = manager.login_flow().await?;
    log_success!("登录成功，获得 Cookie: {}", cookies.names().join(", "));
    Ok(cookies)
}

/// 处理用户认证
async fn handle_auth(args: &Cli, config: &EngineConfig, login: bool) -> anyhow::Result<AuthContext> {
    if login {
        info!("开始二维码登录流程");
        return Ok(AuthContext::with_cookies(qr_login(args, config).await?));
    }

    match FileCookieSink::new(&args.cookie_file).load() {
        Some(cookies) => {
            log_info!("使用已保存的登录信息: {}", args.cookie_file.display());
            Ok(AuthContext::with_cookies(cookies))
        }
        None => {
            PrettyLogger::warning("未登录，只能下载 480P 及以下画质（可加 --login 扫码登录）");
            Ok(AuthContext::anonymous())
        }
    }
}

async fn show_info(config: &EngineConfig, url: &str) -> anyhow::Result<()> {
    let parser = video_parser(config)?;
    let info = parser.resolve(url).await?;

    PrettyLogger::video_info(&info.title, &info.bvid);
    for option in &info.quality_options {
        let hint = if option.need_login { "（需要登录）" } else { "" };
        println!("  {:>4}  {}{}", option.code, option.description, hint.yellow());
    }
    Ok(())
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(BAR_LENGTH);
    match ProgressStyle::with_template("{msg:8} [{elapsed_precise}] {wide_bar:.cyan/blue} {percent:>3}%") {
        Ok(style) => bar.set_style(style.progress_chars("=>-")),
        Err(e) => debug!("进度条样式无效: {}", e),
    }
    bar
}

fn render(bar: &ProgressBar, snapshot: &TaskSnapshot) {
    let label = match snapshot.phase {
        Phase::Video => "视频流",
        Phase::Audio => "音频流",
        Phase::Merging => "合并中",
        Phase::Done => "完成",
    };
    bar.set_message(label);
    bar.set_position((snapshot.progress * 10.0).round() as u64);
}

async fn download(
    args: &Cli,
    config: &EngineConfig,
    url: &str,
    quality: u32,
    login: bool,
) -> anyhow::Result<()> {
    let auth = handle_auth(args, config, login).await?;
    let parser = video_parser(config)?;
    let merger = Arc::new(MediaMerger::new(&config.ffmpeg_path));
    let registry = TaskRegistry::new(config.clone(), parser.clone(), parser, merger)?;

    log_step!("解析视频: {}", url);
    let task_id = registry
        .create(DownloadRequest {
            url: url.to_string(),
            quality,
            auth,
        })
        .await?;

    let snapshot = registry.get(&task_id)?;
    let label = VideoQuality::from_code(snapshot.quality)
        .map(VideoQuality::label)
        .unwrap_or("未知画质");
    PrettyLogger::video_info(&snapshot.title, label);

    // Ctrl+C 时取消任务，流水线负责清理临时文件
    let interrupt = registry.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.shutdown();
        }
    });

    let bar = progress_bar();
    let mut subscription = registry.subscribe(&task_id)?;
    while let Some(snapshot) = subscription.next().await {
        render(&bar, &snapshot);
    }
    bar.finish_and_clear();

    let last = registry.get(&task_id)?;
    match last.state {
        TaskState::Completed => {
            let file = registry.retained_file(&task_id)?;
            let target: PathBuf = config.download_dir.join(&file.filename);
            tokio::fs::rename(&file.path, &target)
                .await
                .with_context(|| format!("无法移动输出文件到 {:?}", target))?;
            PrettyLogger::file_info("输出文件", target.display().to_string());
            log_success!("下载完成！");
            Ok(())
        }
        _ => {
            let message = last.error.unwrap_or_else(|| "未知错误".to_string());
            log_error!("下载失败: {}", message);
            bail!(message)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    init_tracing(args.verbose);
    let config = args.engine_config();
    debug!("运行参数: {:?}", config);

    match &args.command {
        Command::Download {
            url,
            quality,
            login,
        } => download(&args, &config, url, *quality, *login).await,
        Command::Login => qr_login(&args, &config).await.map(|_| ()),
        Command::Info { url } => show_info(&config, url).await,
    }
}
