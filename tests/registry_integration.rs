use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::HeaderMap;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use bilidl_engine::common::models::AuthContext;
use bilidl_engine::config::EngineConfig;
use bilidl_engine::downloader::progress::{ProgressEvent, TerminalStatus, not_found_frame};
use bilidl_engine::downloader::{
    DownloadRequest, MediaMerger, MergeError, MergeTool, Phase, RegistryError, TaskRegistry,
    TaskState,
};
use bilidl_engine::parser::errors::{ParseError, StreamError};
use bilidl_engine::parser::models::{QualityOption, StreamId, StreamSource, VideoInfo, VideoQuality};
use bilidl_engine::parser::{MetadataProvider, StreamUrlProvider};

const STREAM_SIZE: usize = 1_000_000;

/// 固定返回 Example 视频，流地址指向模拟服务器
struct FakeProvider {
    base: String,
}

#[async_trait]
impl MetadataProvider for FakeProvider {
    async fn resolve(&self, url: &str) -> Result<VideoInfo, ParseError> {
        if !url.contains("BV_example") {
            return Err(ParseError::InvalidUrl(url.to_string()));
        }
        Ok(VideoInfo {
            bvid: "BV_example".to_string(),
            title: "Example".to_string(),
            stream: StreamId {
                bvid: "BV_example".to_string(),
                cid: 1,
            },
            quality_options: vec![
                QualityOption {
                    code: 16,
                    description: "360P".to_string(),
                    need_login: false,
                },
                QualityOption {
                    code: 80,
                    description: "1080P".to_string(),
                    need_login: true,
                },
            ],
        })
    }
}

#[async_trait]
impl StreamUrlProvider for FakeProvider {
    async fn get_stream_urls(
        &self,
        _stream: &StreamId,
        _quality: VideoQuality,
        _auth: &AuthContext,
    ) -> Result<(StreamSource, StreamSource), StreamError> {
        Ok((
            StreamSource {
                url: format!("{}/video.m4s", self.base),
                headers: HeaderMap::new(),
            },
            StreamSource {
                url: format!("{}/audio.m4s", self.base),
                headers: HeaderMap::new(),
            },
        ))
    }
}

/// 不调用外部程序，直接写出输出文件
#[derive(Default)]
struct FakeMerger {
    calls: AtomicUsize,
}

#[async_trait]
impl MergeTool for FakeMerger {
    async fn merge(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        _timeout: Duration,
    ) -> Result<(), MergeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut merged = tokio::fs::read(video).await?;
        merged.extend(tokio::fs::read(audio).await?);
        tokio::fs::write(output, merged).await?;
        Ok(())
    }
}

struct Unavailable;

#[async_trait]
impl MergeTool for Unavailable {
    async fn merge(&self, _: &Path, _: &Path, _: &Path, _: Duration) -> Result<(), MergeError> {
        Ok(())
    }

    async fn check_available(&self) -> Result<(), MergeError> {
        Err(MergeError::Unavailable("ffmpeg not found".to_string()))
    }
}

async fn mount_stream(server: &MockServer, route: &str, template: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(template)
        .mount(server)
        .await;
}

async fn healthy_server() -> MockServer {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        "/video.m4s",
        ResponseTemplate::new(200).set_body_bytes(vec![1u8; STREAM_SIZE]),
    )
    .await;
    mount_stream(
        &server,
        "/audio.m4s",
        ResponseTemplate::new(200).set_body_bytes(vec![2u8; STREAM_SIZE]),
    )
    .await;
    server
}

fn registry(server: &MockServer, dir: &Path, merger: Arc<dyn MergeTool>) -> TaskRegistry {
    let provider = Arc::new(FakeProvider { base: server.uri() });
    let config = EngineConfig::default().with_download_dir(dir);
    TaskRegistry::new(config, provider.clone(), provider, merger).expect("registry")
}

fn request(quality: u32) -> DownloadRequest {
    DownloadRequest {
        url: "https://www.bilibili.com/video/BV_example".to_string(),
        quality,
        auth: AuthContext::anonymous(),
    }
}

fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default();
    files.sort();
    files
}

#[tokio::test]
async fn test_download_completes_with_full_progress() {
    let server = healthy_server().await;
    let dir = tempfile::tempdir().unwrap();
    let merger = Arc::new(FakeMerger::default());
    let registry = registry(&server, dir.path(), merger.clone());

    let task_id = registry.create(request(16)).await.expect("create");
    let events: Vec<ProgressEvent> = registry
        .subscribe(&task_id)
        .unwrap()
        .into_events()
        .collect()
        .await;

    let last = events.last().expect("events");
    assert_eq!(last.status, Some(TerminalStatus::Completed));
    assert_eq!(last.phase, Phase::Done);
    assert_eq!(last.progress, 100.0);
    assert_eq!(last.video_progress, 100.0);
    assert_eq!(last.audio_progress, 100.0);
    assert_eq!(last.filename.as_deref(), Some("Example.mp4"));

    // 综合进度单调不减，只有最后一个事件到 100
    assert!(events.windows(2).all(|w| w[0].progress <= w[1].progress));
    assert!(events.windows(2).all(|w| w[0].video_progress <= w[1].video_progress));
    assert!(events.windows(2).all(|w| w[0].audio_progress <= w[1].audio_progress));
    assert!(events[..events.len() - 1].iter().all(|e| e.progress < 100.0));

    let snapshot = registry.get(&task_id).unwrap();
    assert_eq!(snapshot.state, TaskState::Completed);
    assert!(snapshot.error.is_none());

    let file = registry.retained_file(&task_id).unwrap();
    assert_eq!(file.filename, "Example.mp4");
    assert_eq!(std::fs::metadata(&file.path).unwrap().len(), 2 * STREAM_SIZE as u64);
    assert_eq!(merger.calls.load(Ordering::SeqCst), 1);

    // 只剩输出文件
    assert_eq!(files_in(dir.path()), vec![file.path.clone()]);
}

#[tokio::test]
async fn test_late_subscriber_sees_terminal_event() {
    let server = healthy_server().await;
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(&server, dir.path(), Arc::new(FakeMerger::default()));

    let task_id = registry.create(request(16)).await.unwrap();
    let _ = registry
        .subscribe(&task_id)
        .unwrap()
        .into_stream()
        .collect::<Vec<_>>()
        .await;

    let late: Vec<ProgressEvent> = registry
        .subscribe(&task_id)
        .unwrap()
        .into_events()
        .collect()
        .await;
    assert_eq!(late.len(), 1);
    assert_eq!(late[0].status, Some(TerminalStatus::Completed));

    let frames: Vec<String> = registry.subscribe(&task_id).unwrap().into_sse().collect().await;
    assert_eq!(frames.len(), 1);
    assert!(frames[0].starts_with("event: progress\ndata: "));
    assert!(frames[0].contains("\"status\":\"completed\""));
}

#[tokio::test]
async fn test_failed_fetch_skips_merge_and_leaves_no_files() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        "/video.m4s",
        ResponseTemplate::new(200)
            .set_body_bytes(vec![1u8; STREAM_SIZE])
            .set_delay(Duration::from_millis(500)),
    )
    .await;
    mount_stream(&server, "/audio.m4s", ResponseTemplate::new(403)).await;

    let dir = tempfile::tempdir().unwrap();
    let merger = Arc::new(FakeMerger::default());
    let registry = registry(&server, dir.path(), merger.clone());

    let task_id = registry.create(request(16)).await.unwrap();
    let events: Vec<ProgressEvent> = registry
        .subscribe(&task_id)
        .unwrap()
        .into_events()
        .collect()
        .await;

    let last = events.last().unwrap();
    assert_eq!(last.status, Some(TerminalStatus::Error));
    let error = last.error.as_deref().unwrap_or_default();
    assert!(error.contains("音频流"), "error was: {error}");
    assert!(error.contains("403"), "error was: {error}");
    assert!(last.filename.is_none());

    assert_eq!(merger.calls.load(Ordering::SeqCst), 0);
    assert!(files_in(dir.path()).is_empty());
    assert!(matches!(
        registry.retained_file(&task_id),
        Err(RegistryError::NotReady(_))
    ));
}

#[cfg(unix)]
#[tokio::test]
async fn test_merge_failure_carries_tool_diagnostic() {
    use std::os::unix::fs::PermissionsExt;

    let server = MockServer::start().await;
    mount_stream(
        &server,
        "/video.m4s",
        ResponseTemplate::new(200).set_body_bytes(vec![1u8; STREAM_SIZE]),
    )
    .await;
    // 零字节音频
    mount_stream(&server, "/audio.m4s", ResponseTemplate::new(200)).await;

    let tools = tempfile::tempdir().unwrap();
    let script = tools.path().join("ffmpeg");
    std::fs::write(
        &script,
        "#!/bin/sh\n[ \"$1\" = \"-version\" ] && exit 0\necho 'audio.m4s: Invalid data found when processing input' >&2\nexit 1\n",
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let registry = registry(&server, dir.path(), Arc::new(MediaMerger::new(&script)));

    let task_id = registry.create(request(16)).await.unwrap();
    let events: Vec<ProgressEvent> = registry
        .subscribe(&task_id)
        .unwrap()
        .into_events()
        .collect()
        .await;

    let last = events.last().unwrap();
    assert_eq!(last.status, Some(TerminalStatus::Error));
    assert_eq!(last.phase, Phase::Merging);
    assert!(
        last.error
            .as_deref()
            .unwrap_or_default()
            .contains("Invalid data found when processing input")
    );
    assert!(files_in(dir.path()).is_empty());
}

#[tokio::test]
async fn test_rejected_requests_create_no_task() {
    let server = healthy_server().await;
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(&server, dir.path(), Arc::new(FakeMerger::default()));

    // 未登录请求 1080P
    assert!(matches!(
        registry.create(request(80)).await,
        Err(RegistryError::Stream(StreamError::AuthRequired(80)))
    ));
    assert!(matches!(
        registry.create(request(81)).await,
        Err(RegistryError::Stream(StreamError::InvalidQuality(81)))
    ));
    assert!(matches!(
        registry.create(request(64)).await,
        Err(RegistryError::Stream(StreamError::QualityUnavailable(64)))
    ));

    let mut bad_url = request(16);
    bad_url.url = "https://www.bilibili.com/video/unknown".to_string();
    assert!(matches!(
        registry.create(bad_url).await,
        Err(RegistryError::Resolution(_))
    ));

    assert!(registry.is_empty());
    assert!(matches!(registry.get("missing"), Err(RegistryError::NotFound(_))));
    assert!(registry.subscribe("missing").is_err());
    assert_eq!(
        not_found_frame(),
        "event: error\ndata: {\"error\":\"Task not found\"}\n\n"
    );
}

#[tokio::test]
async fn test_unavailable_merge_tool_is_rejected_up_front() {
    let server = healthy_server().await;
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(&server, dir.path(), Arc::new(Unavailable));

    assert!(matches!(
        registry.create(request(16)).await,
        Err(RegistryError::MergeToolUnavailable(_))
    ));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_concurrency_limit() {
    let server = MockServer::start().await;
    let slow = ResponseTemplate::new(200)
        .set_body_bytes(vec![1u8; 1024])
        .set_delay(Duration::from_secs(2));
    mount_stream(&server, "/video.m4s", slow.clone()).await;
    mount_stream(&server, "/audio.m4s", slow).await;

    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(FakeProvider { base: server.uri() });
    let mut config = EngineConfig::default().with_download_dir(dir.path());
    config.max_concurrent_tasks = 1;
    let registry = TaskRegistry::new(
        config,
        provider.clone(),
        provider,
        Arc::new(FakeMerger::default()),
    )
    .unwrap();

    let first = registry.create(request(16)).await.unwrap();
    assert!(matches!(
        registry.create(request(16)).await,
        Err(RegistryError::TooManyTasks(1))
    ));

    // 取消后名额释放
    registry.remove(&first).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(registry.create(request(16)).await.is_ok());
    registry.shutdown();
}

#[tokio::test]
async fn test_shutdown_fails_running_tasks_and_cleans_up() {
    let server = MockServer::start().await;
    let slow = ResponseTemplate::new(200)
        .set_body_bytes(vec![1u8; 1024])
        .set_delay(Duration::from_secs(3));
    mount_stream(&server, "/video.m4s", slow.clone()).await;
    mount_stream(&server, "/audio.m4s", slow).await;

    let dir = tempfile::tempdir().unwrap();
    let registry = registry(&server, dir.path(), Arc::new(FakeMerger::default()));
    let task_id = registry.create(request(16)).await.unwrap();
    let subscription = registry.subscribe(&task_id).unwrap();

    registry.shutdown();
    let events: Vec<ProgressEvent> = subscription.into_events().collect().await;

    let last = events.last().unwrap();
    assert_eq!(last.state, TaskState::Failed);
    assert_eq!(last.error.as_deref(), Some("任务已取消"));
    assert!(files_in(dir.path()).is_empty());
}

#[tokio::test]
async fn test_eviction_removes_finished_tasks_and_files() {
    let server = healthy_server().await;
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(FakeProvider { base: server.uri() });
    let mut config = EngineConfig::default().with_download_dir(dir.path());
    config.retention = Duration::ZERO;
    let registry = TaskRegistry::new(
        config,
        provider.clone(),
        provider,
        Arc::new(FakeMerger::default()),
    )
    .unwrap();

    let task_id = registry.create(request(16)).await.unwrap();
    let _ = registry
        .subscribe(&task_id)
        .unwrap()
        .into_stream()
        .collect::<Vec<_>>()
        .await;
    let output = registry.file_path(&task_id).unwrap();

    // 终态事件先于结束时间的记录，等流水线彻底退出
    let mut evicted = 0;
    for _ in 0..50 {
        evicted += registry.evict_expired().await;
        if evicted > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(evicted, 1);
    assert!(registry.is_empty());
    assert!(!output.exists());
    assert!(matches!(registry.get(&task_id), Err(RegistryError::NotFound(_))));
}

#[tokio::test]
async fn test_stray_files_are_swept() {
    let server = healthy_server().await;
    let dir = tempfile::tempdir().unwrap();
    let stray = dir.path().join("0000-dead_video.m4s");
    let unrelated = dir.path().join("notes.txt");
    std::fs::write(&stray, b"partial").unwrap();
    std::fs::write(&unrelated, b"keep").unwrap();

    let provider = Arc::new(FakeProvider { base: server.uri() });
    let mut config = EngineConfig::default().with_download_dir(dir.path());
    config.retention = Duration::ZERO;
    let registry = TaskRegistry::new(
        config,
        provider.clone(),
        provider,
        Arc::new(FakeMerger::default()),
    )
    .unwrap();

    assert_eq!(registry.evict_expired().await, 0);
    assert!(!stray.exists());
    assert!(unrelated.exists());
}

#[tokio::test]
async fn test_create_after_shutdown_is_rejected() {
    let server = healthy_server().await;
    let dir = tempfile::tempdir().unwrap();
    let merger = Arc::new(FakeMerger::default());
    let registry = registry(&server, dir.path(), merger.clone());

    registry.shutdown();
    let err = registry.create(request(16)).await.unwrap_err();
    assert!(matches!(err, RegistryError::ShuttingDown));
    assert!(registry.is_empty());
    assert!(files_in(dir.path()).is_empty());
    assert_eq!(merger.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_sweeper_evicts_finished_tasks_until_shutdown() {
    let server = healthy_server().await;
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(FakeProvider { base: server.uri() });
    let mut config = EngineConfig::default().with_download_dir(dir.path());
    config.retention = Duration::from_secs(60);
    config.sweep_interval = Duration::from_secs(60);
    let registry = TaskRegistry::new(
        config,
        provider.clone(),
        provider,
        Arc::new(FakeMerger::default()),
    )
    .unwrap();

    let task_id = registry.create(request(16)).await.unwrap();
    let _ = registry
        .subscribe(&task_id)
        .unwrap()
        .into_stream()
        .collect::<Vec<_>>()
        .await;
    let output = registry.file_path(&task_id).unwrap();

    // 下载走真实时间，之后冻结时钟由测试推进
    tokio::time::pause();
    let sweeper = registry.spawn_sweeper();
    assert_eq!(registry.len(), 1);

    for _ in 0..20 {
        if registry.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_secs(30)).await;
    }

    assert!(registry.is_empty());
    assert!(!output.exists());

    registry.shutdown();
    let stopped = tokio::time::timeout(Duration::from_secs(5), sweeper).await;
    assert!(matches!(stopped, Ok(Ok(()))));
}
