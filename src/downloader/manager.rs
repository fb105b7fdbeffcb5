use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::core::{DownloadCore, TaskPlan};
use super::error::{FetchError, MergeError};
use super::fetcher::{StreamFetcher, StreamTarget};
use super::merger::MergeTool;
use super::progress::{ProgressPublisher, ProgressSubscription};
use super::task::{DownloadTask, TaskSnapshot, TaskState, output_filename};
use crate::common::models::AuthContext;
use crate::config::EngineConfig;
use crate::parser::errors::{ParseError, StreamError};
use crate::parser::models::VideoQuality;
use crate::parser::{MetadataProvider, StreamUrlProvider, select_quality};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("无法解析视频: {0}")]
    Resolution(#[from] ParseError),

    #[error("无法获取视频流: {0}")]
    Stream(#[from] StreamError),

    #[error("任务未找到: {0}")]
    NotFound(String),

    #[error("任务尚未完成: {0}")]
    NotReady(String),

    #[error("同时进行的下载任务已达上限（{0} 个），请稍后再试")]
    TooManyTasks(usize),

    #[error("下载服务正在停止，不再接受新任务")]
    ShuttingDown,

    #[error("合并工具不可用: {0}")]
    MergeToolUnavailable(#[source] MergeError),

    #[error("初始化下载器失败: {0}")]
    Init(#[from] FetchError),

    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),
}

/// 创建任务的请求
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub quality: u32,
    pub auth: AuthContext,
}

/// 可以交给用户的输出文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedFile {
    pub path: PathBuf,
    pub filename: String,
}

struct TaskEntry {
    publisher: ProgressPublisher,
    cancel: CancellationToken,
    finished_at: Mutex<Option<Instant>>,
}

impl TaskEntry {
    fn mark_finished(&self) {
        *self.finished_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
    }

    fn finished_at(&self) -> Option<Instant> {
        *self.finished_at.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct RegistryInner {
    tasks: DashMap<String, Arc<TaskEntry>>,
    metadata: Arc<dyn MetadataProvider>,
    streams: Arc<dyn StreamUrlProvider>,
    core: DownloadCore,
    semaphore: Arc<Semaphore>,
    config: EngineConfig,
    shutdown: CancellationToken,
}

/// 任务表：创建任务、查询状态、订阅进度、交付文件和回收过期任务
#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<RegistryInner>,
}

impl TaskRegistry {
    pub fn new(
        config: EngineConfig,
        metadata: Arc<dyn MetadataProvider>,
        streams: Arc<dyn StreamUrlProvider>,
        merger: Arc<dyn MergeTool>,
    ) -> Result<Self, RegistryError> {
        let fetcher = StreamFetcher::from_config(&config)?;
        let core = DownloadCore::new(fetcher, merger, config.merge_timeout);

        Ok(Self {
            inner: Arc::new(RegistryInner {
                tasks: DashMap::new(),
                metadata,
                streams,
                core,
                semaphore: Arc::new(Semaphore::new(config.max_concurrent_tasks)),
                config,
                shutdown: CancellationToken::new(),
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// 解析视频、选定画质和流地址后登记任务并在后台开始下载，返回任务 ID。
    /// 这里的任何错误都不会登记任务。
    pub async fn create(&self, request: DownloadRequest) -> Result<String, RegistryError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(RegistryError::ShuttingDown);
        }

        let max = self.inner.config.max_concurrent_tasks;
        let permit = self
            .inner
            .semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| RegistryError::TooManyTasks(max))?;

        if VideoQuality::from_code(request.quality).is_none() {
            return Err(StreamError::InvalidQuality(request.quality).into());
        }

        self.inner
            .core
            .merger()
            .check_available()
            .await
            .map_err(RegistryError::MergeToolUnavailable)?;

        let info = self.inner.metadata.resolve(&request.url).await?;
        let (quality, option) = select_quality(&info, request.quality, &request.auth)?;
        let (video_source, audio_source) = self
            .inner
            .streams
            .get_stream_urls(&info.stream, quality, &request.auth)
            .await?;

        // 解析期间可能已经开始停止
        if self.inner.shutdown.is_cancelled() {
            return Err(RegistryError::ShuttingDown);
        }

        let task_id = uuid::Uuid::new_v4().to_string();
        let dir = &self.inner.config.download_dir;
        tokio::fs::create_dir_all(dir).await?;

        let plan = TaskPlan {
            video: StreamTarget::from_source(video_source, dir.join(format!("{}_video.m4s", task_id))),
            audio: StreamTarget::from_source(audio_source, dir.join(format!("{}_audio.m4s", task_id))),
            output_path: dir.join(format!("{}.mp4", task_id)),
            filename: output_filename(&info.title, &info.bvid),
        };

        let task = DownloadTask::new(&task_id, &info.title, quality.code());
        let publisher = ProgressPublisher::new(task.snapshot().clone());
        let entry = Arc::new(TaskEntry {
            publisher: publisher.clone(),
            cancel: self.inner.shutdown.child_token(),
            finished_at: Mutex::new(None),
        });
        self.inner.tasks.insert(task_id.clone(), entry.clone());

        info!(
            "📥 新建任务 {}: {} [{}]",
            task_id, info.title, option.description
        );

        let core = self.inner.core.clone();
        let cancel = entry.cancel.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let snapshot = core.run(task, plan, publisher, cancel).await;
            entry.mark_finished();
            debug!("任务 {} 结束，状态 {:?}", snapshot.id, snapshot.state);
        });

        Ok(task_id)
    }

    pub fn get(&self, task_id: &str) -> Result<TaskSnapshot, RegistryError> {
        Ok(self.entry(task_id)?.publisher.latest())
    }

    pub fn subscribe(&self, task_id: &str) -> Result<ProgressSubscription, RegistryError> {
        Ok(self.entry(task_id)?.publisher.subscribe())
    }

    /// 只有已完成的任务才有文件可取；取文件不会删除任务
    pub fn retained_file(&self, task_id: &str) -> Result<RetainedFile, RegistryError> {
        let snapshot = self.get(task_id)?;
        if snapshot.state != TaskState::Completed {
            return Err(RegistryError::NotReady(task_id.to_string()));
        }

        match (snapshot.output_path, snapshot.filename) {
            (Some(path), Some(filename)) if path.exists() => Ok(RetainedFile { path, filename }),
            _ => Err(RegistryError::NotFound(task_id.to_string())),
        }
    }

    pub fn file_path(&self, task_id: &str) -> Result<PathBuf, RegistryError> {
        self.retained_file(task_id).map(|file| file.path)
    }

    /// 删除任务；仍在运行的任务会被取消，输出文件一并删除
    pub async fn remove(&self, task_id: &str) -> Result<(), RegistryError> {
        let (_, entry) = self
            .inner
            .tasks
            .remove(task_id)
            .ok_or_else(|| RegistryError::NotFound(task_id.to_string()))?;

        entry.cancel.cancel();
        if let Some(path) = entry.publisher.latest().output_path {
            remove_if_exists(&path).await;
        }
        info!("🗑️ 已删除任务 {}", task_id);
        Ok(())
    }

    /// 回收结束超过保留时长的任务，并清理目录里无主的过期文件。返回回收的任务数
    pub async fn evict_expired(&self) -> usize {
        let retention = self.inner.config.retention;
        let now = Instant::now();

        let expired: Vec<String> = self
            .inner
            .tasks
            .iter()
            .filter(|item| {
                item.value()
                    .finished_at()
                    .is_some_and(|finished| now.duration_since(finished) >= retention)
            })
            .map(|item| item.key().clone())
            .collect();

        for task_id in &expired {
            if let Err(e) = self.remove(task_id).await {
                debug!("回收任务 {} 时出错: {}", task_id, e);
            }
        }

        let strays = self.sweep_stray_files().await;
        if !expired.is_empty() || strays > 0 {
            info!("🧹 回收了 {} 个过期任务，{} 个残留文件", expired.len(), strays);
        }
        expired.len()
    }

    async fn sweep_stray_files(&self) -> usize {
        let dir = &self.inner.config.download_dir;
        let retention = self.inner.config.retention;
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(_) => return 0,
        };

        let mut removed = 0;
        while let Ok(Some(item)) = entries.next_entry().await {
            let path = item.path();
            if self.owned_by_live_task(&path) {
                continue;
            }

            let expired = match item.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => SystemTime::now()
                    .duration_since(modified)
                    .is_ok_and(|age| age >= retention),
                Err(_) => false,
            };
            let managed = path
                .extension()
                .is_some_and(|ext| ext == "m4s" || ext == "mp4");

            if expired && managed {
                remove_if_exists(&path).await;
                removed += 1;
            }
        }
        removed
    }

    // 文件名以任务 ID 开头
    fn owned_by_live_task(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            return false;
        };
        self.inner
            .tasks
            .iter()
            .any(|item| name.starts_with(item.key().as_str()))
    }

    /// 定期执行回收，直到 shutdown
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let registry = self.clone();
        let interval = self.inner.config.sweep_interval;
        let shutdown = self.inner.shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        registry.evict_expired().await;
                    }
                }
            }
            debug!("清理任务已退出");
        })
    }

    /// 取消所有运行中的任务并停止清理
    pub fn shutdown(&self) {
        if !self.inner.shutdown.is_cancelled() {
            warn!("正在停止所有下载任务");
        }
        self.inner.shutdown.cancel();
    }

    pub fn len(&self) -> usize {
        self.inner.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.tasks.is_empty()
    }

    fn entry(&self, task_id: &str) -> Result<Arc<TaskEntry>, RegistryError> {
        self.inner
            .tasks
            .get(task_id)
            .map(|item| item.value().clone())
            .ok_or_else(|| RegistryError::NotFound(task_id.to_string()))
    }
}

async fn remove_if_exists(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("已删除文件: {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("删除文件失败 {:?}: {}", path, e),
    }
}
