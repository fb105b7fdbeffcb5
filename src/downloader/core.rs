use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::TryFutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::DownloadError;
use super::fetcher::{FetchProgress, StreamFetcher, StreamKind, StreamTarget};
use super::merger::MergeTool;
use super::progress::ProgressPublisher;
use super::task::{DownloadTask, TaskSnapshot};

/// 一个任务落盘需要的全部路径
#[derive(Debug, Clone)]
pub struct TaskPlan {
    pub video: StreamTarget,
    pub audio: StreamTarget,
    pub output_path: PathBuf,
    /// 给用户看的文件名
    pub filename: String,
}

impl TaskPlan {
    fn temporaries(&self) -> [&std::path::Path; 2] {
        [self.video.destination(), self.audio.destination()]
    }
}

// 任务记录加上它的广播，流水线内只有这里会修改记录
struct TaskTracker {
    task: Mutex<DownloadTask>,
    publisher: ProgressPublisher,
}

impl TaskTracker {
    fn apply<F>(&self, change: F) -> Result<(), DownloadError>
    where
        F: FnOnce(&mut DownloadTask) -> Result<(), DownloadError>,
    {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        change(&mut task)?;
        self.publisher.publish(task.snapshot().clone());
        Ok(())
    }

    fn report(&self, kind: StreamKind, progress: FetchProgress) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        match task.update_stream(kind, progress.fraction) {
            Ok(true) => self.publisher.publish(task.snapshot().clone()),
            Ok(false) => {}
            Err(e) => warn!("更新{}进度失败: {}", kind, e),
        }
    }

    fn fail(&self, message: String) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.fail(message) {
            self.publisher.publish(task.snapshot().clone());
        }
    }

    fn snapshot(&self) -> TaskSnapshot {
        self.task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .snapshot()
            .clone()
    }
}

/// 下载流水线：并行下载音视频两路流，成功后合并
#[derive(Clone)]
pub struct DownloadCore {
    fetcher: StreamFetcher,
    merger: Arc<dyn MergeTool>,
    merge_timeout: Duration,
}

impl DownloadCore {
    pub fn new(fetcher: StreamFetcher, merger: Arc<dyn MergeTool>, merge_timeout: Duration) -> Self {
        Self {
            fetcher,
            merger,
            merge_timeout,
        }
    }

    pub fn merger(&self) -> &Arc<dyn MergeTool> {
        &self.merger
    }

    /// 运行整个任务直到结束，返回最终状态。
    /// 无论成功与否，临时文件都会被删除；失败时不会留下输出文件。
    pub async fn run(
        &self,
        task: DownloadTask,
        plan: TaskPlan,
        publisher: ProgressPublisher,
        cancel: CancellationToken,
    ) -> TaskSnapshot {
        let task_id = task.snapshot().id.clone();
        let tracker = TaskTracker {
            task: Mutex::new(task),
            publisher,
        };

        let result = tokio::select! {
            result = self.execute(&tracker, &plan) => result,
            _ = cancel.cancelled() => Err(DownloadError::Cancelled),
        };

        // 先清理再发布终态，订阅者看到终态时磁盘上只剩输出文件
        remove_files(&plan.temporaries()).await;

        let result = result.and_then(|()| {
            tracker.apply(|task| task.complete(plan.output_path.clone(), plan.filename.clone()))
        });

        match result {
            Ok(()) => info!("✅ 任务 {} 完成: {}", task_id, plan.filename),
            Err(e) => {
                error!("❌ 任务 {} 失败: {}", task_id, e);
                remove_files(&[plan.output_path.as_path()]).await;
                tracker.fail(e.to_string());
            }
        }

        tracker.snapshot()
    }

    async fn execute(&self, tracker: &TaskTracker, plan: &TaskPlan) -> Result<(), DownloadError> {
        for path in [plan.video.destination(), plan.audio.destination(), plan.output_path.as_path()] {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        tracker.apply(|task| task.start_downloading())?;

        let video = self
            .fetcher
            .fetch(&plan.video, |progress| tracker.report(StreamKind::Video, progress))
            .map_err(|source| DownloadError::Fetch {
                kind: StreamKind::Video,
                source,
            });
        let audio = self
            .fetcher
            .fetch(&plan.audio, |progress| tracker.report(StreamKind::Audio, progress))
            .map_err(|source| DownloadError::Fetch {
                kind: StreamKind::Audio,
                source,
            });

        // 任一路失败时另一路随之被丢弃，连接和文件句柄一并释放
        let (video_bytes, audio_bytes) = tokio::try_join!(video, audio)?;
        debug!("两路流下载完成: 视频 {} 字节，音频 {} 字节", video_bytes, audio_bytes);

        tracker.apply(|task| task.start_merging())?;

        self.merger
            .merge(
                plan.video.destination(),
                plan.audio.destination(),
                &plan.output_path,
                self.merge_timeout,
            )
            .await?;

        Ok(())
    }
}

async fn remove_files(paths: &[&std::path::Path]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!("已删除: {:?}", path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("删除文件失败 {:?}: {}", path, e),
        }
    }
}
