use std::path::PathBuf;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::DownloadError;
use super::fetcher::StreamKind;

lazy_static! {
    static ref UNSAFE_CHARS: Regex = Regex::new(r"[^\w\s\-]").unwrap();
}

const MAX_TITLE_CHARS: usize = 100;

const VIDEO_WEIGHT: f64 = 70.0;
const AUDIO_WEIGHT: f64 = 20.0;
const MERGING_PROGRESS: f64 = 95.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    DownloadingVideo,
    DownloadingAudio,
    Merging,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    /// 状态只能向前推进；任何未结束的状态都可以失败
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (Completed | Failed, _) => false,
            (_, Failed) => true,
            (Pending, DownloadingVideo) => true,
            (DownloadingVideo, DownloadingAudio) => true,
            (DownloadingAudio, Merging) => true,
            (Merging, Completed) => true,
            _ => false,
        }
    }
}

/// 对外展示的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Video,
    Audio,
    Merging,
    Done,
}

/// 某一时刻的任务状态
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub title: String,
    pub quality: u32,
    pub state: TaskState,
    pub phase: Phase,
    /// 综合进度 0-100
    pub progress: f64,
    pub video_progress: f64,
    pub audio_progress: f64,
    pub filename: Option<String>,
    pub error: Option<String>,
    #[serde(skip)]
    pub output_path: Option<PathBuf>,
}

impl TaskSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// 单个下载任务的记录，只由它自己的流水线修改
#[derive(Debug)]
pub struct DownloadTask {
    snapshot: TaskSnapshot,
}

impl DownloadTask {
    pub fn new(id: impl Into<String>, title: impl Into<String>, quality: u32) -> Self {
        Self {
            snapshot: TaskSnapshot {
                id: id.into(),
                title: title.into(),
                quality,
                state: TaskState::Pending,
                phase: Phase::Video,
                progress: 0.0,
                video_progress: 0.0,
                audio_progress: 0.0,
                filename: None,
                error: None,
                output_path: None,
            },
        }
    }

    pub fn snapshot(&self) -> &TaskSnapshot {
        &self.snapshot
    }

    pub fn state(&self) -> TaskState {
        self.snapshot.state
    }

    fn transition(&mut self, next: TaskState) -> Result<(), DownloadError> {
        let current = self.snapshot.state;
        if !current.can_transition_to(next) {
            return Err(DownloadError::InvalidTransition {
                from: current,
                to: next,
            });
        }

        debug!("任务 {} 状态: {:?} -> {:?}", self.snapshot.id, current, next);
        self.snapshot.state = next;
        // 失败时保留失败前的阶段
        self.snapshot.phase = match next {
            TaskState::Pending | TaskState::DownloadingVideo => Phase::Video,
            TaskState::DownloadingAudio => Phase::Audio,
            TaskState::Merging => Phase::Merging,
            TaskState::Completed => Phase::Done,
            TaskState::Failed => self.snapshot.phase,
        };
        Ok(())
    }

    pub fn start_downloading(&mut self) -> Result<(), DownloadError> {
        self.transition(TaskState::DownloadingVideo)
    }

    /// 更新某一路的进度（0.0-1.0）。
    /// 只有千分位变化或状态变化时返回 true，调用方据此决定是否推送事件。
    pub fn update_stream(&mut self, kind: StreamKind, fraction: f64) -> Result<bool, DownloadError> {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let slot = match kind {
            StreamKind::Video => &mut self.snapshot.video_progress,
            StreamKind::Audio => &mut self.snapshot.audio_progress,
        };
        let previous = *slot;
        if fraction <= previous {
            return Ok(false);
        }
        *slot = fraction;

        let mut changed = per_mille(fraction) > per_mille(previous);

        if kind == StreamKind::Video
            && fraction >= 1.0
            && self.snapshot.state == TaskState::DownloadingVideo
        {
            self.transition(TaskState::DownloadingAudio)?;
            changed = true;
        }

        let composite = VIDEO_WEIGHT * self.snapshot.video_progress
            + AUDIO_WEIGHT * self.snapshot.audio_progress;
        self.snapshot.progress = self.snapshot.progress.max(composite);

        Ok(changed)
    }

    pub fn start_merging(&mut self) -> Result<(), DownloadError> {
        if self.snapshot.video_progress < 1.0 || self.snapshot.audio_progress < 1.0 {
            return Err(DownloadError::InvalidTransition {
                from: self.snapshot.state,
                to: TaskState::Merging,
            });
        }
        self.transition(TaskState::Merging)?;
        self.snapshot.progress = self.snapshot.progress.max(MERGING_PROGRESS);
        Ok(())
    }

    pub fn complete(&mut self, output_path: PathBuf, filename: String) -> Result<(), DownloadError> {
        self.transition(TaskState::Completed)?;
        self.snapshot.progress = 100.0;
        self.snapshot.output_path = Some(output_path);
        self.snapshot.filename = Some(filename);
        Ok(())
    }

    /// 已结束的任务不再改变，返回 false
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.transition(TaskState::Failed).is_err() {
            return false;
        }
        self.snapshot.error = Some(message.into());
        true
    }
}

fn per_mille(fraction: f64) -> u32 {
    (fraction * 1000.0).floor() as u32
}

/// 由视频标题生成下载文件名：只保留文字、空白和连字符，最长 100 个字符
pub fn output_filename(title: &str, fallback: &str) -> String {
    let cleaned = UNSAFE_CHARS.replace_all(title, "");
    let cleaned: String = cleaned.trim().chars().take(MAX_TITLE_CHARS).collect();
    let stem = cleaned.trim();

    if stem.is_empty() {
        format!("{}.mp4", fallback)
    } else {
        format!("{}.mp4", stem)
    }
}
