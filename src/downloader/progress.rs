use std::sync::{Arc, Mutex};

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use super::task::{Phase, TaskSnapshot, TaskState};

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalStatus {
    Completed,
    Error,
}

/// 推送给订阅者的进度事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub task_id: String,
    pub state: TaskState,
    pub phase: Phase,
    pub progress: f64,
    pub video_progress: f64,
    pub audio_progress: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status: Option<TerminalStatus>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl From<&TaskSnapshot> for ProgressEvent {
    fn from(snapshot: &TaskSnapshot) -> Self {
        let status = match snapshot.state {
            TaskState::Completed => Some(TerminalStatus::Completed),
            TaskState::Failed => Some(TerminalStatus::Error),
            _ => None,
        };

        Self {
            task_id: snapshot.id.clone(),
            state: snapshot.state,
            phase: snapshot.phase,
            progress: round_tenth(snapshot.progress),
            video_progress: round_tenth(snapshot.video_progress * 100.0),
            audio_progress: round_tenth(snapshot.audio_progress * 100.0),
            status,
            filename: snapshot.filename.clone(),
            error: snapshot.error.clone(),
        }
    }
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        self.status.is_some()
    }

    /// 编码为一帧 SSE
    pub fn to_sse_frame(&self) -> Result<String, serde_json::Error> {
        Ok(format!("event: progress\ndata: {}\n\n", serde_json::to_string(self)?))
    }
}

/// 订阅不存在的任务时返回的 SSE 帧
pub fn not_found_frame() -> String {
    "event: error\ndata: {\"error\":\"Task not found\"}\n\n".to_string()
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// 单个任务的进度广播：保存最新状态，订阅时先补发一次
#[derive(Debug, Clone)]
pub struct ProgressPublisher {
    latest: Arc<Mutex<TaskSnapshot>>,
    sender: broadcast::Sender<TaskSnapshot>,
}

impl ProgressPublisher {
    pub fn new(initial: TaskSnapshot) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            latest: Arc::new(Mutex::new(initial)),
            sender,
        }
    }

    pub fn publish(&self, snapshot: TaskSnapshot) {
        let mut latest = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        *latest = snapshot.clone();
        // 在锁内发送，保证订阅时拿到的最新状态和后续事件之间不丢也不重
        let _ = self.sender.send(snapshot);
    }

    pub fn latest(&self) -> TaskSnapshot {
        self.latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn subscribe(&self) -> ProgressSubscription {
        let latest = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        ProgressSubscription {
            pending: Some(latest.clone()),
            receiver: self.sender.subscribe(),
            finished: false,
        }
    }
}

/// 一个订阅：先给出订阅时的最新状态，之后按顺序给出新事件，终态后结束。
///
/// 消费太慢、落后超过通道容量时，中间的进度事件会被跳过，直接从较新的快照继续。
/// 每个事件都是完整快照，终态事件总是最后发送，所以不会错过最终结果。
#[derive(Debug)]
pub struct ProgressSubscription {
    pending: Option<TaskSnapshot>,
    receiver: broadcast::Receiver<TaskSnapshot>,
    finished: bool,
}

impl ProgressSubscription {
    pub async fn next(&mut self) -> Option<TaskSnapshot> {
        if self.finished {
            return None;
        }

        let snapshot = match self.pending.take() {
            Some(snapshot) => snapshot,
            None => loop {
                match self.receiver.recv().await {
                    Ok(snapshot) => break snapshot,
                    Err(RecvError::Lagged(skipped)) => {
                        // 跟不上时跳过中间的进度，直接看更新的事件
                        debug!("订阅者落后，跳过 {} 条进度事件", skipped);
                    }
                    Err(RecvError::Closed) => {
                        self.finished = true;
                        return None;
                    }
                }
            },
        };

        if snapshot.is_terminal() {
            self.finished = true;
        }
        Some(snapshot)
    }

    pub fn into_stream(self) -> impl Stream<Item = TaskSnapshot> + Send {
        futures::stream::unfold(self, |mut subscription| async move {
            subscription
                .next()
                .await
                .map(|snapshot| (snapshot, subscription))
        })
    }

    pub fn into_events(self) -> impl Stream<Item = ProgressEvent> + Send {
        futures::stream::unfold(self, |mut subscription| async move {
            subscription
                .next()
                .await
                .map(|snapshot| (ProgressEvent::from(&snapshot), subscription))
        })
    }

    /// SSE 帧流，供 HTTP 层直接写出
    pub fn into_sse(self) -> impl Stream<Item = String> + Send {
        futures::stream::unfold(self, |mut subscription| async move {
            let snapshot = subscription.next().await?;
            let frame = ProgressEvent::from(&snapshot)
                .to_sse_frame()
                .unwrap_or_else(|_| not_found_frame());
            Some((frame, subscription))
        })
    }
}
