use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// 单个数据库文件的下载状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
}

/// 下载进度快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub name: String,
    pub downloaded: u64,
    /// 服务端未返回 Content-Length 时为 None
    pub total: Option<u64>,
    /// 0-100，total 未知时为 0
    pub percentage: f64,
    pub status: DownloadStatus,
}

impl DownloadProgress {
    pub fn new(name: impl Into<String>, total: Option<u64>) -> Self {
        Self {
            name: name.into(),
            downloaded: 0,
            total,
            percentage: 0.0,
            status: DownloadStatus::Pending,
        }
    }

    pub fn advance(&mut self, downloaded: u64) {
        self.downloaded = downloaded;
        self.status = DownloadStatus::Downloading;
        self.percentage = match self.total {
            Some(total) if total > 0 => (downloaded as f64 / total as f64 * 100.0).min(100.0),
            _ => 0.0,
        };
    }
}

/// 数据库生命周期、启动检查与缓存维护事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GeoEvent {
    /// 开始检查本地数据库
    CheckingStarted,
    /// 检查完成，附带有效数据库数量
    CheckingCompleted { databases: usize },
    DownloadStarted { name: String },
    DownloadProgress(DownloadProgress),
    DownloadCompleted { name: String },
    DownloadFailed { name: String, error: String },
    /// 读取器已初始化，可以处理查询
    Ready,
    StartupFailed { error: String },
    /// 缓存清理完成
    CacheCleanup { removed: usize },
}

/// 带时间戳的事件（历史记录用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimedEvent {
    pub at: DateTime<Utc>,
    pub event: GeoEvent,
}

/// 事件总线，负责事件的发布和订阅
///
/// 发布是同步的，没有订阅者时事件只进入历史记录。
/// 慢订阅者会收到 `RecvError::Lagged`，不会拖慢发布方。
pub struct EventBus {
    sender: broadcast::Sender<GeoEvent>,
    history: Mutex<VecDeque<TimedEvent>>,
    max_history: usize,
}

impl EventBus {
    /// 创建新的事件总线
    pub fn new(max_history: usize) -> Self {
        let (sender, _) = broadcast::channel(1000);

        Self {
            sender,
            history: Mutex::new(VecDeque::with_capacity(max_history.min(1024))),
            max_history,
        }
    }

    /// 发布事件
    pub fn publish(&self, event: GeoEvent) {
        {
            let mut history = self.history.lock();
            history.push_back(TimedEvent {
                at: Utc::now(),
                event: event.clone(),
            });
            while history.len() > self.max_history {
                history.pop_front();
            }
        }

        // 没有订阅者时 send 返回 Err，属于正常情况
        if self.sender.send(event).is_err() {
            trace!("Event published with no active subscribers");
        }
    }

    /// 订阅事件流
    pub fn subscribe(&self) -> broadcast::Receiver<GeoEvent> {
        self.sender.subscribe()
    }

    /// 获取事件历史
    pub fn history(&self) -> Vec<TimedEvent> {
        self.history.lock().iter().cloned().collect()
    }

    /// 清空事件历史
    pub fn clear_history(&self) {
        self.history.lock().clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}
