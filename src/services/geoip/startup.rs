//! 启动检查：检查数据库 → 下载缺失文件 → 打开读取器
//!
//! 这是一次性的启动屏障，完成前查询不应进入本地流水线。

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::downloader::{DatabaseDownloader, DatabaseStatus};
use super::reader::GeoIpReader;
use super::service::GeoIpService;
use crate::config::StaticConfig;
use crate::errors::Result;
use crate::system::event::{DownloadProgress, EventBus, GeoEvent};

/// 启动检查状态快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartupStatus {
    pub is_checking: bool,
    pub is_downloading: bool,
    pub databases: Vec<DatabaseStatus>,
    pub error: Option<String>,
    pub is_ready: bool,
}

pub struct StartupCheck {
    downloader: Arc<DatabaseDownloader>,
    reader: Arc<GeoIpReader>,
    events: Arc<EventBus>,
    status: RwLock<StartupStatus>,
    /// 串行化 run()，值为是否已成功完成
    completed: Mutex<bool>,
}

impl StartupCheck {
    pub fn new(
        downloader: Arc<DatabaseDownloader>,
        reader: Arc<GeoIpReader>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            downloader,
            reader,
            events,
            status: RwLock::new(StartupStatus::default()),
            completed: Mutex::new(false),
        }
    }

    pub fn status(&self) -> StartupStatus {
        self.status.read().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.status.read().is_ready
    }

    pub fn download_progress(&self) -> Vec<DownloadProgress> {
        self.downloader.download_progress()
    }

    /// 执行启动检查，成功后再次调用直接返回
    pub async fn run(&self) -> Result<()> {
        let mut completed = self.completed.lock().await;
        if *completed {
            return Ok(());
        }

        match self.perform().await {
            Ok(()) => {
                *completed = true;
                Ok(())
            }
            Err(e) => {
                error!("Startup check failed: {}", e);
                {
                    let mut status = self.status.write();
                    status.is_checking = false;
                    status.is_downloading = false;
                    status.is_ready = false;
                    status.error = Some(e.to_string());
                }
                self.events.publish(GeoEvent::StartupFailed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn perform(&self) -> Result<()> {
        {
            let mut status = self.status.write();
            status.is_checking = true;
            status.error = None;
        }
        self.events.publish(GeoEvent::CheckingStarted);

        let databases = self.downloader.check_databases().await?;
        let valid = databases.iter().filter(|d| d.is_valid).count();
        let needs_download = valid < databases.len();
        {
            let mut status = self.status.write();
            status.is_checking = false;
            status.is_downloading = needs_download;
            status.databases = databases;
        }
        self.events
            .publish(GeoEvent::CheckingCompleted { databases: valid });

        if needs_download {
            self.downloader.download_missing_databases().await?;
            let databases = self.downloader.check_databases().await?;
            let mut status = self.status.write();
            status.is_downloading = false;
            status.databases = databases;
        }

        self.reader.initialize().await?;

        self.status.write().is_ready = true;
        self.events.publish(GeoEvent::Ready);
        info!("Startup check completed, GeoIP databases ready");
        Ok(())
    }

    /// 清空状态，允许再次执行
    pub async fn reset(&self) {
        *self.completed.lock().await = false;
        *self.status.write() = StartupStatus::default();
        self.downloader.clear_progress();
    }
}

/// 进程内的完整组装：事件总线、下载器、启动检查与查询服务共享同一个读取器
pub struct GeoIpEngine {
    pub events: Arc<EventBus>,
    pub downloader: Arc<DatabaseDownloader>,
    pub startup: StartupCheck,
    pub service: Arc<GeoIpService>,
}

impl GeoIpEngine {
    pub fn from_config(config: &StaticConfig) -> Result<Self> {
        let events = Arc::new(EventBus::default());
        let downloader = Arc::new(DatabaseDownloader::new(
            config.databases.clone(),
            Arc::clone(&events),
        )?);
        let service = Arc::new(GeoIpService::from_config(config));
        let startup = StartupCheck::new(
            Arc::clone(&downloader),
            Arc::clone(service.reader()),
            Arc::clone(&events),
        );

        Ok(Self {
            events,
            downloader,
            startup,
            service,
        })
    }

    /// 执行启动检查
    pub async fn start(&self) -> Result<()> {
        self.startup.run().await
    }

    /// 启动缓存周期清理任务
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        Arc::clone(self.service.cache()).spawn_cleanup_task(Some(Arc::clone(&self.events)))
    }
}
