//! 数据库下载管理器
//!
//! 负责 MMDB 文件的检测、下载、验证：
//! - 有效 = 文件存在 && 大小 >= 参考大小的 90% && 能作为 MMDB 打开
//! - 下载先写入同目录下的临时文件，验证通过后原子 rename 到目标路径
//! - 失败时删除临时文件，已有的有效文件保持不变

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use ureq::Agent;

use crate::config::{DatabaseEntry, DatabasesConfig};
use crate::errors::{GeoIpError, Result};
use crate::system::event::{DownloadProgress, DownloadStatus, EventBus, GeoEvent};
use crate::utils::retry::{RetryPolicy, with_retry};

/// 有效文件的最小大小比例
const MIN_SIZE_RATIO: f64 = 0.9;
/// 进度事件的最小间隔字节数
const PROGRESS_REPORT_BYTES: u64 = 256 * 1024;
const CHUNK_SIZE: usize = 64 * 1024;

/// 单个数据库文件的状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseStatus {
    pub name: String,
    pub exists: bool,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub is_valid: bool,
    pub expected_size: u64,
}

pub struct DatabaseDownloader {
    config: DatabasesConfig,
    data_dir: PathBuf,
    agent: Agent,
    progress: Arc<DashMap<String, DownloadProgress>>,
    active_downloads: AtomicUsize,
    events: Arc<EventBus>,
}

impl DatabaseDownloader {
    /// 创建下载器，数据目录不存在时自动创建
    pub fn new(config: DatabasesConfig, events: Arc<EventBus>) -> Result<Self> {
        let data_dir = PathBuf::from(&config.data_dir);
        std::fs::create_dir_all(&data_dir).map_err(|e| {
            GeoIpError::file_operation(format!(
                "failed to create data directory {}: {}",
                data_dir.display(),
                e
            ))
        })?;

        let agent: Agent = Agent::config_builder()
            .timeout_connect(Some(Duration::from_secs(config.connect_timeout_secs)))
            .timeout_global(Some(Duration::from_secs(config.download_timeout_secs)))
            .build()
            .into();

        Ok(Self {
            config,
            data_dir,
            agent,
            progress: Arc::new(DashMap::new()),
            active_downloads: AtomicUsize::new(0),
            events,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn entries(&self) -> &[DatabaseEntry] {
        &self.config.entries
    }

    fn entry(&self, name: &str) -> Result<&DatabaseEntry> {
        self.config
            .entry_named(name)
            .ok_or_else(|| GeoIpError::invalid_input(format!("unknown database: {}", name)))
    }

    /// 检查所有已配置数据库的状态
    pub async fn check_databases(&self) -> Result<Vec<DatabaseStatus>> {
        let targets: Vec<(DatabaseEntry, PathBuf)> = self
            .config
            .entries
            .iter()
            .map(|e| (e.clone(), self.config.path_of(e)))
            .collect();

        let statuses = tokio::task::spawn_blocking(move || {
            targets
                .iter()
                .map(|(entry, path)| inspect_file(entry, path))
                .collect::<Vec<_>>()
        })
        .await?;

        Ok(statuses)
    }

    /// 下载单个数据库文件
    ///
    /// 未知名称返回 `InvalidInput`；失败时不影响目标路径上已有的文件
    pub async fn download_database(&self, name: &str) -> Result<()> {
        let entry = self.entry(name)?.clone();

        let mut claim = DownloadProgress::new(&entry.name, None);
        claim.status = DownloadStatus::Downloading;

        // 持有 entry 锁完成检查与占位，同名下载只有一个能进入
        match self.progress.entry(entry.name.clone()) {
            Entry::Occupied(mut slot) => {
                if slot.get().status == DownloadStatus::Downloading {
                    return Err(GeoIpError::download_failed(format!(
                        "download of {} is already in progress",
                        name
                    )));
                }
                slot.insert(claim);
            }
            Entry::Vacant(slot) => {
                slot.insert(claim);
            }
        }
        self.events.publish(GeoEvent::DownloadStarted {
            name: entry.name.clone(),
        });
        info!("Downloading database {} from {}", entry.name, entry.url);

        self.active_downloads.fetch_add(1, Ordering::SeqCst);
        let result = self.download_with_retry(&entry).await;
        self.active_downloads.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(bytes) => {
                if let Some(mut progress) = self.progress.get_mut(&entry.name) {
                    progress.status = DownloadStatus::Completed;
                    progress.percentage = 100.0;
                    progress.downloaded = bytes;
                }
                self.events.publish(GeoEvent::DownloadCompleted {
                    name: entry.name.clone(),
                });
                info!("Database {} downloaded ({} bytes)", entry.name, bytes);
                Ok(())
            }
            Err(e) => {
                if let Some(mut progress) = self.progress.get_mut(&entry.name) {
                    progress.status = DownloadStatus::Failed;
                }
                self.events.publish(GeoEvent::DownloadFailed {
                    name: entry.name.clone(),
                    error: e.to_string(),
                });
                warn!("Database {} download failed: {}", entry.name, e);
                Err(GeoIpError::download_failed(format!(
                    "failed to download {}: {}",
                    entry.name,
                    e.message()
                )))
            }
        }
    }

    async fn download_with_retry(&self, entry: &DatabaseEntry) -> Result<u64> {
        let policy = RetryPolicy::new(
            self.config.download_retries,
            self.config.retry_base_delay_ms,
            self.config.retry_max_delay_ms,
        );
        let target = self.config.path_of(entry);
        let operation = format!("download {}", entry.name);

        with_retry(&operation, policy, GeoIpError::is_transient, || {
            let agent = self.agent.clone();
            let entry = entry.clone();
            let target = target.clone();
            let progress = Arc::clone(&self.progress);
            let events = Arc::clone(&self.events);
            async move {
                tokio::task::spawn_blocking(move || {
                    fetch_to_file(&agent, &entry, &target, |snapshot| {
                        progress.insert(snapshot.name.clone(), snapshot.clone());
                        events.publish(GeoEvent::DownloadProgress(snapshot));
                    })
                })
                .await?
            }
        })
        .await
    }

    /// 并发下载所有缺失或无效的数据库，完成后重新验证
    pub async fn download_missing_databases(&self) -> Result<()> {
        let statuses = self.check_databases().await?;
        let missing: Vec<String> = statuses
            .into_iter()
            .filter(|s| !s.is_valid)
            .map(|s| s.name)
            .collect();

        if missing.is_empty() {
            info!("All database files are present and valid");
            return Ok(());
        }

        info!("Downloading {} database file(s)", missing.len());

        let downloads = missing.iter().map(|name| self.download_database(name));
        for (name, result) in missing
            .iter()
            .zip(futures_util::future::join_all(downloads).await)
        {
            if let Err(e) = result {
                debug!("Download of {} ended with error: {}", name, e);
            }
        }

        let still_missing: Vec<String> = self
            .check_databases()
            .await?
            .into_iter()
            .filter(|s| !s.is_valid)
            .map(|s| s.name)
            .collect();

        if !still_missing.is_empty() {
            return Err(GeoIpError::download_failed(format!(
                "databases still unavailable after download: {}",
                still_missing.join(", ")
            )));
        }

        Ok(())
    }

    /// 所有文件的下载进度
    pub fn download_progress(&self) -> Vec<DownloadProgress> {
        let mut all: Vec<DownloadProgress> =
            self.progress.iter().map(|p| p.value().clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn file_progress(&self, name: &str) -> Option<DownloadProgress> {
        self.progress.get(name).map(|p| p.value().clone())
    }

    pub fn is_downloading(&self) -> bool {
        self.active_downloads.load(Ordering::SeqCst) > 0
    }

    pub fn clear_progress(&self) {
        self.progress.clear();
    }
}

/// 文件状态（阻塞）
fn inspect_file(entry: &DatabaseEntry, path: &Path) -> DatabaseStatus {
    let mut status = DatabaseStatus {
        name: entry.name.clone(),
        exists: false,
        size: 0,
        last_modified: None,
        is_valid: false,
        expected_size: entry.expected_size,
    };

    let Ok(metadata) = std::fs::metadata(path) else {
        return status;
    };

    status.exists = true;
    status.size = metadata.len();
    status.last_modified = metadata.modified().ok().map(DateTime::<Utc>::from);
    status.is_valid = validate_file(path, entry.expected_size).is_ok();
    status
}

/// 大小达到参考值的 90% 且能作为 MMDB 打开
pub fn validate_file(path: &Path, expected_size: u64) -> Result<()> {
    let size = std::fs::metadata(path)?.len();
    let min_size = (expected_size as f64 * MIN_SIZE_RATIO) as u64;
    if size < min_size {
        return Err(GeoIpError::download_failed(format!(
            "{} is too small: {} < {} bytes",
            path.display(),
            size,
            min_size
        )));
    }

    maxminddb::Reader::open_readfile(path).map_err(|e| {
        GeoIpError::download_failed(format!("{} is not a readable MMDB file: {}", path.display(), e))
    })?;

    Ok(())
}

fn temp_path_for(target: &Path) -> PathBuf {
    let file_name = target
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("database");
    target.with_file_name(format!(".{}.{}.part", file_name, std::process::id()))
}

/// 流式下载到临时文件，验证后 rename 到目标路径（阻塞）
fn fetch_to_file<F>(agent: &Agent, entry: &DatabaseEntry, target: &Path, mut on_progress: F) -> Result<u64>
where
    F: FnMut(DownloadProgress),
{
    let temp_path = temp_path_for(target);
    let result = stream_and_validate(agent, entry, &temp_path, &mut on_progress)
        .and_then(|bytes| {
            std::fs::rename(&temp_path, target)?;
            Ok(bytes)
        });

    if result.is_err() && temp_path.exists() {
        if let Err(e) = std::fs::remove_file(&temp_path) {
            warn!("Failed to remove partial download {}: {}", temp_path.display(), e);
        }
    }

    result
}

fn stream_and_validate<F>(
    agent: &Agent,
    entry: &DatabaseEntry,
    temp_path: &Path,
    on_progress: &mut F,
) -> Result<u64>
where
    F: FnMut(DownloadProgress),
{
    let response = agent.get(&entry.url).call().map_err(|e| match e {
        // 4xx 不重试
        ureq::Error::StatusCode(status) if (400..500).contains(&status) => {
            GeoIpError::download_failed(format!("HTTP {}", status))
        }
        other => GeoIpError::from(other),
    })?;

    let total = response
        .headers()
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let mut progress = DownloadProgress::new(&entry.name, total.or(Some(entry.expected_size)));
    let mut reader = response.into_body().into_reader();
    let mut file = std::fs::File::create(temp_path)?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut downloaded: u64 = 0;
    let mut last_reported: u64 = 0;
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| GeoIpError::http(format!("read error: {}", e)))?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])?;
        downloaded += n as u64;

        if downloaded - last_reported >= PROGRESS_REPORT_BYTES {
            last_reported = downloaded;
            progress.advance(downloaded);
            on_progress(progress.clone());
        }
    }

    file.flush()?;
    file.sync_all()?;
    drop(file);

    progress.advance(downloaded);
    on_progress(progress);

    if let Some(total) = total
        && downloaded != total
    {
        return Err(GeoIpError::http(format!(
            "incomplete body: {} of {} bytes",
            downloaded, total
        )));
    }

    validate_file(temp_path, entry.expected_size)?;
    Ok(downloaded)
}
