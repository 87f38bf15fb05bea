//! Smart data scheduler
//!
//! Pushes a discovered file set to one peer: the first file immediately,
//! then one file per period until the list is exhausted. At most one timer
//! exists per process. Every timer carries a generation number and ticks
//! from an older generation are ignored, so a tick already queued when the
//! schedule is replaced can never emit.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::effect::Effect;
use super::hub::HubCommand;
use crate::error::{Error, Result};
use crate::protocol::{ServerMessage, SmartDataItem, SmartDataStart, SmartDataUpdate};
use crate::session::ChannelHandle;
use crate::storage::DirectoryAccess;

// ─────────────────────────────────────────────────────────────────
// Catalog
// ─────────────────────────────────────────────────────────────────

/// One file scheduled for emission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub filename: String,
    /// Path handed to [`DirectoryAccess`]
    pub path: String,
}

/// Files discovered under a source path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Catalog {
    /// Zero or one subdirectory: one file set, served for any resolution
    Single(Vec<CatalogEntry>),
    /// Several resolutions, each with the files of its first row
    ByResolution(BTreeMap<String, Vec<CatalogEntry>>),
}

impl Catalog {
    pub fn files_for(&self, resolution: &str) -> Option<&[CatalogEntry]> {
        match self {
            Catalog::Single(files) => Some(files),
            Catalog::ByResolution(map) => map.get(resolution).map(Vec::as_slice),
        }
    }
}

fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() || base.ends_with('/') {
        format!("{}{}", base, name)
    } else {
        format!("{}/{}", base, name)
    }
}

async fn entries(directory: &dyn DirectoryAccess, dir: &str) -> Result<Vec<CatalogEntry>> {
    Ok(directory
        .list_files(dir)
        .await?
        .into_iter()
        .map(|filename| CatalogEntry {
            path: join_path(dir, &filename),
            filename,
        })
        .collect())
}

/// Walk `source_path`: subdirectories are resolutions, their first
/// subdirectory (by name) is the row whose files get emitted.
pub async fn discover(directory: &dyn DirectoryAccess, source_path: &str) -> Result<Catalog> {
    let resolutions = directory.list_subdirectories(source_path).await?;

    match resolutions.as_slice() {
        [] => Ok(Catalog::Single(entries(directory, source_path).await?)),
        [only] => Ok(Catalog::Single(entries(directory, &join_path(source_path, only)).await?)),
        _ => {
            let mut map = BTreeMap::new();
            for resolution in &resolutions {
                let resolution_dir = join_path(source_path, resolution);
                let rows = directory.list_subdirectories(&resolution_dir).await?;
                let files_dir = match rows.first() {
                    Some(row) => join_path(&resolution_dir, row),
                    None => resolution_dir,
                };
                map.insert(resolution.clone(), entries(directory, &files_dir).await?);
            }
            Ok(Catalog::ByResolution(map))
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Scheduler
// ─────────────────────────────────────────────────────────────────

/// The active (or last) schedule
#[derive(Debug, Clone)]
pub struct SmartDataState {
    pub source_path: String,
    pub resolution: String,
    pub period: Duration,
    pub catalog: Catalog,
    pub file_list: Vec<CatalogEntry>,
    /// Index of the next file to emit
    pub cursor: usize,
    pub target: ChannelHandle,
    pub target_name: String,
}

pub struct SmartDataScheduler {
    state: Option<SmartDataState>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
    ticks: mpsc::Sender<HubCommand>,
    min_period_secs: u64,
    max_period_secs: u64,
}

impl SmartDataScheduler {
    pub fn new(ticks: mpsc::Sender<HubCommand>, min_period_secs: u64, max_period_secs: u64) -> Self {
        let min_period_secs = min_period_secs.max(1);
        Self {
            state: None,
            generation: 0,
            timer: None,
            ticks,
            min_period_secs,
            max_period_secs: max_period_secs.max(min_period_secs),
        }
    }

    pub fn state(&self) -> Option<&SmartDataState> {
        self.state.as_ref()
    }

    /// Discover `source_path` and start pushing to `target`
    pub async fn start(
        &mut self,
        directory: &dyn DirectoryAccess,
        target: &ChannelHandle,
        request: &SmartDataStart,
    ) -> Result<Vec<Effect>> {
        let period = self.check_period(request.period_seconds)?;
        let catalog = discover(directory, &request.source_path).await?;
        info!(
            peer = %request.name,
            source = %request.source_path,
            resolution = %request.resolution,
            period_secs = request.period_seconds,
            "Starting smart data sharing"
        );

        self.activate(
            directory,
            SmartDataState {
                source_path: request.source_path.clone(),
                resolution: request.resolution.clone(),
                period,
                catalog,
                file_list: Vec::new(),
                cursor: 0,
                target: target.clone(),
                target_name: request.name.clone(),
            },
        )
        .await
    }

    /// Restart from the first file with a new resolution and period
    pub async fn update(
        &mut self,
        directory: &dyn DirectoryAccess,
        target: &ChannelHandle,
        request: &SmartDataUpdate,
    ) -> Result<Vec<Effect>> {
        let period = self.check_period(request.period_seconds)?;
        let previous = self.state.as_ref().ok_or(Error::SmartDataInactive)?;
        info!(
            peer = %request.name,
            resolution = %request.resolution,
            period_secs = request.period_seconds,
            "Updating smart data sharing"
        );

        let next = SmartDataState {
            source_path: previous.source_path.clone(),
            resolution: request.resolution.clone(),
            period,
            catalog: previous.catalog.clone(),
            file_list: Vec::new(),
            cursor: 0,
            target: target.clone(),
            target_name: request.name.clone(),
        };
        self.activate(directory, next).await
    }

    /// Emit the next file if `generation` is current
    pub async fn on_tick(&mut self, directory: &dyn DirectoryAccess, generation: u64) -> Result<Vec<Effect>> {
        if generation != self.generation || self.timer.is_none() {
            debug!(generation, current = self.generation, "Ignoring stale smart data tick");
            return Ok(Vec::new());
        }
        self.emit_next(directory).await
    }

    /// Stop the timer; the state stays for a later `update`
    pub fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation += 1;
    }

    /// Stop if the target channel went away
    pub fn target_closed(&mut self, channel: &ChannelHandle) {
        let is_target = self.state.as_ref().is_some_and(|s| s.target == *channel);
        if is_target && self.timer.is_some() {
            info!(channel = %channel.id(), "Smart data target left, stopping timer");
            self.cancel();
        }
    }

    /// Target for events about the running schedule
    pub fn target(&self) -> Option<&ChannelHandle> {
        self.state.as_ref().map(|s| &s.target)
    }

    /// Step back over an item that could not be queued and keep a timer
    /// armed, so the next tick sends it again
    pub fn rewind(&mut self) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if state.cursor == 0 || state.target.is_closed() {
            return;
        }
        state.cursor -= 1;
        debug!(index = state.cursor, "Smart data item not queued, retrying on next tick");

        if self.timer.is_none() {
            self.timer = Some(spawn_ticker(self.ticks.clone(), self.generation, state.period));
        }
    }

    fn check_period(&self, period_seconds: u64) -> Result<Duration> {
        if !(self.min_period_secs..=self.max_period_secs).contains(&period_seconds) {
            return Err(Error::malformed_request(format!(
                "periodSeconds must be between {} and {}, got {}",
                self.min_period_secs, self.max_period_secs, period_seconds
            )));
        }
        Ok(Duration::from_secs(period_seconds))
    }

    async fn activate(&mut self, directory: &dyn DirectoryAccess, mut state: SmartDataState) -> Result<Vec<Effect>> {
        self.cancel();

        let resolution = state.resolution.clone();
        let source_path = state.source_path.clone();
        let files = state.catalog.files_for(&resolution).map(<[CatalogEntry]>::to_vec);

        // Catalog stays stored even when the resolution is missing
        state.file_list = files.clone().unwrap_or_default();
        let period = state.period;
        self.state = Some(state);

        let files = match files {
            Some(files) => files,
            None => {
                warn!(resolution = %resolution, source = %source_path, "Resolution not found");
                return Err(Error::ResolutionNotFound {
                    resolution,
                    source_path: source_path.into(),
                });
            }
        };

        if files.is_empty() {
            warn!(resolution = %resolution, source = %source_path, "No files to share");
            return Ok(Vec::new());
        }

        if files.len() > 1 {
            self.timer = Some(spawn_ticker(self.ticks.clone(), self.generation, period));
        }
        self.emit_next(directory).await
    }

    async fn emit_next(&mut self, directory: &dyn DirectoryAccess) -> Result<Vec<Effect>> {
        let Some(state) = self.state.as_mut() else {
            return Ok(Vec::new());
        };

        let Some(entry) = state.file_list.get(state.cursor).cloned() else {
            self.cancel();
            return Ok(Vec::new());
        };
        let index = state.cursor;
        state.cursor += 1;

        let exhausted = state.cursor >= state.file_list.len();
        let target = state.target.clone();
        let resolution = state.resolution.clone();
        if exhausted {
            debug!(emitted = state.cursor, "Smart data list exhausted");
            self.cancel();
        }

        let payload = directory.read_file(&entry.path).await?;
        debug!(index, filename = %entry.filename, bytes = payload.len(), "Emitting smart data");

        Ok(vec![Effect::send(
            &target,
            ServerMessage::SmartData(SmartDataItem {
                resolution,
                index,
                filename: entry.filename,
                payload,
            }),
        )])
    }
}

impl Drop for SmartDataScheduler {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

fn spawn_ticker(ticks: mpsc::Sender<HubCommand>, generation: u64, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if ticks.send(HubCommand::SchedulerTick { generation }).await.is_err() {
                break;
            }
        }
    })
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalDirectory;
    use tempfile::TempDir;

    fn write(dir: &TempDir, rel: &str, data: &[u8]) {
        let path = dir.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    fn flat_source(n: usize) -> TempDir {
        let dir = TempDir::new().unwrap();
        for i in 0..n {
            write(&dir, &format!("src/f{}.png", i), format!("img{}", i).as_bytes());
        }
        dir
    }

    fn start_request(resolution: &str, period_seconds: u64) -> SmartDataStart {
        SmartDataStart {
            name: "a".to_string(),
            source_path: "src".to_string(),
            resolution: resolution.to_string(),
            period_seconds,
        }
    }

    fn item(effects: &[Effect]) -> SmartDataItem {
        match effects {
            [Effect::Send { message: ServerMessage::SmartData(item), .. }] => item.clone(),
            other => panic!("expected one smart-data effect, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_discover_flat_directory() {
        let dir = flat_source(2);
        let local = LocalDirectory::new(dir.path());

        let catalog = discover(&local, "src").await.unwrap();
        let files = catalog.files_for("anything").unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "src/f0.png");
    }

    #[tokio::test]
    async fn test_discover_resolutions_use_first_row() {
        let dir = TempDir::new().unwrap();
        write(&dir, "src/r1/row_b/x.png", b"x");
        write(&dir, "src/r1/row_a/a1.png", b"a1");
        write(&dir, "src/r1/row_a/a2.png", b"a2");
        write(&dir, "src/r2/row_a/y.png", b"y");
        let local = LocalDirectory::new(dir.path());

        let catalog = discover(&local, "src").await.unwrap();
        let r1 = catalog.files_for("r1").unwrap();
        assert_eq!(
            r1.iter().map(|e| e.path.as_str()).collect::<Vec<_>>(),
            vec!["src/r1/row_a/a1.png", "src/r1/row_a/a2.png"]
        );
        assert_eq!(catalog.files_for("r2").unwrap().len(), 1);
        assert!(catalog.files_for("r9").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_emits_each_file_once_then_stops() {
        let dir = flat_source(3);
        let local = LocalDirectory::new(dir.path());
        let (tx, mut rx) = mpsc::channel(8);
        let (target, _out) = ChannelHandle::new(8);
        let mut scheduler = SmartDataScheduler::new(tx, 1, 3600);

        let first = item(&scheduler.start(&local, &target, &start_request("r1", 2)).await.unwrap());
        assert_eq!(first.index, 0);
        assert_eq!(first.payload, b"img0");

        let mut indexes = vec![first.index];
        for _ in 0..2 {
            let Some(HubCommand::SchedulerTick { generation }) = rx.recv().await else {
                panic!("expected a tick");
            };
            indexes.push(item(&scheduler.on_tick(&local, generation).await.unwrap()).index);
        }
        assert_eq!(indexes, vec![0, 1, 2]);
        assert!(scheduler.timer.is_none());

        // Timer was aborted: no further ticks arrive
        time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_restarts_without_duplicates() {
        let dir = flat_source(3);
        let local = LocalDirectory::new(dir.path());
        let (tx, mut rx) = mpsc::channel(8);
        let (target, _out) = ChannelHandle::new(8);
        let mut scheduler = SmartDataScheduler::new(tx, 1, 3600);

        scheduler.start(&local, &target, &start_request("r1", 1)).await.unwrap();
        let Some(HubCommand::SchedulerTick { generation: old }) = rx.recv().await else {
            panic!("expected a tick");
        };

        let update = SmartDataUpdate {
            name: "a".to_string(),
            resolution: "r1".to_string(),
            period_seconds: 5,
        };
        let restarted = item(&scheduler.update(&local, &target, &update).await.unwrap());
        assert_eq!(restarted.index, 0);

        // A tick queued before the update is discarded
        assert!(scheduler.on_tick(&local, old).await.unwrap().is_empty());

        let Some(HubCommand::SchedulerTick { generation }) = rx.recv().await else {
            panic!("expected a tick");
        };
        assert_ne!(generation, old);
        assert_eq!(item(&scheduler.on_tick(&local, generation).await.unwrap()).index, 1);
    }

    #[tokio::test]
    async fn test_missing_resolution_reports_and_keeps_catalog() {
        let dir = TempDir::new().unwrap();
        write(&dir, "src/r1/row/a.png", b"a");
        write(&dir, "src/r2/row/b.png", b"b");
        let local = LocalDirectory::new(dir.path());
        let (tx, _rx) = mpsc::channel(8);
        let (target, _out) = ChannelHandle::new(8);
        let mut scheduler = SmartDataScheduler::new(tx, 1, 3600);

        let err = scheduler.start(&local, &target, &start_request("r9", 1)).await.unwrap_err();
        assert!(matches!(err, Error::ResolutionNotFound { .. }));
        assert!(scheduler.timer.is_none());

        let update = SmartDataUpdate {
            name: "a".to_string(),
            resolution: "r2".to_string(),
            period_seconds: 1,
        };
        let emitted = item(&scheduler.update(&local, &target, &update).await.unwrap());
        assert_eq!(emitted.filename, "b.png");
    }

    #[tokio::test]
    async fn test_update_before_start_is_inactive() {
        let dir = flat_source(1);
        let local = LocalDirectory::new(dir.path());
        let (tx, _rx) = mpsc::channel(8);
        let (target, _out) = ChannelHandle::new(8);
        let mut scheduler = SmartDataScheduler::new(tx, 1, 3600);

        let update = SmartDataUpdate {
            name: "a".to_string(),
            resolution: "r1".to_string(),
            period_seconds: 1,
        };
        let err = scheduler.update(&local, &target, &update).await.unwrap_err();
        assert!(matches!(err, Error::SmartDataInactive));
    }

    #[tokio::test]
    async fn test_zero_period_rejected() {
        let dir = flat_source(1);
        let local = LocalDirectory::new(dir.path());
        let (tx, _rx) = mpsc::channel(8);
        let (target, _out) = ChannelHandle::new(8);
        let mut scheduler = SmartDataScheduler::new(tx, 1, 3600);

        let err = scheduler.start(&local, &target, &start_request("r1", 0)).await.unwrap_err();
        assert!(matches!(err, Error::MalformedRequest { .. }));
        assert!(scheduler.state().is_none());
    }

    #[tokio::test]
    async fn test_period_above_maximum_rejected() {
        let dir = flat_source(2);
        let local = LocalDirectory::new(dir.path());
        let (tx, _rx) = mpsc::channel(8);
        let (target, _out) = ChannelHandle::new(8);
        let mut scheduler = SmartDataScheduler::new(tx, 1, 3600);

        for period in [3601, u64::MAX] {
            let err = scheduler
                .start(&local, &target, &start_request("r1", period))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::MalformedRequest { .. }));
        }
        assert!(scheduler.state().is_none());
        assert!(scheduler.timer.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rewind_resends_last_item() {
        let dir = flat_source(2);
        let local = LocalDirectory::new(dir.path());
        let (tx, mut rx) = mpsc::channel(8);
        let (target, _out) = ChannelHandle::new(8);
        let mut scheduler = SmartDataScheduler::new(tx, 1, 3600);

        scheduler.start(&local, &target, &start_request("r1", 1)).await.unwrap();
        let Some(HubCommand::SchedulerTick { generation }) = rx.recv().await else {
            panic!("expected a tick");
        };
        assert_eq!(item(&scheduler.on_tick(&local, generation).await.unwrap()).index, 1);
        assert!(scheduler.timer.is_none());

        // Last item lost: a timer is re-armed and the same index goes out again
        scheduler.rewind();
        let Some(HubCommand::SchedulerTick { generation }) = rx.recv().await else {
            panic!("expected a tick");
        };
        assert_eq!(item(&scheduler.on_tick(&local, generation).await.unwrap()).index, 1);
        assert!(scheduler.timer.is_none());
    }

    #[tokio::test]
    async fn test_single_file_needs_no_timer() {
        let dir = flat_source(1);
        let local = LocalDirectory::new(dir.path());
        let (tx, _rx) = mpsc::channel(8);
        let (target, _out) = ChannelHandle::new(8);
        let mut scheduler = SmartDataScheduler::new(tx, 1, 3600);

        let emitted = item(&scheduler.start(&local, &target, &start_request("r1", 1)).await.unwrap());
        assert_eq!(emitted.index, 0);
        assert!(scheduler.timer.is_none());
    }
}
