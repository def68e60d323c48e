//! Mirrors batch folders between the local batches folder and a blob container. Blob names are
//! slash separated paths, e.g., `batch-001/labels/img1.txt`.
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        mpsc::{self, Receiver, Sender, TryRecvError},
    },
    thread,
};

use vision_trainer_domain::{VtResult, to_vt, vterr};
use walkdir::WalkDir;

use crate::file_util;

#[cfg(feature = "azure_blob")]
mod azure_blob;
mod local;

#[cfg(feature = "azure_blob")]
pub use azure_blob::AzureBlobStore;
pub use local::LocalBlobStore;

pub trait BlobStore: Send + Sync {
    /// Names of the folders directly below `prefix` without trailing slash
    fn list_folders(&self, prefix: &str) -> VtResult<Vec<String>>;
    /// Names of all blobs below `prefix`, sub-folders included
    fn list_blobs(&self, prefix: &str) -> VtResult<Vec<String>>;
    fn download_blob(&self, name: &str) -> VtResult<Vec<u8>>;
    fn upload_blob(&self, name: &str, content: Vec<u8>) -> VtResult<()>;
}

/// `""` for the root, otherwise the prefix with exactly one trailing slash
pub fn folder_prefix(prefix: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        String::new()
    } else {
        format!("{prefix}/")
    }
}

/// Downloads every blob below `remote_folder` into `local_folder` and returns the number of files.
/// Each file is written next to its target first and moved into place once complete.
pub fn download_folder(
    store: &dyn BlobStore,
    remote_folder: &str,
    local_folder: &Path,
) -> VtResult<usize> {
    let prefix = folder_prefix(remote_folder);
    let names = store.list_blobs(&prefix)?;
    tracing::info!("downloading {} blobs from {prefix} to {local_folder:?}", names.len());
    let mut n_downloaded = 0;
    for name in &names {
        let Some(relative) = name.strip_prefix(&prefix) else {
            tracing::warn!("skipping {name} that is not below {prefix}");
            continue;
        };
        if relative.is_empty() || relative.ends_with('/') {
            continue;
        }
        if !is_inside(relative) {
            tracing::warn!("skipping {name} that would end up outside of {local_folder:?}");
            continue;
        }
        let dst = relative
            .split('/')
            .fold(local_folder.to_path_buf(), |p, part| p.join(part));
        let content = store.download_blob(name)?;
        if let Some(parent) = dst.parent() {
            file_util::create_dir_all(parent)?;
        }
        file_util::write_atomic(&dst, content)?;
        tracing::debug!("downloaded {name} to {dst:?}");
        n_downloaded += 1;
    }
    Ok(n_downloaded)
}

/// Whether the slash separated `relative` stays below the folder it is joined to
fn is_inside(relative: &str) -> bool {
    relative.split('/').all(|part| {
        !part.is_empty() && part != "." && part != ".." && !part.contains(['\\', ':'])
    })
}

fn is_hidden(p: &Path) -> bool {
    p.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

/// Uploads every file below `local_folder`, sub-folders included, and returns the number of files.
/// Hidden files are skipped.
pub fn upload_folder(
    store: &dyn BlobStore,
    local_folder: &Path,
    remote_folder: &str,
) -> VtResult<usize> {
    if !local_folder.is_dir() {
        return Err(vterr!("{local_folder:?} is not a folder"));
    }
    let prefix = folder_prefix(remote_folder);
    let mut n_uploaded = 0;
    for entry in WalkDir::new(local_folder) {
        let entry = entry.map_err(to_vt)?;
        let path = entry.path();
        if !path.is_file() || is_hidden(path) {
            continue;
        }
        let name = format!(
            "{prefix}{}",
            file_util::relative_slash_path(path, local_folder)?
        );
        let content =
            fs::read(path).map_err(|e| vterr!("could not read {path:?} due to {e:?}"))?;
        store.upload_blob(&name, content)?;
        tracing::debug!("uploaded {path:?} to {name}");
        n_uploaded += 1;
    }
    tracing::info!("uploaded {n_uploaded} files from {local_folder:?} to {prefix}");
    Ok(n_uploaded)
}

/// Local batch folders that currently take part in a transfer
#[derive(Clone, Debug, Default)]
pub struct TransferRegistry {
    active: Arc<Mutex<HashSet<PathBuf>>>,
}

/// Marks a batch folder as busy until it is dropped
#[derive(Debug)]
pub struct TransferGuard {
    active: Arc<Mutex<HashSet<PathBuf>>>,
    folder: PathBuf,
}

impl Drop for TransferGuard {
    fn drop(&mut self) {
        match self.active.lock() {
            Ok(mut active) => {
                active.remove(&self.folder);
            }
            Err(e) => tracing::error!("could not release {:?} due to {e:?}", self.folder),
        }
    }
}

/// A batch and its `labels` sub-folder must not be transferred at the same time
fn overlap(folder1: &Path, folder2: &Path) -> bool {
    folder1.starts_with(folder2) || folder2.starts_with(folder1)
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }
    /// Fails if there is already a transfer in flight of `folder`, of a folder inside `folder`,
    /// or of a folder containing `folder`.
    pub fn acquire(&self, folder: &Path) -> VtResult<TransferGuard> {
        let mut active = self.active.lock().map_err(to_vt)?;
        if let Some(busy) = active.iter().find(|busy| overlap(busy, folder)) {
            return Err(vterr!(
                "cannot transfer {folder:?}, there is already a transfer of {busy:?} in progress"
            ));
        }
        active.insert(folder.to_path_buf());
        Ok(TransferGuard {
            active: self.active.clone(),
            folder: folder.to_path_buf(),
        })
    }
    pub fn is_busy(&self, folder: &Path) -> bool {
        self.active
            .lock()
            .map(|active| active.iter().any(|busy| overlap(busy, folder)))
            .unwrap_or(false)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Download,
    Upload,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferJob {
    pub direction: Direction,
    pub remote_folder: String,
    pub local_folder: PathBuf,
}

impl TransferJob {
    pub fn download(remote_folder: &str, local_folder: PathBuf) -> Self {
        Self {
            direction: Direction::Download,
            remote_folder: remote_folder.into(),
            local_folder,
        }
    }
    pub fn upload(local_folder: PathBuf, remote_folder: &str) -> Self {
        Self {
            direction: Direction::Upload,
            remote_folder: remote_folder.into(),
            local_folder,
        }
    }
    pub fn run(&self, store: &dyn BlobStore) -> VtResult<usize> {
        match self.direction {
            Direction::Download => download_folder(store, &self.remote_folder, &self.local_folder),
            Direction::Upload => upload_folder(store, &self.local_folder, &self.remote_folder),
        }
    }
}

/// Outcome of a transfer, `result` holds the number of transferred files
#[derive(Debug)]
pub struct TransferReport {
    pub job: TransferJob,
    pub result: VtResult<usize>,
}

/// Runs transfers on separate threads and hands the reports back to the interaction thread.
pub struct TransferWorker {
    store: Arc<dyn BlobStore>,
    registry: TransferRegistry,
    tx: Sender<TransferReport>,
    rx: Receiver<TransferReport>,
    n_in_flight: usize,
}

impl TransferWorker {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            store,
            registry: TransferRegistry::new(),
            tx,
            rx,
            n_in_flight: 0,
        }
    }
    pub fn registry(&self) -> &TransferRegistry {
        &self.registry
    }
    pub fn n_in_flight(&self) -> usize {
        self.n_in_flight
    }
    /// Starts the job unless its local folder is already being transferred.
    pub fn start(&mut self, job: TransferJob) -> VtResult<()> {
        let guard = self.registry.acquire(&job.local_folder)?;
        let store = self.store.clone();
        let tx = self.tx.clone();
        tracing::info!("starting {job:?}");
        thread::spawn(move || {
            let result = job.run(store.as_ref());
            drop(guard);
            if let Err(e) = tx.send(TransferReport { job, result }) {
                tracing::error!("could not report transfer result due to {e:?}");
            }
        });
        self.n_in_flight += 1;
        Ok(())
    }
    fn received(&mut self, report: TransferReport) -> TransferReport {
        self.n_in_flight = self.n_in_flight.saturating_sub(1);
        match &report.result {
            Ok(n) => tracing::info!("finished {:?} with {n} files", report.job),
            Err(e) => tracing::error!("{:?} failed, {}", report.job, e.msg()),
        }
        report
    }
    pub fn poll(&mut self) -> Option<TransferReport> {
        match self.rx.try_recv() {
            Ok(report) => Some(self.received(report)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                tracing::error!("transfer channel disconnected");
                None
            }
        }
    }
    /// Blocks until the next transfer finishes, `None` if nothing is in flight
    pub fn wait(&mut self) -> Option<TransferReport> {
        if self.n_in_flight == 0 {
            return None;
        }
        match self.rx.recv() {
            Ok(report) => Some(self.received(report)),
            Err(e) => {
                tracing::error!("transfer channel disconnected, {e:?}");
                None
            }
        }
    }
}

#[test]
fn test_folder_prefix() {
    assert_eq!(folder_prefix(""), "");
    assert_eq!(folder_prefix("/"), "");
    assert_eq!(folder_prefix("batch-001"), "batch-001/");
    assert_eq!(folder_prefix("/batch-001//"), "batch-001/");
}

#[test]
fn test_is_inside() {
    assert!(is_inside("labels/a.txt"));
    assert!(is_inside("a..b.jpg"));
    assert!(!is_inside("../escaped.txt"));
    assert!(!is_inside("labels/../../escaped.txt"));
    assert!(!is_inside("/etc/passwd"));
    assert!(!is_inside("labels//a.txt"));
    assert!(!is_inside("..\\escaped.txt"));
    assert!(!is_inside("C:/escaped.txt"));
}

#[test]
fn test_registry() {
    let registry = TransferRegistry::new();
    let folder = Path::new("/some/batch");
    let guard = registry.acquire(folder).unwrap();
    assert!(registry.is_busy(folder));
    assert!(registry.acquire(folder).is_err());
    assert!(registry.clone().acquire(folder).is_err());
    assert!(registry.acquire(&folder.join("labels")).is_err());
    assert!(registry.acquire(Path::new("/some")).is_err());
    assert!(registry.is_busy(&folder.join("labels")));
    let other = registry.acquire(Path::new("/some/other")).unwrap();
    assert!(registry.acquire(Path::new("/some/batch2")).is_ok());
    drop(guard);
    assert!(!registry.is_busy(folder));
    assert!(registry.acquire(folder).is_ok());
    drop(other);
}
