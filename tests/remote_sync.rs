use std::{
    path::Path,
    sync::{
        Arc, Mutex,
        mpsc::{self, Receiver, Sender},
    },
};

use vision_trainer_domain::VtResult;
use vtlib::{
    defer_folder_removal,
    file_util::{self, make_tmp_folder},
    remote::{
        BlobStore, Direction, LocalBlobStore, TransferJob, TransferWorker, download_folder,
        upload_folder,
    },
    tracing_setup::init_tracing_for_tests,
};

fn fill_remote(root: &Path) {
    let batch = root.join("batch-007");
    file_util::create_dir_all(batch.join("labels")).unwrap();
    file_util::write(batch.join("a.jpg"), "image a").unwrap();
    file_util::write(batch.join("b.jpg"), "image b").unwrap();
    file_util::write(batch.join("labels").join("a.txt"), "0 0.5 0.5 0.2 0.2\n").unwrap();
    file_util::create_dir_all(root.join("batch-010")).unwrap();
    file_util::write(root.join("batch-010").join("c.jpg"), "image c").unwrap();
}

#[test]
fn test_download_edit_upload() {
    init_tracing_for_tests();
    let remote_root = make_tmp_folder("it-remote").unwrap();
    defer_folder_removal!(&remote_root);
    let local_root = make_tmp_folder("it-local").unwrap();
    defer_folder_removal!(&local_root);
    fill_remote(&remote_root);
    let store = LocalBlobStore::new(remote_root.clone());
    assert_eq!(
        store.list_folders("").unwrap(),
        vec!["batch-007".to_string(), "batch-010".to_string()]
    );

    let local_batch = local_root.join("batch-007");
    assert_eq!(download_folder(&store, "batch-007", &local_batch).unwrap(), 3);
    assert_eq!(
        file_util::read_to_string(local_batch.join("labels").join("a.txt")).unwrap(),
        "0 0.5 0.5 0.2 0.2\n"
    );
    assert!(!local_root.join("batch-010").exists());

    file_util::write(local_batch.join("labels").join("b.txt"), "1 0.1 0.1 0.1 0.1\n").unwrap();
    file_util::write(local_batch.join("labels").join(".hidden"), "x").unwrap();
    let n = upload_folder(&store, &local_batch.join("labels"), "batch-007/labels").unwrap();
    assert_eq!(n, 2);
    assert_eq!(
        store.download_blob("batch-007/labels/b.txt").unwrap(),
        b"1 0.1 0.1 0.1 0.1\n".to_vec()
    );
    assert!(!remote_root.join("batch-007").join("labels").join(".hidden").exists());
    assert!(upload_folder(&store, &local_root.join("missing"), "missing").is_err());
}

/// Blocks listings until the test lets them pass
struct GatedStore {
    inner: LocalBlobStore,
    gate: Mutex<Receiver<()>>,
}
impl GatedStore {
    fn new(inner: LocalBlobStore) -> (Self, Sender<()>) {
        let (tx, rx) = mpsc::channel();
        (
            Self {
                inner,
                gate: Mutex::new(rx),
            },
            tx,
        )
    }
}
impl BlobStore for GatedStore {
    fn list_folders(&self, prefix: &str) -> VtResult<Vec<String>> {
        self.inner.list_folders(prefix)
    }
    fn list_blobs(&self, prefix: &str) -> VtResult<Vec<String>> {
        if let Ok(rx) = self.gate.lock() {
            let _ = rx.recv();
        }
        self.inner.list_blobs(prefix)
    }
    fn download_blob(&self, name: &str) -> VtResult<Vec<u8>> {
        self.inner.download_blob(name)
    }
    fn upload_blob(&self, name: &str, content: Vec<u8>) -> VtResult<()> {
        self.inner.upload_blob(name, content)
    }
}

#[test]
fn test_concurrent_transfer_of_same_batch_is_refused() {
    init_tracing_for_tests();
    let remote_root = make_tmp_folder("it-gated-remote").unwrap();
    defer_folder_removal!(&remote_root);
    let local_root = make_tmp_folder("it-gated-local").unwrap();
    defer_folder_removal!(&local_root);
    fill_remote(&remote_root);
    let (store, open_gate) = GatedStore::new(LocalBlobStore::new(remote_root.clone()));
    let mut worker = TransferWorker::new(Arc::new(store));

    let local_batch = local_root.join("batch-007");
    worker
        .start(TransferJob::download("batch-007", local_batch.clone()))
        .unwrap();
    assert!(worker.registry().is_busy(&local_batch));
    assert!(
        worker
            .start(TransferJob::upload(local_batch.clone(), "batch-007"))
            .is_err()
    );
    assert!(
        worker
            .start(TransferJob::upload(
                local_batch.join("labels"),
                "batch-007/labels"
            ))
            .is_err()
    );
    assert_eq!(worker.n_in_flight(), 1);
    worker
        .start(TransferJob::download("batch-010", local_root.join("batch-010")))
        .unwrap();

    open_gate.send(()).unwrap();
    open_gate.send(()).unwrap();
    let mut reports = vec![worker.wait().unwrap(), worker.wait().unwrap()];
    reports.sort_by(|a, b| a.job.remote_folder.cmp(&b.job.remote_folder));
    assert_eq!(reports[0].job.direction, Direction::Download);
    assert_eq!(*reports[0].result.as_ref().unwrap(), 3);
    assert_eq!(*reports[1].result.as_ref().unwrap(), 1);
    assert!(worker.wait().is_none());
    assert!(!worker.registry().is_busy(&local_batch));

    worker
        .start(TransferJob::upload(local_batch.join("labels"), "batch-007/labels"))
        .unwrap();
    let report = worker.wait().unwrap();
    assert_eq!(*report.result.as_ref().unwrap(), 1);
}

/// Container whose blob names point outside of the batch
struct EscapingStore;
impl BlobStore for EscapingStore {
    fn list_folders(&self, _: &str) -> VtResult<Vec<String>> {
        Ok(vec!["b".into()])
    }
    fn list_blobs(&self, _: &str) -> VtResult<Vec<String>> {
        Ok(vec![
            "b/../../escaped.txt".into(),
            "b/labels/../../../escaped.txt".into(),
            "b/labels/ok.txt".into(),
        ])
    }
    fn download_blob(&self, _: &str) -> VtResult<Vec<u8>> {
        Ok(b"content".to_vec())
    }
    fn upload_blob(&self, _: &str, _: Vec<u8>) -> VtResult<()> {
        Ok(())
    }
}

#[test]
fn test_download_stays_inside_batch() {
    init_tracing_for_tests();
    let root = make_tmp_folder("it-escape").unwrap();
    defer_folder_removal!(&root);
    let local_batch = root.join("batches").join("b");
    assert_eq!(download_folder(&EscapingStore, "b", &local_batch).unwrap(), 1);
    assert!(local_batch.join("labels").join("ok.txt").exists());
    assert!(!root.join("escaped.txt").exists());
    assert!(!root.join("batches").join("escaped.txt").exists());
}
