#![deny(clippy::all)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![forbid(unsafe_code)]

use std::{
    io::{BufRead, BufReader},
    ops::Deref,
    panic,
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{Parser, Subcommand, ValueEnum};
use vision_trainer_domain::{VtResult, to_vt, vterr};
use vtlib::{
    Control, Event, RecordingCanvas,
    cfg::{Cfg, CfgStore, RemoteCfg},
    remote::{BlobStore, LocalBlobStore, TransferJob, TransferWorker},
    result::{trace_ok_err, trace_ok_warn},
    tracing_setup,
    util::version_label,
};

#[derive(Parser)]
#[command(version, about = "Draw and classify bounding boxes for training data")]
struct Cli {
    /// Config file, defaults to vt_cfg.toml in the home folder
    #[arg(long)]
    cfg: Option<PathBuf>,
    /// Use a local folder as remote container instead of the configured blob storage
    #[arg(long)]
    remote_folder: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum OnOff {
    On,
    Off,
}

#[derive(Subcommand)]
enum Command {
    /// List the batches of the remote container
    Batches,
    /// Download a batch into the batches folder
    Download { batch: String },
    /// Upload the labels of a batch
    Upload {
        batch: String,
        /// Upload the images too
        #[arg(long)]
        all: bool,
    },
    /// Print the config
    Config,
    /// Switch selecting the next box after reclassification
    SetAdvance { value: OnOff },
    SetRemote {
        #[arg(long)]
        base_url: String,
        #[arg(long)]
        container: String,
        #[arg(long)]
        sas_token: String,
    },
    /// Apply events from a file with one JSON event per line to a batch
    Replay {
        /// Folder or name of a batch inside the batches folder
        batch: String,
        events: PathBuf,
    },
}

#[cfg(feature = "azure_blob")]
fn remote_blob_store(remote: &RemoteCfg) -> VtResult<Arc<dyn BlobStore>> {
    Ok(Arc::new(vtlib::remote::AzureBlobStore::new(remote)?))
}
#[cfg(not(feature = "azure_blob"))]
fn remote_blob_store(remote: &RemoteCfg) -> VtResult<Arc<dyn BlobStore>> {
    Err(vterr!(
        "cannot access {} without feature azure_blob, use --remote-folder",
        remote.base_url
    ))
}

fn make_blob_store(cfg: &Cfg, remote_folder: Option<PathBuf>) -> VtResult<Arc<dyn BlobStore>> {
    match remote_folder {
        Some(folder) => Ok(Arc::new(LocalBlobStore::new(folder))),
        None => remote_blob_store(cfg.remote()?),
    }
}

fn transfer(store: Arc<dyn BlobStore>, job: TransferJob) -> VtResult<usize> {
    let mut worker = TransferWorker::new(store);
    worker.start(job)?;
    worker
        .wait()
        .ok_or_else(|| vterr!("transfer did not report back"))?
        .result
}

fn batch_folder(cfg: &Cfg, batch: &str) -> PathBuf {
    let p = Path::new(batch);
    if p.is_dir() {
        p.to_path_buf()
    } else {
        cfg.batch_folder(batch)
    }
}

fn replay(cfg: CfgStore, batch: &str, events: &Path) -> VtResult<()> {
    let folder = batch_folder(cfg.cfg(), batch);
    let mut ctrl = Control::from_cfg(cfg)?;
    ctrl.load_batch(&folder)?;
    ctrl.wait_for_prediction();
    let mut canvas = RecordingCanvas::default();
    ctrl.render_if_requested(&mut canvas);
    let file = std::fs::File::open(events)
        .map_err(|e| vterr!("could not open {events:?} due to {e:?}"))?;
    for (line_idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(to_vt)?;
        if line.trim().is_empty() {
            continue;
        }
        let Some(event) = trace_ok_warn(serde_json::from_str::<Event>(&line)) else {
            tracing::warn!("skipping line {} of {events:?}", line_idx + 1);
            continue;
        };
        trace_ok_warn(ctrl.handle(event));
        if event.is_navigation() {
            ctrl.wait_for_prediction();
        }
        ctrl.render_if_requested(&mut canvas);
    }
    ctrl.persist()?;
    println!("{}", ctrl.status());
    for row in ctrl.list_rows() {
        println!("{row}");
    }
    Ok(())
}

fn run(cli: Cli) -> VtResult<()> {
    let mut cfg = match cli.cfg {
        Some(path) => CfgStore::load(path)?,
        None => CfgStore::load_default_location()?,
    };
    match cli.command {
        Command::Batches => {
            let store = make_blob_store(cfg.cfg(), cli.remote_folder)?;
            for folder in store.list_folders("")? {
                println!("{folder}");
            }
        }
        Command::Download { batch } => {
            let store = make_blob_store(cfg.cfg(), cli.remote_folder)?;
            let local = cfg.cfg().batch_folder(&batch);
            let n = transfer(store, TransferJob::download(&batch, local.clone()))?;
            println!("downloaded {n} files to {local:?}");
        }
        Command::Upload { batch, all } => {
            let store = make_blob_store(cfg.cfg(), cli.remote_folder)?;
            let local = cfg.cfg().batch_folder(&batch);
            let job = if all {
                TransferJob::upload(local, &batch)
            } else {
                TransferJob::upload(local.join("labels"), &format!("{batch}/labels"))
            };
            let n = transfer(store, job)?;
            println!("uploaded {n} files");
        }
        Command::Config => {
            println!("# {:?}", cfg.path());
            println!("{}", toml::to_string_pretty(cfg.cfg()).map_err(to_vt)?);
        }
        Command::SetAdvance { value } => {
            cfg.set_advance_after_reclassify(matches!(value, OnOff::On))?;
        }
        Command::SetRemote {
            base_url,
            container,
            sas_token,
        } => {
            let blob_list_timeout_s = cfg.cfg().remote.as_ref().and_then(|r| r.blob_list_timeout_s);
            cfg.set_remote(RemoteCfg {
                base_url,
                container_name: container,
                sas_token,
                blob_list_timeout_s,
            })?;
        }
        Command::Replay { batch, events } => replay(cfg, &batch, &events)?,
    }
    Ok(())
}

fn main() {
    let _guard_flush_to_logfile = tracing_setup::tracing_setup();
    tracing::info!("vision-trainer {}", version_label());
    if let Err(e) = panic::catch_unwind(|| {
        let cli = Cli::parse();
        trace_ok_err(run(cli));
    }) {
        let panic_s = e
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| e.downcast_ref::<&'static str>().map(Deref::deref));
        tracing::error!("{:?}", panic_s);
        if let Some(b) = tracing_setup::BACKTRACE.with(|b| b.borrow_mut().take()) {
            tracing::error!("{:?}", b);
        }
    }
}
