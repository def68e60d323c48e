use crate::file_util::{self, DEFAULT_HOMEDIR};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{
    fmt::Debug,
    mem,
    path::{Path, PathBuf},
};
use tracing::{info, warn};
use vision_trainer_domain::{VtResult, to_vt, vterr};

const CFG_DEFAULT: &str = r#"
    [labeling]
    image_extension = "jpg"
    zoom = 2
    max_image_side = 1000
    advance_after_reclassify = true
    # batches_folder =
    # default_batch =
    # class_file =
    "#;

fn default_image_extension() -> String {
    "jpg".into()
}
const MAX_ZOOM: u32 = 16;

fn default_zoom() -> u32 {
    2
}
fn default_max_image_side() -> u32 {
    1000
}
fn default_true() -> bool {
    true
}
fn default_prediction_timeout_ms() -> u64 {
    30_000
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct LabelingCfg {
    pub batches_folder: Option<String>,
    pub default_batch: Option<String>,
    pub class_file: Option<String>,
    #[serde(default = "default_image_extension")]
    pub image_extension: String,
    #[serde(default = "default_zoom")]
    pub zoom: u32,
    #[serde(default = "default_max_image_side")]
    pub max_image_side: u32,
    #[serde(default = "default_true")]
    pub advance_after_reclassify: bool,
}
impl Default for LabelingCfg {
    fn default() -> Self {
        Self {
            batches_folder: None,
            default_batch: None,
            class_file: None,
            image_extension: default_image_extension(),
            zoom: default_zoom(),
            max_image_side: default_max_image_side(),
            advance_after_reclassify: true,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct PredictionCfg {
    pub url: String,
    pub authorization: Option<String>,
    #[serde(default = "default_prediction_timeout_ms")]
    pub timeout_ms: u64,
}

/// Blob storage the batches are synchronized with
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteCfg {
    pub base_url: String,
    pub container_name: String,
    /// query fragment that grants access, e.g., a shared access signature `sv=...&sig=...`
    pub sas_token: String,
    pub blob_list_timeout_s: Option<u64>,
}
impl RemoteCfg {
    pub fn validate(&self) -> VtResult<()> {
        if !(self.base_url.starts_with("https://") || self.base_url.starts_with("http://")) {
            Err(vterr!(
                "remote base url '{}' needs to start with http:// or https://",
                self.base_url
            ))
        } else if self.container_name.trim().is_empty() {
            Err(vterr!("remote container name is empty"))
        } else {
            Ok(())
        }
    }
    pub fn blob_list_timeout_s(&self) -> u64 {
        self.blob_list_timeout_s.unwrap_or(20)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Cfg {
    #[serde(default)]
    pub labeling: LabelingCfg,
    pub prediction: Option<PredictionCfg>,
    pub remote: Option<RemoteCfg>,
}

impl Cfg {
    pub fn batches_folder(&self) -> PathBuf {
        match &self.labeling.batches_folder {
            Some(bf) => PathBuf::from(bf),
            None => DEFAULT_HOMEDIR.join("batches"),
        }
    }
    pub fn batch_folder(&self, batch_name: &str) -> PathBuf {
        self.batches_folder().join(batch_name)
    }
    pub fn class_file(&self) -> PathBuf {
        match &self.labeling.class_file {
            Some(cf) => PathBuf::from(cf),
            None => DEFAULT_HOMEDIR.join("class.txt"),
        }
    }
    pub fn zoom(&self) -> u32 {
        self.labeling.zoom.clamp(1, MAX_ZOOM)
    }
    pub fn remote(&self) -> VtResult<&RemoteCfg> {
        let remote = self
            .remote
            .as_ref()
            .ok_or_else(|| vterr!("no remote configured, see section [remote] of the config"))?;
        remote.validate()?;
        Ok(remote)
    }
}

pub fn get_default_cfg() -> Cfg {
    toml::from_str(CFG_DEFAULT).expect("default config broken")
}

pub fn get_cfg_path(homedir: &Path) -> PathBuf {
    homedir.join("vt_cfg.toml")
}

pub fn get_log_folder(homedir: &Path) -> PathBuf {
    homedir.join("logs")
}

pub fn read_cfg_gen<CFG: Debug + DeserializeOwned + Default>(
    cfg_toml_path: &Path,
) -> VtResult<CFG> {
    if cfg_toml_path.exists() {
        let toml_str = file_util::read_to_string(cfg_toml_path)?;
        toml::from_str(&toml_str).map_err(|e| vterr!("could not parse cfg due to {:?}", e))
    } else {
        warn!("cfg {cfg_toml_path:?} file does not exist. using default cfg");
        Ok(CFG::default())
    }
}

pub fn write_cfg_str(cfg_str: &str, p: &Path, log: bool) -> VtResult<()> {
    if let Some(parent) = p.parent() {
        file_util::create_dir_all(parent)?;
    }
    file_util::write_atomic(p, cfg_str)?;
    if log {
        info!("wrote cfg to {p:?}");
    }
    Ok(())
}

pub fn write_cfg(cfg: &Cfg, p: &Path) -> VtResult<()> {
    let cfg_str = toml::to_string_pretty(cfg).map_err(to_vt)?;
    write_cfg_str(&cfg_str, p, true)
}

/// Owns the configuration and flushes every change to disk right away.
#[derive(Debug, Clone, PartialEq)]
pub struct CfgStore {
    cfg: Cfg,
    path: PathBuf,
}

impl CfgStore {
    pub fn new(cfg: Cfg, path: PathBuf) -> Self {
        Self { cfg, path }
    }
    pub fn load(path: PathBuf) -> VtResult<Self> {
        let cfg = read_cfg_gen::<Cfg>(&path)?;
        if let Some(remote) = &cfg.remote {
            remote.validate()?;
        }
        Ok(Self { cfg, path })
    }
    pub fn load_default_location() -> VtResult<Self> {
        Self::load(get_cfg_path(&DEFAULT_HOMEDIR))
    }
    pub fn cfg(&self) -> &Cfg {
        &self.cfg
    }
    pub fn path(&self) -> &Path {
        &self.path
    }
    /// Applies `f` and writes the result. If writing fails, the previous config is restored.
    pub fn update(&mut self, f: impl FnOnce(&mut Cfg)) -> VtResult<()> {
        let mut new_cfg = self.cfg.clone();
        f(&mut new_cfg);
        if new_cfg == self.cfg {
            return Ok(());
        }
        let old_cfg = mem::replace(&mut self.cfg, new_cfg);
        if let Err(e) = write_cfg(&self.cfg, &self.path) {
            self.cfg = old_cfg;
            Err(e)
        } else {
            Ok(())
        }
    }
    pub fn advance_after_reclassify(&self) -> bool {
        self.cfg.labeling.advance_after_reclassify
    }
    pub fn set_advance_after_reclassify(&mut self, advance: bool) -> VtResult<()> {
        self.update(|cfg| cfg.labeling.advance_after_reclassify = advance)
    }
    pub fn toggle_advance_after_reclassify(&mut self) -> VtResult<bool> {
        let advance = !self.advance_after_reclassify();
        self.set_advance_after_reclassify(advance)?;
        Ok(advance)
    }
    pub fn set_remote(&mut self, remote: RemoteCfg) -> VtResult<()> {
        remote.validate()?;
        self.update(|cfg| cfg.remote = Some(remote))
    }
}

#[cfg(test)]
use crate::{defer_folder_removal, file_util::make_tmp_folder};

#[test]
fn test_default_cfg() {
    let cfg = get_default_cfg();
    assert_eq!(cfg, Cfg::default());
    assert_eq!(cfg.labeling.image_extension, "jpg");
    assert_eq!(cfg.zoom(), 2);
    assert!(cfg.labeling.advance_after_reclassify);
    assert!(cfg.remote().is_err());
    let mut cfg = cfg;
    cfg.labeling.zoom = u32::MAX;
    assert_eq!(cfg.zoom(), MAX_ZOOM);
    cfg.labeling.zoom = 0;
    assert_eq!(cfg.zoom(), 1);
}

#[test]
fn test_read_partial_cfg() {
    let folder = make_tmp_folder("cfg-partial").unwrap();
    defer_folder_removal!(&folder);
    let p = get_cfg_path(&folder);
    file_util::write(
        &p,
        r#"
        [labeling]
        advance_after_reclassify = false
        batches_folder = "/data/batches"
        [remote]
        base_url = "https://someaccount.blob.core.windows.net"
        container_name = "images"
        sas_token = "sv=2022&sig=abc"
        "#,
    )
    .unwrap();
    let store = CfgStore::load(p).unwrap();
    assert!(!store.advance_after_reclassify());
    assert_eq!(store.cfg().labeling.zoom, 2);
    assert_eq!(
        store.cfg().batch_folder("batch-002"),
        PathBuf::from("/data/batches/batch-002")
    );
    assert_eq!(store.cfg().remote().unwrap().container_name, "images");
    assert_eq!(store.cfg().remote().unwrap().blob_list_timeout_s(), 20);
}

#[test]
fn test_malformed_cfg() {
    let folder = make_tmp_folder("cfg-malformed").unwrap();
    defer_folder_removal!(&folder);
    let p = get_cfg_path(&folder);
    file_util::write(&p, "[labeling\nzoom = 2").unwrap();
    assert!(CfgStore::load(p.clone()).is_err());
    file_util::write(
        &p,
        r#"
        [remote]
        base_url = "ftp://somewhere"
        container_name = "images"
        sas_token = ""
        "#,
    )
    .unwrap();
    assert!(CfgStore::load(p).is_err());
}

#[test]
fn test_cfg_store_flushes() {
    let folder = make_tmp_folder("cfg-flush").unwrap();
    defer_folder_removal!(&folder);
    let p = get_cfg_path(&folder);
    let mut store = CfgStore::load(p.clone()).unwrap();
    assert!(!p.exists());
    assert!(!store.toggle_advance_after_reclassify().unwrap());
    let reloaded = CfgStore::load(p.clone()).unwrap();
    assert!(!reloaded.advance_after_reclassify());

    let bad_remote = RemoteCfg {
        base_url: "nope".into(),
        container_name: "c".into(),
        ..Default::default()
    };
    assert!(store.set_remote(bad_remote).is_err());
    assert!(store.cfg().remote.is_none());
    let remote = RemoteCfg {
        base_url: "https://acc.blob.core.windows.net".into(),
        container_name: "c".into(),
        sas_token: "sig=1".into(),
        blob_list_timeout_s: None,
    };
    store.set_remote(remote.clone()).unwrap();
    let reloaded = CfgStore::load(p).unwrap();
    assert_eq!(reloaded.cfg().remote, Some(remote));
}
