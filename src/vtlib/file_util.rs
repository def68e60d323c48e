use lazy_static::lazy_static;
use std::{
    ffi::OsStr,
    fmt::Debug,
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{error, info};
use vision_trainer_domain::{VtResult, to_vt, vterr};

lazy_static! {
    pub static ref DEFAULT_TMPDIR: PathBuf = std::env::temp_dir().join("vision-trainer");
}
lazy_static! {
    pub static ref DEFAULT_HOMEDIR: PathBuf = match dirs::home_dir() {
        Some(p) => p.join(".vision-trainer"),
        _ => std::env::temp_dir().join("vision-trainer"),
    };
}

pub fn read_to_string<P>(p: P) -> VtResult<String>
where
    P: AsRef<Path> + Debug,
{
    fs::read_to_string(&p).map_err(|e| vterr!("could not read {:?} due to {:?}", p, e))
}

pub fn write<P, C>(path: P, contents: C) -> VtResult<()>
where
    P: AsRef<Path> + Debug,
    C: AsRef<[u8]>,
{
    fs::write(&path, contents).map_err(|e| vterr!("could not write to {:?} since {:?}", path, e))
}

/// Writes next to the target first and renames afterwards such that readers never see a partially
/// written file.
pub fn write_atomic<P, C>(path: P, contents: C) -> VtResult<()>
where
    P: AsRef<Path> + Debug,
    C: AsRef<[u8]>,
{
    let path = path.as_ref();
    let tmp_path = tmp_sibling(path)?;
    write(&tmp_path, contents)?;
    fs::rename(&tmp_path, path).map_err(|e| {
        checked_remove(&tmp_path, fs::remove_file);
        vterr!("could not move {:?} to {:?} due to {:?}", tmp_path, path, e)
    })
}

pub fn tmp_sibling(path: &Path) -> VtResult<PathBuf> {
    let name = to_name_str(path)?;
    Ok(path.with_file_name(format!(".{name}.{}.part", uuid::Uuid::new_v4())))
}

pub fn create_dir_all<P>(p: P) -> VtResult<()>
where
    P: AsRef<Path> + Debug,
{
    fs::create_dir_all(&p).map_err(|e| vterr!("could not create folder {:?} due to {:?}", p, e))
}

pub fn path_to_str(p: &Path) -> VtResult<&str> {
    osstr_to_str(Some(p.as_os_str()))
        .map_err(|e| vterr!("path_to_str could not transform '{:?}' due to '{:?}'", p, e))
}

pub fn osstr_to_str(p: Option<&OsStr>) -> io::Result<&str> {
    p.ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{p:?} not found")))?
        .to_str()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{p:?} not convertible to unicode"),
            )
        })
}

pub fn to_stem_str(p: &Path) -> VtResult<&str> {
    let stem = p.file_stem();
    if stem.is_none() {
        Ok("")
    } else {
        osstr_to_str(stem)
            .map_err(|e| vterr!("to_stem_str could not transform '{:?}' due to '{:?}'", p, e))
    }
}

pub fn to_name_str(p: &Path) -> VtResult<&str> {
    osstr_to_str(p.file_name())
        .map_err(|e| vterr!("to_name_str could not transform '{:?}' due to '{:?}'", p, e))
}

pub fn has_extension(p: &Path, extension: &str) -> bool {
    p.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension.trim_start_matches('.')))
}

/// Files directly inside `folder` with the given extension, sub-folders are not visited.
pub fn files_in_folder<'a>(
    folder: &'a Path,
    extension: &'a str,
) -> VtResult<impl Iterator<Item = PathBuf> + 'a> {
    Ok(fs::read_dir(folder)
        .map_err(|e| vterr!("could not open folder {:?} due to {}", folder, e))?
        .flatten()
        .map(|de| de.path())
        .filter(move |p| p.is_file() && has_extension(p, extension)))
}

pub fn relative_slash_path(path: &Path, base: &Path) -> VtResult<String> {
    let rel = path.strip_prefix(base).map_err(to_vt)?;
    Ok(path_to_str(rel)?.replace('\\', "/"))
}

pub struct Defer<F: FnMut()> {
    pub func: F,
}
impl<F: FnMut()> Drop for Defer<F> {
    fn drop(&mut self) {
        (self.func)();
    }
}
#[macro_export]
macro_rules! defer {
    ($f:expr) => {
        let _dfr = $crate::file_util::Defer { func: $f };
    };
}
pub fn checked_remove<'a, P: AsRef<Path> + Debug>(
    path: &'a P,
    func: fn(p: &'a P) -> io::Result<()>,
) {
    match func(path) {
        Ok(_) => info!("removed {path:?}"),
        Err(e) => error!("could not remove {path:?} due to {e:?}"),
    }
}
#[macro_export]
macro_rules! defer_folder_removal {
    ($path:expr) => {
        let func = || $crate::file_util::checked_remove($path, std::fs::remove_dir_all);
        $crate::defer!(func);
    };
}

pub fn get_test_folder() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("resources/test_data")
}

/// Fresh folder below the temp dir, the caller is responsible for removing it.
pub fn make_tmp_folder(prefix: &str) -> VtResult<PathBuf> {
    let folder = DEFAULT_TMPDIR.join(format!("{prefix}-{}", uuid::Uuid::new_v4()));
    create_dir_all(&folder)?;
    Ok(folder)
}

#[test]
fn test_write_atomic() {
    let folder = make_tmp_folder("write-atomic").unwrap();
    defer_folder_removal!(&folder);
    let p = folder.join("a.txt");
    write_atomic(&p, "first").unwrap();
    write_atomic(&p, "second").unwrap();
    assert_eq!(read_to_string(&p).unwrap(), "second");
    let n_files = fs::read_dir(&folder).unwrap().count();
    assert_eq!(n_files, 1);
}

#[test]
fn test_files_in_folder() {
    let folder = make_tmp_folder("files-in-folder").unwrap();
    defer_folder_removal!(&folder);
    for name in ["a.jpg", "b.JPG", "c.png", "d.txt"] {
        write(folder.join(name), "").unwrap();
    }
    create_dir_all(folder.join("e.jpg")).unwrap();
    let mut names = files_in_folder(&folder, "jpg")
        .unwrap()
        .map(|p| to_name_str(&p).unwrap().to_string())
        .collect::<Vec<_>>();
    names.sort();
    assert_eq!(names, vec!["a.jpg", "b.JPG"]);
    assert!(files_in_folder(&folder.join("nope"), "jpg").is_err());
}

#[test]
fn test_relative_slash_path() {
    let base = Path::new("/a/b");
    let p = Path::new("/a/b/c/d.txt");
    assert_eq!(relative_slash_path(p, base).unwrap(), "c/d.txt");
    assert!(relative_slash_path(Path::new("/x/y"), base).is_err());
}
