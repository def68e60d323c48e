use std::{
    fs,
    path::{Path, PathBuf},
};

use vision_trainer_domain::{VtResult, to_vt, vterr};
use walkdir::WalkDir;

use super::{BlobStore, folder_prefix, is_hidden};
use crate::file_util;

/// Container that lives in a local folder, e.g., a mounted network share
#[derive(Clone, Debug)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
    pub fn root(&self) -> &Path {
        &self.root
    }
    fn path_of(&self, name: &str) -> VtResult<PathBuf> {
        if name.split('/').any(|part| part == "..") {
            return Err(vterr!("blob name {name} must not leave the container"));
        }
        Ok(name
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |p, part| p.join(part)))
    }
}

impl BlobStore for LocalBlobStore {
    fn list_folders(&self, prefix: &str) -> VtResult<Vec<String>> {
        let prefix = folder_prefix(prefix);
        let folder = self.path_of(&prefix)?;
        let mut folders = fs::read_dir(&folder)
            .map_err(|e| vterr!("could not list {folder:?} due to {e:?}"))?
            .flatten()
            .map(|entry| entry.path())
            .filter(|p| p.is_dir() && !is_hidden(p))
            .map(|p| Ok(format!("{prefix}{}", file_util::to_name_str(&p)?)))
            .collect::<VtResult<Vec<_>>>()?;
        folders.sort();
        Ok(folders)
    }
    fn list_blobs(&self, prefix: &str) -> VtResult<Vec<String>> {
        let folder = self.path_of(&folder_prefix(prefix))?;
        if !folder.exists() {
            return Ok(vec![]);
        }
        let mut names = vec![];
        for entry in WalkDir::new(&folder) {
            let entry = entry.map_err(to_vt)?;
            if entry.path().is_file() && !is_hidden(entry.path()) {
                names.push(file_util::relative_slash_path(entry.path(), &self.root)?);
            }
        }
        names.sort();
        Ok(names)
    }
    fn download_blob(&self, name: &str) -> VtResult<Vec<u8>> {
        let path = self.path_of(name)?;
        fs::read(&path).map_err(|e| vterr!("could not read blob {name} from {path:?} due to {e:?}"))
    }
    fn upload_blob(&self, name: &str, content: Vec<u8>) -> VtResult<()> {
        let path = self.path_of(name)?;
        if let Some(parent) = path.parent() {
            file_util::create_dir_all(parent)?;
        }
        file_util::write_atomic(&path, content)
    }
}

#[cfg(test)]
use crate::{defer_folder_removal, file_util::make_tmp_folder};

#[test]
fn test_local_store() {
    let root = make_tmp_folder("local-store").unwrap();
    defer_folder_removal!(&root);
    let store = LocalBlobStore::new(root.clone());
    store.upload_blob("b1/im1.jpg", vec![1, 2, 3]).unwrap();
    store.upload_blob("b1/labels/im1.txt", b"0 0.5 0.5 0.1 0.1\n".to_vec()).unwrap();
    store.upload_blob("b2/im1.jpg", vec![4]).unwrap();
    assert_eq!(store.list_folders("").unwrap(), vec!["b1", "b2"]);
    assert_eq!(store.list_folders("b1").unwrap(), vec!["b1/labels"]);
    assert_eq!(
        store.list_blobs("b1").unwrap(),
        vec!["b1/im1.jpg", "b1/labels/im1.txt"]
    );
    assert!(store.list_blobs("b3").unwrap().is_empty());
    assert_eq!(store.download_blob("b2/im1.jpg").unwrap(), vec![4]);
    assert!(store.download_blob("b2/nope.jpg").is_err());
    assert!(store.download_blob("../outside").is_err());
}
