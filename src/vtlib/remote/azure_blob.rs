use std::time::Duration;

use azure_storage::{CloudLocation, StorageCredentials};
use azure_storage_blobs::prelude::*;
use futures::StreamExt;
use lazy_static::lazy_static;
use tokio::{runtime::Runtime, time::timeout};
use vision_trainer_domain::{VtResult, to_vt, vterr};

use super::{BlobStore, folder_prefix};
use crate::cfg::RemoteCfg;

lazy_static! {
    static ref RT: Runtime = Runtime::new().expect("could not create tokio runtime");
}

/// Items of one listing, either folder prefixes or blob names
#[derive(Clone, Copy)]
enum Listing {
    Folders,
    Blobs,
}

async fn list(
    container_client: &ContainerClient,
    prefix: &str,
    what: Listing,
    page_timeout_s: u64,
) -> VtResult<Vec<String>> {
    let mut res = vec![];
    let builder = container_client.list_blobs();
    let builder = if prefix.is_empty() {
        builder
    } else {
        builder.prefix(prefix.to_string())
    };
    let mut stream = match what {
        Listing::Folders => builder.delimiter("/").into_stream(),
        Listing::Blobs => builder.into_stream(),
    };
    let container_name = container_client.container_name();
    while let Some(value) = timeout(Duration::from_secs(page_timeout_s), stream.next())
        .await
        .map_err(|_| {
            vterr!(
                "timeout while listing blobs of container {container_name}, waited more than {page_timeout_s} seconds"
            )
        })?
    {
        let page = value.map_err(|e| {
            vterr!("could not list blobs of container '{container_name}' due to '{e:?}'")
        })?;
        match what {
            Listing::Folders => res.extend(
                page.blobs
                    .prefixes()
                    .map(|p| p.name.trim_end_matches('/').to_string()),
            ),
            Listing::Blobs => res.extend(page.blobs.blobs().map(|b| b.name.clone())),
        }
        tracing::info!("retrieved {} entries below '{prefix}'", res.len());
    }
    Ok(res)
}

/// Blob container that is accessed with a shared access signature
#[derive(Clone)]
pub struct AzureBlobStore {
    container_client: ContainerClient,
    page_timeout_s: u64,
}

/// Account name from the first path segment like `http://127.0.0.1:10000/devstoreaccount1` or
/// from the host like `https://someaccount.blob.core.windows.net`
fn account_from_url(base_url: &str) -> VtResult<String> {
    let rest = base_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .ok_or_else(|| vterr!("could not find host in '{base_url}'"))?;
    let mut segments = rest.split('/').filter(|s| !s.is_empty());
    let host = segments
        .next()
        .ok_or_else(|| vterr!("could not find host in '{base_url}'"))?;
    let account = match segments.next() {
        Some(account) => account,
        None => host.split(['.', ':']).next().unwrap_or(host),
    };
    Ok(account.to_string())
}

impl AzureBlobStore {
    pub fn new(cfg: &RemoteCfg) -> VtResult<Self> {
        cfg.validate()?;
        let credentials =
            StorageCredentials::sas_token(cfg.sas_token.trim_start_matches('?')).map_err(to_vt)?;
        let location = CloudLocation::Custom {
            account: account_from_url(&cfg.base_url)?,
            uri: cfg.base_url.trim_end_matches('/').to_string(),
        };
        let container_client = ClientBuilder::with_location(location, credentials)
            .container_client(&cfg.container_name);
        Ok(Self {
            container_client,
            page_timeout_s: cfg.blob_list_timeout_s(),
        })
    }
}

impl BlobStore for AzureBlobStore {
    fn list_folders(&self, prefix: &str) -> VtResult<Vec<String>> {
        RT.block_on(list(
            &self.container_client,
            &folder_prefix(prefix),
            Listing::Folders,
            self.page_timeout_s,
        ))
    }
    fn list_blobs(&self, prefix: &str) -> VtResult<Vec<String>> {
        RT.block_on(list(
            &self.container_client,
            &folder_prefix(prefix),
            Listing::Blobs,
            self.page_timeout_s,
        ))
    }
    fn download_blob(&self, name: &str) -> VtResult<Vec<u8>> {
        let blob_client = self.container_client.blob_client(name);
        RT.block_on(blob_client.get_content())
            .map_err(|e| vterr!("could not download blob {name} due to {e:?}"))
    }
    fn upload_blob(&self, name: &str, content: Vec<u8>) -> VtResult<()> {
        let blob_client = self.container_client.blob_client(name);
        RT.block_on(async { blob_client.put_block_blob(content).await })
            .map_err(|e| vterr!("could not upload blob {name} due to {e:?}"))?;
        Ok(())
    }
}

#[test]
fn test_account_from_url() {
    assert_eq!(
        account_from_url("https://someaccount.blob.core.windows.net").unwrap(),
        "someaccount"
    );
    assert_eq!(
        account_from_url("http://127.0.0.1:10000/devstoreaccount1").unwrap(),
        "devstoreaccount1"
    );
    assert!(account_from_url("nohost").is_err());
    assert!(account_from_url("https://").is_err());
}

#[test]
fn test_new_store() {
    let cfg = RemoteCfg {
        base_url: "https://someaccount.blob.core.windows.net/".into(),
        container_name: "images".into(),
        sas_token: "?sv=2022-11-02&sig=abc".into(),
        blob_list_timeout_s: Some(3),
    };
    let store = AzureBlobStore::new(&cfg).unwrap();
    assert_eq!(store.page_timeout_s, 3);
    let bad = RemoteCfg {
        container_name: String::new(),
        ..cfg
    };
    assert!(AzureBlobStore::new(&bad).is_err());
}
