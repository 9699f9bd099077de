//! Fetching uploads by URL (`transu`, `atreeu`, `erasu`).

use crate::datastore::Datastore;
use crate::error::{LedgerExplorerError, Result};
use crate::frame::{filename_from_url, RawFrame, Source};
use crate::ingestion::Loader;
use crate::schema::Params;
use log::{debug, info};
use reqwest::Client;
use std::time::Duration;
use tokio::time::timeout;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_BYTES: usize = 50 * 1024 * 1024;

#[derive(Clone)]
pub struct RemoteLoader {
    client: Client,
    timeout: Duration,
    max_bytes: usize,
}

impl Default for RemoteLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteLoader {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            timeout: DEFAULT_TIMEOUT,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        timeout(self.timeout, self.fetch_body(url))
            .await
            .map_err(|_| {
                LedgerExplorerError::LoadError(format!(
                    "fetching {} took longer than {}s",
                    url,
                    self.timeout.as_secs()
                ))
            })?
    }

    async fn fetch_body(&self, url: &str) -> Result<Vec<u8>> {
        debug!("Fetching {}", url);
        let mut response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LedgerExplorerError::LoadError(format!(
                "fetching {} failed (status {})",
                url, status
            )));
        }
        if let Some(length) = response.content_length() {
            if length as usize > self.max_bytes {
                return Err(self.too_large(url));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(self.too_large(url));
            }
            body.extend_from_slice(&chunk);
        }
        info!("Fetched {} bytes from {}", body.len(), url);
        Ok(body)
    }

    fn too_large(&self, url: &str) -> LedgerExplorerError {
        LedgerExplorerError::LoadError(format!(
            "{} is larger than the {} byte upload limit",
            url, self.max_bytes
        ))
    }

    /// Like [`RawFrame::read`], but fetches URL sources.
    pub async fn read_frame(&self, source: &Source) -> Result<RawFrame> {
        match source {
            Source::Url(url) => {
                let bytes = self.fetch(url).await?;
                RawFrame::from_bytes(&filename_from_url(url), &bytes)
            }
            other => RawFrame::read(other),
        }
    }

    pub async fn load(
        &self,
        params: &Params,
        trans: &Source,
        tree: Option<&Source>,
        eras: Option<&Source>,
    ) -> Result<Datastore> {
        let trans_frame = self.read_frame(trans).await?;
        let tree_frame = match tree {
            Some(source) => Some(self.read_frame(source).await?),
            None => None,
        };
        let eras_frame = match eras {
            Some(source) => Some(self.read_frame(source).await?),
            None => None,
        };
        Loader::new(params).load_frames(trans_frame, tree_frame, eras_frame)
    }

    /// Loads the files named by the `transu`, `atreeu` and `erasu` parameters.
    pub async fn load_from_params(&self, params: &Params) -> Result<Datastore> {
        let trans = params
            .transu
            .as_deref()
            .map(|u| Source::Url(u.to_string()))
            .ok_or_else(|| LedgerExplorerError::LoadError("no transactions URL given".to_string()))?;
        let tree = params.atreeu.as_deref().map(|u| Source::Url(u.to_string()));
        let eras = params.erasu.as_deref().map(|u| Source::Url(u.to_string()));
        self.load(params, &trans, tree.as_ref(), eras.as_ref()).await
    }
}

pub async fn read_url(url: &str) -> Result<RawFrame> {
    RemoteLoader::new().read_frame(&Source::Url(url.to_string())).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_transactions_url() {
        let err = RemoteLoader::new()
            .load_from_params(&Params::default())
            .await
            .unwrap_err();
        assert!(err.is_load_error());
    }

    #[tokio::test]
    async fn test_non_url_sources_are_read_locally() {
        let source = Source::Bytes {
            filename: "t.csv".into(),
            bytes: b"date,amount,account\n2020-01-01,1,Cash\n".to_vec(),
        };
        let frame = RemoteLoader::new().read_frame(&source).await.unwrap();
        assert_eq!(frame.len(), 1);
    }
}
