use crate::error::SyncError;
use crate::models::{AssetPayload, Block, DriveEntry, RemoteDocument};
use crate::render::parse_block;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_API_BASE: &str = "https://open.feishu.cn/open-apis";

const MAX_ATTEMPTS: usize = 3;
const BACKOFF: Duration = Duration::from_millis(500);
const BLOCK_PAGE_SIZE: usize = 500;
const FOLDER_PAGE_SIZE: usize = 100;

/// Everything the sync orchestrator needs from the remote document service.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn document_meta(&self, doc_id: &str) -> Result<RemoteDocument, SyncError>;

    /// The full block tree of a document, leaves in document order.
    async fn block_tree(&self, doc_id: &str) -> Result<Vec<Block>, SyncError>;

    async fn folder_entries(&self, folder_token: &str) -> Result<Vec<DriveEntry>, SyncError>;

    async fn fetch_asset(&self, asset_key: &str) -> Result<AssetPayload, SyncError>;
}

pub struct FeishuClient {
    http: Client,
    api_base: Url,
    app_id: String,
    app_secret: String,
    token: Mutex<Option<String>>,
}

impl FeishuClient {
    pub fn new(
        api_base: &str,
        app_id: impl Into<String>,
        app_secret: impl Into<String>,
    ) -> Result<Self, SyncError> {
        let mut base = api_base.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        Ok(Self {
            http: Client::new(),
            api_base: Url::parse(&base)?,
            app_id: app_id.into(),
            app_secret: app_secret.into(),
            token: Mutex::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, SyncError> {
        Ok(self.api_base.join(path)?)
    }

    /// Short-lived tenant token, fetched once per process and reused.
    /// A rejected credential is fatal for the run; it is never retried.
    pub async fn tenant_token(&self) -> Result<String, SyncError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        let url = self.endpoint("auth/v3/tenant_access_token/internal")?;
        let response = self
            .http
            .post(url)
            .json(&json!({ "app_id": self.app_id, "app_secret": self.app_secret }))
            .send()
            .await?;
        let body: Value = response.json().await?;

        let code = body.pointer("/code").and_then(Value::as_i64).unwrap_or(-1);
        if code != 0 {
            let msg = body
                .pointer("/msg")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            return Err(SyncError::Auth(format!("token request failed: {msg}")));
        }

        let token = body
            .pointer("/tenant_access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::Auth("token response missing tenant_access_token".into()))?
            .to_string();
        *cached = Some(token.clone());
        Ok(token)
    }

    /// GET with bounded retry on transient failures. Connection errors,
    /// timeouts, and 5xx responses are retried with linear backoff; auth
    /// rejections and other 4xx responses are not.
    async fn get_json(&self, url: Url, params: &[(&str, String)]) -> Result<Value, SyncError> {
        let token = self.tenant_token().await?;
        let mut last_transient = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            let result = self
                .http
                .get(url.clone())
                .query(params)
                .bearer_auth(&token)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.as_u16() == 401 || status.as_u16() == 403 {
                        return Err(SyncError::Auth(format!("{url} returned {status}")));
                    }
                    if status.is_server_error() {
                        last_transient = format!("{url} returned {status}");
                    } else {
                        let body: Value = response.json().await?;
                        let code = body.pointer("/code").and_then(Value::as_i64).unwrap_or(0);
                        if code != 0 {
                            let msg = body
                                .pointer("/msg")
                                .and_then(Value::as_str)
                                .unwrap_or("unknown")
                                .to_string();
                            return Err(SyncError::Api { code, msg });
                        }
                        return Ok(body);
                    }
                }
                Err(error) if error.is_timeout() || error.is_connect() => {
                    last_transient = error.to_string();
                }
                Err(error) => return Err(SyncError::Http(error)),
            }

            if attempt < MAX_ATTEMPTS {
                debug!(url = %url, attempt, "transient failure, backing off");
                tokio::time::sleep(BACKOFF * attempt as u32).await;
            }
        }

        Err(SyncError::RetriesExhausted(last_transient))
    }

    /// Paginated listing: follows `page_token` until the service reports
    /// no more pages.
    async fn get_paged_items(
        &self,
        url: Url,
        page_size: usize,
    ) -> Result<Vec<Value>, SyncError> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![("page_size", page_size.to_string())];
            if let Some(token) = &page_token {
                params.push(("page_token", token.clone()));
            }

            let body = self.get_json(url.clone(), &params).await?;
            if let Some(page) = body.pointer("/data/items").and_then(Value::as_array) {
                items.extend(page.iter().cloned());
            }

            let has_more = body
                .pointer("/data/has_more")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let next = body
                .pointer("/data/page_token")
                .and_then(Value::as_str)
                .filter(|token| !token.is_empty())
                .map(|token| token.to_string());

            match next {
                Some(token) if has_more => page_token = Some(token),
                _ => break,
            }
        }

        Ok(items)
    }

    async fn fetch_single_block(&self, doc_id: &str, block_id: &str) -> Result<Value, SyncError> {
        let url = self.endpoint(&format!("docx/v1/documents/{doc_id}/blocks/{block_id}"))?;
        let body = self.get_json(url, &[]).await?;
        Ok(body.pointer("/data").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl DocumentSource for FeishuClient {
    async fn document_meta(&self, doc_id: &str) -> Result<RemoteDocument, SyncError> {
        let url = self.endpoint(&format!("docx/v1/documents/{doc_id}"))?;
        let body = self.get_json(url, &[]).await?;

        let title = body
            .pointer("/data/document/title")
            .and_then(Value::as_str)
            .unwrap_or("untitled")
            .to_string();
        let revision = body
            .pointer("/data/document/updated_at")
            .and_then(Value::as_i64)
            .unwrap_or(0);

        Ok(RemoteDocument {
            id: doc_id.to_string(),
            title,
            revision,
        })
    }

    async fn block_tree(&self, doc_id: &str) -> Result<Vec<Block>, SyncError> {
        let url = self.endpoint(&format!("docx/v1/documents/{doc_id}/blocks"))?;
        let listed = self.get_paged_items(url, BLOCK_PAGE_SIZE).await?;

        // Depth-first child resolution over an explicit worklist; the visited
        // set tolerates cyclic or duplicated child references.
        let mut blocks = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();

        for raw in &listed {
            let block = parse_block(raw);
            if !visited.insert(block.id.clone()) {
                continue;
            }

            let mut pending: Vec<String> = block
                .children
                .iter()
                .rev()
                .filter(|id| !visited.contains(*id))
                .cloned()
                .collect();
            blocks.push(block);

            while let Some(child_id) = pending.pop() {
                if !visited.insert(child_id.clone()) {
                    continue;
                }
                match self.fetch_single_block(doc_id, &child_id).await {
                    Ok(raw_child) => {
                        let child = parse_block(&raw_child);
                        for grandchild in child.children.iter().rev() {
                            if !visited.contains(grandchild) {
                                pending.push(grandchild.clone());
                            }
                        }
                        blocks.push(child);
                    }
                    Err(SyncError::Api { code, msg }) => {
                        warn!(doc_id, child_id, code, msg, "skipping unfetchable child block");
                    }
                    Err(error) => return Err(error),
                }
            }
        }

        Ok(blocks)
    }

    async fn folder_entries(&self, folder_token: &str) -> Result<Vec<DriveEntry>, SyncError> {
        let url = self.endpoint(&format!("drive/v1/files/{folder_token}/children"))?;
        let items = self.get_paged_items(url, FOLDER_PAGE_SIZE).await?;

        Ok(items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect())
    }

    async fn fetch_asset(&self, asset_key: &str) -> Result<AssetPayload, SyncError> {
        let url = self.endpoint(&format!("drive/v1/files/{asset_key}"))?;
        let body = self.get_json(url, &[]).await?;

        let download_url = body
            .pointer("/data/download_url")
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::Api {
                code: -1,
                msg: format!("asset {asset_key} has no download_url"),
            })?;

        // The download URL is short-lived and pre-signed; no bearer needed.
        let response = self.http.get(download_url).send().await?;
        if !response.status().is_success() {
            return Err(SyncError::Api {
                code: response.status().as_u16() as i64,
                msg: format!("asset download for {asset_key} failed"),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("image/png")
            .to_string();
        let bytes = response.bytes().await?.to_vec();

        Ok(AssetPayload {
            bytes,
            content_type,
        })
    }
}
