//! Google Drive v3 REST 客户端

use super::{CredentialProvider, ListPage, RemoteEntry, RemoteStore, DEFAULT_MIME_TYPE, FOLDER_MIME_TYPE, IO_TIMEOUT_SECS};
use crate::error::{StoreError, StoreResult};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "https://www.googleapis.com";

/// 每页条目数（Drive 上限为 1000）
const PAGE_SIZE: u32 = 100;
const ENTRY_FIELDS: &str = "id, name, mimeType, size, md5Checksum";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    mime_type: Option<String>,
    /// Drive 以字符串返回大小，Google 文档类型没有大小
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    md5_checksum: Option<String>,
}

impl From<DriveFile> for RemoteEntry {
    fn from(f: DriveFile) -> Self {
        RemoteEntry {
            id: f.id,
            name: f.name,
            mime_type: f.mime_type.unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
            size: f.size.and_then(|s| s.parse().ok()).unwrap_or(0),
            checksum: f.md5_checksum.filter(|s| !s.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedFile {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorReason>,
}

#[derive(Debug, Deserialize)]
struct ErrorReason {
    #[serde(default)]
    reason: String,
}

pub struct DriveStore {
    client: Client,
    credentials: Arc<dyn CredentialProvider>,
    /// 共享云端硬盘 ID（列表时需要 corpora=drive）
    drive_id: Option<String>,
    endpoint: String,
    name: String,
}

impl DriveStore {
    pub fn new(
        credentials: Arc<dyn CredentialProvider>,
        drive_id: Option<String>,
        endpoint: Option<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(IO_TIMEOUT_SECS))
            .build()?;

        let endpoint = endpoint
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
            .trim_end_matches('/')
            .to_string();

        let name = match drive_id {
            Some(ref id) => format!("drive://shared/{}", id),
            None => "drive://my-drive".to_string(),
        };

        Ok(Self {
            client,
            credentials,
            drive_id,
            endpoint,
            name,
        })
    }

    fn files_url(&self, id: Option<&str>) -> String {
        match id {
            Some(id) => format!(
                "{}/drive/v3/files/{}",
                self.endpoint,
                urlencoding::encode(id)
            ),
            None => format!("{}/drive/v3/files", self.endpoint),
        }
    }

    /// 查询字符串中的字面量需要转义单引号和反斜杠
    fn quote(value: &str) -> String {
        value.replace('\\', "\\\\").replace('\'', "\\'")
    }

    fn children_query(folder_id: &str) -> String {
        format!("'{}' in parents and trashed=false", Self::quote(folder_id))
    }

    async fn send(&self, request: RequestBuilder) -> StoreResult<Response> {
        let token = self.credentials.access_token().await?;
        let response = request.bearer_auth(token).send().await?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(Self::classify(status, &body))
    }

    /// 把 HTTP 错误映射到错误分类
    fn classify(status: StatusCode, body: &str) -> StoreError {
        let detail = serde_json::from_str::<ErrorBody>(body).ok().map(|b| b.error);
        let message = detail
            .as_ref()
            .map(|d| d.message.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("HTTP {}", status));
        let reasons: Vec<String> = detail
            .map(|d| d.errors.into_iter().map(|e| e.reason).collect())
            .unwrap_or_default();
        let has_reason = |r: &str| reasons.iter().any(|x| x == r);

        match status {
            StatusCode::TOO_MANY_REQUESTS => StoreError::RateLimited(message),
            StatusCode::FORBIDDEN
                if has_reason("userRateLimitExceeded") || has_reason("rateLimitExceeded") =>
            {
                StoreError::RateLimited(message)
            }
            StatusCode::FORBIDDEN => StoreError::PermissionDenied(message),
            StatusCode::NOT_FOUND => StoreError::NotFound(message),
            StatusCode::UNAUTHORIZED => StoreError::Auth(message),
            _ => StoreError::Backend(message),
        }
    }
}

#[async_trait]
impl RemoteStore for DriveStore {
    async fn list_children(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
    ) -> StoreResult<ListPage> {
        let fields = format!("nextPageToken, files({})", ENTRY_FIELDS);
        let page_size = PAGE_SIZE.to_string();
        let query = Self::children_query(folder_id);
        let mut params: Vec<(&str, &str)> = vec![
            ("q", query.as_str()),
            ("spaces", "drive"),
            ("fields", fields.as_str()),
            ("pageSize", page_size.as_str()),
            ("supportsAllDrives", "true"),
            ("includeItemsFromAllDrives", "true"),
        ];
        if let Some(ref drive_id) = self.drive_id {
            params.push(("corpora", "drive"));
            params.push(("driveId", drive_id.as_str()));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let response = self
            .send(self.client.get(self.files_url(None)).query(&params))
            .await?;
        let list: FileList = response.json().await?;

        Ok(ListPage {
            entries: list.files.into_iter().map(RemoteEntry::from).collect(),
            next_page_token: list.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> StoreResult<String> {
        let body = json!({
            "name": name,
            "mimeType": FOLDER_MIME_TYPE,
            "parents": [parent_id],
        });

        let response = self
            .send(
                self.client
                    .post(self.files_url(None))
                    .query(&[("fields", "id, name"), ("supportsAllDrives", "true")])
                    .json(&body),
            )
            .await?;
        let created: CreatedFile = response.json().await?;
        Ok(created.id)
    }

    async fn copy_file(&self, file_id: &str, new_name: &str, parent_id: &str) -> StoreResult<String> {
        let body = json!({
            "name": new_name,
            "parents": [parent_id],
        });

        let url = format!("{}/copy", self.files_url(Some(file_id)));
        let response = self
            .send(
                self.client
                    .post(url)
                    .query(&[("fields", "id, name"), ("supportsAllDrives", "true")])
                    .json(&body),
            )
            .await?;
        let created: CreatedFile = response.json().await?;
        Ok(created.id)
    }

    async fn delete_file(&self, id: &str) -> StoreResult<()> {
        self.send(
            self.client
                .delete(self.files_url(Some(id)))
                .query(&[("supportsAllDrives", "true")]),
        )
        .await?;
        Ok(())
    }

    async fn download_file(&self, id: &str) -> StoreResult<Bytes> {
        let response = self
            .send(
                self.client
                    .get(self.files_url(Some(id)))
                    .query(&[("alt", "media"), ("supportsAllDrives", "true")]),
            )
            .await?;
        Ok(response.bytes().await?)
    }

    async fn upload_file(
        &self,
        name: &str,
        parent_id: &str,
        data: Bytes,
        mime_type: &str,
    ) -> StoreResult<String> {
        use reqwest::multipart::{Form, Part};

        let metadata = json!({
            "name": name,
            "parents": [parent_id],
        });

        let meta_part = Part::text(metadata.to_string())
            .mime_str("application/json; charset=UTF-8")?;
        let media_part = Part::bytes(data.to_vec()).mime_str(mime_type)?;
        let form = Form::new()
            .part("metadata", meta_part)
            .part("media", media_part);

        let url = format!("{}/upload/drive/v3/files", self.endpoint);
        let response = self
            .send(
                self.client
                    .post(url)
                    .query(&[
                        ("uploadType", "multipart"),
                        ("fields", "id, name"),
                        ("supportsAllDrives", "true"),
                    ])
                    .multipart(form),
            )
            .await?;
        let created: CreatedFile = response.json().await?;
        Ok(created.id)
    }

    async fn get_metadata(&self, id: &str) -> StoreResult<RemoteEntry> {
        let response = self
            .send(
                self.client
                    .get(self.files_url(Some(id)))
                    .query(&[("fields", ENTRY_FIELDS), ("supportsAllDrives", "true")]),
            )
            .await?;
        let file: DriveFile = response.json().await?;
        Ok(file.into())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
