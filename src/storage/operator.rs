//! 基于 OpenDAL 的路径型存储（本地 / S3 / WebDAV）
//!
//! ID 即路径：文件夹以 `/` 结尾，根为 `/`。

use super::{
    ListPage, RemoteEntry, RemoteStore, DEFAULT_MIME_TYPE, FOLDER_MIME_TYPE, IO_TIMEOUT_SECS,
    OP_TIMEOUT_SECS,
};
use crate::error::{StoreError, StoreResult};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use opendal::{layers::TimeoutLayer, Metadata, Metakey, Operator};
use std::time::Duration;

pub struct OpendalStore {
    operator: Operator,
    name: String,
}

impl OpendalStore {
    fn with_timeouts(operator: Operator) -> Operator {
        operator.layer(
            TimeoutLayer::default()
                .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
        )
    }

    pub fn fs(root: &str) -> Result<Self> {
        use opendal::services::Fs;

        std::fs::create_dir_all(root)?;
        let builder = Fs::default().root(root);
        let operator = Self::with_timeouts(Operator::new(builder)?.finish());

        Ok(Self {
            operator,
            name: format!("local:{}", root),
        })
    }

    pub fn s3(
        bucket: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        endpoint: Option<String>,
        prefix: Option<String>,
    ) -> Result<Self> {
        use opendal::services::S3;

        let mut builder = S3::default()
            .bucket(bucket)
            .region(region)
            .access_key_id(access_key)
            .secret_access_key(secret_key);

        if let Some(ref ep) = endpoint {
            builder = builder.endpoint(ep);
        }

        if let Some(ref p) = prefix {
            builder = builder.root(p);
        }

        let operator = Self::with_timeouts(Operator::new(builder)?.finish());

        let name = format!(
            "s3://{}{}",
            bucket,
            prefix
                .as_deref()
                .map(|p| format!("/{}", p))
                .unwrap_or_default()
        );

        Ok(Self { operator, name })
    }

    pub async fn webdav(
        endpoint: &str,
        username: &str,
        password: &str,
        root: Option<String>,
    ) -> Result<Self> {
        use opendal::services::Webdav;

        let mut builder = Webdav::default()
            .endpoint(endpoint)
            .username(username)
            .password(password);

        if let Some(ref r) = root {
            builder = builder.root(r);
        }

        let operator = Self::with_timeouts(Operator::new(builder)?.finish());

        let name = format!(
            "webdav://{}{}",
            endpoint.trim_end_matches('/'),
            root.as_deref()
                .map(|r| format!("/{}", r.trim_start_matches('/')))
                .unwrap_or_default()
        );

        // 某些 WebDAV 服务器需要先创建根目录，忽略错误
        let _ = operator.create_dir("/").await;

        Ok(Self { operator, name })
    }

    /// 规范化文件夹 ID：根为 `/`，其余以 `/` 结尾且不以 `/` 开头
    fn folder_path(id: &str) -> String {
        let trimmed = id.trim_matches('/');
        if trimmed.is_empty() {
            "/".to_string()
        } else {
            format!("{}/", trimmed)
        }
    }

    fn child_path(parent_id: &str, name: &str) -> String {
        match Self::folder_path(parent_id).as_str() {
            "/" => name.to_string(),
            parent => format!("{}{}", parent, name),
        }
    }

    fn base_name(path: &str) -> String {
        path.trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string()
    }

    fn to_entry(path: &str, meta: &Metadata) -> RemoteEntry {
        if meta.is_dir() {
            RemoteEntry {
                id: Self::folder_path(path),
                name: Self::base_name(path),
                mime_type: FOLDER_MIME_TYPE.to_string(),
                size: 0,
                checksum: None,
            }
        } else {
            RemoteEntry {
                id: path.trim_start_matches('/').to_string(),
                name: Self::base_name(path),
                mime_type: meta.content_type().unwrap_or(DEFAULT_MIME_TYPE).to_string(),
                size: meta.content_length(),
                checksum: meta.content_md5().map(|s| s.to_string()),
            }
        }
    }
}

#[async_trait]
impl RemoteStore for OpendalStore {
    /// OpenDAL 的 lister 自行处理分页，这里总是一次返回全部子项
    async fn list_children(
        &self,
        folder_id: &str,
        _page_token: Option<&str>,
    ) -> StoreResult<ListPage> {
        let folder = Self::folder_path(folder_id);

        let entries = self
            .operator
            .list_with(&folder)
            .metakey(Metakey::ContentLength | Metakey::Mode | Metakey::ContentType | Metakey::ContentMd5)
            .await?;

        let entries = entries
            .into_iter()
            .filter(|e| {
                let path = e.path();
                // 跳过文件夹自身
                !path.is_empty() && Self::folder_path(path) != folder
            })
            .map(|e| Self::to_entry(e.path(), e.metadata()))
            .collect();

        Ok(ListPage {
            entries,
            next_page_token: None,
        })
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> StoreResult<String> {
        let path = format!("{}/", Self::child_path(parent_id, name));
        self.operator.create_dir(&path).await?;
        Ok(path)
    }

    async fn copy_file(&self, file_id: &str, new_name: &str, parent_id: &str) -> StoreResult<String> {
        let to = Self::child_path(parent_id, new_name);
        self.operator.copy(file_id, &to).await?;
        Ok(to)
    }

    async fn delete_file(&self, id: &str) -> StoreResult<()> {
        if id.ends_with('/') {
            self.operator.remove_all(id).await?;
        } else {
            self.operator.delete(id).await?;
        }
        Ok(())
    }

    async fn download_file(&self, id: &str) -> StoreResult<Bytes> {
        let data = self.operator.read(id).await?;
        Ok(Bytes::from(data.to_vec()))
    }

    async fn upload_file(
        &self,
        name: &str,
        parent_id: &str,
        data: Bytes,
        _mime_type: &str,
    ) -> StoreResult<String> {
        let path = Self::child_path(parent_id, name);
        self.operator.write(&path, data.to_vec()).await?;
        Ok(path)
    }

    async fn get_metadata(&self, id: &str) -> StoreResult<RemoteEntry> {
        match self.operator.stat(id).await {
            Ok(meta) => Ok(Self::to_entry(id, &meta)),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => {
                Err(StoreError::NotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scanner::list_children_all;

    #[test]
    fn test_path_helpers() {
        assert_eq!(OpendalStore::folder_path(""), "/");
        assert_eq!(OpendalStore::folder_path("/photos"), "photos/");
        assert_eq!(OpendalStore::child_path("/", "a.txt"), "a.txt");
        assert_eq!(OpendalStore::child_path("photos/", "a.txt"), "photos/a.txt");
        assert_eq!(OpendalStore::base_name("photos/2024/"), "2024");
    }

    #[tokio::test]
    async fn test_fs_roundtrip_through_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = OpendalStore::fs(dir.path().to_str().unwrap()).unwrap();

        let folder = store.create_folder("docs", "/").await.unwrap();
        assert_eq!(folder, "docs/");

        let file = store
            .upload_file("a.txt", &folder, Bytes::from_static(b"hello"), "text/plain")
            .await
            .unwrap();
        let copied = store.copy_file(&file, "b.txt", &folder).await.unwrap();
        assert_eq!(copied, "docs/b.txt");

        let mut names: Vec<_> = list_children_all(&store, &folder)
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.name, e.size))
            .collect();
        names.sort();
        assert_eq!(names, vec![("a.txt".to_string(), 5), ("b.txt".to_string(), 5)]);

        let root = list_children_all(&store, "/").await.unwrap();
        assert!(root.iter().any(|e| e.is_folder() && e.name == "docs"));
    }
}
