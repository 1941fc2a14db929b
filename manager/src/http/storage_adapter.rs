//! Storage adapter API client

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::clients::{KeyValueStore, StoredValue};
use crate::errors::ManagerError;
use crate::http::client::HttpClient;

/// Value as exchanged with the storage adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ValueApiModel {
    #[serde(default)]
    pub key: String,

    pub data: String,

    #[serde(default, rename = "ETag")]
    pub etag: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ValueListApiModel {
    #[serde(default)]
    pub items: Vec<ValueApiModel>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct WriteRequest<'a> {
    data: &'a str,

    #[serde(rename = "ETag", skip_serializing_if = "Option::is_none")]
    etag: Option<&'a str>,
}

impl From<ValueApiModel> for StoredValue {
    fn from(value: ValueApiModel) -> Self {
        StoredValue {
            key: value.key,
            data: value.data,
            etag: value.etag,
        }
    }
}

#[async_trait]
impl KeyValueStore for HttpClient {
    async fn get(&self, collection: &str, key: &str) -> Result<StoredValue, ManagerError> {
        let url = self.url(&["collections", collection, "values", key])?;
        let value: ValueApiModel = self.send(Method::GET, url, None::<&()>).await?;
        Ok(value.into())
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<StoredValue>, ManagerError> {
        let url = self.url(&["collections", collection, "values"])?;
        match self.send::<ValueListApiModel, ()>(Method::GET, url, None).await {
            Ok(list) => Ok(list.items.into_iter().map(StoredValue::from).collect()),
            // An empty collection does not exist yet
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, collection: &str, data: &str) -> Result<StoredValue, ManagerError> {
        let url = self.url(&["collections", collection, "values"])?;
        let request = WriteRequest { data, etag: None };
        let value: ValueApiModel = self.send(Method::POST, url, Some(&request)).await?;
        Ok(value.into())
    }

    async fn update(
        &self,
        collection: &str,
        key: &str,
        data: &str,
        etag: Option<&str>,
    ) -> Result<StoredValue, ManagerError> {
        let url = self.url(&["collections", collection, "values", key])?;
        let request = WriteRequest { data, etag };
        let value: ValueApiModel = self.send(Method::PUT, url, Some(&request)).await?;
        Ok(value.into())
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<(), ManagerError> {
        let url = self.url(&["collections", collection, "values", key])?;
        match self.send_empty(Method::DELETE, url, None::<&()>).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }
}
