//! HTTP client for the nutrilog server.
//!
//! Reads and writes go over JSON REST endpoints; the change feed is a
//! WebSocket on which every frame means "this user's records changed".

use chrono::NaiveDate;
use futures::future;
use futures::stream::{BoxStream, StreamExt};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{ChangeFeed, FoodCatalog, RemoteStore, StoreError, StoreResult};
use crate::models::{ChangeSignal, DaySummary, Food, ItemWrite, MealAggregate, Nutrients, StoredItem};

#[derive(Debug, Deserialize)]
struct CreatedResponse {
    id: String,
}

/// Client for the nutrilog server's store, catalog and feed endpoints.
#[derive(Debug, Clone)]
pub struct HttpStore {
    server_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpStore {
    pub fn new(server_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Returns true if the server answers its health check.
    pub async fn check_health(&self) -> bool {
        match self.client.get(self.build_http_url("/health")).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    fn day_path(user_id: &str, date: NaiveDate, suffix: &str) -> String {
        format!(
            "/users/{}/days/{}{}",
            urlencoding::encode(user_id),
            date,
            suffix
        )
    }

    fn item_path(item_id: &str) -> String {
        format!("/items/{}", urlencoding::encode(item_id))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> StoreResult<T> {
        let response = self
            .client
            .get(self.build_http_url(path))
            .bearer_auth(&self.api_key)
            .query(query)
            .send()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    /// Builds an HTTP URL for a given path.
    fn build_http_url(&self, path: &str) -> String {
        let base_url = if self.server_url.starts_with("ws://") {
            self.server_url.replace("ws://", "http://")
        } else if self.server_url.starts_with("wss://") {
            self.server_url.replace("wss://", "https://")
        } else if !self.server_url.starts_with("http://")
            && !self.server_url.starts_with("https://")
        {
            format!("http://{}", self.server_url)
        } else {
            self.server_url.clone()
        };

        format!("{}{}", base_url.trim_end_matches('/'), path)
    }

    /// Builds the WebSocket URL of a user's change feed.
    fn build_ws_url(&self, user_id: &str) -> String {
        let base_url = if self.server_url.starts_with("http://") {
            self.server_url.replace("http://", "ws://")
        } else if self.server_url.starts_with("https://") {
            self.server_url.replace("https://", "wss://")
        } else if !self.server_url.starts_with("ws://") && !self.server_url.starts_with("wss://") {
            format!("ws://{}", self.server_url)
        } else {
            self.server_url.clone()
        };

        format!(
            "{}/users/{}/feed?key={}",
            base_url.trim_end_matches('/'),
            urlencoding::encode(user_id),
            urlencoding::encode(&self.api_key)
        )
    }
}

async fn check_status(response: Response) -> StoreResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    if status == StatusCode::NOT_FOUND {
        return Err(StoreError::NotFound(message));
    }
    Err(StoreError::Status {
        status: status.as_u16(),
        message,
    })
}

impl RemoteStore for HttpStore {
    async fn fetch_day(&self, user_id: &str, date: NaiveDate) -> StoreResult<Option<Nutrients>> {
        self.get_json(&Self::day_path(user_id, date, ""), &[]).await
    }

    async fn fetch_meals(&self, user_id: &str, date: NaiveDate) -> StoreResult<Vec<MealAggregate>> {
        self.get_json(&Self::day_path(user_id, date, "/meals"), &[])
            .await
    }

    async fn fetch_items(&self, user_id: &str, date: NaiveDate) -> StoreResult<Vec<StoredItem>> {
        self.get_json(&Self::day_path(user_id, date, "/items"), &[])
            .await
    }

    async fn fetch_history(
        &self,
        user_id: &str,
        end: NaiveDate,
        days: u32,
    ) -> StoreResult<Vec<DaySummary>> {
        let path = format!("/users/{}/history", urlencoding::encode(user_id));
        self.get_json(&path, &[("end", end.to_string()), ("days", days.to_string())])
            .await
    }

    async fn create_item(
        &self,
        user_id: &str,
        date: NaiveDate,
        item: &ItemWrite,
    ) -> StoreResult<String> {
        let response = self
            .client
            .post(self.build_http_url(&Self::day_path(user_id, date, "/items")))
            .bearer_auth(&self.api_key)
            .json(item)
            .send()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let created: CreatedResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(created.id)
    }

    async fn update_item(&self, item_id: &str, item: &ItemWrite) -> StoreResult<()> {
        let response = self
            .client
            .put(self.build_http_url(&Self::item_path(item_id)))
            .bearer_auth(&self.api_key)
            .json(item)
            .send()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        check_status(response).await.map(|_| ())
    }

    async fn delete_item(&self, item_id: &str) -> StoreResult<()> {
        let response = self
            .client
            .delete(self.build_http_url(&Self::item_path(item_id)))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        check_status(response).await.map(|_| ())
    }
}

impl FoodCatalog for HttpStore {
    async fn search_foods(&self, fragment: &str, limit: usize) -> StoreResult<Vec<Food>> {
        self.get_json(
            "/foods",
            &[("q", fragment.to_string()), ("limit", limit.to_string())],
        )
        .await
    }
}

impl ChangeFeed for HttpStore {
    async fn subscribe(&self, user_id: &str) -> StoreResult<BoxStream<'static, ChangeSignal>> {
        let (ws_stream, _) = connect_async(self.build_ws_url(user_id))
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        tracing::debug!("Subscribed to change feed for {}", user_id);

        // The stream ends on close or transport error; the listener resubscribes.
        let signals = ws_stream
            .take_while(|msg| future::ready(matches!(msg, Ok(m) if !m.is_close())))
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(_)) | Ok(Message::Binary(_)) => Some(ChangeSignal),
                    _ => None,
                })
            });

        Ok(signals.boxed())
    }
}
