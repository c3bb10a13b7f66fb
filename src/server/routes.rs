//! HTTP and WebSocket endpoints of the remote store.
//!
//! - `GET /health`: Health check endpoint (no auth required)
//! - `GET /foods?q=&limit=`: Catalog search
//! - `GET /users/{user}/days/{date}`: Day totals, `null` when nothing was recorded
//! - `GET /users/{user}/days/{date}/meals`: Per-meal totals
//! - `GET /users/{user}/days/{date}/items`: Itemized records
//! - `POST /users/{user}/days/{date}/items`: Create a record, returns `{ "id": ... }`
//! - `GET /users/{user}/history?end=&days=`: Trailing daily summaries
//! - `PUT /items/{id}`, `DELETE /items/{id}`: Modify a record
//! - `GET /users/{user}/feed`: WebSocket change feed

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, put},
    Extension, Json, Router,
};
use chrono::{NaiveDate, Utc};
use nutrilog_core::{DaySummary, Food, ItemWrite, MealAggregate, Nutrients, StoredItem};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use super::auth::{auth_middleware, ApiKeyStore, AuthUser};
use super::feed::{Changed, FeedHub};
use super::storage::{ServerStorage, ServerStorageError};

const DEFAULT_SEARCH_LIMIT: u32 = 20;
const MAX_SEARCH_LIMIT: u32 = 100;
const DEFAULT_HISTORY_DAYS: u32 = 7;
const MAX_HISTORY_DAYS: u32 = 366;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub storage: ServerStorage,
    pub hub: Arc<FeedHub>,
    pub api_keys: Arc<ApiKeyStore>,
}

impl AppState {
    pub fn new(storage: ServerStorage, api_keys: ApiKeyStore) -> Self {
        Self {
            storage,
            hub: Arc::new(FeedHub::new()),
            api_keys: Arc::new(api_keys),
        }
    }
}

/// Builds the full router: public health check plus authenticated API.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new().route("/health", get(health));

    let protected_routes = Router::new()
        .route("/foods", get(search_foods))
        .route("/users/{user}/days/{date}", get(day_totals))
        .route("/users/{user}/days/{date}/meals", get(meal_totals))
        .route(
            "/users/{user}/days/{date}/items",
            get(list_items).post(create_item),
        )
        .route("/users/{user}/history", get(history))
        .route("/users/{user}/feed", get(feed))
        .route("/items/{id}", put(update_item).delete(delete_item))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
enum ApiError {
    Forbidden,
    NotFound(String),
    BadRequest(String),
    Storage(ServerStorageError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl From<ServerStorageError> for ApiError {
    fn from(e: ServerStorageError) -> Self {
        match e {
            ServerStorageError::NotFound(id) => ApiError::NotFound(id),
            other => ApiError::Storage(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                "forbidden",
                "API key does not grant access to these records".to_string(),
            ),
            ApiError::NotFound(id) => (
                StatusCode::NOT_FOUND,
                "not_found",
                format!("Item not found: {}", id),
            ),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, "bad_request", message),
            ApiError::Storage(e) => {
                tracing::error!("Storage error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "storage_error",
                    e.to_string(),
                )
            }
        };
        (status, Json(ErrorBody { error, message })).into_response()
    }
}

fn require_owner(auth: &AuthUser, user_id: &str) -> Result<(), ApiError> {
    if auth.owns(user_id) {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

fn validate_write(item: &ItemWrite) -> Result<(), ApiError> {
    let n = item.nutrients;
    let numbers = [item.mass, n.energy, n.carbohydrate, n.protein, n.fat];
    if !numbers.iter().all(|v| v.is_finite()) {
        return Err(ApiError::BadRequest("values must be finite".to_string()));
    }
    if item.mass <= 0.0 {
        return Err(ApiError::BadRequest("mass must be positive".to_string()));
    }
    if item.food_id.trim().is_empty() {
        return Err(ApiError::BadRequest("food_id is required".to_string()));
    }
    Ok(())
}

/// Looks up the record's owner and checks the caller is it.
async fn authorize_item(state: &AppState, auth: &AuthUser, id: &str) -> Result<String, ApiError> {
    let owner = state
        .storage
        .item_owner(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(id.to_string()))?;
    require_owner(auth, &owner)?;
    Ok(owner)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
    limit: Option<u32>,
}

async fn search_foods(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Food>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .clamp(1, MAX_SEARCH_LIMIT);
    Ok(Json(state.storage.search_foods(&query.q, limit).await?))
}

async fn day_totals(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path((user, date)): Path<(String, NaiveDate)>,
) -> Result<Json<Option<Nutrients>>, ApiError> {
    require_owner(&auth, &user)?;
    Ok(Json(state.storage.day_totals(&user, date).await?))
}

async fn meal_totals(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path((user, date)): Path<(String, NaiveDate)>,
) -> Result<Json<Vec<MealAggregate>>, ApiError> {
    require_owner(&auth, &user)?;
    Ok(Json(state.storage.meal_totals(&user, date).await?))
}

async fn list_items(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path((user, date)): Path<(String, NaiveDate)>,
) -> Result<Json<Vec<StoredItem>>, ApiError> {
    require_owner(&auth, &user)?;
    Ok(Json(state.storage.items(&user, date).await?))
}

#[derive(Deserialize)]
struct HistoryQuery {
    end: Option<NaiveDate>,
    days: Option<u32>,
}

async fn history(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(user): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<DaySummary>>, ApiError> {
    require_owner(&auth, &user)?;
    let end = query.end.unwrap_or_else(|| Utc::now().date_naive());
    let days = query
        .days
        .unwrap_or(DEFAULT_HISTORY_DAYS)
        .clamp(1, MAX_HISTORY_DAYS);
    Ok(Json(state.storage.history(&user, end, days).await?))
}

#[derive(Serialize)]
struct CreatedResponse {
    id: String,
}

async fn create_item(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path((user, date)): Path<(String, NaiveDate)>,
    Json(item): Json<ItemWrite>,
) -> Result<(StatusCode, Json<CreatedResponse>), ApiError> {
    require_owner(&auth, &user)?;
    validate_write(&item)?;

    let id = state.storage.create_item(&user, date, &item).await?;
    tracing::debug!("Created item {} for {} on {}", id, user, date);
    state.hub.notify(&user).await;

    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

async fn update_item(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(item): Json<ItemWrite>,
) -> Result<StatusCode, ApiError> {
    validate_write(&item)?;
    let owner = authorize_item(&state, &auth, &id).await?;

    state.storage.update_item(&id, &item).await?;
    tracing::debug!("Updated item {}", id);
    state.hub.notify(&owner).await;

    Ok(StatusCode::NO_CONTENT)
}

async fn delete_item(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let owner = authorize_item(&state, &auth, &id).await?;

    state.storage.delete_item(&id).await?;
    tracing::debug!("Deleted item {}", id);
    state.hub.notify(&owner).await;

    Ok(StatusCode::NO_CONTENT)
}

async fn feed(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(user): Path<String>,
) -> Result<Response, ApiError> {
    require_owner(&auth, &user)?;
    // Subscribe before the upgrade so no change slips between handshake and loop.
    let changes = state.hub.subscribe(&user).await;
    Ok(ws.on_upgrade(move |socket| stream_changes(socket, changes, user)))
}

/// Sends one frame per change until either side goes away.
async fn stream_changes(
    mut socket: WebSocket,
    mut changes: broadcast::Receiver<Changed>,
    user_id: String,
) {
    tracing::debug!("Feed opened for {}", user_id);

    loop {
        tokio::select! {
            change = changes.recv() => match change {
                // A lagged receiver still owes the client a re-read.
                Ok(Changed) | Err(broadcast::error::RecvError::Lagged(_)) => {
                    if socket.send(Message::Text("changed".into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::debug!("Feed closed for {}", user_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use nutrilog_core::{
        ChangeFeedListener, FoodIntent, HttpStore, Ledger, LedgerOptions, ListenerOptions,
        MealType, RemoteStore,
    };
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const ALICE_KEY: &str = "alice-key";
    const BOB_KEY: &str = "bob-key";

    async fn setup() -> (AppState, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = ServerStorage::open(temp_dir.path()).await.unwrap();
        storage
            .upsert_food(
                &Food::new("toast", "Toast", Nutrients::new(265.0, 49.0, 9.0, 3.2))
                    .with_mass_per_unit(30.0),
            )
            .await
            .unwrap();
        let keys = ApiKeyStore::from_pairs([
            (ALICE_KEY.to_string(), "alice".to_string()),
            (BOB_KEY.to_string(), "bob".to_string()),
        ]);
        (AppState::new(storage, keys), temp_dir)
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, 20).unwrap()
    }

    fn write(energy: f64) -> ItemWrite {
        ItemWrite {
            meal_type: MealType::Breakfast,
            food_id: "toast".to_string(),
            food_name: "Toast".to_string(),
            mass: 60.0,
            nutrients: Nutrients::new(energy, 29.4, 5.4, 1.9),
        }
    }

    fn get(uri: &str, key: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", key))
            .body(Body::empty())
            .unwrap()
    }

    fn send_json(method: &str, uri: &str, key: &str, item: &ItemWrite) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", key))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(item).unwrap()))
            .unwrap()
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn create(state: &AppState, energy: f64) -> String {
        let response = router(state.clone())
            .oneshot(send_json(
                "POST",
                "/users/alice/days/2025-05-20/items",
                ALICE_KEY,
                &write(energy),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body: serde_json::Value = json(response).await;
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let (state, _temp) = setup().await;
        let response = router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_or_bad_key_is_unauthorized() {
        let (state, _temp) = setup().await;

        let response = router(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/foods?q=t")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router(state)
            .oneshot(get("/foods?q=t", "wrong"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_query_key_is_accepted() {
        let (state, _temp) = setup().await;
        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/foods?q=toa&key=alice-key")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let foods: Vec<Food> = json(response).await;
        assert_eq!(foods.len(), 1);
        assert_eq!(foods[0].mass_per_unit, Some(30.0));
    }

    #[tokio::test]
    async fn test_create_then_read_views() {
        let (state, _temp) = setup().await;
        create(&state, 159.0).await;
        create(&state, 41.0).await;

        let response = router(state.clone())
            .oneshot(get("/users/alice/days/2025-05-20", ALICE_KEY))
            .await
            .unwrap();
        let day: Option<Nutrients> = json(response).await;
        assert_eq!(day.unwrap().energy, 200.0);

        let response = router(state.clone())
            .oneshot(get("/users/alice/days/2025-05-20/meals", ALICE_KEY))
            .await
            .unwrap();
        let meals: Vec<MealAggregate> = json(response).await;
        assert_eq!(meals.len(), 1);
        assert_eq!(meals[0].totals.energy, 200.0);

        let response = router(state.clone())
            .oneshot(get("/users/alice/days/2025-05-20/items", ALICE_KEY))
            .await
            .unwrap();
        let items: Vec<StoredItem> = json(response).await;
        assert_eq!(items.len(), 2);

        let response = router(state)
            .oneshot(get("/users/alice/history?end=2025-05-20&days=3", ALICE_KEY))
            .await
            .unwrap();
        let history: Vec<DaySummary> = json(response).await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].totals.energy, 200.0);
    }

    #[tokio::test]
    async fn test_empty_day_is_null() {
        let (state, _temp) = setup().await;
        let response = router(state)
            .oneshot(get("/users/alice/days/2025-05-21", ALICE_KEY))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let day: Option<Nutrients> = json(response).await;
        assert!(day.is_none());
    }

    #[tokio::test]
    async fn test_other_users_records_are_forbidden() {
        let (state, _temp) = setup().await;
        let id = create(&state, 100.0).await;

        let response = router(state.clone())
            .oneshot(get("/users/alice/days/2025-05-20/items", BOB_KEY))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = router(state)
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/items/{}", id))
                    .header(header::AUTHORIZATION, format!("Bearer {}", BOB_KEY))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_update_and_delete_notify_subscribers() {
        let (state, _temp) = setup().await;
        let id = create(&state, 100.0).await;
        let mut changes = state.hub.subscribe("alice").await;

        let response = router(state.clone())
            .oneshot(send_json(
                "PUT",
                &format!("/items/{}", id),
                ALICE_KEY,
                &write(300.0),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(changes.try_recv().is_ok());

        let response = router(state.clone())
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/items/{}", id))
                    .header(header::AUTHORIZATION, format!("Bearer {}", ALICE_KEY))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(changes.try_recv().is_ok());

        assert_eq!(state.storage.day_totals("alice", date()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_item_is_not_found() {
        let (state, _temp) = setup().await;
        let response = router(state)
            .oneshot(send_json("PUT", "/items/999", ALICE_KEY, &write(1.0)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_write_is_rejected() {
        let (state, _temp) = setup().await;
        let mut item = write(100.0);
        item.mass = 0.0;

        let response = router(state)
            .oneshot(send_json(
                "POST",
                "/users/alice/days/2025-05-20/items",
                ALICE_KEY,
                &item,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    async fn serve(state: AppState) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_ledger_over_http() {
        let (state, _temp) = setup().await;
        let url = serve(state).await;
        let store = Arc::new(HttpStore::new(url, ALICE_KEY));
        assert!(store.check_health().await);

        let (ledger, report) =
            Ledger::open(Arc::clone(&store), "alice", date(), LedgerOptions::default()).await;
        assert!(report.is_complete());

        let toast = Food::new("toast", "Toast", Nutrients::new(265.0, 49.0, 9.0, 3.2))
            .with_mass_per_unit(30.0);
        let id = ledger
            .add_food(FoodIntent::new(MealType::Breakfast, toast.clone(), 2.0))
            .await
            .unwrap();
        let local = ledger.snapshot();

        let report = ledger.refresh().await;
        assert!(report.is_complete());
        let remote = ledger.snapshot();
        assert!(local.day().approx_eq(&remote.day(), 1e-9));
        assert_eq!(remote.find(&id).unwrap().mass, 60.0);
        assert!(remote.is_consistent(1e-9));

        ledger.delete_food(&id).await.unwrap();
        ledger.refresh().await;
        assert!(ledger.snapshot().items().is_empty());
        ledger.close();
    }

    #[tokio::test]
    async fn test_change_feed_over_websocket() {
        let (state, _temp) = setup().await;
        let hub = Arc::clone(&state.hub);
        let url = serve(state).await;
        let store = Arc::new(HttpStore::new(url, ALICE_KEY));

        let (watcher, _) =
            Ledger::open(Arc::clone(&store), "alice", date(), LedgerOptions::default()).await;
        let options = ListenerOptions {
            debounce: Duration::from_millis(20),
            retry_delay: Duration::from_millis(50),
        };
        let _handle = ChangeFeedListener::spawn(watcher.clone(), Arc::clone(&store), options);

        // Wait until the socket is registered with the hub.
        tokio::time::timeout(Duration::from_secs(5), async {
            while hub.receiver_count("alice").await == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        store.create_item("alice", date(), &write(120.0)).await.unwrap();

        let mut changes = watcher.subscribe();
        tokio::time::timeout(Duration::from_secs(5), async {
            while changes.borrow_and_update().items().is_empty() {
                changes.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        assert_eq!(watcher.snapshot().day().energy, 120.0);
    }
}
