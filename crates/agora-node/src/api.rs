use crate::auth;
use crate::config::NodeConfig;
use crate::node::AgoraNode;
use crate::x402;
use agora_escrow::{
    Credential, EscrowError, LifecycleEngine, ListingChanges, ListingFilter, ListingStatus,
    NewListing, TaskStore, TaskStatus,
};
use agora_ledger::LedgerClient;
use agora_types::{AccountAddress, ListingId, NativeAmount, TaskId};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    engine: Arc<LifecycleEngine>,
    store: Arc<dyn TaskStore>,
    ledger: Arc<dyn LedgerClient>,
    config: NodeConfig,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    task_id: Option<TaskId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<TaskStatus>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_reply(err: EscrowError, task_id: Option<TaskId>) -> ApiError {
    let code = match &err {
        EscrowError::Validation(_) => StatusCode::BAD_REQUEST,
        EscrowError::NotFound(_) => StatusCode::NOT_FOUND,
        // Missing credential vs. a credential that does not authorize.
        EscrowError::Unauthorized(msg) if msg.contains("missing") => StatusCode::UNAUTHORIZED,
        EscrowError::Unauthorized(_) => StatusCode::FORBIDDEN,
        EscrowError::PaymentNotVerified(_) => StatusCode::PAYMENT_REQUIRED,
        EscrowError::StateConflict { .. } => StatusCode::CONFLICT,
        EscrowError::LedgerTransient(_) => StatusCode::SERVICE_UNAVAILABLE,
        EscrowError::SettlementFailed(_) => StatusCode::BAD_GATEWAY,
        EscrowError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let status = match &err {
        EscrowError::StateConflict { current, .. } => Some(*current),
        _ => None,
    };

    (
        code,
        Json(ErrorResponse {
            error: err.to_string(),
            task_id,
            status,
        }),
    )
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/.well-known/x402", get(discovery))
        .route("/api/keys", post(create_key))
        .route("/api/listings", get(list_listings).post(create_listing))
        .route(
            "/api/listings/:id",
            get(get_listing)
                .put(update_listing)
                .delete(deactivate_listing),
        )
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route("/api/tasks/:id", get(get_task))
        .route("/api/tasks/:id/pay", post(pay_task))
        .route("/api/tasks/:id/complete", post(complete_task))
        .route("/api/tasks/:id/dispute", post(dispute_task))
        .route("/api/tasks/:id/cancel", post(cancel_task))
        .route("/api/tasks/:id/result", get(task_result))
        .route("/api/tasks/:id/escrow", get(task_escrow))
        .layer(axum::middleware::from_fn(x402::protocol_headers))
        .with_state(state)
}

pub fn start_api_server(node: &AgoraNode, host: String, port: u16) -> JoinHandle<()> {
    let state = Arc::new(AppState {
        engine: node.engine.clone(),
        store: node.store.clone(),
        ledger: node.ledger.clone(),
        config: node.config.clone(),
    });
    let app = router(state);

    let addr = format!("{}:{}", host, port);
    info!("Starting API server on {}", addr);

    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind API server");

        axum::serve(listener, app).await.expect("API server failed");
    })
}

// --- Health & discovery ---

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    let listings = state
        .store
        .list_listings(ListingFilter {
            active_only: true,
            ..Default::default()
        })
        .await
        .map_err(|e| error_reply(e, None))?
        .len();
    let tasks = state
        .store
        .count_tasks()
        .await
        .map_err(|e| error_reply(e, None))?;

    let platform = state.engine.context().platform_address();
    let balance = state.ledger.get_balance(platform).await.ok();

    Ok(Json(json!({
        "status": "ok",
        "listings": listings,
        "tasks": tasks,
        "network": state.config.ledger.network,
        "platform_fee_bps": state.config.escrow.platform_fee_bps,
        "escrow": {
            "authority_address": platform.to_string(),
            "balance_base_units": balance.map(|b| b.to_base_units()),
        },
    })))
}

async fn discovery(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(x402::discovery_document(
        &state.config,
        state.engine.context().platform_address(),
    ))
}

// --- Credentials ---

#[derive(Deserialize)]
struct CreateKeyRequest {
    owner_name: String,
}

async fn create_key(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateKeyRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if req.owner_name.trim().is_empty() {
        return Err(error_reply(
            EscrowError::Validation("owner_name required".to_string()),
            None,
        ));
    }

    let raw = auth::generate_credential();
    state
        .store
        .insert_credential(Credential {
            hash: auth::hash_credential(&raw),
            owner_name: req.owner_name,
            created_at: Utc::now(),
        })
        .await
        .map_err(|e| error_reply(e, None))?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "api_key": raw,
            "message": "Store this key — it will not be shown again.",
        })),
    ))
}

// --- Listings ---

#[derive(Deserialize)]
struct ListingsQuery {
    tag: Option<String>,
    search: Option<String>,
}

async fn list_listings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListingsQuery>,
) -> Result<Json<Vec<agora_escrow::Listing>>, ApiError> {
    let listings = state
        .store
        .list_listings(ListingFilter {
            active_only: true,
            tag: query.tag,
            search: query.search,
        })
        .await
        .map_err(|e| error_reply(e, None))?;
    Ok(Json(listings))
}

async fn get_listing(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<agora_escrow::Listing>, ApiError> {
    let listing = state
        .store
        .get_listing(ListingId(id))
        .await
        .map_err(|e| error_reply(e, None))?
        .ok_or_else(|| {
            error_reply(EscrowError::NotFound(format!("listing {}", id)), None)
        })?;
    Ok(Json(listing))
}

#[derive(Deserialize)]
struct CreateListingRequest {
    name: String,
    description: String,
    tags: Option<Vec<String>>,
    /// Price in base units of the native token.
    price: NativeAmount,
    payout_address: AccountAddress,
}

async fn create_listing(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateListingRequest>,
) -> Result<(StatusCode, Json<agora_escrow::Listing>), ApiError> {
    let (hash, _) = auth::require_credential(&headers, &state.store)
        .await
        .map_err(|e| error_reply(e, None))?;

    if req.name.trim().is_empty() || req.description.trim().is_empty() {
        return Err(error_reply(
            EscrowError::Validation("name and description required".to_string()),
            None,
        ));
    }

    let listing = state
        .store
        .insert_listing(NewListing {
            name: req.name,
            description: req.description,
            tags: req.tags.unwrap_or_default(),
            price: req.price,
            payout_address: req.payout_address,
            owner_credential: hash,
        })
        .await
        .map_err(|e| error_reply(e, None))?;

    Ok((StatusCode::CREATED, Json(listing)))
}

async fn owned_listing(
    state: &AppState,
    headers: &HeaderMap,
    id: u64,
) -> Result<agora_escrow::Listing, ApiError> {
    let (hash, _) = auth::require_credential(headers, &state.store)
        .await
        .map_err(|e| error_reply(e, None))?;

    let listing = state
        .store
        .get_listing(ListingId(id))
        .await
        .map_err(|e| error_reply(e, None))?
        .ok_or_else(|| {
            error_reply(EscrowError::NotFound(format!("listing {}", id)), None)
        })?;

    if listing.owner_credential != hash {
        return Err(error_reply(
            EscrowError::Unauthorized("not the listing owner".to_string()),
            None,
        ));
    }
    Ok(listing)
}

async fn update_listing(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    Json(changes): Json<ListingChanges>,
) -> Result<Json<agora_escrow::Listing>, ApiError> {
    let listing = owned_listing(&state, &headers, id).await?;

    let updated = state
        .store
        .update_listing(listing.id, changes)
        .await
        .map_err(|e| error_reply(e, None))?;
    Ok(Json(updated))
}

async fn deactivate_listing(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let listing = owned_listing(&state, &headers, id).await?;

    state
        .store
        .update_listing(
            listing.id,
            ListingChanges {
                status: Some(ListingStatus::Inactive),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| error_reply(e, None))?;

    Ok(Json(json!({ "message": "Listing deactivated" })))
}

// --- Tasks ---

#[derive(Deserialize)]
struct CreateTaskRequest {
    listing_id: ListingId,
    description: String,
    requester: Option<AccountAddress>,
}

async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTaskRequest>,
) -> Response {
    match state
        .engine
        .create_task(req.listing_id, req.description, req.requester)
        .await
    {
        // Creation never returns 201: funding always comes first.
        Ok(task) => x402::payment_required(&task, &state.config, None),
        Err(e) => error_reply(e, None).into_response(),
    }
}

#[derive(Deserialize)]
struct TasksQuery {
    hirer: Option<String>,
    listing: Option<u64>,
}

async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TasksQuery>,
) -> Result<Json<Vec<agora_escrow::Task>>, ApiError> {
    if let Some(hirer) = query.hirer {
        let address = AccountAddress::from_string(&hirer).map_err(|e| {
            error_reply(EscrowError::Validation(e.to_string()), None)
        })?;
        let tasks = state
            .store
            .tasks_by_requester(address)
            .await
            .map_err(|e| error_reply(e, None))?;
        return Ok(Json(tasks));
    }
    if let Some(listing) = query.listing {
        let tasks = state
            .store
            .tasks_by_listing(ListingId(listing))
            .await
            .map_err(|e| error_reply(e, None))?;
        return Ok(Json(tasks));
    }

    Err(error_reply(
        EscrowError::Validation("provide ?hirer=ADDRESS or ?listing=ID".to_string()),
        None,
    ))
}

async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<agora_escrow::Task>, ApiError> {
    let id = TaskId(id);
    let task = state
        .engine
        .get_task(id)
        .await
        .map_err(|e| error_reply(e, Some(id)))?;
    Ok(Json(task))
}

async fn pay_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> Response {
    let id = TaskId(id);
    let task = match state.engine.get_task(id).await {
        Ok(task) => task,
        Err(e) => return error_reply(e, Some(id)).into_response(),
    };

    let proof = match x402::proof_from_headers(&headers) {
        Some(proof) => proof,
        None => {
            return x402::payment_required(
                &task,
                &state.config,
                Some(format!(
                    "Missing {} header. Provide the transaction reference of your payment.",
                    x402::PROOF_HEADER
                )),
            )
        }
    };

    match state.engine.submit_payment(id, &proof).await {
        Ok(task) => Json(task).into_response(),
        Err(EscrowError::PaymentNotVerified(reason)) => x402::payment_required(
            &task,
            &state.config,
            Some(format!(
                "Payment verification failed: {}. Ensure correct amount and destination.",
                reason
            )),
        ),
        Err(e) => error_reply(e, Some(id)).into_response(),
    }
}

async fn complete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> Result<Json<agora_escrow::Task>, ApiError> {
    let id = TaskId(id);
    let task = state
        .engine
        .get_task(id)
        .await
        .map_err(|e| error_reply(e, Some(id)))?;

    let listing = owned_listing(&state, &headers, task.listing_id.as_u64())
        .await
        .map_err(|(code, body)| {
            // Ownership failures on complete are about the task's listing.
            if code == StatusCode::FORBIDDEN {
                error_reply(
                    EscrowError::Unauthorized("must be the listing owner".to_string()),
                    Some(id),
                )
            } else {
                (code, body)
            }
        })?;
    debug_assert_eq!(listing.id, task.listing_id);

    let task = state
        .engine
        .finish_work(id, None)
        .await
        .map_err(|e| error_reply(e, Some(id)))?;
    Ok(Json(task))
}

async fn dispute_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<agora_escrow::Task>, ApiError> {
    let id = TaskId(id);
    let task = state
        .engine
        .dispute(id)
        .await
        .map_err(|e| error_reply(e, Some(id)))?;
    Ok(Json(task))
}

async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<agora_escrow::Task>, ApiError> {
    let id = TaskId(id);
    let task = state
        .engine
        .cancel(id)
        .await
        .map_err(|e| error_reply(e, Some(id)))?;
    Ok(Json(task))
}

async fn task_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = TaskId(id);
    let task = state
        .engine
        .get_task(id)
        .await
        .map_err(|e| error_reply(e, Some(id)))?;
    let listing = state
        .store
        .get_listing(task.listing_id)
        .await
        .map_err(|e| error_reply(e, Some(id)))?;

    Ok(Json(json!({
        "id": task.id,
        "status": task.status,
        "description": task.description,
        "listing_name": listing.map(|l| l.name),
        "result": task.result,
        "result_at": task.result_at,
        "payment_proof": task.payment_proof,
        "settlement_ref": task.settlement_ref,
        "settlement": task.settlement,
        "escrow_amount": task.escrow_amount,
        "escrow_address": task.escrow_address,
        "created_at": task.created_at,
        "payment_verified_at": task.payment_verified_at,
        "updated_at": task.updated_at,
    })))
}

async fn task_escrow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = TaskId(id);
    let info = state
        .engine
        .escrow_info(id)
        .await
        .map_err(|e| error_reply(e, Some(id)))?;

    Ok(Json(json!({
        "task_id": info.task_id,
        "escrow_address": info.escrow_address,
        "balance_base_units": info.balance.to_base_units(),
        "status": info.status,
    })))
}
