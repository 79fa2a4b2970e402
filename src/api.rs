use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Router,
};
use chrono::Utc;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::app::App;
use crate::error::ReviewError;
use crate::models::{CardEdit, Flashcard, NewFlashcard};
use crate::srs::MasteryTransition;

/// One mutex around the whole app serializes reviews per card and counter
/// updates per deck.
#[derive(Clone)]
pub struct ApiState {
    pub app: Arc<Mutex<App>>,
}

impl ApiState {
    pub fn new(app: App) -> Self {
        Self {
            app: Arc::new(Mutex::new(app)),
        }
    }
}

pub fn app_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/decks", get(list_decks).post(create_deck))
        .route("/api/decks/:id", get(get_deck).delete(delete_deck))
        .route("/api/decks/:id/cards", post(add_card))
        .route("/api/cards/:id", patch(edit_card).delete(delete_card))
        .route("/api/cards/:id/preview", get(preview_card))
        .route("/api/due", get(get_due))
        .route("/api/review", post(submit_review))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Maps engine errors to status codes; anything else is a storage failure.
pub struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError(e)
    }
}

impl From<ReviewError> for ApiError {
    fn from(e: ReviewError) -> Self {
        ApiError(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<ReviewError>() {
            Some(ReviewError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            Some(ReviewError::CardNotFound(_)) | Some(ReviewError::DeckNotFound(_)) => StatusCode::NOT_FOUND,
            Some(ReviewError::ConsistencyViolation(_)) => {
                log::error!("{:#}", self.0);
                StatusCode::INTERNAL_SERVER_ERROR
            }
            None => {
                log::error!("request failed: {:#}", self.0);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = ErrorBody {
            error: format!("{:#}", self.0),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateDeckRequest {
    name: String,
    #[serde(default)]
    subject_id: Option<Uuid>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DueQuery {
    #[serde(default)]
    deck_id: Option<Uuid>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    shuffle: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewRequest {
    card_id: Uuid,
    correct: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReviewResponse {
    card: Flashcard,
    transition: MasteryTransition,
    interval_days: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteDeckResponse {
    deleted_cards: usize,
}

async fn list_decks(State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    let app = state.app.lock().await;
    Ok(Json(app.deck_summaries(Utc::now())?))
}

async fn create_deck(
    State(state): State<ApiState>,
    Json(payload): Json<CreateDeckRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut app = state.app.lock().await;
    let deck = app.create_deck(payload.name, payload.subject_id, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(deck)))
}

async fn get_deck(State(state): State<ApiState>, Path(id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    let app = state.app.lock().await;
    let summary = app.session.deck_summary(id, Utc::now())?;
    Ok(Json(summary))
}

async fn delete_deck(State(state): State<ApiState>, Path(id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    let mut app = state.app.lock().await;
    let deleted_cards = app.delete_deck(id).await?;
    Ok(Json(DeleteDeckResponse { deleted_cards }))
}

async fn add_card(
    State(state): State<ApiState>,
    Path(deck_id): Path<Uuid>,
    Json(payload): Json<NewFlashcard>,
) -> ApiResult<impl IntoResponse> {
    let mut app = state.app.lock().await;
    let card = app.add_card(deck_id, payload, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(card)))
}

async fn edit_card(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CardEdit>,
) -> ApiResult<impl IntoResponse> {
    if payload.is_empty() {
        return Err(ReviewError::InvalidInput("edit changes nothing".to_string()).into());
    }
    let mut app = state.app.lock().await;
    Ok(Json(app.edit_card(id, &payload).await?))
}

async fn delete_card(State(state): State<ApiState>, Path(id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    let mut app = state.app.lock().await;
    app.delete_card(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn preview_card(State(state): State<ApiState>, Path(id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    let app = state.app.lock().await;
    Ok(Json(app.preview(id, Utc::now())?))
}

async fn get_due(State(state): State<ApiState>, Query(query): Query<DueQuery>) -> ApiResult<impl IntoResponse> {
    let app = state.app.lock().await;
    let mut cards = app.study_queue(query.deck_id, Utc::now(), query.limit)?;

    // Interleaved practice
    if query.shuffle {
        cards.shuffle(&mut rand::thread_rng());
    }
    Ok(Json(cards))
}

async fn submit_review(
    State(state): State<ApiState>,
    Json(payload): Json<ReviewRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut app = state.app.lock().await;
    let now = Utc::now();
    let outcome = app.review_card(payload.card_id, payload.correct, now).await?;

    let interval_days = outcome
        .card
        .next_review_at
        .map(|at| (at - now).num_days())
        .unwrap_or(0);

    Ok(Json(ReviewResponse {
        card: outcome.card,
        transition: outcome.transition,
        interval_days,
    }))
}
