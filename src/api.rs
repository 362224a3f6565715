// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP interface of the daemon
//!
//! `POST /update` asks the worker for a cycle and returns at once. The other
//! routes are read-only views of the store; subscriptions are managed
//! through the config file.

use std::future::Future;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::StoreError;
use crate::model::{Episode, Podcast, StatusCounts};
use crate::store::EpisodeStore;
use crate::worker::{CycleTrigger, TriggerOutcome};

/// Shared handles for the request handlers
#[derive(Clone)]
pub struct ApiState {
    store: Arc<dyn EpisodeStore>,
    trigger: CycleTrigger,
}

impl ApiState {
    pub fn new(store: Arc<dyn EpisodeStore>, trigger: CycleTrigger) -> Self {
        Self { store, trigger }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Podcast '{0}' not found")]
    PodcastNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::PodcastNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Store(e) => {
                error!(error = %e, "Store error while serving request");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct UpdateResponse {
    pub outcome: TriggerOutcome,
}

/// A podcast together with its episode counts
#[derive(Debug, Serialize)]
pub struct PodcastView {
    #[serde(flatten)]
    pub podcast: Podcast,
    pub episodes: StatusCounts,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/update", post(request_update))
        .route("/podcasts", get(list_podcasts))
        .route("/podcasts/{name}", get(get_podcast))
        .route("/podcasts/{name}/episodes", get(list_episodes))
        .with_state(state)
}

/// Serve the API on `listener` until `shutdown` completes
pub async fn serve(
    listener: TcpListener,
    state: ApiState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "HTTP interface listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn request_update(State(state): State<ApiState>) -> (StatusCode, Json<UpdateResponse>) {
    let outcome = state.trigger.request();
    let status = match outcome {
        TriggerOutcome::Queued => StatusCode::ACCEPTED,
        TriggerOutcome::Busy => StatusCode::CONFLICT,
        TriggerOutcome::Stopped => StatusCode::SERVICE_UNAVAILABLE,
    };
    info!(?outcome, "Cycle requested over HTTP");
    (status, Json(UpdateResponse { outcome }))
}

fn view(store: &dyn EpisodeStore, podcast: Podcast) -> ApiResult<PodcastView> {
    let episodes = store.status_counts(&podcast.name)?;
    Ok(PodcastView { podcast, episodes })
}

fn find_podcast(store: &dyn EpisodeStore, name: &str) -> ApiResult<Podcast> {
    store
        .list_podcasts()?
        .into_iter()
        .find(|p| p.name == name)
        .ok_or_else(|| ApiError::PodcastNotFound(name.to_string()))
}

async fn list_podcasts(State(state): State<ApiState>) -> ApiResult<Json<Vec<PodcastView>>> {
    let store = state.store.as_ref();
    let views = store
        .list_podcasts()?
        .into_iter()
        .map(|podcast| view(store, podcast))
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(Json(views))
}

async fn get_podcast(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> ApiResult<Json<PodcastView>> {
    let store = state.store.as_ref();
    let podcast = find_podcast(store, &name)?;
    Ok(Json(view(store, podcast)?))
}

/// Episodes of one podcast, newest first
async fn list_episodes(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Vec<Episode>>> {
    let store = state.store.as_ref();
    let podcast = find_podcast(store, &name)?;
    let mut episodes = store.list_episodes_for_podcast(&podcast.name)?;
    episodes.reverse();
    Ok(Json(episodes))
}
