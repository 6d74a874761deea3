use crate::catalog::{CatalogApi, CatalogError, CatalogRecord, TmdbClient};
use crate::enrich;
use crate::favorites::{FavoritesError, FavoritesStore, RestFavoritesCollection};
use crate::models::{MediaItem, MediaType};
use crate::session::{IdentityProvider, RestIdentityProvider, SessionState};
use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::RwLock;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info};

const MAX_BODY_BYTES: usize = 64 * 1024;
const LOGIN_PROMPT: &str = "Inicia sesión para ver tus reservas.";

/// Everything a handler needs, injected explicitly. One instance is built at
/// startup and lives for the process lifetime.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<dyn CatalogApi>,
    pub identity: Arc<dyn IdentityProvider>,
    pub favorites: Arc<FavoritesStore>,
    pub search: Arc<RwLock<SearchState>>,
}

/// The last submitted search, shared by the submit and results routes.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SearchState {
    pub query: Option<String>,
    pub results: Vec<MediaItem>,
}

pub async fn run_server() -> Result<()> {
    let catalog: Arc<dyn CatalogApi> = Arc::new(TmdbClient::from_env()?);
    let identity = Arc::new(RestIdentityProvider::from_env()?);
    let collection = Arc::new(RestFavoritesCollection::from_env()?);
    let favorites = FavoritesStore::start(collection, identity.sessions());

    let state = AppState {
        catalog,
        identity: identity.clone(),
        favorites,
        search: Arc::new(RwLock::new(SearchState::default())),
    };

    // Subscribers are wired; let the provider report its startup resolution.
    identity.resolve_startup();

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 3152));
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/busqueda-personalizada",
            get(search_results).post(submit_search),
        )
        .route("/", get(home))
        .route("/peliculas", get(peliculas))
        .route("/series", get(series))
        .route("/login", post(login))
        .route("/registro", post(registro))
        .route("/logout", post(logout))
        .route("/sesion", get(sesion))
        .route("/mi-reserva", get(mi_reserva).post(save_favorite))
        .route("/mi-reserva/:id", delete(remove_favorite))
        .route("/mi-reserva/compartir", get(compartir))
        .route("/health", get(health))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Debug, Serialize)]
struct HomePayload {
    hero: Option<MediaItem>,
    movies: Vec<MediaItem>,
    series: Vec<MediaItem>,
}

/// A feed that fails degrades to an empty list; the page still renders.
fn degraded(result: Result<Vec<CatalogRecord>, CatalogError>) -> Vec<CatalogRecord> {
    match result {
        Ok(records) => records,
        Err(e) => {
            error!("{:#}", anyhow::Error::from(e));
            Vec::new()
        }
    }
}

async fn home(State(state): State<AppState>) -> Json<HomePayload> {
    let (movies_raw, series_raw) = tokio::join!(
        state.catalog.trending_movies(),
        state.catalog.trending_series(),
    );
    let movies = enrich::enrich_trending(
        state.catalog.as_ref(),
        MediaType::Movie,
        degraded(movies_raw),
    )
    .await;
    let series = enrich::enrich_trending(
        state.catalog.as_ref(),
        MediaType::Series,
        degraded(series_raw),
    )
    .await;

    // One random fully-enriched movie fronts the page.
    let hero = if movies.is_empty() {
        None
    } else {
        let pick = rand::thread_rng().gen_range(0..movies.len());
        Some(movies[pick].clone())
    };

    Json(HomePayload {
        hero,
        movies,
        series,
    })
}

#[derive(Debug, Deserialize)]
struct SearchBody {
    query: String,
}

async fn submit_search(State(state): State<AppState>, Json(body): Json<SearchBody>) -> Response {
    let query = body.query.trim().to_string();
    if query.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "La búsqueda no puede estar vacía" })),
        )
            .into_response();
    }

    let records = degraded(state.catalog.search_multi(&query).await);
    let results: Vec<MediaItem> = records
        .into_iter()
        .filter_map(|r| {
            // Multi-search mixes in kinds we do not model; drop those.
            let kind = r.parsed_media_type()?;
            Some(r.into_item(kind))
        })
        .collect();

    let mut search = state.search.write().await;
    search.query = Some(query);
    search.results = results;
    Json(search.clone()).into_response()
}

async fn search_results(State(state): State<AppState>) -> Json<SearchState> {
    Json(state.search.read().await.clone())
}

async fn peliculas(State(state): State<AppState>) -> Json<serde_json::Value> {
    let (top_raw, upcoming_raw) = tokio::join!(
        state.catalog.top_rated_movies(),
        state.catalog.upcoming_movies(),
    );
    Json(json!({
        "top_rated": plain_items(degraded(top_raw), MediaType::Movie),
        "upcoming": plain_items(degraded(upcoming_raw), MediaType::Movie),
    }))
}

async fn series(State(state): State<AppState>) -> Json<serde_json::Value> {
    let (top_raw, airing_raw) = tokio::join!(
        state.catalog.top_rated_series(),
        state.catalog.airing_today_series(),
    );
    Json(json!({
        "top_rated": plain_items(degraded(top_raw), MediaType::Series),
        "airing_today": plain_items(degraded(airing_raw), MediaType::Series),
    }))
}

fn plain_items(records: Vec<CatalogRecord>, media_type: MediaType) -> Vec<MediaItem> {
    records
        .into_iter()
        .map(|r| r.into_item(media_type))
        .collect()
}

#[derive(Debug, Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct RegisterBody {
    email: String,
    password: String,
    display_name: Option<String>,
}

async fn login(State(state): State<AppState>, Json(body): Json<LoginBody>) -> Response {
    match state.identity.sign_in(&body.email, &body.password).await {
        Ok(()) => Json(json!({ "status": "ok" })).into_response(),
        Err(e) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "code": e.code, "message": e.message })),
        )
            .into_response(),
    }
}

async fn registro(State(state): State<AppState>, Json(body): Json<RegisterBody>) -> Response {
    match state
        .identity
        .create_account(&body.email, &body.password, body.display_name.as_deref())
        .await
    {
        Ok(()) => Json(json!({ "status": "ok" })).into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "code": e.code, "message": e.message })),
        )
            .into_response(),
    }
}

async fn logout(State(state): State<AppState>) -> Response {
    match state.identity.sign_out().await {
        Ok(()) => Json(json!({ "status": "ok" })).into_response(),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "code": e.code, "message": e.message })),
        )
            .into_response(),
    }
}

async fn sesion(State(state): State<AppState>) -> Json<SessionState> {
    Json(state.identity.sessions().borrow().clone())
}

/// The authenticated user's id, or the 401 prompt the page shows instead.
/// `Unresolved` is deliberately not `Anonymous`, but neither owns a reserva,
/// so both get the prompt here.
fn require_user(state: &AppState) -> Result<String, Response> {
    let session = state.identity.sessions().borrow().clone();
    match session.user_id() {
        Some(uid) => Ok(uid.to_string()),
        None => Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": LOGIN_PROMPT })),
        )
            .into_response()),
    }
}

fn mutation_response(result: Result<(), FavoritesError>) -> Response {
    match result {
        Ok(()) => Json(json!({ "status": "ok" })).into_response(),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn mi_reserva(State(state): State<AppState>) -> Response {
    if let Err(prompt) = require_user(&state) {
        return prompt;
    }
    let view = state.favorites.current();
    // `ids` is the precomputed saved-id set the client uses to decide
    // between the save and remove affordances without scanning records.
    Json(json!({
        "records": view.records,
        "ids": view.sorted_ids(),
    }))
    .into_response()
}

async fn save_favorite(State(state): State<AppState>, Json(item): Json<MediaItem>) -> Response {
    let user_id = match require_user(&state) {
        Ok(uid) => uid,
        Err(prompt) => return prompt,
    };
    mutation_response(state.favorites.save(&user_id, &item).await)
}

async fn remove_favorite(State(state): State<AppState>, Path(id): Path<i32>) -> Response {
    let user_id = match require_user(&state) {
        Ok(uid) => uid,
        Err(prompt) => return prompt,
    };
    mutation_response(state.favorites.remove(&user_id, id).await)
}

/// Plain-text rendition of the saved list, for sharing outside the app.
async fn compartir(State(state): State<AppState>) -> Response {
    if let Err(prompt) = require_user(&state) {
        return prompt;
    }
    let view = state.favorites.current();
    let mut lines = vec!["Mi reserva:".to_string()];
    for record in &view.records {
        let kind = match record.media_type {
            MediaType::Movie => "película",
            MediaType::Series => "serie",
        };
        lines.push(format!("• {} ({kind})", record.display_title()));
    }
    lines.join("\n").into_response()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        term.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Shutdown signal received (Ctrl+C)");
        }
        _ = terminate => {
            info!("Shutdown signal received (SIGTERM)");
        }
    }
}
