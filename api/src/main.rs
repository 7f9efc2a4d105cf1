// ./api/src/main.rs
mod config;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json as JsonResponse, Response},
    routing::get,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use application::{
    ApplicationError, IdentifierPolicy, PaginationQuery, PokemonRepository, PokemonService,
};
use config::AppConfig;
use domain::{NewPokemon, PokemonPatch};
use infrastructure::{InMemoryPokemonRepository, MongoPokemonRepository, is_object_id, is_uuid};

/// Shared state handed to every handler.
#[derive(Clone)]
struct AppState {
    pokemon_service: Arc<PokemonService>,
}

const API_PREFIX: &str = "/api/v2";

// Application entry point
#[tokio::main]
async fn main() {
    // --- Logger Initialization ---
    let filter: EnvFilter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
    info!("Logger initialized successfully.");

    let config = AppConfig::from_env();

    // --- Dependency Injection ---
    // 1. Pick the store and its identifier predicate
    let (repository, id_policy): (Arc<dyn PokemonRepository>, Arc<dyn IdentifierPolicy>) =
        match &config.mongodb_uri {
            Some(uri) => {
                match MongoPokemonRepository::connect(uri, &config.mongodb_database).await {
                    Ok(repo) => {
                        info!(database = %config.mongodb_database, "Using MongoDB pokemon store.");
                        (Arc::new(repo), Arc::new(is_object_id))
                    }
                    Err(e) => {
                        error!("Failed to connect to MongoDB: {}", e);
                        std::process::exit(1);
                    }
                }
            }
            None => {
                warn!("MONGODB_URI not set. Using in-memory pokemon store; data is lost on exit.");
                (Arc::new(InMemoryPokemonRepository::new()), Arc::new(is_uuid))
            }
        };

    // 2. Create the application service
    let pokemon_service = Arc::new(PokemonService::new(
        repository,
        id_policy,
        config.default_limit,
    ));
    info!(
        default_limit = pokemon_service.default_limit(),
        "Application services initialized."
    );

    let app = router(AppState { pokemon_service });
    info!("API routes configured.");

    // --- Server Startup ---
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => {
            info!("Server listening on {}", addr);
            listener
        }
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app.into_make_service()).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}

fn router(state: AppState) -> Router {
    let pokemon_routes = Router::new()
        .route("/pokemon", get(list_pokemon_handler).post(create_pokemon_handler))
        .route(
            "/pokemon/:term",
            get(find_pokemon_handler)
                .patch(update_pokemon_handler)
                .delete(remove_pokemon_handler),
        );

    Router::new()
        .route("/health", get(health_check))
        .nest(API_PREFIX, pokemon_routes)
        .with_state(state)
}

// --- API Handlers ---

async fn health_check() -> impl IntoResponse {
    info!("Health check endpoint called");
    (StatusCode::OK, "OK")
}

/// Handler for creating a pokemon (POST /api/v2/pokemon).
async fn create_pokemon_handler(
    State(state): State<AppState>,
    Json(payload): Json<NewPokemon>,
) -> Response {
    info!(name = %payload.name, no = payload.no, "Received request to create pokemon");
    match state.pokemon_service.create(payload).await {
        Ok(pokemon) => (StatusCode::CREATED, JsonResponse(pokemon)).into_response(),
        Err(e) => map_application_error_to_response(e),
    }
}

/// Handler for listing pokemon (GET /api/v2/pokemon?limit=&offset=).
async fn list_pokemon_handler(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationQuery>,
) -> Response {
    info!(limit = ?pagination.limit, offset = ?pagination.offset, "Received request to list pokemon");
    match state.pokemon_service.list(pagination).await {
        Ok(page) => (StatusCode::OK, JsonResponse(page)).into_response(),
        Err(e) => map_application_error_to_response(e),
    }
}

/// Handler for looking up one pokemon by number, id or name (GET /api/v2/pokemon/:term).
async fn find_pokemon_handler(
    State(state): State<AppState>,
    Path(term): Path<String>,
) -> Response {
    info!(term = %term, "Received request to find pokemon");
    match state.pokemon_service.find_by_term(&term).await {
        Ok(pokemon) => (StatusCode::OK, JsonResponse(pokemon)).into_response(),
        Err(e) => map_application_error_to_response(e),
    }
}

/// Handler for patching a pokemon (PATCH /api/v2/pokemon/:term).
async fn update_pokemon_handler(
    State(state): State<AppState>,
    Path(term): Path<String>,
    Json(patch): Json<PokemonPatch>,
) -> Response {
    info!(term = %term, "Received request to update pokemon");
    match state.pokemon_service.update(&term, patch).await {
        Ok(merged) => (StatusCode::OK, JsonResponse(merged)).into_response(),
        Err(e) => map_application_error_to_response(e),
    }
}

/// Handler for deleting a pokemon by id (DELETE /api/v2/pokemon/:id).
async fn remove_pokemon_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    info!(pokemon_id = %id, "Received request to remove pokemon");
    match state.pokemon_service.remove(&id).await {
        Ok(message) => (StatusCode::OK, message).into_response(),
        Err(e) => map_application_error_to_response(e),
    }
}

/// Maps ApplicationError to an HTTP status code and response body.
fn map_application_error_to_response(err: ApplicationError) -> Response {
    let (status, body) = match err {
        ApplicationError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        ApplicationError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        ApplicationError::DuplicateKey(msg) => (StatusCode::BAD_REQUEST, msg),
        // Detail was already logged where the store failed
        ApplicationError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        ApplicationError::DomainError(domain_err) => {
            warn!("Domain validation failed: {}", domain_err);
            (StatusCode::BAD_REQUEST, domain_err.to_string())
        }
    };
    (status, body).into_response()
}
