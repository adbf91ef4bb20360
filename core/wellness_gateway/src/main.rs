use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use serde::Serialize;
use serde_json::Value;
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

mod upstream;

use upstream::{CompletionClient, TokenUsage, UpstreamError};

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_UPSTREAM_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
const MAX_PROMPT_CHARS: usize = 300;

#[derive(Parser, Debug)]
#[command(name = "wellness_gateway", version)]
struct Args {
    /// Credential for the upstream completion API.
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    api_key: String,

    /// Listen address (IP only; the port comes from --port).
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    /// Listen port.
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Completion API root, without the `/chat/completions` suffix.
    #[arg(long, env = "UPSTREAM_URL", default_value = DEFAULT_UPSTREAM_URL)]
    upstream_url: String,

    /// Upstream model name.
    #[arg(long, env = "MODEL", default_value = DEFAULT_MODEL)]
    model: String,
}

#[derive(Clone)]
struct AppState {
    upstream: CompletionClient,
}

#[derive(Serialize)]
struct OkResponse<T: Serialize> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize)]
struct GenerateResponse {
    reply: String,
    token_usage: TokenUsage,
}

#[derive(Debug, Error)]
enum RelayError {
    #[error("Prompt is required.")]
    MissingInput,

    #[error("Prompt is too long. Please keep it under {max} characters.", max = MAX_PROMPT_CHARS)]
    PromptTooLong,

    /// Renders without the upstream detail; the handler logs it first.
    #[error("Failed to fetch response from OpenAI.")]
    UpstreamFailure(#[source] UpstreamError),
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match self {
            RelayError::MissingInput | RelayError::PromptTooLong => StatusCode::BAD_REQUEST,
            RelayError::UpstreamFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wellness_gateway=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    let state = AppState {
        upstream: CompletionClient::new(&args.upstream_url, &args.api_key, &args.model)?,
    };

    let addr = SocketAddr::new(args.host, args.port);
    info!("Gateway listening on http://{addr}");
    info!("Upstream: {} (model {})", args.upstream_url, args.model);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ]);

    Router::new()
        .route("/health", get(health))
        .route("/api/generate", post(post_generate).options(options_ok))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}

async fn options_ok() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Serialize)]
struct HealthInfo {
    service: &'static str,
    version: &'static str,
}

async fn health() -> impl IntoResponse {
    Json(OkResponse {
        ok: true,
        data: Some(HealthInfo {
            service: "wellness_gateway",
            version: env!("CARGO_PKG_VERSION"),
        }),
    })
}

/// Extracts the prompt from a request body. Anything that is not a JSON
/// object with a non-empty string `prompt` counts as missing input.
fn validate_prompt(payload: &Value) -> Result<&str, RelayError> {
    let prompt = payload
        .get("prompt")
        .and_then(Value::as_str)
        .filter(|p| !p.trim().is_empty())
        .ok_or(RelayError::MissingInput)?;

    if prompt.chars().count() > MAX_PROMPT_CHARS {
        return Err(RelayError::PromptTooLong);
    }
    Ok(prompt)
}

async fn post_generate(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<GenerateResponse>, RelayError> {
    let Ok(Json(payload)) = payload else {
        return Err(RelayError::MissingInput);
    };
    let prompt = validate_prompt(&payload)?;

    match state.upstream.complete(prompt).await {
        Ok(completion) => {
            info!(
                total_tokens = completion.usage.total_tokens,
                "completion relayed"
            );
            Ok(Json(GenerateResponse {
                reply: completion.reply,
                token_usage: completion.usage,
            }))
        }
        Err(err) => {
            error!("completion request failed: {err}");
            Err(RelayError::UpstreamFailure(err))
        }
    }
}
