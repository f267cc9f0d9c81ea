use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use canvas_contracts::api::{
    EditImageRequest, ErrorBody, GenerateImageRequest, GenerateImageResult, EDIT_IMAGE_PATH,
    GENERATE_IMAGE_PATH, MODELS_PATH,
};
use canvas_contracts::events::{EventLog, EventPayload};
use canvas_contracts::models::ModelSpec;
use canvas_engine::{GenerationError, GenerationService};
use serde_json::Value;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

pub const HEALTH_PATH: &str = "/healthz";

#[derive(Clone)]
pub struct AppState {
    service: Arc<GenerationService>,
    events: Option<EventLog>,
}

impl AppState {
    pub fn new(service: Arc<GenerationService>, events: Option<EventLog>) -> Self {
        Self { service, events }
    }

    /// Appends to the event log on the blocking pool.
    async fn record(&self, event: &str, payload: EventPayload) {
        let Some(events) = self.events.clone() else {
            return;
        };
        let name = event.to_string();
        match tokio::task::spawn_blocking(move || events.record(&name, payload)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => tracing::warn!(event, error = %err, "failed to append event"),
            Err(err) => tracing::warn!(event, error = %err, "event log task failed"),
        }
    }
}

pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route(GENERATE_IMAGE_PATH, post(generate_image))
        .route(EDIT_IMAGE_PATH, post(edit_image))
        .route(MODELS_PATH, get(list_models))
        .route(HEALTH_PATH, get(healthz))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(bind: SocketAddr, app: Router) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(addr = %listener.local_addr()?, "canvas server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

/// `{ "error": message }` with a 4xx/5xx status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<GenerationError> for ApiError {
    fn from(err: GenerationError) -> Self {
        Self {
            status: StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            message: err.public_message(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody::new(self.message))).into_response()
    }
}

async fn generate_image(
    State(state): State<AppState>,
    payload: Result<Json<GenerateImageRequest>, JsonRejection>,
) -> Result<Json<GenerateImageResult>, ApiError> {
    let Json(request) = payload?;
    let model = request.model.clone();
    let service = Arc::clone(&state.service);
    let outcome = run_blocking(move || service.generate(&request)).await;
    respond(&state, GENERATE_IMAGE_PATH, "image_generated", &model, outcome).await
}

async fn edit_image(
    State(state): State<AppState>,
    payload: Result<Json<EditImageRequest>, JsonRejection>,
) -> Result<Json<GenerateImageResult>, ApiError> {
    let Json(request) = payload?;
    let model = request.model.clone();
    let service = Arc::clone(&state.service);
    let outcome = run_blocking(move || service.edit(&request)).await;
    respond(&state, EDIT_IMAGE_PATH, "image_edited", &model, outcome).await
}

async fn list_models(State(state): State<AppState>) -> Json<Vec<ModelSpec>> {
    Json(state.service.models().list().cloned().collect())
}

async fn healthz() -> &'static str {
    "ok"
}

/// Provider calls use blocking HTTP and run on the blocking pool.
async fn run_blocking<F>(job: F) -> Result<GenerateImageResult, GenerationError>
where
    F: FnOnce() -> Result<GenerateImageResult, GenerationError> + Send + 'static,
{
    match tokio::task::spawn_blocking(job).await {
        Ok(outcome) => outcome,
        Err(err) => Err(GenerationError::Internal(anyhow!(
            "generation task failed: {err}"
        ))),
    }
}

async fn respond(
    state: &AppState,
    route: &str,
    event: &str,
    model: &str,
    outcome: Result<GenerateImageResult, GenerationError>,
) -> Result<Json<GenerateImageResult>, ApiError> {
    let request_id = Uuid::new_v4().to_string();
    let mut payload = EventPayload::new();
    payload.insert("request_id".to_string(), Value::String(request_id.clone()));
    payload.insert("route".to_string(), Value::String(route.to_string()));
    payload.insert("model".to_string(), Value::String(model.to_string()));

    match outcome {
        Ok(result) => {
            tracing::info!(%request_id, route, model, "request succeeded");
            payload.insert(
                "reported_model".to_string(),
                Value::String(result.metadata.model.clone()),
            );
            state.record(event, payload).await;
            Ok(Json(result))
        }
        Err(err) => {
            if err.is_client_error() {
                tracing::info!(%request_id, route, model, error = %err, "request rejected");
            } else {
                tracing::error!(%request_id, route, model, error = ?err, "request failed");
            }
            payload.insert("status".to_string(), Value::from(err.status_code()));
            payload.insert("error".to_string(), Value::String(err.public_message()));
            state.record("request_failed", payload).await;
            Err(ApiError::from(err))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::{Read, Write};
    use std::sync::Mutex;
    use std::time::Duration;

    use anyhow::{bail, Result};
    use canvas_client::{CanvasStore, HttpImageClient, StoreError};
    use canvas_contracts::data_url;
    use canvas_contracts::graph::{NodeDataPatch, Position};
    use canvas_contracts::models::ModelRegistry;
    use canvas_engine::{
        EditCall, GenerateCall, ImageProvider, ImageProviderRegistry, ProviderImage,
    };

    use super::*;

    const STABILITY_KEY_MISSING: &str = "Stability API key not configured";

    #[derive(Default)]
    struct FakeOpenAi {
        edits: Arc<Mutex<Vec<EditCall>>>,
    }

    impl ImageProvider for FakeOpenAi {
        fn name(&self) -> &str {
            "openai"
        }

        fn generate(&self, call: &GenerateCall) -> anyhow::Result<ProviderImage> {
            Ok(ProviderImage {
                url: Some(format!("https://cdn.test/{}.png", call.upstream_model)),
                ..ProviderImage::default()
            })
        }

        fn edit(&self, call: &EditCall) -> anyhow::Result<ProviderImage> {
            self.edits
                .lock()
                .map_err(|_| anyhow!("poisoned"))?
                .push(call.clone());
            Ok(ProviderImage {
                b64_json: Some("RURJVA==".to_string()),
                ..ProviderImage::default()
            })
        }
    }

    struct UnconfiguredStability;

    impl ImageProvider for UnconfiguredStability {
        fn name(&self) -> &str {
            "stability"
        }

        fn preflight(&self) -> Result<(), GenerationError> {
            Err(GenerationError::Configuration(
                STABILITY_KEY_MISSING.to_string(),
            ))
        }

        fn generate(&self, _call: &GenerateCall) -> anyhow::Result<ProviderImage> {
            bail!("preflight should have stopped this call")
        }
    }

    fn state(events: Option<EventLog>) -> (AppState, Arc<Mutex<Vec<EditCall>>>) {
        let openai = FakeOpenAi::default();
        let edits = Arc::clone(&openai.edits);
        let mut providers = ImageProviderRegistry::new();
        providers.register(openai);
        providers.register(UnconfiguredStability);
        let service = GenerationService::new(ModelRegistry::default(), providers);
        (AppState::new(Arc::new(service), events), edits)
    }

    fn png_url(tag: u8) -> String {
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.push(tag);
        data_url::from_bytes("image/png", &bytes)
    }

    fn generate_request(prompt: &str, model: &str, resolution: &str) -> GenerateImageRequest {
        GenerateImageRequest {
            prompt: prompt.to_string(),
            model: model.to_string(),
            resolution: resolution.to_string(),
        }
    }

    fn error_parts(err: ApiError) -> (u16, String) {
        (err.status.as_u16(), err.message)
    }

    #[tokio::test]
    async fn generate_returns_url_and_metadata() -> Result<()> {
        let (state, _) = state(None);
        let Ok(Json(result)) = generate_image(
            State(state),
            Ok(Json(generate_request("a cat", "dall-e-3", "512x512"))),
        )
        .await
        else {
            bail!("expected success");
        };
        assert_eq!(result.image_url, "https://cdn.test/dall-e-3.png");
        assert_eq!(result.metadata.model, "dall-e-3");
        assert_eq!(result.metadata.seed, Some(0));
        Ok(())
    }

    #[tokio::test]
    async fn empty_prompt_is_a_400() -> Result<()> {
        let (state, _) = state(None);
        let outcome = generate_image(
            State(state),
            Ok(Json(generate_request("", "dall-e-3", "1024x1024"))),
        )
        .await;
        let Err(err) = outcome else {
            bail!("expected rejection");
        };
        assert_eq!(error_parts(err), (400, "Prompt is required".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn missing_stability_key_is_a_500() -> Result<()> {
        let (state, _) = state(None);
        let outcome = generate_image(
            State(state),
            Ok(Json(generate_request("x", "stable-diffusion", "1024x1024"))),
        )
        .await;
        let Err(err) = outcome else {
            bail!("expected configuration error");
        };
        assert_eq!(error_parts(err), (500, STABILITY_KEY_MISSING.to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn masked_edit_returns_inline_image() -> Result<()> {
        let (state, edits) = state(None);
        let request = EditImageRequest {
            prompt: "swap the sky".to_string(),
            model: "gpt-image-1".to_string(),
            images: vec![png_url(1), png_url(2)],
            mask_index: Some(1),
        };
        let Ok(Json(result)) = edit_image(State(state), Ok(Json(request))).await else {
            bail!("expected success");
        };
        assert_eq!(result.image_url, "data:image/png;base64,RURJVA==");
        assert_eq!(result.metadata.model, "gpt-image-1");

        let edits = edits.lock().map_err(|_| anyhow!("poisoned"))?;
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].images.len(), 1);
        assert!(edits[0].mask.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn edit_with_generate_only_model_is_unsupported() -> Result<()> {
        let (state, _) = state(None);
        let request = EditImageRequest {
            prompt: "x".to_string(),
            model: "dall-e-3".to_string(),
            images: vec![png_url(1)],
            mask_index: None,
        };
        let Err(err) = edit_image(State(state), Ok(Json(request))).await else {
            bail!("expected rejection");
        };
        assert_eq!(
            error_parts(err),
            (400, "Unsupported model for image editing".to_string())
        );
        Ok(())
    }

    #[tokio::test]
    async fn outcomes_are_appended_to_the_event_log() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let (state, _) = state(Some(EventLog::new(&path, "session-test")));

        let _ = generate_image(
            State(state.clone()),
            Ok(Json(generate_request("a cat", "dall-e-3", "1024x1024"))),
        )
        .await;
        let _ = generate_image(
            State(state),
            Ok(Json(generate_request("a cat", "midjourney", "1024x1024"))),
        )
        .await;

        let lines = fs::read_to_string(&path)?
            .lines()
            .map(serde_json::from_str::<Value>)
            .collect::<Result<Vec<_>, _>>()?;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "image_generated");
        assert_eq!(lines[0]["session_id"], "session-test");
        assert_eq!(lines[1]["event"], "request_failed");
        assert_eq!(lines[1]["status"], 400);
        assert_eq!(lines[1]["error"], "Unsupported model");
        Ok(())
    }

    #[tokio::test]
    async fn models_route_lists_registry() {
        let (state, _) = state(None);
        let Json(models) = list_models(State(state)).await;
        let names: Vec<&str> = models.iter().map(|model| model.name.as_str()).collect();
        assert_eq!(names, vec!["dall-e-3", "stable-diffusion", "gpt-image-1"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn malformed_json_is_a_400_with_an_error_body() -> Result<()> {
        let (state, _) = state(None);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(async move {
            axum::serve(listener, router(state, 1024 * 1024)).await
        });

        let response = tokio::task::spawn_blocking(move || -> Result<String> {
            let body = r#"{"prompt": "#;
            let mut stream = std::net::TcpStream::connect(addr)?;
            stream.set_read_timeout(Some(Duration::from_secs(10)))?;
            write!(
                stream,
                "POST {GENERATE_IMAGE_PATH} HTTP/1.1\r\nHost: {addr}\r\n\
                 Content-Type: application/json\r\nContent-Length: {}\r\n\
                 Connection: close\r\n\r\n{body}",
                body.len()
            )?;
            let mut response = String::new();
            stream.read_to_string(&mut response)?;
            Ok(response)
        })
        .await??;

        server.abort();
        assert!(response.starts_with("HTTP/1.1 400"), "got {response:?}");
        let Some((_, body)) = response.split_once("\r\n\r\n") else {
            bail!("response has no body: {response:?}");
        };
        let body: Value = serde_json::from_str(body)?;
        assert!(body["error"].as_str().is_some_and(|message| !message.is_empty()));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn canvas_store_round_trips_through_the_server() -> Result<()> {
        let (state, _) = state(None);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let base = format!("http://{}", listener.local_addr()?);
        let server = tokio::spawn(async move {
            axum::serve(listener, router(state, 1024 * 1024)).await
        });

        let outcome = tokio::task::spawn_blocking(move || -> Result<(Option<String>, String)> {
            let client = HttpImageClient::new(base, Duration::from_secs(10))?;
            let store = CanvasStore::new(Arc::new(client));

            let text = store.add_text_to_image_node(Position::new(0.0, 0.0));
            store.update_node_data(&text, NodeDataPatch::prompt("a lighthouse"))?;
            store.generate_image(&text)?;
            let generated = store
                .node(&text)
                .and_then(|node| node.data.generated_image().map(str::to_string));

            let edit = store.add_image_to_image_node(Position::new(200.0, 0.0));
            store.update_node_data(&edit, NodeDataPatch::prompt("blend"))?;
            store.set_uploaded_images(
                &edit,
                vec![data_url::from_bytes("image/png", b"plain text")],
            )?;
            let err = store.generate_image(&edit).err();
            let Some(StoreError::Client(err)) = err else {
                bail!("expected the server to reject an undecodable upload");
            };
            Ok((generated, err.message().to_string()))
        })
        .await??;

        server.abort();
        assert_eq!(outcome.0.as_deref(), Some("https://cdn.test/dall-e-3.png"));
        assert_eq!(outcome.1, "Invalid image data at index 0");
        Ok(())
    }
}
