//! End-to-end integration tests for PhysioGold.
//!
//! These exercise the full pipeline from an HTTP request to the reply:
//! session creation, credential entry and model selection, document
//! upload, prompt composition, generation, and the conversation log.
//! The Gemini API is replaced either by a scripted provider or by a
//! loopback HTTP server speaking the same wire format.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Body;
use axum::extract::Path;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::routing::{get, post};
use futures::StreamExt;
use http_body_util::BodyExt;
use tower::ServiceExt;

use physiogold_agent::{PromptBudget, PromptComposer, Session, TurnController};
use physiogold_config::AppConfig;
use physiogold_core::error::{ProviderError, TurnError};
use physiogold_core::message::Role;
use physiogold_core::mode::Mode;
use physiogold_core::provider::{
    Credential, GenerationRequest, GenerationResponse, ModelDescriptor, Provider, ProviderFactory,
};
use physiogold_gateway::api_v1::ApiState;
use physiogold_gateway::build_router;
use physiogold_providers::{GeminiFactory, ModelSelector};

// ── Scripted provider ────────────────────────────────────────────────────

/// A mock provider that returns scripted replies in sequence and records
/// every prompt it receives.
struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<String, ProviderError>>>,
    prompts: Mutex<Vec<String>>,
    models: Vec<ModelDescriptor>,
}

impl ScriptedProvider {
    fn new(replies: Vec<Result<String, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
            models: vec![
                ModelDescriptor::new("models/embedding-001", &["embedContent"]),
                ModelDescriptor::new("models/gemini-pro", &["generateContent"]),
                ModelDescriptor::new("models/gemini-1.5-flash", &["generateContent"]),
            ],
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, ProviderError> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        let next = self.replies.lock().unwrap().pop_front();
        let text = match next {
            Some(reply) => reply?,
            None => panic!("ScriptedProvider exhausted"),
        };
        Ok(GenerationResponse {
            text,
            model: request.model,
            usage: None,
        })
    }

    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, ProviderError> {
        Ok(self.models.clone())
    }
}

struct SharedFactory(Arc<ScriptedProvider>);

impl ProviderFactory for SharedFactory {
    fn build(&self, _credential: &Credential) -> Result<Arc<dyn Provider>, ProviderError> {
        Ok(self.0.clone())
    }
}

// ── HTTP helpers ─────────────────────────────────────────────────────────

fn app_with(factory: Arc<dyn ProviderFactory>) -> Router {
    let config = AppConfig::default();
    build_router(&config, Arc::new(ApiState::new(&config, factory)))
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

async fn upload(app: &Router, session: &str, files: &[(&str, &str)]) -> serde_json::Value {
    let boundary = "e2e-boundary";
    let mut body = String::new();
    for (name, content) in files {
        body.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{name}\"\r\n\r\n{content}\r\n"
        ));
    }
    body.push_str(&format!("--{boundary}--\r\n"));

    let req = Request::builder()
        .method("POST")
        .uri(format!("/v1/sessions/{session}/documents"))
        .header("content-type", format!("multipart/form-data; boundary={boundary}"))
        .body(Body::from(body))
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn new_configured_session(app: &Router) -> String {
    let (status, created) = call(app, "POST", "/v1/sessions", None).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();

    let (status, _) = call(
        app,
        "PUT",
        &format!("/v1/sessions/{id}/credential"),
        Some(serde_json::json!({ "api_key": "AIza-e2e" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    id
}

// ── Full cycle through the gateway ───────────────────────────────────────

#[tokio::test]
async fn e2e_intake_conversation_with_documents() {
    let provider = ScriptedProvider::new(vec![
        Ok("I'm sorry to hear that. Which knee is it?".into()),
        Ok("Thanks. What do you do for work?".into()),
    ]);
    let app = app_with(Arc::new(SharedFactory(provider.clone())));
    let id = new_configured_session(&app).await;

    let docs = upload(
        &app,
        &id,
        &[("knee.txt", "Knee OA guideline. "), ("flags.md", "Red flags list.")],
    )
    .await;
    assert_eq!(docs["documents"].as_array().unwrap().len(), 2);

    for message in ["My knee hurts", "The left one"] {
        let (status, reply) = call(
            &app,
            "POST",
            &format!("/v1/sessions/{id}/chat"),
            Some(serde_json::json!({ "message": message })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(!reply["reply"].as_str().unwrap().is_empty());
        assert_eq!(reply["model"], "models/gemini-1.5-flash");
    }

    let prompts = provider.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].starts_with(Mode::PatientIntake.template().role_description));
    assert!(prompts[0].contains(
        "IMPORTANT REFERENCE DOCUMENTS (Adhere strictly to these):\nKnee OA guideline. Red flags list.\n\nUser History:\n"
    ));
    assert!(prompts[1].ends_with(
        "User History:\nuser: My knee hurts\nassistant: I'm sorry to hear that. Which knee is it?\nuser: The left one\n"
    ));

    let (_, view) = call(&app, "GET", &format!("/v1/sessions/{id}"), None).await;
    let turns = view["turns"].as_array().unwrap();
    assert_eq!(turns.len(), 4);
    let roles: Vec<&str> = turns.iter().map(|t| t["role"].as_str().unwrap()).collect();
    assert_eq!(roles, ["user", "assistant", "user", "assistant"]);
}

#[tokio::test]
async fn e2e_failure_then_recovery() {
    let provider = ScriptedProvider::new(vec![
        Err(ProviderError::ApiError {
            status_code: 500,
            message: "backend unavailable".into(),
        }),
        Ok("Let's try again. Where is the pain?".into()),
    ]);
    let app = app_with(Arc::new(SharedFactory(provider.clone())));
    let id = new_configured_session(&app).await;

    let (status, err) = call(
        &app,
        "POST",
        &format!("/v1/sessions/{id}/chat"),
        Some(serde_json::json!({ "message": "Hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(err["error"].as_str().unwrap().contains("backend unavailable"));

    let (status, _) = call(
        &app,
        "POST",
        &format!("/v1/sessions/{id}/chat"),
        Some(serde_json::json!({ "message": "Hello again" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // The unanswered first message stays in the history sent to the model.
    assert!(provider.prompts()[1].ends_with("User History:\nuser: Hello\nuser: Hello again\n"));

    let (_, view) = call(&app, "GET", &format!("/v1/sessions/{id}"), None).await;
    assert_eq!(view["turns"].as_array().unwrap().len(), 3);
    assert_eq!(view["errors"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn e2e_mode_switch_changes_next_prompt_only() {
    let provider = ScriptedProvider::new(vec![Ok("first".into()), Ok("second".into())]);
    let app = app_with(Arc::new(SharedFactory(provider.clone())));
    let id = new_configured_session(&app).await;

    call(
        &app,
        "POST",
        &format!("/v1/sessions/{id}/chat"),
        Some(serde_json::json!({ "message": "Patient reports lateral knee pain" })),
    )
    .await;
    call(
        &app,
        "PUT",
        &format!("/v1/sessions/{id}/mode"),
        Some(serde_json::json!({ "mode": "clinician_mentor" })),
    )
    .await;
    call(
        &app,
        "POST",
        &format!("/v1/sessions/{id}/chat"),
        Some(serde_json::json!({ "message": "Which special tests?" })),
    )
    .await;

    let prompts = provider.prompts();
    assert!(prompts[0].starts_with("ROLE: You are an empathetic Intake Assistant"));
    assert!(prompts[1].starts_with("ROLE: You are an expert Clinical Mentor"));
    assert!(prompts[1].contains("user: Patient reports lateral knee pain\nassistant: first\n"));
}

#[tokio::test]
async fn e2e_sessions_are_isolated() {
    let provider = ScriptedProvider::new(vec![Ok("reply a".into()), Ok("reply b".into())]);
    let app = app_with(Arc::new(SharedFactory(provider.clone())));
    let a = new_configured_session(&app).await;
    let b = new_configured_session(&app).await;

    for (id, message) in [(&a, "from a"), (&b, "from b")] {
        let body = serde_json::json!({ "message": message });
        call(&app, "POST", &format!("/v1/sessions/{id}/chat"), Some(body)).await;
    }

    assert!(!provider.prompts()[1].contains("from a"));
    let (_, view_b) = call(&app, "GET", &format!("/v1/sessions/{b}"), None).await;
    assert_eq!(view_b["turns"].as_array().unwrap().len(), 2);
}

// ── Direct library use ───────────────────────────────────────────────────

#[tokio::test]
async fn e2e_library_cycle_with_history_budget() {
    let provider =
        ScriptedProvider::new(vec![Ok("one".into()), Ok("two".into()), Ok("three".into())]);
    let mut session = Session::new();
    session
        .configure_credential(
            "AIza-e2e",
            &SharedFactory(provider.clone()),
            &ModelSelector::default(),
        )
        .await
        .unwrap();

    let controller = TurnController::new(
        PromptComposer::new(PromptBudget {
            max_corpus_chars: None,
            max_history_turns: Some(3),
        }),
        std::time::Duration::from_secs(30),
    );
    for msg in ["a", "b", "c"] {
        controller.submit(&mut session, msg).await.unwrap();
    }

    assert_eq!(session.log().len(), 6);
    assert_eq!(session.log().last().unwrap().role(), Role::Assistant);
    assert!(provider.prompts()[2].ends_with("User History:\nuser: b\nassistant: two\nuser: c\n"));
}

#[tokio::test]
async fn e2e_missing_credential_never_calls_provider() {
    let mut session = Session::new();
    let err = TurnController::default()
        .submit(&mut session, "My knee hurts")
        .await
        .unwrap_err();
    assert!(matches!(err, TurnError::MissingCredential));
    assert!(session.log().is_empty());
}

// ── Loopback Gemini API ──────────────────────────────────────────────────

async fn spawn_fake_gemini(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn fake_gemini(seen: Arc<Mutex<Vec<String>>>) -> Router {
    Router::new()
        .route(
            "/v1beta/models",
            get(|headers: HeaderMap| async move {
                if headers.get("x-goog-api-key").is_none() {
                    return (StatusCode::FORBIDDEN, "{}".to_string());
                }
                (
                    StatusCode::OK,
                    serde_json::json!({
                        "models": [
                            { "name": "models/gemini-pro", "supportedGenerationMethods": ["generateContent"] },
                            { "name": "models/gemini-2.0-flash", "displayName": "Gemini 2.0 Flash",
                              "supportedGenerationMethods": ["generateContent", "countTokens"] }
                        ]
                    })
                    .to_string(),
                )
            }),
        )
        .route(
            "/v1beta/models/{*rest}",
            post(move |Path(rest): Path<String>, body: String| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(format!("{rest} {body}"));
                    serde_json::json!({
                        "candidates": [{ "content": { "parts": [{ "text": "Which knee, left or right?" }] } }],
                        "usageMetadata": { "promptTokenCount": 40, "candidatesTokenCount": 6, "totalTokenCount": 46 }
                    })
                    .to_string()
                }
            }),
        )
}

#[tokio::test]
async fn e2e_against_loopback_gemini() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let base = spawn_fake_gemini(fake_gemini(seen.clone())).await;
    let app = app_with(Arc::new(GeminiFactory::new(base)));
    let id = new_configured_session(&app).await;

    let (_, view) = call(&app, "GET", &format!("/v1/sessions/{id}"), None).await;
    assert_eq!(view["selection"]["model"], "models/gemini-2.0-flash");
    assert_eq!(view["selection"]["source"], "discovered");

    let (status, reply) = call(
        &app,
        "POST",
        &format!("/v1/sessions/{id}/chat"),
        Some(serde_json::json!({ "message": "My knee hurts" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["reply"], "Which knee, left or right?");
    assert_eq!(reply["usage"]["total_tokens"], 46);

    let requests = seen.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].starts_with("gemini-2.0-flash:generateContent "));
    assert!(requests[0].contains(r#"User History:\nuser: My knee hurts\n"#));
}

#[tokio::test]
async fn e2e_unreachable_discovery_uses_fallback() {
    // Nothing listens on this port once the listener is dropped.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let app = app_with(Arc::new(GeminiFactory::new(base)));
    let id = new_configured_session(&app).await;

    let (_, view) = call(&app, "GET", &format!("/v1/sessions/{id}"), None).await;
    assert_eq!(view["selection"]["model"], "gemini-1.5-flash");
    assert_eq!(view["selection"]["source"], "fallback");

    let (status, err) = call(
        &app,
        "POST",
        &format!("/v1/sessions/{id}/chat"),
        Some(serde_json::json!({ "message": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(err["error"].as_str().unwrap().starts_with("Error: "));
}

#[tokio::test]
async fn e2e_streamed_reply_keeps_multibyte_text() {
    let event = concat!(
        "data: {\"candidates\":[{\"content\":",
        "{\"parts\":[{\"text\":\"genou \u{e9}\"}]}}]}\n\n",
    );
    let bytes = event.as_bytes().to_vec();
    let cut = bytes.iter().position(|&b| b == 0xC3).unwrap() + 1;
    let parts = vec![bytes[..cut].to_vec(), bytes[cut..].to_vec()];

    let gemini = Router::new()
        .route(
            "/v1beta/models",
            get(|| async {
                r#"{"models":[{"name":"models/gemini-1.5-flash","supportedGenerationMethods":["generateContent"]}]}"#
            }),
        )
        .route(
            "/v1beta/models/{*rest}",
            post(move || {
                let parts = parts.clone();
                async move {
                    let chunks = futures::stream::iter(parts).then(|part| async move {
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok::<_, std::io::Error>(part)
                    });
                    Body::from_stream(chunks)
                }
            }),
        );
    let base = spawn_fake_gemini(gemini).await;
    let app = app_with(Arc::new(GeminiFactory::new(base)));
    let id = new_configured_session(&app).await;

    let req = Request::builder()
        .method("POST")
        .uri(format!("/v1/sessions/{id}/chat/stream"))
        .header("content-type", "application/json")
        .body(Body::from(r#"{"message":"Où ça fait mal ?"}"#))
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let sse = response.into_body().collect().await.unwrap().to_bytes();
    let sse = String::from_utf8(sse.to_vec()).unwrap();
    assert!(sse.contains("event: done"));
    assert!(!sse.contains('\u{fffd}'));

    let (_, view) = call(&app, "GET", &format!("/v1/sessions/{id}"), None).await;
    let turns = view["turns"].as_array().unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1]["text"], "genou \u{e9}");
}
