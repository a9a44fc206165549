// Stub REST endpoint for exercising the client in tests

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::Router;
use std::sync::{Arc, Mutex};

/// A request as the stub saw it
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: String,
    /// Path including the query string
    pub path: String,
    pub body: String,
}

type Responder = Arc<dyn Fn(&RecordedRequest) -> (u16, String) + Send + Sync>;

struct StubState {
    responder: Responder,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// Answers every request with the responder's `(status, json body)`
pub(crate) struct StubServer {
    pub base_url: String,
    state: Arc<StubState>,
}

impl StubServer {
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&RecordedRequest) -> (u16, String) + Send + Sync + 'static,
    {
        let state = Arc::new(StubState {
            responder: Arc::new(responder),
            requests: Mutex::new(Vec::new()),
        });
        let app = Router::new()
            .fallback(record)
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().expect("requests lock").clone()
    }
}

async fn record(
    State(state): State<Arc<StubState>>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> impl IntoResponse {
    let request = RecordedRequest {
        method: method.to_string(),
        path: uri
            .path_and_query()
            .map_or_else(|| uri.path().to_string(), |p| p.as_str().to_string()),
        body: String::from_utf8_lossy(&body).into_owned(),
    };
    let (status, payload) = (state.responder)(&request);
    state.requests.lock().expect("requests lock").push(request);

    (
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        [(header::CONTENT_TYPE, "application/json")],
        payload,
    )
}
