// ------------------------------------------------------------------------
// mock apiserver setup shared by the runtime tests
// ------------------------------------------------------------------------
use http::{Request, Response, StatusCode};
use http_body_util::BodyExt;
use kluster_core::Cluster;
use kube::{client::Body, Client};
use serde_json::{json, Value};

type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;
type SendResponse = tower_test::mock::SendResponse<Response<Body>>;

/// Wraps the mock handle so tests read as a conversation with the apiserver
pub(crate) struct ApiServerVerifier(ApiServerHandle);

/// A request the code under test made, with its body decoded
pub(crate) struct Seen {
    pub method: http::Method,
    pub uri: String,
    pub content_type: Option<String>,
    pub body: Value,
    send: SendResponse,
}

impl Seen {
    /// Respond as the apiserver would, with `value` as the JSON body
    pub fn respond(self, value: Value) {
        let bytes = serde_json::to_vec(&value).unwrap();
        self.send
            .send_response(Response::builder().body(Body::from(bytes)).unwrap());
    }

    /// Respond with a `Status` failure
    pub fn fail(self, code: StatusCode) {
        let status = json!({
            "kind": "Status",
            "apiVersion": "v1",
            "status": "Failure",
            "message": code.canonical_reason().unwrap_or_default(),
            "reason": code.canonical_reason().unwrap_or_default().replace(' ', ""),
            "code": code.as_u16(),
        });
        let bytes = serde_json::to_vec(&status).unwrap();
        self.send.send_response(
            Response::builder()
                .status(code)
                .body(Body::from(bytes))
                .unwrap(),
        );
    }
}

impl ApiServerVerifier {
    /// Next request, panicking when the code under test stops calling
    pub async fn next(&mut self) -> Seen {
        let (request, send) = tokio::time::timeout(std::time::Duration::from_secs(1), self.0.next_request())
            .await
            .expect("timeout waiting for apiserver call")
            .expect("service not called");
        let method = request.method().clone();
        let uri = request.uri().to_string();
        let content_type = request
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let bytes = request.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        Seen {
            method,
            uri,
            content_type,
            body,
            send,
        }
    }
}

/// Create a test context with a mocked kube client
pub(crate) fn testcontext() -> (Client, ApiServerVerifier) {
    let (mock_service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
    let mock_client = Client::new(mock_service, "default");
    (mock_client, ApiServerVerifier(handle))
}

/// A `Cluster` as stored by the apiserver
pub(crate) fn cluster(finalizers: &[&str], deleting: bool) -> Cluster {
    serde_json::from_value(cluster_json(finalizers, deleting)).unwrap()
}

/// JSON form of [`cluster`]
pub(crate) fn cluster_json(finalizers: &[&str], deleting: bool) -> Value {
    let mut obj = json!({
        "apiVersion": "kluster.dev/v1alpha1",
        "kind": "Cluster",
        "metadata": {
            "name": "c1",
            "namespace": "default",
            "uid": "7b0c4d4e-0000-4000-8000-000000000001",
            "generation": 2,
        },
        "spec": { "provider": "test" }
    });
    if !finalizers.is_empty() {
        obj["metadata"]["finalizers"] = json!(finalizers);
    }
    if deleting {
        obj["metadata"]["deletionTimestamp"] = json!("2026-01-01T00:00:00Z");
    }
    obj
}
