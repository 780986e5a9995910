use super::protocol::{AnalyzeResponse, HealthResponse, IMAGE_FIELD};
use crate::gateway::{ApiError, Gateway};
use actix_multipart::Multipart;
use actix_web::{get, post, web, HttpResponse, Responder};
use tokio_stream::StreamExt;
use tracing::*;

type Result<T> = std::result::Result<T, ApiError>;

/// Liveness check
#[get("/")]
pub async fn index() -> impl Responder {
    HttpResponse::Ok().body("ingredient-lens is running")
}

#[get("/health")]
pub async fn health() -> impl Responder {
    web::Json(HealthResponse { status: "ok" })
}

/// Recognize the ingredients in an uploaded image
#[post("/analyze")]
pub async fn analyze(mut payload: Multipart, gateway: web::Data<Gateway>) -> Result<impl Responder> {
    let image = read_image(&mut payload).await?;
    let ingredients = gateway.analyze(&image).await?;

    Ok(web::Json(AnalyzeResponse { ingredients }))
}

/// Read the first `image` file part into memory, skipping any other parts.
/// A plain text field named `image` is not an upload.
async fn read_image(payload: &mut Multipart) -> Result<Vec<u8>> {
    while let Some(field) = payload.next().await {
        let mut field = match field {
            Ok(field) => field,
            Err(e) => {
                debug!("no readable multipart field: {e}");
                return Err(ApiError::MissingImage);
            }
        };

        let disposition = field.content_disposition();
        let is_image = disposition.get_name() == Some(IMAGE_FIELD)
            && disposition.get_filename().is_some();

        let mut image = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| ApiError::Upload(e.to_string()))?;
            if is_image {
                image.extend_from_slice(&chunk);
            }
        }

        if is_image {
            return Ok(image);
        }
    }

    Err(ApiError::MissingImage)
}

#[cfg(test)]
mod tests {
    use crate::clarifai::{RecognitionRequest, Upstream, UpstreamReply};
    use crate::gateway::Gateway;
    use crate::server::configure;
    use actix_web::http::{header, StatusCode};
    use actix_web::{test, web, App};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use base64::{engine::general_purpose, Engine as _};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    const BOUNDARY: &str = "----ingredientlensboundary";
    const JPEG: &[u8] = b"\xff\xd8\xff\xe0 jpeg bytes";

    /// Answers every call with the same reply and counts the calls
    struct StubUpstream {
        reply: Option<UpstreamReply>,
        calls: AtomicUsize,
        last_base64: Mutex<Option<String>>,
    }

    impl StubUpstream {
        fn new(reply: Option<UpstreamReply>) -> Arc<Self> {
            Arc::new(StubUpstream {
                reply,
                calls: AtomicUsize::new(0),
                last_base64: Mutex::new(None),
            })
        }

        fn ok(body: Value) -> Arc<Self> {
            Self::new(Some(UpstreamReply {
                status: 200,
                body: body.to_string(),
            }))
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Upstream for StubUpstream {
        async fn post_outputs(&self, request: &RecognitionRequest) -> anyhow::Result<UpstreamReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_base64.lock().unwrap() = Some(request.inputs[0].data.image.base64.clone());
            self.reply
                .clone()
                .ok_or_else(|| anyhow!("connection refused"))
        }
    }

    fn multipart(parts: &[(&str, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, data) in parts {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"meal.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    /// A form with a single text field, no filename
    fn text_field(name: &str, value: &str) -> Vec<u8> {
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n--{BOUNDARY}--\r\n"
        )
        .into_bytes()
    }

    async fn post_analyze(stub: Arc<StubUpstream>, parts: &[(&str, &[u8])]) -> (StatusCode, Vec<u8>) {
        post_form(stub, multipart(parts)).await
    }

    async fn post_form(stub: Arc<StubUpstream>, form: Vec<u8>) -> (StatusCode, Vec<u8>) {
        let gateway = Gateway::new(stub);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(gateway))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/analyze")
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            ))
            .set_payload(form)
            .to_request();
        let resp = test::call_service(&app, req).await;
        let status = resp.status();
        (status, test::read_body(resp).await.to_vec())
    }

    fn success_body() -> Value {
        json!({
            "status": {"code": 10000, "description": "Ok"},
            "outputs": [{"data": {"concepts": [
                {"name": "apple", "value": 0.95},
                {"name": "banana", "value": 0.80}
            ]}}]
        })
    }

    #[actix_web::test]
    async fn test_missing_image_never_calls_upstream() {
        let stub = StubUpstream::ok(success_body());
        let (status, body) = post_analyze(stub.clone(), &[("photo", JPEG)]).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            serde_json::from_slice::<Value>(&body).unwrap(),
            json!({"error": "No image uploaded"})
        );
        assert_eq!(stub.calls(), 0);
    }

    #[actix_web::test]
    async fn test_text_field_named_image_is_not_an_upload() {
        let stub = StubUpstream::ok(success_body());
        let (status, body) = post_form(stub.clone(), text_field("image", "hello")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            serde_json::from_slice::<Value>(&body).unwrap(),
            json!({"error": "No image uploaded"})
        );
        assert_eq!(stub.calls(), 0);
    }

    #[actix_web::test]
    async fn test_non_multipart_request_is_missing_image() {
        let stub = StubUpstream::ok(success_body());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(Gateway::new(stub.clone())))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/analyze")
            .set_json(json!({"image": "not a file"}))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({"error": "No image uploaded"}));
        assert_eq!(stub.calls(), 0);
    }

    #[actix_web::test]
    async fn test_ingredients_preserve_upstream_order() {
        let stub = StubUpstream::ok(success_body());
        let (status, body) = post_analyze(stub.clone(), &[("image", JPEG)]).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            serde_json::from_slice::<Value>(&body).unwrap(),
            json!({"ingredients": [
                {"ingredient": "apple", "confidence": 0.95},
                {"ingredient": "banana", "confidence": 0.80}
            ]})
        );
        assert_eq!(stub.calls(), 1);
    }

    #[actix_web::test]
    async fn test_upload_is_sent_as_base64() {
        let image: Vec<u8> = (0..=255u8).rev().collect();
        let stub = StubUpstream::ok(success_body());
        let (status, _) =
            post_analyze(stub.clone(), &[("caption", &b"lunch"[..]), ("image", image.as_slice())]).await;

        assert_eq!(status, StatusCode::OK);
        let sent = stub.last_base64.lock().unwrap().clone().unwrap();
        assert_eq!(general_purpose::STANDARD.decode(sent).unwrap(), image);
    }

    #[actix_web::test]
    async fn test_upstream_http_failure() {
        let stub = StubUpstream::new(Some(UpstreamReply {
            status: 500,
            body: "server error".into(),
        }));
        let (status, body) = post_analyze(stub, &[("image", JPEG)]).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            serde_json::from_slice::<Value>(&body).unwrap(),
            json!({"error": "Clarifai request failed", "status_code": 500, "details": "server error"})
        );
    }

    #[actix_web::test]
    async fn test_upstream_unreachable() {
        let stub = StubUpstream::new(None);
        let (status, body) = post_analyze(stub.clone(), &[("image", JPEG)]).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "Clarifai request failed");
        assert_eq!(stub.calls(), 1);
    }

    #[actix_web::test]
    async fn test_upstream_failure_sentinel() {
        let upstream = json!({"status": {"code": 21100, "description": "Model does not exist"}, "outputs": []});
        let stub = StubUpstream::ok(upstream.clone());
        let (status, body) = post_analyze(stub, &[("image", JPEG)]).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(
            serde_json::from_slice::<Value>(&body).unwrap(),
            json!({
                "error": "Clarifai returned non-success status",
                "status": upstream["status"],
                "raw": upstream
            })
        );
    }

    #[actix_web::test]
    async fn test_missing_outputs() {
        let upstream = json!({"status": {"code": 10000}});
        let stub = StubUpstream::ok(upstream.clone());
        let (status, body) = post_analyze(stub, &[("image", JPEG)]).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "Failed to parse Clarifai response");
        assert!(body["exception"].as_str().unwrap().contains("outputs"));
        assert_eq!(body["raw"], upstream);
        assert!(body.get("ingredients").is_none());
    }

    #[actix_web::test]
    async fn test_repeated_requests_are_identical() {
        for upstream in [success_body(), json!({"status": {"code": 21100}})] {
            let stub = StubUpstream::ok(upstream);
            let first = post_analyze(stub.clone(), &[("image", JPEG)]).await;
            let second = post_analyze(stub.clone(), &[("image", JPEG)]).await;
            assert_eq!(first, second);
            assert_eq!(stub.calls(), 2);
        }
    }

    #[actix_web::test]
    async fn test_index_and_health() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(Gateway::new(StubUpstream::new(None))))
                .configure(configure),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert!(resp.status().is_success());

        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({"status": "ok"}));
    }
}
