//! Wire records and HTTP client for the Clarifai model outputs endpoint

use crate::settings::ClarifaiSettings;
use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use tracing::debug;

/// `status.code` reported by Clarifai on success
pub const SUCCESS_CODE: u64 = 10000;

/// The request envelope expected by the outputs endpoint:
/// `{"inputs":[{"data":{"image":{"base64": ...}}}]}`
#[derive(Serialize, Deserialize)]
pub struct RecognitionRequest {
    pub inputs: Vec<Input>,
}

#[derive(Serialize, Deserialize)]
pub struct Input {
    pub data: InputData,
}

#[derive(Serialize, Deserialize)]
pub struct InputData {
    pub image: B64Image,
}

/// An image encoded as base 64
#[derive(Serialize, Deserialize)]
pub struct B64Image {
    pub base64: String,
}

impl Debug for B64Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "B64Image {{ base64: <{} chars> }}", self.base64.len())
    }
}

impl RecognitionRequest {
    /// Wrap raw image bytes in the envelope
    pub fn from_image(image: &[u8]) -> Self {
        RecognitionRequest {
            inputs: vec![Input {
                data: InputData {
                    image: B64Image {
                        base64: general_purpose::STANDARD.encode(image),
                    },
                },
            }],
        }
    }
}

/// The `status` object of a reply. Only used to check the sentinel and to
/// log, the raw object is what gets passed back to callers.
#[derive(Debug, Default)]
pub struct Status {
    pub code: Option<f64>,
    pub description: Option<String>,
}

impl Status {
    /// Read a status out of a raw reply. Each field is read on its own, so an
    /// odd `description` never hides a good `code`.
    pub fn from_value(status: &Value) -> Self {
        Status {
            code: status.get("code").and_then(Value::as_f64),
            description: status
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(SUCCESS_CODE as f64)
    }
}

/// A label and its confidence in [0, 1]
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Concept {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Deserialize)]
pub struct OutputData {
    pub concepts: Vec<Concept>,
}

#[derive(Debug, Deserialize)]
pub struct Output {
    pub data: OutputData,
}

/// The part of a successful reply that carries predictions
#[derive(Debug, Deserialize)]
pub struct RecognitionResponse {
    pub outputs: Vec<Output>,
}

/// Why a reply could not be read as a `RecognitionResponse`
#[derive(Debug, thiserror::Error)]
pub enum ShapeError {
    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("outputs list is empty")]
    NoOutputs,
}

impl RecognitionResponse {
    /// Validate a raw reply and take the concepts of its first output
    pub fn first_concepts(raw: &Value) -> std::result::Result<Vec<Concept>, ShapeError> {
        let response = RecognitionResponse::deserialize(raw)?;
        response
            .outputs
            .into_iter()
            .next()
            .map(|output| output.data.concepts)
            .ok_or(ShapeError::NoOutputs)
    }
}

/// The transport-level outcome of one upstream call
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    pub status: u16,
    pub body: String,
}

impl UpstreamReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Something that can run a recognition request. Implemented by
/// `ClarifaiClient`, and by stubs in tests.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn post_outputs(&self, request: &RecognitionRequest) -> Result<UpstreamReply>;
}

/// Calls the configured Clarifai model over HTTPS
pub struct ClarifaiClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

impl Debug for ClarifaiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ClarifaiClient {{ url: {:?} }}", self.url)
    }
}

impl ClarifaiClient {
    pub fn new(settings: &ClarifaiSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()?;

        Ok(ClarifaiClient {
            http,
            url: settings.outputs_url(),
            api_key: settings.api_key.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Upstream for ClarifaiClient {
    async fn post_outputs(&self, request: &RecognitionRequest) -> Result<UpstreamReply> {
        debug!("posting recognition request to {}", self.url);

        let response = self
            .http
            .post(&self.url)
            .header(AUTHORIZATION, format!("Key {}", self.api_key))
            .json(request)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        debug!("clarifai replied with http status {status}");
        Ok(UpstreamReply { status, body })
    }
}
