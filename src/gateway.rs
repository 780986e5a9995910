//! The ingredient recognition gateway: sends an uploaded image to the
//! recognition model and reshapes its concepts into ingredients.

use crate::clarifai::{Concept, RecognitionRequest, RecognitionResponse, Status, Upstream, UpstreamReply};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::*;

/// A detected ingredient. A renamed view of a `Concept`; values are copied
/// verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ingredient {
    pub ingredient: String,
    pub confidence: f64,
}

impl From<Concept> for Ingredient {
    fn from(concept: Concept) -> Self {
        Ingredient {
            ingredient: concept.name,
            confidence: concept.value,
        }
    }
}

/// Every way an `/analyze` request can fail
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request carried no `image` part
    #[error("No image uploaded")]
    MissingImage,

    /// The `image` part could not be read off the wire
    #[error("Failed to read uploaded image: {0}")]
    Upload(String),

    /// Clarifai answered with a non-2xx HTTP status
    #[error("Clarifai request failed with http status {status_code}")]
    UpstreamStatus { status_code: u16, details: String },

    /// Clarifai could not be reached at all
    #[error("Clarifai request failed: {0}")]
    UpstreamUnreachable(String),

    /// Clarifai answered 2xx but its own status code is not a success
    #[error("Clarifai returned non-success status")]
    UpstreamRejected { status: Value, raw: Value },

    /// A successful reply did not have the expected shape
    #[error("Failed to parse Clarifai response: {exception}")]
    MalformedResponse { exception: String, raw: Value },
}

/// Stateless between calls; safe to share across workers
#[derive(Clone)]
pub struct Gateway {
    upstream: Arc<dyn Upstream>,
}

impl Gateway {
    pub fn new(upstream: Arc<dyn Upstream>) -> Self {
        Gateway { upstream }
    }

    /// Recognize the ingredients in an image, making exactly one upstream call
    #[tracing::instrument(skip_all, fields(bytes = image.len()))]
    pub async fn analyze(&self, image: &[u8]) -> Result<Vec<Ingredient>, ApiError> {
        debug!("analyzing uploaded image");
        let request = RecognitionRequest::from_image(image);

        let reply = self.upstream.post_outputs(&request).await.map_err(|e| {
            warn!("clarifai unreachable: {e:#}");
            ApiError::UpstreamUnreachable(format!("{e:#}"))
        })?;

        let ingredients = interpret(reply)?;
        info!("recognized {} ingredients", ingredients.len());
        Ok(ingredients)
    }
}

/// Turn one upstream reply into ingredients or a descriptive error
pub fn interpret(reply: UpstreamReply) -> Result<Vec<Ingredient>, ApiError> {
    if !reply.is_success() {
        warn!("clarifai returned http status {}", reply.status);
        return Err(ApiError::UpstreamStatus {
            status_code: reply.status,
            details: reply.body,
        });
    }

    let raw: Value = match serde_json::from_str(&reply.body) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("clarifai reply is not json: {e}");
            return Err(ApiError::MalformedResponse {
                exception: e.to_string(),
                raw: Value::String(reply.body),
            });
        }
    };

    let status = raw.get("status").cloned().unwrap_or_else(|| json!({}));
    let parsed = Status::from_value(&status);
    if !parsed.is_success() {
        warn!(
            "clarifai returned status code {:?}: {}",
            parsed.code,
            parsed.description.as_deref().unwrap_or("no description")
        );
        return Err(ApiError::UpstreamRejected { status, raw });
    }

    match RecognitionResponse::first_concepts(&raw) {
        Ok(concepts) => Ok(concepts.into_iter().map(Ingredient::from).collect()),
        Err(e) => {
            warn!("unexpected clarifai reply shape: {e}");
            Err(ApiError::MalformedResponse {
                exception: e.to_string(),
                raw,
            })
        }
    }
}
