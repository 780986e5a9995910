use crate::gateway::Ingredient;
use serde::Serialize;
use serde_json::Value;

pub const NO_IMAGE: &str = "No image uploaded";
pub const UPLOAD_FAILED: &str = "Failed to read uploaded image";
pub const REQUEST_FAILED: &str = "Clarifai request failed";
pub const NON_SUCCESS_STATUS: &str = "Clarifai returned non-success status";
pub const PARSE_FAILED: &str = "Failed to parse Clarifai response";

/// The multipart field holding the upload
pub const IMAGE_FIELD: &str = "image";

/// Body of a successful `/analyze`
#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub ingredients: Vec<Ingredient>,
}

/// Body of every failed `/analyze`. Only the fields relevant to the failure
/// are present.
#[derive(Debug, Serialize)]
pub struct ErrorResponse<'a> {
    pub error: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<&'a str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'a Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<&'a str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<&'a Value>,
}

impl<'a> ErrorResponse<'a> {
    pub fn new(error: &'static str) -> Self {
        ErrorResponse {
            error,
            status_code: None,
            details: None,
            status: None,
            exception: None,
            raw: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}
