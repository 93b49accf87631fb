//! Single-shot image generation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};
use url::Url;

use super::client::{
    ChatClientConfig, api_base, build_http_client, endpoint, error_from_response, request_headers,
};
use crate::core::config::API_KEY_NAME;
use crate::core::credentials::CredentialStore;
use crate::errors::ChatError;

const IMAGE_GENERATIONS_PATH: &str = "images/generations";
pub const DEFAULT_IMAGE_SIZE: &str = "512x512";

/// Prompt framing used by the two image pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageStyle {
    #[default]
    Photo,
    Art,
}

impl ImageStyle {
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Photo => {
                "Please generate a realistic photo includs these following description: "
            }
            Self::Art => "Please generate an art picture includes these following description: ",
        }
    }

    /// Frames the user's description for this style.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::InvalidInput` when the description is blank.
    pub fn prompt(self, description: &str) -> Result<String, ChatError> {
        let description = description.trim();
        if description.is_empty() {
            return Err(ChatError::InvalidInput("Please enter a prompt".to_string()));
        }
        Ok(format!("{}{description}", self.prefix()))
    }
}

/// Adds a keyword chip to a description being built up.
pub fn append_keyword(description: &mut String, keyword: &str) {
    description.push_str(keyword);
    description.push(' ');
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageRequest<'a> {
    pub prompt: &'a str,
    pub n: u32,
    pub size: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Clone, Deserialize)]
struct ImageData {
    url: Option<String>,
}

/// Image generation client. The credential is read from the store on every
/// call.
pub struct ImageClient {
    http: reqwest::Client,
    api_url: Url,
    org_id: Option<String>,
    size: String,
    store: Arc<dyn CredentialStore>,
}

impl std::fmt::Debug for ImageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageClient")
            .field("api_url", &self.api_url.as_str())
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl ImageClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client or endpoint URL cannot be built.
    pub fn new(config: &ChatClientConfig, store: Arc<dyn CredentialStore>) -> Result<Self, ChatError> {
        Ok(Self {
            http: build_http_client(config.connect_timeout)?,
            api_url: endpoint(&api_base(config.api_base.clone())?, IMAGE_GENERATIONS_PATH)?,
            org_id: config.org_id.clone(),
            size: DEFAULT_IMAGE_SIZE.to_string(),
            store,
        })
    }

    #[must_use]
    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = size.into();
        self
    }

    /// Requests one image and returns its URL.
    ///
    /// # Errors
    ///
    /// - `ChatError::InvalidInput` for a blank prompt
    /// - `ChatError::MissingCredential` when no key is stored
    /// - `ChatError::Unauthorized` / `ChatError::AccessDenied` / `ChatError::Api`
    ///   for rejected requests
    /// - `ChatError::JsonError` when the response has no image URL
    pub async fn fetch_image(&self, prompt: &str) -> Result<String, ChatError> {
        if prompt.trim().is_empty() {
            return Err(ChatError::InvalidInput("Please enter a prompt".to_string()));
        }

        let token = self.store.get(API_KEY_NAME).await?;
        let headers = request_headers(&token, self.org_id.as_deref(), false)?;

        info!(size = %self.size, "Requesting image generation");

        let response = self
            .http
            .post(self.api_url.clone())
            .headers(headers)
            .json(&ImageRequest {
                prompt,
                n: 1,
                size: &self.size,
            })
            .send()
            .await
            .map_err(|e| ChatError::HttpError(format!("Image API request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ChatError::JsonError(format!("image response: {e}")))?;
        if let Some(err) = body.get("error") {
            error!(error = %err, "Image API returned an error");
            return Err(ChatError::Api {
                message: super::sse::extract_error_message(err),
                kind: None,
            });
        }

        let parsed: ImageResponse = serde_json::from_value(body)?;
        parsed
            .data
            .into_iter()
            .next()
            .and_then(|d| d.url)
            .ok_or_else(|| ChatError::JsonError("image response contained no URL".to_string()))
    }

    /// Frames `description` for `style` and requests the image.
    ///
    /// # Errors
    ///
    /// See [`ImageClient::fetch_image`].
    pub async fn imagine(&self, style: ImageStyle, description: &str) -> Result<String, ChatError> {
        let prompt = style.prompt(description)?;
        self.fetch_image(&prompt).await
    }
}
