//! Shared plumbing for the REST-backed collaborator clients.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, Url};

use crate::error::{TriggerError, ValidationError};

/// Per-request timeout used when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A base URL plus credentials shared by every call of one client.
#[derive(Debug, Clone)]
pub struct RestEndpoint {
    http: reqwest::Client,
    base: Url,
    bearer_token: Option<String>,
}

impl RestEndpoint {
    /// Builds an endpoint rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the URL is empty, cannot be parsed or cannot
    /// carry a path, or if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        bearer_token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, ValidationError> {
        let trimmed = base_url.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::InvalidConfig {
                reason: "endpoint URL must not be empty".to_string(),
            });
        }
        let base = Url::parse(trimmed).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("endpoint URL '{trimmed}' is invalid: {e}"),
        })?;
        if base.cannot_be_a_base() {
            return Err(ValidationError::InvalidConfig {
                reason: format!("endpoint URL '{trimmed}' cannot carry a path"),
            });
        }

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(request_timeout)
            .build()
            .map_err(|e| ValidationError::InvalidConfig {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            base,
            bearer_token: bearer_token.filter(|t| !t.is_empty()),
        })
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn base(&self) -> &Url {
        &self.base
    }

    /// Appends `segments` to the base path, percent-encoding each one.
    pub(crate) fn url(&self, collaborator: &'static str, segments: &[&str]) -> Result<Url, TriggerError> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| TriggerError::request_failed(collaborator, "endpoint URL cannot carry a path"))?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }

    pub(crate) fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

/// Sends `request` and turns transport failures and non-2xx statuses into
/// trigger errors naming `collaborator`.
pub(crate) async fn send_checked(
    collaborator: &'static str,
    request: RequestBuilder,
) -> Result<Response, TriggerError> {
    let response = request
        .send()
        .await
        .map_err(|e| TriggerError::request_failed(collaborator, e))?;

    let status = response.status();
    if !status.is_success() {
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "unable to read response body".to_string());
        return Err(TriggerError::Rejected {
            collaborator,
            status: status.as_u16(),
            message,
        });
    }
    Ok(response)
}
