//! HTTP implementations of the collaborator traits.
//!
//! - [`github::GitHubDiffSource`] - GitHub dependency review compare endpoint
//! - [`deps_dev::DepsDevGraphSource`] - deps.dev v3 REST API
//! - [`scorecard::ScorecardApiClient`] - public OpenSSF Scorecard REST API

pub mod deps_dev;
pub mod github;
pub mod scorecard;

pub use deps_dev::DepsDevGraphSource;
pub use github::GitHubDiffSource;
pub use scorecard::ScorecardApiClient;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use crate::traits::FetchError;

pub(crate) fn http_client(timeout: Duration) -> Result<Client, FetchError> {
    Ok(Client::builder()
        .timeout(timeout)
        .user_agent(concat!("dependency-diff/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Sends the request and decodes a JSON body, mapping 404 to `NotFound`.
pub(crate) async fn read_json<T: DeserializeOwned>(
    request: RequestBuilder,
    url: &str,
) -> Result<T, FetchError> {
    debug!(url, "GET");
    let response = request.send().await?;
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(FetchError::NotFound(url.to_string()));
    }
    if !status.is_success() {
        return Err(FetchError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| FetchError::Decode(format!("{url}: {e}")))
}
