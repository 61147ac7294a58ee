//! WHEP HTTP signaling
//!
//! One offer/answer exchange per negotiation:
//!
//! - `POST <endpoint>` with `Content-Type: application/sdp` and the offer
//! - any 2xx response carries the SDP answer; `Location` names the session
//!   resource
//! - `DELETE <location>` tears the session down on the server

use crate::error::NegotiationError;
use crate::signaling::sdp::validate_answer;
use crate::{Error, Result};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, LOCATION};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// MIME type of WHEP offer and answer bodies
pub const SDP_CONTENT_TYPE: &str = "application/sdp";

/// Longest error body kept in [`NegotiationError::EndpointRejected`]
const MAX_ERROR_BODY: usize = 512;

/// Successful offer/answer exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhepAnswer {
    /// Validated SDP answer
    pub sdp: String,
    /// Session resource URL, resolved against the endpoint
    pub location: Option<Url>,
}

/// Parse and check a WHEP endpoint URL
pub fn parse_endpoint(endpoint: &str) -> Result<Url> {
    if endpoint.trim().is_empty() {
        return Err(Error::InvalidEndpoint(
            "WHEP endpoint cannot be empty".to_string(),
        ));
    }

    let url = Url::parse(endpoint)
        .map_err(|e| Error::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(Error::InvalidEndpoint(format!(
            "WHEP endpoint must start with http:// or https://, got: {}",
            endpoint
        )));
    }

    if url.host_str().is_none() {
        return Err(Error::InvalidEndpoint(format!(
            "WHEP endpoint has no host: {}",
            endpoint
        )));
    }

    Ok(url)
}

/// HTTP client for WHEP endpoints
#[derive(Debug, Clone)]
pub struct WhepClient {
    client: reqwest::Client,
    auth_token: Option<String>,
}

impl WhepClient {
    /// Create a client whose requests each time out after `request_timeout`
    pub fn new(request_timeout: Duration, auth_token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Other(anyhow::anyhow!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, auth_token })
    }

    fn build_auth_header(&self) -> Option<String> {
        self.auth_token
            .as_ref()
            .map(|token| format!("Bearer {}", token))
    }

    /// POST the offer and return the validated answer
    #[instrument(skip(self, offer), fields(endpoint = %endpoint))]
    pub async fn exchange(
        &self,
        endpoint: &Url,
        offer: &str,
    ) -> std::result::Result<WhepAnswer, NegotiationError> {
        let mut request = self
            .client
            .post(endpoint.clone())
            .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
            .header(ACCEPT, SDP_CONTENT_TYPE)
            .body(offer.to_string());

        if let Some(auth) = self.build_auth_header() {
            request = request.header(AUTHORIZATION, auth);
        }

        debug!("Posting {} byte offer", offer.len());

        let response = request.send().await.map_err(map_request_error)?;
        let status = response.status();

        if !status.is_success() {
            let mut message = response.text().await.unwrap_or_default();
            truncate_message(&mut message);
            return Err(NegotiationError::EndpointRejected {
                status: status.as_u16(),
                message,
            });
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| endpoint.join(value).ok());

        let body = response.bytes().await.map_err(map_request_error)?;
        let sdp = validate_answer(&body)?;

        debug!(
            "WHEP answer accepted: status={}, {} bytes, location={:?}",
            status,
            sdp.len(),
            location.as_ref().map(Url::as_str)
        );

        Ok(WhepAnswer { sdp, location })
    }

    /// Tear down a WHEP session resource
    #[instrument(skip(self), fields(location = %location))]
    pub async fn delete_session(&self, location: &Url) -> std::result::Result<(), NegotiationError> {
        let mut request = self.client.delete(location.clone());
        if let Some(auth) = self.build_auth_header() {
            request = request.header(AUTHORIZATION, auth);
        }

        let response = request.send().await.map_err(map_request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(NegotiationError::EndpointRejected {
                status: status.as_u16(),
                message: "session DELETE rejected".to_string(),
            });
        }

        debug!("WHEP session deleted");
        Ok(())
    }
}

fn map_request_error(e: reqwest::Error) -> NegotiationError {
    if e.is_timeout() {
        NegotiationError::Timeout(format!("WHEP request timed out: {}", e))
    } else {
        NegotiationError::EndpointUnreachable(e.to_string())
    }
}

fn truncate_message(message: &mut String) {
    if message.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint() {
        let url = parse_endpoint("http://192.168.1.50:8889/cam01/whep").unwrap();
        assert_eq!(url.host_str(), Some("192.168.1.50"));
        assert_eq!(url.path(), "/cam01/whep");

        assert!(parse_endpoint("https://media.example.com/whep").is_ok());
    }

    #[test]
    fn test_parse_endpoint_rejects_other_schemes() {
        for endpoint in ["", "rtsp://192.168.1.50/cam01", "not a url", "ftp://host/x"] {
            let err = parse_endpoint(endpoint).unwrap_err();
            assert!(matches!(err, Error::InvalidEndpoint(_)), "{}", endpoint);
        }
    }

    #[test]
    fn test_location_resolution() {
        let endpoint = parse_endpoint("http://cam.local:8889/cam01/whep").unwrap();
        let relative = endpoint.join("/cam01/whep/session/42").unwrap();
        assert_eq!(relative.as_str(), "http://cam.local:8889/cam01/whep/session/42");

        let absolute = endpoint.join("http://other.local/s/1").unwrap();
        assert_eq!(absolute.host_str(), Some("other.local"));
    }

    #[test]
    fn test_truncate_message() {
        let mut long = "é".repeat(400);
        truncate_message(&mut long);
        assert!(long.len() <= MAX_ERROR_BODY);

        let mut short = "bad offer".to_string();
        truncate_message(&mut short);
        assert_eq!(short, "bad offer");
    }

    #[test]
    fn test_auth_header() {
        let client = WhepClient::new(Duration::from_secs(1), Some("token".to_string())).unwrap();
        assert_eq!(client.build_auth_header().as_deref(), Some("Bearer token"));

        let client = WhepClient::new(Duration::from_secs(1), None).unwrap();
        assert!(client.build_auth_header().is_none());
    }
}
