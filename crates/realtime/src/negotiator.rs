//! Credential and SDP Exchange
//!
//! Establishing the transport takes two collaborator calls with different
//! payload shapes:
//!
//! 1. A JSON `POST` with no body to the credential-minting endpoint, which
//!    answers with a short-lived client secret.
//! 2. A raw `POST` of the offer SDP to the signaling endpoint, authorized with
//!    that secret, which answers with the raw answer SDP.
//!
//! Every step runs under the same per-step timeout; a timeout is a
//! negotiation failure like any other.

use crate::error::SessionError;
use crate::transport::PeerTransport;
use anyhow::{Context, anyhow};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

/// Content type of the offer body sent to the signaling endpoint.
pub const SDP_CONTENT_TYPE: &str = "application/sdp";

/// Places a credential may appear in the minting endpoint's response.
const CREDENTIAL_PATHS: &[&[&str]] = &[
    &["clientSecret"],
    &["client_secret"],
    &["client_secret", "value"],
    &["value"],
];

/// Where the two negotiation collaborators live.
#[derive(Clone, Debug)]
pub struct NegotiationEndpoints {
    pub credential_url: String,
    pub signaling_url: String,
    pub model: String,
}

/// Performs the one-shot credential and offer/answer exchange.
pub struct TransportNegotiator {
    client: reqwest::Client,
    endpoints: NegotiationEndpoints,
    timeout: Duration,
}

impl TransportNegotiator {
    pub fn new(client: reqwest::Client, endpoints: NegotiationEndpoints, timeout: Duration) -> Self {
        Self {
            client,
            endpoints,
            timeout,
        }
    }

    /// Runs `step` under the per-step timeout, mapping any failure to a
    /// negotiation error.
    pub(crate) async fn within<T>(
        &self,
        step: &'static str,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T, SessionError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(SessionError::negotiation(e.context(step))),
            Err(_) => Err(SessionError::Negotiation(format!(
                "{step}: timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }

    /// Asks the minting endpoint for an ephemeral credential.
    pub async fn request_credential(&self) -> Result<SecretString, SessionError> {
        self.within("requesting credential", async {
            let response = self
                .client
                .post(&self.endpoints.credential_url)
                .header(ACCEPT, "application/json")
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                return Err(anyhow!("credential endpoint responded with status {status}"));
            }
            let body: Value = response
                .json()
                .await
                .context("credential response is not JSON")?;
            extract_credential(&body).ok_or_else(|| anyhow!("no client secret returned"))
        })
        .await
    }

    /// Trades the offer SDP for the answer SDP.
    pub async fn exchange_offer(
        &self,
        credential: &SecretString,
        offer_sdp: &str,
    ) -> Result<String, SessionError> {
        self.within("exchanging offer", async {
            let response = self
                .client
                .post(&self.endpoints.signaling_url)
                .query(&[("model", self.endpoints.model.as_str())])
                .bearer_auth(credential.expose_secret())
                .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
                .body(offer_sdp.to_string())
                .send()
                .await?;
            let status = response.status();
            let answer = response.text().await?;
            if !status.is_success() {
                return Err(anyhow!("signaling responded with status {status}: {answer}"));
            }
            if answer.trim().is_empty() {
                return Err(anyhow!("signaling returned an empty answer"));
            }
            Ok(answer)
        })
        .await
    }

    /// Steps 3 to 6 of session start: offer, local description, credential,
    /// exchange, remote description. Strictly sequential.
    pub async fn negotiate(&self, transport: &dyn PeerTransport) -> Result<(), SessionError> {
        let offer = self
            .within("creating offer", transport.create_offer())
            .await?;
        self.within("setting local description", transport.set_local_description(&offer))
            .await?;
        let offer = transport.local_description().await.unwrap_or(offer);
        debug!(offer_len = offer.len(), "Local description set");

        let credential = self.request_credential().await?;
        let answer = self.exchange_offer(&credential, &offer).await?;
        debug!(answer_len = answer.len(), "Received answer");

        self.within("setting remote description", transport.set_remote_description(&answer))
            .await?;
        info!(model = %self.endpoints.model, "Transport negotiated");
        Ok(())
    }
}

fn extract_credential(body: &Value) -> Option<SecretString> {
    CREDENTIAL_PATHS.iter().find_map(|path| {
        let value = path.iter().try_fold(body, |current, key| current.get(key))?;
        value
            .as_str()
            .filter(|s| !s.is_empty())
            .map(|s| SecretString::from(s.to_string()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn negotiator(server: &MockServer, timeout: Duration) -> TransportNegotiator {
        TransportNegotiator::new(
            reqwest::Client::new(),
            NegotiationEndpoints {
                credential_url: format!("{}/api/client-secret", server.uri()),
                signaling_url: format!("{}/v1/realtime", server.uri()),
                model: "gpt-realtime".to_string(),
            },
            timeout,
        )
    }

    #[test]
    fn test_extract_credential_shapes() {
        let cases = [
            json!({ "clientSecret": "a" }),
            json!({ "client_secret": "a" }),
            json!({ "client_secret": { "value": "a", "expires_at": 1 } }),
            json!({ "value": "a", "session": {} }),
        ];
        for body in cases {
            let secret = extract_credential(&body).expect("credential should be found");
            assert_eq!(secret.expose_secret(), "a");
        }

        assert!(extract_credential(&json!({ "clientSecret": "" })).is_none());
        assert!(extract_credential(&json!({ "error": "nope" })).is_none());
    }

    #[tokio::test]
    async fn test_request_credential() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/client-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "clientSecret": "ek_123" })))
            .expect(1)
            .mount(&server)
            .await;

        let secret = negotiator(&server, Duration::from_secs(5))
            .request_credential()
            .await
            .unwrap();
        assert_eq!(secret.expose_secret(), "ek_123");
    }

    #[tokio::test]
    async fn test_request_credential_missing_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/client-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "error": "Missing OPENAI_API_KEY" })))
            .mount(&server)
            .await;

        let err = negotiator(&server, Duration::from_secs(5))
            .request_credential()
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Negotiation(ref m) if m.contains("no client secret")));
    }

    #[tokio::test]
    async fn test_request_credential_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/client-secret"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "clientSecret": "ignored" })))
            .mount(&server)
            .await;

        let err = negotiator(&server, Duration::from_secs(5))
            .request_credential()
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Negotiation(ref m) if m.contains("500")));
    }

    #[tokio::test]
    async fn test_exchange_offer_sends_raw_sdp() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/realtime"))
            .and(query_param("model", "gpt-realtime"))
            .and(header("authorization", "Bearer ek_123"))
            .and(header("content-type", SDP_CONTENT_TYPE))
            .and(body_string("v=0 offer"))
            .respond_with(ResponseTemplate::new(201).set_body_string("v=0 answer"))
            .expect(1)
            .mount(&server)
            .await;

        let answer = negotiator(&server, Duration::from_secs(5))
            .exchange_offer(&SecretString::from("ek_123".to_string()), "v=0 offer")
            .await
            .unwrap();
        assert_eq!(answer, "v=0 answer");
    }

    #[tokio::test]
    async fn test_exchange_offer_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/realtime"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = negotiator(&server, Duration::from_secs(5))
            .exchange_offer(&SecretString::from("ek_123".to_string()), "v=0 offer")
            .await
            .unwrap_err();
        match err {
            SessionError::Negotiation(message) => {
                assert!(message.contains("exchanging offer"));
                assert!(message.contains("401"));
            }
            other => panic!("Expected Negotiation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exchange_offer_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/realtime"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("v=0 answer")
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let err = negotiator(&server, Duration::from_millis(50))
            .exchange_offer(&SecretString::from("ek_123".to_string()), "v=0 offer")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Negotiation(ref m) if m.contains("timed out")));
    }
}
