use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use hyper::body::to_bytes;
use hyper::client::HttpConnector;
use hyper::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use hyper::{Body, Client, Method, Request, StatusCode, Uri};
use hyper_rustls::HttpsConnector;
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore};
use serde::Serialize;
use serde::de::DeserializeOwned;
use shelf_primitives::EntityKind;
use tokio::time::timeout;
use tracing::{debug, warn};
use webpki_roots::TLS_SERVER_ROOTS;

use crate::credentials::CredentialStore;
use crate::traits::{GatewayError, GatewayResult};

pub(crate) type HyperClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Default per-request timeout for remote backends.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn build_https_client() -> HyperClient {
    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(TLS_SERVER_ROOTS.iter().map(|anchor| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            anchor.subject,
            anchor.spki,
            anchor.name_constraints,
        )
    }));

    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let mut http = HttpConnector::new();
    http.enforce_http(false);

    let connector = HttpsConnector::from((http, Arc::new(config)));

    Client::builder().build::<_, Body>(connector)
}

/// Normalizes a base URL to `scheme://host[:port]/prefix/`.
pub(crate) fn sanitize_base_url(service: &str, input: &str) -> GatewayResult<String> {
    let mut base = input.trim().to_owned();
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(GatewayError::configuration(format!(
            "{service} base URL must start with http:// or https://"
        )));
    }
    if !base.ends_with('/') {
        base.push('/');
    }
    base.parse::<Uri>().map_err(|err| {
        GatewayError::configuration(format!("invalid {service} base URL: {err}"))
    })?;
    Ok(base)
}

/// Percent-encodes everything outside the RFC 3986 unreserved set.
pub(crate) fn encode_component(input: &str) -> String {
    urlencoding::encode(input).into_owned()
}

/// Joins encoded `key=value` pairs into a query string (without the `?`).
pub(crate) fn query_string<K: AsRef<str>, V: AsRef<str>>(pairs: &[(K, V)]) -> String {
    pairs
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                urlencoding::encode(key.as_ref()),
                urlencoding::encode(value.as_ref())
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Placeholder for requests without a body.
pub(crate) const NO_BODY: Option<&'static ()> = None;

/// Entity a request targets, used to build `NotFound` errors from a 404.
pub(crate) type Target<'a> = Option<(EntityKind, &'a str)>;

/// JSON-over-HTTP plumbing shared by the REST and hosted clients.
pub(crate) struct HttpTransport {
    client: HyperClient,
    service: &'static str,
    base_url: String,
    timeout: Duration,
    credentials: CredentialStore,
    api_key: Option<String>,
}

impl HttpTransport {
    pub(crate) fn new(
        service: &'static str,
        base_url: &str,
        timeout: Duration,
        credentials: CredentialStore,
    ) -> GatewayResult<Self> {
        Ok(Self {
            client: build_https_client(),
            service,
            base_url: sanitize_base_url(service, base_url)?,
            timeout,
            credentials,
            api_key: None,
        })
    }

    /// Sends `apikey` on every request and uses it as the bearer when signed out.
    pub(crate) fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    fn uri(&self, path: &str) -> GatewayResult<Uri> {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
            .parse::<Uri>()
            .map_err(|err| {
                GatewayError::validation(format!("invalid {} request path: {err}", self.service))
            })
    }

    /// Issues a request and returns the raw body of a 2xx response.
    pub(crate) async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        headers: &[(&'static str, &str)],
        target: Target<'_>,
    ) -> GatewayResult<Bytes> {
        let uri = self.uri(path)?;
        let mut builder = Request::builder()
            .method(method.clone())
            .uri(uri)
            .header(ACCEPT, "application/json");

        if let Some(key) = &self.api_key {
            builder = builder.header("apikey", key.as_str());
        }
        if let Some(token) = self.credentials.token().or_else(|| self.api_key.clone()) {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let request = match body {
            Some(bytes) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(bytes)),
            None => builder.body(Body::empty()),
        }
        .map_err(|err| {
            GatewayError::transport(format!("failed to build {} request: {err}", self.service))
        })?;

        debug!(service = self.service, %method, path, "sending gateway request");

        let response = timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| GatewayError::transport(format!("{} request timed out", self.service)))?
            .map_err(|err| {
                GatewayError::transport(format!("{} request failed: {err}", self.service))
            })?;

        let status = response.status();
        let bytes = to_bytes(response.into_body()).await.map_err(|err| {
            GatewayError::transport(format!("failed to read {} response: {err}", self.service))
        })?;

        if status.is_success() {
            return Ok(bytes);
        }

        if status == StatusCode::UNAUTHORIZED {
            warn!(service = self.service, path, "backend rejected credentials; signing out");
            self.credentials.clear();
        }
        Err(map_status(self.service, status, &bytes, target))
    }

    /// Sends an optional JSON body and decodes a JSON response.
    pub(crate) async fn json<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        headers: &[(&'static str, &str)],
        target: Target<'_>,
    ) -> GatewayResult<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let payload = body.map(|body| self.encode(body)).transpose()?;
        let bytes = self.send(method, path, payload, headers, target).await?;
        self.decode(&bytes)
    }

    /// Sends an optional JSON body and discards the response body.
    pub(crate) async fn execute<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        headers: &[(&'static str, &str)],
        target: Target<'_>,
    ) -> GatewayResult<()>
    where
        B: Serialize + ?Sized + Sync,
    {
        let payload = body.map(|body| self.encode(body)).transpose()?;
        self.send(method, path, payload, headers, target)
            .await
            .map(|_| ())
    }

    fn encode<B: Serialize + ?Sized>(&self, body: &B) -> GatewayResult<Vec<u8>> {
        serde_json::to_vec(body).map_err(|err| {
            GatewayError::validation(format!("failed to encode {} request: {err}", self.service))
        })
    }

    pub(crate) fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> GatewayResult<T> {
        serde_json::from_slice(bytes).map_err(|err| {
            GatewayError::transport(format!("failed to decode {} response: {err}", self.service))
        })
    }
}

/// Maps a non-success HTTP status onto the gateway error taxonomy.
pub(crate) fn map_status(
    service: &str,
    status: StatusCode,
    body: &[u8],
    target: Target<'_>,
) -> GatewayError {
    let reason = error_message(body).unwrap_or_else(|| format!("{service} returned {status}"));
    match status.as_u16() {
        400 | 409 | 422 => GatewayError::validation(reason),
        401 | 403 => GatewayError::auth(reason),
        404 => match target {
            Some((kind, id)) => GatewayError::not_found(kind, id),
            None => GatewayError::transport(reason),
        },
        _ => GatewayError::transport(format!("{service} returned {status}: {reason}")),
    }
}

fn error_message(body: &[u8]) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    let parsed: Option<serde_json::Value> = serde_json::from_slice(body).ok();
    let from_json = parsed.and_then(|value| {
        ["message", "msg", "error_description", "error"]
            .iter()
            .find_map(|key| value.get(key).and_then(serde_json::Value::as_str).map(str::to_owned))
    });
    from_json.or_else(|| {
        let text = String::from_utf8_lossy(body).trim().to_owned();
        (!text.is_empty()).then_some(text)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_base_url_without_scheme() {
        let err = sanitize_base_url("REST", "localhost:3000").unwrap_err();
        assert!(matches!(err, GatewayError::Configuration { .. }));
    }

    #[test]
    fn sanitize_adds_trailing_slash() {
        assert_eq!(
            sanitize_base_url("REST", " http://localhost:3000 ").unwrap(),
            "http://localhost:3000/"
        );
    }

    #[test]
    fn encodes_reserved_characters() {
        assert_eq!(encode_component("a b&c/d"), "a%20b%26c%2Fd");
        assert_eq!(encode_component("é"), "%C3%A9");
        assert_eq!(encode_component("v1.2_beta~x-y"), "v1.2_beta~x-y");
        assert_eq!(
            query_string(&[("searchQuery", "x y"), ("page", "2")]),
            "searchQuery=x%20y&page=2"
        );
    }

    #[test]
    fn status_mapping_follows_taxonomy() {
        let body = br#"{"message":"title must not be empty"}"#;
        assert_eq!(
            map_status("REST", StatusCode::UNPROCESSABLE_ENTITY, body, None),
            GatewayError::validation("title must not be empty")
        );
        assert!(matches!(
            map_status("REST", StatusCode::FORBIDDEN, b"", None),
            GatewayError::Auth { .. }
        ));
        assert_eq!(
            map_status(
                "REST",
                StatusCode::NOT_FOUND,
                b"",
                Some((EntityKind::Prompt, "p1"))
            ),
            GatewayError::not_found(EntityKind::Prompt, "p1")
        );
        assert!(matches!(
            map_status("REST", StatusCode::BAD_GATEWAY, b"upstream down", None),
            GatewayError::Transport { .. }
        ));
    }

    #[test]
    fn transport_joins_paths_onto_base() {
        let transport = HttpTransport::new(
            "REST",
            "http://localhost:3000/v2",
            DEFAULT_TIMEOUT,
            CredentialStore::new(),
        )
        .unwrap();
        assert_eq!(transport.base_url(), "http://localhost:3000/v2/");
        assert_eq!(
            transport.uri("/api/prompts").unwrap().to_string(),
            "http://localhost:3000/v2/api/prompts"
        );
    }
}
