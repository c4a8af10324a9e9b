//! OpenStack implementation of the provider interface.
//!
//! Authentication happens once per batch against Keystone v3; the resulting
//! session (token plus service endpoints resolved from the catalog) is
//! shared read-only by the orchestrators and the sweeper. The API wrappers
//! themselves are thin: build a request, send it, map the response.

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::header::HeaderValue;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::BackupConfig;
use crate::provider::{
    CloudProvider, ProviderFuture, Server, ServerImage, Volume, VolumeSnapshot,
};

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";

/// Catalog service types accepted for the block-storage endpoint.
const VOLUME_SERVICE_TYPES: &[&str] = &["volumev3", "block-storage"];
/// Catalog service types accepted for the compute endpoint.
const COMPUTE_SERVICE_TYPES: &[&str] = &["compute"];
/// Catalog service types accepted for the image endpoint.
const IMAGE_SERVICE_TYPES: &[&str] = &["image"];

/// Errors raised by the OpenStack provider.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OpenStackError {
    /// Raised when the high-level configuration is incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when Keystone rejects the password authentication request.
    /// There is no retry; the whole batch aborts.
    #[error("authentication failed: {message}")]
    Authentication {
        /// Description of the failure.
        message: String,
    },
    /// Raised when the service catalog carries no public endpoint for a
    /// required service.
    #[error("no public endpoint for service '{service}' in the catalog")]
    MissingEndpoint {
        /// Service type that could not be resolved.
        service: String,
    },
    /// Raised when the HTTP transport fails before a response arrives.
    #[error("transport error: {message}")]
    Transport {
        /// Description from the HTTP client.
        message: String,
    },
    /// Raised when the provider answers with a non-success status.
    #[error("API error {status}: {message}")]
    Api {
        /// HTTP status code returned by the provider.
        status: u16,
        /// Response body, as far as it could be read.
        message: String,
    },
    /// Raised when a response body cannot be decoded.
    #[error("decode error: {message}")]
    Decode {
        /// Description of the decoding failure.
        message: String,
    },
}

impl From<reqwest::Error> for OpenStackError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport {
            message: value.to_string(),
        }
    }
}

/// Authenticated handle to one OpenStack deployment.
///
/// Immutable once created; cloned freely across concurrent units.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OpenStackSession {
    /// Token issued by Keystone, sent as `X-Auth-Token` on every call.
    token: String,
    /// Public block-storage endpoint (includes the project segment).
    volume_endpoint: String,
    /// Public compute endpoint.
    compute_endpoint: String,
    /// Public image endpoint (version segment appended per call).
    image_endpoint: String,
}

impl OpenStackSession {
    /// Authenticates against Keystone v3 with the password method and
    /// resolves the service endpoints from the returned catalog.
    ///
    /// A single attempt is made; the caller decides whether to abort the
    /// batch on failure.
    ///
    /// # Errors
    ///
    /// Returns [`OpenStackError::Authentication`] when Keystone rejects the
    /// request or issues no token, and [`OpenStackError::MissingEndpoint`]
    /// when the catalog lacks a required service.
    pub async fn authenticate(
        http: &Client,
        config: &BackupConfig,
    ) -> Result<Self, OpenStackError> {
        info!(auth_url = %config.auth_url, "authenticating against keystone");
        let url = format!("{}/auth/tokens", config.auth_url.trim_end_matches('/'));
        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "id": config.user_id,
                            "password": config.password,
                        }
                    }
                },
                "scope": {
                    "project": { "id": config.project_id }
                }
            }
        });

        let response = http.post(url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = read_error_body(status, response).await;
            return Err(OpenStackError::Authentication { message });
        }

        let token = response
            .headers()
            .get(SUBJECT_TOKEN_HEADER)
            .and_then(|value: &HeaderValue| value.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| OpenStackError::Authentication {
                message: format!("response carried no {SUBJECT_TOKEN_HEADER} header"),
            })?;

        let envelope: TokenEnvelope =
            response.json().await.map_err(|err| OpenStackError::Decode {
                message: err.to_string(),
            })?;
        let catalog = envelope.token.catalog;

        Ok(Self {
            token,
            volume_endpoint: resolve_endpoint(&catalog, VOLUME_SERVICE_TYPES)?,
            compute_endpoint: resolve_endpoint(&catalog, COMPUTE_SERVICE_TYPES)?,
            image_endpoint: resolve_endpoint(&catalog, IMAGE_SERVICE_TYPES)?,
        })
    }

    /// Builds a session directly from endpoint URLs, bypassing Keystone.
    /// Intended for tests against scripted servers.
    #[must_use]
    pub fn for_endpoints(
        token: impl Into<String>,
        volume_endpoint: impl Into<String>,
        compute_endpoint: impl Into<String>,
        image_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            volume_endpoint: volume_endpoint.into().trim_end_matches('/').to_owned(),
            compute_endpoint: compute_endpoint.into().trim_end_matches('/').to_owned(),
            image_endpoint: image_endpoint.into().trim_end_matches('/').to_owned(),
        }
    }
}

/// Picks the public URL for the first catalog entry matching one of the
/// accepted service types.
fn resolve_endpoint(
    catalog: &[CatalogEntry],
    service_types: &[&str],
) -> Result<String, OpenStackError> {
    catalog
        .iter()
        .filter(|entry| service_types.contains(&entry.service_type.as_str()))
        .flat_map(|entry| entry.endpoints.iter())
        .find(|endpoint| endpoint.interface == "public")
        .map(|endpoint| endpoint.url.trim_end_matches('/').to_owned())
        .ok_or_else(|| OpenStackError::MissingEndpoint {
            service: service_types.join("|"),
        })
}

async fn read_error_body(status: StatusCode, response: reqwest::Response) -> String {
    let body = response.text().await.unwrap_or_default();
    format!("{status}: {body}")
}

/// Parses the timestamp formats OpenStack services emit: RFC 3339 (Glance)
/// and zone-less microsecond timestamps treated as UTC (Cinder, Nova).
pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, OpenStackError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|naive| naive.and_utc())
        })
        .map_err(|err| OpenStackError::Decode {
            message: format!("bad timestamp '{value}': {err}"),
        })
}

/// Provider backed by the OpenStack REST APIs.
#[derive(Clone, Debug)]
pub struct OpenStackProvider {
    http: Client,
    session: OpenStackSession,
}

impl OpenStackProvider {
    /// Validates the configuration, authenticates, and wires up the client.
    ///
    /// # Errors
    ///
    /// Returns [`OpenStackError::Config`] when validation fails and the
    /// authentication errors from [`OpenStackSession::authenticate`].
    pub async fn connect(config: &BackupConfig) -> Result<Self, OpenStackError> {
        config
            .validate()
            .map_err(|err| OpenStackError::Config(err.to_string()))?;
        let http = Client::new();
        let session = OpenStackSession::authenticate(&http, config).await?;
        Ok(Self::new(http, session))
    }

    /// Wraps an already established session. Exposed so tests can point the
    /// provider at a scripted HTTP server.
    #[must_use]
    pub const fn new(http: Client, session: OpenStackSession) -> Self {
        Self { http, session }
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(AUTH_TOKEN_HEADER, &self.session.token)
    }

    async fn get_json<T>(&self, url: String, query: &[(&str, &str)]) -> Result<T, OpenStackError>
    where
        T: DeserializeOwned,
    {
        debug!(url = %url, "GET");
        let response = self.authed(self.http.get(url).query(query)).send().await?;
        decode_response(response).await
    }

    async fn delete(&self, url: String) -> Result<(), OpenStackError> {
        debug!(url = %url, "DELETE");
        let response = self.authed(self.http.delete(url)).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(OpenStackError::Api {
            status: status.as_u16(),
            message: read_error_body(status, response).await,
        })
    }

    fn volume_url(&self, path: &str) -> String {
        format!("{}{path}", self.session.volume_endpoint)
    }

    fn compute_url(&self, path: &str) -> String {
        format!("{}{path}", self.session.compute_endpoint)
    }

    fn image_url(&self, path: &str) -> String {
        format!("{}/v2{path}", self.session.image_endpoint)
    }
}

async fn decode_response<T>(response: reqwest::Response) -> Result<T, OpenStackError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    if !status.is_success() {
        return Err(OpenStackError::Api {
            status: status.as_u16(),
            message: read_error_body(status, response).await,
        });
    }
    response.json().await.map_err(|err| OpenStackError::Decode {
        message: err.to_string(),
    })
}

impl CloudProvider for OpenStackProvider {
    type Error = OpenStackError;

    fn list_volumes<'a>(&'a self, status: &'a str) -> ProviderFuture<'a, Vec<Volume>, Self::Error> {
        Box::pin(async move {
            let envelope: VolumesEnvelope = self
                .get_json(
                    self.volume_url("/volumes/detail"),
                    &[("all_tenants", "1"), ("status", status)],
                )
                .await?;
            envelope
                .volumes
                .into_iter()
                .map(VolumeDoc::into_volume)
                .collect()
        })
    }

    fn create_volume_snapshot<'a>(
        &'a self,
        volume_id: &'a str,
        name: &'a str,
    ) -> ProviderFuture<'a, VolumeSnapshot, Self::Error> {
        Box::pin(async move {
            let body = json!({
                "snapshot": {
                    "volume_id": volume_id,
                    "name": name,
                    "description": "Snapshot automatically created by backup service",
                    "force": true,
                }
            });
            let response = self
                .authed(self.http.post(self.volume_url("/snapshots")).json(&body))
                .send()
                .await?;
            let envelope: SnapshotEnvelope = decode_response(response).await?;
            envelope.snapshot.into_snapshot()
        })
    }

    fn get_volume_snapshot<'a>(
        &'a self,
        snapshot_id: &'a str,
    ) -> ProviderFuture<'a, VolumeSnapshot, Self::Error> {
        Box::pin(async move {
            let envelope: SnapshotEnvelope = self
                .get_json(self.volume_url(&format!("/snapshots/{snapshot_id}")), &[])
                .await?;
            envelope.snapshot.into_snapshot()
        })
    }

    fn list_volume_snapshots<'a>(
        &'a self,
        status: &'a str,
    ) -> ProviderFuture<'a, Vec<VolumeSnapshot>, Self::Error> {
        Box::pin(async move {
            let envelope: SnapshotsEnvelope = self
                .get_json(
                    self.volume_url("/snapshots/detail"),
                    &[("all_tenants", "1"), ("status", status)],
                )
                .await?;
            envelope
                .snapshots
                .into_iter()
                .map(SnapshotDoc::into_snapshot)
                .collect()
        })
    }

    fn delete_volume_snapshot<'a>(
        &'a self,
        snapshot_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.delete(self.volume_url(&format!("/snapshots/{snapshot_id}")))
                .await
        })
    }

    fn list_servers<'a>(&'a self, status: &'a str) -> ProviderFuture<'a, Vec<Server>, Self::Error> {
        Box::pin(async move {
            let envelope: ServersEnvelope = self
                .get_json(
                    self.compute_url("/servers/detail"),
                    &[("all_tenants", "1"), ("status", status)],
                )
                .await?;
            Ok(envelope
                .servers
                .into_iter()
                .map(ServerDoc::into_server)
                .collect())
        })
    }

    fn create_server_image<'a>(
        &'a self,
        server_id: &'a str,
        name: &'a str,
    ) -> ProviderFuture<'a, String, Self::Error> {
        Box::pin(async move {
            let body = json!({ "createImage": { "name": name } });
            let response = self
                .authed(
                    self.http
                        .post(self.compute_url(&format!("/servers/{server_id}/action")))
                        .json(&body),
                )
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                return Err(OpenStackError::Api {
                    status: status.as_u16(),
                    message: read_error_body(status, response).await,
                });
            }

            // Newer compute microversions return the image id in the body;
            // older ones only set a Location header pointing at the image.
            let location_id = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.rsplit('/').next())
                .map(str::to_owned);
            let parsed: CreateImageResponse = response.json().await.unwrap_or_default();

            parsed
                .image_id
                .or(location_id)
                .ok_or_else(|| OpenStackError::Decode {
                    message: String::from("create image response carried no image id"),
                })
        })
    }

    fn get_image<'a>(
        &'a self,
        image_id: &'a str,
    ) -> ProviderFuture<'a, ServerImage, Self::Error> {
        Box::pin(async move {
            let doc: ImageDoc = self
                .get_json(self.image_url(&format!("/images/{image_id}")), &[])
                .await?;
            doc.into_image()
        })
    }

    fn list_images<'a>(
        &'a self,
        status: &'a str,
    ) -> ProviderFuture<'a, Vec<ServerImage>, Self::Error> {
        Box::pin(async move {
            let envelope: ImagesEnvelope = self
                .get_json(self.image_url("/images"), &[("status", status)])
                .await?;
            envelope
                .images
                .into_iter()
                .map(ImageDoc::into_image)
                .collect()
        })
    }

    fn delete_image<'a>(&'a self, image_id: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.delete(self.image_url(&format!("/images/{image_id}")))
                .await
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenEnvelope {
    token: TokenDoc,
}

#[derive(Debug, Deserialize)]
struct TokenDoc {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Deserialize)]
struct CatalogEndpoint {
    interface: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct VolumesEnvelope {
    volumes: Vec<VolumeDoc>,
}

#[derive(Debug, Deserialize)]
struct VolumeDoc {
    id: String,
    status: String,
    created_at: String,
}

impl VolumeDoc {
    fn into_volume(self) -> Result<Volume, OpenStackError> {
        Ok(Volume {
            created_at: parse_timestamp(&self.created_at)?,
            id: self.id,
            status: self.status,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SnapshotEnvelope {
    snapshot: SnapshotDoc,
}

#[derive(Debug, Deserialize)]
struct SnapshotsEnvelope {
    snapshots: Vec<SnapshotDoc>,
}

#[derive(Debug, Deserialize)]
struct SnapshotDoc {
    id: String,
    volume_id: String,
    #[serde(default)]
    name: Option<String>,
    status: String,
    created_at: String,
}

impl SnapshotDoc {
    fn into_snapshot(self) -> Result<VolumeSnapshot, OpenStackError> {
        Ok(VolumeSnapshot {
            created_at: parse_timestamp(&self.created_at)?,
            id: self.id,
            volume_id: self.volume_id,
            name: self.name.unwrap_or_default(),
            status: self.status,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ServersEnvelope {
    servers: Vec<ServerDoc>,
}

#[derive(Debug, Deserialize)]
struct ServerDoc {
    id: String,
    name: String,
    status: String,
}

impl ServerDoc {
    fn into_server(self) -> Server {
        Server {
            id: self.id,
            name: self.name,
            status: self.status,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct CreateImageResponse {
    #[serde(default)]
    image_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImagesEnvelope {
    images: Vec<ImageDoc>,
}

#[derive(Debug, Deserialize)]
struct ImageDoc {
    id: String,
    #[serde(default)]
    name: Option<String>,
    status: String,
    created_at: String,
}

impl ImageDoc {
    fn into_image(self) -> Result<ServerImage, OpenStackError> {
        Ok(ServerImage {
            created_at: parse_timestamp(&self.created_at)?,
            id: self.id,
            name: self.name.unwrap_or_default(),
            status: self.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(service_type: &str, interface: &str, url: &str) -> CatalogEntry {
        CatalogEntry {
            service_type: service_type.to_owned(),
            endpoints: vec![CatalogEndpoint {
                interface: interface.to_owned(),
                url: url.to_owned(),
            }],
        }
    }

    #[test]
    fn resolve_endpoint_prefers_public_interface() {
        let catalog = vec![
            CatalogEntry {
                service_type: String::from("volumev3"),
                endpoints: vec![
                    CatalogEndpoint {
                        interface: String::from("internal"),
                        url: String::from("http://internal:8776/v3/p1"),
                    },
                    CatalogEndpoint {
                        interface: String::from("public"),
                        url: String::from("http://public:8776/v3/p1/"),
                    },
                ],
            },
            entry("compute", "public", "http://nova:8774/v2.1"),
        ];

        let url = resolve_endpoint(&catalog, VOLUME_SERVICE_TYPES).expect("endpoint resolves");
        assert_eq!(url, "http://public:8776/v3/p1");
    }

    #[test]
    fn resolve_endpoint_accepts_service_type_aliases() {
        let catalog = vec![entry("block-storage", "public", "http://cinder:8776/v3/p1")];

        let url = resolve_endpoint(&catalog, VOLUME_SERVICE_TYPES).expect("alias resolves");
        assert_eq!(url, "http://cinder:8776/v3/p1");
    }

    #[test]
    fn resolve_endpoint_reports_missing_service() {
        let catalog = vec![entry("compute", "public", "http://nova:8774/v2.1")];

        let err = resolve_endpoint(&catalog, IMAGE_SERVICE_TYPES).expect_err("image missing");
        assert!(matches!(err, OpenStackError::MissingEndpoint { .. }));
    }

    #[test]
    fn parse_timestamp_accepts_rfc3339() {
        let parsed = parse_timestamp("2023-01-01T10:20:30Z").expect("rfc3339 parses");
        let expected = Utc
            .with_ymd_and_hms(2023, 1, 1, 10, 20, 30)
            .single()
            .expect("valid timestamp");
        assert_eq!(parsed, expected);
    }

    #[test]
    fn parse_timestamp_accepts_zoneless_microseconds() {
        let parsed = parse_timestamp("2023-01-01T10:20:30.000000").expect("cinder format parses");
        let expected = Utc
            .with_ymd_and_hms(2023, 1, 1, 10, 20, 30)
            .single()
            .expect("valid timestamp");
        assert_eq!(parsed, expected);
    }

    #[test]
    fn parse_timestamp_rejects_garbage() {
        let err = parse_timestamp("yesterday").expect_err("garbage rejected");
        assert!(matches!(err, OpenStackError::Decode { .. }));
    }
}
