//! Typed HTTP client for the PuppetDB query API.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Certificate, Client, Identity, Url};
use thiserror::Error;

use crate::domain::types::{Node, ReportMetric};

/// Read access to PuppetDB used by the collector.
#[async_trait]
pub trait PuppetDb: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<Node>, UpstreamError>;

    async fn list_report_metrics(&self, report_hash: &str)
        -> Result<Vec<ReportMetric>, UpstreamError>;
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("GET {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("parsing response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid PuppetDB URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("reading {}: {source}", .path.display())]
    ReadTls {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("loading TLS material: {0}")]
    Tls(#[source] reqwest::Error),
    #[error("client certificate and key must be given together")]
    IncompleteIdentity,
    #[error("building HTTP client: {0}")]
    Build(#[source] reqwest::Error),
}

/// Connection settings for [`PuppetDbClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// PuppetDB query root, e.g. `https://puppetdb:8081/pdb/query`.
    pub url: String,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub ca_cert_path: Option<PathBuf>,
    pub ssl_verify: bool,
    pub timeout: Duration,
}

pub struct PuppetDbClient {
    base_url: Url,
    http: Client,
}

impl PuppetDbClient {
    pub fn new(opts: &ClientOptions) -> Result<Self, UpstreamError> {
        let base_url = parse_base_url(&opts.url)?;

        let mut builder = Client::builder()
            .timeout(opts.timeout)
            .danger_accept_invalid_certs(!opts.ssl_verify);

        match (&opts.cert_path, &opts.key_path) {
            (Some(cert), Some(key)) => {
                let mut pem = read_pem(cert)?;
                pem.push(b'\n');
                pem.extend(read_pem(key)?);
                let identity = Identity::from_pem(&pem).map_err(UpstreamError::Tls)?;
                builder = builder.identity(identity);
            }
            (None, None) => {}
            _ => return Err(UpstreamError::IncompleteIdentity),
        }

        if let Some(ca) = &opts.ca_cert_path {
            let ca = Certificate::from_pem(&read_pem(ca)?).map_err(UpstreamError::Tls)?;
            builder = builder.add_root_certificate(ca);
        }

        let http = builder.build().map_err(UpstreamError::Build)?;
        Ok(Self { base_url, http })
    }

    /// URL of an endpoint below the query root. Each segment is
    /// percent-encoded on its own, so a segment can never escape its slot.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, UpstreamError> {
        let invalid = |reason: &str| UpstreamError::InvalidUrl {
            url: format!("{}{}", self.base_url, segments.join("/")),
            reason: reason.to_string(),
        };

        if segments.iter().any(|s| matches!(*s, "" | "." | "..")) {
            return Err(invalid("empty or relative path segment"));
        }

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| invalid("URL cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, UpstreamError> {
        let resp = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|source| UpstreamError::Request {
                url: url.to_string(),
                source,
            })?;

        if !resp.status().is_success() {
            return Err(UpstreamError::Status {
                url: url.to_string(),
                status: resp.status(),
            });
        }

        resp.json().await.map_err(|source| UpstreamError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

#[async_trait]
impl PuppetDb for PuppetDbClient {
    async fn list_nodes(&self) -> Result<Vec<Node>, UpstreamError> {
        self.get(self.endpoint(&["v4", "nodes"])?).await
    }

    async fn list_report_metrics(
        &self,
        report_hash: &str,
    ) -> Result<Vec<ReportMetric>, UpstreamError> {
        self.get(self.endpoint(&["v4", "reports", report_hash, "metrics"])?)
            .await
    }
}

/// Parse the configured base URL, making sure endpoints land under it.
fn parse_base_url(raw: &str) -> Result<Url, UpstreamError> {
    let invalid = |reason: String| UpstreamError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };

    let mut url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {}", url.scheme())));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn read_pem(path: &Path) -> Result<Vec<u8>, UpstreamError> {
    std::fs::read(path).map_err(|source| UpstreamError::ReadTls {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path as AxumPath;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    fn options(url: &str) -> ClientOptions {
        ClientOptions {
            url: url.to_string(),
            cert_path: None,
            key_path: None,
            ca_cert_path: None,
            ssl_verify: true,
            timeout: Duration::from_secs(5),
        }
    }

    async fn nodes() -> Json<Value> {
        Json(json!([
            {
                "certname": "web01",
                "deactivated": null,
                "report_environment": "production",
                "report_timestamp": "2024-01-01T00:00:00.000Z",
                "latest_report_hash": "abc123",
                "latest_report_status": "changed"
            },
            { "certname": "web02", "report_timestamp": null }
        ]))
    }

    async fn report_metrics(AxumPath(hash): AxumPath<String>) -> Result<Json<Value>, StatusCode> {
        if hash != "abc123" {
            return Err(StatusCode::NOT_FOUND);
        }
        Ok(Json(json!([
            { "category": "time", "name": "total", "value": 12.5 },
            { "category": "resources", "name": "changed", "value": 3 }
        ])))
    }

    /// Serve a fake PuppetDB query API and return its `/pdb/query` root.
    async fn spawn_puppetdb() -> String {
        let app = Router::new()
            .route("/pdb/query/v4/nodes", get(nodes))
            .route("/pdb/query/v4/reports/{hash}/metrics", get(report_metrics));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/pdb/query")
    }

    #[tokio::test]
    async fn lists_nodes() {
        let url = spawn_puppetdb().await;
        let client = PuppetDbClient::new(&options(&url)).unwrap();

        let nodes = client.list_nodes().await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].certname, "web01");
        assert_eq!(nodes[0].latest_report_hash(), Some("abc123"));
        assert_eq!(nodes[1].report_timestamp(), None);
    }

    #[tokio::test]
    async fn lists_report_metrics() {
        let url = spawn_puppetdb().await;
        let client = PuppetDbClient::new(&options(&format!("{url}/"))).unwrap();

        let metrics = client.list_report_metrics("abc123").await.unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].category, "time");
        assert_eq!(metrics[1].value, 3.0);
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let url = spawn_puppetdb().await;
        let client = PuppetDbClient::new(&options(&url)).unwrap();

        let err = client.list_report_metrics("missing").await.unwrap_err();
        assert!(matches!(
            err,
            UpstreamError::Status { status, .. } if status == reqwest::StatusCode::NOT_FOUND
        ));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_request_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = PuppetDbClient::new(&options(&format!("http://{addr}/pdb/query"))).unwrap();
        let err = client.list_nodes().await.unwrap_err();
        assert!(matches!(err, UpstreamError::Request { .. }));
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        let url = parse_base_url("http://puppetdb:8080/pdb/query").unwrap();
        assert_eq!(url.path(), "/pdb/query/");

        let client = PuppetDbClient::new(&options("http://puppetdb:8080/pdb/query/")).unwrap();
        assert_eq!(
            client.endpoint(&["v4", "nodes"]).unwrap().as_str(),
            "http://puppetdb:8080/pdb/query/v4/nodes"
        );
    }

    #[test]
    fn report_hash_is_a_single_path_segment() {
        let client = PuppetDbClient::new(&options("http://puppetdb:8080/pdb/query")).unwrap();
        let url = client
            .endpoint(&["v4", "reports", "a/../b?c#d", "metrics"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://puppetdb:8080/pdb/query/v4/reports/a%2F..%2Fb%3Fc%23d/metrics"
        );
        assert!(matches!(
            client.endpoint(&["v4", "reports", "..", "metrics"]),
            Err(UpstreamError::InvalidUrl { .. })
        ));
        assert!(matches!(
            client.endpoint(&["v4", "reports", "", "metrics"]),
            Err(UpstreamError::InvalidUrl { .. })
        ));
    }

    #[tokio::test]
    async fn hash_with_slash_does_not_reach_another_endpoint() {
        let url = spawn_puppetdb().await;
        let client = PuppetDbClient::new(&options(&url)).unwrap();

        let err = client.list_report_metrics("../../nodes").await.unwrap_err();
        assert!(matches!(
            err,
            UpstreamError::Status { status, .. } if status == reqwest::StatusCode::NOT_FOUND
        ));
    }

    #[test]
    fn rejects_non_http_url() {
        assert!(matches!(
            parse_base_url("ftp://puppetdb/pdb/query"),
            Err(UpstreamError::InvalidUrl { .. })
        ));
        assert!(parse_base_url("not a url").is_err());
    }

    #[test]
    fn cert_without_key_is_rejected() {
        let mut opts = options("https://puppetdb:8081/pdb/query");
        opts.cert_path = Some(PathBuf::from("/nonexistent/cert.pem"));
        assert!(matches!(
            PuppetDbClient::new(&opts),
            Err(UpstreamError::IncompleteIdentity)
        ));
    }

    #[test]
    fn missing_ca_file_is_reported() {
        let mut opts = options("https://puppetdb:8081/pdb/query");
        opts.ca_cert_path = Some(PathBuf::from("/nonexistent/ca.pem"));
        assert!(matches!(
            PuppetDbClient::new(&opts),
            Err(UpstreamError::ReadTls { .. })
        ));
    }
}
