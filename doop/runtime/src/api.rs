use crate::metrics::ComplianceMetrics;
use doop_core::{aggregate_reports, FilterSet};
use doop_store::{ObjectSource, SnapshotCache};
use futures::future;
use hyper::{http, Request, Response};
use prometheus_client::registry::Registry;
use std::{convert::Infallible, sync::Arc};
use tower_http::compression::Compression;
use tracing::{error, trace, warn};

/// Serves the aggregated violation report and compliance metrics.
#[derive(Debug)]
pub struct Api<S> {
    cache: Arc<SnapshotCache<S>>,
    metrics: Arc<ComplianceMetrics>,
}

type Body = http_body_util::Full<bytes::Bytes>;

#[derive(Copy, Clone, Debug)]
enum Route {
    Violations,
    Metrics,
    Healthcheck,
}

// === impl Api ===

impl<S> Clone for Api<S> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<S, B> tower::Service<Request<B>> for Api<S>
where
    S: ObjectSource + Send + Sync + 'static,
{
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Infallible>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        trace!(method = %req.method(), uri = %req.uri());
        let route = match req.uri().path() {
            "/violations" | "/v2/violations" => Route::Violations,
            "/metrics" => Route::Metrics,
            "/healthcheck" => Route::Healthcheck,
            _ => return Box::pin(future::ok(empty(http::StatusCode::NOT_FOUND))),
        };
        if req.method() != http::Method::GET {
            let mut rsp = empty(http::StatusCode::METHOD_NOT_ALLOWED);
            rsp.headers_mut()
                .insert(http::header::ALLOW, http::HeaderValue::from_static("GET"));
            return Box::pin(future::ok(rsp));
        }

        let query = req.uri().query().unwrap_or_default().to_string();
        let api = self.clone();
        Box::pin(async move {
            let rsp = match route {
                Route::Violations => api.violations(&query).await,
                Route::Metrics => api.metrics().await,
                Route::Healthcheck => text(http::StatusCode::OK, "ok".to_string()),
            };
            Ok(rsp)
        })
    }
}

impl<S: ObjectSource> Api<S> {
    pub fn new(cache: Arc<SnapshotCache<S>>, metrics: ComplianceMetrics) -> Self {
        Self {
            cache,
            metrics: Arc::new(metrics),
        }
    }

    /// Wraps the API so that responses are gzip-encoded for clients that
    /// accept it.
    pub fn with_compression(self) -> Compression<Self> {
        Compression::new(self)
    }

    async fn violations(&self, query: &str) -> Response<Body> {
        let reports = match self.cache.get_reports().await {
            Ok(reports) => reports,
            Err(error) => {
                warn!(%error, "Failed to load reports");
                return text(http::StatusCode::INTERNAL_SERVER_ERROR, error.to_string());
            }
        };

        let filters = url::form_urlencoded::parse(query.as_bytes()).collect::<FilterSet>();
        let mut result = aggregate_reports(
            reports
                .iter()
                .map(|(name, report)| (name.as_str(), &**report)),
            &filters,
        );
        result.sort();

        match serde_json::to_vec(&result) {
            Ok(json) => Response::builder()
                .status(http::StatusCode::OK)
                .header(http::header::CONTENT_TYPE, "application/json")
                .body(Body::from(json))
                .expect("violations response must be valid"),
            Err(error) => {
                error!(%error, "Failed to encode violations");
                text(http::StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
            }
        }
    }

    async fn metrics(&self) -> Response<Body> {
        // A failed refresh still yields a scrape, just without any cluster.
        let reports = self.cache.get_reports().await.unwrap_or_else(|error| {
            error!(%error, "Could not download reports for metric computation");
            Default::default()
        });
        let snapshot = self.metrics.snapshot(&reports, chrono::Utc::now());

        let mut registry = Registry::default();
        registry.register_collector(Box::new(snapshot));
        let mut body = String::new();
        if let Err(error) = prometheus_client::encoding::text::encode(&mut body, &registry) {
            error!(%error, "Failed to encode metrics");
            return empty(http::StatusCode::INTERNAL_SERVER_ERROR);
        }

        Response::builder()
            .status(http::StatusCode::OK)
            .header(
                http::header::CONTENT_TYPE,
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )
            .body(Body::from(body))
            .expect("metrics response must be valid")
    }
}

fn empty(status: http::StatusCode) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::default())
        .expect("empty response must be valid")
}

fn text(status: http::StatusCode, body: String) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(body))
        .expect("text response must be valid")
}
