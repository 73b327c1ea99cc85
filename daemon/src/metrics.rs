//! Prometheus metrics

use crate::config::MonitoringConfig;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};
use std::sync::LazyLock;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Global metrics registry
static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Gateway metrics
pub static METRICS: LazyLock<Metrics> = LazyLock::new(Metrics::new);

/// Metrics struct
pub struct Metrics {
    // Counters
    pub auth_successes: IntCounter,
    pub auth_failures: IntCounter,
    pub conversations_parked: IntCounter,
    pub frames_to_bridge: IntCounter,
    pub frames_from_bridge: IntCounter,

    // Gauges
    pub active_sessions: IntGauge,
    pub active_channels: IntGauge,

    // Histograms
    pub login_duration: Histogram,
}

fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::with_opts(Opts::new(name, help)).expect("metric options are valid")
}

fn gauge(name: &str, help: &str) -> IntGauge {
    IntGauge::with_opts(Opts::new(name, help)).expect("metric options are valid")
}

impl Metrics {
    pub fn new() -> Self {
        let auth_successes = counter("wsgate_auth_successes_total", "Total successful logins");
        let auth_failures = counter("wsgate_auth_failures_total", "Total failed logins");
        let conversations_parked = counter(
            "wsgate_conversations_parked_total",
            "Total conversation challenges sent to clients",
        );
        let frames_to_bridge = counter(
            "wsgate_frames_to_bridge_total",
            "Total frames written to session bridges",
        );
        let frames_from_bridge = counter(
            "wsgate_frames_from_bridge_total",
            "Total frames read from session bridges",
        );

        let active_sessions = gauge("wsgate_active_sessions", "Number of live sessions");
        let active_channels = gauge("wsgate_active_channels", "Number of open channels");

        let login_duration = Histogram::with_opts(
            HistogramOpts::new(
                "wsgate_login_duration_seconds",
                "Duration of one login negotiation leg in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )
        .expect("metric options are valid");

        // Register metrics
        REGISTRY.register(Box::new(auth_successes.clone())).ok();
        REGISTRY.register(Box::new(auth_failures.clone())).ok();
        REGISTRY.register(Box::new(conversations_parked.clone())).ok();
        REGISTRY.register(Box::new(frames_to_bridge.clone())).ok();
        REGISTRY.register(Box::new(frames_from_bridge.clone())).ok();
        REGISTRY.register(Box::new(active_sessions.clone())).ok();
        REGISTRY.register(Box::new(active_channels.clone())).ok();
        REGISTRY.register(Box::new(login_duration.clone())).ok();

        Self {
            auth_successes,
            auth_failures,
            conversations_parked,
            frames_to_bridge,
            frames_from_bridge,
            active_sessions,
            active_channels,
            login_duration,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the metrics server
pub fn start_server(config: &MonitoringConfig) -> JoinHandle<()> {
    let bind = config.prometheus_bind;
    let enabled = config.prometheus_enabled;

    tokio::spawn(async move {
        if !enabled {
            info!("Prometheus metrics disabled");
            return;
        }

        use bytes::Bytes;
        use http_body_util::Full;
        use hyper::{Response, StatusCode, server::conn::http1, service::service_fn};
        use hyper_util::rt::TokioIo;

        let listener = match tokio::net::TcpListener::bind(bind).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind metrics server: {}", e);
                return;
            }
        };

        info!("Prometheus metrics server listening on {}", bind);

        loop {
            let (stream, _) = match listener.accept().await {
                Ok(r) => r,
                Err(e) => {
                    error!("Metrics accept error: {}", e);
                    continue;
                }
            };

            let io = TokioIo::new(stream);

            tokio::spawn(async move {
                let service = service_fn(|_req| async {
                    use prometheus::Encoder;

                    let encoder = prometheus::TextEncoder::new();
                    let mut buffer = Vec::new();
                    let mut response = match encoder.encode(&REGISTRY.gather(), &mut buffer) {
                        Ok(()) => Response::new(Full::new(Bytes::from(buffer))),
                        Err(e) => {
                            error!("Failed to encode metrics: {}", e);
                            let mut response = Response::new(Full::new(Bytes::new()));
                            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                            response
                        }
                    };
                    response.headers_mut().insert(
                        hyper::header::CONTENT_TYPE,
                        hyper::header::HeaderValue::from_static("text/plain"),
                    );
                    Ok::<_, std::convert::Infallible>(response)
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Metrics connection error: {}", e);
                }
            });
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registered_once() {
        METRICS.auth_successes.inc();
        let _second = Metrics::new();

        let names: Vec<String> = REGISTRY
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"wsgate_auth_successes_total".to_string()));
        assert!(names.contains(&"wsgate_active_sessions".to_string()));
    }
}
