//! Server assembly.
//!
//! - [`config`] - CLI/environment configuration.
//! - [`service`] - the `sluice.Sluice` gRPC handler.
//! - [`streaming`] - per-read tasks and in-flight bookkeeping.
//! - [`sweeper`] - idle session expiry.
//! - [`telemetry`] - logging, tracing and metrics setup.

pub mod config;
pub mod service;
pub mod streaming;
pub mod sweeper;
pub mod telemetry;

use config::ServerConfig;
use core::future::Future;
use futures::Stream;
use service::handler::SluiceService;
use sluice_tonic_core::proto::{FILE_DESCRIPTOR_SET, sluice_server::SluiceServer};
use tokio::io::{AsyncRead, AsyncWrite};
use tonic::transport::server::Connected;
use tonic::{codec::CompressionEncoding, transport::Server};
use tonic_reflection::server::Builder;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

/// Serves the sluice service, health and reflection on `incoming` until
/// `signal` resolves.
///
/// On `signal` the health status flips to `NOT_SERVING` and the service runs
/// its graceful shutdown before the transport stops.
pub async fn serve_with_incoming<I, IO, IE, F>(
    config: &ServerConfig,
    incoming: I,
    signal: F,
) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
    F: Future<Output = ()>,
{
    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<SluiceServer<SluiceService>>()
        .await;

    let service = SluiceService::new(config);

    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let shutdown = {
        let service = service.clone();
        async move {
            signal.await;

            #[cfg(feature = "tracing")]
            tracing::info!("Shutdown signal received, terminating gracefully...");

            // 1. Publish the status
            health_reporter
                .set_not_serving::<SluiceServer<SluiceService>>()
                .await;

            // 2. Perform graceful shutdown
            if let Err(_e) = service.shutdown().await {
                #[cfg(feature = "tracing")]
                tracing::error!("Error during service shutdown: {:?}", _e);
            }
        }
    };

    Server::builder()
        .accept_http1(true)
        .http2_adaptive_window(Some(true))
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(GrpcWebLayer::new()),
        )
        .add_service(health_service)
        .add_service(reflection)
        .add_service(build_sluice_service(service))
        .serve_with_incoming_shutdown(incoming, shutdown)
        .await?;

    #[cfg(feature = "tracing")]
    tracing::info!("Service shut down successfully");
    Ok(())
}

fn build_sluice_service(service: SluiceService) -> SluiceServer<SluiceService> {
    SluiceServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}
