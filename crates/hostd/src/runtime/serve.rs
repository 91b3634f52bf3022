//! Serve — build the gRPC server and accept connections over mTLS.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_stream::StreamExt;
use tonic::transport::Server;
use tracing::{error, info, warn};

use crate::command::CommandServiceImpl;
use crate::config::HostdConfig;
use crate::health::HealthServiceImpl;
use crate::image::ImageServiceImpl;
use crate::inventory::InventoryServiceImpl;
use crate::runtime::stop::shutdown_signal;
use crate::runtime::tls::TlsStreamWrapper;
use crate::state::SharedState;

use crate::proto::{
    command_service_server::CommandServiceServer, health_service_server::HealthServiceServer,
    image_service_server::ImageServiceServer, inventory_service_server::InventoryServiceServer,
};

/// Wire up all gRPC services, open the TLS listener, and serve until shutdown.
pub async fn serve(state: SharedState, config: HostdConfig) -> Result<(), Box<dyn std::error::Error>> {
    let command_service = CommandServiceImpl::new(Arc::clone(&state));
    let inventory_service = InventoryServiceImpl::new(Arc::clone(&state));
    let image_service = ImageServiceImpl::new(Arc::clone(&state));
    let health_service = HealthServiceImpl::new(Arc::clone(&state));

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("invalid bind address: {}", e);
        e
    })?;

    info!("gRPC server will bind to: {}", addr);

    config.validate().map_err(|e| {
        error!("TLS certificate validation failed: {}", e);
        error!("set HOSTD_TLS_CERT, HOSTD_TLS_KEY, and HOSTD_TLS_CA environment variables");
        e
    })?;

    info!("loading TLS certificates...");
    let rustls_config = config.build_rustls_config().map_err(|e| {
        error!("failed to load TLS certificates: {}", e);
        e
    })?;

    info!("TLS certificates loaded, mTLS enabled - client certificates required");

    let tls_acceptor = TlsAcceptor::from(rustls_config);
    let listener = TcpListener::bind(addr).await?;

    info!("registered CommandService, InventoryService, ImageService, HealthService");
    info!("hostd is ready, listening on {} (mTLS enabled)", addr);
    info!("max concurrent streams: {}", config.max_concurrent_streams);

    let incoming = TcpListenerStream::new(listener)
        .then(move |result| {
            let tls_acceptor = tls_acceptor.clone();
            async move {
                match result {
                    Ok(stream) => match tls_acceptor.accept(stream).await {
                        Ok(tls_stream) => Some(Ok::<_, std::io::Error>(TlsStreamWrapper(tls_stream))),
                        Err(e) => {
                            warn!("TLS handshake failed: {}", e);
                            None
                        }
                    },
                    Err(e) => {
                        error!("TCP accept error: {}", e);
                        None
                    }
                }
            }
        })
        .filter_map(|x| x);

    Server::builder()
        .initial_stream_window_size(1 << 20)
        .concurrency_limit_per_connection(config.max_concurrent_streams)
        .add_service(CommandServiceServer::new(command_service))
        .add_service(InventoryServiceServer::new(inventory_service))
        .add_service(ImageServiceServer::new(image_service))
        .add_service(HealthServiceServer::new(health_service))
        .serve_with_incoming_shutdown(incoming, shutdown_signal())
        .await?;

    info!("server shutdown complete");
    Ok(())
}
