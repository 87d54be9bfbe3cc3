//! TLS-terminated connection accept loop, multiplexing the HTTP and gRPC
//! fronts onto one listener (§4.8).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use http::{Request, Response};
use tokio_rustls::rustls;

use crate::multiplex::MultiplexService;

pub async fn serve<G>(
    listen_addr: SocketAddr,
    tls_config: Arc<rustls::ServerConfig>,
    grpc_router: G,
    http_router: axum::Router,
) -> std::io::Result<()>
where
    G: tower::Service<Request<Body>, Response = Response<tonic::body::BoxBody>, Error = std::convert::Infallible>
        + Clone
        + Send
        + 'static,
    G::Future: Send + 'static,
{
    let multiplex = MultiplexService::new(grpc_router, http_router);
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    let acceptor = tokio_rustls::TlsAcceptor::from(tls_config);

    tracing::info!(addr = %listen_addr, "listening");

    loop {
        let (tcp_stream, remote_addr) = listener.accept().await?;
        let acceptor = acceptor.clone();
        let multiplex = multiplex.clone();

        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(tcp_stream).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, remote = %remote_addr, "TLS handshake failed");
                    return;
                }
            };

            let io = hyper_util::rt::TokioIo::new(tls_stream);
            let service = hyper_util::service::TowerToHyperService::new(multiplex);
            let result = hyper_util::server::conn::auto::Builder::new(hyper_util::rt::TokioExecutor::new())
                .serve_connection(io, service)
                .await;

            if let Err(e) = result {
                tracing::warn!(error = %e, remote = %remote_addr, "connection closed with error");
            }
        });
    }
}
