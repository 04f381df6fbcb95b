//! HTTP server bootstrap: binding, serving, and graceful shutdown, kept
//! separate from [`crate::rest_api`]'s route definitions so each can be
//! exercised independently.

use crate::app::SharedState;
use crate::rest_api::create_router;
use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Builds the full application router over `state`.
#[must_use]
pub fn create_router_for(state: SharedState) -> Router {
    create_router(state)
}

/// Binds a listener at `state`'s configured address.
///
/// # Errors
///
/// Returns an error if the port cannot be bound.
pub async fn start_server(state: &SharedState) -> anyhow::Result<(TcpListener, SocketAddr)> {
    let listen_addr = state.lock().await.config.listen_addr;
    let listener = TcpListener::bind(listen_addr).await?;
    let actual_addr = listener.local_addr()?;
    Ok((listener, actual_addr))
}

/// Binds a listener on an OS-assigned port, for tests.
///
/// # Errors
///
/// Returns an error if no port is available.
pub async fn start_server_on_available_port() -> anyhow::Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let actual_addr = listener.local_addr()?;
    Ok((listener, actual_addr))
}

/// Serves `router` on `listener` until the process is killed.
///
/// # Errors
///
/// Returns an error if the underlying accept loop fails.
pub async fn serve(listener: TcpListener, router: Router) -> Result<(), std::io::Error> {
    axum::serve(listener, router)
        .await
        .map_err(std::io::Error::other)
}

/// Serves `router` on `listener` until `SIGINT`/`SIGTERM`, then lets
/// in-flight requests finish before returning.
///
/// # Errors
///
/// Returns an error if the underlying accept loop fails.
#[allow(dead_code)]
pub async fn serve_with_graceful_shutdown(
    listener: TcpListener,
    router: Router,
) -> Result<(), std::io::Error> {
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(std::io::Error::other)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sig = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        sig.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allowlist::mock::MockCommissioner;
    use crate::app::AppState;
    use crate::config::BorderRouterConfig;
    use crate::domain::{ExtAddress, Rloc16};
    use crate::ipv6::NetworkPrefixes;
    use crate::thread_api::mock::MockThreadApi;
    use crate::thread_api::{LeaderData, ThisNodeInfo};
    use crate::time::test_time_provider;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::net::Ipv6Addr;
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    fn test_state() -> SharedState {
        let this_node = ThisNodeInfo {
            border_agent_id: "0000000000000000".to_string(),
            border_agent_state: "disconnected".to_string(),
            leader_data: LeaderData {
                partition_id: 0,
                data_version: 0,
            },
            network_name: "test".to_string(),
            rloc16: Rloc16::for_router_id(0),
            rloc_address: Ipv6Addr::UNSPECIFIED,
            router_count: 0,
        };
        let prefixes = NetworkPrefixes {
            mesh_local_prefix: [0xfd; 8],
        };
        let thread_api = Arc::new(MockThreadApi::new(ExtAddress::ZERO, this_node, prefixes));
        let commissioner = Arc::new(MockCommissioner::new());
        Arc::new(Mutex::new(AppState::new(
            BorderRouterConfig::default(),
            thread_api,
            commissioner,
            test_time_provider(),
        )))
    }

    #[tokio::test]
    async fn router_serves_the_device_collection_route() {
        let router = create_router_for(test_state());
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/devices")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn start_server_on_available_port_binds_localhost() {
        let (listener, addr) = start_server_on_available_port().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        drop(listener);
    }

    #[tokio::test]
    async fn serve_responds_over_a_real_socket() {
        let (listener, addr) = start_server_on_available_port().await.unwrap();
        let router = create_router_for(test_state());
        let server = tokio::spawn(async move { serve(listener, router).await });

        let stream = loop {
            match tokio::net::TcpStream::connect(addr).await {
                Ok(s) => break s,
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(5)).await,
            }
        };
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut stream = stream;
        stream
            .write_all(format!("GET /api/devices HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n").as_bytes())
            .await
            .unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        let response = String::from_utf8_lossy(&buf);
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");

        server.abort();
    }
}
