//! Listener and per-connection serving.
//!
//! Connections are served one hyper http1 conversation each, raced against
//! the socket-kill deadline: a connection that has not completed within
//! `socket_kill_timeout_secs` is dropped outright. This bounds total
//! connection lifetime even when the response write itself stalls, which
//! the per-request processing deadline cannot do. The deadline is strictly
//! longer than the processing deadline, so a slow pipeline answers with
//! 503 first and only a wedged socket gets the hard close.

use std::time::Duration;

use anyhow::Context;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};

use asset_core::PipelineContext;

use crate::http;

/// Bind the listener and serve until SIGINT/SIGTERM.
pub async fn run(ctx: PipelineContext) -> anyhow::Result<()> {
    let host = ctx.config.listen_host.clone();
    let port = ctx.config.listen_port;
    let kill_after = Duration::from_secs(ctx.config.socket_kill_timeout_secs);

    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("binding {host}:{port}"))?;
    tracing::info!("listening on http://{}", listener.local_addr()?);

    let app = http::router(ctx);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!("connection from {peer}");
                        let app = app.clone();
                        tokio::spawn(async move {
                            serve_connection(stream, app, kill_after).await;
                        });
                    }
                    Err(e) => tracing::warn!("accept failed: {e}"),
                }
            }
            _ = shutdown_signal() => {
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }
    Ok(())
}

/// Serve one connection, enforcing the socket-kill deadline.
async fn serve_connection(stream: TcpStream, app: axum::Router, kill_after: Duration) {
    let service = TowerToHyperService::new(app);
    let connection = hyper::server::conn::http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service);

    tokio::select! {
        result = connection => {
            if let Err(e) = result {
                tracing::debug!("connection ended with error: {e}");
            }
        }
        _ = tokio::time::sleep(kill_after) => {
            tracing::warn!("socket deadline reached, dropping connection");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
