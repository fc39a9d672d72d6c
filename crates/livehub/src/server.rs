//! `LivehubServer` builder and accept loop.
//!
//! The server is the admission layer in front of the hub: it accepts TCP
//! connections, upgrades them to WebSocket, authenticates the caller and
//! hands the ready connection plus identity to [`HubHandle::admit`].

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use livehub_session::{Authenticator, Credentials, SessionError};
use livehub_transport::{CloseCode, Connection, TransportError, WebSocketListener, upgrade};
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::{Hub, HubConfig, HubHandle, LivehubError};

/// Builder for configuring and starting a livehub server.
///
/// # Example
///
/// ```rust,ignore
/// use livehub::prelude::*;
///
/// let server = LivehubServer::builder()
///     .bind("0.0.0.0:8080")
///     .config(HubConfig::from_env()?)
///     .build(my_auth)
///     .await?;
/// server.run_until(async { tokio::signal::ctrl_c().await.ok(); }).await
/// ```
pub struct LivehubServerBuilder {
    bind_addr: String,
    config: HubConfig,
}

impl LivehubServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            config: HubConfig::default(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the hub configuration.
    pub fn config(mut self, config: HubConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates the configuration, binds the listener and spawns the hub.
    pub async fn build<A: Authenticator>(self, auth: A) -> Result<LivehubServer<A>, LivehubError> {
        self.config.validate()?;
        let listener = WebSocketListener::bind(&self.bind_addr).await?;
        let hub = Hub::spawn(self.config);

        Ok(LivehubServer {
            listener,
            hub,
            auth: Arc::new(auth),
        })
    }
}

impl Default for LivehubServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound livehub server.
///
/// Call [`run()`](Self::run) or [`run_until()`](Self::run_until) to start
/// accepting connections.
pub struct LivehubServer<A: Authenticator> {
    listener: WebSocketListener,
    hub: HubHandle,
    auth: Arc<A>,
}

impl<A: Authenticator> LivehubServer<A> {
    /// Creates a new builder.
    pub fn builder() -> LivehubServerBuilder {
        LivehubServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Returns a handle to the server's hub.
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), LivehubError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until `signal` resolves, then shuts the hub down.
    ///
    /// Each accepted socket is upgraded and authenticated on its own task,
    /// so a slow client never holds up the loop.
    pub async fn run_until(self, signal: impl Future<Output = ()> + Send) -> Result<(), LivehubError> {
        tracing::info!(addr = ?self.listener.local_addr().ok(), "livehub server running");
        tokio::pin!(signal);

        loop {
            tokio::select! {
                _ = &mut signal => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let hub = self.hub.clone();
                        let auth = Arc::clone(&self.auth);
                        tokio::spawn(async move {
                            if let Err(e) = admit(stream, peer, hub, auth).await {
                                tracing::debug!(%peer, error = %e, "connection not admitted");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
            }
        }

        tracing::info!("livehub server stopping");
        if let Err(e) = self.hub.shutdown().await {
            tracing::debug!(error = %e, "hub already stopped");
        }
        Ok(())
    }
}

/// Upgrades, authenticates and admits one connection.
///
/// The upgrade and authentication together must finish within the
/// configured read timeout.
async fn admit<A: Authenticator>(
    stream: TcpStream,
    peer: SocketAddr,
    hub: HubHandle,
    auth: Arc<A>,
) -> Result<(), LivehubError> {
    let deadline = Instant::now() + hub.config().read_timeout;

    let limit = hub.config().transport_message_limit();
    let (conn, request) = tokio::time::timeout_at(deadline, upgrade(stream, peer, limit))
        .await
        .map_err(|_| TransportError::UpgradeFailed("handshake timed out".into()))??;

    let credentials = Credentials::from_request(&request);
    let identity = match tokio::time::timeout_at(deadline, auth.authenticate(&credentials)).await {
        Ok(Ok(identity)) => identity,
        Ok(Err(e)) => {
            tracing::info!(conn_id = %conn.id(), %peer, error = %e, "authentication rejected");
            let _ = conn.close(CloseCode::PolicyViolation, "unauthorized").await;
            return Err(e.into());
        }
        Err(_) => {
            tracing::info!(conn_id = %conn.id(), %peer, "authentication timed out");
            let _ = conn.close(CloseCode::PolicyViolation, "authentication timed out").await;
            return Err(SessionError::AuthFailed("timed out".into()).into());
        }
    };

    tracing::debug!(conn_id = %conn.id(), %peer, username = %identity.username, "authenticated");
    hub.admit(conn, identity).await?;
    Ok(())
}
