//! Development server: a livehub instance that trusts whatever username the
//! client presents.
//!
//! Connect with `ws://127.0.0.1:8080/?token=ana` (or `token=ana:Ana%20B`
//! for a display name), then send e.g.
//! `{"type":"join-room","payload":{"roomName":"lobby"}}`.
//!
//! `LIVEHUB_BIND` overrides the listen address; the other `LIVEHUB_*`
//! variables are described on `HubConfig::from_env`. Log verbosity comes
//! from `RUST_LOG`.

use livehub::prelude::*;
use tracing_subscriber::EnvFilter;

/// Accepts `username` or `username:Display Name` tokens as guests.
struct DevAuthenticator;

impl Authenticator for DevAuthenticator {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Identity, SessionError> {
        let token = credentials.require_token()?;
        let (username, display_name) = token.split_once(':').unwrap_or((token, token));

        let valid = !username.is_empty()
            && username
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(SessionError::AuthFailed(format!("invalid username {username:?}")));
        }
        Ok(Identity::new(username, display_name, AccountType::Guest))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let bind = std::env::var("LIVEHUB_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let config = HubConfig::from_env()?;
    tracing::info!(%bind, ?config, "starting dev server");

    let server = LivehubServer::<DevAuthenticator>::builder()
        .bind(&bind)
        .config(config)
        .build(DevAuthenticator)
        .await?;

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message;

    type Ws = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn start() -> String {
        let server = LivehubServer::<DevAuthenticator>::builder()
            .bind("127.0.0.1:0")
            .build(DevAuthenticator)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let _ = server.run().await;
        });
        addr
    }

    async fn ws(addr: &str, token: &str) -> Ws {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/?token={token}"))
            .await
            .unwrap();
        ws
    }

    async fn next_json(ws: &mut Ws) -> serde_json::Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if let Message::Text(text) = msg {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_dev_authenticator_tokens() {
        let id = DevAuthenticator
            .authenticate(&Credentials::new("ana:Ana B"))
            .await
            .unwrap();
        assert_eq!(id.username, "ana");
        assert_eq!(id.display_name, "Ana B");

        let id = DevAuthenticator
            .authenticate(&Credentials::new("ben"))
            .await
            .unwrap();
        assert_eq!(id.display_name, "ben");

        assert!(DevAuthenticator.authenticate(&Credentials::new("no spaces")).await.is_err());
        assert!(DevAuthenticator.authenticate(&Credentials::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_two_players_chat() {
        let addr = start().await;
        let mut ana = ws(&addr, "ana").await;
        let mut ben = ws(&addr, "ben").await;

        let join = r#"{"type":"join-room","payload":{"roomName":"lobby"}}"#;
        ana.send(Message::Text(join.into())).await.unwrap();
        assert_eq!(next_json(&mut ana).await["type"], "join-room");
        ben.send(Message::Text(join.into())).await.unwrap();
        assert_eq!(next_json(&mut ben).await["payload"]["members"], serde_json::json!(["ana", "ben"]));

        ben.send(Message::Text(r#"{"type":"chat","payload":"hello"}"#.into()))
            .await
            .unwrap();
        loop {
            let msg = next_json(&mut ana).await;
            if msg["type"] == "chat" {
                assert_eq!(msg["sender"], "ben");
                assert_eq!(msg["payload"], "hello");
                break;
            }
        }
    }
}
