//! Messaging-channel connection lifecycle and guarded send pass-through.
//!
//! One `Connection` instance owns the process-wide `ConnectionState`; every
//! send goes through it so that "not connected" is observed consistently by
//! all callers. The underlying transport is an injected `ChannelClient`, so
//! tests can substitute a fake and assert on state transitions without any
//! real session.

use crate::media::MediaPayload;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Lifecycle of the channel session. Exactly one state holds at any time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// A pairing artifact (scannable code) is available to link a session.
    Pairing { artifact: String },
    Connected {
        account: String,
        signal: Option<u8>,
    },
}

/// Lifecycle events delivered by the channel client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    PairingAvailable(String),
    Connected {
        account: String,
        signal: Option<u8>,
    },
    Disconnected,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel not ready")]
    NotReady,
    #[error("send failed: {0}")]
    Send(String),
}

/// Transport capability supplied by the messaging-channel integration.
#[async_trait]
pub trait ChannelClient: Send + Sync {
    /// Establish and watch the channel session, delivering lifecycle events
    /// until the session ends or the receiver goes away.
    async fn run_session(&self, events: mpsc::Sender<ChannelEvent>) -> Result<()>;

    async fn send_text(&self, to: &str, body: &str) -> Result<()>;

    async fn send_media(&self, to: &str, media: &MediaPayload, caption: &str) -> Result<()>;
}

/// Read-only projection of the connection state, safe to poll on any
/// schedule.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatusReport {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pairing_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<u8>,
}

impl From<&ConnectionState> for StatusReport {
    fn from(state: &ConnectionState) -> Self {
        match state {
            ConnectionState::Disconnected => Self {
                connected: false,
                account: None,
                pairing_code: None,
                signal: None,
            },
            ConnectionState::Pairing { artifact } => Self {
                connected: false,
                account: None,
                pairing_code: Some(artifact.clone()),
                signal: None,
            },
            ConnectionState::Connected { account, signal } => Self {
                connected: true,
                account: Some(account.clone()),
                pairing_code: None,
                signal: *signal,
            },
        }
    }
}

pub struct Connection {
    client: Arc<dyn ChannelClient>,
    state: RwLock<ConnectionState>,
}

impl Connection {
    pub fn new(client: Arc<dyn ChannelClient>) -> Arc<Self> {
        Arc::new(Self {
            client,
            state: RwLock::new(ConnectionState::Disconnected),
        })
    }

    /// Apply a lifecycle event. Entering `Connected` drops any pairing
    /// artifact; entering `Disconnected` drops the account label. A pairing
    /// artifact arriving while connected is ignored rather than regressing
    /// an established session.
    pub fn apply(&self, event: ChannelEvent) {
        let mut state = self.state.write().expect("connection state lock");
        match event {
            ChannelEvent::PairingAvailable(artifact) => {
                if matches!(*state, ConnectionState::Connected { .. }) {
                    warn!("pairing code received while connected; ignoring");
                    return;
                }
                info!("pairing code available");
                *state = ConnectionState::Pairing { artifact };
            }
            ChannelEvent::Connected { account, signal } => {
                info!(account = %account, "channel connected");
                *state = ConnectionState::Connected { account, signal };
            }
            ChannelEvent::Disconnected => {
                if !matches!(*state, ConnectionState::Disconnected) {
                    info!("channel disconnected");
                }
                *state = ConnectionState::Disconnected;
            }
        }
    }

    /// Current state, as an owned snapshot.
    pub fn snapshot(&self) -> ConnectionState {
        self.state.read().expect("connection state lock").clone()
    }

    /// Status projection for pollers.
    pub fn report(&self) -> StatusReport {
        StatusReport::from(&*self.state.read().expect("connection state lock"))
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            *self.state.read().expect("connection state lock"),
            ConnectionState::Connected { .. }
        )
    }

    fn ensure_connected(&self) -> Result<(), ChannelError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ChannelError::NotReady)
        }
    }

    /// Send a plain text message. Rejected while not connected.
    pub async fn send_text(&self, to: &str, body: &str) -> Result<(), ChannelError> {
        self.ensure_connected()?;
        self.client
            .send_text(to, body)
            .await
            .map_err(|err| ChannelError::Send(err.to_string()))
    }

    /// Send a media message with a caption. Rejected while not connected.
    pub async fn send_media(
        &self,
        to: &str,
        media: &MediaPayload,
        caption: &str,
    ) -> Result<(), ChannelError> {
        self.ensure_connected()?;
        self.client
            .send_media(to, media, caption)
            .await
            .map_err(|err| ChannelError::Send(err.to_string()))
    }

    /// Start the channel session in the background. Fire-and-forget: no
    /// request path awaits this; the state machine reflects progress as
    /// events arrive.
    pub fn spawn_session(self: &Arc<Self>) {
        let conn = Arc::clone(self);
        tokio::spawn(async move {
            let (tx, mut rx) = mpsc::channel::<ChannelEvent>(16);
            let pump = {
                let conn = Arc::clone(&conn);
                tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        conn.apply(event);
                    }
                })
            };
            if let Err(err) = conn.client.run_session(tx).await {
                error!(?err, "channel session ended");
            }
            // run_session dropped its sender; drain remaining events first.
            let _ = pump.await;
            conn.apply(ChannelEvent::Disconnected);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingClient {
        texts: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ChannelClient for RecordingClient {
        async fn run_session(&self, _events: mpsc::Sender<ChannelEvent>) -> Result<()> {
            Ok(())
        }

        async fn send_text(&self, to: &str, body: &str) -> Result<()> {
            self.texts.lock().unwrap().push((to.into(), body.into()));
            Ok(())
        }

        async fn send_media(&self, _to: &str, _media: &MediaPayload, _caption: &str) -> Result<()> {
            Ok(())
        }
    }

    fn connection() -> (Arc<Connection>, Arc<RecordingClient>) {
        let client = Arc::new(RecordingClient::default());
        (Connection::new(client.clone()), client)
    }

    #[test]
    fn starts_disconnected() {
        let (conn, _) = connection();
        assert_eq!(conn.snapshot(), ConnectionState::Disconnected);
        let report = conn.report();
        assert!(!report.connected);
        assert!(report.pairing_code.is_none());
    }

    #[test]
    fn pairing_then_connected_clears_artifact() {
        let (conn, _) = connection();
        conn.apply(ChannelEvent::PairingAvailable("qr-data".into()));
        assert_eq!(conn.report().pairing_code.as_deref(), Some("qr-data"));

        conn.apply(ChannelEvent::Connected {
            account: "9190000".into(),
            signal: Some(80),
        });
        let report = conn.report();
        assert!(report.connected);
        assert_eq!(report.account.as_deref(), Some("9190000"));
        assert!(report.pairing_code.is_none());
        assert_eq!(report.signal, Some(80));
    }

    #[test]
    fn disconnect_clears_account() {
        let (conn, _) = connection();
        conn.apply(ChannelEvent::Connected {
            account: "acct".into(),
            signal: None,
        });
        conn.apply(ChannelEvent::Disconnected);
        let report = conn.report();
        assert!(!report.connected);
        assert!(report.account.is_none());
    }

    #[test]
    fn pairing_while_connected_is_ignored() {
        let (conn, _) = connection();
        conn.apply(ChannelEvent::Connected {
            account: "acct".into(),
            signal: None,
        });
        conn.apply(ChannelEvent::PairingAvailable("late-qr".into()));
        assert!(conn.is_connected());
        assert!(conn.report().pairing_code.is_none());
    }

    #[tokio::test]
    async fn send_while_disconnected_never_reaches_client() {
        let (conn, client) = connection();
        let err = conn.send_text("911", "hello").await.unwrap_err();
        assert!(matches!(err, ChannelError::NotReady));
        assert!(client.texts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_while_connected_passes_through() {
        let (conn, client) = connection();
        conn.apply(ChannelEvent::Connected {
            account: "acct".into(),
            signal: None,
        });
        conn.send_text("919876543210", "hi").await.unwrap();
        let sent = client.texts.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "919876543210");
        assert_eq!(sent[0].1, "hi");
    }
}
