//! Client Builder API
//!
//! Builder-style construction for consumers (device apps/tests) to wire a
//! transport and credentials together and get a running client handle.

use crate::client::DeviceClient;
use crate::session::SessionTask;
use hublink_core::{ClientConfig, ConnectionState, Credentials, Transport};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::info;

// ----------------------------------------------------------------------------
// Client Builder
// ----------------------------------------------------------------------------

/// Builder for a [`DeviceClient`] and its session task.
pub struct ClientBuilder {
    transport: Arc<dyn Transport>,
    credentials: Option<Credentials>,
    config: ClientConfig,
}

impl ClientBuilder {
    /// Start from a transport. Without credentials the transport is
    /// expected to authenticate on its own (or be fed tokens through
    /// [`DeviceClient::update_security_token`]).
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        ClientBuilder {
            transport,
            credentials: None,
            config: ClientConfig::default(),
        }
    }

    /// Attach credentials. Renewable credentials put token refresh on the
    /// client's schedule; others are minted once and never refreshed.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Override the default configuration.
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Wire the channels, spawn the session task and hand back the
    /// client. Must run inside a tokio runtime. The session stops when
    /// the last client clone is dropped.
    pub fn build(self) -> DeviceClient {
        let capabilities = self.transport.capabilities();
        info!(?capabilities, "building device client");

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(self.config.channels.client_event_capacity);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let task = SessionTask::new(
            Arc::clone(&self.transport),
            self.credentials,
            self.config,
            commands_rx,
            events_tx.clone(),
            state_tx,
        );
        tokio::spawn(task.run());

        DeviceClient::new(commands_tx, capabilities, events_tx, state_rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hublink_core::{
        LinkEvent, Receiver, TransportCapabilities, TransportError, TransportResult,
    };

    struct SendOnlyTransport {
        link_events: broadcast::Sender<LinkEvent>,
    }

    impl SendOnlyTransport {
        fn new() -> Self {
            let (link_events, _) = broadcast::channel(4);
            SendOnlyTransport { link_events }
        }
    }

    #[async_trait]
    impl Transport for SendOnlyTransport {
        fn capabilities(&self) -> TransportCapabilities {
            TransportCapabilities::send_only()
        }

        fn link_events(&self) -> broadcast::Receiver<LinkEvent> {
            self.link_events.subscribe()
        }

        async fn receiver(&self) -> TransportResult<Arc<dyn Receiver>> {
            Err(TransportError::OperationUnsupported {
                operation: "receiver",
            })
        }
    }

    #[tokio::test]
    async fn test_built_client_starts_disconnected() {
        let client = ClientBuilder::new(Arc::new(SendOnlyTransport::new())).build();
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert_eq!(client.capabilities(), TransportCapabilities::send_only());
    }

    #[tokio::test]
    async fn test_clones_share_the_session() {
        let client = ClientBuilder::new(Arc::new(SendOnlyTransport::new())).build();
        let clone = client.clone();
        drop(client);

        // The session is still up for the surviving clone.
        clone.open().await.expect("open over the shared session");
        assert_eq!(clone.connection_state(), ConnectionState::Connected);
    }
}
