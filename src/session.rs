//! Link session lifecycle.
//!
//! A [`LinkSession`] owns at most one correlated client and tracks whether the
//! controller has accepted the link. The controller only honours operational
//! requests after a successful `start_link` handshake, so [`LinkSession::call`]
//! refuses to send anything until then.
//!
//! # Failure handling
//!
//! | Error on a call      | Link afterwards |
//! |----------------------|-----------------|
//! | `Timeout`            | still up        |
//! | `ProtocolMismatch`   | still up; the stream may be desynchronized, so [`LinkSession::reopen`] is advised |
//! | `Transport`          | torn down       |
//!
//! Closing is idempotent and never fails. The diagnostic log of the last
//! connection survives [`LinkSession::close`].

use crate::client::{CorrelationClient, DiagnosticLog};
use crate::config::{LinkConfig, OperationNames};
use crate::error::{LinkError, LinkResult};
use crate::protocol::{HandshakeStatus, Reply};
use crate::transport::{connect_tcp, DynTransport};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Handshake-guarded link to one controller.
#[derive(Debug)]
pub struct LinkSession {
    config: LinkConfig,
    endpoint: String,
    client: Option<CorrelationClient>,
    history: DiagnosticLog,
}

impl LinkSession {
    /// Session for `config`'s endpoint, not yet linked.
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            endpoint: config.endpoint(),
            history: DiagnosticLog::new(config.diagnostics_capacity),
            config: config.clone(),
            client: None,
        }
    }

    /// Connect over TCP and perform the handshake.
    ///
    /// # Errors
    ///
    /// [`LinkError::Connect`] if the endpoint is unreachable or the handshake
    /// does not succeed. Nothing is left open on failure.
    pub async fn open(config: &LinkConfig) -> LinkResult<Self> {
        let mut session = Self::new(config);
        session.establish().await?;
        Ok(session)
    }

    /// Perform the handshake over an already connected transport.
    ///
    /// `endpoint` labels the peer in logs and errors.
    pub async fn open_with_transport(
        transport: DynTransport,
        endpoint: impl Into<String>,
        config: &LinkConfig,
    ) -> LinkResult<Self> {
        let mut session = Self::new(config);
        session.endpoint = endpoint.into();
        session.establish_over(transport).await?;
        Ok(session)
    }

    /// Connect over TCP and handshake, unless already linked.
    #[instrument(skip(self), err)]
    pub async fn establish(&mut self) -> LinkResult<()> {
        if self.is_established() {
            return Ok(());
        }
        let transport = connect_tcp(&self.config.host, self.config.port, self.config.connect_timeout)
            .await
            .map_err(|e| LinkError::Connect {
                endpoint: self.endpoint.clone(),
                reason: format!("endpoint unreachable: {}", e),
                reply: None,
            })?;
        self.establish_over(transport).await
    }

    /// Handshake over `transport`, replacing any current link.
    #[instrument(skip(self, transport), err)]
    pub async fn establish_over(&mut self, transport: DynTransport) -> LinkResult<()> {
        self.close().await;

        let mut client = CorrelationClient::new(
            transport,
            self.config.max_frame_len,
            self.config.diagnostics_capacity,
        );
        let mut parameters = Map::new();
        parameters.insert(
            "ip_address".to_string(),
            Value::String(self.config.identity.clone()),
        );

        let outcome = client
            .call(
                &self.config.operations.start_link,
                parameters,
                self.config.handshake_timeout,
            )
            .await;

        let (reason, reply) = match outcome {
            Ok(reply) => match HandshakeStatus::from(&reply.status) {
                HandshakeStatus::Ok => {
                    info!(endpoint = %self.endpoint, identity = %self.config.identity, "Link established");
                    self.client = Some(client);
                    return Ok(());
                }
                HandshakeStatus::Failed => {
                    (format!("handshake refused with status {}", reply.status), Some(reply))
                }
                HandshakeStatus::Unrecognized(status) => {
                    (format!("unexpected handshake status {}", status), Some(reply))
                }
            },
            Err(e) => (format!("handshake failed: {}", e), client.log().last_reply().cloned()),
        };

        self.history = client.close().await;
        warn!(endpoint = %self.endpoint, %reason, "Link not established");
        Err(LinkError::Connect {
            endpoint: self.endpoint.clone(),
            reason,
            reply: reply.map(Box::new),
        })
    }

    /// Close the current link and establish a fresh one over TCP.
    pub async fn reopen(&mut self) -> LinkResult<()> {
        self.close().await;
        self.establish().await
    }

    /// Send an operational request over the established link.
    ///
    /// # Errors
    ///
    /// [`LinkError::NotLinked`] without an established link; otherwise the
    /// errors of [`CorrelationClient::call`]. A transport failure also tears
    /// the link down.
    pub async fn call(
        &mut self,
        operation: &str,
        parameters: Map<String, Value>,
        timeout: Duration,
    ) -> LinkResult<Reply> {
        let client = self.client.as_mut().ok_or(LinkError::NotLinked)?;
        let result = client.call(operation, parameters, timeout).await;
        if let Err(LinkError::Transport(e)) = &result {
            warn!(endpoint = %self.endpoint, operation, error = %e, "Transport failed, dropping link");
            self.close().await;
        }
        result
    }

    /// Shut the link down. Safe to call any number of times.
    pub async fn close(&mut self) {
        if let Some(client) = self.client.take() {
            self.history = client.close().await;
            info!(endpoint = %self.endpoint, "Link closed");
        }
    }

    /// True only between a successful handshake and the next close or
    /// transport failure.
    pub fn is_established(&self) -> bool {
        self.client.is_some()
    }

    /// Recent exchanges of the current link, or of the last one if closed.
    pub fn diagnostics(&self) -> &DiagnosticLog {
        match &self.client {
            Some(client) => client.log(),
            None => &self.history,
        }
    }

    /// Peer label.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Wire operation names in use.
    pub fn operations(&self) -> &OperationNames {
        &self.config.operations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Fault, MockController};
    use crate::protocol::Status;
    use serde_json::json;

    #[tokio::test]
    async fn ok_handshake_establishes_link() {
        let controller = MockController::new();
        let config = LinkConfig::default();

        let session = LinkSession::open_with_transport(controller.spawn(), "mock", &config)
            .await
            .unwrap();

        assert!(session.is_established());
        let requests = controller.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].operation, "start_link");
        assert_eq!(requests[0].parameters["ip_address"], json!("192.168.1.100"));
    }

    #[tokio::test]
    async fn refused_handshake_is_connect_error_with_reply() {
        let controller = MockController::new().handshake_status(Status::from("fail"));

        let err = LinkSession::open_with_transport(controller.spawn(), "mock", &LinkConfig::default())
            .await
            .unwrap_err();

        match err {
            LinkError::Connect { endpoint, reply, .. } => {
                assert_eq!(endpoint, "mock");
                assert_eq!(reply.unwrap().status, Status::from("fail"));
            }
            other => panic!("expected Connect, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_handshake_times_out_as_connect_error() {
        let controller = MockController::new().fault_on("start_link", 1, Fault::Silence);
        let mut session = LinkSession::new(&LinkConfig::default());

        let err = session.establish_over(controller.spawn()).await.unwrap_err();

        assert!(err.is_connect_error());
        assert!(!session.is_established());
        assert!(session.diagnostics().last().unwrap().error.is_some());
    }

    #[tokio::test]
    async fn unrecognized_handshake_status_is_connect_error() {
        let controller = MockController::new().handshake_status(Status::Code(0));
        let mut session = LinkSession::new(&LinkConfig::default());

        let err = session.establish_over(controller.spawn()).await.unwrap_err();

        match &err {
            LinkError::Connect { reason, reply, .. } => {
                assert!(reason.contains("unexpected handshake status"));
                assert_eq!(reply.as_ref().unwrap().status, Status::Code(0));
            }
            other => panic!("expected Connect, got {:?}", other),
        }
        assert!(!session.is_established());
    }

    #[tokio::test(start_paused = true)]
    async fn garbled_handshake_reply_is_connect_error() {
        let controller = MockController::new().fault_on("start_link", 1, Fault::Garbage);
        let mut session = LinkSession::new(&LinkConfig::default());

        let err = session.establish_over(controller.spawn()).await.unwrap_err();

        assert!(err.is_connect_error());
        assert!(!session.is_established());
        assert!(session
            .call("poll_wave_m", Map::new(), Duration::from_secs(1))
            .await
            .unwrap_err()
            .is_link_lost());
    }

    #[tokio::test]
    async fn calls_refused_until_linked() {
        let mut session = LinkSession::new(&LinkConfig::default());
        let err = session
            .call("poll_wave_m", Map::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::NotLinked));
    }

    #[tokio::test]
    async fn transport_failure_drops_link() {
        let controller = MockController::new().fault_on("poll_wave_m", 1, Fault::Hangup);
        let mut session =
            LinkSession::open_with_transport(controller.spawn(), "mock", &LinkConfig::default())
                .await
                .unwrap();

        let err = session
            .call("poll_wave_m", Map::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_link_lost());
        assert!(!session.is_established());

        let err = session
            .call("poll_wave_m", Map::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::NotLinked));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_keeps_history() {
        let controller = MockController::new();
        let mut session =
            LinkSession::open_with_transport(controller.spawn(), "mock", &LinkConfig::default())
                .await
                .unwrap();

        session.close().await;
        session.close().await;

        assert!(!session.is_established());
        assert_eq!(session.diagnostics().len(), 1);
        assert_eq!(
            session.diagnostics().last_reply().unwrap().status,
            Status::from("ok")
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_connect_error() {
        let port = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let config = LinkConfig {
            host: "127.0.0.1".into(),
            port,
            ..Default::default()
        };

        let err = LinkSession::open(&config).await.unwrap_err();
        assert!(err.is_connect_error());
    }
}
