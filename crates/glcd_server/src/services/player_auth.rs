//! Credential checks for `playerAuth`.
//!
//! Replies are always `playerAuth` envelopes, except when the store cannot
//! answer, which is reported as an `error` so clients can retry:
//!
//! ```json
//! { "type": "playerAuth", "data": { "user": "bob", "success": true } }
//! { "type": "playerAuth", "data": { "user": "bob", "success": false, "code": "invalid_password" } }
//! { "type": "playerAuth", "data": { "user": "eve", "success": false, "code": "unknown_user" } }
//! ```
//!
//! A stored record that can never verify answers `malformed_record`, which
//! is not worth retrying.

use super::{codes, serve, store_failure};
use crate::error::HubError;
use crate::messaging::{HubMessage, Inbound, MessageKind, Outbound, ServiceInbox};
use crate::persistence::{PersistenceError, PersistenceGateway};
use crate::publisher::Publisher;
use crate::supervisor::Service;
use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct PlayerAuthService {
    inbox: ServiceInbox,
    gateway: PersistenceGateway,
    publisher: Publisher,
}

impl PlayerAuthService {
    pub fn new(inbox: ServiceInbox, gateway: PersistenceGateway, publisher: Publisher) -> Self {
        Self {
            inbox,
            gateway,
            publisher,
        }
    }

    async fn handle(&self, inbound: Inbound) {
        let (user, password) = match inbound.message {
            HubMessage::PlayerAuth { user, password } => (user, password),
            other => {
                debug!(kind = other.kind().tag(), "Auth service ignoring message");
                return;
            }
        };

        let reply = match self.gateway.verify_password(&user, &password).await {
            Ok(true) => {
                info!(client = %inbound.client, %user, "🔑 Player authenticated");
                auth_reply(&user, None)
            }
            Ok(false) => {
                info!(client = %inbound.client, %user, "Player authentication failed: wrong password");
                auth_reply(&user, Some(codes::INVALID_PASSWORD))
            }
            Err(PersistenceError::NotFound(_)) => {
                info!(client = %inbound.client, %user, "Player authentication failed: unknown user");
                auth_reply(&user, Some(codes::UNKNOWN_USER))
            }
            Err(PersistenceError::Malformed(reason)) => {
                warn!(client = %inbound.client, %user, "Auth record is unusable: {}", reason);
                auth_reply(&user, Some(codes::MALFORMED_RECORD))
            }
            Err(err) => store_failure("verify credentials", &err),
        };
        self.publisher.send_to(&inbound.client, &reply).await;
    }
}

fn auth_reply(user: &str, failure: Option<&str>) -> Outbound {
    let data = match failure {
        None => json!({ "user": user, "success": true }),
        Some(code) => json!({ "user": user, "success": false, "code": code }),
    };
    Outbound::new(MessageKind::PlayerAuth.tag(), data)
}

#[async_trait]
impl Service for PlayerAuthService {
    fn name(&self) -> &'static str {
        "player_auth"
    }

    async fn run(&self, shutdown: CancellationToken) -> Result<(), HubError> {
        serve(&self.inbox, &shutdown, |inbound| self.handle(inbound)).await
    }
}
