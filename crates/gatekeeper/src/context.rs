use std::sync::Arc;

use tracing::info;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::workflows::membership::{
    AdminToken, MembershipService, OutboxTransport, RconClient, SqliteApplicationStore,
    TransportVariant, WebhookTransport,
};

pub type ConfiguredService =
    MembershipService<SqliteApplicationStore, RconClient, TransportVariant>;

/// Process-wide resources, built once at startup and torn down explicitly.
pub struct GatekeeperContext {
    store: Arc<SqliteApplicationStore>,
    service: Arc<ConfiguredService>,
    outbox: Option<Arc<OutboxTransport>>,
    admin: AdminToken,
}

impl GatekeeperContext {
    pub async fn connect(config: &AppConfig) -> Result<Self, AppError> {
        let store = Arc::new(SqliteApplicationStore::connect(&config.database).await?);
        let console = Arc::new(RconClient::new(config.rcon.clone()));

        let (transport, outbox) = match &config.transport.webhook_url {
            Some(url) => {
                info!(%url, "delivering chat events through webhook");
                let webhook =
                    WebhookTransport::new(url, config.transport.webhook_token.clone())?;
                (TransportVariant::Webhook(webhook), None)
            }
            None => {
                info!(
                    capacity = config.transport.outbox_capacity,
                    "queueing chat events in the outbox"
                );
                let outbox = Arc::new(OutboxTransport::with_capacity(
                    config.transport.outbox_capacity,
                ));
                (TransportVariant::Outbox(outbox.clone()), Some(outbox))
            }
        };

        let service = Arc::new(MembershipService::new(
            store.clone(),
            console,
            Arc::new(transport),
            config.whitelist,
        ));

        Ok(Self {
            store,
            service,
            outbox,
            admin: AdminToken::new(config.admin_token.clone()),
        })
    }

    pub fn service(&self) -> Arc<ConfiguredService> {
        self.service.clone()
    }

    /// Present only when no webhook is configured.
    pub fn outbox(&self) -> Option<Arc<OutboxTransport>> {
        self.outbox.clone()
    }

    pub fn admin_token(&self) -> AdminToken {
        self.admin.clone()
    }

    /// Closes the store pool. Call after the last request has finished.
    pub async fn shutdown(self) {
        self.store.close().await;
        info!("gatekeeper context shut down");
    }
}
