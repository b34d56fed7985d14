//! Fire-and-forget notifications.
//!
//! Dispatch failures are logged and dropped; they never roll back or delay a
//! ledger or workflow operation.

use async_trait::async_trait;
use uuid::Uuid;

/// An event worth telling an external channel about.
#[derive(Clone, Debug)]
pub enum Notification {
    /// A new join request landed in an organization's inbox.
    JoinRequestReceived {
        organization_id: String,
        request_id: Uuid,
        player_name: String,
    },
    /// An organization decided a player's join request.
    JoinRequestDecided {
        player_id: String,
        organization_name: String,
        approved: bool,
    },
    /// A personal referral code was redeemed by a new signup.
    ReferralRedeemed {
        referrer_id: String,
        code: String,
    },
}

/// An outbound notification channel (email, SMS, push, ...).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn dispatch(&self, note: Notification) -> anyhow::Result<()>;
}

/// A notifier that only writes to the log. The default wiring.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn dispatch(&self, note: Notification) -> anyhow::Result<()> {
        tracing::info!(?note, "notification dispatched");
        Ok(())
    }
}

/// Dispatches without letting a failure escape.
pub async fn best_effort(notifier: &dyn Notifier, note: Notification) {
    if let Err(e) = notifier.dispatch(note).await {
        tracing::warn!("notification dropped: {e:#}");
    }
}
