//! The top-level API composing the registry, ledger, and workflow.

use std::sync::Arc;

use serde::Serialize;

use crate::codes;
use crate::config::RewardsPolicy;
use crate::currency::{LocalAmount, RateSource};
use crate::error::Error;
use crate::ledger::RewardsLedger;
use crate::notify::{self, Notification, Notifier};
use crate::registry::{CodeLookup, ReferralRegistry};
use crate::store::KeyedStore;
use crate::types::{JoinRequest, PlayerLink, PlayerProfile, PlayerRewards, Referral};
use crate::workflow::JoinRequestWorkflow;

/// A personal referral together with its shareable link.
#[derive(Clone, Debug, Serialize)]
pub struct ShareLink {
    pub referral: Referral,
    pub invite_link: String,
}

/// What redeeming a code led to.
///
/// Personal codes credit immediately; organization codes gate the reward
/// behind join-request approval.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RedemptionOutcome {
    /// A personal code: the referrer was credited and the new member got the
    /// signup bonus.
    Credited {
        referrer_id: String,
        new_member: PlayerRewards,
    },
    /// An organization code: a join request now awaits a decision.
    JoinRequested { request: JoinRequest },
}

/// A player's rewards snapshot for display.
#[derive(Clone, Debug, Serialize)]
pub struct PlayerStats {
    pub rewards: PlayerRewards,
    /// The monetary value of all points earned, in USD.
    pub points_value_usd: f64,
    /// Lifetime earnings converted for local display.
    pub local_earnings: LocalAmount,
    /// The organization the player belongs to, if any.
    pub organization: Option<PlayerLink>,
}

/// The composed entry point callers interact with.
#[derive(Clone)]
pub struct ReferralFacade {
    registry: ReferralRegistry,
    ledger: RewardsLedger,
    workflow: JoinRequestWorkflow,
    rates: Arc<dyn RateSource>,
    notifier: Arc<dyn Notifier>,
    base_url: String,
}

impl ReferralFacade {
    pub fn new(
        store: Arc<dyn KeyedStore>,
        base_url: impl Into<String>,
        policy: RewardsPolicy,
        rates: Arc<dyn RateSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let base_url = base_url.into();
        let registry = ReferralRegistry::new(store.clone(), base_url.clone(), policy.code_retry_limit);
        let ledger = RewardsLedger::new(store.clone(), policy);
        let workflow =
            JoinRequestWorkflow::new(store, registry.clone(), ledger.clone(), notifier.clone());
        Self {
            registry,
            ledger,
            workflow,
            rates,
            notifier,
            base_url,
        }
    }

    pub fn registry(&self) -> &ReferralRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &RewardsLedger {
        &self.ledger
    }

    pub fn workflow(&self) -> &JoinRequestWorkflow {
        &self.workflow
    }

    /// The caller's personal referral and invite link, minting the code on
    /// first call.
    pub async fn share_link(&self, owner_id: &str) -> Result<ShareLink, Error> {
        let referral = self.registry.create_personal(owner_id).await?;
        let invite_link = codes::invite_link(&self.base_url, &referral.code);
        Ok(ShareLink {
            referral,
            invite_link,
        })
    }

    /// Redeems a code on behalf of a player.
    ///
    /// Personal codes credit the referrer and grant the new member their
    /// bonus, both idempotent per `(player, code)`. Organization codes open a
    /// join request instead.
    pub async fn redeem(
        &self,
        code: &str,
        player: &PlayerProfile,
    ) -> Result<RedemptionOutcome, Error> {
        match self.registry.find_by_code(code).await? {
            CodeLookup::Personal(referral) => {
                if referral.owner_id == player.player_id {
                    return Err(Error::SelfReferral);
                }
                let referral_event = format!("signup:{}:{}", player.player_id, referral.code);
                self.ledger
                    .credit_referral(&player.player_id, &referral.owner_id, &referral_event)
                    .await?;
                let bonus_event = format!("signup-bonus:{}:{}", player.player_id, referral.code);
                let new_member = self
                    .ledger
                    .credit_bonus(&referral.owner_id, &player.player_id, &bonus_event)
                    .await?;
                notify::best_effort(
                    self.notifier.as_ref(),
                    Notification::ReferralRedeemed {
                        referrer_id: referral.owner_id.clone(),
                        code: referral.code.clone(),
                    },
                )
                .await;
                Ok(RedemptionOutcome::Credited {
                    referrer_id: referral.owner_id,
                    new_member,
                })
            }
            CodeLookup::Organization(_) => {
                let request = self.workflow.submit(code, player).await?;
                Ok(RedemptionOutcome::JoinRequested { request })
            }
        }
    }

    /// A display-ready rewards snapshot, including local-currency earnings.
    pub async fn stats(&self, player_id: &str, currency: &str) -> Result<PlayerStats, Error> {
        let rewards = self.ledger.get_or_create(player_id).await?;
        let points_value_usd = self.ledger.to_usd(rewards.total_points);
        let local_earnings = self
            .ledger
            .to_local(self.rates.as_ref(), rewards.total_earnings_usd, currency)
            .await;
        let organization = self.workflow.player_link(player_id).await?;
        Ok(PlayerStats {
            rewards,
            points_value_usd,
            local_earnings,
            organization,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::FallbackRates;
    use crate::notify::TracingNotifier;
    use crate::store::MemoryStore;
    use crate::types::AccountType;
    use async_trait::async_trait;

    fn facade_with(rates: Arc<dyn RateSource>) -> ReferralFacade {
        ReferralFacade::new(
            Arc::new(MemoryStore::new()),
            "https://example.com",
            RewardsPolicy::default(),
            rates,
            Arc::new(TracingNotifier),
        )
    }

    fn facade() -> ReferralFacade {
        facade_with(Arc::new(FallbackRates))
    }

    fn player(id: &str) -> PlayerProfile {
        PlayerProfile {
            player_id: id.to_string(),
            account_type: AccountType::Player,
            name: format!("Player {id}"),
            email: None,
            phone: None,
            extra: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn share_link_is_stable_per_owner() {
        let facade = facade();
        let first = facade.share_link("p1").await.unwrap();
        let second = facade.share_link("p1").await.unwrap();
        assert_eq!(first.referral.code, second.referral.code);
        assert_eq!(
            first.invite_link,
            format!("https://example.com/invite/{}", first.referral.code)
        );
    }

    #[tokio::test]
    async fn personal_redemption_credits_both_sides_once() {
        let facade = facade();
        let link = facade.share_link("referrer").await.unwrap();

        let outcome = facade
            .redeem(&link.referral.code, &player("newcomer"))
            .await
            .unwrap();
        match outcome {
            RedemptionOutcome::Credited {
                referrer_id,
                new_member,
            } => {
                assert_eq!(referrer_id, "referrer");
                assert_eq!(new_member.total_points, 5_000);
                assert_eq!(new_member.referral_count, 0);
            }
            RedemptionOutcome::JoinRequested { .. } => panic!("expected a credit"),
        }

        let referrer = facade.ledger().get_or_create("referrer").await.unwrap();
        assert_eq!(referrer.total_points, 10_000);
        assert_eq!(referrer.referral_count, 1);
        assert_eq!(referrer.badges, vec!["first_referral"]);

        // A replayed redemption is a no-op on both ledgers.
        facade
            .redeem(&link.referral.code, &player("newcomer"))
            .await
            .unwrap();
        let referrer = facade.ledger().get_or_create("referrer").await.unwrap();
        assert_eq!(referrer.total_points, 10_000);
        let newcomer = facade.ledger().get_or_create("newcomer").await.unwrap();
        assert_eq!(newcomer.total_points, 5_000);
    }

    #[tokio::test]
    async fn owners_cannot_redeem_their_own_code() {
        let facade = facade();
        let link = facade.share_link("p1").await.unwrap();
        assert!(matches!(
            facade.redeem(&link.referral.code, &player("p1")).await,
            Err(Error::SelfReferral)
        ));
    }

    #[tokio::test]
    async fn organization_codes_open_a_join_request() {
        let facade = facade();
        let org = facade
            .registry()
            .create_organization("org-1", AccountType::Club, "FC", Default::default())
            .await
            .unwrap();

        let outcome = facade
            .redeem(&org.referral_code, &player("p1"))
            .await
            .unwrap();
        match outcome {
            RedemptionOutcome::JoinRequested { request } => {
                assert_eq!(request.organization_id, "org-1");
            }
            RedemptionOutcome::Credited { .. } => panic!("expected a join request"),
        }

        // No points move until the organization approves.
        let rewards = facade.ledger().get_or_create("p1").await.unwrap();
        assert_eq!(rewards.total_points, 0);
    }

    #[tokio::test]
    async fn malformed_and_unknown_codes_are_distinct() {
        let facade = facade();
        assert!(matches!(
            facade.redeem("???", &player("p1")).await,
            Err(Error::InvalidCode)
        ));
        assert!(matches!(
            facade.redeem("ZZZZ9999", &player("p1")).await,
            Err(Error::NotFound(_))
        ));
    }

    struct DownSource;

    #[async_trait]
    impl RateSource for DownSource {
        async fn usd_rate(&self, _currency: &str) -> anyhow::Result<f64> {
            anyhow::bail!("rate service unreachable")
        }
    }

    #[tokio::test]
    async fn stats_survive_a_rate_outage() {
        let facade = facade_with(Arc::new(DownSource));
        let link = facade.share_link("referrer").await.unwrap();
        facade
            .redeem(&link.referral.code, &player("newcomer"))
            .await
            .unwrap();

        let stats = facade.stats("referrer", "EGP").await.unwrap();
        assert_eq!(stats.rewards.total_points, 10_000);
        assert_eq!(stats.points_value_usd, 1.0);
        assert_eq!(stats.local_earnings.amount, 49.0);
        assert!(stats.local_earnings.approximate);
    }
}
