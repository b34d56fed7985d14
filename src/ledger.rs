//! The player rewards ledger: point crediting, badge awards, spending, and
//! monetary conversion.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::badges;
use crate::config::RewardsPolicy;
use crate::currency::{self, LocalAmount, RateSource, round2};
use crate::error::Error;
use crate::store::{KeyedStore, RecordKind, StoreError, WriteOp, encode};
use crate::types::PlayerRewards;

const CAS_RETRY_LIMIT: u32 = 16;

/// The idempotency marker written when a credit event is applied.
#[derive(Debug, Serialize, Deserialize)]
struct ConsumedEvent {
    player_id: String,
    source_id: String,
    applied_at: DateTime<Utc>,
}

/// What a credit event grants.
#[derive(Clone, Copy, Debug)]
pub(crate) enum GrantKind {
    /// A completed referral: points, referral count, badge evaluation.
    Referral,
    /// A new-member signup bonus: points only.
    NewMemberBonus,
}

/// Owns `PlayerRewards` rows. Every mutation is an idempotent, guarded write.
#[derive(Clone)]
pub struct RewardsLedger {
    store: Arc<dyn KeyedStore>,
    policy: Arc<RewardsPolicy>,
}

impl RewardsLedger {
    pub fn new(store: Arc<dyn KeyedStore>, policy: RewardsPolicy) -> Self {
        Self {
            store,
            policy: Arc::new(policy),
        }
    }

    pub fn policy(&self) -> &RewardsPolicy {
        &self.policy
    }

    /// The player's ledger row, lazily initialized to zero on first access.
    pub async fn get_or_create(&self, player_id: &str) -> Result<PlayerRewards, Error> {
        Ok(self.load(player_id).await?.1)
    }

    async fn load(&self, player_id: &str) -> Result<(i64, PlayerRewards), Error> {
        loop {
            if let Some(rec) = self.store.get(RecordKind::Rewards, player_id).await? {
                return Ok((rec.version, rec.decode()?));
            }
            let zeroed = PlayerRewards::zeroed(player_id);
            match self
                .store
                .apply(vec![WriteOp::Insert {
                    kind: RecordKind::Rewards,
                    key: player_id.to_string(),
                    value: encode(&zeroed)?,
                }])
                .await
            {
                Ok(()) => return Ok((1, zeroed)),
                // Raced another initializer; re-read its row.
                Err(StoreError::AlreadyExists) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Builds the writes for one credit event without applying them, so the
    /// join-request workflow can commit them inside its own batch.
    ///
    /// Returns `None` when `event_id` was already consumed; the caller treats
    /// that as a successful no-op.
    pub(crate) async fn prepare_credit(
        &self,
        source_id: &str,
        player_id: &str,
        event_id: &str,
        kind: GrantKind,
    ) -> Result<Option<(Vec<WriteOp>, PlayerRewards)>, Error> {
        if self
            .store
            .get(RecordKind::ConsumedEvent, event_id)
            .await?
            .is_some()
        {
            return Ok(None);
        }

        let (version, mut rewards) = self.load(player_id).await?;
        let points = match kind {
            GrantKind::Referral => self.policy.referral_points,
            GrantKind::NewMemberBonus => self.policy.new_member_points,
        };
        rewards.total_points += points;
        rewards.available_points += points;
        rewards.total_earnings_usd = round2(rewards.total_earnings_usd + self.to_usd(points));
        if let GrantKind::Referral = kind {
            rewards.referral_count += 1;
            for badge in
                badges::newly_earned(&self.policy.badges, rewards.referral_count, &rewards.badges)
            {
                rewards.badges.push(badge.id.clone());
            }
        }
        rewards.last_updated = Utc::now();

        let marker = ConsumedEvent {
            player_id: player_id.to_string(),
            source_id: source_id.to_string(),
            applied_at: rewards.last_updated,
        };
        let ops = vec![
            WriteOp::Insert {
                kind: RecordKind::ConsumedEvent,
                key: event_id.to_string(),
                value: encode(&marker)?,
            },
            WriteOp::Update {
                kind: RecordKind::Rewards,
                key: player_id.to_string(),
                expected_version: version,
                value: encode(&rewards)?,
            },
        ];
        Ok(Some((ops, rewards)))
    }

    async fn credit(
        &self,
        source_id: &str,
        player_id: &str,
        event_id: &str,
        kind: GrantKind,
    ) -> Result<PlayerRewards, Error> {
        for _ in 0..CAS_RETRY_LIMIT {
            match self
                .prepare_credit(source_id, player_id, event_id, kind)
                .await?
            {
                // Duplicate event: a successful no-op returning current state.
                None => return self.get_or_create(player_id).await,
                Some((ops, rewards)) => match self.store.apply(ops).await {
                    Ok(()) => return Ok(rewards),
                    Err(StoreError::AlreadyExists) => return self.get_or_create(player_id).await,
                    Err(StoreError::VersionConflict) => continue,
                    Err(e) => return Err(e.into()),
                },
            }
        }
        Err(StoreError::VersionConflict.into())
    }

    /// Credits one completed referral to `player_id`, idempotent by
    /// `event_id`: the grant, the referral count, and any badge awards commit
    /// atomically with the consumed-event marker.
    pub async fn credit_referral(
        &self,
        source_id: &str,
        player_id: &str,
        event_id: &str,
    ) -> Result<PlayerRewards, Error> {
        self.credit(source_id, player_id, event_id, GrantKind::Referral)
            .await
    }

    /// Credits the new-member signup bonus; points only, no referral count,
    /// no badges.
    pub async fn credit_bonus(
        &self,
        source_id: &str,
        player_id: &str,
        event_id: &str,
    ) -> Result<PlayerRewards, Error> {
        self.credit(source_id, player_id, event_id, GrantKind::NewMemberBonus)
            .await
    }

    /// Deducts from the available balance. Never touches `total_points` or
    /// `referral_count`. The amount must be positive; a zero or negative
    /// spend could otherwise inflate the balance past the lifetime total.
    pub async fn spend(&self, player_id: &str, amount: i64) -> Result<PlayerRewards, Error> {
        if amount <= 0 {
            return Err(Error::InvalidSpendAmount);
        }
        for _ in 0..CAS_RETRY_LIMIT {
            let (version, mut rewards) = self.load(player_id).await?;
            if amount > rewards.available_points {
                return Err(Error::InsufficientPoints);
            }
            rewards.available_points -= amount;
            rewards.last_updated = Utc::now();
            match self
                .store
                .apply(vec![WriteOp::Update {
                    kind: RecordKind::Rewards,
                    key: player_id.to_string(),
                    expected_version: version,
                    value: encode(&rewards)?,
                }])
                .await
            {
                Ok(()) => return Ok(rewards),
                Err(StoreError::VersionConflict) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::VersionConflict.into())
    }

    /// Converts a point amount into US dollars at the configured rate.
    pub fn to_usd(&self, points: i64) -> f64 {
        round2(points as f64 / self.policy.points_per_dollar as f64)
    }

    /// Converts a USD amount for local display; rate failures degrade to the
    /// documented fallback and never surface as errors.
    pub async fn to_local(&self, rates: &dyn RateSource, usd: f64, currency: &str) -> LocalAmount {
        currency::convert(rates, usd, currency).await
    }
}
