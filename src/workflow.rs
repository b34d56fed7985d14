//! The join-request state machine: pending -> approved | rejected.
//!
//! A request is decided exactly once. Approval links the player to the
//! organization and credits the ledger in the same atomic batch as the state
//! transition, so a retried approval can neither double-credit nor leave an
//! approved request without its reward.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::ledger::{GrantKind, RewardsLedger};
use crate::notify::{self, Notification, Notifier};
use crate::registry::ReferralRegistry;
use crate::store::{KeyedStore, RecordKind, StoreError, WriteOp, encode};
use crate::types::{
    AccountType, JoinRequest, JoinRequestStatus, PlayerLink, PlayerProfile,
};

const CAS_RETRY_LIMIT: u32 = 16;

/// Marks an open request for one `(organization, player)` pair. Its insert
/// uniqueness is what rejects duplicate pending requests.
#[derive(Debug, Serialize, Deserialize)]
struct PendingPair {
    request_id: Uuid,
}

/// Owns `JoinRequest` entities and their lifecycle.
#[derive(Clone)]
pub struct JoinRequestWorkflow {
    store: Arc<dyn KeyedStore>,
    registry: ReferralRegistry,
    ledger: RewardsLedger,
    notifier: Arc<dyn Notifier>,
}

impl JoinRequestWorkflow {
    pub fn new(
        store: Arc<dyn KeyedStore>,
        registry: ReferralRegistry,
        ledger: RewardsLedger,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            registry,
            ledger,
            notifier,
        }
    }

    /// Submits a join request through an organization's referral code.
    ///
    /// The code's usage increment, the request row, and the pending-pair
    /// marker commit as one batch: a duplicate pending request consumes no
    /// usage, and a full code admits no request.
    pub async fn submit(&self, code: &str, player: &PlayerProfile) -> Result<JoinRequest, Error> {
        if player.account_type != AccountType::Player {
            return Err(Error::InvalidAccountType);
        }

        for _ in 0..CAS_RETRY_LIMIT {
            let (usage_op, referral) = self.registry.prepare_redeem(code).await?;

            let request = JoinRequest {
                id: Uuid::new_v4(),
                organization_id: referral.organization_id.clone(),
                organization_type: referral.organization_type,
                organization_name: referral.organization_name.clone(),
                player_id: player.player_id.clone(),
                player_name: player.name.clone(),
                player_email: player.email.clone(),
                player_phone: player.phone.clone(),
                player_data: player.extra.clone(),
                referral_code: referral.referral_code.clone(),
                status: JoinRequestStatus::Pending,
                requested_at: Utc::now(),
                decided_at: None,
                decided_by: None,
                rejection_reason: None,
            };
            let request_key = format!("{}/{}", referral.organization_id, request.id);
            let pair_key = format!("{}/{}", referral.organization_id, player.player_id);

            let batch = vec![
                usage_op,
                WriteOp::Insert {
                    kind: RecordKind::JoinRequest,
                    key: request_key,
                    value: encode(&request)?,
                },
                WriteOp::Insert {
                    kind: RecordKind::PendingPair,
                    key: pair_key,
                    value: encode(&PendingPair {
                        request_id: request.id,
                    })?,
                },
            ];

            match self.store.apply(batch).await {
                Ok(()) => {
                    notify::best_effort(
                        self.notifier.as_ref(),
                        Notification::JoinRequestReceived {
                            organization_id: request.organization_id.clone(),
                            request_id: request.id,
                            player_name: request.player_name.clone(),
                        },
                    )
                    .await;
                    return Ok(request);
                }
                // The request ID is fresh, so the pending pair collided.
                Err(StoreError::AlreadyExists) => return Err(Error::DuplicateRequest),
                Err(StoreError::VersionConflict) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::VersionConflict.into())
    }

    /// Approves a pending request: state transition, player link, and ledger
    /// credit (idempotency key = request ID) in one atomic batch.
    pub async fn approve(
        &self,
        organization_id: &str,
        request_id: Uuid,
        approver_id: &str,
        approver_name: &str,
    ) -> Result<JoinRequest, Error> {
        let request_key = format!("{organization_id}/{request_id}");

        for _ in 0..CAS_RETRY_LIMIT {
            let rec = self
                .store
                .get(RecordKind::JoinRequest, &request_key)
                .await?
                .ok_or(Error::NotFound("join request"))?;
            let mut request: JoinRequest = rec.decode()?;
            if request.status != JoinRequestStatus::Pending {
                return Err(Error::AlreadyDecided);
            }

            let now = Utc::now();
            request.status = JoinRequestStatus::Approved;
            request.decided_at = Some(now);
            request.decided_by = Some(approver_id.to_string());

            let link = PlayerLink {
                player_id: request.player_id.clone(),
                organization_id: organization_id.to_string(),
                organization_type: request.organization_type,
                organization_name: request.organization_name.clone(),
                join_request_id: request.id,
                joined_at: now,
            };

            let mut batch = vec![
                WriteOp::Update {
                    kind: RecordKind::JoinRequest,
                    key: request_key.clone(),
                    expected_version: rec.version,
                    value: encode(&request)?,
                },
                WriteOp::Put {
                    kind: RecordKind::PlayerLink,
                    key: request.player_id.clone(),
                    value: encode(&link)?,
                },
                WriteOp::Delete {
                    kind: RecordKind::PendingPair,
                    key: format!("{organization_id}/{}", request.player_id),
                },
            ];
            if let Some((credit_ops, _)) = self
                .ledger
                .prepare_credit(
                    organization_id,
                    &request.player_id,
                    &request.id.to_string(),
                    GrantKind::Referral,
                )
                .await?
            {
                batch.extend(credit_ops);
            }

            match self.store.apply(batch).await {
                Ok(()) => {
                    tracing::info!(
                        request_id = %request.id,
                        approver = approver_name,
                        "join request approved"
                    );
                    notify::best_effort(
                        self.notifier.as_ref(),
                        Notification::JoinRequestDecided {
                            player_id: request.player_id.clone(),
                            organization_name: request.organization_name.clone(),
                            approved: true,
                        },
                    )
                    .await;
                    return Ok(request);
                }
                // Either the request or the rewards row moved; re-reading
                // surfaces AlreadyDecided or retries the credit.
                Err(StoreError::VersionConflict) | Err(StoreError::AlreadyExists) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::VersionConflict.into())
    }

    /// Rejects a pending request. No ledger side effect; the pending-pair
    /// marker is cleared so the player may apply again later.
    pub async fn reject(
        &self,
        organization_id: &str,
        request_id: Uuid,
        approver_id: &str,
        approver_name: &str,
        reason: Option<String>,
    ) -> Result<JoinRequest, Error> {
        let request_key = format!("{organization_id}/{request_id}");

        for _ in 0..CAS_RETRY_LIMIT {
            let rec = self
                .store
                .get(RecordKind::JoinRequest, &request_key)
                .await?
                .ok_or(Error::NotFound("join request"))?;
            let mut request: JoinRequest = rec.decode()?;
            if request.status != JoinRequestStatus::Pending {
                return Err(Error::AlreadyDecided);
            }

            request.status = JoinRequestStatus::Rejected;
            request.decided_at = Some(Utc::now());
            request.decided_by = Some(approver_id.to_string());
            request.rejection_reason = reason.clone();

            let batch = vec![
                WriteOp::Update {
                    kind: RecordKind::JoinRequest,
                    key: request_key.clone(),
                    expected_version: rec.version,
                    value: encode(&request)?,
                },
                WriteOp::Delete {
                    kind: RecordKind::PendingPair,
                    key: format!("{organization_id}/{}", request.player_id),
                },
            ];

            match self.store.apply(batch).await {
                Ok(()) => {
                    tracing::info!(
                        request_id = %request.id,
                        approver = approver_name,
                        "join request rejected"
                    );
                    notify::best_effort(
                        self.notifier.as_ref(),
                        Notification::JoinRequestDecided {
                            player_id: request.player_id.clone(),
                            organization_name: request.organization_name.clone(),
                            approved: false,
                        },
                    )
                    .await;
                    return Ok(request);
                }
                Err(StoreError::VersionConflict) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::VersionConflict.into())
    }

    /// An organization's join requests, newest first, optionally filtered by
    /// status.
    pub async fn list_for_organization(
        &self,
        organization_id: &str,
        status: Option<JoinRequestStatus>,
    ) -> Result<Vec<JoinRequest>, Error> {
        let recs = self
            .store
            .list(RecordKind::JoinRequest, &format!("{organization_id}/"))
            .await?;
        let mut requests = Vec::with_capacity(recs.len());
        for rec in recs {
            let request: JoinRequest = rec.decode()?;
            if status.is_none_or(|s| request.status == s) {
                requests.push(request);
            }
        }
        requests.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(requests)
    }

    /// The organization link on a player record, if any.
    pub async fn player_link(&self, player_id: &str) -> Result<Option<PlayerLink>, Error> {
        match self.store.get(RecordKind::PlayerLink, player_id).await? {
            Some(rec) => Ok(Some(rec.decode()?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RewardsPolicy;
    use crate::notify::TracingNotifier;
    use crate::registry::OrgReferralOptions;
    use crate::store::MemoryStore;
    use crate::types::OrganizationReferral;

    struct Fixture {
        registry: ReferralRegistry,
        ledger: RewardsLedger,
        workflow: JoinRequestWorkflow,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn KeyedStore> = Arc::new(MemoryStore::new());
        let registry = ReferralRegistry::new(store.clone(), "https://example.com", 5);
        let ledger = RewardsLedger::new(store.clone(), RewardsPolicy::default());
        let workflow = JoinRequestWorkflow::new(
            store,
            registry.clone(),
            ledger.clone(),
            Arc::new(TracingNotifier),
        );
        Fixture {
            registry,
            ledger,
            workflow,
        }
    }

    fn player(id: &str) -> PlayerProfile {
        PlayerProfile {
            player_id: id.to_string(),
            account_type: AccountType::Player,
            name: format!("Player {id}"),
            email: Some(format!("{id}@example.com")),
            phone: None,
            extra: serde_json::json!({"position": "striker"}),
        }
    }

    async fn org_code(f: &Fixture, opts: OrgReferralOptions) -> OrganizationReferral {
        f.registry
            .create_organization("org-1", AccountType::Club, "FC Test", opts)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn submit_creates_a_pending_request_and_consumes_usage() {
        let f = fixture();
        let org = org_code(&f, Default::default()).await;

        let request = f
            .workflow
            .submit(&org.referral_code, &player("p1"))
            .await
            .unwrap();
        assert_eq!(request.status, JoinRequestStatus::Pending);
        assert_eq!(request.organization_id, "org-1");

        let listed = f
            .workflow
            .list_for_organization("org-1", Some(JoinRequestStatus::Pending))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);

        let refreshed = f.registry.list_for_organization("org-1").await.unwrap();
        assert_eq!(refreshed[0].current_usage, 1);
    }

    #[tokio::test]
    async fn only_player_accounts_may_apply() {
        let f = fixture();
        let org = org_code(&f, Default::default()).await;

        let mut applicant = player("p1");
        applicant.account_type = AccountType::Agent;
        assert!(matches!(
            f.workflow.submit(&org.referral_code, &applicant).await,
            Err(Error::InvalidAccountType)
        ));
    }

    #[tokio::test]
    async fn duplicate_pending_request_consumes_no_usage() {
        let f = fixture();
        let org = org_code(&f, Default::default()).await;

        f.workflow
            .submit(&org.referral_code, &player("p1"))
            .await
            .unwrap();
        assert!(matches!(
            f.workflow.submit(&org.referral_code, &player("p1")).await,
            Err(Error::DuplicateRequest)
        ));

        let refreshed = f.registry.list_for_organization("org-1").await.unwrap();
        assert_eq!(refreshed[0].current_usage, 1);
    }

    #[tokio::test]
    async fn approval_links_and_credits_exactly_once() {
        let f = fixture();
        let org = org_code(&f, Default::default()).await;
        let request = f
            .workflow
            .submit(&org.referral_code, &player("p1"))
            .await
            .unwrap();

        let approved = f
            .workflow
            .approve("org-1", request.id, "admin-1", "Coach")
            .await
            .unwrap();
        assert_eq!(approved.status, JoinRequestStatus::Approved);
        assert_eq!(approved.decided_by.as_deref(), Some("admin-1"));

        let link = f.workflow.player_link("p1").await.unwrap().unwrap();
        assert_eq!(link.organization_id, "org-1");
        assert_eq!(link.join_request_id, request.id);

        let rewards = f.ledger.get_or_create("p1").await.unwrap();
        assert_eq!(rewards.total_points, 10_000);
        assert_eq!(rewards.referral_count, 1);
        assert_eq!(rewards.badges, vec!["first_referral"]);

        // The second decision must not apply, and must not re-credit.
        assert!(matches!(
            f.workflow.approve("org-1", request.id, "admin-2", "Coach").await,
            Err(Error::AlreadyDecided)
        ));
        let rewards = f.ledger.get_or_create("p1").await.unwrap();
        assert_eq!(rewards.total_points, 10_000);
        assert_eq!(rewards.referral_count, 1);
    }

    #[tokio::test]
    async fn rejection_has_no_ledger_effect_and_frees_the_pair() {
        let f = fixture();
        let org = org_code(&f, Default::default()).await;
        let request = f
            .workflow
            .submit(&org.referral_code, &player("p1"))
            .await
            .unwrap();

        let rejected = f
            .workflow
            .reject(
                "org-1",
                request.id,
                "admin-1",
                "Coach",
                Some("roster full".into()),
            )
            .await
            .unwrap();
        assert_eq!(rejected.status, JoinRequestStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("roster full"));

        let rewards = f.ledger.get_or_create("p1").await.unwrap();
        assert_eq!(rewards.total_points, 0);

        // Approving after rejection must fail; the request is terminal.
        assert!(matches!(
            f.workflow.approve("org-1", request.id, "admin-1", "Coach").await,
            Err(Error::AlreadyDecided)
        ));

        // The player may apply again once the pending marker is gone.
        let again = f
            .workflow
            .submit(&org.referral_code, &player("p1"))
            .await
            .unwrap();
        assert_eq!(again.status, JoinRequestStatus::Pending);
    }

    #[tokio::test]
    async fn unknown_request_is_not_found() {
        let f = fixture();
        assert!(matches!(
            f.workflow
                .approve("org-1", Uuid::new_v4(), "admin-1", "Coach")
                .await,
            Err(Error::NotFound(_))
        ));
    }
}
