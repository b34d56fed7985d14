//! Referral code ownership, activation, and atomic redemption counting.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codes;
use crate::error::Error;
use crate::store::{KeyedStore, RecordKind, StoreError, WriteOp, encode};
use crate::types::{AccountType, OrganizationReferral, Referral};

/// Bound on optimistic retries after a version conflict. Hitting it surfaces
/// the conflict as a storage error; the caller re-checks state.
const CAS_RETRY_LIMIT: u32 = 16;

/// What a code resolves to in the shared namespace.
///
/// Personal and organization codes live in one index, so a collision between
/// the two is impossible by construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum CodeOwner {
    Personal { owner_id: String },
    Organization { record_key: String },
}

/// A resolved referral code.
#[derive(Clone, Debug)]
pub enum CodeLookup {
    Personal(Referral),
    Organization(OrganizationReferral),
}

/// Optional settings for a new organization referral.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct OrgReferralOptions {
    pub description: Option<String>,
    pub max_usage: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A partial update; absent fields are left untouched.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct OrgReferralUpdate {
    pub code: Option<String>,
    pub is_active: Option<bool>,
    pub max_usage: Option<u32>,
    pub description: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Owns referral entities and enforces code uniqueness and usage caps.
#[derive(Clone)]
pub struct ReferralRegistry {
    store: Arc<dyn KeyedStore>,
    base_url: String,
    code_retry_limit: u32,
}

impl ReferralRegistry {
    pub fn new(store: Arc<dyn KeyedStore>, base_url: impl Into<String>, code_retry_limit: u32) -> Self {
        Self {
            store,
            base_url: base_url.into(),
            code_retry_limit,
        }
    }

    /// Returns the owner's personal referral, creating it on first call.
    ///
    /// Idempotent per owner. A fresh code is drawn per attempt; when every
    /// attempt collides the distinct `CodeGenerationExhausted` error flags
    /// that the code namespace needs attention.
    pub async fn create_personal(&self, owner_id: &str) -> Result<Referral, Error> {
        if let Some(rec) = self.store.get(RecordKind::Referral, owner_id).await? {
            return Ok(rec.decode()?);
        }

        for _ in 0..self.code_retry_limit {
            let code = codes::generate_personal();
            let referral = Referral {
                id: Uuid::new_v4(),
                owner_id: owner_id.to_string(),
                code: code.clone(),
                created_at: Utc::now(),
            };
            let batch = vec![
                WriteOp::Insert {
                    kind: RecordKind::Referral,
                    key: owner_id.to_string(),
                    value: encode(&referral)?,
                },
                WriteOp::Insert {
                    kind: RecordKind::CodeIndex,
                    key: code,
                    value: encode(&CodeOwner::Personal {
                        owner_id: owner_id.to_string(),
                    })?,
                },
            ];
            match self.store.apply(batch).await {
                Ok(()) => return Ok(referral),
                Err(StoreError::AlreadyExists) => {
                    // Either a concurrent call won the owner slot or the code
                    // collided; re-reading distinguishes the two.
                    if let Some(rec) = self.store.get(RecordKind::Referral, owner_id).await? {
                        return Ok(rec.decode()?);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::CodeGenerationExhausted)
    }

    /// Mints a new, independent referral code for an organization.
    pub async fn create_organization(
        &self,
        organization_id: &str,
        organization_type: AccountType,
        organization_name: &str,
        opts: OrgReferralOptions,
    ) -> Result<OrganizationReferral, Error> {
        if organization_type == AccountType::Player {
            return Err(Error::InvalidAccountType);
        }
        for _ in 0..self.code_retry_limit {
            let id = Uuid::new_v4();
            let code = codes::generate_for_org(organization_type);
            let record_key = format!("{organization_id}/{id}");
            let referral = OrganizationReferral {
                id,
                organization_id: organization_id.to_string(),
                organization_type,
                organization_name: organization_name.to_string(),
                referral_code: code.clone(),
                invite_link: codes::invite_link(&self.base_url, &code),
                is_active: true,
                current_usage: 0,
                max_usage: opts.max_usage,
                description: opts.description.clone(),
                expires_at: opts.expires_at,
                created_at: Utc::now(),
            };
            let batch = vec![
                WriteOp::Insert {
                    kind: RecordKind::OrgReferral,
                    key: record_key.clone(),
                    value: encode(&referral)?,
                },
                WriteOp::Insert {
                    kind: RecordKind::CodeIndex,
                    key: code,
                    value: encode(&CodeOwner::Organization { record_key })?,
                },
            ];
            match self.store.apply(batch).await {
                Ok(()) => return Ok(referral),
                // The ID is fresh, so only the code can have collided.
                Err(StoreError::AlreadyExists) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::CodeGenerationExhausted)
    }

    /// Applies a partial update to an organization referral.
    ///
    /// A code change re-validates global uniqueness; lowering `max_usage`
    /// below `current_usage` is rejected with `InvalidUsageCap` and leaves
    /// the referral untouched.
    pub async fn update_organization(
        &self,
        organization_id: &str,
        referral_id: Uuid,
        update: OrgReferralUpdate,
    ) -> Result<OrganizationReferral, Error> {
        let record_key = format!("{organization_id}/{referral_id}");

        for _ in 0..CAS_RETRY_LIMIT {
            let rec = self
                .store
                .get(RecordKind::OrgReferral, &record_key)
                .await?
                .ok_or(Error::NotFound("organization referral"))?;
            let mut referral: OrganizationReferral = rec.decode()?;

            if let Some(cap) = update.max_usage {
                if cap < referral.current_usage {
                    return Err(Error::InvalidUsageCap);
                }
            }

            let mut batch = Vec::new();
            if let Some(new_code) = &update.code {
                let new_code = codes::normalize(new_code);
                if !codes::is_valid(&new_code) {
                    return Err(Error::InvalidCode);
                }
                if new_code != referral.referral_code {
                    batch.push(WriteOp::Delete {
                        kind: RecordKind::CodeIndex,
                        key: referral.referral_code.clone(),
                    });
                    batch.push(WriteOp::Insert {
                        kind: RecordKind::CodeIndex,
                        key: new_code.clone(),
                        value: encode(&CodeOwner::Organization {
                            record_key: record_key.clone(),
                        })?,
                    });
                    referral.invite_link = codes::invite_link(&self.base_url, &new_code);
                    referral.referral_code = new_code;
                }
            }
            if let Some(active) = update.is_active {
                referral.is_active = active;
            }
            if let Some(cap) = update.max_usage {
                referral.max_usage = Some(cap);
            }
            if let Some(description) = &update.description {
                referral.description = Some(description.clone());
            }
            if let Some(expires_at) = update.expires_at {
                referral.expires_at = Some(expires_at);
            }

            batch.push(WriteOp::Update {
                kind: RecordKind::OrgReferral,
                key: record_key.clone(),
                expected_version: rec.version,
                value: encode(&referral)?,
            });

            match self.store.apply(batch).await {
                Ok(()) => return Ok(referral),
                Err(StoreError::AlreadyExists) => return Err(Error::CodeTaken),
                Err(StoreError::VersionConflict) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::VersionConflict.into())
    }

    /// Resolves a code to the referral it names.
    pub async fn find_by_code(&self, code: &str) -> Result<CodeLookup, Error> {
        let code = codes::normalize(code);
        if !codes::is_valid(&code) {
            return Err(Error::InvalidCode);
        }
        let idx = self
            .store
            .get(RecordKind::CodeIndex, &code)
            .await?
            .ok_or(Error::NotFound("referral code"))?;
        match idx.decode::<CodeOwner>()? {
            CodeOwner::Personal { owner_id } => {
                let rec = self
                    .store
                    .get(RecordKind::Referral, &owner_id)
                    .await?
                    .ok_or(Error::NotFound("referral"))?;
                Ok(CodeLookup::Personal(rec.decode()?))
            }
            CodeOwner::Organization { record_key } => {
                let rec = self
                    .store
                    .get(RecordKind::OrgReferral, &record_key)
                    .await?
                    .ok_or(Error::NotFound("organization referral"))?;
                Ok(CodeLookup::Organization(rec.decode()?))
            }
        }
    }

    /// Validates a redemption and builds the guarded usage increment without
    /// applying it, so callers can commit it alongside their own writes.
    ///
    /// Returns the post-increment snapshot the write will produce. Failures
    /// (`ReferralInactive`, `ReferralExpired`, `UsageLimitExceeded`) build no
    /// write at all; `max_usage` of zero always rejects.
    pub(crate) async fn prepare_redeem(
        &self,
        code: &str,
    ) -> Result<(WriteOp, OrganizationReferral), Error> {
        let code = codes::normalize(code);
        let idx = self
            .store
            .get(RecordKind::CodeIndex, &code)
            .await?
            .ok_or(Error::NotFound("referral code"))?;
        let record_key = match idx.decode::<CodeOwner>()? {
            CodeOwner::Organization { record_key } => record_key,
            CodeOwner::Personal { .. } => return Err(Error::NotFound("organization referral")),
        };
        let rec = self
            .store
            .get(RecordKind::OrgReferral, &record_key)
            .await?
            .ok_or(Error::NotFound("organization referral"))?;
        let mut referral: OrganizationReferral = rec.decode()?;

        if !referral.is_active {
            return Err(Error::ReferralInactive);
        }
        if let Some(expires_at) = referral.expires_at {
            if expires_at <= Utc::now() {
                return Err(Error::ReferralExpired);
            }
        }
        if let Some(max) = referral.max_usage {
            if referral.current_usage >= max {
                return Err(Error::UsageLimitExceeded);
            }
        }

        referral.current_usage += 1;
        let op = WriteOp::Update {
            kind: RecordKind::OrgReferral,
            key: record_key,
            expected_version: rec.version,
            value: encode(&referral)?,
        };
        Ok((op, referral))
    }

    /// Atomically records one redemption of an organization code.
    ///
    /// The validation and the counter increment commit as a single
    /// compare-and-swap, so two concurrent redemptions cannot both take the
    /// last slot under a cap.
    pub async fn redeem(&self, code: &str) -> Result<OrganizationReferral, Error> {
        for _ in 0..CAS_RETRY_LIMIT {
            let (op, snapshot) = self.prepare_redeem(code).await?;
            match self.store.apply(vec![op]).await {
                Ok(()) => return Ok(snapshot),
                Err(StoreError::VersionConflict) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::VersionConflict.into())
    }

    /// All referral codes an organization has issued, newest first.
    pub async fn list_for_organization(
        &self,
        organization_id: &str,
    ) -> Result<Vec<OrganizationReferral>, Error> {
        let recs = self
            .store
            .list(RecordKind::OrgReferral, &format!("{organization_id}/"))
            .await?;
        let mut referrals = Vec::with_capacity(recs.len());
        for rec in recs {
            referrals.push(rec.decode::<OrganizationReferral>()?);
        }
        referrals.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(referrals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::Duration;

    fn registry() -> ReferralRegistry {
        ReferralRegistry::new(Arc::new(MemoryStore::new()), "https://example.com", 5)
    }

    #[tokio::test]
    async fn personal_creation_is_idempotent_per_owner() {
        let registry = registry();
        let first = registry.create_personal("player-1").await.unwrap();
        let second = registry.create_personal("player-1").await.unwrap();
        assert_eq!(first.code, second.code);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn personal_and_org_codes_share_one_namespace() {
        let registry = registry();
        let personal = registry.create_personal("player-1").await.unwrap();
        match registry.find_by_code(&personal.code).await.unwrap() {
            CodeLookup::Personal(r) => assert_eq!(r.owner_id, "player-1"),
            CodeLookup::Organization(_) => panic!("expected a personal referral"),
        }

        let org = registry
            .create_organization("org-1", AccountType::Club, "FC Test", Default::default())
            .await
            .unwrap();
        assert!(org.referral_code.starts_with("CLB"));
        match registry.find_by_code(&org.referral_code).await.unwrap() {
            CodeLookup::Organization(r) => assert_eq!(r.organization_id, "org-1"),
            CodeLookup::Personal(_) => panic!("expected an organization referral"),
        }
    }

    #[tokio::test]
    async fn player_accounts_cannot_issue_organization_codes() {
        let registry = registry();
        assert!(matches!(
            registry
                .create_organization("p1", AccountType::Player, "Not an org", Default::default())
                .await,
            Err(Error::InvalidAccountType)
        ));
    }

    #[tokio::test]
    async fn organizations_can_hold_several_codes() {
        let registry = registry();
        for _ in 0..3 {
            registry
                .create_organization("org-1", AccountType::Academy, "Academy", Default::default())
                .await
                .unwrap();
        }
        let listed = registry.list_for_organization("org-1").await.unwrap();
        assert_eq!(listed.len(), 3);
        assert!(listed.iter().all(|r| r.is_active && r.current_usage == 0));
    }

    #[tokio::test]
    async fn redeem_increments_usage() {
        let registry = registry();
        let org = registry
            .create_organization("org-1", AccountType::Club, "FC", Default::default())
            .await
            .unwrap();
        let snapshot = registry.redeem(&org.referral_code).await.unwrap();
        assert_eq!(snapshot.current_usage, 1);
    }

    #[tokio::test]
    async fn redeem_rejects_inactive_expired_and_capped() {
        let registry = registry();

        let inactive = registry
            .create_organization("org-1", AccountType::Club, "FC", Default::default())
            .await
            .unwrap();
        registry
            .update_organization(
                "org-1",
                inactive.id,
                OrgReferralUpdate {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(matches!(
            registry.redeem(&inactive.referral_code).await,
            Err(Error::ReferralInactive)
        ));

        let expired = registry
            .create_organization(
                "org-1",
                AccountType::Club,
                "FC",
                OrgReferralOptions {
                    expires_at: Some(Utc::now() - Duration::hours(1)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(matches!(
            registry.redeem(&expired.referral_code).await,
            Err(Error::ReferralExpired)
        ));

        // A zero cap is a valid "disabled" state.
        let disabled = registry
            .create_organization(
                "org-1",
                AccountType::Club,
                "FC",
                OrgReferralOptions {
                    max_usage: Some(0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(matches!(
            registry.redeem(&disabled.referral_code).await,
            Err(Error::UsageLimitExceeded)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_redemptions_never_exceed_the_cap() {
        let registry = ReferralRegistry::new(Arc::new(MemoryStore::new()), "https://example.com", 5);
        let org = registry
            .create_organization(
                "org-1",
                AccountType::Club,
                "FC",
                OrgReferralOptions {
                    max_usage: Some(3),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let code = org.referral_code.clone();
            handles.push(tokio::spawn(async move { registry.redeem(&code).await }));
        }

        let mut successes = 0;
        let mut capped = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(Error::UsageLimitExceeded) => capped += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(successes, 3);
        assert_eq!(capped, 5);

        match registry.find_by_code(&org.referral_code).await.unwrap() {
            CodeLookup::Organization(r) => assert_eq!(r.current_usage, 3),
            CodeLookup::Personal(_) => unreachable!(),
        }
    }

    #[tokio::test]
    async fn cap_below_current_usage_is_rejected_unchanged() {
        let registry = registry();
        let org = registry
            .create_organization("org-1", AccountType::Club, "FC", Default::default())
            .await
            .unwrap();
        for _ in 0..3 {
            registry.redeem(&org.referral_code).await.unwrap();
        }

        let err = registry
            .update_organization(
                "org-1",
                org.id,
                OrgReferralUpdate {
                    max_usage: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidUsageCap));

        match registry.find_by_code(&org.referral_code).await.unwrap() {
            CodeLookup::Organization(r) => {
                assert_eq!(r.max_usage, None);
                assert_eq!(r.current_usage, 3);
            }
            CodeLookup::Personal(_) => unreachable!(),
        }
    }

    #[tokio::test]
    async fn code_change_revalidates_uniqueness() {
        let registry = registry();
        let first = registry
            .create_organization("org-1", AccountType::Club, "FC", Default::default())
            .await
            .unwrap();
        let second = registry
            .create_organization("org-1", AccountType::Club, "FC", Default::default())
            .await
            .unwrap();

        let err = registry
            .update_organization(
                "org-1",
                second.id,
                OrgReferralUpdate {
                    code: Some(first.referral_code.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CodeTaken));

        // A fresh code frees the old one and resolves to the same referral.
        let updated = registry
            .update_organization(
                "org-1",
                second.id,
                OrgReferralUpdate {
                    code: Some("CLBFRESH2".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.referral_code, "CLBFRESH2");
        assert!(matches!(
            registry.find_by_code(&second.referral_code).await,
            Err(Error::NotFound(_))
        ));
        match registry.find_by_code("CLBFRESH2").await.unwrap() {
            CodeLookup::Organization(r) => assert_eq!(r.id, second.id),
            CodeLookup::Personal(_) => unreachable!(),
        }
    }

    struct CollidingStore;

    #[async_trait]
    impl KeyedStore for CollidingStore {
        async fn get(
            &self,
            _kind: RecordKind,
            _key: &str,
        ) -> Result<Option<crate::store::VersionedRecord>, StoreError> {
            Ok(None)
        }
        async fn list(
            &self,
            _kind: RecordKind,
            _key_prefix: &str,
        ) -> Result<Vec<crate::store::VersionedRecord>, StoreError> {
            Ok(Vec::new())
        }
        async fn apply(&self, _batch: Vec<WriteOp>) -> Result<(), StoreError> {
            Err(StoreError::AlreadyExists)
        }
    }

    #[tokio::test]
    async fn endless_collisions_exhaust_generation() {
        let registry = ReferralRegistry::new(Arc::new(CollidingStore), "https://example.com", 3);
        assert!(matches!(
            registry.create_personal("player-1").await,
            Err(Error::CodeGenerationExhausted)
        ));
        assert!(matches!(
            registry
                .create_organization("org-1", AccountType::Club, "FC", Default::default())
                .await,
            Err(Error::CodeGenerationExhausted)
        ));
    }
}
