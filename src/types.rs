use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of account interacting with the referral system.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    /// An individual player.
    Player,
    /// A football club.
    Club,
    /// A training academy.
    Academy,
    /// An individual trainer.
    Trainer,
    /// A player agent.
    Agent,
}

impl AccountType {
    /// The three-letter prefix stamped onto organization referral codes.
    pub fn code_prefix(self) -> &'static str {
        match self {
            AccountType::Club => "CLB",
            AccountType::Academy => "ACD",
            AccountType::Trainer => "TRN",
            AccountType::Agent => "AGT",
            AccountType::Player => "ORG",
        }
    }
}

/// A personal referral code owned by a single account.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Referral {
    /// The ID of the referral.
    pub id: Uuid,
    /// The ID of the account that owns the code.
    pub owner_id: String,
    /// The referral code.
    pub code: String,
    /// The timestamp when the referral was created.
    pub created_at: DateTime<Utc>,
}

/// A shareable referral code issued by an organization.
///
/// Organizations may hold several active codes at once; each carries its own
/// usage counter and optional cap.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrganizationReferral {
    /// The ID of the referral.
    pub id: Uuid,
    /// The ID of the issuing organization.
    pub organization_id: String,
    /// The account type of the issuing organization.
    pub organization_type: AccountType,
    /// The display name of the issuing organization.
    pub organization_name: String,
    /// The referral code.
    pub referral_code: String,
    /// The shareable invite link wrapping the code.
    pub invite_link: String,
    /// Whether the code currently accepts redemptions.
    pub is_active: bool,
    /// The number of successful redemptions recorded so far.
    pub current_usage: u32,
    /// The redemption cap; `None` means unlimited.
    pub max_usage: Option<u32>,
    /// An optional description shown to invitees.
    pub description: Option<String>,
    /// The expiry timestamp; `None` means the code never expires.
    pub expires_at: Option<DateTime<Utc>>,
    /// The timestamp when the referral was created.
    pub created_at: DateTime<Utc>,
}

/// The authoritative point and earnings record for a player.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayerRewards {
    /// The ID of the player.
    pub player_id: String,
    /// All points ever earned.
    pub total_points: i64,
    /// Points still available for spending.
    pub available_points: i64,
    /// Lifetime earnings in US dollars.
    pub total_earnings_usd: f64,
    /// The number of completed referrals credited to this player as referrer.
    pub referral_count: u32,
    /// IDs of earned badges. Grows monotonically, badges are never removed.
    pub badges: Vec<String>,
    /// The timestamp of the last mutation.
    pub last_updated: DateTime<Utc>,
}

impl PlayerRewards {
    /// A zeroed ledger row for a player seen for the first time.
    pub fn zeroed(player_id: &str) -> Self {
        Self {
            player_id: player_id.to_string(),
            total_points: 0,
            available_points: 0,
            total_earnings_usd: 0.0,
            referral_count: 0,
            badges: Vec::new(),
            last_updated: Utc::now(),
        }
    }
}

/// The status of a join request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinRequestStatus {
    /// Awaiting a decision from the organization.
    Pending,
    /// Accepted; the player is linked to the organization.
    Approved,
    /// Declined by the organization.
    Rejected,
}

/// A player's request to join an organization through its referral link.
///
/// Created in `Pending` and decided exactly once; terminal states are
/// immutable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JoinRequest {
    /// The ID of the request.
    pub id: Uuid,
    /// The ID of the organization being applied to.
    pub organization_id: String,
    /// The account type of the organization.
    pub organization_type: AccountType,
    /// The display name of the organization at request time.
    pub organization_name: String,
    /// The ID of the applying player.
    pub player_id: String,
    /// The display name of the applying player.
    pub player_name: String,
    /// The player's contact email, if provided.
    pub player_email: Option<String>,
    /// The player's contact phone, if provided.
    pub player_phone: Option<String>,
    /// Free-form profile data (position, age, nationality, ...).
    pub player_data: serde_json::Value,
    /// The referral code that was redeemed to create this request.
    pub referral_code: String,
    /// The current lifecycle status.
    pub status: JoinRequestStatus,
    /// The timestamp when the request was submitted.
    pub requested_at: DateTime<Utc>,
    /// The timestamp of the decision, if one was made.
    pub decided_at: Option<DateTime<Utc>>,
    /// The ID of the account that made the decision.
    pub decided_by: Option<String>,
    /// The reason given on rejection.
    pub rejection_reason: Option<String>,
}

/// The organization reference written onto a player record on approval.
///
/// A weak reference by ID only; the organization is looked up on demand.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayerLink {
    /// The ID of the linked player.
    pub player_id: String,
    /// The ID of the organization the player joined.
    pub organization_id: String,
    /// The account type of the organization.
    pub organization_type: AccountType,
    /// The display name of the organization.
    pub organization_name: String,
    /// The join request that produced this link.
    pub join_request_id: Uuid,
    /// The timestamp of the approval.
    pub joined_at: DateTime<Utc>,
}

/// Profile details supplied by a caller redeeming a code.
#[derive(Clone, Debug, Deserialize)]
pub struct PlayerProfile {
    /// The ID of the redeeming account.
    pub player_id: String,
    /// The account type reported by the identity provider.
    pub account_type: AccountType,
    /// The display name of the player.
    pub name: String,
    /// The contact email, if known.
    pub email: Option<String>,
    /// The contact phone, if known.
    pub phone: Option<String>,
    /// Free-form profile data forwarded to the organization.
    #[serde(default)]
    pub extra: serde_json::Value,
}
