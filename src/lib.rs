//! The referral-and-rewards ledger for the recruitment platform.
//!
//! Accounts mint shareable referral codes; signups and join requests redeem
//! them; redemptions become points, points become monetary value, and point
//! milestones become badges. Usage caps are never exceeded and no redemption
//! is credited twice, even under concurrent attempts.

mod api;
pub mod badges;
pub mod codes;
mod config;
pub mod currency;
pub mod error;
mod facade;
pub mod ledger;
pub mod notify;
pub mod registry;
mod responses;
pub mod store;
pub mod types;
pub mod workflow;

pub use api::{AppState, init_router};
pub use config::{Config, RewardsPolicy};
pub use error::Error;
pub use facade::{PlayerStats, RedemptionOutcome, ReferralFacade, ShareLink};
