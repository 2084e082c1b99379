//! Repository layer for data access

pub mod campaigns;
pub mod dispatches;
pub mod sender_accounts;

pub use campaigns::CampaignRepository;
pub use dispatches::{DispatchInsert, DispatchRepository};
pub use sender_accounts::SenderAccountRepository;
