//! Common types for reachmail

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for users
pub type UserId = Uuid;

/// Unique identifier for campaigns
pub type CampaignId = Uuid;

/// Unique identifier for dispatches
pub type DispatchId = Uuid;

/// Unique identifier for sender accounts
pub type SenderAccountId = Uuid;

/// Campaign lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Scheduled,
    InProgress,
    Completed,
    Paused,
    Cancelled,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::InProgress => "in_progress",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(CampaignStatus::Scheduled),
            "in_progress" => Ok(CampaignStatus::InProgress),
            "completed" => Ok(CampaignStatus::Completed),
            "paused" => Ok(CampaignStatus::Paused),
            "cancelled" => Ok(CampaignStatus::Cancelled),
            other => Err(crate::Error::Validation(format!(
                "Unknown campaign status: {}",
                other
            ))),
        }
    }
}

/// Dispatch lifecycle states
///
/// `RateLimited` is a loop state: a rate-limited dispatch goes back to
/// `Scheduled` with a new scheduled instant. `Sent` and `Failed` are
/// terminal for the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Pending,
    Scheduled,
    Sending,
    Sent,
    Failed,
    RateLimited,
}

impl DispatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchStatus::Pending => "pending",
            DispatchStatus::Scheduled => "scheduled",
            DispatchStatus::Sending => "sending",
            DispatchStatus::Sent => "sent",
            DispatchStatus::Failed => "failed",
            DispatchStatus::RateLimited => "rate_limited",
        }
    }

    /// Terminal for the current run: the worker never re-delivers these.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatchStatus::Sent | DispatchStatus::Failed)
    }
}

impl std::fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DispatchStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DispatchStatus::Pending),
            "scheduled" => Ok(DispatchStatus::Scheduled),
            "sending" => Ok(DispatchStatus::Sending),
            "sent" => Ok(DispatchStatus::Sent),
            "failed" => Ok(DispatchStatus::Failed),
            "rate_limited" => Ok(DispatchStatus::RateLimited),
            other => Err(crate::Error::Validation(format!(
                "Unknown dispatch status: {}",
                other
            ))),
        }
    }
}

/// Validate a recipient address: one `@`, a non-empty local part, and a
/// domain with an interior dot. Whitespace is rejected anywhere.
pub fn is_valid_recipient(s: &str) -> bool {
    if s.chars().any(char::is_whitespace) {
        return false;
    }
    let mut parts = s.splitn(2, '@');
    let (Some(local), Some(domain)) = (parts.next(), parts.next()) else {
        return false;
    };
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return false;
    }
    // The domain needs an interior dot: "a.b" yes, ".ab" / "ab." no.
    domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i < domain.len() - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_status_round_trip() {
        for status in [
            DispatchStatus::Pending,
            DispatchStatus::Scheduled,
            DispatchStatus::Sending,
            DispatchStatus::Sent,
            DispatchStatus::Failed,
            DispatchStatus::RateLimited,
        ] {
            assert_eq!(status.as_str().parse::<DispatchStatus>().unwrap(), status);
        }
    }

    #[test]
    fn terminal_states() {
        assert!(DispatchStatus::Sent.is_terminal());
        assert!(DispatchStatus::Failed.is_terminal());
        assert!(!DispatchStatus::RateLimited.is_terminal());
        assert!(!DispatchStatus::Sending.is_terminal());
    }

    #[test]
    fn recipient_validation() {
        assert!(is_valid_recipient("user@example.com"));
        assert!(is_valid_recipient("a.b+c@mail.example.co"));
        assert!(!is_valid_recipient("invalid"));
        assert!(!is_valid_recipient("@example.com"));
        assert!(!is_valid_recipient("user@"));
        assert!(!is_valid_recipient("user@example"));
        assert!(!is_valid_recipient("user@.com"));
        assert!(!is_valid_recipient("user@com."));
        assert!(!is_valid_recipient("user name@example.com"));
        assert!(!is_valid_recipient("user@exa mple.com"));
    }
}
