use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle status shared by both catalog item kinds.
///
/// Social profiles move through the whole ladder; reputation cases only use
/// the payment-related rungs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Materialized at checkout, payment not yet confirmed
    #[sea_orm(string_value = "awaiting_paid_confirmation")]
    AwaitingPaidConfirmation,
    /// Payment confirmed, provisioning requested
    #[sea_orm(string_value = "paid_requested")]
    PaidRequested,
    #[sea_orm(string_value = "in_progress")]
    InProgress,
    #[sea_orm(string_value = "created")]
    Created,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl ItemStatus {
    /// Terminal states count toward order readiness and progress.
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Created | ItemStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_created_and_failed_are_terminal() {
        assert!(ItemStatus::Created.is_terminal());
        assert!(ItemStatus::Failed.is_terminal());
        assert!(!ItemStatus::AwaitingPaidConfirmation.is_terminal());
        assert!(!ItemStatus::PaidRequested.is_terminal());
        assert!(!ItemStatus::InProgress.is_terminal());
    }
}
