//! Default point values per action type.

use serde::{Deserialize, Serialize};

use super::ActionType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsCatalog {
    pub page_visit: i64,
    pub element_click: i64,
    pub onboarding_step: i64,
    pub email_verified: i64,
    pub phone_verified: i64,
    pub vote_cast: i64,
    pub thought_submitted: i64,
    /// Fallback when a clerk award names no amount.
    pub clerk_award: i64,
}

impl Default for PointsCatalog {
    fn default() -> Self {
        Self {
            page_visit: 1,
            element_click: 1,
            onboarding_step: 5,
            email_verified: 10,
            phone_verified: 10,
            vote_cast: 2,
            thought_submitted: 5,
            clerk_award: 1,
        }
    }
}

impl PointsCatalog {
    pub fn points_for(&self, action: ActionType) -> i64 {
        match action {
            ActionType::PageVisit => self.page_visit,
            ActionType::ElementClick => self.element_click,
            ActionType::OnboardingStep => self.onboarding_step,
            ActionType::EmailVerified => self.email_verified,
            ActionType::PhoneVerified => self.phone_verified,
            ActionType::VoteCast => self.vote_cast,
            ActionType::ThoughtSubmitted => self.thought_submitted,
            ActionType::ClerkAward => self.clerk_award,
        }
    }

    pub fn points_mut(&mut self, action: ActionType) -> &mut i64 {
        match action {
            ActionType::PageVisit => &mut self.page_visit,
            ActionType::ElementClick => &mut self.element_click,
            ActionType::OnboardingStep => &mut self.onboarding_step,
            ActionType::EmailVerified => &mut self.email_verified,
            ActionType::PhoneVerified => &mut self.phone_verified,
            ActionType::VoteCast => &mut self.vote_cast,
            ActionType::ThoughtSubmitted => &mut self.thought_submitted,
            ActionType::ClerkAward => &mut self.clerk_award,
        }
    }

    /// Every value must be non-negative.
    pub fn validate(&self) -> Result<(), String> {
        match ActionType::ALL.into_iter().find(|a| self.points_for(*a) < 0) {
            Some(action) => Err(format!("points for {} must be non-negative", action)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let catalog = PointsCatalog::default();
        assert!(catalog.validate().is_ok());
        assert_eq!(catalog.points_for(ActionType::PageVisit), 1);
    }

    #[test]
    fn test_negative_is_rejected() {
        let catalog = PointsCatalog { vote_cast: -1, ..PointsCatalog::default() };
        assert!(catalog.validate().unwrap_err().contains("vote_cast"));
    }
}
