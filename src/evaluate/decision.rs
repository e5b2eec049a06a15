//! Send / clear / no-op decision for one (notification, trigger, series)

use serde::Serialize;

use crate::notify::DeliveryMode;

/// What to do with a notification after evaluating one trigger on one series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Decision {
    /// Newly fired: mark active, start cooldown, send
    Activate,
    /// Still firing and cooldown elapsed: restart cooldown, send
    Resend,
    /// Still firing within cooldown
    OnCooldown,
    /// No longer firing while active: mark inactive, end cooldown, send clear
    Clear,
    /// Not firing and not active
    Idle,
    /// Stateless delivery: send without touching state
    SendStateless,
    /// Stateless delivery: clear without touching state
    ClearStateless,
}

impl Decision {
    pub fn sends(&self) -> bool {
        matches!(
            self,
            Decision::Activate | Decision::Resend | Decision::SendStateless
        )
    }

    pub fn clears(&self) -> bool {
        matches!(self, Decision::Clear | Decision::ClearStateless)
    }
}

/// Walk the cooldown/active-status table
pub fn decide(mode: DeliveryMode, fired: bool, active: bool, on_cooldown: bool) -> Decision {
    match mode {
        DeliveryMode::EveryEvaluation => {
            if fired {
                Decision::SendStateless
            } else {
                Decision::ClearStateless
            }
        }
        DeliveryMode::Cooldown | DeliveryMode::LatestValue => match (fired, active, on_cooldown) {
            (true, false, _) => Decision::Activate,
            (true, true, false) => Decision::Resend,
            (true, true, true) => Decision::OnCooldown,
            (false, true, _) => Decision::Clear,
            (false, false, _) => Decision::Idle,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_table() {
        let m = DeliveryMode::Cooldown;
        assert_eq!(decide(m, true, false, false), Decision::Activate);
        assert_eq!(decide(m, true, false, true), Decision::Activate);
        assert_eq!(decide(m, true, true, false), Decision::Resend);
        assert_eq!(decide(m, true, true, true), Decision::OnCooldown);
        assert_eq!(decide(m, false, true, true), Decision::Clear);
        assert_eq!(decide(m, false, true, false), Decision::Clear);
        assert_eq!(decide(m, false, false, true), Decision::Idle);
        assert_eq!(decide(m, false, false, false), Decision::Idle);
    }

    #[test]
    fn test_every_evaluation_ignores_state() {
        let m = DeliveryMode::EveryEvaluation;
        for (active, cooldown) in [(false, false), (true, true), (true, false)] {
            assert_eq!(decide(m, true, active, cooldown), Decision::SendStateless);
            assert_eq!(decide(m, false, active, cooldown), Decision::ClearStateless);
        }
    }

    #[test]
    fn test_send_and_clear_flags() {
        assert!(Decision::Activate.sends());
        assert!(Decision::Resend.sends());
        assert!(!Decision::OnCooldown.sends());
        assert!(Decision::Clear.clears());
        assert!(!Decision::Idle.clears());
    }
}
