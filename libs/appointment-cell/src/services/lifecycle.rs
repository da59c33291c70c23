// libs/appointment-cell/src/services/lifecycle.rs
use tracing::{debug, warn};

use shared_models::status::AppointmentStatus;

use crate::models::AppointmentError;

/// Guards the appointment state machine. Terminal states are enforced here,
/// explicitly, rather than relying on any storage constraint.
pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    pub fn validate_status_transition(
        &self,
        current: AppointmentStatus,
        next: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        debug!("Validating status transition {} -> {}", current, next);

        if current.is_terminal() {
            warn!("Transition attempted out of terminal status {}", current);
            return Err(AppointmentError::TerminalState(current));
        }

        if !self.valid_transitions(current).contains(&next) {
            warn!("Invalid status transition attempted: {} -> {}", current, next);
            return Err(AppointmentError::InvalidTransition { from: current, to: next });
        }

        Ok(())
    }

    pub fn valid_transitions(&self, current: AppointmentStatus) -> Vec<AppointmentStatus> {
        match current {
            AppointmentStatus::Scheduled => {
                vec![AppointmentStatus::Completed, AppointmentStatus::Canceled]
            }
            // Terminal states - no transitions allowed
            AppointmentStatus::Completed | AppointmentStatus::Canceled => vec![],
        }
    }
}

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}
