use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of one restoration run.
///
/// `idle -> planning -> restoring -> done`, with `error` reachable from
/// `planning` and `restoring`, and `idle` reachable from anywhere on reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    #[default]
    Idle,
    Planning,
    Restoring,
    Done,
    Error,
}

impl AppStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::Restoring => "restoring",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    /// A run is in flight; a new one must not start.
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Planning | Self::Restoring)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    pub fn can_transition_to(self, next: AppStatus) -> bool {
        match (self, next) {
            (_, Self::Idle) => true,
            (Self::Idle, Self::Planning) => true,
            (Self::Planning, Self::Restoring) => true,
            (Self::Restoring, Self::Done) => true,
            (Self::Planning | Self::Restoring, Self::Error) => true,
            _ => false,
        }
    }
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::AppStatus;

    #[test]
    fn lifecycle_edges() {
        use AppStatus::*;
        assert!(Idle.can_transition_to(Planning));
        assert!(Planning.can_transition_to(Restoring));
        assert!(Restoring.can_transition_to(Done));
        assert!(Planning.can_transition_to(Error));
        assert!(Restoring.can_transition_to(Error));
        assert!(Done.can_transition_to(Idle));
        assert!(Error.can_transition_to(Idle));

        assert!(!Idle.can_transition_to(Restoring));
        assert!(!Planning.can_transition_to(Done));
        assert!(!Done.can_transition_to(Planning));
        assert!(!Idle.can_transition_to(Error));
        assert!(!Done.can_transition_to(Error));
    }

    #[test]
    fn busy_and_terminal_flags() {
        assert!(AppStatus::Planning.is_busy());
        assert!(AppStatus::Restoring.is_busy());
        assert!(!AppStatus::Idle.is_busy());
        assert!(AppStatus::Done.is_terminal());
        assert!(AppStatus::Error.is_terminal());
        assert!(!AppStatus::Restoring.is_terminal());
    }

    #[test]
    fn serializes_lowercase() -> anyhow::Result<()> {
        assert_eq!(
            serde_json::to_value(AppStatus::Restoring)?,
            serde_json::json!("restoring")
        );
        let parsed: AppStatus = serde_json::from_str("\"done\"")?;
        assert_eq!(parsed, AppStatus::Done);
        assert_eq!(AppStatus::default().to_string(), "idle");
        Ok(())
    }
}
