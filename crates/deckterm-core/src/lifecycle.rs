//! Session lifecycle state machine.
//!
//! Pure and deterministic; the facade asks it before every state change.
//!
//! ```text
//! Created -> Starting -> Running -> Detached   (multiplexed only)
//!                    \          \-> Terminated
//!                     \-> Terminated
//! Detached -> Starting (re-attach) | Terminated (kill)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;
use crate::types::BackendKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Created,
    Starting,
    Running,
    /// Not terminal: the external session lives on and can be re-attached.
    Detached,
    Terminated,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Detached => "detached",
            Self::Terminated => "terminated",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Terminated
    }

    /// Whether `self -> to` is allowed for `backend`.
    pub fn can_transition(self, to: Self, backend: BackendKind) -> bool {
        use LifecycleState::*;
        match (self, to) {
            (Created, Starting) => true,
            (Starting, Running) | (Starting, Terminated) => true,
            (Running, Terminated) => true,
            (Running, Detached) | (Detached, Starting) | (Detached, Terminated) => {
                backend == BackendKind::Multiplexed
            }
            _ => false,
        }
    }

    /// Validate and perform a transition.
    pub fn transition(self, to: Self, backend: BackendKind) -> Result<Self, CoreError> {
        if self.can_transition(to, backend) {
            Ok(to)
        } else {
            Err(CoreError::InvalidTransition {
                from: self,
                to,
                backend,
            })
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
