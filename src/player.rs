use serde::{Deserialize, Serialize};

use crate::resolver::PlayerGate;

/// Minimal player state consulted before hooks run. Hooks never fire while the player is
/// absent or destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStatus {
    pub present: bool,
    pub destroyed: bool,
}

impl PlayerStatus {
    pub fn alive() -> Self {
        Self { present: true, destroyed: false }
    }

    pub fn absent() -> Self {
        Self { present: false, destroyed: false }
    }

    pub fn destroyed() -> Self {
        Self { present: true, destroyed: true }
    }
}

impl Default for PlayerStatus {
    fn default() -> Self {
        Self::alive()
    }
}

impl PlayerGate for PlayerStatus {
    fn is_player_active(&self) -> bool {
        self.present && !self.destroyed
    }
}
