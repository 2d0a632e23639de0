//! Replica roles and their transition rules.
//!
//! The allowed transitions are exactly:
//!
//! ```text
//! PRIMARY    -> VIEW_CHANGE
//! BACKUP     -> PRIMARY | VIEW_CHANGE
//! RECOVERING -> BACKUP | PRIMARY
//! VIEW_CHANGE-> PRIMARY | BACKUP
//! ```
//!
//! Everything else fails with `InvalidStateTransition`. A "transition"
//! to the current role is a no-op, not a violation.

use basalt_core::error::{Error, Result};

/// Replica role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Primary,
    Backup,
    Recovering,
    ViewChange,
}

impl Role {
    fn name(&self) -> &'static str {
        match self {
            Role::Primary => "PRIMARY",
            Role::Backup => "BACKUP",
            Role::Recovering => "RECOVERING",
            Role::ViewChange => "VIEW_CHANGE",
        }
    }

    /// Whether `self -> to` is in the allowed set.
    pub fn can_transition(&self, to: Role) -> bool {
        matches!(
            (self, to),
            (Role::Primary, Role::ViewChange)
                | (Role::Backup, Role::Primary)
                | (Role::Backup, Role::ViewChange)
                | (Role::Recovering, Role::Backup)
                | (Role::Recovering, Role::Primary)
                | (Role::ViewChange, Role::Primary)
                | (Role::ViewChange, Role::Backup)
        )
    }

    /// Validated transition; same-role is a no-op.
    pub fn transition(&mut self, to: Role) -> Result<()> {
        if *self == to {
            return Ok(());
        }
        if !self.can_transition(to) {
            return Err(Error::InvalidStateTransition {
                from: self.name().to_string(),
                to: to.name().to_string(),
            });
        }
        *self = to;
        Ok(())
    }
}
