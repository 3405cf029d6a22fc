//! Moderation ledger: mutes, bans and the privilege rules that guard them.
//!
//! IP bans are persisted by the store; the ledger only decides whether an
//! actor may issue them and how a target string is interpreted.
//!
//! Mute expiry is lazy. [`ModerationLedger::check_mute`] deletes an expired
//! entry as a side effect, so it is not a read-only query.

use std::collections::{HashMap, HashSet};

use super::tier::AdminTier;
use crate::{ParlorError, Result};

/// What the ledger needs to know about a moderation target.
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    /// Identity name.
    pub name: &'a str,
    /// Highest tier among its open connections (or its static tier if offline).
    pub tier: AdminTier,
    /// Whether it currently has an open connection.
    pub present: bool,
}

/// Outcome of a mute check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteStatus {
    /// Free to speak.
    NotMuted,
    /// Muted; seconds left, rounded up.
    Muted {
        /// Seconds until expiry.
        remaining_secs: i64,
    },
}

impl MuteStatus {
    /// Whether the identity is muted.
    pub fn is_muted(&self) -> bool {
        matches!(self, MuteStatus::Muted { .. })
    }
}

/// A parsed `/ipban` target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpTarget {
    /// Literal address.
    Address(String),
    /// Identity to resolve through the registry's IP cache.
    Identity(String),
}

impl IpTarget {
    /// Classify a target string.
    ///
    /// Four dot-separated octets, or anything containing `:`, is an address.
    pub fn parse(target: &str) -> Self {
        if looks_like_ip(target) {
            IpTarget::Address(target.to_string())
        } else {
            IpTarget::Identity(target.to_string())
        }
    }
}

/// Whether a string is an IPv4 dotted quad or IPv6-style address.
pub fn looks_like_ip(s: &str) -> bool {
    if s.contains(':') {
        return true;
    }
    let parts: Vec<&str> = s.split('.').collect();
    parts.len() == 4
        && parts
            .iter()
            .all(|p| (1..=3).contains(&p.len()) && p.chars().all(|c| c.is_ascii_digit()))
}

/// Fail unless the actor is at least a SessionAdmin.
pub fn require_admin(actor: AdminTier) -> Result<()> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(ParlorError::Authorization(
            "this command requires admin privileges".to_string(),
        ))
    }
}

/// Fail unless the actor is a PrivilegedAdmin.
pub fn require_privileged(actor: AdminTier) -> Result<()> {
    if actor.is_privileged() {
        Ok(())
    } else {
        Err(ParlorError::Authorization(
            "this command requires privileged admin rights".to_string(),
        ))
    }
}

/// Fail if `actor` may not moderate `target`.
///
/// PrivilegedAdmins cannot be moderated at all; SessionAdmins only by a
/// PrivilegedAdmin.
pub fn check_can_moderate(actor: AdminTier, target: &Target<'_>) -> Result<()> {
    require_admin(actor)?;
    match target.tier {
        AdminTier::PrivilegedAdmin => Err(ParlorError::Authorization(format!(
            "{} is a privileged admin and cannot be moderated",
            target.name
        ))),
        AdminTier::SessionAdmin if !actor.is_privileged() => Err(ParlorError::Authorization(
            format!("{} is an admin; only privileged admins can do that", target.name),
        )),
        _ => Ok(()),
    }
}

/// In-memory mutes and bans.
#[derive(Debug, Default)]
pub struct ModerationLedger {
    /// Identity to expiry (Unix milliseconds).
    mutes: HashMap<String, i64>,
    bans: HashSet<String>,
}

impl ModerationLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mute `target` for `duration_secs` starting at `now_ms`.
    ///
    /// Overwrites any earlier mute. Returns the expiry.
    pub fn mute(
        &mut self,
        actor: AdminTier,
        target: &Target<'_>,
        duration_secs: i64,
        now_ms: i64,
    ) -> Result<i64> {
        require_admin(actor)?;
        if duration_secs <= 0 {
            return Err(ParlorError::Validation(
                "mute duration must be a positive number of seconds".to_string(),
            ));
        }
        if !target.present {
            return Err(ParlorError::Validation(format!(
                "{} is not online",
                target.name
            )));
        }
        check_can_moderate(actor, target)?;

        let until = now_ms.saturating_add(duration_secs.saturating_mul(1000));
        self.mutes.insert(target.name.to_string(), until);
        Ok(until)
    }

    /// Lift a mute. Fails with `NotFound` if the identity is not muted,
    /// including when its mute has already run out.
    pub fn unmute(&mut self, actor: AdminTier, name: &str, now_ms: i64) -> Result<()> {
        require_admin(actor)?;
        match self.mutes.remove(name) {
            Some(until) if now_ms < until => Ok(()),
            _ => Err(ParlorError::NotFound(format!("{name} is not muted"))),
        }
    }

    /// Check whether an identity is muted, deleting the entry if it expired.
    pub fn check_mute(&mut self, identity: &str, now_ms: i64) -> MuteStatus {
        let Some(&until) = self.mutes.get(identity) else {
            return MuteStatus::NotMuted;
        };
        if now_ms >= until {
            self.mutes.remove(identity);
            return MuteStatus::NotMuted;
        }
        let remaining_ms = until - now_ms;
        MuteStatus::Muted {
            remaining_secs: (remaining_ms + 999) / 1000,
        }
    }

    /// Whether a mute entry exists, expired or not.
    pub fn has_mute_entry(&self, identity: &str) -> bool {
        self.mutes.contains_key(identity)
    }

    /// Ban an identity. The caller is responsible for evicting its connections.
    pub fn ban(&mut self, actor: AdminTier, target: &Target<'_>) -> Result<()> {
        check_can_moderate(actor, target)?;
        self.bans.insert(target.name.to_string());
        Ok(())
    }

    /// Lift a ban. Same privilege rule as [`ModerationLedger::ban`]; fails
    /// with `NotFound` if the identity is not banned.
    pub fn unban(&mut self, actor: AdminTier, target: &Target<'_>) -> Result<()> {
        check_can_moderate(actor, target)?;
        if self.bans.remove(target.name) {
            Ok(())
        } else {
            Err(ParlorError::NotFound(format!("{} is not banned", target.name)))
        }
    }

    /// Whether an identity is banned.
    pub fn is_banned(&self, identity: &str) -> bool {
        self.bans.contains(identity)
    }
}
