//! Admin tiers.

use serde::Serialize;

use crate::config::ChatConfig;

/// Privilege tier of a connection, resolved once at login.
///
/// Ordered: `Regular < SessionAdmin < PrivilegedAdmin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AdminTier {
    /// Ordinary participant.
    #[default]
    Regular,
    /// Admin for this login only (account flag or override password).
    SessionAdmin,
    /// Statically configured admin, immune to other admins.
    PrivilegedAdmin,
}

impl AdminTier {
    /// Resolve the tier for a login.
    ///
    /// Membership in `privileged_admins` wins; otherwise the account flag or a
    /// matching override password grants `SessionAdmin`.
    pub fn resolve(
        config: &ChatConfig,
        username: &str,
        account_is_admin: bool,
        admin_password: Option<&str>,
    ) -> Self {
        if config.is_privileged(username) {
            return AdminTier::PrivilegedAdmin;
        }
        let override_ok = match (&config.admin_override_password, admin_password) {
            (Some(expected), Some(given)) => !expected.is_empty() && expected == given,
            _ => false,
        };
        if account_is_admin || override_ok {
            AdminTier::SessionAdmin
        } else {
            AdminTier::Regular
        }
    }

    /// SessionAdmin or higher.
    pub fn is_admin(self) -> bool {
        self >= AdminTier::SessionAdmin
    }

    /// PrivilegedAdmin.
    pub fn is_privileged(self) -> bool {
        self == AdminTier::PrivilegedAdmin
    }
}
