//! Session registry: which identities are online and through which connections.
//!
//! An identity is present iff it owns at least one open connection. The
//! registry also caches each present identity's status text and current IP,
//! and keeps a longer-lived history of addresses seen per identity.

use std::collections::HashMap;

use serde::Serialize;

use super::bus::ConnId;

/// Addresses remembered per identity.
const IP_HISTORY_LIMIT: usize = 10;

#[derive(Debug)]
struct PresenceEntry {
    identity: String,
    connections: Vec<ConnId>,
}

/// Current address of an online identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIp {
    /// Identity.
    pub username: String,
    /// Address of its most recent connection.
    pub ip: String,
}

/// Every address an identity has connected from, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIpHistory {
    /// Identity.
    pub username: String,
    /// Distinct addresses.
    pub ips: Vec<String>,
}

/// Presence bookkeeping for the room.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    /// Registration order.
    entries: Vec<PresenceEntry>,
    statuses: HashMap<String, String>,
    ips: HashMap<String, String>,
    ip_history: Vec<UserIpHistory>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a connection to an identity.
    ///
    /// Idempotent. Returns `true` when this is the identity's first connection.
    pub fn add_connection(&mut self, identity: &str, conn: ConnId) -> bool {
        match self.entries.iter_mut().find(|e| e.identity == identity) {
            Some(entry) => {
                if !entry.connections.contains(&conn) {
                    entry.connections.push(conn);
                }
                false
            }
            None => {
                self.entries.push(PresenceEntry {
                    identity: identity.to_string(),
                    connections: vec![conn],
                });
                true
            }
        }
    }

    /// Detach a connection.
    ///
    /// Returns `true` when it was the identity's last connection; the identity
    /// is then removed along with its status and IP cache entries. Mutes are
    /// not touched.
    pub fn remove_connection(&mut self, identity: &str, conn: ConnId) -> bool {
        let Some(index) = self.entries.iter().position(|e| e.identity == identity) else {
            return false;
        };
        let entry = &mut self.entries[index];
        let before = entry.connections.len();
        entry.connections.retain(|&c| c != conn);
        if entry.connections.len() == before || !entry.connections.is_empty() {
            return false;
        }

        self.entries.remove(index);
        self.purge_caches(identity);
        true
    }

    /// Remove an identity outright, returning the connections it owned.
    pub fn remove_identity(&mut self, identity: &str) -> Vec<ConnId> {
        let Some(index) = self.entries.iter().position(|e| e.identity == identity) else {
            return Vec::new();
        };
        let entry = self.entries.remove(index);
        self.purge_caches(identity);
        entry.connections
    }

    fn purge_caches(&mut self, identity: &str) {
        self.statuses.remove(identity);
        self.ips.remove(identity);
    }

    /// Present identities in registration order.
    pub fn list_identities(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.identity.clone()).collect()
    }

    /// Number of present identities.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Whether the identity has at least one open connection.
    pub fn is_present(&self, identity: &str) -> bool {
        self.entries.iter().any(|e| e.identity == identity)
    }

    /// Connections owned by an identity.
    pub fn connections(&self, identity: &str) -> &[ConnId] {
        self.entries
            .iter()
            .find(|e| e.identity == identity)
            .map(|e| e.connections.as_slice())
            .unwrap_or(&[])
    }

    /// Cache the identity's status text; `None` clears it.
    pub fn set_status(&mut self, identity: &str, status: Option<String>) {
        match status {
            Some(status) => {
                self.statuses.insert(identity.to_string(), status);
            }
            None => {
                self.statuses.remove(identity);
            }
        }
    }

    /// Cached status text.
    pub fn status(&self, identity: &str) -> Option<&str> {
        self.statuses.get(identity).map(String::as_str)
    }

    /// Remember the address an identity connected from.
    pub fn record_ip(&mut self, identity: &str, ip: &str) {
        self.ips.insert(identity.to_string(), ip.to_string());

        let index = match self.ip_history.iter().position(|h| h.username == identity) {
            Some(index) => index,
            None => {
                self.ip_history.push(UserIpHistory {
                    username: identity.to_string(),
                    ips: Vec::new(),
                });
                self.ip_history.len() - 1
            }
        };
        let history = &mut self.ip_history[index];
        if !history.ips.iter().any(|known| known == ip) {
            history.ips.push(ip.to_string());
            if history.ips.len() > IP_HISTORY_LIMIT {
                history.ips.remove(0);
            }
        }
    }

    /// Current address of a present identity.
    pub fn ip_of(&self, identity: &str) -> Option<&str> {
        self.ips.get(identity).map(String::as_str)
    }

    /// Present identities currently connected from `ip`.
    pub fn identities_on_ip(&self, ip: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| self.ips.get(&e.identity).is_some_and(|known| known == ip))
            .map(|e| e.identity.clone())
            .collect()
    }

    /// Address list for admin monitoring, in registration order.
    pub fn ip_list(&self) -> Vec<UserIp> {
        self.entries
            .iter()
            .filter_map(|e| {
                self.ips.get(&e.identity).map(|ip| UserIp {
                    username: e.identity.clone(),
                    ip: ip.clone(),
                })
            })
            .collect()
    }

    /// Address history for admin monitoring.
    pub fn ip_history(&self) -> Vec<UserIpHistory> {
        self.ip_history.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_and_last_connection() {
        let mut registry = SessionRegistry::new();
        assert!(registry.add_connection("alice", 1));
        assert!(!registry.add_connection("alice", 2));
        assert!(!registry.add_connection("alice", 2));
        assert_eq!(registry.connections("alice"), &[1, 2]);

        assert!(!registry.remove_connection("alice", 1));
        assert!(registry.is_present("alice"));
        assert!(registry.remove_connection("alice", 2));
        assert!(!registry.is_present("alice"));
        assert!(!registry.remove_connection("alice", 2));
    }

    #[test]
    fn test_unknown_connection_is_not_last() {
        let mut registry = SessionRegistry::new();
        registry.add_connection("alice", 1);
        assert!(!registry.remove_connection("alice", 99));
        assert!(!registry.remove_connection("bob", 1));
        assert!(registry.is_present("alice"));
    }

    #[test]
    fn test_list_in_registration_order() {
        let mut registry = SessionRegistry::new();
        registry.add_connection("zed", 1);
        registry.add_connection("amy", 2);
        registry.add_connection("zed", 3);
        registry.add_connection("mia", 4);
        assert_eq!(registry.list_identities(), vec!["zed", "amy", "mia"]);
        assert_eq!(registry.count(), 3);

        registry.remove_connection("zed", 1);
        registry.remove_connection("zed", 3);
        registry.add_connection("zed", 5);
        assert_eq!(registry.list_identities(), vec!["amy", "mia", "zed"]);
    }

    #[test]
    fn test_last_disconnect_purges_caches() {
        let mut registry = SessionRegistry::new();
        registry.add_connection("alice", 1);
        registry.set_status("alice", Some("away".to_string()));
        registry.record_ip("alice", "10.0.0.1");

        registry.remove_connection("alice", 1);
        assert_eq!(registry.status("alice"), None);
        assert_eq!(registry.ip_of("alice"), None);
        assert_eq!(registry.ip_history()[0].ips, vec!["10.0.0.1"]);
    }

    #[test]
    fn test_remove_identity() {
        let mut registry = SessionRegistry::new();
        registry.add_connection("alice", 1);
        registry.add_connection("alice", 2);
        registry.record_ip("alice", "10.0.0.1");

        assert_eq!(registry.remove_identity("alice"), vec![1, 2]);
        assert!(!registry.is_present("alice"));
        assert_eq!(registry.ip_of("alice"), None);
        assert!(registry.remove_identity("alice").is_empty());
    }

    #[test]
    fn test_ip_tracking() {
        let mut registry = SessionRegistry::new();
        registry.add_connection("alice", 1);
        registry.add_connection("bob", 2);
        registry.record_ip("alice", "10.0.0.1");
        registry.record_ip("bob", "10.0.0.1");
        registry.record_ip("alice", "10.0.0.2");
        registry.record_ip("alice", "10.0.0.1");

        assert_eq!(registry.ip_of("alice"), Some("10.0.0.1"));
        assert_eq!(registry.identities_on_ip("10.0.0.1"), vec!["alice", "bob"]);
        assert_eq!(
            registry.ip_list(),
            vec![
                UserIp {
                    username: "alice".to_string(),
                    ip: "10.0.0.1".to_string()
                },
                UserIp {
                    username: "bob".to_string(),
                    ip: "10.0.0.1".to_string()
                },
            ]
        );
        assert_eq!(registry.ip_history()[0].ips, vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn test_ip_history_is_bounded() {
        let mut registry = SessionRegistry::new();
        for i in 0..15 {
            registry.record_ip("alice", &format!("10.0.0.{i}"));
        }
        let history = &registry.ip_history()[0].ips;
        assert_eq!(history.len(), IP_HISTORY_LIMIT);
        assert_eq!(history[0], "10.0.0.5");
    }
}
