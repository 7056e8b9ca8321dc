//! Online-peer list and own-address display.
//!
//! Pure projection of what the server reports; nothing here is sent back.

use chat_common::types::is_loopback;
use chat_common::{AddressInfo, PeerAddress};

/// Latest presence snapshot plus our own address.
#[derive(Debug, Default)]
pub struct PresenceView {
    snapshot: Vec<PeerAddress>,
    own: Option<AddressInfo>,
}

impl PresenceView {
    /// Creates an empty view.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the snapshot wholesale.
    pub fn replace_snapshot(&mut self, users: Vec<PeerAddress>) {
        self.snapshot = users;
    }

    /// The raw snapshot, including self and loopback entries.
    #[must_use]
    pub fn snapshot(&self) -> &[PeerAddress] {
        &self.snapshot
    }

    /// Records our own address.
    pub fn set_own(&mut self, info: AddressInfo) {
        self.own = Some(info);
    }

    /// Our own address, once known.
    #[must_use]
    pub fn own(&self) -> Option<&AddressInfo> {
        self.own.as_ref()
    }

    /// Peers to show: the snapshot minus our own address and loopback.
    #[must_use]
    pub fn display_list(&self) -> Vec<String> {
        visible_peers(&self.snapshot, self.own.as_ref().map(|o| o.ip.as_str()))
    }
}

/// Filters `snapshot` for display, preserving server order.
#[must_use]
pub fn visible_peers(snapshot: &[PeerAddress], own_ip: Option<&str>) -> Vec<String> {
    snapshot
        .iter()
        .filter(|p| Some(p.ip.as_str()) != own_ip && !is_loopback(&p.ip))
        .map(|p| p.ip.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peers(ips: &[&str]) -> Vec<PeerAddress> {
        ips.iter()
            .map(|ip| PeerAddress { ip: (*ip).to_string() })
            .collect()
    }

    fn own(ip: &str) -> AddressInfo {
        AddressInfo {
            ip: ip.to_string(),
            ..AddressInfo::default()
        }
    }

    #[test]
    fn display_excludes_self_and_loopback() {
        let mut view = PresenceView::new();
        view.set_own(own("203.0.113.10"));
        view.replace_snapshot(peers(&["203.0.113.10", "127.0.0.1", "198.51.100.2", "::1"]));

        assert_eq!(view.display_list(), vec!["198.51.100.2".to_string()]);
        assert_eq!(view.snapshot().len(), 4);
    }

    #[test]
    fn snapshot_replaces_rather_than_merges() {
        let mut view = PresenceView::new();
        view.replace_snapshot(peers(&["10.1.1.1", "10.1.1.2"]));
        view.replace_snapshot(peers(&["10.1.1.3"]));
        assert_eq!(view.display_list(), vec!["10.1.1.3".to_string()]);
    }

    #[test]
    fn without_own_address_only_loopback_is_hidden() {
        let mut view = PresenceView::new();
        view.replace_snapshot(peers(&["127.0.0.1", "10.1.1.1"]));
        assert_eq!(view.display_list(), vec!["10.1.1.1".to_string()]);
    }

    #[test]
    fn own_address_update_changes_projection() {
        let mut view = PresenceView::new();
        view.replace_snapshot(peers(&["10.0.0.1", "10.0.0.2"]));
        view.set_own(own("10.0.0.1"));
        assert_eq!(view.display_list(), vec!["10.0.0.2".to_string()]);
        view.set_own(own("10.0.0.2"));
        assert_eq!(view.display_list(), vec!["10.0.0.1".to_string()]);
    }

    #[test]
    fn empty_snapshot_shows_nobody() {
        let view = PresenceView::new();
        assert!(view.display_list().is_empty());
    }
}
