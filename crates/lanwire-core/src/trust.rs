// SPDX-License-Identifier: AGPL-3.0
// Lanwire - Trust policy
//
// Exact-match only. No wildcard, subnet, or hostname matching at
// decision time; resolution only affects what a user chooses to add.

/// Whether an announcing source IP is pre-approved for automatic
/// acceptance
pub fn is_trusted(source_ip: &str, trusted_hosts: &[String]) -> bool {
    trusted_hosts.iter().any(|host| host == source_ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_accepts() {
        let hosts = vec!["192.168.1.10".to_string(), "100.64.0.3".to_string()];
        assert!(is_trusted("192.168.1.10", &hosts));
        assert!(is_trusted("100.64.0.3", &hosts));
    }

    #[test]
    fn non_member_defers() {
        let hosts = vec!["192.168.1.10".to_string()];
        assert!(!is_trusted("192.168.1.11", &hosts));
        assert!(!is_trusted("", &hosts));
    }

    #[test]
    fn no_prefix_or_subnet_matching() {
        let hosts = vec!["192.168.1.0/24".to_string(), "192.168.1".to_string()];
        assert!(!is_trusted("192.168.1.10", &hosts));
    }

    #[test]
    fn empty_list_defers_everything() {
        assert!(!is_trusted("127.0.0.1", &[]));
    }
}
