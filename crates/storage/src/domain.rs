//! The seven domains and their filename bases / table names.

use std::fmt;

/// Which of the seven domains. History domains track previous values
/// keyed by entity and txnum; inverted-index domains map a key to the
/// set of txnums at which it occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainKind {
    /// History: account state.
    Accounts,
    /// History: contract storage slots.
    Storage,
    /// History: contract code.
    Code,
    /// Inverted index: log addresses.
    LogAddrs,
    /// Inverted index: log topics.
    LogTopics,
    /// Inverted index: call-trace `from` addresses.
    TracesFrom,
    /// Inverted index: call-trace `to` addresses.
    TracesTo,
}

impl DomainKind {
    /// All seven domains, in the order the orchestrator iterates them.
    pub const ALL: [DomainKind; 7] = [
        DomainKind::Accounts,
        DomainKind::Storage,
        DomainKind::Code,
        DomainKind::LogAddrs,
        DomainKind::LogTopics,
        DomainKind::TracesFrom,
        DomainKind::TracesTo,
    ];

    /// The three history domains.
    pub const HISTORY: [DomainKind; 3] =
        [DomainKind::Accounts, DomainKind::Storage, DomainKind::Code];

    /// The four inverted-index domains.
    pub const INVERTED_INDEX: [DomainKind; 4] = [
        DomainKind::LogAddrs,
        DomainKind::LogTopics,
        DomainKind::TracesFrom,
        DomainKind::TracesTo,
    ];

    /// True for the three history domains (accounts/storage/code).
    pub fn is_history(self) -> bool {
        matches!(
            self,
            DomainKind::Accounts | DomainKind::Storage | DomainKind::Code
        )
    }

    /// Lowercase filename base, e.g. `"accounts"`, `"logtopics"`.
    pub fn base_name(self) -> &'static str {
        match self {
            DomainKind::Accounts => "accounts",
            DomainKind::Storage => "storage",
            DomainKind::Code => "code",
            DomainKind::LogAddrs => "logaddrs",
            DomainKind::LogTopics => "logtopics",
            DomainKind::TracesFrom => "tracesfrom",
            DomainKind::TracesTo => "tracesto",
        }
    }

    /// Host-store table name for the "keys" table (index-keys for
    /// inverted-index domains, history-keys for history domains).
    pub fn keys_table(self) -> &'static str {
        match self {
            DomainKind::Accounts => "AccountHistoryKeys",
            DomainKind::Storage => "StorageHistoryKeys",
            DomainKind::Code => "CodeHistoryKeys",
            DomainKind::LogAddrs => "LogAddrsIndexKeys",
            DomainKind::LogTopics => "LogTopicsIndexKeys",
            DomainKind::TracesFrom => "TracesFromIndexKeys",
            DomainKind::TracesTo => "TracesToIndexKeys",
        }
    }

    /// Host-store table name for the "idx" table (inverted index over
    /// the keys table; present for every domain).
    pub fn idx_table(self) -> &'static str {
        match self {
            DomainKind::Accounts => "AccountIdx",
            DomainKind::Storage => "StorageIdx",
            DomainKind::Code => "CodeIdx",
            DomainKind::LogAddrs => "LogAddrsIdx",
            DomainKind::LogTopics => "LogTopicsIdx",
            DomainKind::TracesFrom => "TracesFromIdx",
            DomainKind::TracesTo => "TracesToIdx",
        }
    }

    /// Host-store table name for the "vals" table. History domains
    /// only (inverted-index domains have no separate value payload:
    /// the key's occurrence *is* the datum).
    pub fn vals_table(self) -> Option<&'static str> {
        match self {
            DomainKind::Accounts => Some("AccountHistoryVals"),
            DomainKind::Storage => Some("StorageHistoryVals"),
            DomainKind::Code => Some("CodeHistoryVals"),
            _ => None,
        }
    }

    /// Host-store table name for the "settings" table. History domains
    /// only.
    pub fn settings_table(self) -> Option<&'static str> {
        match self {
            DomainKind::Accounts => Some("AccountSettings"),
            DomainKind::Storage => Some("StorageSettings"),
            DomainKind::Code => Some("CodeSettings"),
            _ => None,
        }
    }
}

impl fmt::Display for DomainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_contains_seven_domains() {
        assert_eq!(DomainKind::ALL.len(), 7);
    }

    #[test]
    fn history_and_inverted_index_partition_all() {
        let mut combined: Vec<DomainKind> = DomainKind::HISTORY
            .iter()
            .chain(DomainKind::INVERTED_INDEX.iter())
            .copied()
            .collect();
        combined.sort_by_key(|d| d.base_name());
        let mut all: Vec<DomainKind> = DomainKind::ALL.to_vec();
        all.sort_by_key(|d| d.base_name());
        assert_eq!(combined, all);
    }

    #[test]
    fn history_domains_have_vals_and_settings_tables() {
        for d in DomainKind::HISTORY {
            assert!(d.is_history());
            assert!(d.vals_table().is_some());
            assert!(d.settings_table().is_some());
        }
    }

    #[test]
    fn inverted_index_domains_have_no_vals_table() {
        for d in DomainKind::INVERTED_INDEX {
            assert!(!d.is_history());
            assert!(d.vals_table().is_none());
            assert!(d.settings_table().is_none());
        }
    }

    #[test]
    fn base_names_are_distinct() {
        let names: std::collections::HashSet<_> =
            DomainKind::ALL.iter().map(|d| d.base_name()).collect();
        assert_eq!(names.len(), 7);
    }
}
