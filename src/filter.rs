//! Device filtering by address.
//!
//! Addresses are compared in canonical form: lower-cased, with `:` and `-`
//! separators removed. The same rule applies to configured entries and to the
//! live advertisement address, so `A4:C1:38:20:94:A9`, `a4-c1-38-20-94-a9` and
//! `a4c1382094a9` all name the same device.

use crate::scanner::Advertisement;
use std::collections::HashSet;

/// Canonical form of a device address used for comparisons.
///
/// # Example
/// ```
/// use mi_thermometer_exporter::filter::canonical_address;
///
/// assert_eq!(canonical_address("A4:C1:38:20:94:A9"), "a4c1382094a9");
/// ```
pub fn canonical_address(address: &str) -> String {
    address
        .chars()
        .filter(|c| !matches!(c, ':' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Decides which advertisements are processed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DeviceFilter {
    /// Every device is accepted.
    #[default]
    AllowAll,
    /// Only devices whose canonical address is in the set are accepted.
    AllowList(HashSet<String>),
}

impl DeviceFilter {
    /// Build an allow-list filter from configured addresses.
    pub fn allow_list<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        DeviceFilter::AllowList(
            addresses
                .into_iter()
                .map(|a| canonical_address(a.as_ref()))
                .collect(),
        )
    }

    /// Allow-all when no address is configured, allow-list otherwise.
    pub fn from_addresses(addresses: &[String]) -> Self {
        if addresses.is_empty() {
            DeviceFilter::AllowAll
        } else {
            Self::allow_list(addresses)
        }
    }

    /// Whether the advertisement's device may be processed.
    pub fn allowed(&self, adv: &Advertisement) -> bool {
        match self {
            DeviceFilter::AllowAll => true,
            DeviceFilter::AllowList(allowed) => allowed.contains(&canonical_address(&adv.address)),
        }
    }
}
