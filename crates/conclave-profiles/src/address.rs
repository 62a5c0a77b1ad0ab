//! Addresses of remote users.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable service identifier of a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceId(pub Uuid);

impl ServiceId {
    /// Generate a fresh random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Raw 16 bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user address. At least one of the two identifiers must be present.
///
/// Two addresses name the same user when their service ids match; the
/// phone number only identifies addresses that have no service id. So
/// `Address::new(id, phone) == Address::from_service_id(id)`, and equality,
/// hashing and ordering all agree on that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub service_id: Option<ServiceId>,
    pub phone_number: Option<String>,
}

/// The part of an address that identifies the user.
#[derive(PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Identity<'a> {
    Service(ServiceId),
    Phone(Option<&'a str>),
}

impl Address {
    /// Address known by service id only.
    pub fn from_service_id(service_id: ServiceId) -> Self {
        Self {
            service_id: Some(service_id),
            phone_number: None,
        }
    }

    /// Address known by phone number only (legacy contacts).
    pub fn from_phone_number(phone_number: impl Into<String>) -> Self {
        Self {
            service_id: None,
            phone_number: Some(phone_number.into()),
        }
    }

    /// Address with both identifiers.
    pub fn new(service_id: ServiceId, phone_number: impl Into<String>) -> Self {
        Self {
            service_id: Some(service_id),
            phone_number: Some(phone_number.into()),
        }
    }

    /// Address with a fresh random service id.
    pub fn random() -> Self {
        Self::from_service_id(ServiceId::random())
    }

    /// The stable identifier, if known.
    pub fn stable_id(&self) -> Option<ServiceId> {
        self.service_id
    }

    fn identity(&self) -> Identity<'_> {
        match self.service_id {
            Some(id) => Identity::Service(id),
            None => Identity::Phone(self.phone_number.as_deref()),
        }
    }

    /// Combine two forms of one user's address, preferring `newer`'s fields.
    #[must_use]
    pub fn merge(self, newer: Address) -> Address {
        Address {
            service_id: newer.service_id.or(self.service_id),
            phone_number: newer.phone_number.or(self.phone_number),
        }
    }

    /// Check that the address is well-formed.
    ///
    /// Phone numbers must be E.164: `+` followed by 7 to 15 digits.
    pub fn is_valid(&self) -> bool {
        match (&self.service_id, &self.phone_number) {
            (None, None) => false,
            (_, Some(phone)) => is_e164(phone),
            (Some(_), None) => true,
        }
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> Ordering {
        self.identity().cmp(&other.identity())
    }
}

fn is_e164(phone: &str) -> bool {
    match phone.strip_prefix('+') {
        Some(digits) => {
            (7..=15).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.service_id, &self.phone_number) {
            (Some(id), _) => write!(f, "{}", id),
            (None, Some(phone)) => {
                // Only the last two digits, phone numbers end up in logs.
                let skip = phone.chars().count().saturating_sub(2);
                let tail: String = phone.chars().skip(skip).collect();
                write!(f, "+***{}", tail)
            }
            (None, None) => write!(f, "<empty address>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_id_address_is_valid() {
        assert!(Address::random().is_valid());
    }

    #[test]
    fn phone_numbers_must_be_e164() {
        assert!(Address::from_phone_number("+14155550100").is_valid());
        assert!(!Address::from_phone_number("14155550100").is_valid());
        assert!(!Address::from_phone_number("+1415x550100").is_valid());
        assert!(!Address::from_phone_number("+123").is_valid());
    }

    #[test]
    fn empty_address_is_invalid() {
        let address = Address {
            service_id: None,
            phone_number: None,
        };
        assert!(!address.is_valid());
    }

    #[test]
    fn bad_phone_invalidates_even_with_service_id() {
        let address = Address::new(ServiceId::random(), "nope");
        assert!(!address.is_valid());
    }

    #[test]
    fn service_id_identifies_the_user() {
        use std::collections::HashSet;

        let id = ServiceId::random();
        let with_phone = Address::new(id, "+14155550100");
        let bare = Address::from_service_id(id);

        assert_eq!(with_phone, bare);
        assert_eq!(with_phone.cmp(&bare), Ordering::Equal);
        let set: HashSet<Address> = [with_phone, bare].into_iter().collect();
        assert_eq!(set.len(), 1);

        assert_ne!(Address::random(), Address::new(ServiceId::random(), "+14155550100"));
    }

    #[test]
    fn phone_only_addresses_compare_by_number() {
        let phone = Address::from_phone_number("+14155550100");
        assert_eq!(phone, Address::from_phone_number("+14155550100"));
        assert_ne!(phone, Address::from_phone_number("+14155550101"));
        assert_ne!(phone, Address::new(ServiceId::random(), "+14155550100"));
    }

    #[test]
    fn merge_keeps_known_fields() {
        let id = ServiceId::random();
        let merged = Address::new(id, "+14155550100").merge(Address::from_service_id(id));
        assert_eq!(merged.service_id, Some(id));
        assert_eq!(merged.phone_number.as_deref(), Some("+14155550100"));
    }

    #[test]
    fn display_hides_phone_number() {
        let address = Address::from_phone_number("+14155550199");
        assert_eq!(address.to_string(), "+***99");
    }
}
