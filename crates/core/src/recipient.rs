//! Recipient addressing: who a notification is for.
//!
//! A [`Recipient`] is a closed set of variants dispatched by pattern
//! matching. Every variant supports the same three capabilities the
//! dispatch engine relies on: a stable [`id`](Recipient::id) for group
//! deduplication, [`contains_user`](Recipient::contains_user) for
//! subscription filtering, and
//! [`fully_contained_within`](Recipient::fully_contained_within) for
//! read-by-all convergence.

use std::collections::HashSet;
use std::sync::Arc;

use crate::address::UserAddress;
use crate::error::CoreError;

/// Maximum length of a group id.
const MAX_GROUP_ID_LEN: usize = 128;

// ---------------------------------------------------------------------------
// RecipientId
// ---------------------------------------------------------------------------

/// Stable identity of a recipient.
///
/// Ids are namespaced by variant (`user:<address>`, `group:<id>`,
/// `everyone`) so distinct variants can never collide. The dispatch engine
/// keys its group-container registry by this value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(transparent)]
pub struct RecipientId(String);

impl RecipientId {
    /// The raw id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecipientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// GroupRecipient
// ---------------------------------------------------------------------------

/// A named, fixed set of users.
///
/// The member set is immutable and shared behind an `Arc`, so cloning a
/// recipient never copies it.
#[derive(Debug, Clone)]
pub struct GroupRecipient {
    id: String,
    members: Arc<HashSet<UserAddress>>,
}

impl GroupRecipient {
    /// Create a group recipient.
    ///
    /// Rules:
    /// - The id must not be empty, must not exceed `MAX_GROUP_ID_LEN`
    ///   characters, and must not contain whitespace or control characters.
    /// - The member set must not be empty (a notification addressed to
    ///   nobody is a contract violation).
    pub fn new(
        id: impl Into<String>,
        members: impl IntoIterator<Item = UserAddress>,
    ) -> Result<Self, CoreError> {
        let id = id.into();
        if id.is_empty() {
            return Err(CoreError::Validation(
                "Group id must not be empty".to_string(),
            ));
        }
        if id.len() > MAX_GROUP_ID_LEN {
            return Err(CoreError::Validation(format!(
                "Group id must not exceed {MAX_GROUP_ID_LEN} characters"
            )));
        }
        if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(CoreError::Validation(
                "Group id must not contain whitespace or control characters".to_string(),
            ));
        }

        let members: HashSet<UserAddress> = members.into_iter().collect();
        if members.is_empty() {
            return Err(CoreError::Validation(
                "Group must have at least one member".to_string(),
            ));
        }

        Ok(Self {
            id,
            members: Arc::new(members),
        })
    }

    /// The stable group identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The users belonging to this group.
    pub fn members(&self) -> &HashSet<UserAddress> {
        &self.members
    }
}

// ---------------------------------------------------------------------------
// Recipient
// ---------------------------------------------------------------------------

/// Who a notification is addressed to.
///
/// Recipients are immutable once constructed and cheap to clone.
#[derive(Debug, Clone)]
pub enum Recipient {
    /// Exactly one, known, user.
    User(UserAddress),

    /// Every user, including anonymous ones.
    Everyone,

    /// A named, fixed set of users.
    Group(GroupRecipient),
}

impl Recipient {
    /// Convenience constructor for a group recipient.
    pub fn group(
        id: impl Into<String>,
        members: impl IntoIterator<Item = UserAddress>,
    ) -> Result<Self, CoreError> {
        Ok(Recipient::Group(GroupRecipient::new(id, members)?))
    }

    /// Stable identity for group-container deduplication.
    pub fn id(&self) -> RecipientId {
        match self {
            Recipient::User(addr) => RecipientId(format!("user:{addr}")),
            Recipient::Everyone => RecipientId("everyone".to_string()),
            Recipient::Group(group) => RecipientId(format!("group:{}", group.id)),
        }
    }

    /// Whether this recipient addresses the given user.
    ///
    /// `None` is the anonymous user: only [`Recipient::Everyone`] contains
    /// it.
    pub fn contains_user(&self, user: Option<&UserAddress>) -> bool {
        match (self, user) {
            (Recipient::Everyone, _) => true,
            (Recipient::User(addr), Some(user)) => addr == user,
            (Recipient::Group(group), Some(user)) => group.members.contains(user),
            (_, None) => false,
        }
    }

    /// Whether every user this recipient addresses is present in `users`.
    ///
    /// [`Recipient::Everyone`] is never fully contained: the set of all
    /// users, including anonymous ones, is unbounded.
    pub fn fully_contained_within(&self, users: &HashSet<UserAddress>) -> bool {
        match self {
            Recipient::User(addr) => users.contains(addr),
            Recipient::Everyone => false,
            Recipient::Group(group) => group.members.is_subset(users),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn addr(raw: &str) -> UserAddress {
        UserAddress::new(raw).expect("test address should be valid")
    }

    // -- ids ------------------------------------------------------------------

    #[test]
    fn ids_are_namespaced_by_variant() {
        let user = Recipient::User(addr("alice"));
        let everyone = Recipient::Everyone;
        let group = Recipient::group("alice", [addr("bob")]).expect("valid group");

        assert_eq!(user.id().as_str(), "user:alice");
        assert_eq!(everyone.id().as_str(), "everyone");
        // A group named like a user address must not collide with it.
        assert_eq!(group.id().as_str(), "group:alice");
        assert_ne!(user.id(), group.id());
    }

    #[test]
    fn same_group_id_yields_same_recipient_id() {
        let g1 = Recipient::group("mods", [addr("alice")]).expect("valid group");
        let g2 = Recipient::group("mods", [addr("bob")]).expect("valid group");
        assert_eq!(g1.id(), g2.id());
    }

    // -- contains_user --------------------------------------------------------

    #[test]
    fn user_recipient_contains_only_that_user() {
        let recipient = Recipient::User(addr("alice"));
        assert!(recipient.contains_user(Some(&addr("alice"))));
        assert!(!recipient.contains_user(Some(&addr("bob"))));
        assert!(!recipient.contains_user(None));
    }

    #[test]
    fn everyone_contains_all_users_including_anonymous() {
        assert!(Recipient::Everyone.contains_user(Some(&addr("alice"))));
        assert!(Recipient::Everyone.contains_user(None));
    }

    #[test]
    fn group_contains_members_only() {
        let group = Recipient::group("mods", [addr("alice"), addr("bob")]).expect("valid group");
        assert!(group.contains_user(Some(&addr("alice"))));
        assert!(!group.contains_user(Some(&addr("carol"))));
        assert!(!group.contains_user(None));
    }

    // -- fully_contained_within -----------------------------------------------

    #[test]
    fn user_recipient_fully_contained_when_present() {
        let recipient = Recipient::User(addr("alice"));
        let read: HashSet<_> = [addr("alice"), addr("bob")].into_iter().collect();
        assert!(recipient.fully_contained_within(&read));
        assert!(!recipient.fully_contained_within(&HashSet::new()));
    }

    #[test]
    fn group_fully_contained_requires_all_members() {
        let group = Recipient::group("mods", [addr("alice"), addr("bob")]).expect("valid group");

        let partial: HashSet<_> = [addr("alice")].into_iter().collect();
        assert!(!group.fully_contained_within(&partial));

        let full: HashSet<_> = [addr("alice"), addr("bob"), addr("carol")]
            .into_iter()
            .collect();
        assert!(group.fully_contained_within(&full));
    }

    #[test]
    fn everyone_is_never_fully_contained() {
        let read: HashSet<_> = [addr("alice")].into_iter().collect();
        assert!(!Recipient::Everyone.fully_contained_within(&read));
    }

    // -- validation -----------------------------------------------------------

    #[test]
    fn empty_group_id_rejected() {
        assert_matches!(
            Recipient::group("", [addr("alice")]),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn group_without_members_rejected() {
        assert_matches!(Recipient::group("mods", []), Err(CoreError::Validation(_)));
    }

    #[test]
    fn group_id_with_whitespace_rejected() {
        assert_matches!(
            Recipient::group("two words", [addr("alice")]),
            Err(CoreError::Validation(_))
        );
    }
}
