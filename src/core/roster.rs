//! Cluster-wide roster of known identities
//!
//! Seeded from the user repository and converged through presence
//! announcements. An identity may be counted several times (one per
//! announcement, e.g. several connections); a `user-left` removes one count.

use std::collections::HashMap;

use crate::core::identity::Identifiable;
use crate::core::message::UserRef;

#[derive(Debug, Default)]
pub struct Roster {
    entries: HashMap<String, (UserRef, usize)>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.entries.contains_key(user_id)
    }

    pub fn get(&self, user_id: &str) -> Option<&UserRef> {
        self.entries.get(user_id).map(|(user, _)| user)
    }

    /// Record one more announcement of `user`
    pub fn add(&mut self, user: &dyn Identifiable) {
        let entry = self
            .entries
            .entry(user.id().to_string())
            .or_insert_with(|| (UserRef::of(user), 0));
        entry.0.name = user.display_name().to_string();
        entry.1 += 1;
    }

    /// Remove one announcement of `user_id`; returns whether it was known
    pub fn remove(&mut self, user_id: &str) -> bool {
        match self.entries.get_mut(user_id) {
            Some((_, count)) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                self.entries.remove(user_id);
                true
            }
            None => false,
        }
    }

    /// Every distinct identity, sorted by id for stable listings
    pub fn unique_users(&self) -> Vec<UserRef> {
        let mut users: Vec<UserRef> = self.entries.values().map(|(u, _)| u.clone()).collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        users
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, name: &str) -> UserRef {
        UserRef {
            id: id.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_listing_is_deduplicated() {
        let mut roster = Roster::new();
        roster.add(&user("1", "alice"));
        roster.add(&user("1", "alice"));
        roster.add(&user("2", "bob"));

        assert_eq!(roster.unique_users(), vec![user("1", "alice"), user("2", "bob")]);
    }

    #[test]
    fn test_remove_drops_one_occurrence() {
        let mut roster = Roster::new();
        roster.add(&user("1", "alice"));
        roster.add(&user("1", "alice"));

        assert!(roster.remove("1"));
        assert!(roster.contains("1"));
        assert!(roster.remove("1"));
        assert!(!roster.contains("1"));
        assert!(!roster.remove("1"));
    }
}
