use crate::models::{Subscription, SubscriptionKind};

/// Subscriber links of one thread or topic, at most one per user.
#[derive(Debug, Clone)]
pub struct SubscriptionSet {
    kind: SubscriptionKind,
    target_id: String,
    links: Vec<Subscription>,
}

impl SubscriptionSet {
    pub fn new(kind: SubscriptionKind, target_id: &str) -> Self {
        Self {
            kind,
            target_id: target_id.to_string(),
            links: Vec::new(),
        }
    }

    /// Rebuild from stored links. Links for other targets and repeated users are dropped.
    pub fn from_links(kind: SubscriptionKind, target_id: &str, links: Vec<Subscription>) -> Self {
        let mut set = Self::new(kind, target_id);
        for link in links {
            if link.kind == kind && link.target_id == target_id && !set.contains(&link.user_id) {
                set.links.push(link);
            }
        }
        set
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.links.iter().any(|l| l.user_id == user_id)
    }

    pub fn get(&self, user_id: &str) -> Option<&Subscription> {
        self.links.iter().find(|l| l.user_id == user_id)
    }

    /// Add a link for `user_id`. Returns the new link, or `None` if one already existed.
    pub fn insert(&mut self, user_id: &str) -> Option<&Subscription> {
        if self.contains(user_id) {
            return None;
        }
        self.links
            .push(Subscription::new(self.kind, &self.target_id, user_id));
        self.links.last()
    }

    /// Drop the link for `user_id`. Returns whether one was present.
    pub fn remove(&mut self, user_id: &str) -> bool {
        let before = self.links.len();
        self.links.retain(|l| l.user_id != user_id);
        self.links.len() != before
    }

    /// Keep only `user_id`'s link, creating it if needed. Returns the removed user ids.
    pub fn reset_to(&mut self, user_id: &str) -> Vec<String> {
        let removed: Vec<String> = self
            .links
            .iter()
            .filter(|l| l.user_id != user_id)
            .map(|l| l.user_id.clone())
            .collect();
        self.links.retain(|l| l.user_id == user_id);
        self.insert(user_id);
        removed
    }

    /// Raise the unseen flag on every link except `except`. Returns how many links changed.
    pub fn mark_all_unseen(&mut self, except: Option<&str>) -> usize {
        let mut changed = 0;
        for link in &mut self.links {
            if Some(link.user_id.as_str()) == except || link.unseen {
                continue;
            }
            link.unseen = true;
            changed += 1;
        }
        changed
    }

    /// Set one user's flag. Returns false when the user has no link or the flag already matched.
    pub fn set_unseen(&mut self, user_id: &str, unseen: bool) -> bool {
        match self.links.iter_mut().find(|l| l.user_id == user_id) {
            Some(link) if link.unseen != unseen => {
                link.unseen = unseen;
                true
            }
            _ => false,
        }
    }

    pub fn user_ids(&self) -> Vec<String> {
        self.links.iter().map(|l| l.user_id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
