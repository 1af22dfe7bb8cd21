//! Grouping of flat message records into per-user aggregates.

use std::{collections::HashMap, fmt};

use serde::{
    de::{MapAccess, Visitor},
    ser::SerializeMap,
    Deserialize, Deserializer, Serialize, Serializer,
};

use crate::{
    domain::{AggregatedMessage, MessageRecord, UserAggregate},
    errors::Error,
    Result,
};

/// Insertion-ordered mapping from sender id to [`UserAggregate`].
///
/// Serializes as a JSON object whose keys appear in first-seen order, and reads
/// back in document order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserMap {
    users: Vec<UserAggregate>,
    index: HashMap<String, usize>,
}

impl UserMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn get(&self, sender_id: &str) -> Option<&UserAggregate> {
        self.index.get(sender_id).map(|&i| &self.users[i])
    }

    pub fn get_mut(&mut self, sender_id: &str) -> Option<&mut UserAggregate> {
        self.index.get(sender_id).map(|&i| &mut self.users[i])
    }

    pub fn contains_key(&self, sender_id: &str) -> bool {
        self.index.contains_key(sender_id)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.users.iter().map(|u| u.sender_id.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, UserAggregate> {
        self.users.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, UserAggregate> {
        self.users.iter_mut()
    }

    /// Total number of messages across all users.
    pub fn message_count(&self) -> usize {
        self.users.iter().map(|u| u.messages.len()).sum()
    }

    /// Insert a whole aggregate. An existing entry for the same sender keeps its
    /// position and profile; the incoming messages are appended to it.
    pub fn insert(&mut self, user: UserAggregate) {
        match self.index.get(&user.sender_id) {
            Some(&i) => self.users[i].messages.extend(user.messages),
            None => {
                self.index.insert(user.sender_id.clone(), self.users.len());
                self.users.push(user);
            }
        }
    }
}

impl FromIterator<UserAggregate> for UserMap {
    fn from_iter<I: IntoIterator<Item = UserAggregate>>(iter: I) -> Self {
        let mut map = UserMap::new();
        for u in iter {
            map.insert(u);
        }
        map
    }
}

impl IntoIterator for UserMap {
    type Item = UserAggregate;
    type IntoIter = std::vec::IntoIter<UserAggregate>;

    fn into_iter(self) -> Self::IntoIter {
        self.users.into_iter()
    }
}

impl<'a> IntoIterator for &'a UserMap {
    type Item = &'a UserAggregate;
    type IntoIter = std::slice::Iter<'a, UserAggregate>;

    fn into_iter(self) -> Self::IntoIter {
        self.users.iter()
    }
}

impl Serialize for UserMap {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(Some(self.users.len()))?;
        for u in &self.users {
            map.serialize_entry(&u.sender_id, u)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for UserMap {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        struct UserMapVisitor;

        impl<'de> Visitor<'de> for UserMapVisitor {
            type Value = UserMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object of user aggregates keyed by sender id")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<UserMap, A::Error> {
                let mut map = UserMap::new();
                while let Some((key, mut user)) = access.next_entry::<String, UserAggregate>()? {
                    if user.sender_id.trim().is_empty() {
                        user.sender_id = key;
                    }
                    map.insert(user);
                }
                Ok(map)
            }
        }

        d.deserialize_map(UserMapVisitor)
    }
}

/// Single-pass insert-or-append grouping.
///
/// The first record of a sender establishes the profile fields (first-seen
/// wins); later records only append to the message list.
#[derive(Debug, Default)]
pub struct Aggregator {
    users: UserMap,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one record in. A record without a sender id is rejected with
    /// [`Error::Validation`] and leaves the aggregate untouched.
    pub fn push(&mut self, record: &MessageRecord) -> Result<()> {
        let sender_id = record
            .sender_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                Error::Validation(format!("message {} has no sender_id", record.message_id))
            })?;

        match self.users.get_mut(sender_id) {
            Some(user) => user.messages.push(AggregatedMessage::from(record)),
            None => self
                .users
                .insert(UserAggregate::from_first(sender_id, record)),
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn finish(self) -> UserMap {
        self.users
    }
}

/// Aggregate a complete record set, failing on the first record without a sender id.
pub fn aggregate<'a, I>(records: I) -> Result<UserMap>
where
    I: IntoIterator<Item = &'a MessageRecord>,
{
    let mut agg = Aggregator::new();
    for r in records {
        agg.push(r)?;
    }
    Ok(agg.finish())
}
