use crate::aggregate::UserMap;

/// Keep only users with at least one keyword-matching message.
///
/// Retained users keep *all* their messages, not just the matching ones, and
/// keep their relative order.
pub fn users_with_keywords(users: &UserMap) -> UserMap {
    users
        .iter()
        .filter(|u| u.has_keyword_match())
        .cloned()
        .collect()
}
