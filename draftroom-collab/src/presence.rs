//! Presence: who else is looking at the current draft.
//!
//! ## Data flow
//!
//! ```text
//! channel "sync" (full key → [payload] snapshot)
//!       │
//!       ▼
//! PresenceRoster::apply_sync()
//!       │  parse, dedupe by user_id, drop self, color
//!       ▼
//! Vec<PresenceEntry>  (sorted by name, then id)
//! ```
//!
//! Colors are a stable function of the collaborator id, so a user keeps
//! the same color no matter how the service orders its snapshot keys.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CollabError;
use crate::protocol::{PresencePayload, PresenceState};

/// sRGB color for avatars and cursor badges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresenceColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl PresenceColor {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Pick the palette slot for a collaborator.
    pub fn for_user(user_id: Uuid) -> Self {
        let slot = (user_id.as_u128() % PALETTE.len() as u128) as usize;
        PALETTE[slot]
    }

    /// `#RRGGBB`.
    pub fn to_hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl fmt::Display for PresenceColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Fixed collaborator palette.
pub const PALETTE: [PresenceColor; 6] = [
    PresenceColor::rgb(0xFF, 0x6B, 0x6B),
    PresenceColor::rgb(0x4E, 0xCD, 0xC4),
    PresenceColor::rgb(0x45, 0xB7, 0xD1),
    PresenceColor::rgb(0xFF, 0xA0, 0x7A),
    PresenceColor::rgb(0x98, 0xD8, 0xC8),
    PresenceColor::rgb(0xF7, 0xDC, 0x6F),
];

/// One remote collaborator as shown to the local user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub user_id: Uuid,
    pub user_name: String,
    pub cursor_position: usize,
    pub color: PresenceColor,
}

impl PresenceEntry {
    fn from_payload(payload: PresencePayload) -> Self {
        Self {
            color: PresenceColor::for_user(payload.user_id),
            user_id: payload.user_id,
            user_name: payload.user_name,
            cursor_position: payload.cursor_position,
        }
    }

    /// Up to two initials for avatar badges.
    pub fn initials(&self) -> String {
        self.user_name
            .split_whitespace()
            .filter_map(|word| word.chars().next())
            .flat_map(char::to_uppercase)
            .take(2)
            .collect()
    }
}

/// Reduce a raw presence snapshot into the list shown to `local_user`.
///
/// A single malformed payload rejects the whole snapshot: a partial list
/// would silently drop collaborators.
pub fn reduce_sync(
    raw: &PresenceState,
    local_user: Option<Uuid>,
) -> Result<Vec<PresenceEntry>, CollabError> {
    let mut by_user: HashMap<Uuid, PresenceEntry> = HashMap::new();

    // BTreeMap iteration is key-ordered; later payloads for a user win.
    for (key, metas) in raw {
        for meta in metas {
            let payload = PresencePayload::from_value(meta)
                .map_err(|e| CollabError::desync(format!("key {key}: {e}")))?;
            if Some(payload.user_id) == local_user {
                continue;
            }
            by_user.insert(payload.user_id, PresenceEntry::from_payload(payload));
        }
    }

    let mut entries: Vec<PresenceEntry> = by_user.into_values().collect();
    entries.sort_by(|a, b| {
        a.user_name
            .cmp(&b.user_name)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    Ok(entries)
}

/// Presence list for one channel subscription.
#[derive(Debug, Default)]
pub struct PresenceRoster {
    entries: Vec<PresenceEntry>,
}

impl PresenceRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the roster from a full snapshot. On error the previous
    /// roster is kept.
    pub fn apply_sync(
        &mut self,
        raw: &PresenceState,
        local_user: Option<Uuid>,
    ) -> Result<&[PresenceEntry], CollabError> {
        self.entries = reduce_sync(raw, local_user)?;
        Ok(&self.entries)
    }

    pub fn entries(&self) -> &[PresenceEntry] {
        &self.entries
    }

    pub fn peer(&self, user_id: &Uuid) -> Option<&PresenceEntry> {
        self.entries.iter().find(|e| e.user_id == *user_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(id: Uuid, name: &str, cursor: usize) -> serde_json::Value {
        PresencePayload::new(id, name, cursor).to_value()
    }

    #[test]
    fn test_palette_hex() {
        assert_eq!(PALETTE[0].to_hex(), "#FF6B6B");
        assert_eq!(PALETTE[5].to_string(), "#F7DC6F");
    }

    #[test]
    fn test_color_stable_for_user() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(PresenceColor::for_user(id), PresenceColor::for_user(id));
        assert!(PALETTE.contains(&PresenceColor::for_user(id)));
    }

    #[test]
    fn test_color_slot_from_id() {
        assert_eq!(PresenceColor::for_user(Uuid::from_u128(0)), PALETTE[0]);
        assert_eq!(PresenceColor::for_user(Uuid::from_u128(7)), PALETTE[1]);
        assert_eq!(PresenceColor::for_user(Uuid::from_u128(11)), PALETTE[5]);
    }

    #[test]
    fn test_reduce_excludes_local_user() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut raw = PresenceState::new();
        raw.insert("a".into(), vec![meta(me, "Me", 0)]);
        raw.insert("b".into(), vec![meta(other, "Other", 4)]);

        let list = reduce_sync(&raw, Some(me)).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].user_id, other);
        assert_eq!(list[0].cursor_position, 4);
    }

    #[test]
    fn test_reduce_without_identity_keeps_everyone() {
        let mut raw = PresenceState::new();
        raw.insert("a".into(), vec![meta(Uuid::new_v4(), "A", 0)]);
        raw.insert("b".into(), vec![meta(Uuid::new_v4(), "B", 0)]);
        assert_eq!(reduce_sync(&raw, None).unwrap().len(), 2);
    }

    #[test]
    fn test_reduce_dedupes_user_across_keys() {
        let other = Uuid::new_v4();
        let mut raw = PresenceState::new();
        raw.insert("tab-1".into(), vec![meta(other, "Kim", 3)]);
        raw.insert("tab-2".into(), vec![meta(other, "Kim", 9)]);

        let list = reduce_sync(&raw, None).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].cursor_position, 9);
    }

    #[test]
    fn test_reduce_color_independent_of_key_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let mut first = PresenceState::new();
        first.insert("1".into(), vec![meta(a, "A", 0)]);
        first.insert("2".into(), vec![meta(b, "B", 0)]);

        let mut second = PresenceState::new();
        second.insert("1".into(), vec![meta(b, "B", 0)]);
        second.insert("2".into(), vec![meta(a, "A", 0)]);

        let x = reduce_sync(&first, None).unwrap();
        let y = reduce_sync(&second, None).unwrap();
        assert_eq!(x, y);
    }

    #[test]
    fn test_reduce_sorted_by_name() {
        let mut raw = PresenceState::new();
        raw.insert("1".into(), vec![meta(Uuid::new_v4(), "Zoe", 0)]);
        raw.insert("2".into(), vec![meta(Uuid::new_v4(), "Ari", 0)]);
        let names: Vec<String> = reduce_sync(&raw, None)
            .unwrap()
            .into_iter()
            .map(|e| e.user_name)
            .collect();
        assert_eq!(names, vec!["Ari", "Zoe"]);
    }

    #[test]
    fn test_reduce_malformed_is_desync() {
        let mut raw = PresenceState::new();
        raw.insert("1".into(), vec![json!({"user_name": "no id"})]);
        let err = reduce_sync(&raw, None).unwrap_err();
        assert!(matches!(err, CollabError::ChannelDesync(_)));
    }

    #[test]
    fn test_roster_keeps_previous_on_error() {
        let other = Uuid::new_v4();
        let mut roster = PresenceRoster::new();

        let mut good = PresenceState::new();
        good.insert("1".into(), vec![meta(other, "Lee", 2)]);
        roster.apply_sync(&good, None).unwrap();
        assert_eq!(roster.len(), 1);

        let mut bad = PresenceState::new();
        bad.insert("1".into(), vec![json!(42)]);
        assert!(roster.apply_sync(&bad, None).is_err());
        assert_eq!(roster.len(), 1);
        assert!(roster.peer(&other).is_some());

        roster.clear();
        assert!(roster.is_empty());
    }

    #[test]
    fn test_initials() {
        let entry =
            PresenceEntry::from_payload(PresencePayload::new(Uuid::nil(), "maria de la cruz", 0));
        assert_eq!(entry.initials(), "MD");
        let email =
            PresenceEntry::from_payload(PresencePayload::new(Uuid::nil(), "x@example.com", 0));
        assert_eq!(email.initials(), "X");
    }
}
