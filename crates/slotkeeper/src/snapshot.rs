//! Snapshot keys: durable cache file naming, ordering and retention.
//!
//! A snapshot is logically keyed by (conversation, creation timestamp,
//! optional user tag, entity). The key encodes to the file name the backend
//! writes the cache payload under; the payload format itself is opaque to
//! this crate.
//!
//! Encoding: `slot-{conversation}-{millis}-{tag}-{entity}.bin`, where `tag`
//! is the literal `auto` for untagged (auto-saved) snapshots. Entity names
//! are normalized to contain no `-`, and tags are sanitized the same way, so
//! parsing works right-to-left even when the conversation id contains `-`.

use chrono::{DateTime, TimeZone, Utc};

use crate::error::StoreError;
use crate::store::{SnapshotEntry, SnapshotStore};
use crate::types::{ConversationId, EntityId};

const PREFIX: &str = "slot-";
const SUFFIX: &str = ".bin";
const AUTO_TAG: &str = "auto";

/// Logical identity of one durable cache snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotKey {
    pub conversation: ConversationId,
    pub created_at: DateTime<Utc>,
    /// Manual save tag. `None` for auto-saves, which participate in rotation.
    pub tag: Option<String>,
    pub entity: EntityId,
}

impl SnapshotKey {
    /// Key for an automatic (rotation-eligible) snapshot created now.
    pub fn auto(conversation: ConversationId, entity: EntityId) -> Self {
        Self {
            conversation,
            created_at: Utc::now(),
            tag: None,
            entity,
        }
    }

    /// Key for a manually tagged snapshot, exempt from rotation.
    pub fn tagged(conversation: ConversationId, entity: EntityId, tag: &str) -> Self {
        Self {
            conversation,
            created_at: Utc::now(),
            tag: Some(sanitize_tag(tag)),
            entity,
        }
    }

    pub fn is_tagged(&self) -> bool {
        self.tag.is_some()
    }

    /// Encode to the durable file name. Inverse of [`SnapshotKey::parse`],
    /// up to millisecond timestamp precision.
    pub fn file_name(&self) -> String {
        format!(
            "{PREFIX}{}-{}-{}-{}{SUFFIX}",
            self.conversation,
            self.created_at.timestamp_millis(),
            self.tag.as_deref().unwrap_or(AUTO_TAG),
            self.entity,
        )
    }

    /// Parse a file name back into a key. `None` for names this crate did
    /// not produce; such files are never touched by rotation.
    pub fn parse(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?;
        // Entity and tag contain no `-`, so parse from the right; whatever
        // remains on the left is the conversation id, dashes and all.
        let (rest, entity) = rest.rsplit_once('-')?;
        let (rest, tag) = rest.rsplit_once('-')?;
        let (conversation, millis) = rest.rsplit_once('-')?;

        if entity.is_empty() || tag.is_empty() || conversation.is_empty() {
            return None;
        }
        let millis: i64 = millis.parse().ok()?;
        let created_at = Utc.timestamp_millis_opt(millis).single()?;

        Some(Self {
            conversation: ConversationId::new(conversation),
            created_at,
            tag: (tag != AUTO_TAG).then(|| tag.to_string()),
            entity: EntityId::new(entity),
        })
    }
}

fn sanitize_tag(tag: &str) -> String {
    tag.trim()
        .chars()
        .map(|c| if c.is_whitespace() || c == '-' { '_' } else { c })
        .collect()
}

/// Most recent snapshot for `(conversation, entity)` among `entries`,
/// tagged or not. Unparseable names are skipped.
pub fn latest_for(
    entries: &[SnapshotEntry],
    conversation: &ConversationId,
    entity: &EntityId,
) -> Option<SnapshotKey> {
    entries
        .iter()
        .filter_map(|e| SnapshotKey::parse(&e.name))
        .filter(|k| &k.conversation == conversation && &k.entity == entity)
        .max_by_key(|k| k.created_at)
}

/// Delete auto-saved snapshots for `(conversation, entity)` beyond the
/// `keep` most recent. Tagged snapshots are exempt regardless of age or
/// count. Returns the number of snapshots deleted; individual delete
/// failures are logged and skipped.
pub async fn enforce_retention(
    store: &dyn SnapshotStore,
    conversation: &ConversationId,
    entity: &EntityId,
    keep: usize,
) -> Result<usize, StoreError> {
    let entries = store.list().await?;

    let mut auto_keys: Vec<SnapshotKey> = entries
        .iter()
        .filter_map(|e| SnapshotKey::parse(&e.name))
        .filter(|k| &k.conversation == conversation && &k.entity == entity && !k.is_tagged())
        .collect();

    // Newest first; everything past `keep` goes.
    auto_keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut deleted = 0;
    for key in auto_keys.iter().skip(keep) {
        let name = key.file_name();
        match store.delete(&name).await {
            Ok(()) => {
                tracing::debug!(snapshot = %name, "Rotated out auto-save snapshot");
                deleted += 1;
            }
            Err(e) => {
                tracing::warn!(snapshot = %name, error = %e, "Failed to delete rotated snapshot");
            }
        }
    }
    Ok(deleted)
}
