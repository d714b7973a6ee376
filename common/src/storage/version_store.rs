use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, PoisonError, Weak},
};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::artifact::{
            build_history, Artifact, ArtifactPatch, HistoryEntry, PublicArtifact, PublicCursor,
        },
    },
};

/// Async mutexes keyed by record id. Entries are dropped once nobody holds
/// them, so the map stays as small as the set of in-flight writes.
#[derive(Default)]
struct RecordLocks {
    inner: Mutex<HashMap<String, Weak<tokio::sync::Mutex<()>>>>,
}

impl RecordLocks {
    fn lock_for(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| lock.strong_count() > 0);

        if let Some(lock) = locks.get(id).and_then(Weak::upgrade) {
            return lock;
        }
        let lock = Arc::new(tokio::sync::Mutex::new(()));
        locks.insert(id.to_string(), Arc::downgrade(&lock));
        lock
    }
}

/// Owner of artifact persistence. Writes to the same id are serialised so the
/// `previous_video_url` derivation always sees the latest stored pre-image.
#[derive(Clone)]
pub struct VersionStore {
    db: Arc<SurrealDbClient>,
    locks: Arc<RecordLocks>,
}

impl VersionStore {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self {
            db,
            locks: Arc::new(RecordLocks::default()),
        }
    }

    pub fn db(&self) -> &Arc<SurrealDbClient> {
        &self.db
    }

    /// Insert the artifact or merge `patch` into the stored one.
    ///
    /// Mutating an artifact that belongs to someone else is `Forbidden`.
    pub async fn upsert(
        &self,
        id: &str,
        owner: Option<&str>,
        patch: ArtifactPatch,
    ) -> Result<Artifact, AppError> {
        let lock = self.locks.lock_for(id);
        let _guard = lock.lock().await;

        let now = Utc::now();
        let artifact = match self.db.get_item::<Artifact>(id).await? {
            Some(mut existing) => {
                if !existing.is_owned_by(owner) {
                    return Err(AppError::Forbidden(format!(
                        "Video {id} belongs to another user"
                    )));
                }
                self.check_reparent(id, &existing, &patch, owner).await?;
                patch.apply(&mut existing, now)?;
                existing
            }
            None => {
                if let Some(parent) = patch.parent_video_id.as_deref() {
                    self.ensure_parent(parent, owner).await?;
                }
                Artifact::from_patch(id, owner.map(str::to_string), patch, now)?
            }
        };

        let stored = self
            .db
            .upsert_item(artifact)
            .await?
            .ok_or_else(|| AppError::InternalError(format!("Video {id} was not stored")))?;
        debug!(video_id = %id, status = stored.status.as_str(), "video upserted");

        Ok(stored)
    }

    /// Metadata-only update of an existing artifact. Missing or foreign
    /// artifacts are `NotFound` / `Forbidden` and nothing is created.
    pub async fn update(
        &self,
        id: &str,
        owner: &str,
        patch: ArtifactPatch,
    ) -> Result<Artifact, AppError> {
        let lock = self.locks.lock_for(id);
        let _guard = lock.lock().await;

        let mut existing = self
            .db
            .get_item::<Artifact>(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Video {id} not found")))?;
        if !existing.is_owned_by(Some(owner)) {
            return Err(AppError::Forbidden(format!(
                "Video {id} belongs to another user"
            )));
        }

        self.check_reparent(id, &existing, &patch, Some(owner)).await?;
        patch.apply(&mut existing, Utc::now())?;
        self.db
            .upsert_item(existing)
            .await?
            .ok_or_else(|| AppError::InternalError(format!("Video {id} was not stored")))
    }

    pub async fn get(&self, id: &str, owner: &str) -> Result<Artifact, AppError> {
        Artifact::find_owned(id, owner, &self.db).await
    }

    /// Whether `id` exists and is owned by `owner`, without leaking which.
    pub async fn exists_for(&self, id: &str, owner: Option<&str>) -> Result<bool, AppError> {
        Ok(self
            .db
            .get_item::<Artifact>(id)
            .await?
            .is_some_and(|artifact| artifact.is_owned_by(owner)))
    }

    /// The artifact and its direct edits, newest first.
    pub async fn history(&self, id: &str, owner: &str) -> Result<Vec<HistoryEntry>, AppError> {
        let root = Artifact::find_owned(id, owner, &self.db).await?;
        let mut versions = Artifact::children_of(id, owner, &self.db).await?;
        versions.push(root);

        Ok(build_history(versions))
    }

    /// Walk `parent_video_id` links from `id` up to its root. A missing parent
    /// ends the walk; the last artifact found is treated as the root.
    pub async fn lineage(&self, id: &str, owner: &str) -> Result<Vec<Artifact>, AppError> {
        let mut chain = vec![Artifact::find_owned(id, owner, &self.db).await?];
        let mut seen = HashSet::from([id.to_string()]);

        while let Some(parent_id) = chain.last().and_then(|a| a.parent_video_id.clone()) {
            if !seen.insert(parent_id.clone()) {
                warn!(video_id = %id, %parent_id, "cycle in video lineage");
                break;
            }
            match Artifact::find_owned(&parent_id, owner, &self.db).await {
                Ok(parent) => chain.push(parent),
                Err(AppError::NotFound(_)) => break,
                Err(err) => return Err(err),
            }
        }

        Ok(chain)
    }

    /// Swap back to the previous video. Only one step is kept.
    pub async fn revert(&self, id: &str, owner: &str) -> Result<Artifact, AppError> {
        let lock = self.locks.lock_for(id);
        let _guard = lock.lock().await;

        let mut artifact = Artifact::find_owned(id, owner, &self.db).await?;
        let previous = artifact
            .previous_video_url
            .clone()
            .ok_or_else(|| AppError::Validation(format!("Video {id} has nothing to revert to")))?;

        ArtifactPatch {
            video_url: Some(previous),
            previous_video_url: Some(None),
            ..ArtifactPatch::default()
        }
        .apply(&mut artifact, Utc::now())?;

        let stored = self
            .db
            .upsert_item(artifact)
            .await?
            .ok_or_else(|| AppError::InternalError(format!("Video {id} was not stored")))?;
        info!(video_id = %id, "video reverted to previous version");

        Ok(stored)
    }

    /// Remove an owned artifact. Children keep their now dangling parent id.
    pub async fn delete(&self, id: &str, owner: &str) -> Result<(), AppError> {
        let lock = self.locks.lock_for(id);
        let _guard = lock.lock().await;

        Artifact::find_owned(id, owner, &self.db).await?;
        self.db.delete_item::<Artifact>(id).await?;
        info!(video_id = %id, "video deleted");

        Ok(())
    }

    /// Admin removal from the public gallery, regardless of owner.
    pub async fn delete_public(&self, id: &str) -> Result<(), AppError> {
        let lock = self.locks.lock_for(id);
        let _guard = lock.lock().await;

        let is_public = self
            .db
            .get_item::<Artifact>(id)
            .await?
            .is_some_and(|artifact| artifact.is_public());
        if !is_public {
            return Err(AppError::NotFound(format!("Video {id} not found")));
        }
        self.db.delete_item::<Artifact>(id).await?;
        info!(video_id = %id, "public video removed by admin");

        Ok(())
    }

    pub async fn list_for_owner(&self, owner: &str) -> Result<Vec<Artifact>, AppError> {
        Artifact::list_for_owner(owner, &self.db).await
    }

    /// Keyset page of completed videos, newest first.
    pub async fn list_public(
        &self,
        cursor: Option<&PublicCursor>,
        limit: usize,
    ) -> Result<Vec<PublicArtifact>, AppError> {
        Artifact::public_after(cursor, limit.max(1), &self.db).await
    }

    pub async fn public_page(
        &self,
        start: usize,
        limit: Option<usize>,
    ) -> Result<Vec<PublicArtifact>, AppError> {
        Artifact::public_page(start, limit, &self.db).await
    }

    pub async fn count_public(&self) -> Result<usize, AppError> {
        Artifact::count_public(&self.db).await
    }

    pub async fn get_public(&self, id: &str) -> Result<PublicArtifact, AppError> {
        Artifact::find_public(id, &self.db).await
    }

    /// A changed `parent_video_id` must name an existing video of the same
    /// owner and must not make `id` its own ancestor.
    async fn check_reparent(
        &self,
        id: &str,
        existing: &Artifact,
        patch: &ArtifactPatch,
        owner: Option<&str>,
    ) -> Result<(), AppError> {
        let Some(parent) = patch.parent_video_id.as_deref() else {
            return Ok(());
        };
        if existing.parent_video_id.as_deref() == Some(parent) {
            return Ok(());
        }
        self.ensure_parent(parent, owner).await?;

        let mut seen = HashSet::new();
        let mut cursor = Some(parent.to_string());
        while let Some(current) = cursor {
            if current == id {
                return Err(AppError::Validation(format!(
                    "parent video {parent} would make video {id} its own ancestor"
                )));
            }
            if !seen.insert(current.clone()) {
                break;
            }
            cursor = self
                .db
                .get_item::<Artifact>(&current)
                .await?
                .and_then(|artifact| artifact.parent_video_id);
        }

        Ok(())
    }

    async fn ensure_parent(&self, parent: &str, owner: Option<&str>) -> Result<(), AppError> {
        if self.exists_for(parent, owner).await? {
            Ok(())
        } else {
            Err(AppError::Validation(format!(
                "parent video {parent} does not exist"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::{artifact::ArtifactStatus, StoredObject};
    use chrono::Duration;
    use uuid::Uuid;

    async fn store() -> VersionStore {
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("test_ns", &database)
            .await
            .expect("in-memory surrealdb");
        db.ensure_initialized().await.expect("indexes");
        VersionStore::new(Arc::new(db))
    }

    fn completed(url: &str) -> ArtifactPatch {
        ArtifactPatch {
            status: Some(ArtifactStatus::Completed),
            video_url: Some(url.into()),
            ..ArtifactPatch::default()
        }
    }

    async fn count_videos(store: &VersionStore) -> usize {
        let all: Vec<Artifact> = store
            .db()
            .client
            .select(Artifact::table_name())
            .await
            .expect("select all");
        all.len()
    }

    #[tokio::test]
    async fn upsert_twice_is_idempotent() {
        let store = store().await;
        store
            .upsert("a", Some("u1"), completed("v1"))
            .await
            .expect("create");

        let first = store
            .upsert("a", Some("u1"), completed("v2"))
            .await
            .expect("first delivery");
        let second = store
            .upsert("a", Some("u1"), completed("v2"))
            .await
            .expect("second delivery");

        assert_eq!(count_videos(&store).await, 1);
        assert_eq!(first.previous_video_url.as_deref(), Some("v1"));
        assert_eq!(second.previous_video_url.as_deref(), Some("v1"));
        assert_eq!(second.video_url.as_deref(), Some("v2"));
        assert!(second.updated_at >= second.created_at);
    }

    #[tokio::test]
    async fn edit_then_revert() {
        let store = store().await;
        store
            .upsert("a", Some("u1"), completed("v1"))
            .await
            .expect("create");
        let edited = store
            .upsert("a", Some("u1"), completed("v2"))
            .await
            .expect("edit");
        assert_eq!(edited.previous_video_url.as_deref(), Some("v1"));

        let reverted = store.revert("a", "u1").await.expect("revert");
        assert_eq!(reverted.video_url.as_deref(), Some("v1"));
        assert_eq!(reverted.previous_video_url, None);

        let err = store.revert("a", "u1").await.expect_err("nothing left");
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn foreign_owner_cannot_read_or_mutate() {
        let store = store().await;
        store
            .upsert("a", Some("u1"), completed("v1"))
            .await
            .expect("create");

        let err = store.get("a", "u2").await.expect_err("hidden");
        assert!(matches!(err, AppError::NotFound(_)));

        let err = store
            .upsert("a", Some("u2"), completed("v9"))
            .await
            .expect_err("not owner");
        assert!(matches!(err, AppError::Forbidden(_)));

        let err = store.delete("a", "u2").await.expect_err("not owner");
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(store.get("a", "u1").await.is_ok());
    }

    #[tokio::test]
    async fn update_never_creates() {
        let store = store().await;
        let err = store
            .update(
                "missing",
                "u1",
                ArtifactPatch {
                    title: Some("t".into()),
                    ..ArtifactPatch::default()
                },
            )
            .await
            .expect_err("missing");
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(count_videos(&store).await, 0);
    }

    #[tokio::test]
    async fn history_lists_children_newest_first() {
        let store = store().await;
        let base = Utc::now();
        for (offset, id, parent) in [(0, "a", None), (1, "b", Some("a")), (2, "c", Some("a"))] {
            let mut artifact = Artifact::from_patch(
                id,
                Some("u1".into()),
                ArtifactPatch {
                    parent_video_id: parent.map(str::to_string),
                    ..completed(&format!("v-{id}"))
                },
                base,
            )
            .expect("artifact");
            artifact.created_at = base + Duration::seconds(offset);
            artifact.updated_at = artifact.created_at;
            store.db().upsert_item(artifact).await.expect("seed");
        }

        let history = store.history("a", "u1").await.expect("history");
        let ids: Vec<_> = history.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
        let current: Vec<_> = history.iter().filter(|e| e.is_current).collect();
        assert_eq!(current.len(), 1);
        assert_eq!(current.first().map(|e| e.id.as_str()), Some("c"));

        let err = store.history("a", "u2").await.expect_err("foreign");
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn lineage_tolerates_deleted_parent() {
        let store = store().await;
        store
            .upsert("a", Some("u1"), completed("v1"))
            .await
            .expect("root");
        store
            .upsert(
                "b",
                Some("u1"),
                ArtifactPatch {
                    parent_video_id: Some("a".into()),
                    ..completed("v2")
                },
            )
            .await
            .expect("child");
        store
            .upsert(
                "c",
                Some("u1"),
                ArtifactPatch {
                    parent_video_id: Some("b".into()),
                    ..completed("v3")
                },
            )
            .await
            .expect("grandchild");

        let chain = store.lineage("c", "u1").await.expect("lineage");
        let ids: Vec<_> = chain.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);

        store.delete("b", "u1").await.expect("delete middle");
        let chain = store.lineage("c", "u1").await.expect("lineage");
        let ids: Vec<_> = chain.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["c"]);
        assert!(store.get("c", "u1").await.is_ok());
    }

    #[tokio::test]
    async fn new_child_requires_existing_parent() {
        let store = store().await;
        let err = store
            .upsert(
                "b",
                Some("u1"),
                ArtifactPatch {
                    parent_video_id: Some("ghost".into()),
                    ..completed("v2")
                },
            )
            .await
            .expect_err("orphan");
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn public_listing_only_shows_completed() {
        let store = store().await;
        let base = Utc::now();
        let seeds = [
            ("p1", ArtifactStatus::Completed, Some("v1")),
            ("p2", ArtifactStatus::Failed, None),
            ("p3", ArtifactStatus::Processing, None),
            ("p4", ArtifactStatus::Completed, Some("v4")),
            ("p5", ArtifactStatus::Completed, Some("v5")),
        ];
        for (offset, (id, status, url)) in (0_i64..).zip(seeds) {
            let mut artifact = Artifact::from_patch(
                id,
                Some("u1".into()),
                ArtifactPatch {
                    status: Some(status),
                    video_url: url.map(str::to_string),
                    ..ArtifactPatch::default()
                },
                base,
            )
            .expect("artifact");
            artifact.created_at = base + Duration::seconds(offset);
            store.db().upsert_item(artifact).await.expect("seed");
        }

        assert_eq!(store.count_public().await.expect("count"), 3);

        let first = store.list_public(None, 2).await.expect("first page");
        let ids: Vec<_> = first.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["p5", "p4"]);

        let cursor = first.last().map(PublicCursor::after).expect("cursor");
        let second = store.list_public(Some(&cursor), 2).await.expect("second page");
        let ids: Vec<_> = second.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["p1"]);

        let offset_page = store.public_page(1, Some(1)).await.expect("offset page");
        assert_eq!(offset_page.first().map(|a| a.id.as_str()), Some("p4"));
        let everything = store.public_page(0, None).await.expect("all");
        assert_eq!(everything.len(), 3);

        assert!(store.get_public("p1").await.is_ok());
        let err = store.get_public("p2").await.expect_err("failed video");
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn concurrent_completions_do_not_tear_previous_url() {
        let store = store().await;
        store
            .upsert("a", Some("u1"), completed("v1"))
            .await
            .expect("create");

        let (left, right) = tokio::join!(
            store.upsert("a", Some("u1"), completed("v2")),
            store.upsert("a", Some("u1"), completed("v2")),
        );
        left.expect("left");
        right.expect("right");

        let stored = store.get("a", "u1").await.expect("get");
        assert_eq!(stored.video_url.as_deref(), Some("v2"));
        assert_eq!(stored.previous_video_url.as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn admin_delete_ignores_owner() {
        let store = store().await;
        store
            .upsert("a", Some("u1"), completed("v1"))
            .await
            .expect("create");

        store.delete_public("a").await.expect("admin delete");
        let err = store.delete_public("a").await.expect_err("gone");
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn admin_delete_skips_private_videos() {
        let store = store().await;
        store
            .upsert(
                "busy",
                Some("u1"),
                ArtifactPatch {
                    status: Some(ArtifactStatus::Processing),
                    ..ArtifactPatch::default()
                },
            )
            .await
            .expect("create");

        let err = store.delete_public("busy").await.expect_err("not public");
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(count_videos(&store).await, 1);
    }

    fn child_of(parent: &str) -> ArtifactPatch {
        ArtifactPatch {
            parent_video_id: Some(parent.into()),
            ..ArtifactPatch::default()
        }
    }

    #[tokio::test]
    async fn reparenting_into_a_cycle_is_rejected() {
        let store = store().await;
        store
            .upsert("a", Some("u1"), completed("v1"))
            .await
            .expect("root");
        store
            .upsert(
                "b",
                Some("u1"),
                ArtifactPatch {
                    parent_video_id: Some("a".into()),
                    ..completed("v2")
                },
            )
            .await
            .expect("child");

        let err = store
            .upsert("a", Some("u1"), child_of("b"))
            .await
            .expect_err("a -> b -> a");
        assert!(matches!(err, AppError::Validation(_)));

        let err = store
            .upsert("a", Some("u1"), child_of("a"))
            .await
            .expect_err("self parent");
        assert!(matches!(err, AppError::Validation(_)));

        let err = store
            .update("a", "u1", child_of("b"))
            .await
            .expect_err("update takes the same path");
        assert!(matches!(err, AppError::Validation(_)));

        let root = store.get("a", "u1").await.expect("root");
        assert_eq!(root.parent_video_id, None);
    }

    #[tokio::test]
    async fn reparenting_requires_an_owned_parent() {
        let store = store().await;
        store
            .upsert("a", Some("u1"), completed("v1"))
            .await
            .expect("root");
        store
            .upsert("b", Some("u1"), completed("v2"))
            .await
            .expect("second root");
        store
            .upsert("foreign", Some("u2"), completed("v3"))
            .await
            .expect("other user");

        let err = store
            .upsert("b", Some("u1"), child_of("ghost"))
            .await
            .expect_err("dangling parent");
        assert!(matches!(err, AppError::Validation(_)));

        let err = store
            .upsert("b", Some("u1"), child_of("foreign"))
            .await
            .expect_err("foreign parent");
        assert!(matches!(err, AppError::Validation(_)));

        let moved = store
            .upsert("b", Some("u1"), child_of("a"))
            .await
            .expect("valid reparent");
        assert_eq!(moved.parent_video_id.as_deref(), Some("a"));

        let again = store
            .upsert("b", Some("u1"), child_of("a"))
            .await
            .expect("redelivered parent link");
        assert_eq!(again.parent_video_id.as_deref(), Some("a"));
    }
}
