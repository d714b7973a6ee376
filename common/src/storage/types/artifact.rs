use chrono::SecondsFormat;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ArtifactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactStatus::Pending => "pending",
            ArtifactStatus::Processing => "processing",
            ArtifactStatus::Completed => "completed",
            ArtifactStatus::Failed => "failed",
        }
    }
}

stored_object!(Artifact, "video", {
    #[serde(default)]
    user_id: Option<String>,
    status: ArtifactStatus,
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    previous_video_url: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parent_video_id: Option<String>,
    #[serde(default)]
    edit_prompt: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    is_current: Option<bool>
});

/// A partial update of an [`Artifact`]. Absent fields leave the record
/// untouched; `previous_video_url` distinguishes "not given" from an explicit
/// `null`, which clears the revert target.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ArtifactPatch {
    #[serde(default)]
    pub status: Option<ArtifactStatus>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default, deserialize_with = "deserialize_explicit_null")]
    pub previous_video_url: Option<Option<String>>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parent_video_id: Option<String>,
    #[serde(default)]
    pub edit_prompt: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub is_current: Option<bool>,
}

fn deserialize_explicit_null<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

impl ArtifactPatch {
    /// Merge the patch into `artifact`.
    ///
    /// When the video URL changes and the patch says nothing about
    /// `previous_video_url`, the old URL becomes the revert target. Re-applying
    /// the same patch is a no-op for the version fields.
    pub fn apply(self, artifact: &mut Artifact, now: DateTime<Utc>) -> Result<(), AppError> {
        let prior_url = artifact.video_url.clone();

        if let Some(status) = self.status {
            artifact.status = status;
        }
        if let Some(url) = self.video_url {
            artifact.video_url = Some(url);
        }

        match self.previous_video_url {
            Some(explicit) => artifact.previous_video_url = explicit,
            None => {
                if prior_url.is_some() && artifact.video_url != prior_url {
                    artifact.previous_video_url = prior_url;
                }
            }
        }
        if artifact.previous_video_url.is_some()
            && artifact.previous_video_url == artifact.video_url
        {
            artifact.previous_video_url = None;
        }

        if let Some(code) = self.code {
            artifact.code = Some(code);
        }
        if let Some(title) = self.title {
            artifact.title = Some(title);
        }
        if let Some(description) = self.description {
            artifact.description = Some(description);
        }
        if let Some(parent) = self.parent_video_id {
            artifact.parent_video_id = Some(parent);
        }
        if let Some(edit_prompt) = self.edit_prompt {
            artifact.edit_prompt = Some(edit_prompt);
        }
        if let Some(error) = self.error {
            artifact.error = Some(error);
        }
        if let Some(error_type) = self.error_type {
            artifact.error_type = Some(error_type);
        }
        if let Some(is_current) = self.is_current {
            artifact.is_current = Some(is_current);
        }

        if artifact.status != ArtifactStatus::Failed {
            artifact.error = None;
            artifact.error_type = None;
        }
        artifact.updated_at = now.max(artifact.created_at);

        artifact.validate()
    }
}

impl Artifact {
    /// Build a fresh record from a patch. The patch has to name a status.
    pub fn from_patch(
        id: &str,
        user_id: Option<String>,
        patch: ArtifactPatch,
        now: DateTime<Utc>,
    ) -> Result<Self, AppError> {
        let status = patch
            .status
            .ok_or_else(|| AppError::Validation("status is required for a new video".into()))?;

        let mut artifact = Self {
            id: id.to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            status,
            video_url: None,
            previous_video_url: None,
            code: None,
            title: None,
            description: None,
            parent_video_id: None,
            edit_prompt: None,
            error: None,
            error_type: None,
            is_current: None,
        };
        patch.apply(&mut artifact, now)?;
        Ok(artifact)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.id.trim().is_empty() {
            return Err(AppError::Validation("video id must not be empty".into()));
        }
        if self.status != ArtifactStatus::Completed
            && self.video_url.as_deref().is_some_and(|url| !url.is_empty())
        {
            return Err(AppError::Validation(format!(
                "a {} video cannot carry a video_url",
                self.status.as_str()
            )));
        }
        if self.parent_video_id.as_deref() == Some(self.id.as_str()) {
            return Err(AppError::Validation(
                "a video cannot be its own parent".into(),
            ));
        }
        Ok(())
    }

    pub fn is_owned_by(&self, user_id: Option<&str>) -> bool {
        self.user_id.as_deref() == user_id
    }

    pub fn is_public(&self) -> bool {
        self.status == ArtifactStatus::Completed
            && self.video_url.as_deref().is_some_and(|url| !url.is_empty())
    }

    pub async fn find_owned(
        id: &str,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        db.get_item::<Self>(id)
            .await?
            .filter(|artifact| artifact.is_owned_by(Some(user_id)))
            .ok_or_else(|| AppError::NotFound(format!("Video {id} not found")))
    }

    pub async fn children_of(
        id: &str,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let children: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE parent_video_id = $parent AND user_id = $user_id",
            )
            .bind(("table", Self::table_name()))
            .bind(("parent", id.to_string()))
            .bind(("user_id", user_id.to_string()))
            .await?
            .take(0)?;

        Ok(children)
    }

    pub async fn list_for_owner(
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let videos: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE user_id = $user_id
                 ORDER BY created_at DESC",
            )
            .bind(("table", Self::table_name()))
            .bind(("user_id", user_id.to_string()))
            .await?
            .take(0)?;

        Ok(videos)
    }
}

/// One row of a version history, newest first.
#[derive(Debug, Clone, serde::Serialize, PartialEq)]
pub struct HistoryEntry {
    pub id: String,
    pub prompt: String,
    pub status: ArtifactStatus,
    pub video_url: Option<String>,
    pub parent_video_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_current: bool,
}

/// Sort `versions` newest first and mark exactly one of them current: the
/// newest explicitly flagged version, or the newest overall.
pub fn build_history(mut versions: Vec<Artifact>) -> Vec<HistoryEntry> {
    versions.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });

    let current = versions
        .iter()
        .position(|version| version.is_current == Some(true))
        .unwrap_or(0);
    let total = versions.len();

    versions
        .into_iter()
        .enumerate()
        .map(|(index, version)| {
            let prompt = version
                .edit_prompt
                .clone()
                .or_else(|| version.title.clone())
                .unwrap_or_else(|| format!("Version {}", total.saturating_sub(index)));
            HistoryEntry {
                prompt,
                status: version.status,
                video_url: version.video_url,
                parent_video_id: version.parent_video_id,
                created_at: version.created_at,
                is_current: index == current,
                id: version.id,
            }
        })
        .collect()
}

/// Completed video as shown in the public gallery. Owner, code and errors stay
/// private.
#[derive(Debug, Clone, serde::Serialize, PartialEq)]
pub struct PublicArtifact {
    pub id: String,
    pub title: Option<String>,
    pub video_url: String,
    pub created_at: DateTime<Utc>,
}

impl PublicArtifact {
    pub fn project(artifact: Artifact) -> Option<Self> {
        if !artifact.is_public() {
            return None;
        }
        let video_url = artifact.video_url?;
        Some(Self {
            id: artifact.id,
            title: artifact.title,
            video_url,
            created_at: artifact.created_at,
        })
    }
}

/// Keyset position in the public listing: the last `(created_at, id)` seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicCursor {
    pub created_at: DateTime<Utc>,
    pub id: String,
}

impl PublicCursor {
    pub fn after(artifact: &PublicArtifact) -> Self {
        Self {
            created_at: artifact.created_at,
            id: artifact.id.clone(),
        }
    }

    pub fn encode(&self) -> String {
        format!(
            "{}|{}",
            self.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
            self.id
        )
    }

    pub fn decode(raw: &str) -> Result<Self, AppError> {
        let (timestamp, id) = raw
            .split_once('|')
            .ok_or_else(|| AppError::Validation("malformed cursor".into()))?;
        let created_at = DateTime::parse_from_rfc3339(timestamp)
            .map_err(|_| AppError::Validation("malformed cursor timestamp".into()))?
            .with_timezone(&Utc);
        if id.is_empty() {
            return Err(AppError::Validation("malformed cursor id".into()));
        }
        Ok(Self {
            created_at,
            id: id.to_string(),
        })
    }
}

#[derive(Deserialize)]
struct CountResult {
    count: usize,
}

const PUBLIC_FILTER: &str = "status = $completed AND type::is::string(video_url) AND video_url != ''";

impl Artifact {
    pub async fn count_public(db: &SurrealDbClient) -> Result<usize, AppError> {
        let query = format!(
            "SELECT count() AS count FROM type::table($table) WHERE {PUBLIC_FILTER} GROUP ALL"
        );
        let result: Option<CountResult> = db
            .client
            .query(query)
            .bind(("table", Self::table_name()))
            .bind(("completed", ArtifactStatus::Completed.as_str()))
            .await?
            .take(0)?;

        Ok(result.map_or(0, |r| r.count))
    }

    /// Offset page of the public listing. `limit = None` returns everything.
    pub async fn public_page(
        start: usize,
        limit: Option<usize>,
        db: &SurrealDbClient,
    ) -> Result<Vec<PublicArtifact>, AppError> {
        let mut query = format!(
            "SELECT * FROM type::table($table) WHERE {PUBLIC_FILTER}
             ORDER BY created_at DESC, id DESC"
        );
        if limit.is_some() {
            query.push_str(" LIMIT $limit START $start");
        }

        let videos: Vec<Self> = db
            .client
            .query(query)
            .bind(("table", Self::table_name()))
            .bind(("completed", ArtifactStatus::Completed.as_str()))
            .bind(("limit", limit.unwrap_or_default()))
            .bind(("start", start))
            .await?
            .take(0)?;

        Ok(videos.into_iter().filter_map(PublicArtifact::project).collect())
    }

    /// Keyset page of the public listing, strictly after `cursor`.
    pub async fn public_after(
        cursor: Option<&PublicCursor>,
        limit: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<PublicArtifact>, AppError> {
        let Some(cursor) = cursor else {
            return Self::public_page(0, Some(limit), db).await;
        };

        let query = format!(
            "SELECT * FROM type::table($table) WHERE {PUBLIC_FILTER}
               AND (created_at < $created_at
                    OR (created_at = $created_at AND id < type::thing($table, $cursor_id)))
             ORDER BY created_at DESC, id DESC
             LIMIT $limit"
        );
        let videos: Vec<Self> = db
            .client
            .query(query)
            .bind(("table", Self::table_name()))
            .bind(("completed", ArtifactStatus::Completed.as_str()))
            .bind(("created_at", surrealdb::sql::Datetime::from(cursor.created_at)))
            .bind(("cursor_id", cursor.id.clone()))
            .bind(("limit", limit))
            .await?
            .take(0)?;

        Ok(videos.into_iter().filter_map(PublicArtifact::project).collect())
    }

    pub async fn find_public(id: &str, db: &SurrealDbClient) -> Result<PublicArtifact, AppError> {
        db.get_item::<Self>(id)
            .await?
            .and_then(PublicArtifact::project)
            .ok_or_else(|| AppError::NotFound(format!("Video {id} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn completed(id: &str, url: &str) -> Artifact {
        Artifact::from_patch(
            id,
            Some("user-1".into()),
            ArtifactPatch {
                status: Some(ArtifactStatus::Completed),
                video_url: Some(url.into()),
                ..ArtifactPatch::default()
            },
            Utc::now(),
        )
        .expect("valid artifact")
    }

    #[test]
    fn changed_url_shifts_previous() {
        let mut artifact = completed("a", "v1");
        let patch = ArtifactPatch {
            video_url: Some("v2".into()),
            ..ArtifactPatch::default()
        };
        patch.apply(&mut artifact, Utc::now()).expect("merge");

        assert_eq!(artifact.video_url.as_deref(), Some("v2"));
        assert_eq!(artifact.previous_video_url.as_deref(), Some("v1"));
    }

    #[test]
    fn redelivered_patch_keeps_previous() {
        let mut artifact = completed("a", "v1");
        let patch = ArtifactPatch {
            status: Some(ArtifactStatus::Completed),
            video_url: Some("v2".into()),
            ..ArtifactPatch::default()
        };
        patch.clone().apply(&mut artifact, Utc::now()).expect("first");
        patch.apply(&mut artifact, Utc::now()).expect("second");

        assert_eq!(artifact.video_url.as_deref(), Some("v2"));
        assert_eq!(artifact.previous_video_url.as_deref(), Some("v1"));
    }

    #[test]
    fn explicit_null_clears_previous() {
        let mut artifact = completed("a", "v2");
        artifact.previous_video_url = Some("v1".into());

        let patch: ArtifactPatch =
            serde_json::from_str(r#"{"video_url":"v1","previous_video_url":null}"#)
                .expect("parse patch");
        assert_eq!(patch.previous_video_url, Some(None));
        patch.apply(&mut artifact, Utc::now()).expect("merge");

        assert_eq!(artifact.video_url.as_deref(), Some("v1"));
        assert_eq!(artifact.previous_video_url, None);
    }

    #[test]
    fn absent_previous_field_is_not_explicit() {
        let patch: ArtifactPatch =
            serde_json::from_str(r#"{"title":"Circles"}"#).expect("parse patch");
        assert_eq!(patch.previous_video_url, None);
    }

    #[test]
    fn previous_equal_to_current_is_dropped() {
        let mut artifact = completed("a", "v1");
        let patch = ArtifactPatch {
            previous_video_url: Some(Some("v1".into())),
            ..ArtifactPatch::default()
        };
        patch.apply(&mut artifact, Utc::now()).expect("merge");
        assert_eq!(artifact.previous_video_url, None);
    }

    #[test]
    fn unfinished_video_rejects_url() {
        let err = Artifact::from_patch(
            "a",
            None,
            ArtifactPatch {
                status: Some(ArtifactStatus::Processing),
                video_url: Some("v1".into()),
                ..ArtifactPatch::default()
            },
            Utc::now(),
        )
        .expect_err("processing with url");
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn new_video_requires_status() {
        let err = Artifact::from_patch("a", None, ArtifactPatch::default(), Utc::now())
            .expect_err("missing status");
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn completion_clears_stale_error() {
        let mut artifact = Artifact::from_patch(
            "a",
            None,
            ArtifactPatch {
                status: Some(ArtifactStatus::Failed),
                error: Some("boom".into()),
                error_type: Some("RENDER_ERROR".into()),
                ..ArtifactPatch::default()
            },
            Utc::now(),
        )
        .expect("failed artifact");
        assert_eq!(artifact.error.as_deref(), Some("boom"));

        ArtifactPatch {
            status: Some(ArtifactStatus::Completed),
            video_url: Some("v1".into()),
            ..ArtifactPatch::default()
        }
        .apply(&mut artifact, Utc::now())
        .expect("merge");
        assert!(artifact.error.is_none());
        assert!(artifact.error_type.is_none());
    }

    #[test]
    fn history_marks_newest_current() {
        let now = Utc::now();
        let mut root = completed("a", "v1");
        root.created_at = now;
        let mut first = completed("b", "v2");
        first.created_at = now + Duration::seconds(1);
        first.edit_prompt = Some("make it blue".into());
        let mut second = completed("c", "v3");
        second.created_at = now + Duration::seconds(2);

        let history = build_history(vec![first, root, second]);
        let ids: Vec<_> = history.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
        assert_eq!(history.iter().filter(|e| e.is_current).count(), 1);
        assert!(history.first().is_some_and(|e| e.is_current));
        assert_eq!(history.get(1).map(|e| e.prompt.as_str()), Some("make it blue"));
        assert_eq!(history.get(2).map(|e| e.prompt.as_str()), Some("Version 1"));
    }

    #[test]
    fn explicit_current_flag_wins() {
        let now = Utc::now();
        let mut root = completed("a", "v1");
        root.created_at = now;
        root.is_current = Some(true);
        let mut child = completed("b", "v2");
        child.created_at = now + Duration::seconds(1);

        let history = build_history(vec![root, child]);
        let current: Vec<_> = history.iter().filter(|e| e.is_current).collect();
        assert_eq!(current.len(), 1);
        assert_eq!(current.first().map(|e| e.id.as_str()), Some("a"));
    }

    #[test]
    fn public_projection_hides_unfinished() {
        let failed = Artifact::from_patch(
            "f",
            Some("user-1".into()),
            ArtifactPatch {
                status: Some(ArtifactStatus::Failed),
                ..ArtifactPatch::default()
            },
            Utc::now(),
        )
        .expect("failed artifact");
        assert!(PublicArtifact::project(failed).is_none());
        assert!(PublicArtifact::project(completed("a", "v1")).is_some());
    }

    #[test]
    fn cursor_survives_encoding() {
        let cursor = PublicCursor {
            created_at: Utc::now(),
            id: "3314dee6-727a-4fe4-bc68-b132c9abdf40".into(),
        };
        let decoded = PublicCursor::decode(&cursor.encode()).expect("decode");
        assert_eq!(decoded, cursor);
        assert!(PublicCursor::decode("garbage").is_err());
    }
}
