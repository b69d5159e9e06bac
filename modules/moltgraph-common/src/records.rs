// Wire records for the Moltbook API.
//
// The API's JSON has drifted between camelCase and snake_case field names
// across deployments, and several fields arrive either as a bare name string
// or as a full embedded object. Serde aliases and untagged refs absorb both,
// so every consumer downstream sees one shape. All fields are optional; a
// missing or null field must never clobber previously stored data, so the
// graph layer writes them with coalesce semantics.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

/// Parse the timestamp formats the API has been observed to emit:
/// RFC 3339 (with offset or `Z`) and bare ISO 8601 assumed UTC.
/// Anything else is treated as absent.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|n| n.and_utc())
}

fn de_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_datetime))
}

/// A platform account, either human- or bot-operated.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentRecord {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(alias = "displayName")]
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub karma: Option<i64>,
    #[serde(alias = "avatarUrl")]
    pub avatar_url: Option<String>,
    #[serde(alias = "followerCount")]
    pub follower_count: Option<i64>,
    #[serde(alias = "followingCount")]
    pub following_count: Option<i64>,
    #[serde(alias = "isClaimed")]
    pub is_claimed: Option<bool>,
    #[serde(alias = "isActive")]
    pub is_active: Option<bool>,
    pub owner_twitter_id: Option<String>,
    pub owner_twitter_handle: Option<String>,
    #[serde(alias = "createdAt", deserialize_with = "de_datetime")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(alias = "claimedAt", deserialize_with = "de_datetime")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(alias = "lastActive", deserialize_with = "de_datetime")]
    pub last_active: Option<DateTime<Utc>>,
    #[serde(alias = "updatedAt", deserialize_with = "de_datetime")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl AgentRecord {
    /// Minimal record carrying only the natural key.
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }
}

/// A named community.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SubmoltRecord {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(alias = "displayName")]
    pub display_name: Option<String>,
    pub description: Option<String>,
    #[serde(alias = "avatarUrl")]
    pub avatar_url: Option<String>,
    #[serde(alias = "bannerUrl")]
    pub banner_url: Option<String>,
    #[serde(alias = "bannerColor")]
    pub banner_color: Option<String>,
    #[serde(alias = "themeColor")]
    pub theme_color: Option<String>,
    #[serde(alias = "subscriberCount")]
    pub subscriber_count: Option<i64>,
    #[serde(alias = "postCount")]
    pub post_count: Option<i64>,
    #[serde(alias = "createdAt", deserialize_with = "de_datetime")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(alias = "updatedAt", deserialize_with = "de_datetime")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl SubmoltRecord {
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }

    /// Merge another observation of the same submolt, keeping the richest
    /// value seen so far for every field (newer present fields win).
    pub fn absorb(&mut self, other: &SubmoltRecord) {
        fn take<T: Clone>(slot: &mut Option<T>, new: &Option<T>) {
            if new.is_some() {
                *slot = new.clone();
            }
        }
        take(&mut self.id, &other.id);
        take(&mut self.display_name, &other.display_name);
        take(&mut self.description, &other.description);
        take(&mut self.avatar_url, &other.avatar_url);
        take(&mut self.banner_url, &other.banner_url);
        take(&mut self.banner_color, &other.banner_color);
        take(&mut self.theme_color, &other.theme_color);
        take(&mut self.subscriber_count, &other.subscriber_count);
        take(&mut self.post_count, &other.post_count);
        take(&mut self.created_at, &other.created_at);
        take(&mut self.updated_at, &other.updated_at);
    }
}

/// Author field: either a bare name string or an embedded agent object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AuthorRef {
    Name(String),
    Full(AgentRecord),
}

impl AuthorRef {
    pub fn name(&self) -> Option<&str> {
        match self {
            AuthorRef::Name(n) => Some(n.as_str()),
            AuthorRef::Full(a) => a.name.as_deref(),
        }
    }

    pub fn record(&self) -> Option<&AgentRecord> {
        match self {
            AuthorRef::Name(_) => None,
            AuthorRef::Full(a) => Some(a),
        }
    }
}

/// Submolt field on a post: bare name or embedded object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SubmoltRef {
    Name(String),
    Full(SubmoltRecord),
}

impl SubmoltRef {
    pub fn name(&self) -> Option<&str> {
        match self {
            SubmoltRef::Name(n) => Some(n.as_str()),
            SubmoltRef::Full(s) => s.name.as_deref(),
        }
    }

    pub fn record(&self) -> Option<&SubmoltRecord> {
        match self {
            SubmoltRef::Name(_) => None,
            SubmoltRef::Full(s) => Some(s),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PostRecord {
    pub id: Option<String>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub url: Option<String>,
    #[serde(rename = "type")]
    pub post_type: Option<String>,
    pub submolt: Option<SubmoltRef>,
    pub author: Option<AuthorRef>,
    pub author_name: Option<String>,
    pub author_id: Option<String>,
    pub score: Option<i64>,
    pub upvotes: Option<i64>,
    pub downvotes: Option<i64>,
    pub comment_count: Option<i64>,
    pub hot_score: Option<f64>,
    pub is_pinned: Option<bool>,
    pub is_locked: Option<bool>,
    // Opaque platform flag; stored as-is, no behavior keyed off it.
    pub is_deleted: Option<bool>,
    #[serde(alias = "createdAt", deserialize_with = "de_datetime")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(alias = "updatedAt", deserialize_with = "de_datetime")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Full nested comment tree, present on the post-detail endpoint.
    pub comments: Option<Vec<CommentRecord>>,
}

impl PostRecord {
    pub fn submolt_name(&self) -> Option<&str> {
        self.submolt.as_ref().and_then(|s| s.name())
    }

    /// Author name from the embedded object or the flat fallback field.
    pub fn author_name(&self) -> Option<&str> {
        self.author
            .as_ref()
            .and_then(|a| a.name())
            .or(self.author_name.as_deref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommentRecord {
    pub id: Option<String>,
    pub post_id: Option<String>,
    pub parent_id: Option<String>,
    pub content: Option<String>,
    pub score: Option<i64>,
    pub upvotes: Option<i64>,
    pub downvotes: Option<i64>,
    pub reply_count: Option<i64>,
    pub depth: Option<i64>,
    pub is_deleted: Option<bool>,
    pub author: Option<AuthorRef>,
    pub author_name: Option<String>,
    #[serde(alias = "createdAt", deserialize_with = "de_datetime")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(alias = "updatedAt", deserialize_with = "de_datetime")]
    pub updated_at: Option<DateTime<Utc>>,
    pub replies: Vec<CommentRecord>,
}

impl CommentRecord {
    pub fn author_name(&self) -> Option<&str> {
        self.author
            .as_ref()
            .and_then(|a| a.name())
            .or(self.author_name.as_deref())
    }
}

/// One entry of a moderator listing. The endpoint has returned four shapes:
/// `{name}`, `{agent_name}`, `{agent: "name"}` and `{agent: {<profile>}}`,
/// each with an optional role.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModeratorEntry {
    pub name: Option<String>,
    pub agent_name: Option<String>,
    #[serde(alias = "displayName")]
    pub display_name: Option<String>,
    pub role: Option<String>,
    pub agent: Option<AuthorRef>,
}

impl ModeratorEntry {
    /// Resolve the moderator's agent name from whichever field carries it.
    pub fn resolved_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .or(self.agent_name.as_deref())
            .or_else(|| self.agent.as_ref().and_then(|a| a.name()))
    }

    pub fn resolved_display_name(&self) -> Option<&str> {
        self.display_name.as_deref().or_else(|| {
            self.agent
                .as_ref()
                .and_then(|a| a.record())
                .and_then(|r| r.display_name.as_deref())
        })
    }

    /// The richest agent record this entry can yield: the embedded profile
    /// when present, otherwise a name-only record.
    pub fn agent_record(&self) -> Option<AgentRecord> {
        if let Some(full) = self.agent.as_ref().and_then(|a| a.record()) {
            if full.name.is_some() {
                return Some(full.clone());
            }
        }
        self.resolved_name().map(AgentRecord::named)
    }
}

/// One page of a paginated post listing.
#[derive(Debug, Clone, Default)]
pub struct PostPage {
    pub posts: Vec<PostRecord>,
    pub has_more: bool,
    pub next_offset: Option<i64>,
}

/// An external X (Twitter) account tied to an agent's human owner.
#[derive(Debug, Clone, Default)]
pub struct XAccountRecord {
    pub handle: String,
    pub url: Option<String>,
    pub name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub follower_count: Option<i64>,
    pub following_count: Option<i64>,
    pub is_verified: Option<bool>,
}

impl XAccountRecord {
    pub fn new(handle: &str) -> Self {
        Self {
            handle: handle.trim().trim_start_matches('@').to_string(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_accepts_both_casings() {
        let camel: AgentRecord = serde_json::from_value(serde_json::json!({
            "name": "claude_bot",
            "displayName": "Claude Bot",
            "avatarUrl": "https://cdn/a.png",
            "followerCount": 12,
            "isClaimed": true,
            "createdAt": "2025-01-02T03:04:05Z"
        }))
        .unwrap();
        assert_eq!(camel.display_name.as_deref(), Some("Claude Bot"));
        assert_eq!(camel.follower_count, Some(12));
        assert_eq!(camel.is_claimed, Some(true));
        assert!(camel.created_at.is_some());

        let snake: AgentRecord = serde_json::from_value(serde_json::json!({
            "name": "claude_bot",
            "display_name": "Claude Bot",
            "follower_count": 12,
            "is_claimed": false
        }))
        .unwrap();
        assert_eq!(snake.display_name.as_deref(), Some("Claude Bot"));
        assert_eq!(snake.is_claimed, Some(false));
    }

    #[test]
    fn unparseable_timestamps_become_absent() {
        let rec: AgentRecord = serde_json::from_value(serde_json::json!({
            "name": "x",
            "created_at": "not a date",
            "last_active": null
        }))
        .unwrap();
        assert!(rec.created_at.is_none());
        assert!(rec.last_active.is_none());
    }

    #[test]
    fn naive_timestamps_assume_utc() {
        let dt = parse_datetime("2025-06-07T01:02:03.000000").unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-06-07T01:02:03+00:00");
    }

    #[test]
    fn post_author_bare_or_embedded() {
        let bare: PostRecord = serde_json::from_value(serde_json::json!({
            "id": "p1",
            "author": "alice"
        }))
        .unwrap();
        assert_eq!(bare.author_name(), Some("alice"));

        let embedded: PostRecord = serde_json::from_value(serde_json::json!({
            "id": "p2",
            "author": {"name": "bob", "karma": 7}
        }))
        .unwrap();
        assert_eq!(embedded.author_name(), Some("bob"));
        assert_eq!(
            embedded.author.as_ref().unwrap().record().unwrap().karma,
            Some(7)
        );

        let fallback: PostRecord = serde_json::from_value(serde_json::json!({
            "id": "p3",
            "author_name": "carol"
        }))
        .unwrap();
        assert_eq!(fallback.author_name(), Some("carol"));
    }

    #[test]
    fn submolt_bare_or_embedded() {
        let bare: PostRecord =
            serde_json::from_value(serde_json::json!({"id": "p", "submolt": "rust"})).unwrap();
        assert_eq!(bare.submolt_name(), Some("rust"));

        let embedded: PostRecord = serde_json::from_value(serde_json::json!({
            "id": "p",
            "submolt": {"name": "rust", "subscriberCount": 99}
        }))
        .unwrap();
        assert_eq!(embedded.submolt_name(), Some("rust"));
        assert_eq!(
            embedded
                .submolt
                .as_ref()
                .unwrap()
                .record()
                .unwrap()
                .subscriber_count,
            Some(99)
        );
    }

    #[test]
    fn submolt_absorb_keeps_richest() {
        let mut seen = SubmoltRecord::named("rust");
        let rich: SubmoltRecord = serde_json::from_value(serde_json::json!({
            "name": "rust",
            "description": "all things rust",
            "subscriberCount": 10
        }))
        .unwrap();
        seen.absorb(&rich);
        // A later sparse sighting must not erase earlier fields.
        seen.absorb(&SubmoltRecord::named("rust"));
        assert_eq!(seen.description.as_deref(), Some("all things rust"));
        assert_eq!(seen.subscriber_count, Some(10));
    }

    #[test]
    fn moderator_wrapper_shapes() {
        let shapes = [
            serde_json::json!({"name": "alice", "role": "owner"}),
            serde_json::json!({"agent_name": "alice"}),
            serde_json::json!({"agent": "alice", "role": "mod"}),
            serde_json::json!({"agent": {"name": "alice", "displayName": "Alice"}, "role": "mod"}),
        ];
        for shape in shapes {
            let entry: ModeratorEntry = serde_json::from_value(shape).unwrap();
            assert_eq!(entry.resolved_name(), Some("alice"));
            assert!(entry.agent_record().is_some());
        }
        let embedded: ModeratorEntry = serde_json::from_value(serde_json::json!({
            "agent": {"name": "alice", "displayName": "Alice"}
        }))
        .unwrap();
        assert_eq!(embedded.resolved_display_name(), Some("Alice"));
    }

    #[test]
    fn nested_replies_deserialize() {
        let tree: CommentRecord = serde_json::from_value(serde_json::json!({
            "id": "c1",
            "content": "root",
            "replies": [
                {"id": "c2", "content": "child", "replies": [
                    {"id": "c3", "content": "grandchild"}
                ]}
            ]
        }))
        .unwrap();
        assert_eq!(tree.replies.len(), 1);
        assert_eq!(tree.replies[0].replies[0].id.as_deref(), Some("c3"));
    }

    #[test]
    fn x_account_strips_handle_prefix() {
        assert_eq!(XAccountRecord::new("@molty").handle, "molty");
        assert_eq!(XAccountRecord::new(" molty ").handle, "molty");
    }
}
