//! Domain data models shared by the engine, the store and the REST layer
//!
//! Remote records keep WordPress field names so they round-trip through the
//! local cache unchanged.

use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

/// Prefix that marks a locally minted, not yet accepted task id.
pub const TEMP_ID_PREFIX: &str = "new_";

/// Slug of the term new tasks fall into when they carry no terms.
pub const INBOX_SLUG: &str = "inbox";

/// Meta key holding the native reminder cross-reference.
pub const REMINDERS_ID_KEY: &str = "reminders_id";

/// Term meta key holding a server-side reminders calendar mapping.
pub const REMINDERS_CALENDAR_KEY: &str = "reminders_calendar";

/// Identity of a task: server assigned, or temporary until the first accepted push.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskId {
    Remote(u64),
    Temporary(String),
}

impl TaskId {
    /// Mint a fresh temporary id (`new_` + 9 alphanumerics).
    pub fn new_temporary() -> Self {
        use rand::Rng;
        let mut rng = rand::rng();
        let bytes: [u8; 9] = rng.random();

        const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

        let body: String = bytes
            .iter()
            .map(|b| ALPHABET[(*b as usize) % ALPHABET.len()] as char)
            .collect();

        TaskId::Temporary(format!("{}{}", TEMP_ID_PREFIX, body))
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, TaskId::Temporary(_))
    }

    pub fn remote(&self) -> Option<u64> {
        match self {
            TaskId::Remote(id) => Some(*id),
            TaskId::Temporary(_) => None,
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskId::Remote(id) => write!(f, "{}", id),
            TaskId::Temporary(id) => f.write_str(id),
        }
    }
}

impl FromStr for TaskId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with(TEMP_ID_PREFIX) {
            return Ok(TaskId::Temporary(s.to_string()));
        }
        s.parse::<u64>()
            .map(TaskId::Remote)
            .map_err(|_| format!("invalid task id: {}", s))
    }
}

impl Serialize for TaskId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TaskId::Remote(id) => serializer.serialize_u64(*id),
            TaskId::Temporary(id) => serializer.serialize_str(id),
        }
    }
}

impl<'de> Deserialize<'de> for TaskId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Number(u64),
            Text(String),
        }

        match RawId::deserialize(deserializer)? {
            RawId::Number(id) => Ok(TaskId::Remote(id)),
            RawId::Text(text) => text.parse().map_err(de::Error::custom),
        }
    }
}

/// Task attributes that can be mutated locally and pushed as a partial update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskField {
    Subject,
    Done,
    Note,
    Terms,
    Meta,
}

/// Local working copy of a to-do item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default)]
    pub terms: Vec<u64>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
    #[serde(default)]
    pub dirty: bool,
    #[serde(default)]
    pub deleted: bool,
    /// Fields mutated since the last time this record came from the server.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub changes: BTreeSet<TaskField>,
}

impl Task {
    /// An empty local task with a fresh temporary id.
    pub fn new_local(terms: Vec<u64>) -> Self {
        Self {
            id: TaskId::new_temporary(),
            subject: String::new(),
            done: false,
            note: None,
            terms,
            meta: Map::new(),
            dirty: true,
            deleted: false,
            changes: BTreeSet::new(),
        }
    }

    /// Clean task built from a pulled record.
    pub fn from_remote(post: &RemotePost, terms_field: Option<&str>) -> Self {
        let note = if post.excerpt.raw.is_empty() {
            None
        } else {
            Some(post.excerpt.raw.clone())
        };

        Self {
            id: TaskId::Remote(post.id),
            subject: post.title.raw.clone(),
            done: false,
            note,
            terms: terms_field.map(|f| post.terms_for(f)).unwrap_or_default(),
            meta: post.meta.clone(),
            dirty: false,
            deleted: false,
            changes: BTreeSet::new(),
        }
    }

    /// Record a local mutation of `field`.
    pub fn touch(&mut self, field: TaskField) {
        self.dirty = true;
        self.changes.insert(field);
    }

    pub fn reminders_id(&self) -> Option<&str> {
        reminders_id_in(&self.meta)
    }

    /// Whether the push phase considers this task at all.
    pub fn needs_push(&self) -> bool {
        self.dirty && !self.subject.is_empty()
    }
}

fn reminders_id_in(meta: &Map<String, Value>) -> Option<&str> {
    meta.get(REMINDERS_ID_KEY)
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

/// `{ "raw": ... }` wrapper returned for edit-context text fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawField {
    #[serde(default)]
    pub raw: String,
}

/// Post status as stored by WordPress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Publish,
    #[default]
    Private,
    Trash,
    Draft,
    Pending,
    Future,
    #[serde(other)]
    Other,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Publish => "publish",
            PostStatus::Private => "private",
            PostStatus::Trash => "trash",
            PostStatus::Draft => "draft",
            PostStatus::Pending => "pending",
            PostStatus::Future => "future",
            PostStatus::Other => "other",
        }
    }
}

/// A to-do record as returned by the collection endpoint (edit context)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemotePost {
    pub id: u64,
    #[serde(default)]
    pub title: RawField,
    #[serde(default)]
    pub excerpt: RawField,
    #[serde(default)]
    pub status: PostStatus,
    #[serde(default, deserialize_with = "lenient_map")]
    pub meta: Map<String, Value>,
    /// Everything else, including taxonomy term arrays keyed by `rest_base`.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RemotePost {
    pub fn terms_for(&self, rest_base: &str) -> Vec<u64> {
        self.fields
            .get(rest_base)
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_u64).collect())
            .unwrap_or_default()
    }

    pub fn reminders_id(&self) -> Option<&str> {
        reminders_id_in(&self.meta)
    }

    pub fn is_trashed(&self) -> bool {
        self.status == PostStatus::Trash
    }
}

/// WordPress returns `[]` instead of `{}` for empty meta; accept both.
fn lenient_map<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Href {
    pub href: String,
}

/// `_links` block of a REST descriptor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Links {
    #[serde(rename = "self", default, skip_serializing_if = "Vec::is_empty")]
    pub self_links: Vec<Href>,
    #[serde(rename = "wp:items", default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<Href>,
}

/// Content type descriptor from the `/types` endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentType {
    pub slug: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rest_base: String,
    #[serde(rename = "_links", default)]
    pub links: Links,
}

impl ContentType {
    pub fn items_url(&self) -> Option<&str> {
        self.links.items.first().map(|h| h.href.as_str())
    }
}

/// Taxonomy descriptor from the `/taxonomies` endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Taxonomy {
    pub slug: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rest_base: String,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(rename = "_links", default)]
    pub links: Links,
}

impl Taxonomy {
    pub fn items_url(&self) -> Option<&str> {
        self.links.items.first().map(|h| h.href.as_str())
    }

    /// Key under which posts carry this taxonomy's term ids.
    pub fn field_name(&self) -> &str {
        if self.rest_base.is_empty() {
            &self.slug
        } else {
            &self.rest_base
        }
    }
}

/// A folder/notebook term
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyTerm {
    pub id: u64,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parent: u64,
    #[serde(default, deserialize_with = "lenient_map")]
    pub meta: Map<String, Value>,
}

impl TaxonomyTerm {
    /// Calendar mapping stored on the server side, if any.
    pub fn server_calendar(&self) -> Option<CalendarTarget> {
        self.meta
            .get(REMINDERS_CALENDAR_KEY)
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .map(|c| CalendarTarget::from(c.to_string()))
    }
}

/// Where reminders of a term go
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CalendarTarget {
    DoNotSync,
    Calendar(String),
}

impl CalendarTarget {
    pub const DO_NOT_SYNC: &'static str = "no";

    pub fn calendar_id(&self) -> Option<&str> {
        match self {
            CalendarTarget::DoNotSync => None,
            CalendarTarget::Calendar(id) => Some(id),
        }
    }
}

impl From<String> for CalendarTarget {
    fn from(value: String) -> Self {
        if value.is_empty() || value == Self::DO_NOT_SYNC {
            CalendarTarget::DoNotSync
        } else {
            CalendarTarget::Calendar(value)
        }
    }
}

impl From<CalendarTarget> for String {
    fn from(value: CalendarTarget) -> Self {
        match value {
            CalendarTarget::DoNotSync => CalendarTarget::DO_NOT_SYNC.to_string(),
            CalendarTarget::Calendar(id) => id,
        }
    }
}

/// Term id -> reminders calendar, kept locally.
pub type CalendarMapping = BTreeMap<u64, CalendarTarget>;

/// A native reminders list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderCalendar {
    pub id: String,
    pub title: String,
}

/// A native reminder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub calendar_id: String,
    pub title: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub completed: bool,
}

/// Fields for a new native reminder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderDraft {
    pub title: String,
    pub notes: String,
    pub completed: bool,
}

impl ReminderDraft {
    pub fn from_post(post: &RemotePost) -> Self {
        Self {
            title: post.title.raw.clone(),
            notes: post.excerpt.raw.clone(),
            completed: post.is_trashed(),
        }
    }
}

/// Minimal update of a native reminder; `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReminderChanges {
    pub title: Option<String>,
    pub notes: Option<String>,
    pub completed: Option<bool>,
}

impl ReminderChanges {
    /// Field-by-field diff of `reminder` against the record it mirrors.
    pub fn between(reminder: &Reminder, post: &RemotePost) -> Self {
        let draft = ReminderDraft::from_post(post);
        let mut changes = Self::default();

        if reminder.title != draft.title {
            changes.title = Some(draft.title);
        }
        if reminder.notes.as_deref().unwrap_or_default() != draft.notes {
            changes.notes = Some(draft.notes);
        }
        if reminder.completed != draft.completed {
            changes.completed = Some(draft.completed);
        }

        changes
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.notes.is_none() && self.completed.is_none()
    }
}

/// Connection state and discovered capabilities of the site
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfiguration {
    pub connected: bool,
    /// REST base the site answered on; credentials never leave its origin.
    pub rest_root: String,
    pub site_home: String,
    pub site_title: String,
    pub site_icon_url: String,
    pub username: String,
    pub avatar_url: String,
    pub post_types: Vec<ContentType>,
    pub taxonomies: BTreeMap<String, Taxonomy>,
    pub post_type: String,
    pub taxonomy: Option<String>,
    pub taxonomy_terms: Vec<TaxonomyTerm>,
    pub default_term: Option<String>,
    pub reminders_calendars: Vec<ReminderCalendar>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl SiteConfiguration {
    /// Collection endpoint of the selected content type.
    pub fn collection_url(&self) -> Option<&str> {
        self.post_types
            .iter()
            .find(|t| t.slug == self.post_type)
            .and_then(ContentType::items_url)
    }

    pub fn selected_taxonomy(&self) -> Option<&Taxonomy> {
        self.taxonomy
            .as_deref()
            .filter(|slug| !slug.is_empty())
            .and_then(|slug| self.taxonomies.get(slug))
    }

    /// Post field carrying term ids, when a taxonomy is configured.
    pub fn terms_field(&self) -> Option<&str> {
        self.selected_taxonomy().map(Taxonomy::field_name)
    }

    pub fn terms_url(&self) -> Option<&str> {
        self.selected_taxonomy().and_then(Taxonomy::items_url)
    }

    pub fn term(&self, id: u64) -> Option<&TaxonomyTerm> {
        self.taxonomy_terms.iter().find(|t| t.id == id)
    }

    pub fn inbox_term(&self) -> Option<&TaxonomyTerm> {
        self.taxonomy_terms.iter().find(|t| t.slug == INBOX_SLUG)
    }

    /// Local mapping wins over the term's server-side meta.
    pub fn effective_calendar(
        &self,
        term: &TaxonomyTerm,
        mapping: &CalendarMapping,
    ) -> Option<CalendarTarget> {
        mapping
            .get(&term.id)
            .cloned()
            .or_else(|| term.server_calendar())
    }
}

/// Request body for creating or updating a post; only set fields are sent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostPayload {
    title: Option<String>,
    status: Option<PostStatus>,
    excerpt: Option<String>,
    meta: Option<Map<String, Value>>,
    terms: Option<(String, Vec<u64>)>,
}

impl PostPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn status(mut self, status: PostStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.excerpt = Some(excerpt.into());
        self
    }

    pub fn meta(mut self, meta: Map<String, Value>) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn terms(mut self, field: impl Into<String>, ids: Vec<u64>) -> Self {
        self.terms = Some((field.into(), ids));
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Payload for a brand new post.
    ///
    /// Own terms are attached when present, otherwise the inbox term; with
    /// neither, the taxonomy field is left out.
    pub fn for_create(task: &Task, terms_field: Option<&str>, inbox: Option<u64>) -> Self {
        let mut payload = Self::new().title(&task.subject).status(PostStatus::Private);

        if let Some(note) = task.note.as_deref().filter(|n| !n.is_empty()) {
            payload = payload.excerpt(note);
        }
        if !task.meta.is_empty() {
            payload = payload.meta(task.meta.clone());
        }
        if let Some(field) = terms_field {
            if !task.terms.is_empty() {
                payload = payload.terms(field, task.terms.clone());
            } else if let Some(inbox) = inbox {
                payload = payload.terms(field, vec![inbox]);
            }
        }

        payload
    }

    /// Payload carrying only the fields recorded in `task.changes`.
    pub fn for_update(task: &Task, terms_field: Option<&str>) -> Self {
        let mut payload = Self::new();

        for field in &task.changes {
            payload = match field {
                TaskField::Subject => payload.title(&task.subject),
                TaskField::Done => payload.status(if task.done {
                    PostStatus::Trash
                } else {
                    PostStatus::Private
                }),
                TaskField::Note => payload.excerpt(task.note.clone().unwrap_or_default()),
                TaskField::Meta => payload.meta(task.meta.clone()),
                TaskField::Terms => match terms_field {
                    Some(f) => payload.terms(f, task.terms.clone()),
                    None => payload,
                },
            };
        }

        payload
    }
}

impl Serialize for PostPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if let Some(title) = &self.title {
            map.serialize_entry("title", title)?;
        }
        if let Some(status) = &self.status {
            map.serialize_entry("status", status)?;
        }
        if let Some(excerpt) = &self.excerpt {
            map.serialize_entry("excerpt", excerpt)?;
        }
        if let Some(meta) = &self.meta {
            map.serialize_entry("meta", meta)?;
        }
        if let Some((field, ids)) = &self.terms {
            map.serialize_entry(field, ids)?;
        }
        map.end()
    }
}

/// How requests authenticate against the site
#[derive(Clone, Default, PartialEq, Eq)]
pub enum Credentials {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    Bearer {
        token: String,
    },
}

impl Credentials {
    /// A non-empty token wins; otherwise both username and password are needed.
    pub fn from_parts(username: &str, password: &str, token: &str) -> Self {
        if !token.is_empty() {
            Credentials::Bearer {
                token: token.to_string(),
            }
        } else if !username.is_empty() && !password.is_empty() {
            Credentials::Basic {
                username: username.to_string(),
                password: password.to_string(),
            }
        } else {
            Credentials::None
        }
    }

    pub fn is_present(&self) -> bool {
        !matches!(self, Credentials::None)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::None => f.write_str("None"),
            Credentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            Credentials::Bearer { .. } => f.debug_struct("Bearer").field("token", &"***").finish(),
        }
    }
}
