//! The sync engine: local mutations, then push → pull → reconcile on demand
//!
//! [`SyncEngine`] is the single context object of the application. It owns the
//! REST client, the local store, the reminders bridge, the site configuration
//! and the task collection. The presentation layer reads through its accessors
//! and changes tasks only through its mutation methods.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;

use crate::discovery::{self, HOSTED_API_BASE, HostedSite};
use crate::error::{ApiError, SyncError};
use crate::http::{ClientOptions, WpClient};
use crate::models::{
    CalendarMapping, CalendarTarget, Credentials, PostPayload, RemotePost, SiteConfiguration,
    Task, TaskField, TaskId, TaxonomyTerm,
};
use crate::pagination::{capped_url, fetch_all_pages, item_url};
use crate::reconcile::{self, ReconcileReport};
use crate::reminders::RemindersBridge;
use crate::store::Store;

/// Where a sync cycle currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Pushing,
    Pulling,
    Reconciling,
}

/// A task whose push was rejected
#[derive(Debug, Clone, Serialize)]
pub struct PushFailure {
    pub id: TaskId,
    pub error: String,
}

/// Summary of one sync cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Local-only tasks dropped without a request (done or deleted before their first push).
    pub discarded: usize,
    pub failed: Vec<PushFailure>,
    pub pulled: usize,
    pub reminders: ReconcileReport,
    pub synced_at: DateTime<Utc>,
}

impl SyncReport {
    /// Message for the presentation layer when some pushes failed.
    pub fn error_summary(&self) -> Option<String> {
        let first = self.failed.first()?;
        Some(format!(
            "{} task(s) failed to sync: {}",
            self.failed.len(),
            first.error
        ))
    }
}

/// Collection endpoint plus the bits of configuration a push needs.
pub(crate) struct PushTarget<'a> {
    pub collection: &'a str,
    pub terms_field: Option<&'a str>,
    pub inbox: Option<u64>,
}

/// Result of pushing one task
#[derive(Debug)]
pub(crate) enum PushOutcome {
    Created { temp: TaskId, post: RemotePost },
    Updated(RemotePost),
    Deleted(u64),
    Discarded(TaskId),
}

/// Send one task to the site.
///
/// Done or deleted tasks are deleted, temporary ids are created, anything else
/// is a partial update carrying only the changed fields.
pub(crate) async fn push_task(
    client: &WpClient,
    target: &PushTarget<'_>,
    task: &Task,
) -> Result<PushOutcome, ApiError> {
    if task.deleted || task.done {
        return match &task.id {
            TaskId::Remote(id) => {
                client.delete(&item_url(target.collection, id)).await?;
                Ok(PushOutcome::Deleted(*id))
            }
            TaskId::Temporary(_) => Ok(PushOutcome::Discarded(task.id.clone())),
        };
    }

    match &task.id {
        TaskId::Temporary(_) => {
            let payload = PostPayload::for_create(task, target.terms_field, target.inbox);
            let body = client.post(target.collection, &payload).await?;
            Ok(PushOutcome::Created {
                temp: task.id.clone(),
                post: into_post(target.collection, body)?,
            })
        }
        TaskId::Remote(id) => {
            let url = item_url(target.collection, id);
            let payload = update_payload(task, target.terms_field);
            let body = client.post(&url, &payload).await?;
            Ok(PushOutcome::Updated(into_post(&url, body)?))
        }
    }
}

/// Dirty records cached without a change set send every mutable field.
fn update_payload(task: &Task, terms_field: Option<&str>) -> PostPayload {
    if !task.changes.is_empty() {
        return PostPayload::for_update(task, terms_field);
    }

    let mut full = task.clone();
    full.changes = [TaskField::Subject, TaskField::Done, TaskField::Terms]
        .into_iter()
        .collect();
    if !full.meta.is_empty() {
        full.changes.insert(TaskField::Meta);
    }
    PostPayload::for_update(&full, terms_field)
}

fn into_post(url: &str, body: serde_json::Value) -> Result<RemotePost, ApiError> {
    serde_json::from_value(body).map_err(|source| ApiError::Shape {
        url: url.to_string(),
        source,
    })
}

/// Application-wide sync context; construct one per process
pub struct SyncEngine {
    client: WpClient,
    store: Store,
    bridge: Box<dyn RemindersBridge>,
    hosted_api_base: String,
    site_url: String,
    site: SiteConfiguration,
    tasks: Vec<Task>,
    calendars: CalendarMapping,
    phase: SyncPhase,
    last_error: Option<String>,
}

impl SyncEngine {
    pub fn new(
        store: Store,
        bridge: Box<dyn RemindersBridge>,
        options: &ClientOptions,
    ) -> Result<Self, SyncError> {
        Ok(Self {
            client: WpClient::new(options)?,
            store,
            bridge,
            hosted_api_base: HOSTED_API_BASE.to_string(),
            site_url: String::new(),
            site: SiteConfiguration::default(),
            tasks: Vec::new(),
            calendars: CalendarMapping::new(),
            phase: SyncPhase::Idle,
            last_error: None,
        })
    }

    /// Use a different REST host for WordPress.com sites.
    pub fn with_hosted_api_base(mut self, base: impl Into<String>) -> Self {
        self.hosted_api_base = base.into();
        self
    }

    /// Restore persisted state. Returns whether a sync should run right away.
    pub fn load(&mut self) -> Result<bool, SyncError> {
        let snapshot = self.store.load()?;

        self.site_url = snapshot.site_url;
        self.site = snapshot.site;
        self.tasks = snapshot.tasks;
        self.calendars = snapshot.calendars;
        self.client.set_credentials(snapshot.credentials);

        if !self.site.rest_root.is_empty()
            && let Err(e) = self.client.trust_origin_of(&self.site.rest_root)
        {
            tracing::warn!(error = %e, "Stored REST root is invalid");
        }

        tracing::info!(
            site = %self.site_url,
            tasks = self.tasks.len(),
            connected = self.site.connected,
            "Loaded stored state"
        );

        Ok(self.site.connected
            && !self.site_url.is_empty()
            && self.client.credentials().is_present())
    }

    // -- accessors -----------------------------------------------------------

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Visible tasks, optionally limited to one term.
    pub fn tasks_in_term(&self, term: Option<u64>) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| !t.deleted)
            .filter(|t| term.is_none_or(|id| t.terms.contains(&id)))
            .collect()
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    pub fn site(&self) -> &SiteConfiguration {
        &self.site
    }

    pub fn site_url(&self) -> &str {
        &self.site_url
    }

    pub fn terms(&self) -> &[TaxonomyTerm] {
        &self.site.taxonomy_terms
    }

    pub fn calendars(&self) -> &CalendarMapping {
        &self.calendars
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.site.connected
    }

    // -- setup ---------------------------------------------------------------

    /// Discover and authenticate against a self-hosted site.
    ///
    /// Returns whether the to-do plugin was detected; if not, the caller must
    /// pick a content type with [`SyncEngine::select_content_type`]. Nothing is
    /// committed when the attempt fails.
    pub async fn connect(&mut self, url: &str, credentials: Credentials) -> Result<bool, SyncError> {
        let mut client = self.client.clone();
        let discovery = discovery::connect(&mut client, url, credentials.clone()).await?;
        self.commit_connection(client, discovery, &credentials)
    }

    /// Connect a WordPress.com site with an OAuth token obtained elsewhere.
    pub async fn connect_hosted(&mut self, site: &HostedSite, token: &str) -> Result<bool, SyncError> {
        let mut client = self.client.clone();
        let discovery =
            discovery::connect_hosted(&mut client, &self.hosted_api_base, site, token).await?;
        let credentials = Credentials::Bearer {
            token: token.to_string(),
        };
        self.commit_connection(client, discovery, &credentials)
    }

    fn commit_connection(
        &mut self,
        client: WpClient,
        discovery: discovery::SiteDiscovery,
        credentials: &Credentials,
    ) -> Result<bool, SyncError> {
        let plugin_detected = discovery.plugin_detected;
        let site_url = discovery.site_url.clone();

        let mut site = self.site.clone();
        discovery.apply_to(&mut site);
        site.connected = plugin_detected;

        self.store.save_login(&site_url, credentials)?;
        self.store.save_site(&site)?;

        tracing::info!(site = %site_url, plugin_detected, "Connected");

        self.client = client;
        self.site_url = site_url;
        self.site = site;
        Ok(plugin_detected)
    }

    /// Choose the content type (and optional taxonomy) holding to-dos.
    pub fn select_content_type(
        &mut self,
        post_type: &str,
        taxonomy: Option<&str>,
    ) -> Result<(), SyncError> {
        let known = self
            .site
            .post_types
            .iter()
            .any(|t| t.slug == post_type && t.items_url().is_some());
        if !known {
            return Err(SyncError::MissingEndpoint(post_type.to_string()));
        }

        if let Some(slug) = taxonomy
            && !self.site.taxonomies.contains_key(slug)
        {
            return Err(SyncError::UnknownTaxonomy(slug.to_string()));
        }

        self.site.post_type = post_type.to_string();
        self.site.taxonomy = taxonomy.map(str::to_string);
        self.site.connected = true;
        self.store.save_site(&self.site)?;
        Ok(())
    }

    /// Forget the site, credentials and every cached task.
    pub fn logout(&mut self) -> Result<(), SyncError> {
        self.store.clear()?;
        self.client.set_credentials(Credentials::None);
        self.client.clear_trust();
        self.site_url.clear();
        self.site = SiteConfiguration::default();
        self.tasks.clear();
        self.calendars.clear();
        self.last_error = None;
        tracing::info!("Logged out");
        Ok(())
    }

    // -- local mutations -----------------------------------------------------

    /// Add an empty task at the top of the list and return its temporary id.
    pub fn create_empty_task(&mut self, filter: Option<u64>) -> Result<TaskId, SyncError> {
        let terms = filter.filter(|id| *id > 0).into_iter().collect();
        let task = Task::new_local(terms);
        let id = task.id.clone();
        self.tasks.insert(0, task);
        self.persist_tasks()?;
        Ok(id)
    }

    pub fn toggle_task(&mut self, id: &TaskId) -> Result<(), SyncError> {
        let task = self.task_mut(id)?;
        task.done = !task.done;
        task.touch(TaskField::Done);
        self.persist_tasks()
    }

    pub fn change_subject(&mut self, id: &TaskId, subject: impl Into<String>) -> Result<(), SyncError> {
        let task = self.task_mut(id)?;
        task.subject = subject.into();
        task.touch(TaskField::Subject);
        self.persist_tasks()
    }

    pub fn change_note(&mut self, id: &TaskId, note: Option<String>) -> Result<(), SyncError> {
        let task = self.task_mut(id)?;
        task.note = note.filter(|n| !n.is_empty());
        task.touch(TaskField::Note);
        self.persist_tasks()
    }

    pub fn set_terms(&mut self, id: &TaskId, terms: Vec<u64>) -> Result<(), SyncError> {
        let task = self.task_mut(id)?;
        task.terms = terms;
        task.touch(TaskField::Terms);
        self.persist_tasks()
    }

    /// Mark for deletion; tasks the server never saw are dropped at once.
    pub fn delete_task(&mut self, id: &TaskId) -> Result<(), SyncError> {
        if id.is_temporary() {
            let before = self.tasks.len();
            self.tasks.retain(|t| &t.id != id);
            if self.tasks.len() == before {
                return Err(SyncError::UnknownTask(id.clone()));
            }
        } else {
            let task = self.task_mut(id)?;
            task.deleted = true;
            task.dirty = true;
        }
        self.persist_tasks()
    }

    pub fn set_default_view(&mut self, view: Option<String>) -> Result<(), SyncError> {
        self.site.default_term = view;
        self.store.save_site(&self.site)?;
        Ok(())
    }

    pub fn map_reminders_calendar(&mut self, term_id: u64, target: CalendarTarget) -> Result<(), SyncError> {
        self.calendars.insert(term_id, target);
        self.store.save_calendars(&self.calendars)?;
        Ok(())
    }

    fn task_mut(&mut self, id: &TaskId) -> Result<&mut Task, SyncError> {
        self.tasks
            .iter_mut()
            .find(|t| &t.id == id)
            .ok_or_else(|| SyncError::UnknownTask(id.clone()))
    }

    fn persist_tasks(&self) -> Result<(), SyncError> {
        self.store.save_tasks(&self.tasks)?;
        Ok(())
    }

    // -- sync ----------------------------------------------------------------

    /// Run one push → pull → reconcile cycle.
    ///
    /// Push failures of single tasks do not fail the cycle; they are reported
    /// and kept dirty for the next one. Any other error leaves the cached
    /// collection as it was after the push phase.
    pub async fn sync(&mut self) -> Result<SyncReport, SyncError> {
        let result = self.run_cycle().await;
        self.phase = SyncPhase::Idle;

        match &result {
            Ok(report) => {
                self.last_error = report.error_summary();
                tracing::info!(
                    created = report.created,
                    updated = report.updated,
                    deleted = report.deleted,
                    failed = report.failed.len(),
                    pulled = report.pulled,
                    "Sync complete"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "Sync failed");
                self.last_error = Some(e.to_string());
            }
        }

        result
    }

    async fn run_cycle(&mut self) -> Result<SyncReport, SyncError> {
        if !self.site.connected {
            tracing::warn!("Bailing on sync, not connected");
            return Err(SyncError::NotConnected);
        }
        let Some(collection) = self.site.collection_url().map(str::to_string) else {
            tracing::warn!(post_type = %self.site.post_type, "Bailing on sync, no endpoint for content type");
            return Err(SyncError::MissingEndpoint(self.site.post_type.clone()));
        };

        let mut report = SyncReport::default();

        self.phase = SyncPhase::Pushing;
        let retained = self.push_phase(&collection, &mut report).await?;

        self.phase = SyncPhase::Pulling;
        let records = self.pull_phase(&collection, &retained, &mut report).await?;

        self.phase = SyncPhase::Reconciling;
        if self.reminders_enabled().await {
            report.reminders = self.reconcile_phase(&collection, &records).await;
        }

        report.synced_at = Utc::now();
        self.site.last_synced_at = Some(report.synced_at);
        self.store.save_site(&self.site)?;
        self.persist_tasks()?;

        Ok(report)
    }

    /// Push every dirty task concurrently; returns ids whose push failed.
    async fn push_phase(
        &mut self,
        collection: &str,
        report: &mut SyncReport,
    ) -> Result<Vec<TaskId>, SyncError> {
        let pending: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| t.needs_push())
            .cloned()
            .collect();

        if pending.is_empty() {
            return Ok(Vec::new());
        }

        tracing::info!(count = pending.len(), "Pushing dirty tasks");

        let terms_field = self.site.terms_field().map(str::to_string);
        let outcomes = {
            let target = PushTarget {
                collection,
                terms_field: terms_field.as_deref(),
                inbox: self.site.inbox_term().map(|t| t.id),
            };
            join_all(
                pending
                    .iter()
                    .map(|task| push_task(&self.client, &target, task)),
            )
            .await
        };

        let mut failed = Vec::new();
        for (task, outcome) in pending.iter().zip(outcomes) {
            match outcome {
                Ok(PushOutcome::Created { temp, post }) => {
                    self.replace_task(&temp, Task::from_remote(&post, terms_field.as_deref()));
                    report.created += 1;
                }
                Ok(PushOutcome::Updated(post)) => {
                    let id = TaskId::Remote(post.id);
                    self.replace_task(&id, Task::from_remote(&post, terms_field.as_deref()));
                    report.updated += 1;
                }
                Ok(PushOutcome::Deleted(id)) => {
                    self.tasks.retain(|t| t.id != TaskId::Remote(id));
                    report.deleted += 1;
                }
                Ok(PushOutcome::Discarded(id)) => {
                    self.tasks.retain(|t| t.id != id);
                    report.discarded += 1;
                }
                Err(e) => {
                    tracing::warn!(id = %task.id, error = %e, "Push failed");
                    report.failed.push(PushFailure {
                        id: task.id.clone(),
                        error: e.to_string(),
                    });
                    failed.push(task.id.clone());
                }
            }
        }

        self.persist_tasks()?;
        Ok(failed)
    }

    fn replace_task(&mut self, id: &TaskId, task: Task) {
        match self.tasks.iter_mut().find(|t| &t.id == id) {
            Some(slot) => *slot = task,
            None => self.tasks.insert(0, task),
        }
    }

    /// Refresh terms and pull every record; returns all records, trash included.
    async fn pull_phase(
        &mut self,
        collection: &str,
        retained: &[TaskId],
        report: &mut SyncReport,
    ) -> Result<Vec<RemotePost>, SyncError> {
        if let Some(terms_url) = self.site.terms_url().map(str::to_string) {
            let terms: Vec<TaxonomyTerm> = self.client.get_as(&capped_url(&terms_url)?).await?;
            tracing::debug!(count = terms.len(), "Refreshed taxonomy terms");
            self.site.taxonomy_terms = terms;
            self.store.save_site(&self.site)?;
        }

        if self.bridge.is_available() {
            match self.bridge.calendars().await {
                Ok(calendars) => {
                    self.site.reminders_calendars = calendars;
                    self.store.save_site(&self.site)?;
                }
                Err(e) => tracing::warn!(error = %e, "Could not list reminders calendars"),
            }
        }

        let (published, private, trashed) = futures::try_join!(
            fetch_all_pages::<RemotePost>(&self.client, collection, Some("publish")),
            fetch_all_pages::<RemotePost>(&self.client, collection, Some("private")),
            fetch_all_pages::<RemotePost>(&self.client, collection, Some("trash")),
        )?;
        let records: Vec<RemotePost> = published
            .into_iter()
            .chain(private)
            .chain(trashed)
            .collect();

        let terms_field = self.site.terms_field();
        let mut tasks: Vec<Task> = records
            .iter()
            .filter(|post| !post.is_trashed())
            .map(|post| Task::from_remote(post, terms_field))
            .collect();

        // Failed pushes survive the overwrite so the next cycle retries them.
        for id in retained.iter().rev() {
            let Some(local) = self.tasks.iter().find(|t| &t.id == id).cloned() else {
                continue;
            };
            match tasks.iter_mut().find(|t| t.id == local.id) {
                Some(slot) => *slot = local,
                None if local.id.is_temporary() => tasks.insert(0, local),
                None => tracing::info!(id = %local.id, "Dropping failed push, record is gone"),
            }
        }

        report.pulled = tasks.len();
        self.tasks = tasks;
        self.persist_tasks()?;

        Ok(records)
    }

    /// Reminders capability present, permitted, and at least one term mapped.
    async fn reminders_enabled(&self) -> bool {
        if !self.bridge.is_available() || self.site.terms_field().is_none() {
            return false;
        }

        let mapped = self.site.taxonomy_terms.iter().any(|term| {
            matches!(
                self.site.effective_calendar(term, &self.calendars),
                Some(CalendarTarget::Calendar(_))
            )
        });
        if !mapped {
            return false;
        }

        let permission = match self.bridge.permission().await {
            Ok(p) if !p.granted() && p.can_ask_again => self.bridge.request_permission().await,
            other => other,
        };
        match permission {
            Ok(p) if p.granted() => true,
            Ok(_) => {
                tracing::info!("Reminders permission not granted, skipping reconciliation");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not check reminders permission");
                false
            }
        }
    }

    async fn reconcile_phase(&mut self, collection: &str, records: &[RemotePost]) -> ReconcileReport {
        let terms_field = self.site.terms_field().map(str::to_string);
        let outcome = {
            let target = PushTarget {
                collection,
                terms_field: terms_field.as_deref(),
                inbox: self.site.inbox_term().map(|t| t.id),
            };
            let ctx = reconcile::Context {
                client: &self.client,
                bridge: self.bridge.as_ref(),
                site: &self.site,
                calendars: &self.calendars,
                target: &target,
            };
            reconcile::reconcile(&ctx, records).await
        };

        for post in &outcome.records {
            if post.is_trashed() {
                continue;
            }
            let id = TaskId::Remote(post.id);
            let fresh = Task::from_remote(post, terms_field.as_deref());
            match self.tasks.iter_mut().find(|t| t.id == id) {
                Some(slot) if !slot.dirty => *slot = fresh,
                Some(_) => {}
                None => self.tasks.insert(0, fresh),
            }
        }

        outcome.report
    }
}
