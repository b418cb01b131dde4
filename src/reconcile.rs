//! Two-way reconciliation between pulled records and native reminders
//!
//! Forward: open reminders in synced calendars that no record points at become
//! new tasks. Reverse: every record in a synced term gets a mirrored reminder,
//! and the reminder id is written back into the record's meta.
//!
//! Failures are per item. They are logged and counted, never fatal to the
//! sync cycle.

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::error::{ApiError, RemindersError};
use crate::http::WpClient;
use crate::models::{
    CalendarMapping, CalendarTarget, REMINDERS_ID_KEY, RemotePost, ReminderChanges, ReminderDraft,
    SiteConfiguration, Task, TaskField,
};
use crate::reminders::RemindersBridge;
use crate::sync::{PushOutcome, PushTarget, push_task};

/// Counts for one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Tasks created from reminders.
    pub imported: usize,
    /// Reminders created for records.
    pub created: usize,
    pub updated: usize,
    /// Reminders recreated in a different calendar.
    pub moved: usize,
    pub failed: usize,
}

pub(crate) struct Context<'a> {
    pub client: &'a WpClient,
    pub bridge: &'a dyn RemindersBridge,
    pub site: &'a SiteConfiguration,
    pub calendars: &'a CalendarMapping,
    pub target: &'a PushTarget<'a>,
}

/// Report plus the server copies of every record written during the pass.
#[derive(Debug, Default)]
pub(crate) struct ReconcileOutcome {
    pub report: ReconcileReport,
    pub records: Vec<RemotePost>,
}

#[derive(Debug, Error)]
enum ItemError {
    #[error(transparent)]
    Reminders(#[from] RemindersError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

pub(crate) async fn reconcile(ctx: &Context<'_>, records: &[RemotePost]) -> ReconcileOutcome {
    let mut outcome = ReconcileOutcome::default();
    let Some(terms_field) = ctx.target.terms_field else {
        return outcome;
    };

    import_reminders(ctx, records, &mut outcome).await;

    for record in records {
        let Some(CalendarTarget::Calendar(calendar_id)) = calendar_for(ctx, record, terms_field)
        else {
            continue;
        };

        match mirror_record(ctx, record, &calendar_id, &mut outcome.report).await {
            Ok(Some(post)) => outcome.records.push(post),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(id = record.id, error = %e, "Failed to mirror record to reminders");
                outcome.report.failed += 1;
            }
        }
    }

    tracing::info!(
        imported = outcome.report.imported,
        created = outcome.report.created,
        updated = outcome.report.updated,
        moved = outcome.report.moved,
        failed = outcome.report.failed,
        "Reminders reconciled"
    );

    outcome
}

/// The first of the record's terms that has a calendar decides.
fn calendar_for(ctx: &Context<'_>, record: &RemotePost, terms_field: &str) -> Option<CalendarTarget> {
    record
        .terms_for(terms_field)
        .into_iter()
        .filter_map(|id| ctx.site.term(id))
        .find_map(|term| ctx.site.effective_calendar(term, ctx.calendars))
}

/// Term id of every term whose reminders are synced, with its calendar.
fn synced_terms(ctx: &Context<'_>) -> Vec<(u64, String)> {
    ctx.site
        .taxonomy_terms
        .iter()
        .filter_map(|term| {
            let target = ctx.site.effective_calendar(term, ctx.calendars)?;
            Some((term.id, target.calendar_id()?.to_string()))
        })
        .collect()
}

async fn import_reminders(ctx: &Context<'_>, records: &[RemotePost], outcome: &mut ReconcileOutcome) {
    let synced = synced_terms(ctx);
    let mut calendar_ids: Vec<String> = synced.iter().map(|(_, c)| c.clone()).collect();
    calendar_ids.sort();
    calendar_ids.dedup();

    let reminders = match ctx.bridge.reminders(&calendar_ids).await {
        Ok(reminders) => reminders,
        Err(e) => {
            tracing::warn!(error = %e, "Could not read reminders");
            outcome.report.failed += 1;
            return;
        }
    };

    let tasks: Vec<Task> = reminders
        .into_iter()
        .filter(|r| !r.completed && !r.title.is_empty())
        .filter(|r| !records.iter().any(|p| p.reminders_id() == Some(r.id.as_str())))
        .filter_map(|reminder| {
            let (term, _) = synced.iter().find(|(_, c)| *c == reminder.calendar_id)?;
            let mut task = Task::new_local(vec![*term]);
            task.subject = reminder.title;
            task.note = reminder.notes.filter(|n| !n.is_empty());
            task.meta
                .insert(REMINDERS_ID_KEY.to_string(), Value::String(reminder.id));
            Some(task)
        })
        .collect();

    if tasks.is_empty() {
        return;
    }

    let results = join_all(tasks.iter().map(|t| push_task(ctx.client, ctx.target, t))).await;
    for (task, result) in tasks.iter().zip(results) {
        match result {
            Ok(PushOutcome::Created { post, .. }) => {
                outcome.report.imported += 1;
                outcome.records.push(post);
            }
            Ok(other) => tracing::debug!(outcome = ?other, "Unexpected outcome importing reminder"),
            Err(e) => {
                tracing::warn!(reminder = ?task.reminders_id(), error = %e, "Failed to import reminder");
                outcome.report.failed += 1;
            }
        }
    }
}

/// Bring the reminder mirroring `record` in line with it.
///
/// Returns the updated record when a new reminder id had to be written back.
async fn mirror_record(
    ctx: &Context<'_>,
    record: &RemotePost,
    calendar_id: &str,
    report: &mut ReconcileReport,
) -> Result<Option<RemotePost>, ItemError> {
    if let Some(reminder_id) = record.reminders_id() {
        // Only a reminder that is really gone gets recreated; a failed lookup
        // is counted and leaves the link alone.
        match ctx.bridge.reminder(reminder_id).await? {
            Some(reminder) if reminder.calendar_id != calendar_id => {
                ctx.bridge.delete_reminder(&reminder.id).await?;
                let new_id = ctx
                    .bridge
                    .create_reminder(calendar_id, &ReminderDraft::from_post(record))
                    .await?;
                report.moved += 1;
                return write_back(ctx, record, new_id).await;
            }
            Some(reminder) => {
                let changes = ReminderChanges::between(&reminder, record);
                if !changes.is_empty() {
                    ctx.bridge.update_reminder(&reminder.id, &changes).await?;
                    report.updated += 1;
                }
                return Ok(None);
            }
            None => {
                tracing::debug!(reminder = reminder_id, "Linked reminder no longer exists");
            }
        }
    }

    // Finished records are only mirrored while they already have a reminder.
    if record.is_trashed() {
        return Ok(None);
    }

    let new_id = ctx
        .bridge
        .create_reminder(calendar_id, &ReminderDraft::from_post(record))
        .await?;
    report.created += 1;
    write_back(ctx, record, new_id).await
}

/// Store the reminder id on the record with a meta-only update.
async fn write_back(
    ctx: &Context<'_>,
    record: &RemotePost,
    reminder_id: String,
) -> Result<Option<RemotePost>, ItemError> {
    let mut task = Task::from_remote(record, ctx.target.terms_field);
    task.meta
        .insert(REMINDERS_ID_KEY.to_string(), Value::String(reminder_id));
    task.changes.clear();
    task.touch(TaskField::Meta);

    match push_task(ctx.client, ctx.target, &task).await? {
        PushOutcome::Updated(post) => Ok(Some(post)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ClientOptions;
    use crate::models::TaxonomyTerm;
    use crate::reminders::NoReminders;
    use serde_json::json;

    fn term(id: u64, calendar: Option<&str>) -> TaxonomyTerm {
        let meta = match calendar {
            Some(c) => json!({ "reminders_calendar": c }),
            None => json!({}),
        };
        serde_json::from_value(json!({
            "id": id, "slug": format!("t{id}"), "name": format!("T{id}"), "meta": meta
        }))
        .unwrap()
    }

    fn record(id: u64, terms: &[u64]) -> RemotePost {
        serde_json::from_value(json!({
            "id": id,
            "title": { "raw": "Milk" },
            "excerpt": { "raw": "" },
            "status": "private",
            "meta": {},
            "notebook": terms,
        }))
        .unwrap()
    }

    #[test]
    fn first_term_with_a_calendar_decides() {
        let site = SiteConfiguration {
            taxonomy_terms: vec![term(1, None), term(2, Some("cal-b")), term(3, Some("cal-c"))],
            ..Default::default()
        };
        let mut calendars = CalendarMapping::new();
        calendars.insert(3, CalendarTarget::DoNotSync);

        let client = WpClient::new(&ClientOptions::default()).unwrap();
        let target = PushTarget {
            collection: "https://example.org/wp-json/wp/v2/todo",
            terms_field: Some("notebook"),
            inbox: None,
        };
        let ctx = Context {
            client: &client,
            bridge: &NoReminders,
            site: &site,
            calendars: &calendars,
            target: &target,
        };

        assert_eq!(
            calendar_for(&ctx, &record(9, &[1, 2, 3]), "notebook"),
            Some(CalendarTarget::Calendar("cal-b".into()))
        );
        assert_eq!(
            calendar_for(&ctx, &record(9, &[3, 2]), "notebook"),
            Some(CalendarTarget::DoNotSync)
        );
        assert_eq!(calendar_for(&ctx, &record(9, &[1]), "notebook"), None);
        assert_eq!(synced_terms(&ctx), vec![(2, "cal-b".to_string())]);
    }
}
