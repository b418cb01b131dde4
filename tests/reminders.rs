mod support;

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use wp_todo::models::{
    CalendarTarget, Reminder, ReminderCalendar, ReminderChanges, ReminderDraft, TaskId,
};
use wp_todo::reminders::{Permission, PermissionState};
use wp_todo::{MemoryReminders, RemindersBridge, RemindersError, SyncEngine};

use support::{COLLECTION, FakeWp};

fn reminders() -> Arc<MemoryReminders> {
    let store = Arc::new(MemoryReminders::new());
    store.add_calendar("cal-1", "Groceries");
    store.add_calendar("cal-2", "Errands");
    store
}

async fn engine(fake: &FakeWp, bridge: &Arc<MemoryReminders>) -> SyncEngine {
    fake.engine(Box::new(bridge.clone())).await
}

/// Reminders store whose single-reminder lookups fail.
struct BusyLookups(Arc<MemoryReminders>);

#[async_trait]
impl RemindersBridge for BusyLookups {
    fn is_available(&self) -> bool {
        self.0.is_available()
    }

    async fn permission(&self) -> Result<Permission, RemindersError> {
        self.0.permission().await
    }

    async fn request_permission(&self) -> Result<Permission, RemindersError> {
        self.0.request_permission().await
    }

    async fn calendars(&self) -> Result<Vec<ReminderCalendar>, RemindersError> {
        self.0.calendars().await
    }

    async fn reminders(&self, calendar_ids: &[String]) -> Result<Vec<Reminder>, RemindersError> {
        self.0.reminders(calendar_ids).await
    }

    async fn reminder(&self, _id: &str) -> Result<Option<Reminder>, RemindersError> {
        Err(RemindersError::Platform("store busy".into()))
    }

    async fn create_reminder(
        &self,
        calendar_id: &str,
        draft: &ReminderDraft,
    ) -> Result<String, RemindersError> {
        self.0.create_reminder(calendar_id, draft).await
    }

    async fn update_reminder(&self, id: &str, changes: &ReminderChanges) -> Result<(), RemindersError> {
        self.0.update_reminder(id, changes).await
    }

    async fn delete_reminder(&self, id: &str) -> Result<(), RemindersError> {
        self.0.delete_reminder(id).await
    }
}

#[tokio::test]
async fn only_changed_notes_are_sent() {
    let fake = FakeWp::start().await;
    fake.add_term(3, "groceries", json!({ "reminders_calendar": "cal-1" }));
    fake.seed_post_with(10, "Eggs", "private", &[3], json!({ "reminders_id": "r-1" }));
    fake.set_excerpt(10, "free range");

    let bridge = reminders();
    bridge.insert(Reminder {
        id: "r-1".into(),
        calendar_id: "cal-1".into(),
        title: "Eggs".into(),
        notes: Some("any".into()),
        completed: false,
    });

    let mut engine = engine(&fake, &bridge).await;
    let report = engine.sync().await.unwrap();

    assert_eq!(report.reminders.updated, 1);
    assert_eq!(
        bridge.updates(),
        vec![(
            "r-1".to_string(),
            ReminderChanges {
                notes: Some("free range".into()),
                ..Default::default()
            }
        )]
    );
    // Nothing was written back to the site.
    assert!(fake.requests_to("POST", &format!("{COLLECTION}/10")).is_empty());
}

#[tokio::test]
async fn records_and_reminders_flow_both_ways() {
    let fake = FakeWp::start().await;
    fake.add_term(3, "groceries", json!({ "reminders_calendar": "cal-1" }));
    fake.seed_post(10, "Eggs", "private", &[3]);

    let bridge = reminders();
    bridge.insert(Reminder {
        id: "r-2".into(),
        calendar_id: "cal-1".into(),
        title: "Bread".into(),
        notes: None,
        completed: false,
    });
    bridge.insert(Reminder {
        id: "r-3".into(),
        calendar_id: "cal-1".into(),
        title: "Already bought".into(),
        notes: None,
        completed: true,
    });

    let mut engine = engine(&fake, &bridge).await;
    let report = engine.sync().await.unwrap();
    assert_eq!(report.reminders.imported, 1);
    assert_eq!(report.reminders.created, 1);
    assert_eq!(report.reminders.failed, 0);

    // Reverse: Eggs got a reminder and its id was written back as meta only.
    let eggs = fake.post(10).unwrap();
    let eggs_reminder = eggs["meta"]["reminders_id"].as_str().unwrap().to_string();
    let mirrored = bridge.get(&eggs_reminder).unwrap();
    assert_eq!((mirrored.calendar_id.as_str(), mirrored.title.as_str()), ("cal-1", "Eggs"));

    let write_back = fake.requests_to("POST", &format!("{COLLECTION}/10"));
    assert_eq!(write_back.len(), 1);
    let body = write_back[0].body.clone().unwrap();
    assert_eq!(body.as_object().unwrap().keys().collect::<Vec<_>>(), vec!["meta"]);

    // Forward: the open reminder became a task in the mapped term.
    let creates = fake.requests_to("POST", COLLECTION);
    assert_eq!(creates.len(), 1);
    assert_eq!(
        creates[0].body,
        Some(json!({
            "title": "Bread",
            "status": "private",
            "meta": { "reminders_id": "r-2" },
            "notebook": [3],
        }))
    );

    let bread = engine.tasks().iter().find(|t| t.subject == "Bread").unwrap();
    assert!(!bread.id.is_temporary());
    assert_eq!(bread.reminders_id(), Some("r-2"));
    assert_eq!(
        engine.task(&TaskId::Remote(10)).unwrap().reminders_id(),
        Some(eggs_reminder.as_str())
    );

    // A second cycle finds everything linked.
    fake.clear_requests();
    let report = engine.sync().await.unwrap();
    assert_eq!(report.reminders.imported + report.reminders.created, 0);
    assert!(fake.requests().iter().all(|r| r.method == "GET"));
}

#[tokio::test]
async fn local_mapping_moves_reminders_between_calendars() {
    let fake = FakeWp::start().await;
    fake.add_term(3, "groceries", json!({ "reminders_calendar": "cal-1" }));
    fake.seed_post_with(10, "Eggs", "private", &[3], json!({ "reminders_id": "r-1" }));

    let bridge = reminders();
    bridge.insert(Reminder {
        id: "r-1".into(),
        calendar_id: "cal-1".into(),
        title: "Eggs".into(),
        notes: None,
        completed: false,
    });

    let mut engine = engine(&fake, &bridge).await;
    engine
        .map_reminders_calendar(3, CalendarTarget::Calendar("cal-2".into()))
        .unwrap();
    let report = engine.sync().await.unwrap();

    assert_eq!(report.reminders.moved, 1);
    assert!(bridge.get("r-1").is_none());

    let new_id = fake.post(10).unwrap()["meta"]["reminders_id"]
        .as_str()
        .unwrap()
        .to_string();
    assert_ne!(new_id, "r-1");
    assert_eq!(bridge.get(&new_id).unwrap().calendar_id, "cal-2");
}

#[tokio::test]
async fn finished_record_completes_its_reminder() {
    let fake = FakeWp::start().await;
    fake.add_term(3, "groceries", json!({ "reminders_calendar": "cal-1" }));
    fake.seed_post_with(10, "Eggs", "private", &[3], json!({ "reminders_id": "r-1" }));

    let bridge = reminders();
    bridge.insert(Reminder {
        id: "r-1".into(),
        calendar_id: "cal-1".into(),
        title: "Eggs".into(),
        notes: None,
        completed: false,
    });

    let mut engine = engine(&fake, &bridge).await;
    engine.sync().await.unwrap();

    engine.toggle_task(&TaskId::Remote(10)).unwrap();
    engine.sync().await.unwrap();

    assert!(bridge.get("r-1").unwrap().completed);
    assert!(engine.task(&TaskId::Remote(10)).is_none());
}

#[tokio::test]
async fn opted_out_terms_and_denied_permission_skip_reconciliation() {
    let fake = FakeWp::start().await;
    fake.add_term(3, "groceries", json!({ "reminders_calendar": "no" }));
    fake.seed_post(10, "Eggs", "private", &[3]);

    let bridge = reminders();
    let mut engine = engine(&fake, &bridge).await;
    let report = engine.sync().await.unwrap();
    assert_eq!(report.reminders.created, 0);
    assert!(bridge.all().is_empty());

    engine
        .map_reminders_calendar(3, CalendarTarget::Calendar("cal-1".into()))
        .unwrap();
    bridge.set_permission(Permission {
        state: PermissionState::Denied,
        can_ask_again: false,
    });
    engine.sync().await.unwrap();
    assert!(bridge.all().is_empty());
}

#[tokio::test]
async fn failed_lookup_is_counted_and_keeps_the_link() {
    let fake = FakeWp::start().await;
    fake.add_term(3, "groceries", json!({ "reminders_calendar": "cal-1" }));
    fake.seed_post_with(10, "Eggs", "private", &[3], json!({ "reminders_id": "r-1" }));

    let bridge = reminders();
    bridge.insert(Reminder {
        id: "r-1".into(),
        calendar_id: "cal-1".into(),
        title: "Eggs".into(),
        notes: None,
        completed: false,
    });

    let mut engine = fake.engine(Box::new(BusyLookups(bridge.clone()))).await;
    let report = engine.sync().await.unwrap();

    assert_eq!(report.reminders.failed, 1);
    assert_eq!(report.reminders.created, 0);
    assert_eq!(bridge.all().len(), 1);
    assert!(fake.requests_to("POST", &format!("{COLLECTION}/10")).is_empty());
    assert_eq!(fake.post(10).unwrap()["meta"]["reminders_id"], "r-1");
}

#[tokio::test]
async fn deleted_reminder_is_recreated_and_relinked() {
    let fake = FakeWp::start().await;
    fake.add_term(3, "groceries", json!({ "reminders_calendar": "cal-1" }));
    fake.seed_post_with(10, "Eggs", "private", &[3], json!({ "reminders_id": "r-gone" }));

    let bridge = reminders();
    let mut engine = engine(&fake, &bridge).await;
    let report = engine.sync().await.unwrap();

    assert_eq!(report.reminders.created, 1);
    assert_eq!(report.reminders.failed, 0);

    let new_id = fake.post(10).unwrap()["meta"]["reminders_id"]
        .as_str()
        .unwrap()
        .to_string();
    assert_ne!(new_id, "r-gone");
    let recreated = bridge.get(&new_id).unwrap();
    assert_eq!((recreated.calendar_id.as_str(), recreated.title.as_str()), ("cal-1", "Eggs"));
    assert_eq!(
        engine.task(&TaskId::Remote(10)).unwrap().reminders_id(),
        Some(new_id.as_str())
    );
}
