//! Native reminders capability
//!
//! The engine only talks to [`RemindersBridge`]. Platforms without a reminders
//! store use [`NoReminders`]; [`MemoryReminders`] keeps everything in process.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::RemindersError;
use crate::models::{Reminder, ReminderCalendar, ReminderChanges, ReminderDraft};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
    Undetermined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permission {
    pub state: PermissionState,
    pub can_ask_again: bool,
}

impl Permission {
    pub fn granted(&self) -> bool {
        self.state == PermissionState::Granted
    }
}

/// Read/write access to a platform reminders store
#[async_trait]
pub trait RemindersBridge: Send + Sync {
    /// Whether this platform has a reminders store at all.
    fn is_available(&self) -> bool;

    async fn permission(&self) -> Result<Permission, RemindersError>;

    async fn request_permission(&self) -> Result<Permission, RemindersError>;

    /// Calendars of the "reminder" kind.
    async fn calendars(&self) -> Result<Vec<ReminderCalendar>, RemindersError>;

    /// Reminders in any of `calendar_ids`.
    async fn reminders(&self, calendar_ids: &[String]) -> Result<Vec<Reminder>, RemindersError>;

    /// `Ok(None)` when the reminder no longer exists.
    async fn reminder(&self, id: &str) -> Result<Option<Reminder>, RemindersError>;

    /// Create a reminder and return its id.
    async fn create_reminder(
        &self,
        calendar_id: &str,
        draft: &ReminderDraft,
    ) -> Result<String, RemindersError>;

    async fn update_reminder(&self, id: &str, changes: &ReminderChanges) -> Result<(), RemindersError>;

    async fn delete_reminder(&self, id: &str) -> Result<(), RemindersError>;
}

/// A shared bridge, so callers can keep a handle on the store the engine uses.
#[async_trait]
impl<T: RemindersBridge + ?Sized> RemindersBridge for Arc<T> {
    fn is_available(&self) -> bool {
        (**self).is_available()
    }

    async fn permission(&self) -> Result<Permission, RemindersError> {
        (**self).permission().await
    }

    async fn request_permission(&self) -> Result<Permission, RemindersError> {
        (**self).request_permission().await
    }

    async fn calendars(&self) -> Result<Vec<ReminderCalendar>, RemindersError> {
        (**self).calendars().await
    }

    async fn reminders(&self, calendar_ids: &[String]) -> Result<Vec<Reminder>, RemindersError> {
        (**self).reminders(calendar_ids).await
    }

    async fn reminder(&self, id: &str) -> Result<Option<Reminder>, RemindersError> {
        (**self).reminder(id).await
    }

    async fn create_reminder(
        &self,
        calendar_id: &str,
        draft: &ReminderDraft,
    ) -> Result<String, RemindersError> {
        (**self).create_reminder(calendar_id, draft).await
    }

    async fn update_reminder(&self, id: &str, changes: &ReminderChanges) -> Result<(), RemindersError> {
        (**self).update_reminder(id, changes).await
    }

    async fn delete_reminder(&self, id: &str) -> Result<(), RemindersError> {
        (**self).delete_reminder(id).await
    }
}

/// Bridge for platforms without reminders
#[derive(Debug, Default, Clone, Copy)]
pub struct NoReminders;

#[async_trait]
impl RemindersBridge for NoReminders {
    fn is_available(&self) -> bool {
        false
    }

    async fn permission(&self) -> Result<Permission, RemindersError> {
        Ok(Permission {
            state: PermissionState::Denied,
            can_ask_again: false,
        })
    }

    async fn request_permission(&self) -> Result<Permission, RemindersError> {
        self.permission().await
    }

    async fn calendars(&self) -> Result<Vec<ReminderCalendar>, RemindersError> {
        Ok(Vec::new())
    }

    async fn reminders(&self, _calendar_ids: &[String]) -> Result<Vec<Reminder>, RemindersError> {
        Ok(Vec::new())
    }

    async fn reminder(&self, _id: &str) -> Result<Option<Reminder>, RemindersError> {
        Ok(None)
    }

    async fn create_reminder(
        &self,
        _calendar_id: &str,
        _draft: &ReminderDraft,
    ) -> Result<String, RemindersError> {
        Err(RemindersError::Unavailable)
    }

    async fn update_reminder(&self, _id: &str, _changes: &ReminderChanges) -> Result<(), RemindersError> {
        Err(RemindersError::Unavailable)
    }

    async fn delete_reminder(&self, _id: &str) -> Result<(), RemindersError> {
        Err(RemindersError::Unavailable)
    }
}

#[derive(Debug)]
struct MemoryState {
    permission: Permission,
    calendars: Vec<ReminderCalendar>,
    reminders: BTreeMap<String, Reminder>,
    updates: Vec<(String, ReminderChanges)>,
}

/// In-process reminders store
#[derive(Debug)]
pub struct MemoryReminders {
    state: Mutex<MemoryState>,
}

impl Default for MemoryReminders {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryReminders {
    /// Empty store that grants permission on request.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                permission: Permission {
                    state: PermissionState::Undetermined,
                    can_ask_again: true,
                },
                calendars: Vec::new(),
                reminders: BTreeMap::new(),
                updates: Vec::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_permission(&self, permission: Permission) {
        self.state().permission = permission;
    }

    pub fn add_calendar(&self, id: &str, title: &str) {
        self.state().calendars.push(ReminderCalendar {
            id: id.to_string(),
            title: title.to_string(),
        });
    }

    /// Insert a reminder directly, as if created by another app.
    pub fn insert(&self, reminder: Reminder) {
        self.state().reminders.insert(reminder.id.clone(), reminder);
    }

    pub fn get(&self, id: &str) -> Option<Reminder> {
        self.state().reminders.get(id).cloned()
    }

    pub fn all(&self) -> Vec<Reminder> {
        self.state().reminders.values().cloned().collect()
    }

    /// Every update applied so far, in order.
    pub fn updates(&self) -> Vec<(String, ReminderChanges)> {
        self.state().updates.clone()
    }
}

#[async_trait]
impl RemindersBridge for MemoryReminders {
    fn is_available(&self) -> bool {
        true
    }

    async fn permission(&self) -> Result<Permission, RemindersError> {
        Ok(self.state().permission)
    }

    async fn request_permission(&self) -> Result<Permission, RemindersError> {
        let mut state = self.state();
        if state.permission.state == PermissionState::Undetermined {
            state.permission = Permission {
                state: PermissionState::Granted,
                can_ask_again: false,
            };
        }
        Ok(state.permission)
    }

    async fn calendars(&self) -> Result<Vec<ReminderCalendar>, RemindersError> {
        Ok(self.state().calendars.clone())
    }

    async fn reminders(&self, calendar_ids: &[String]) -> Result<Vec<Reminder>, RemindersError> {
        Ok(self
            .state()
            .reminders
            .values()
            .filter(|r| calendar_ids.contains(&r.calendar_id))
            .cloned()
            .collect())
    }

    async fn reminder(&self, id: &str) -> Result<Option<Reminder>, RemindersError> {
        Ok(self.state().reminders.get(id).cloned())
    }

    async fn create_reminder(
        &self,
        calendar_id: &str,
        draft: &ReminderDraft,
    ) -> Result<String, RemindersError> {
        let mut state = self.state();
        if !state.calendars.iter().any(|c| c.id == calendar_id) {
            return Err(RemindersError::CalendarNotFound(calendar_id.to_string()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        state.reminders.insert(
            id.clone(),
            Reminder {
                id: id.clone(),
                calendar_id: calendar_id.to_string(),
                title: draft.title.clone(),
                notes: Some(draft.notes.clone()),
                completed: draft.completed,
            },
        );
        Ok(id)
    }

    async fn update_reminder(&self, id: &str, changes: &ReminderChanges) -> Result<(), RemindersError> {
        let mut state = self.state();
        let reminder = state
            .reminders
            .get_mut(id)
            .ok_or_else(|| RemindersError::NotFound(id.to_string()))?;

        if let Some(title) = &changes.title {
            reminder.title = title.clone();
        }
        if let Some(notes) = &changes.notes {
            reminder.notes = Some(notes.clone());
        }
        if let Some(completed) = changes.completed {
            reminder.completed = completed;
        }
        state.updates.push((id.to_string(), changes.clone()));
        Ok(())
    }

    async fn delete_reminder(&self, id: &str) -> Result<(), RemindersError> {
        self.state()
            .reminders
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RemindersError::NotFound(id.to_string()))
    }
}
