//! In-memory storage implementations.
//!
//! These back the integration tests and the CLI simulation. They track a
//! dirty flag per row the way a real store tracks sync status.

use crate::error::{SyncError, SyncResult};
use crate::history::{HistoryStorage, Place};
use crate::logins::{Login, LoginsStorage};
use crate::synchronizer::ApplyOutcome;
use colsync_protocol::{Guid, Timestamp, Visit};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone)]
struct PlaceRow {
    place: Place,
    visits: Vec<Visit>,
    dirty: bool,
    server_modified: Option<Timestamp>,
}

#[derive(Debug, Default)]
struct HistoryState {
    places: BTreeMap<Guid, PlaceRow>,
    pending_deletions: BTreeSet<Guid>,
    failing: BTreeSet<Guid>,
    done_applying: usize,
    done_updating: usize,
}

/// History storage held in memory.
#[derive(Debug, Default)]
pub struct MemoryHistoryStorage {
    state: RwLock<HistoryState>,
}

impl MemoryHistoryStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a local place change that needs uploading.
    pub fn insert_local_place(&self, place: Place, visits: Vec<Visit>) {
        let mut state = self.state.write();
        state.pending_deletions.remove(&place.guid);
        let row = state
            .places
            .entry(place.guid.clone())
            .or_insert_with(|| PlaceRow {
                place: place.clone(),
                visits: Vec::new(),
                dirty: true,
                server_modified: None,
            });
        row.place = place;
        for visit in visits {
            if !row.visits.contains(&visit) {
                row.visits.push(visit);
            }
        }
        row.dirty = true;
    }

    /// Deletes a place locally; the deletion is uploaded on the next sync.
    pub fn delete_local_place(&self, guid: &Guid) {
        let mut state = self.state.write();
        if state.places.remove(guid).is_some() {
            state.pending_deletions.insert(guid.clone());
        }
    }

    /// Makes applying records for `guid` fail.
    pub fn fail_applying(&self, guid: Guid) {
        self.state.write().failing.insert(guid);
    }

    /// Returns a place and its visits.
    pub fn place(&self, guid: &Guid) -> Option<(Place, Vec<Visit>)> {
        self.state
            .read()
            .places
            .get(guid)
            .map(|row| (row.place.clone(), row.visits.clone()))
    }

    /// Returns the server time a place was last synced at.
    pub fn server_modified(&self, guid: &Guid) -> Option<Timestamp> {
        self.state
            .read()
            .places
            .get(guid)
            .and_then(|row| row.server_modified)
    }

    /// Returns the number of places.
    pub fn len(&self) -> usize {
        self.state.read().places.len()
    }

    /// Returns true if there are no places.
    pub fn is_empty(&self) -> bool {
        self.state.read().places.is_empty()
    }

    /// Returns how often the download hook ran.
    pub fn done_applying_count(&self) -> usize {
        self.state.read().done_applying
    }

    /// Returns how often the upload hook ran.
    pub fn done_updating_count(&self) -> usize {
        self.state.read().done_updating
    }

    fn check_failing(state: &HistoryState, guid: &Guid) -> SyncResult<()> {
        if state.failing.contains(guid) {
            return Err(SyncError::Storage(format!("cannot write place {guid}")));
        }
        Ok(())
    }
}

impl HistoryStorage for MemoryHistoryStorage {
    fn delete_by_guid(&self, guid: &Guid, _deleted_at: Timestamp) -> SyncResult<()> {
        let mut state = self.state.write();
        Self::check_failing(&state, guid)?;
        state.places.remove(guid);
        state.pending_deletions.remove(guid);
        Ok(())
    }

    fn insert_or_update_place(&self, place: &Place, modified: Timestamp) -> SyncResult<()> {
        let mut state = self.state.write();
        Self::check_failing(&state, &place.guid)?;
        let row = state
            .places
            .entry(place.guid.clone())
            .or_insert_with(|| PlaceRow {
                place: place.clone(),
                visits: Vec::new(),
                dirty: false,
                server_modified: None,
            });
        row.place = place.clone();
        row.server_modified = Some(modified);
        Ok(())
    }

    fn store_remote_visits(&self, visits: &[Visit], guid: &Guid) -> SyncResult<()> {
        let mut state = self.state.write();
        let row = state
            .places
            .get_mut(guid)
            .ok_or_else(|| SyncError::Storage(format!("no place {guid}")))?;
        for visit in visits {
            if !row.visits.contains(visit) {
                row.visits.push(*visit);
            }
        }
        row.visits.sort_by_key(|v| v.date);
        Ok(())
    }

    fn deleted_history_to_upload(&self) -> SyncResult<Vec<Guid>> {
        Ok(self.state.read().pending_deletions.iter().cloned().collect())
    }

    fn modified_history_to_upload(&self) -> SyncResult<Vec<(Place, Vec<Visit>)>> {
        Ok(self
            .state
            .read()
            .places
            .values()
            .filter(|row| row.dirty)
            .map(|row| (row.place.clone(), row.visits.clone()))
            .collect())
    }

    fn mark_as_synchronized(&self, guids: &[Guid], modified: Timestamp) -> SyncResult<()> {
        let mut state = self.state.write();
        for guid in guids {
            if let Some(row) = state.places.get_mut(guid) {
                row.dirty = false;
                row.server_modified = Some(modified);
            }
        }
        Ok(())
    }

    fn mark_as_deleted(&self, guids: &[Guid]) -> SyncResult<()> {
        let mut state = self.state.write();
        for guid in guids {
            state.pending_deletions.remove(guid);
        }
        Ok(())
    }

    fn done_applying_records_after_download(&self) -> SyncResult<()> {
        self.state.write().done_applying += 1;
        Ok(())
    }

    fn done_updating_metadata_after_upload(&self) -> SyncResult<()> {
        self.state.write().done_updating += 1;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct LoginRow {
    login: Login,
    dirty: bool,
    server_modified: Option<Timestamp>,
}

#[derive(Debug, Default)]
struct LoginsState {
    logins: BTreeMap<Guid, LoginRow>,
    pending_deletions: BTreeSet<Guid>,
}

/// Login storage held in memory.
#[derive(Debug, Default)]
pub struct MemoryLoginsStorage {
    state: RwLock<LoginsState>,
}

impl MemoryLoginsStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or changes a login locally; the change is uploaded on the next
    /// sync.
    pub fn add_local_login(&self, login: Login) {
        let mut state = self.state.write();
        state.pending_deletions.remove(&login.guid);
        state.logins.insert(
            login.guid.clone(),
            LoginRow {
                login,
                dirty: true,
                server_modified: None,
            },
        );
    }

    /// Deletes a login locally; the deletion is uploaded on the next sync.
    pub fn delete_local_login(&self, guid: &Guid) {
        let mut state = self.state.write();
        if state.logins.remove(guid).is_some() {
            state.pending_deletions.insert(guid.clone());
        }
    }

    /// Returns a login.
    pub fn login(&self, guid: &Guid) -> Option<Login> {
        self.state
            .read()
            .logins
            .get(guid)
            .map(|row| row.login.clone())
    }

    /// Returns the server time a login was last synced at.
    pub fn server_modified(&self, guid: &Guid) -> Option<Timestamp> {
        self.state
            .read()
            .logins
            .get(guid)
            .and_then(|row| row.server_modified)
    }

    /// Returns the number of logins.
    pub fn len(&self) -> usize {
        self.state.read().logins.len()
    }

    /// Returns true if there are no logins.
    pub fn is_empty(&self) -> bool {
        self.state.read().logins.is_empty()
    }
}

impl LoginsStorage for MemoryLoginsStorage {
    fn delete_by_guid(&self, guid: &Guid, _deleted_at: Timestamp) -> SyncResult<()> {
        let mut state = self.state.write();
        state.logins.remove(guid);
        state.pending_deletions.remove(guid);
        Ok(())
    }

    fn apply_changed_login(&self, login: &Login, modified: Timestamp) -> SyncResult<ApplyOutcome> {
        let mut state = self.state.write();
        let had_local_change = state.pending_deletions.remove(&login.guid)
            || state.logins.get(&login.guid).is_some_and(|row| row.dirty);

        state.logins.insert(
            login.guid.clone(),
            LoginRow {
                login: login.clone(),
                dirty: false,
                server_modified: Some(modified),
            },
        );

        Ok(if had_local_change {
            ApplyOutcome::Reconciled
        } else {
            ApplyOutcome::Applied
        })
    }

    fn deleted_logins_to_upload(&self) -> SyncResult<Vec<Guid>> {
        Ok(self.state.read().pending_deletions.iter().cloned().collect())
    }

    fn modified_logins_to_upload(&self) -> SyncResult<Vec<Login>> {
        Ok(self
            .state
            .read()
            .logins
            .values()
            .filter(|row| row.dirty)
            .map(|row| row.login.clone())
            .collect())
    }

    fn mark_as_synchronized(&self, guids: &[Guid], modified: Timestamp) -> SyncResult<()> {
        let mut state = self.state.write();
        for guid in guids {
            if let Some(row) = state.logins.get_mut(guid) {
                row.dirty = false;
                row.server_modified = Some(modified);
            }
        }
        Ok(())
    }

    fn mark_as_deleted(&self, guids: &[Guid]) -> SyncResult<()> {
        let mut state = self.state.write();
        for guid in guids {
            state.pending_deletions.remove(guid);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colsync_protocol::VisitType;

    #[test]
    fn remote_visits_are_deduplicated() {
        let storage = MemoryHistoryStorage::new();
        let place = Place::new(Guid::new("p"), "https://a/", "A");
        let visits = [Visit::new(2, VisitType::Link), Visit::new(1, VisitType::Typed)];

        storage.insert_or_update_place(&place, 10).unwrap();
        storage.store_remote_visits(&visits, &place.guid).unwrap();
        storage.store_remote_visits(&visits, &place.guid).unwrap();

        let (_, stored) = storage.place(&place.guid).unwrap();
        assert_eq!(stored, vec![visits[1], visits[0]]);
        assert!(storage.modified_history_to_upload().unwrap().is_empty());
        assert_eq!(storage.server_modified(&place.guid), Some(10));
    }

    #[test]
    fn visits_need_a_place() {
        let storage = MemoryHistoryStorage::new();
        let result = storage.store_remote_visits(&[], &Guid::new("missing"));
        assert!(matches!(result, Err(SyncError::Storage(_))));
    }

    #[test]
    fn history_deletion_is_idempotent() {
        let storage = MemoryHistoryStorage::new();
        storage.insert_local_place(Place::new(Guid::new("p"), "https://a/", "A"), vec![]);

        storage.delete_by_guid(&Guid::new("p"), 5).unwrap();
        storage.delete_by_guid(&Guid::new("p"), 5).unwrap();
        assert!(storage.is_empty());
        assert!(storage.deleted_history_to_upload().unwrap().is_empty());
    }

    #[test]
    fn failing_guids_reject_writes() {
        let storage = MemoryHistoryStorage::new();
        storage.fail_applying(Guid::new("p"));
        let place = Place::new(Guid::new("p"), "https://a/", "A");
        assert!(storage.insert_or_update_place(&place, 1).is_err());
    }

    #[test]
    fn local_login_lifecycle() {
        let storage = MemoryLoginsStorage::new();
        let login = Login {
            guid: Guid::new("l"),
            hostname: "https://a".into(),
            password: "p".into(),
            ..Login::default()
        };
        storage.add_local_login(login.clone());
        assert_eq!(storage.modified_logins_to_upload().unwrap(), vec![login.clone()]);

        storage.mark_as_synchronized(&[Guid::new("l")], 7).unwrap();
        assert!(storage.modified_logins_to_upload().unwrap().is_empty());
        assert_eq!(storage.server_modified(&Guid::new("l")), Some(7));

        // A clean row is overwritten without reconciliation.
        assert_eq!(
            storage.apply_changed_login(&login, 8).unwrap(),
            ApplyOutcome::Applied
        );

        storage.delete_local_login(&Guid::new("l"));
        assert_eq!(
            storage.deleted_logins_to_upload().unwrap(),
            vec![Guid::new("l")]
        );

        // Remote change beats a local deletion.
        assert_eq!(
            storage.apply_changed_login(&login, 9).unwrap(),
            ApplyOutcome::Reconciled
        );
        assert!(storage.deleted_logins_to_upload().unwrap().is_empty());
        assert_eq!(storage.len(), 1);
    }
}
