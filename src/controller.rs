//! Session state for the interactive views: the confirmed record list, the
//! active filter spec, the derived visible list and the focused row.
//!
//! Every store call is synchronous. A mutation moves the controller from
//! `Idle` to `Pending(op)`; once the store acknowledges, local state is
//! patched by id and a full refetch brings in the canonical shape, ending in
//! `Reconciled`. A failed call reports a notice and returns to `Idle` with
//! local state untouched.

use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::codec::{from_preset, from_query_checked, to_preset, to_query};
use crate::filter::{derive_visible, Matcher};
use crate::models::{ApplicationRecord, FilterPreset, FilterSpec};
use crate::store::RecordStore;

const MAX_NOTICES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Info,
    Error,
}

/// Transient user-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOp {
    Fetch,
    Create,
    Update(i64),
    Delete(i64),
    FetchPresets,
    SavePreset(String),
    DeletePreset(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncPhase {
    #[default]
    Idle,
    Pending(PendingOp),
    Reconciled,
}

pub struct ViewController<'a> {
    store: &'a dyn RecordStore,
    records: Vec<ApplicationRecord>,
    presets: Vec<FilterPreset>,
    spec: FilterSpec,
    visible: Vec<i64>,
    focused: Option<usize>,
    phase: SyncPhase,
    notices: VecDeque<Notice>,
    mounted: bool,
}

impl<'a> ViewController<'a> {
    pub fn new(store: &'a dyn RecordStore) -> Self {
        Self {
            store,
            records: Vec::new(),
            presets: Vec::new(),
            spec: FilterSpec::default(),
            visible: Vec::new(),
            focused: None,
            phase: SyncPhase::Idle,
            notices: VecDeque::new(),
            mounted: false,
        }
    }

    /// Loads records and presets the first time it is called.
    pub fn mount(&mut self) {
        if self.mounted {
            return;
        }
        self.mounted = true;
        self.refetch();
        self.load_presets();
    }

    // --- Accessors ---

    pub fn records(&self) -> &[ApplicationRecord] {
        &self.records
    }

    pub fn presets(&self) -> &[FilterPreset] {
        &self.presets
    }

    pub fn spec(&self) -> &FilterSpec {
        &self.spec
    }

    pub fn phase(&self) -> &SyncPhase {
        &self.phase
    }

    pub fn focused(&self) -> Option<usize> {
        self.focused
    }

    /// Records in display order.
    pub fn visible(&self) -> Vec<&ApplicationRecord> {
        self.visible.iter().filter_map(|id| self.record(*id)).collect()
    }

    pub fn visible_ids(&self) -> &[i64] {
        &self.visible
    }

    pub fn focused_record(&self) -> Option<&ApplicationRecord> {
        let id = self.visible.get(self.focused?)?;
        self.record(*id)
    }

    pub fn record(&self, id: i64) -> Option<&ApplicationRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Current filters as a URL query string.
    pub fn query(&self) -> String {
        to_query(&self.spec)
    }

    // --- Notices ---

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }

    pub fn latest_notice(&self) -> Option<&Notice> {
        self.notices.back()
    }

    fn notify(&mut self, level: NoticeLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            NoticeLevel::Error => warn!("{}", message),
            _ => debug!("{}", message),
        }
        if self.notices.len() == MAX_NOTICES {
            self.notices.pop_front();
        }
        self.notices.push_back(Notice { level, message });
    }

    // --- Filter spec and focus ---

    /// The only way the filter spec changes. Focus is dropped whenever the visible
    /// list differs afterwards.
    pub fn set_spec(&mut self, spec: FilterSpec) {
        if spec == self.spec {
            return;
        }
        self.spec = spec;
        let before = std::mem::take(&mut self.visible);
        self.visible = self.derive_ids();
        if self.visible != before {
            self.focused = None;
        }
    }

    /// Edits a copy of the current filter spec and applies it.
    pub fn edit_spec(&mut self, edit: impl FnOnce(&mut FilterSpec)) {
        let mut next = self.spec.clone();
        edit(&mut next);
        self.set_spec(next);
    }

    /// Applies filters from a query string. Any value that cannot be decoded
    /// leaves the current filters in place and raises an error notice.
    pub fn apply_query(&mut self, query: &str) -> bool {
        let (spec, problems) = from_query_checked(query);
        if !problems.is_empty() {
            self.notify(
                NoticeLevel::Error,
                format!("Could not apply filters from query: {}", problems.join("; ")),
            );
            return false;
        }
        self.set_spec(spec);
        true
    }

    pub fn set_focus(&mut self, index: Option<usize>) {
        self.focused = index.filter(|i| *i < self.visible.len());
    }

    pub fn focus_next(&mut self) {
        if self.visible.is_empty() {
            return;
        }
        self.focused = Some(match self.focused {
            Some(i) if i + 1 < self.visible.len() => i + 1,
            Some(i) => i,
            None => 0,
        });
    }

    pub fn focus_prev(&mut self) {
        if self.visible.is_empty() {
            return;
        }
        self.focused = Some(self.focused.map_or(0, |i| i.saturating_sub(1)));
    }

    fn derive_ids(&self) -> Vec<i64> {
        derive_visible(&self.records, &self.spec)
            .into_iter()
            .map(|r| r.id)
            .collect()
    }

    /// Re-derives after the record list changed, keeping focus on the same
    /// record if it is still visible.
    fn rederive(&mut self) {
        let focused_id = self.focused.and_then(|i| self.visible.get(i).copied());
        self.visible = self.derive_ids();
        self.focused = focused_id.and_then(|id| self.visible.iter().position(|v| *v == id));
    }

    // --- Record operations ---

    /// Replaces local records with the store's list.
    pub fn refetch(&mut self) -> bool {
        self.phase = SyncPhase::Pending(PendingOp::Fetch);
        match self.store.list_records() {
            Ok(records) => {
                debug!("Fetched {} application(s)", records.len());
                self.records = records;
                self.rederive();
                self.phase = SyncPhase::Reconciled;
                true
            }
            Err(e) => {
                self.phase = SyncPhase::Idle;
                self.notify(NoticeLevel::Error, format!("Failed to load applications: {}", e));
                false
            }
        }
    }

    /// Creates `draft` and returns its id. The record is appended locally
    /// only after the store assigns the id.
    pub fn create(&mut self, draft: ApplicationRecord) -> Option<i64> {
        self.phase = SyncPhase::Pending(PendingOp::Create);
        let id = match self.store.create_record(&draft) {
            Ok(id) => id,
            Err(e) => {
                self.phase = SyncPhase::Idle;
                self.notify(NoticeLevel::Error, format!("Failed to add application: {}", e));
                return None;
            }
        };

        let record = draft.with_id(id);
        let hidden = !Matcher::new(&self.spec).matches(&record);
        self.records.push(record);
        self.rederive();
        self.notify(NoticeLevel::Success, format!("Added application #{}", id));
        if hidden {
            self.notify(
                NoticeLevel::Info,
                format!("Application #{} is hidden by the current filters", id),
            );
        }
        self.reconcile();
        Some(id)
    }

    /// Full-record update of `record.id`.
    pub fn update(&mut self, record: ApplicationRecord) -> bool {
        let id = record.id;
        self.phase = SyncPhase::Pending(PendingOp::Update(id));
        if let Err(e) = self.store.update_record(id, &record) {
            self.phase = SyncPhase::Idle;
            self.notify(NoticeLevel::Error, format!("Failed to update application #{}: {}", id, e));
            return false;
        }

        match self.records.iter_mut().find(|r| r.id == id) {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
        self.rederive();
        self.notify(NoticeLevel::Success, format!("Updated application #{}", id));
        self.reconcile();
        true
    }

    pub fn delete(&mut self, id: i64) -> bool {
        self.phase = SyncPhase::Pending(PendingOp::Delete(id));
        if let Err(e) = self.store.delete_record(id) {
            self.phase = SyncPhase::Idle;
            self.notify(NoticeLevel::Error, format!("Failed to delete application #{}: {}", id, e));
            return false;
        }

        self.records.retain(|r| r.id != id);
        self.rederive();
        self.phase = SyncPhase::Reconciled;
        self.notify(NoticeLevel::Success, format!("Deleted application #{}", id));
        true
    }

    // The optimistic shape stays on screen if this fails.
    fn reconcile(&mut self) {
        self.phase = SyncPhase::Pending(PendingOp::Fetch);
        match self.store.list_records() {
            Ok(records) => {
                self.records = records;
                self.rederive();
                self.phase = SyncPhase::Reconciled;
            }
            Err(e) => {
                self.phase = SyncPhase::Idle;
                self.notify(
                    NoticeLevel::Error,
                    format!("Saved, but refreshing the list failed: {}", e),
                );
            }
        }
    }

    // --- Presets ---

    pub fn load_presets(&mut self) -> bool {
        self.phase = SyncPhase::Pending(PendingOp::FetchPresets);
        match self.store.list_presets() {
            Ok(presets) => {
                self.presets = presets;
                self.phase = SyncPhase::Reconciled;
                true
            }
            Err(e) => {
                self.phase = SyncPhase::Idle;
                self.notify(NoticeLevel::Error, format!("Failed to load filter presets: {}", e));
                false
            }
        }
    }

    /// Saves the active filters under `name`, replacing a preset of that name.
    pub fn save_preset(&mut self, name: &str) -> Option<i64> {
        let name = name.trim();
        if name.is_empty() {
            self.notify(NoticeLevel::Error, "Please enter a name for this filter preset");
            return None;
        }
        let draft = match to_preset(name, &self.spec) {
            Ok(draft) => draft,
            Err(e) => {
                self.notify(NoticeLevel::Error, format!("Failed to encode filter preset: {}", e));
                return None;
            }
        };

        self.phase = SyncPhase::Pending(PendingOp::SavePreset(draft.name.clone()));
        let id = match self.store.save_preset(&draft.name, &draft.config) {
            Ok(id) => id,
            Err(e) => {
                self.phase = SyncPhase::Idle;
                self.notify(NoticeLevel::Error, format!("Failed to save filter preset: {}", e));
                return None;
            }
        };

        self.presets.retain(|p| p.name != draft.name && p.id != id);
        self.presets.push(FilterPreset {
            id,
            name: draft.name,
            config: draft.config,
        });
        self.presets.sort_by(|a, b| a.name.cmp(&b.name));
        self.phase = SyncPhase::Reconciled;
        self.notify(NoticeLevel::Success, format!("Saved filter preset '{}'", name));
        Some(id)
    }

    pub fn delete_preset(&mut self, id: i64) -> bool {
        self.phase = SyncPhase::Pending(PendingOp::DeletePreset(id));
        if let Err(e) = self.store.delete_preset(id) {
            self.phase = SyncPhase::Idle;
            self.notify(NoticeLevel::Error, format!("Failed to delete filter preset: {}", e));
            return false;
        }
        self.presets.retain(|p| p.id != id);
        self.phase = SyncPhase::Reconciled;
        self.notify(NoticeLevel::Success, "Filter preset deleted");
        true
    }

    /// Replaces the active filters with a loaded preset. A preset that fails
    /// to decode leaves them as they were.
    pub fn apply_preset(&mut self, id: i64) -> bool {
        let Some(preset) = self.presets.iter().find(|p| p.id == id).cloned() else {
            self.notify(NoticeLevel::Error, format!("No filter preset with id {}", id));
            return false;
        };
        self.apply_loaded(&preset)
    }

    pub fn apply_preset_named(&mut self, name: &str) -> bool {
        let Some(preset) = self.presets.iter().find(|p| p.name == name).cloned() else {
            self.notify(NoticeLevel::Error, format!("No filter preset named '{}'", name));
            return false;
        };
        self.apply_loaded(&preset)
    }

    fn apply_loaded(&mut self, preset: &FilterPreset) -> bool {
        match from_preset(preset) {
            Ok(spec) => {
                self.set_spec(spec);
                self.notify(NoticeLevel::Info, format!("Loaded filter preset '{}'", preset.name));
                true
            }
            Err(e) => {
                self.notify(
                    NoticeLevel::Error,
                    format!("Could not load filter preset '{}': {}", preset.name, e),
                );
                false
            }
        }
    }
}
