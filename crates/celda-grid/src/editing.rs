// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::{CellValue, ColumnId, GridRow, Patch, RowId};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommitReason {
    /// The cursor moved to another row while editing.
    RowChange,
    /// Edit mode ended on the same row.
    EditExit,
    RowAdd,
    /// The grid went away while the row was dirty.
    Unmount,
}

impl CommitReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RowChange => "row-change",
            Self::EditExit => "edit-exit",
            Self::RowAdd => "row-add",
            Self::Unmount => "unmount",
        }
    }
}

impl fmt::Display for CommitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellError {
    Failed,
    Message(String),
}

impl fmt::Display for CellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed => f.write_str("failed"),
            Self::Message(message) => f.write_str(message),
        }
    }
}

pub type FieldErrors = BTreeMap<ColumnId, CellError>;

/// Rejection reported by whoever persisted a row. Field detail, when present,
/// pins the failure to specific cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitFailure {
    pub message: Option<String>,
    pub fields: Option<FieldErrors>,
}

impl CommitFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            fields: None,
        }
    }

    pub fn with_field(mut self, column: impl Into<ColumnId>, error: CellError) -> Self {
        self.fields
            .get_or_insert_with(FieldErrors::new)
            .insert(column.into(), error);
        self
    }
}

impl fmt::Display for CommitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.message, &self.fields) {
            (Some(message), _) => f.write_str(message),
            (None, Some(fields)) => {
                let names = fields
                    .keys()
                    .map(ColumnId::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "rejected fields: {names}")
            }
            (None, None) => f.write_str("row rejected"),
        }
    }
}

impl std::error::Error for CommitFailure {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOp {
    Commit,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// The request was never sent (nothing to commit, or already pending).
    Skipped,
    Succeeded,
    Failed,
}

#[derive(Debug, Default)]
struct SettleSlot {
    outcome: Option<SettleOutcome>,
    waker: Option<Waker>,
}

type SharedSlot = Arc<Mutex<SettleSlot>>;

fn lock(slot: &SharedSlot) -> MutexGuard<'_, SettleSlot> {
    slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn resolve(slot: &SharedSlot, outcome: SettleOutcome) {
    let mut guard = lock(slot);
    guard.outcome = Some(outcome);
    if let Some(waker) = guard.waker.take() {
        waker.wake();
    }
}

/// Resolves once the row's pending flag clears. Never fails: a rejected
/// commit resolves to [`SettleOutcome::Failed`] and shows up in the error map.
#[derive(Debug)]
pub struct Settled {
    slot: Option<SharedSlot>,
}

impl Settled {
    /// Already resolved to [`SettleOutcome::Skipped`].
    pub fn skipped() -> Self {
        Self { slot: None }
    }

    pub fn outcome(&self) -> Option<SettleOutcome> {
        match &self.slot {
            None => Some(SettleOutcome::Skipped),
            Some(slot) => lock(slot).outcome,
        }
    }
}

impl Future for Settled {
    type Output = SettleOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(slot) = &self.slot else {
            return Poll::Ready(SettleOutcome::Skipped);
        };
        let mut guard = lock(slot);
        match guard.outcome {
            Some(outcome) => Poll::Ready(outcome),
            None => {
                guard.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

#[derive(Debug)]
struct Settlement {
    row: RowId,
    attempt: u64,
    result: Result<(), CommitFailure>,
}

/// One-shot completion handle carried by every request. Consuming it is the
/// only way to settle, so a request settles at most once; dropping it unsettled
/// counts as a failure so the row never stays pending forever.
#[derive(Debug)]
pub struct Completion {
    row: RowId,
    attempt: u64,
    tx: Option<Sender<Settlement>>,
}

impl Completion {
    pub fn row_id(&self) -> &RowId {
        &self.row
    }

    pub fn succeed(mut self) {
        self.send(Ok(()));
    }

    pub fn fail(mut self, failure: CommitFailure) {
        self.send(Err(failure));
    }

    fn send(&mut self, result: Result<(), CommitFailure>) {
        if let Some(tx) = self.tx.take() {
            let settlement = Settlement {
                row: self.row.clone(),
                attempt: self.attempt,
                result,
            };
            if tx.send(settlement).is_err() {
                log::debug!("row {} settled after its editor was dropped", self.row);
            }
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.tx.is_some() {
            log::warn!("completion for row {} dropped without settling", self.row);
            self.send(Err(CommitFailure::new("completion dropped")));
        }
    }
}

#[derive(Debug)]
pub struct RowCommit<T> {
    pub row_index: usize,
    pub row_id: RowId,
    pub patch: Patch,
    pub full: T,
    pub reason: CommitReason,
    pub completion: Completion,
}

#[derive(Debug)]
pub struct RowDelete<T> {
    pub row_index: usize,
    pub row_id: RowId,
    pub full: T,
    pub completion: Completion,
}

#[derive(Debug)]
pub enum RowRequest<T> {
    Commit(RowCommit<T>),
    Delete(RowDelete<T>),
}

#[derive(Debug)]
struct Attempt {
    id: u64,
    op: PendingOp,
    patch: Patch,
    slot: SharedSlot,
}

/// Per-row edit state. Only rows with a draft, an outstanding request, or
/// errors have an entry; a clean row has none.
#[derive(Debug, Default)]
pub struct RowEditState {
    draft: Patch,
    pending: Option<Attempt>,
    errors: FieldErrors,
}

impl RowEditState {
    pub fn draft(&self) -> &Patch {
        &self.draft
    }

    pub fn pending(&self) -> Option<PendingOp> {
        self.pending.as_ref().map(|attempt| attempt.op)
    }

    pub fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    fn is_clean(&self) -> bool {
        self.draft.is_empty() && self.pending.is_none() && self.errors.is_empty()
    }
}

pub type RowPredicate<T> = Box<dyn Fn(&T) -> bool>;

/// Draft, pending and error bookkeeping for every row, plus the outbox of
/// commit and delete requests awaiting a persistence collaborator.
pub struct RowEditor<T> {
    rows: HashMap<RowId, RowEditState>,
    outbox: VecDeque<RowRequest<T>>,
    tx: Sender<Settlement>,
    rx: Receiver<Settlement>,
    next_attempt: u64,
    editable: Option<RowPredicate<T>>,
}

impl<T> fmt::Debug for RowEditor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowEditor")
            .field("rows", &self.rows)
            .field("outbox", &self.outbox.len())
            .finish_non_exhaustive()
    }
}

/// Outstanding [`Settled`] futures resolve when the editor goes away: unsent
/// requests are dropped, settlements already received keep their outcome and
/// everything else still pending resolves as failed.
impl<T> Drop for RowEditor<T> {
    fn drop(&mut self) {
        self.outbox.clear();
        while let Ok(settlement) = self.rx.try_recv() {
            let Some(state) = self.rows.get_mut(&settlement.row) else {
                continue;
            };
            let attempt = settlement.attempt;
            if let Some(pending) = state.pending.take_if(|pending| pending.id == attempt) {
                let outcome = match settlement.result {
                    Ok(()) => SettleOutcome::Succeeded,
                    Err(_) => SettleOutcome::Failed,
                };
                resolve(&pending.slot, outcome);
            }
        }
        for state in self.rows.values() {
            if let Some(pending) = &state.pending {
                resolve(&pending.slot, SettleOutcome::Failed);
            }
        }
    }
}

impl<T: GridRow> Default for RowEditor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: GridRow> RowEditor<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            rows: HashMap::new(),
            outbox: VecDeque::new(),
            tx,
            rx,
            next_attempt: 1,
            editable: None,
        }
    }

    pub fn with_editable(mut self, predicate: impl Fn(&T) -> bool + 'static) -> Self {
        self.editable = Some(Box::new(predicate));
        self
    }

    pub fn set_editable(&mut self, predicate: Option<RowPredicate<T>>) {
        self.editable = predicate;
    }

    pub fn state(&self, id: &RowId) -> Option<&RowEditState> {
        self.rows.get(id)
    }

    pub fn get_cell_value(&self, row: &T, column: &ColumnId) -> CellValue {
        self.rows
            .get(&row.row_id())
            .and_then(|state| state.draft.get(column))
            .cloned()
            .unwrap_or_else(|| row.field(column))
    }

    /// Clears the field's error, then records `next` in the draft unless it
    /// matches the original, in which case the field leaves the draft.
    pub fn set_row_field(&mut self, row: &T, column: &ColumnId, next: CellValue) {
        let id = row.row_id();
        let original = row.field(column);
        let state = self.rows.entry(id.clone()).or_default();
        state.errors.remove(column);
        if next == original {
            state.draft.remove(column);
        } else {
            state.draft.insert(column.clone(), next);
        }
        self.gc(&id);
    }

    pub fn row_patch(&self, id: &RowId) -> Option<&Patch> {
        self.rows
            .get(id)
            .map(|state| &state.draft)
            .filter(|draft| !draft.is_empty())
    }

    pub fn is_row_pending(&self, id: &RowId) -> bool {
        self.rows
            .get(id)
            .is_some_and(|state| state.pending.is_some())
    }

    pub fn is_row_error(&self, id: &RowId) -> bool {
        self.rows
            .get(id)
            .is_some_and(|state| !state.errors.is_empty())
    }

    pub fn is_cell_dirty(&self, id: &RowId, column: &ColumnId) -> bool {
        self.rows
            .get(id)
            .is_some_and(|state| state.draft.contains_key(column))
    }

    pub fn cell_error(&self, id: &RowId, column: &ColumnId) -> Option<&CellError> {
        self.rows.get(id).and_then(|state| state.errors.get(column))
    }

    /// The caller's predicate alone, ignoring whether a request is pending.
    pub fn is_row_editable_base(&self, row: &T) -> bool {
        self.editable.as_ref().is_none_or(|predicate| predicate(row))
    }

    pub fn is_row_editable(&self, row: &T) -> bool {
        self.is_row_editable_base(row) && !self.is_row_pending(&row.row_id())
    }

    /// Rows holding a non-empty draft.
    pub fn dirty_rows(&self) -> impl Iterator<Item = &RowId> {
        self.rows
            .iter()
            .filter(|(_, state)| !state.draft.is_empty())
            .map(|(id, _)| id)
    }

    fn begin(&mut self, id: &RowId, op: PendingOp, patch: Patch) -> (Completion, SharedSlot) {
        let attempt = self.next_attempt;
        self.next_attempt += 1;
        let slot = SharedSlot::default();
        let state = self.rows.entry(id.clone()).or_default();
        state.errors.clear();
        state.pending = Some(Attempt {
            id: attempt,
            op,
            patch,
            slot: Arc::clone(&slot),
        });
        let completion = Completion {
            row: id.clone(),
            attempt,
            tx: Some(self.tx.clone()),
        };
        (completion, slot)
    }

    pub fn commit_row(&mut self, index: usize, row: &T, reason: CommitReason) -> bool {
        self.start_commit(index, row, reason).is_some()
    }

    pub fn commit_row_settled(&mut self, index: usize, row: &T, reason: CommitReason) -> Settled {
        match self.start_commit(index, row, reason) {
            Some(slot) => Settled { slot: Some(slot) },
            None => Settled::skipped(),
        }
    }

    fn start_commit(&mut self, index: usize, row: &T, reason: CommitReason) -> Option<SharedSlot> {
        let id = row.row_id();
        if self.is_row_pending(&id) {
            return None;
        }
        let patch = self.row_patch(&id)?.clone();
        let full = row.merged(&patch);
        let (completion, slot) = self.begin(&id, PendingOp::Commit, patch.clone());
        log::debug!(
            "commit row {id} ({reason}) with {} changed field(s)",
            patch.len()
        );
        self.outbox.push_back(RowRequest::Commit(RowCommit {
            row_index: index,
            row_id: id,
            patch,
            full,
            reason,
            completion,
        }));
        Some(slot)
    }

    pub fn delete_row(&mut self, index: usize, row: &T) -> bool {
        self.start_delete(index, row).is_some()
    }

    pub fn delete_row_settled(&mut self, index: usize, row: &T) -> Settled {
        match self.start_delete(index, row) {
            Some(slot) => Settled { slot: Some(slot) },
            None => Settled::skipped(),
        }
    }

    fn start_delete(&mut self, index: usize, row: &T) -> Option<SharedSlot> {
        let id = row.row_id();
        if self.is_row_pending(&id) {
            return None;
        }
        let (completion, slot) = self.begin(&id, PendingOp::Delete, Patch::new());
        log::debug!("delete row {id}");
        self.outbox.push_back(RowRequest::Delete(RowDelete {
            row_index: index,
            row_id: id,
            full: row.clone(),
            completion,
        }));
        Some(slot)
    }

    /// Drops the draft and errors. An outstanding request is not aborted.
    pub fn discard_row(&mut self, id: &RowId) {
        if let Some(state) = self.rows.get_mut(id) {
            state.draft.clear();
            state.errors.clear();
        }
        self.gc(id);
    }

    pub fn take_requests(&mut self) -> Vec<RowRequest<T>> {
        self.outbox.drain(..).collect()
    }

    pub fn has_requests(&self) -> bool {
        !self.outbox.is_empty()
    }

    /// Applies every settlement received so far and returns how many applied.
    pub fn apply_settlements(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(settlement) = self.rx.try_recv() {
            if self.apply(settlement) {
                applied += 1;
            }
        }
        applied
    }

    fn apply(&mut self, settlement: Settlement) -> bool {
        let Settlement {
            row,
            attempt,
            result,
        } = settlement;
        let Some(state) = self.rows.get_mut(&row) else {
            log::warn!("stale settlement for row {row}: no edit state");
            return false;
        };
        let Some(pending) = state.pending.take_if(|pending| pending.id == attempt) else {
            log::warn!("stale settlement for row {row}: attempt {attempt} superseded");
            return false;
        };

        let outcome = match (pending.op, result) {
            (_, Ok(())) => {
                state.draft.clear();
                state.errors.clear();
                SettleOutcome::Succeeded
            }
            (PendingOp::Commit, Err(failure)) => {
                log::debug!("commit for row {row} failed: {failure}");
                match failure.fields {
                    Some(fields) => state.errors.extend(fields),
                    None => state.errors.extend(
                        pending
                            .patch
                            .keys()
                            .map(|column| (column.clone(), CellError::Failed)),
                    ),
                }
                SettleOutcome::Failed
            }
            (PendingOp::Delete, Err(failure)) => {
                log::debug!("delete for row {row} failed: {failure}");
                SettleOutcome::Failed
            }
        };
        resolve(&pending.slot, outcome);
        self.gc(&row);
        true
    }

    /// Forgets every row. Outstanding requests settle as stale.
    pub fn reset(&mut self) {
        for state in self.rows.values() {
            if let Some(pending) = &state.pending {
                resolve(&pending.slot, SettleOutcome::Skipped);
            }
        }
        self.rows.clear();
        self.outbox.clear();
    }

    fn gc(&mut self, id: &RowId) {
        if self.rows.get(id).is_some_and(RowEditState::is_clean) {
            self.rows.remove(id);
        }
    }
}
