//! Per-group window lifecycle.
//!
//! Every group key owns at most one open window at a time. The table maps
//! group keys to their window state (open marker plus the group's own
//! functor bank) and drives the Closed/Open transitions for tumbling-time,
//! tumbling-distance and session windows. Groups are fully independent:
//! rows for one key never touch another key's state.

use crate::flowstream::fql::codegen::FilterProgram;
use crate::flowstream::fql::error::{EngineError, EngineResult};
use crate::flowstream::fql::execution::operators::{Aggregate, WindowKind};
use crate::flowstream::fql::execution::types::{parse_rfc3339, AggregateRow, Group, IngressRow, Value};
use crate::flowstream::fql::plan::{Node, PlanField};
use chrono::{DateTime, Utc};
use log::warn;
use rustc_hash::FxHashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Group key with a precomputed hash so the per-row map lookup hashes the
/// value tuple once.
#[derive(Debug, Clone)]
pub struct GroupKey {
    hash: u64,
    values: Arc<[Value]>,
}

impl GroupKey {
    pub fn new(values: Vec<Value>) -> Self {
        let mut hasher = rustc_hash::FxHasher::default();
        for value in &values {
            value.hash(&mut hasher);
        }
        let hash = hasher.finish();
        Self {
            hash,
            values: Arc::from(values.into_boxed_slice()),
        }
    }

    pub fn from_group(group: &Group) -> Self {
        Self::new(group.values().to_vec())
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        if self.hash != other.hash {
            return false;
        }
        self.values.as_ref() == other.values.as_ref()
    }
}

impl Eq for GroupKey {}

impl Hash for GroupKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

/// One group's window: its functor bank and open/close bookkeeping.
struct GroupState {
    aggregate: Aggregate,
    last_group: Group,
    rows_in_window: u64,
    /// Tumbling-time only: timestamp the current window opened at
    opened_at: Option<DateTime<Utc>>,
    /// Session only: whether a session is currently open
    session_open: bool,
}

/// The windowing state machine over all group keys.
pub struct WindowTable {
    kind: WindowKind,
    aggregate_node: Node,
    input_fields: Vec<PlanField>,
    groups: FxHashMap<GroupKey, GroupState>,
    outputs_dropped: u64,
}

impl WindowTable {
    /// `aggregate_node` configures the per-group functor banks;
    /// `input_fields` is the upstream (ingress) payload layout.
    pub fn new(kind: WindowKind, aggregate_node: Node, input_fields: Vec<PlanField>) -> Self {
        Self {
            kind,
            aggregate_node,
            input_fields,
            groups: FxHashMap::default(),
            outputs_dropped: 0,
        }
    }

    /// Aggregate-output rows that failed at window close and were dropped.
    pub fn outputs_dropped(&self) -> u64 {
        self.outputs_dropped
    }

    /// Feed one filtered ingress row; returns the aggregate rows whose
    /// windows this row closed. An error here is attributed to the input
    /// row, which the driver drops.
    pub fn process(
        &mut self,
        row: &IngressRow,
        program: &FilterProgram,
    ) -> EngineResult<Vec<AggregateRow>> {
        match self.kind {
            WindowKind::TumblingTime {
                interval,
                time_field_index,
            } => self.process_tumbling_time(row, interval, time_field_index),
            WindowKind::TumblingDistance { interval_rows } => {
                self.process_tumbling_distance(row, interval_rows)
            }
            WindowKind::Session {
                include_closing_row,
            } => self.process_session(row, program, include_closing_row),
        }
    }

    fn process_tumbling_time(
        &mut self,
        row: &IngressRow,
        interval: chrono::Duration,
        time_field_index: usize,
    ) -> EngineResult<Vec<AggregateRow>> {
        let timestamp = row_timestamp(row, time_field_index)?;
        let state = self.entry(row)?;

        let mut emitted = Vec::new();
        match state.opened_at {
            None => state.opened_at = Some(timestamp),
            Some(opened_at) => {
                if timestamp >= opened_at + interval {
                    // The closing row belongs to the next window, which
                    // opens at its timestamp.
                    let group = state.last_group.clone();
                    let closed = state.aggregate.close(group);
                    state.rows_in_window = 0;
                    state.opened_at = Some(timestamp);
                    match closed {
                        Ok(out) => emitted.push(out),
                        Err(e) => self.drop_output(e),
                    }
                }
            }
        }

        let state = self.entry(row)?;
        state.aggregate.update(row)?;
        state.last_group = row.group.clone();
        state.rows_in_window += 1;
        Ok(emitted)
    }

    fn process_tumbling_distance(
        &mut self,
        row: &IngressRow,
        interval_rows: i64,
    ) -> EngineResult<Vec<AggregateRow>> {
        let state = self.entry(row)?;
        state.aggregate.update(row)?;
        state.last_group = row.group.clone();
        state.rows_in_window += 1;

        if state.rows_in_window < interval_rows as u64 {
            return Ok(Vec::new());
        }

        let group = state.last_group.clone();
        let closed = state.aggregate.close(group);
        state.rows_in_window = 0;
        match closed {
            Ok(out) => Ok(vec![out]),
            Err(e) => {
                self.drop_output(e);
                Ok(Vec::new())
            }
        }
    }

    fn process_session(
        &mut self,
        row: &IngressRow,
        program: &FilterProgram,
        include_closing_row: bool,
    ) -> EngineResult<Vec<AggregateRow>> {
        let opens = program.eval_session_open(&row.payload)?;
        let closes = program.eval_session_close(&row.payload)?;
        let state = self.entry(row)?;

        if !state.session_open {
            // Rows outside any session are dropped silently.
            if opens {
                state.session_open = true;
                state.aggregate.update(row)?;
                state.last_group = row.group.clone();
                state.rows_in_window += 1;
            }
            return Ok(Vec::new());
        }

        if !closes {
            state.aggregate.update(row)?;
            state.last_group = row.group.clone();
            state.rows_in_window += 1;
            return Ok(Vec::new());
        }

        if include_closing_row {
            state.aggregate.update(row)?;
            state.last_group = row.group.clone();
            state.rows_in_window += 1;
        }

        let group = state.last_group.clone();
        let closed = state.aggregate.close(group);
        state.session_open = false;
        state.rows_in_window = 0;

        if !include_closing_row && opens {
            // The closing row is routed to the next window; it may open a
            // fresh session on the spot.
            state.session_open = true;
            state.aggregate.update(row)?;
            state.last_group = row.group.clone();
            state.rows_in_window += 1;
        }

        match closed {
            Ok(out) => Ok(vec![out]),
            Err(e) => {
                self.drop_output(e);
                Ok(Vec::new())
            }
        }
    }

    /// Close and emit every window that has buffered rows. Called when
    /// input ends.
    pub fn flush(&mut self) -> Vec<AggregateRow> {
        let mut emitted = Vec::new();
        let mut dropped = 0u64;
        for state in self.groups.values_mut() {
            if state.rows_in_window == 0 {
                continue;
            }
            let group = state.last_group.clone();
            match state.aggregate.close(group) {
                Ok(out) => emitted.push(out),
                Err(e) => {
                    warn!("dropping window output at flush: {}", e);
                    dropped += 1;
                }
            }
            state.rows_in_window = 0;
            state.opened_at = None;
            state.session_open = false;
        }
        self.outputs_dropped += dropped;
        emitted
    }

    /// Discard all accumulator state without emitting. Used on cancel.
    pub fn discard(&mut self) {
        self.groups.clear();
    }

    fn entry(&mut self, row: &IngressRow) -> EngineResult<&mut GroupState> {
        use std::collections::hash_map::Entry;

        let key = GroupKey::from_group(&row.group);
        match self.groups.entry(key) {
            Entry::Occupied(occupied) => Ok(occupied.into_mut()),
            Entry::Vacant(vacant) => {
                let aggregate = Aggregate::init(&self.aggregate_node, &self.input_fields)?;
                Ok(vacant.insert(GroupState {
                    aggregate,
                    last_group: row.group.clone(),
                    rows_in_window: 0,
                    opened_at: None,
                    session_open: false,
                }))
            }
        }
    }

    fn drop_output(&mut self, error: EngineError) {
        warn!("dropping window output: {}", error);
        self.outputs_dropped += 1;
    }
}

fn row_timestamp(row: &IngressRow, time_field_index: usize) -> EngineResult<DateTime<Utc>> {
    let value = row.payload.get(time_field_index).ok_or_else(|| {
        EngineError::conversion(format!(
            "time field index {} out of range",
            time_field_index
        ))
    })?;
    match value.as_text() {
        Some(raw) => parse_rfc3339(raw),
        None => Err(EngineError::conversion(format!(
            "time field carries {} value {}, expected text",
            value.type_name(),
            value
        ))),
    }
}
