//! Runtime driver.
//!
//! Wires the operator chain in plan order and pushes one record at a time
//! through it: a row traverses the whole pipeline (or is dropped) before
//! the next record is read. Row-time failures are logged with row context,
//! counted, and never stop the pipeline; load-time failures refuse to
//! start. A cancellation flag is checked between rows; cancel discards
//! open windows without flushing.

use crate::flowstream::fql::codegen::{self, FilterProgram, Generated, RowSchema};
use crate::flowstream::fql::error::{EngineError, EngineResult};
use crate::flowstream::fql::execution::operators::{
    Egress, Filter, Ingress, Project, Window,
};
use crate::flowstream::fql::execution::types::AggregateRow;
use crate::flowstream::fql::execution::window::WindowTable;
use crate::flowstream::fql::plan::{wire, OperatorType, Plan};
use log::{debug, info, warn};
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};

/// How surfaced rows are written to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EgressFormat {
    /// One delimited text line per row
    Delimited,
    /// Tagged binary row messages
    Binary,
}

/// Explicit engine context; there is no process-global configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub delimiter: char,
    pub egress_format: EgressFormat,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            delimiter: '|',
            egress_format: EgressFormat::Delimited,
        }
    }
}

/// Row counters exposed to telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineMetrics {
    pub rows_read: u64,
    /// Rows dropped for parse/evaluation/coercion failures
    pub rows_dropped: u64,
    pub rows_filtered_ingress: u64,
    pub rows_filtered_aggregate: u64,
    pub rows_filtered_project: u64,
    /// Aggregate-output rows dropped at window close
    pub outputs_dropped: u64,
    pub rows_emitted: u64,
}

/// The assembled pipeline for one query.
pub struct Engine {
    ingress: Ingress,
    pre_filter: Filter,
    window_table: WindowTable,
    post_filter: Filter,
    project: Project,
    egress: Egress,
    egress_filter: Filter,
    program: FilterProgram,
    schema: RowSchema,
    config: EngineConfig,
    metrics: EngineMetrics,
}

impl Engine {
    /// Validate the plan, run code generation, and wire the operators.
    pub fn new(plan: &Plan, config: EngineConfig) -> EngineResult<Self> {
        plan.validate()?;
        let generated = codegen::generate(plan)?;
        Self::with_generated(plan, generated, config)
    }

    /// Wire the operators against an already generated filter program and
    /// row schema.
    pub fn with_generated(
        plan: &Plan,
        generated: Generated,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        let require = |operator: OperatorType| {
            plan.find_first(operator).ok_or_else(|| {
                EngineError::malformed_plan(format!("plan has no {:?} node", operator))
            })
        };

        let ingress_node = require(OperatorType::Ingress)?;
        let window_node = require(OperatorType::Window)?;
        let aggregate_node = require(OperatorType::Aggregate)?;
        let project_node = require(OperatorType::Project)?;
        let egress_node = require(OperatorType::Egress)?;

        let Generated { program, schema } = generated;

        let ingress = Ingress::init(ingress_node)?;
        let pre_filter = Filter::init(
            plan.find_first(OperatorType::PreFilter).unwrap_or(ingress_node),
            program.ingress_filter().clone(),
        );
        let window = Window::init(window_node)?;
        let window_table = WindowTable::new(
            window.kind.clone(),
            aggregate_node.clone(),
            ingress_node.fields.clone(),
        );
        let post_filter = Filter::init(
            plan.find_first(OperatorType::PostFilter).unwrap_or(aggregate_node),
            program.aggregate_filter().clone(),
        );
        let project = Project::init(project_node, &aggregate_node.fields)?;
        let egress = Egress::init(egress_node);
        let egress_filter = Filter::init(project_node, program.project_filter().clone());

        Ok(Self {
            ingress,
            pre_filter,
            window_table,
            post_filter,
            project,
            egress,
            egress_filter,
            program,
            schema,
            config,
            metrics: EngineMetrics::default(),
        })
    }

    /// The generated row schema for this query.
    pub fn schema(&self) -> &RowSchema {
        &self.schema
    }

    pub fn metrics(&self) -> EngineMetrics {
        let mut metrics = self.metrics;
        metrics.outputs_dropped = self.metrics.outputs_dropped + self.window_table.outputs_dropped();
        metrics
    }

    /// Drive records from `reader` through the pipeline into `writer`.
    ///
    /// Returns on end of input after flushing pending windows, or with
    /// [`EngineError::Cancelled`] when the flag is raised between rows (in
    /// which case open windows are discarded, not flushed).
    pub fn run<R: BufRead, W: Write>(
        &mut self,
        reader: R,
        mut writer: W,
        cancel: &AtomicBool,
    ) -> EngineResult<()> {
        for line in reader.lines() {
            if cancel.load(Ordering::Relaxed) {
                info!("cancellation requested, discarding open windows");
                self.window_table.discard();
                return Err(EngineError::Cancelled);
            }

            let line = line?;
            if line.is_empty() {
                continue;
            }
            self.metrics.rows_read += 1;

            if let Err(e) = self.process_record(&line, &mut writer) {
                if e.is_row_error() {
                    warn!("dropping row '{}': {}", line, e);
                    self.metrics.rows_dropped += 1;
                } else {
                    return Err(e);
                }
            }
        }

        debug!("input exhausted, flushing pending windows");
        for row in self.window_table.flush() {
            if let Err(e) = self.emit(row, &mut writer) {
                if e.is_row_error() {
                    warn!("dropping flushed row: {}", e);
                    self.metrics.rows_dropped += 1;
                } else {
                    return Err(e);
                }
            }
        }
        writer.flush()?;

        info!(
            "pipeline finished: {} read, {} emitted, {} dropped",
            self.metrics.rows_read, self.metrics.rows_emitted, self.metrics.rows_dropped
        );
        Ok(())
    }

    fn process_record<W: Write>(&mut self, line: &str, writer: &mut W) -> EngineResult<()> {
        let row = self.ingress.ingress(line, self.config.delimiter)?;

        if !self.pre_filter.eval(&row.payload)? {
            self.metrics.rows_filtered_ingress += 1;
            return Ok(());
        }

        let closed = self.window_table.process(&row, &self.program)?;
        for aggregate_row in closed {
            self.emit(aggregate_row, writer)?;
        }
        Ok(())
    }

    fn emit<W: Write>(&mut self, row: AggregateRow, writer: &mut W) -> EngineResult<()> {
        if !self.post_filter.eval(&row.payload)? {
            self.metrics.rows_filtered_aggregate += 1;
            return Ok(());
        }

        let egress_row = self.project.project(&row)?;

        if !self.egress_filter.eval(&egress_row.payload)? {
            self.metrics.rows_filtered_project += 1;
            return Ok(());
        }

        match self.config.egress_format {
            EgressFormat::Delimited => {
                let line = self
                    .egress
                    .format_delimited(&egress_row, self.config.delimiter);
                writer.write_all(line.as_bytes())?;
                writer.write_all(b"\n")?;
            }
            EgressFormat::Binary => {
                let bytes = wire::encode_egress_row(
                    &egress_row,
                    &self.schema.group.field_types(),
                    &self.schema.egress.field_types(),
                )?;
                writer.write_all(&bytes)?;
            }
        }
        self.metrics.rows_emitted += 1;
        Ok(())
    }
}
