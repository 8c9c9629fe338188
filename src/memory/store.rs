// src/memory/store.rs — SQLite operations

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::versions::{ConfigVersion, NewConfigVersion};
use crate::core::types::{IterationRecord, LoopSummary};
use crate::infra::errors::EngineError;
use crate::persona::Persona;
use crate::simulation::{FeedbackReport, SimulationResult};

type Result<T> = std::result::Result<T, EngineError>;

/// One row of the `runs` table. Summary columns stay empty until the run
/// finishes.
#[derive(Debug, Clone)]
pub struct RunRow {
    pub id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub iterations: Option<u32>,
    pub converged: Option<bool>,
    pub exit_reason: Option<String>,
    pub final_convergence: Option<f64>,
    pub final_satisfaction: Option<f64>,
}

/// Low-level SQLite operations for all record types. Every write is a
/// single INSERT (or one transaction), so history tables stay append-only.
pub struct Store {
    conn: Connection,
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| EngineError::Persistence(rusqlite::Error::ToSqlConversionFailure(Box::new(e))))
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn collect<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> Result<Vec<T>> {
    let mut result = Vec::new();
    for row in rows {
        result.push(row?);
    }
    Ok(result)
}

const VERSION_COLUMNS: &str = "id, module, version, payload, digest, changelog, metrics_snapshot,
     convergence_score, run_id, iteration, parent_version, created_at";

fn version_row(row: &Row<'_>) -> rusqlite::Result<ConfigVersion> {
    let snapshot: Option<String> = row.get(6)?;
    let metrics_snapshot = snapshot
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;
    Ok(ConfigVersion {
        id: row.get(0)?,
        module: row.get(1)?,
        version: row.get(2)?,
        payload: row.get(3)?,
        digest: row.get(4)?,
        changelog: row.get(5)?,
        metrics_snapshot,
        convergence_score: row.get(7)?,
        run_id: row.get(8)?,
        iteration: row.get(9)?,
        parent_version: row.get(10)?,
        created_at: time_column(row, 11)?,
    })
}

impl Store {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Raw connection, for inspection in tests and tooling.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // -- Runs --

    pub fn insert_run(&self, id: &str, config_json: &str, started_at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO runs (id, config, started_at) VALUES (?1, ?2, ?3)",
            params![id, config_json, started_at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn finish_run(&self, summary: &LoopSummary) -> Result<()> {
        let data = to_json(summary)?;
        self.conn.execute(
            "UPDATE runs SET finished_at = ?1, iterations = ?2, converged = ?3, exit_reason = ?4,
             final_convergence = ?5, final_satisfaction = ?6, total_duration_ms = ?7,
             total_tokens = ?8, summary = ?9
             WHERE id = ?10",
            params![
                summary.finished_at.to_rfc3339(),
                summary.iterations_run,
                summary.converged,
                summary.exit_reason.as_str(),
                summary.final_convergence_score,
                summary.final_mean_satisfaction,
                summary.total_duration_ms as i64,
                summary.total_tokens as i64,
                data,
                summary.run_id
            ],
        )?;
        Ok(())
    }

    /// Most recent runs first.
    pub fn list_runs(&self, limit: u32) -> Result<Vec<RunRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, started_at, finished_at, iterations, converged, exit_reason,
             final_convergence, final_satisfaction
             FROM runs ORDER BY started_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(RunRow {
                id: row.get(0)?,
                started_at: row.get(1)?,
                finished_at: row.get(2)?,
                iterations: row.get(3)?,
                converged: row.get(4)?,
                exit_reason: row.get(5)?,
                final_convergence: row.get(6)?,
                final_satisfaction: row.get(7)?,
            })
        })?;
        collect(rows)
    }

    pub fn latest_run_id(&self) -> Result<Option<String>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM runs ORDER BY started_at DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// The stored summary of a finished run.
    pub fn run_summary(&self, run_id: &str) -> Result<Option<LoopSummary>> {
        let summary = self
            .conn
            .query_row(
                "SELECT summary FROM runs WHERE id = ?1 AND summary IS NOT NULL",
                params![run_id],
                |row| json_column(row, 0),
            )
            .optional()?;
        Ok(summary)
    }

    // -- Personas --

    pub fn insert_persona(&self, run_id: &str, persona: &Persona) -> Result<()> {
        self.conn.execute(
            "INSERT INTO personas (id, run_id, iteration, name, target_role, criticality, data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                persona.id,
                run_id,
                persona.iteration,
                persona.name,
                persona.target_role,
                persona.criticality,
                to_json(persona)?,
                persona.created_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn list_personas(&self, run_id: &str) -> Result<Vec<Persona>> {
        let mut stmt = self.conn.prepare(
            "SELECT data FROM personas WHERE run_id = ?1 ORDER BY iteration, created_at",
        )?;
        let rows = stmt.query_map(params![run_id], |row| json_column(row, 0))?;
        collect(rows)
    }

    // -- Simulations --

    pub fn insert_simulation(&self, sim: &SimulationResult) -> Result<()> {
        self.conn.execute(
            "INSERT INTO simulations (id, run_id, iteration, persona_id, completed, goal_achieved,
             abandoned, error_encountered, abort_reason, overall_grade, steps, duration_ms, tokens,
             data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                sim.id,
                sim.run_id,
                sim.iteration,
                sim.persona_id,
                sim.outcome.completed_successfully,
                sim.outcome.goal_achieved,
                sim.outcome.abandoned,
                sim.outcome.error_encountered,
                sim.abort_reason,
                sim.grade.as_ref().map(|g| g.overall_score),
                sim.steps,
                sim.duration_ms as i64,
                sim.tokens as i64,
                to_json(sim)?,
                sim.created_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// All simulations of a run, or of one iteration when given.
    pub fn list_simulations(&self, run_id: &str, iteration: Option<u32>) -> Result<Vec<SimulationResult>> {
        let mut stmt = self.conn.prepare(
            "SELECT data FROM simulations
             WHERE run_id = ?1 AND (?2 IS NULL OR iteration = ?2)
             ORDER BY iteration, created_at",
        )?;
        let rows = stmt.query_map(params![run_id, iteration], |row| json_column(row, 0))?;
        collect(rows)
    }

    // -- Feedback --

    pub fn insert_feedback(&self, run_id: &str, report: &FeedbackReport) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO feedback_reports (id, run_id, iteration, simulation_id, persona_id,
             overall_satisfaction, would_recommend, degraded, data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                report.id,
                run_id,
                report.iteration,
                report.simulation_id,
                report.persona_id,
                report.overall_satisfaction,
                report.would_recommend,
                report.degraded,
                to_json(report)?,
                now
            ],
        )?;
        Ok(())
    }

    pub fn list_feedback(&self, run_id: &str, iteration: Option<u32>) -> Result<Vec<FeedbackReport>> {
        let mut stmt = self.conn.prepare(
            "SELECT data FROM feedback_reports
             WHERE run_id = ?1 AND (?2 IS NULL OR iteration = ?2)
             ORDER BY iteration, created_at",
        )?;
        let rows = stmt.query_map(params![run_id, iteration], |row| json_column(row, 0))?;
        collect(rows)
    }

    // -- Config Versions --

    /// Append the next version of a module. The version number is computed
    /// inside the insert transaction; UNIQUE(module, version) rejects any
    /// concurrent writer that raced to the same number.
    pub fn append_config_version(&self, new: &NewConfigVersion) -> Result<ConfigVersion> {
        let tx = self.conn.unchecked_transaction()?;
        let parent: Option<u32> = tx.query_row(
            "SELECT MAX(version) FROM config_versions WHERE module = ?1",
            params![new.module],
            |row| row.get(0),
        )?;
        let version = ConfigVersion {
            id: uuid::Uuid::new_v4().to_string(),
            module: new.module.clone(),
            version: parent.map_or(1, |v| v + 1),
            digest: super::versions::digest(&new.payload),
            payload: new.payload.clone(),
            changelog: new.changelog.clone(),
            metrics_snapshot: new.metrics_snapshot.clone(),
            convergence_score: new.convergence_score,
            run_id: new.run_id.clone(),
            iteration: new.iteration,
            parent_version: parent,
            created_at: Utc::now(),
        };
        let snapshot = version.metrics_snapshot.as_ref().map(to_json).transpose()?;
        tx.execute(
            "INSERT INTO config_versions (id, module, version, payload, digest, changelog,
             metrics_snapshot, convergence_score, run_id, iteration, parent_version, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                version.id,
                version.module,
                version.version,
                version.payload,
                version.digest,
                version.changelog,
                snapshot,
                version.convergence_score,
                version.run_id,
                version.iteration,
                version.parent_version,
                version.created_at.to_rfc3339()
            ],
        )?;
        tx.commit()?;
        Ok(version)
    }

    pub fn latest_config_version(&self, module: &str) -> Result<Option<ConfigVersion>> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM config_versions WHERE module = ?1
             ORDER BY version DESC LIMIT 1"
        );
        let v = self.conn.query_row(&sql, params![module], version_row).optional()?;
        Ok(v)
    }

    pub fn get_config_version(&self, module: &str, version: u32) -> Result<Option<ConfigVersion>> {
        let sql = format!("SELECT {VERSION_COLUMNS} FROM config_versions WHERE module = ?1 AND version = ?2");
        let v = self
            .conn
            .query_row(&sql, params![module, version], version_row)
            .optional()?;
        Ok(v)
    }

    /// Every version of a module, oldest first.
    pub fn config_history(&self, module: &str) -> Result<Vec<ConfigVersion>> {
        let sql = format!("SELECT {VERSION_COLUMNS} FROM config_versions WHERE module = ?1 ORDER BY version");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![module], version_row)?;
        collect(rows)
    }

    pub fn config_modules(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT module FROM config_versions ORDER BY module")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        collect(rows)
    }

    // -- Iteration Records --

    pub fn insert_iteration_record(&self, record: &IterationRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO iteration_records (run_id, iteration, target_criticality, convergence_score,
             changes_proposed, mean_satisfaction, duration_ms, data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.run_id,
                record.iteration,
                record.target_criticality,
                record.convergence_score,
                record.changes_proposed as i64,
                record.metrics.mean_satisfaction,
                record.duration_ms as i64,
                to_json(record)?,
                record.started_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Records of a run in iteration order.
    pub fn list_iteration_records(&self, run_id: &str) -> Result<Vec<IterationRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT data FROM iteration_records WHERE run_id = ?1 ORDER BY iteration",
        )?;
        let rows = stmt.query_map(params![run_id], |row| json_column(row, 0))?;
        collect(rows)
    }
}
