//! Durable attestation store backed by SQLite
//!
//! Persists units, batches, attestations, harvests and settlement outcomes.
//! Attestation rows keep the per-unit hash chain (`att_hash`, `prev_hash`),
//! and `verify_chain` re-walks it at open so tampering or partial writes are
//! detected before the ledger serves traffic.
//!
//! The in-memory [`BatchLedger`](crate::ledger::BatchLedger) is the
//! authority for ordering and phase decisions; this store is the durable
//! record the ledger is rebuilt from and audited against.

use crate::ledger::{BatchSnapshot, HarvestEvent, UnitSnapshot};
use crate::types::{
    Attestation, AttestationFlag, BatchPhase, ParameterKind, ProductKind, ProductionUnit,
    UnitOfMeasure,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Attestation chain broken for unit {unit_id} at seq {seq}")]
    ChainBroken { unit_id: String, seq: u64 },

    #[error("Unreadable stored value in {table}: {detail}")]
    CorruptRecord { table: &'static str, detail: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Durable store for the batch ledger
pub struct AttestationStore {
    conn: Mutex<Connection>,
}

impl AttestationStore {
    /// Open (or create) the store at `path` and verify every unit's
    /// attestation chain.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init_schema(&conn)?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.verify_all_chains()?;
        Ok(store)
    }

    /// In-memory store, for tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS units (
                unit_id         TEXT PRIMARY KEY,
                product         TEXT NOT NULL,
                operator_id     TEXT NOT NULL,
                certification   TEXT,
                active          INTEGER NOT NULL DEFAULT 1,
                registered_at_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS batches (
                batch_id        TEXT PRIMARY KEY,
                unit_id         TEXT NOT NULL REFERENCES units(unit_id),
                opened_at_ms    INTEGER NOT NULL,
                phase           TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS attestations (
                unit_id         TEXT NOT NULL,
                seq             INTEGER NOT NULL,
                batch_id        TEXT NOT NULL,
                attestation_id  TEXT NOT NULL,
                parameter       TEXT NOT NULL,
                value           REAL NOT NULL,
                unit_of_measure TEXT NOT NULL,
                timestamp_ms    INTEGER NOT NULL,
                source_id       TEXT NOT NULL,
                flags           TEXT NOT NULL,
                phase_at_append TEXT,
                att_hash        BLOB NOT NULL,
                prev_hash       BLOB NOT NULL,
                PRIMARY KEY (unit_id, seq)
            );

            CREATE TABLE IF NOT EXISTS harvests (
                harvest_id          TEXT PRIMARY KEY,
                batch_id            TEXT NOT NULL,
                unit_id             TEXT NOT NULL,
                yield_grams         REAL NOT NULL,
                operator_id         TEXT NOT NULL,
                sanitization_proof  BLOB NOT NULL,
                timestamp_ms        INTEGER NOT NULL,
                quality_score       REAL
            );

            CREATE TABLE IF NOT EXISTS settlements (
                harvest_id      TEXT PRIMARY KEY,
                recipient_id    TEXT NOT NULL,
                amount          REAL NOT NULL,
                outcome         TEXT NOT NULL,
                reason          TEXT,
                timestamp_ms    INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_attestations_batch
                ON attestations(batch_id, seq);
            "#,
        )?;
        Ok(())
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        f(&conn)
    }

    pub fn record_unit(&self, unit: &ProductionUnit) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO units (unit_id, product, operator_id, certification, active, registered_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    unit.unit_id,
                    unit.product.as_str(),
                    unit.operator_id,
                    unit.certification,
                    unit.active as i64,
                    unit.registered_at_ms as i64,
                ],
            )?;
            Ok(())
        })
    }

    pub fn set_unit_active(&self, unit_id: &str, active: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE units SET active = ?1 WHERE unit_id = ?2",
                params![active as i64, unit_id],
            )?;
            Ok(())
        })
    }

    pub fn record_batch_opened(
        &self,
        batch_id: &str,
        unit_id: &str,
        opened_at_ms: u64,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO batches (batch_id, unit_id, opened_at_ms, phase)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    batch_id,
                    unit_id,
                    opened_at_ms as i64,
                    BatchPhase::Growing.as_str()
                ],
            )?;
            Ok(())
        })
    }

    pub fn record_batch_phase(&self, batch_id: &str, phase: BatchPhase) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE batches SET phase = ?1 WHERE batch_id = ?2",
                params![phase.as_str(), batch_id],
            )?;
            Ok(())
        })
    }

    /// Append an attestation row under the unit's chain sequence
    pub fn append_attestation(
        &self,
        seq: u64,
        batch_id: &str,
        attestation: &Attestation,
    ) -> Result<()> {
        let flags = serde_json::to_string(&attestation.flags)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO attestations
                 (unit_id, seq, batch_id, attestation_id, parameter, value,
                  unit_of_measure, timestamp_ms, source_id, flags,
                  phase_at_append, att_hash, prev_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    attestation.unit_id,
                    seq as i64,
                    batch_id,
                    attestation.attestation_id,
                    attestation.parameter.as_str(),
                    attestation.value,
                    attestation.unit_of_measure.as_str(),
                    attestation.timestamp_ms as i64,
                    attestation.source_id,
                    flags,
                    attestation.phase_at_append.map(|p| p.as_str()),
                    attestation.att_hash,
                    attestation.prev_hash,
                ],
            )?;
            Ok(())
        })
    }

    /// Persist a harvest and the closed batch's phase in one transaction,
    /// so a failure leaves neither half behind
    pub fn record_batch_harvested(
        &self,
        event: &HarvestEvent,
        quality_score: Option<f64>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "UPDATE batches SET phase = ?1 WHERE batch_id = ?2",
                params![BatchPhase::Harvested.as_str(), event.batch_id],
            )?;
            tx.execute(
                "INSERT INTO harvests
                 (harvest_id, batch_id, unit_id, yield_grams, operator_id,
                  sanitization_proof, timestamp_ms, quality_score)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    event.harvest_id,
                    event.batch_id,
                    event.unit_id,
                    event.yield_grams,
                    event.operator_id,
                    event.sanitization_proof,
                    event.timestamp_ms as i64,
                    quality_score,
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Archive the replenished batch and open its successor in one
    /// transaction
    pub fn record_batch_replenished(
        &self,
        closed_batch_id: &str,
        new_batch_id: &str,
        unit_id: &str,
        opened_at_ms: u64,
    ) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "UPDATE batches SET phase = ?1 WHERE batch_id = ?2",
                params![BatchPhase::Replenished.as_str(), closed_batch_id],
            )?;
            tx.execute(
                "INSERT INTO batches (batch_id, unit_id, opened_at_ms, phase)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    new_batch_id,
                    unit_id,
                    opened_at_ms as i64,
                    BatchPhase::Growing.as_str()
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn record_settlement(
        &self,
        harvest_id: &str,
        recipient_id: &str,
        amount: f64,
        outcome: &str,
        reason: Option<&str>,
        timestamp_ms: u64,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO settlements
                 (harvest_id, recipient_id, amount, outcome, reason, timestamp_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    harvest_id,
                    recipient_id,
                    amount,
                    outcome,
                    reason,
                    timestamp_ms as i64,
                ],
            )?;
            Ok(())
        })
    }

    /// Quality score stored for a harvest, if any
    pub fn harvest_score(&self, harvest_id: &str) -> Result<Option<f64>> {
        self.with_conn(|conn| {
            let score = conn
                .query_row(
                    "SELECT quality_score FROM harvests WHERE harvest_id = ?1",
                    params![harvest_id],
                    |row| row.get::<_, Option<f64>>(0),
                )
                .optional()?;
            Ok(score.flatten())
        })
    }

    /// Flag counts for a stored batch, used by score replay
    pub fn batch_flag_summary(&self, batch_id: &str) -> Result<(u64, u64)> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT flags FROM attestations WHERE batch_id = ?1 ORDER BY seq",
            )?;
            let rows = stmt.query_map(params![batch_id], |row| row.get::<_, String>(0))?;
            let mut total = 0u64;
            let mut flagged = 0u64;
            for row in rows {
                let flags: Vec<AttestationFlag> = serde_json::from_str(&row?)?;
                total += 1;
                if !flags.is_empty() {
                    flagged += 1;
                }
            }
            Ok((total, flagged))
        })
    }

    /// Load every unit's full durable history, for ledger rebuild at open
    pub fn load_snapshots(&self) -> Result<Vec<UnitSnapshot>> {
        self.with_conn(|conn| {
            let mut units_stmt = conn.prepare(
                "SELECT unit_id, product, operator_id, certification, active, registered_at_ms
                 FROM units ORDER BY unit_id",
            )?;
            let unit_rows: Vec<(String, String, String, Option<String>, i64, i64)> = units_stmt
                .query_map([], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                })?
                .collect::<std::result::Result<_, _>>()?;

            let mut snapshots = Vec::with_capacity(unit_rows.len());
            for (unit_id, product, operator_id, certification, active, registered_at_ms) in
                unit_rows
            {
                let product =
                    ProductKind::from_str(&product).ok_or_else(|| StoreError::CorruptRecord {
                        table: "units",
                        detail: format!("unknown product '{}'", product),
                    })?;
                let unit = ProductionUnit {
                    unit_id: unit_id.clone(),
                    product,
                    operator_id,
                    certification,
                    active: active != 0,
                    registered_at_ms: registered_at_ms as u64,
                };

                let mut batches_stmt = conn.prepare(
                    "SELECT batch_id, opened_at_ms, phase FROM batches
                     WHERE unit_id = ?1 ORDER BY rowid",
                )?;
                let batch_rows: Vec<(String, i64, String)> = batches_stmt
                    .query_map(params![unit_id], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    })?
                    .collect::<std::result::Result<_, _>>()?;

                let mut batches = Vec::with_capacity(batch_rows.len());
                for (batch_id, opened_at_ms, phase) in batch_rows {
                    let phase =
                        BatchPhase::from_str(&phase).ok_or_else(|| StoreError::CorruptRecord {
                            table: "batches",
                            detail: format!("unknown phase '{}'", phase),
                        })?;
                    let attestations = Self::load_batch_attestations(conn, &batch_id)?;
                    let harvest = Self::load_batch_harvest(conn, &batch_id)?;
                    batches.push(BatchSnapshot {
                        batch_id,
                        opened_at_ms: opened_at_ms as u64,
                        phase,
                        attestations,
                        harvest,
                    });
                }
                snapshots.push(UnitSnapshot { unit, batches });
            }
            Ok(snapshots)
        })
    }

    fn load_batch_attestations(conn: &Connection, batch_id: &str) -> Result<Vec<Attestation>> {
        type AttRow = (
            String,
            String,
            String,
            f64,
            String,
            i64,
            String,
            String,
            Option<String>,
            Vec<u8>,
            Vec<u8>,
        );
        let mut stmt = conn.prepare(
            "SELECT attestation_id, unit_id, parameter, value, unit_of_measure,
                    timestamp_ms, source_id, flags, phase_at_append, att_hash, prev_hash
             FROM attestations WHERE batch_id = ?1 ORDER BY seq",
        )?;
        let rows: Vec<AttRow> = stmt
            .query_map(params![batch_id], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                    row.get(9)?,
                    row.get(10)?,
                ))
            })?
            .collect::<std::result::Result<_, _>>()?;

        let mut attestations = Vec::with_capacity(rows.len());
        for (
            attestation_id,
            unit_id,
            parameter,
            value,
            unit_of_measure,
            timestamp_ms,
            source_id,
            flags,
            phase_at_append,
            att_hash,
            prev_hash,
        ) in rows
        {
            let parameter =
                ParameterKind::from_str(&parameter).ok_or_else(|| StoreError::CorruptRecord {
                    table: "attestations",
                    detail: format!("unknown parameter '{}'", parameter),
                })?;
            let unit_of_measure = UnitOfMeasure::from_str(&unit_of_measure).ok_or_else(|| {
                StoreError::CorruptRecord {
                    table: "attestations",
                    detail: format!("unknown unit of measure '{}'", unit_of_measure),
                }
            })?;
            let flags: Vec<AttestationFlag> = serde_json::from_str(&flags)?;
            let phase_at_append = match phase_at_append {
                Some(p) => Some(BatchPhase::from_str(&p).ok_or_else(|| {
                    StoreError::CorruptRecord {
                        table: "attestations",
                        detail: format!("unknown phase '{}'", p),
                    }
                })?),
                None => None,
            };
            attestations.push(Attestation {
                attestation_id,
                unit_id,
                parameter,
                value,
                unit_of_measure,
                timestamp_ms: timestamp_ms as u64,
                source_id,
                flags,
                phase_at_append,
                att_hash,
                prev_hash,
            });
        }
        Ok(attestations)
    }

    fn load_batch_harvest(conn: &Connection, batch_id: &str) -> Result<Option<HarvestEvent>> {
        let event = conn
            .query_row(
                "SELECT harvest_id, unit_id, yield_grams, operator_id,
                        sanitization_proof, timestamp_ms
                 FROM harvests WHERE batch_id = ?1",
                params![batch_id],
                |row| {
                    Ok(HarvestEvent {
                        harvest_id: row.get(0)?,
                        batch_id: batch_id.to_string(),
                        unit_id: row.get(1)?,
                        yield_grams: row.get(2)?,
                        operator_id: row.get(3)?,
                        sanitization_proof: row.get(4)?,
                        timestamp_ms: row.get::<_, i64>(5)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(event)
    }

    /// Walk every unit's attestation chain, verifying hash linkage
    fn verify_all_chains(&self) -> Result<()> {
        self.with_conn(|conn| {
            let mut units_stmt = conn.prepare("SELECT unit_id FROM units")?;
            let unit_ids: Vec<String> = units_stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<_, _>>()?;

            for unit_id in unit_ids {
                let mut stmt = conn.prepare(
                    "SELECT seq, att_hash, prev_hash FROM attestations
                     WHERE unit_id = ?1 ORDER BY seq",
                )?;
                let rows = stmt.query_map(params![unit_id], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                })?;

                let mut head: Option<Vec<u8>> = None;
                for row in rows {
                    let (seq, att_hash, prev_hash) = row?;
                    if let Some(expected) = &head {
                        if &prev_hash != expected {
                            warn!(unit_id = %unit_id, seq, "Attestation chain mismatch");
                            return Err(StoreError::ChainBroken {
                                unit_id,
                                seq: seq as u64,
                            });
                        }
                    }
                    head = Some(att_hash);
                }
            }
            info!("Attestation chains verified");
            Ok(())
        })
    }

    /// Number of attestation rows, across all units
    pub fn attestation_count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM attestations", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ParameterKind, ProductKind, UnitOfMeasure};

    fn test_unit(unit_id: &str) -> ProductionUnit {
        ProductionUnit {
            unit_id: unit_id.to_string(),
            product: ProductKind::Spirulina,
            operator_id: "op-1".to_string(),
            certification: Some("organic-eu".to_string()),
            active: true,
            registered_at_ms: 0,
        }
    }

    fn chained_attestation(unit_id: &str, seq: u64, prev: &[u8]) -> Attestation {
        let mut a = Attestation {
            attestation_id: format!("att-{}", seq),
            unit_id: unit_id.to_string(),
            parameter: ParameterKind::Ph,
            value: 10.0,
            unit_of_measure: UnitOfMeasure::PhUnits,
            timestamp_ms: seq * 1000,
            source_id: "sensor-1".to_string(),
            flags: vec![],
            phase_at_append: Some(BatchPhase::Growing),
            att_hash: vec![],
            prev_hash: prev.to_vec(),
        };
        a.att_hash = a.compute_hash(prev);
        a
    }

    #[test]
    fn test_round_trips_unit_and_attestations() {
        let store = AttestationStore::open_in_memory().unwrap();
        store.record_unit(&test_unit("vat-1")).unwrap();
        store.record_batch_opened("vat-1-b1", "vat-1", 0).unwrap();

        let a1 = chained_attestation("vat-1", 1, &[0u8; 32]);
        let a2 = chained_attestation("vat-1", 2, &a1.att_hash);
        store.append_attestation(1, "vat-1-b1", &a1).unwrap();
        store.append_attestation(2, "vat-1-b1", &a2).unwrap();

        assert_eq!(store.attestation_count().unwrap(), 2);
        let (total, flagged) = store.batch_flag_summary("vat-1-b1").unwrap();
        assert_eq!((total, flagged), (2, 0));
    }

    #[test]
    fn test_duplicate_seq_rejected() {
        let store = AttestationStore::open_in_memory().unwrap();
        store.record_unit(&test_unit("vat-1")).unwrap();
        let a = chained_attestation("vat-1", 1, &[0u8; 32]);
        store.append_attestation(1, "vat-1-b1", &a).unwrap();
        assert!(store.append_attestation(1, "vat-1-b1", &a).is_err());
    }

    #[test]
    fn test_chain_verification_detects_tamper() {
        let path = std::env::temp_dir().join(format!("test_chain_{}.db", uuid::Uuid::new_v4()));
        {
            let store = AttestationStore::open(&path).unwrap();
            store.record_unit(&test_unit("vat-1")).unwrap();
            let a1 = chained_attestation("vat-1", 1, &[0u8; 32]);
            let a2 = chained_attestation("vat-1", 2, &a1.att_hash);
            store.append_attestation(1, "vat-1-b1", &a1).unwrap();
            store.append_attestation(2, "vat-1-b1", &a2).unwrap();
        }

        // Corrupt the first row's hash directly
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute(
                "UPDATE attestations SET att_hash = ?1 WHERE seq = 1",
                params![vec![0xFFu8; 32]],
            )
            .unwrap();
        }

        assert!(matches!(
            AttestationStore::open(&path),
            Err(StoreError::ChainBroken { seq: 2, .. })
        ));

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_harvest_and_settlement_rows() {
        let store = AttestationStore::open_in_memory().unwrap();
        store.record_unit(&test_unit("vat-1")).unwrap();
        store.record_batch_opened("vat-1-b1", "vat-1", 0).unwrap();
        let event = HarvestEvent {
            harvest_id: "vat-1-h1".to_string(),
            batch_id: "vat-1-b1".to_string(),
            unit_id: "vat-1".to_string(),
            yield_grams: 5000.0,
            operator_id: "op-1".to_string(),
            sanitization_proof: vec![1, 2, 3],
            timestamp_ms: 1000,
        };
        store.record_batch_harvested(&event, Some(87.5)).unwrap();
        assert_eq!(store.harvest_score("vat-1-h1").unwrap(), Some(87.5));
        assert_eq!(store.harvest_score("vat-1-h99").unwrap(), None);

        store
            .record_settlement("vat-1-h1", "op-1", 4375.0, "issued", None, 1000)
            .unwrap();
        // Duplicate settlement for the same harvest violates the primary key
        assert!(store
            .record_settlement("vat-1-h1", "op-1", 4375.0, "issued", None, 1000)
            .is_err());
    }

    #[test]
    fn test_failed_harvest_write_leaves_no_partial_rows() {
        let store = AttestationStore::open_in_memory().unwrap();
        store.record_unit(&test_unit("vat-1")).unwrap();
        store.record_batch_opened("vat-1-b1", "vat-1", 0).unwrap();
        let event = HarvestEvent {
            harvest_id: "vat-1-h1".to_string(),
            batch_id: "vat-1-b1".to_string(),
            unit_id: "vat-1".to_string(),
            yield_grams: 5000.0,
            operator_id: "op-1".to_string(),
            sanitization_proof: vec![],
            timestamp_ms: 1000,
        };
        store.record_batch_harvested(&event, None).unwrap();

        // The duplicate insert fails and rolls back the phase update with it
        let mut again = event.clone();
        again.batch_id = "vat-1-b2".to_string();
        store.record_batch_opened("vat-1-b2", "vat-1", 2000).unwrap();
        assert!(store.record_batch_harvested(&again, None).is_err());

        let snapshots = store.load_snapshots().unwrap();
        let b2 = snapshots[0]
            .batches
            .iter()
            .find(|b| b.batch_id == "vat-1-b2")
            .unwrap();
        assert_eq!(b2.phase, BatchPhase::Growing);
    }

    #[test]
    fn test_load_snapshots_round_trips_full_history() {
        let store = AttestationStore::open_in_memory().unwrap();
        store.record_unit(&test_unit("vat-1")).unwrap();
        store.record_batch_opened("vat-1-b1", "vat-1", 0).unwrap();

        let a1 = chained_attestation("vat-1", 1, &[0u8; 32]);
        let a2 = chained_attestation("vat-1", 2, &a1.att_hash);
        store.append_attestation(1, "vat-1-b1", &a1).unwrap();
        store.append_attestation(2, "vat-1-b1", &a2).unwrap();

        let event = HarvestEvent {
            harvest_id: "vat-1-h1".to_string(),
            batch_id: "vat-1-b1".to_string(),
            unit_id: "vat-1".to_string(),
            yield_grams: 5000.0,
            operator_id: "op-1".to_string(),
            sanitization_proof: vec![9, 9],
            timestamp_ms: 3000,
        };
        store.record_batch_harvested(&event, Some(80.0)).unwrap();
        store
            .record_batch_replenished("vat-1-b1", "vat-1-b2", "vat-1", 4000)
            .unwrap();

        let snapshots = store.load_snapshots().unwrap();
        assert_eq!(snapshots.len(), 1);
        let unit = &snapshots[0];
        assert_eq!(unit.unit.unit_id, "vat-1");
        assert_eq!(unit.batches.len(), 2);

        let b1 = &unit.batches[0];
        assert_eq!(b1.phase, BatchPhase::Replenished);
        assert_eq!(b1.attestations.len(), 2);
        assert_eq!(b1.attestations[1].att_hash, a2.att_hash);
        assert_eq!(
            b1.harvest.as_ref().map(|h| h.harvest_id.as_str()),
            Some("vat-1-h1")
        );

        let b2 = &unit.batches[1];
        assert_eq!(b2.batch_id, "vat-1-b2");
        assert_eq!(b2.phase, BatchPhase::Growing);
        assert!(b2.attestations.is_empty());
        assert!(b2.harvest.is_none());
    }
}
