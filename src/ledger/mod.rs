/*!
 * Job ledger.
 *
 * SQLite-backed, append-only record of provider attempts plus the derived
 * per-(document, phase, unit) status that makes runs resumable after a
 * pause, a stop or a crash.
 *
 * - `connection`: connection management with async-safe access
 * - `schema`: table definitions and migrations
 * - `models`: record types
 * - `repository`: `JobLedger`, the high-level API
 */

pub mod connection;
pub mod models;
pub mod repository;
pub mod schema;

pub use connection::{LedgerConnection, LedgerStats};
pub use models::{
    Attempt, AttemptOutcome, ChapterRecord, CostSummary, DocumentRecord, ProviderUsage,
    UnitHistory, UnitRecord, UnitStatus,
};
pub use repository::JobLedger;
