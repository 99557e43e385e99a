use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, NaiveTime};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::models::{parse_date, parse_stage_lenient, parse_time, ApplicationRecord, FilterPreset, Scorecard};
use crate::store::{check_score, RecordStore, StoreError, StoreResult};

const RECORD_COLUMNS: &str = "id, employer, job_title, city_town, year, general_role, job_level,
    date_app_notif, last_update, upcoming_interview_date, upcoming_interview_time,
    last_completed_stage, notes, external, job_description, company_website, role_link, sector";

const SCORE_UPSERT: &str = "INSERT INTO scores (application_id, factor, value) VALUES (?1, ?2, ?3)
     ON CONFLICT(application_id, factor) DO UPDATE SET value = excluded.value";

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        debug!("Opened database at {}", path.display());
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn,
            path: PathBuf::from(":memory:"),
        };
        db.init()?;
        Ok(db)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS job_applications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                employer TEXT,
                job_title TEXT,
                city_town TEXT,
                year INTEGER,
                general_role TEXT,
                job_level TEXT,
                date_app_notif TEXT DEFAULT CURRENT_DATE,
                last_update TEXT DEFAULT CURRENT_DATE,
                upcoming_interview_date TEXT,
                upcoming_interview_time TEXT,
                last_completed_stage TEXT DEFAULT 'Applied',
                notes TEXT,
                external TEXT DEFAULT 'No',
                job_description TEXT,
                company_website TEXT,
                role_link TEXT,
                sector TEXT
            );

            CREATE TABLE IF NOT EXISTS filter_configs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                config TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS scores (
                application_id INTEGER NOT NULL REFERENCES job_applications(id),
                factor TEXT NOT NULL,
                value INTEGER NOT NULL,
                PRIMARY KEY (application_id, factor)
            );

            CREATE INDEX IF NOT EXISTS idx_applications_stage ON job_applications(last_completed_stage);
            CREATE INDEX IF NOT EXISTS idx_filter_configs_name ON filter_configs(name);
            "#,
        )?;
        self.migrate()?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='job_applications'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!("Database not initialized. Run 'jobtrack init' first."));
        }
        // Databases created before presets and scorecards existed get the new tables here.
        self.init()
    }

    // Older databases lack the interview time column.
    fn migrate(&self) -> Result<()> {
        let mut stmt = self.conn.prepare("PRAGMA table_info(job_applications)")?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read job_applications columns")?;

        if !columns.iter().any(|c| c == "upcoming_interview_time") {
            self.conn
                .execute("ALTER TABLE job_applications ADD COLUMN upcoming_interview_time TEXT", [])?;
            let updated = self.conn.execute(
                "UPDATE job_applications SET upcoming_interview_time = '09:00'
                 WHERE upcoming_interview_date IS NOT NULL",
                [],
            )?;
            info!("Added upcoming_interview_time column, defaulted {} interview(s) to 09:00", updated);
        }
        Ok(())
    }

    // --- Application operations ---

    pub fn get_record(&self, id: i64) -> StoreResult<Option<ApplicationRecord>> {
        let sql = format!("SELECT {} FROM job_applications WHERE id = ?1", RECORD_COLUMNS);
        let record = self.conn.query_row(&sql, [id], Self::row_to_record).optional()?;
        Ok(record)
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<ApplicationRecord> {
        let date = |idx: usize| -> rusqlite::Result<Option<NaiveDate>> {
            let raw: Option<String> = row.get(idx)?;
            Ok(raw.as_deref().filter(|s| !s.is_empty()).and_then(|s| {
                let parsed = parse_date(s);
                if parsed.is_none() {
                    warn!("Ignoring invalid date '{}' in column {}", s, idx);
                }
                parsed
            }))
        };
        let text = |idx: usize| -> rusqlite::Result<String> {
            Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
        };
        let time: Option<NaiveTime> = row
            .get::<_, Option<String>>(10)?
            .as_deref()
            .and_then(parse_time);

        Ok(ApplicationRecord {
            id: row.get(0)?,
            employer: text(1)?,
            job_title: text(2)?,
            city_town: text(3)?,
            year: row.get::<_, Option<i32>>(4)?.unwrap_or_default(),
            general_role: text(5)?,
            job_level: text(6)?,
            applied_on: date(7)?,
            last_update: date(8)?,
            interview_date: date(9)?,
            interview_time: time,
            stage: parse_stage_lenient(&text(11)?),
            notes: row.get(12)?,
            external: text(13)?,
            job_description: row.get(14)?,
            company_website: row.get(15)?,
            role_link: row.get(16)?,
            sector: row.get(17)?,
        })
    }

    // --- Preset operations ---

    fn preset_id_by_name(&self, name: &str) -> StoreResult<Option<i64>> {
        let id = self
            .conn
            .query_row("SELECT id FROM filter_configs WHERE name = ?1", [name], |row| row.get(0))
            .optional()?;
        Ok(id)
    }

    fn record_exists(&self, id: i64) -> StoreResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM job_applications WHERE id = ?1",
            [id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Writes a whole scorecard in one transaction. Every entry is checked
    /// before anything is written, so a rejected card changes nothing.
    pub fn set_scores(&self, application_id: i64, scores: &BTreeMap<String, u8>) -> StoreResult<()> {
        for (factor, value) in scores {
            check_score(factor, *value)?;
        }
        if !self.record_exists(application_id)? {
            return Err(StoreError::NotFound(format!("Application #{}", application_id)));
        }
        let tx = self.conn.unchecked_transaction()?;
        for (factor, value) in scores {
            tx.execute(SCORE_UPSERT, params![application_id, factor, value])?;
        }
        tx.commit()?;
        Ok(())
    }
}

fn date_sql(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format("%Y-%m-%d").to_string())
}

fn time_sql(time: Option<NaiveTime>) -> Option<String> {
    time.map(|t| t.format("%H:%M").to_string())
}

impl RecordStore for Database {
    fn list_records(&self) -> StoreResult<Vec<ApplicationRecord>> {
        let sql = format!("SELECT {} FROM job_applications ORDER BY id", RECORD_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], Self::row_to_record)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn create_record(&self, draft: &ApplicationRecord) -> StoreResult<i64> {
        self.conn.execute(
            "INSERT INTO job_applications (
                employer, job_title, city_town, year, general_role, job_level, date_app_notif,
                last_update, upcoming_interview_date, upcoming_interview_time, last_completed_stage,
                notes, external, job_description, company_website, role_link, sector
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                draft.employer,
                draft.job_title,
                draft.city_town,
                draft.year,
                draft.general_role,
                draft.job_level,
                date_sql(draft.applied_on),
                date_sql(draft.last_update),
                date_sql(draft.interview_date),
                time_sql(draft.interview_time),
                draft.stage.as_str(),
                draft.notes,
                draft.external,
                draft.job_description,
                draft.company_website,
                draft.role_link,
                draft.sector,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!("Inserted application #{}", id);
        Ok(id)
    }

    fn update_record(&self, id: i64, record: &ApplicationRecord) -> StoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE job_applications
             SET employer = ?1, job_title = ?2, city_town = ?3, year = ?4, general_role = ?5,
                 job_level = ?6, date_app_notif = ?7, last_update = ?8, upcoming_interview_date = ?9,
                 upcoming_interview_time = ?10, last_completed_stage = ?11, notes = ?12, external = ?13,
                 job_description = ?14, company_website = ?15, role_link = ?16, sector = ?17
             WHERE id = ?18",
            params![
                record.employer,
                record.job_title,
                record.city_town,
                record.year,
                record.general_role,
                record.job_level,
                date_sql(record.applied_on),
                date_sql(record.last_update),
                date_sql(record.interview_date),
                time_sql(record.interview_time),
                record.stage.as_str(),
                record.notes,
                record.external,
                record.job_description,
                record.company_website,
                record.role_link,
                record.sector,
                id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("Application #{}", id)));
        }
        Ok(())
    }

    fn delete_record(&self, id: i64) -> StoreResult<()> {
        self.conn
            .execute("DELETE FROM scores WHERE application_id = ?1", [id])?;
        let changed = self
            .conn
            .execute("DELETE FROM job_applications WHERE id = ?1", [id])?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("Application #{}", id)));
        }
        Ok(())
    }

    fn list_presets(&self) -> StoreResult<Vec<FilterPreset>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, config FROM filter_configs ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok(FilterPreset {
                id: row.get(0)?,
                name: row.get(1)?,
                config: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn save_preset(&self, name: &str, config: &str) -> StoreResult<i64> {
        if let Some(id) = self.preset_id_by_name(name)? {
            self.conn.execute(
                "UPDATE filter_configs SET config = ?1 WHERE id = ?2",
                params![config, id],
            )?;
            return Ok(id);
        }

        self.conn.execute(
            "INSERT INTO filter_configs (name, config) VALUES (?1, ?2)",
            params![name, config],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn delete_preset(&self, id: i64) -> StoreResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM filter_configs WHERE id = ?1", [id])?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("Filter configuration #{}", id)));
        }
        Ok(())
    }

    fn list_scores(&self, application_id: i64) -> StoreResult<Scorecard> {
        let mut stmt = self
            .conn
            .prepare("SELECT factor, value FROM scores WHERE application_id = ?1")?;
        let rows = stmt.query_map([application_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u8>(1)?))
        })?;
        let scores = rows.collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(Scorecard { scores })
    }

    fn set_score(&self, application_id: i64, factor: &str, value: u8) -> StoreResult<()> {
        check_score(factor, value)?;
        if !self.record_exists(application_id)? {
            return Err(StoreError::NotFound(format!("Application #{}", application_id)));
        }
        self.conn.execute(SCORE_UPSERT, params![application_id, factor, value])?;
        Ok(())
    }

    fn remove_score(&self, application_id: i64, factor: &str) -> StoreResult<()> {
        self.conn.execute(
            "DELETE FROM scores WHERE application_id = ?1 AND factor = ?2",
            params![application_id, factor],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Stage;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn draft(employer: &str) -> ApplicationRecord {
        let mut record = ApplicationRecord::draft(date("2024-02-01"));
        record.employer = employer.to_string();
        record.job_title = "Platform Engineer".to_string();
        record
    }

    #[test]
    fn test_create_and_list_round_trips_fields() {
        let db = Database::open_in_memory().unwrap();
        let mut new = draft("Acme");
        new.interview_date = Some(date("2024-02-20"));
        new.interview_time = Some(NaiveTime::from_hms_opt(10, 30, 0).unwrap());
        new.stage = Stage::InterviewOffered;
        new.sector = Some("Retail".to_string());

        let id = db.create_record(&new).unwrap();
        let records = db.list_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0], new.with_id(id));
    }

    #[test]
    fn test_update_replaces_whole_record() {
        let db = Database::open_in_memory().unwrap();
        let id = db.create_record(&draft("Acme")).unwrap();

        let mut updated = draft("Acme Corporation").with_id(id);
        updated.stage = Stage::Rejected;
        updated.notes = Some("Went with internal candidate".to_string());
        db.update_record(id, &updated).unwrap();

        assert_eq!(db.get_record(id).unwrap(), Some(updated));
    }

    #[test]
    fn test_update_and_delete_missing_record() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.update_record(42, &draft("X")), Err(StoreError::NotFound(_))));
        assert!(matches!(db.delete_record(42), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_delete_removes_record_and_scores() {
        let db = Database::open_in_memory().unwrap();
        let keep = db.create_record(&draft("Keep")).unwrap();
        let gone = db.create_record(&draft("Gone")).unwrap();
        db.set_score(gone, "communication", 7).unwrap();

        db.delete_record(gone).unwrap();
        let ids: Vec<i64> = db.list_records().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![keep]);
        assert!(db.list_scores(gone).unwrap().scores.is_empty());
    }

    #[test]
    fn test_nulls_and_unknown_stage_are_defaulted() {
        let db = Database::open_in_memory().unwrap();
        db.conn
            .execute(
                "INSERT INTO job_applications (employer, date_app_notif, last_completed_stage)
                 VALUES (NULL, '', 'Other (Custom)')",
                [],
            )
            .unwrap();
        let records = db.list_records().unwrap();
        assert_eq!(records[0].employer, "");
        assert_eq!(records[0].applied_on, None);
        assert_eq!(records[0].stage, Stage::Applied);
    }

    #[test]
    fn test_save_preset_overwrites_same_name() {
        let db = Database::open_in_memory().unwrap();
        let first = db.save_preset("Active", r#"{"searchQuery":"a"}"#).unwrap();
        let other = db.save_preset("Offers", "{}").unwrap();
        let second = db.save_preset("Active", r#"{"searchQuery":"b"}"#).unwrap();
        assert_eq!(first, second);
        assert_ne!(first, other);

        let presets = db.list_presets().unwrap();
        assert_eq!(presets.len(), 2);
        assert_eq!(presets[0].name, "Active");
        assert_eq!(presets[0].config, r#"{"searchQuery":"b"}"#);
        assert!(db
            .conn
            .execute("INSERT INTO filter_configs (name, config) VALUES ('Active', '{}')", [])
            .is_err());

        db.delete_preset(other).unwrap();
        assert_eq!(db.list_presets().unwrap().len(), 1);
        assert!(matches!(db.delete_preset(other), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_scores_upsert_and_validate() {
        let db = Database::open_in_memory().unwrap();
        let id = db.create_record(&draft("Acme")).unwrap();
        db.set_score(id, "skillMatch", 4).unwrap();
        db.set_score(id, "skillMatch", 9).unwrap();
        db.set_score(id, "benefits", 6).unwrap();
        assert_eq!(db.list_scores(id).unwrap().total(), 15);

        assert!(matches!(db.set_score(id, "skillMatch", 12), Err(StoreError::Validation(_))));
        assert!(matches!(db.set_score(999, "benefits", 1), Err(StoreError::NotFound(_))));

        db.remove_score(id, "skillMatch").unwrap();
        assert_eq!(db.list_scores(id).unwrap().total(), 6);
    }

    #[test]
    fn test_set_scores_is_all_or_nothing() {
        let db = Database::open_in_memory().unwrap();
        let id = db.create_record(&draft("Acme")).unwrap();
        db.set_score(id, "benefits", 2).unwrap();

        let bad: BTreeMap<String, u8> = [("benefits".to_string(), 5), ("vibes".to_string(), 3)].into();
        assert!(matches!(db.set_scores(id, &bad), Err(StoreError::Validation(_))));
        assert_eq!(db.list_scores(id).unwrap().scores.get("benefits"), Some(&2));

        let good: BTreeMap<String, u8> = [("benefits".to_string(), 5), ("skillMatch".to_string(), 7)].into();
        db.set_scores(id, &good).unwrap();
        assert_eq!(db.list_scores(id).unwrap().total(), 12);
        assert!(matches!(db.set_scores(999, &good), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_migrate_adds_interview_time() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE job_applications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                employer TEXT, job_title TEXT, city_town TEXT, year INTEGER,
                general_role TEXT, job_level TEXT, date_app_notif TEXT, last_update TEXT,
                da_now INTEGER, da_lu INTEGER, lu_now INTEGER,
                upcoming_interview_date TEXT, last_completed_stage TEXT, notes TEXT,
                external TEXT, job_description TEXT, company_website TEXT, role_link TEXT, sector TEXT
            );
            INSERT INTO job_applications (employer, upcoming_interview_date) VALUES ('Acme', '2024-05-01');
            INSERT INTO job_applications (employer) VALUES ('Globex');",
        )
        .unwrap();
        let db = Database {
            conn,
            path: PathBuf::from(":memory:"),
        };
        db.ensure_initialized().unwrap();

        let records = db.list_records().unwrap();
        assert_eq!(records[0].interview_time, NaiveTime::from_hms_opt(9, 0, 0));
        assert_eq!(records[1].interview_time, None);
    }

    #[test]
    fn test_ensure_initialized_requires_init() {
        let db = Database {
            conn: Connection::open_in_memory().unwrap(),
            path: PathBuf::from(":memory:"),
        };
        assert!(db.ensure_initialized().is_err());
    }
}
