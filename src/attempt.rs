//! H5P activity attempts.
//!
//! An attempt is one learner session with an activity. Attempts are numbered
//! from 1 per (activity, user) and own the result rows recorded from xAPI
//! statements while the session lasts.

use sqlx::SqliteConnection;

use crate::{
    db::{self, Db},
    error::AppError,
    models::{AttemptRecord, AttemptResultRecord},
    statement::{NewResult, ScorePropagation, Statement},
};

/// How many times a new attempt number is recomputed after losing a race.
const NUMBER_RETRIES: usize = 5;

const ATTEMPT_COLUMNS: &str =
    "id, h5pactivityid, userid, attempt, rawscore, maxscore, timecreated, timemodified";

#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    record: AttemptRecord,
}

impl Attempt {
    /// Creates the next attempt of `userid` in the activity.
    ///
    /// The number is computed inside the insert. The unique index on
    /// (activity, user, attempt) rejects a duplicate from a concurrent writer,
    /// in which case the insert runs again.
    pub async fn new_attempt(db: &Db, userid: i64, h5pactivityid: i64) -> Result<Attempt, AppError> {
        let sql = format!(
            r#"
            INSERT INTO h5pactivity_attempts
                (h5pactivityid, userid, attempt, rawscore, maxscore, timecreated, timemodified)
            SELECT ?1, ?2, COALESCE(MAX(attempt), 0) + 1, 0, 0, ?3, ?3
              FROM h5pactivity_attempts
             WHERE h5pactivityid = ?1 AND userid = ?2
            RETURNING {ATTEMPT_COLUMNS}
            "#
        );

        for _ in 0..NUMBER_RETRIES {
            let inserted = sqlx::query_as::<_, AttemptRecord>(&sql)
                .bind(h5pactivityid)
                .bind(userid)
                .bind(db::now())
                .fetch_one(db)
                .await;
            match inserted {
                Ok(record) => {
                    tracing::info!(
                        attempt_id = record.id,
                        activity_id = h5pactivityid,
                        user_id = userid,
                        attempt = record.attempt,
                        "attempt created"
                    );
                    return Ok(Attempt { record });
                }
                Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                    tracing::warn!(activity_id = h5pactivityid, user_id = userid, "attempt number taken, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(AppError::AttemptNumberConflict)
    }

    /// The highest numbered attempt of the user, created if there is none.
    pub async fn last_attempt(db: &Db, userid: i64, h5pactivityid: i64) -> Result<Attempt, AppError> {
        let sql = format!(
            r#"
            SELECT {ATTEMPT_COLUMNS} FROM h5pactivity_attempts
             WHERE h5pactivityid = ?1 AND userid = ?2
             ORDER BY attempt DESC
             LIMIT 1
            "#
        );
        let last = sqlx::query_as::<_, AttemptRecord>(&sql)
            .bind(h5pactivityid)
            .bind(userid)
            .fetch_optional(db)
            .await?;
        match last {
            Some(record) => Ok(Attempt { record }),
            None => Self::new_attempt(db, userid, h5pactivityid).await,
        }
    }

    pub async fn get(db: &Db, id: i64) -> Result<Attempt, AppError> {
        let sql = format!("SELECT {ATTEMPT_COLUMNS} FROM h5pactivity_attempts WHERE id = ?1");
        sqlx::query_as::<_, AttemptRecord>(&sql)
            .bind(id)
            .fetch_optional(db)
            .await?
            .map(|record| Attempt { record })
            .ok_or_else(|| AppError::NotFound(format!("attempt {id}")))
    }

    /// Attempts in an activity, optionally for one user, ordered by user and number.
    pub async fn list(
        db: &Db,
        h5pactivityid: i64,
        userid: Option<i64>,
    ) -> Result<Vec<Attempt>, AppError> {
        let sql = format!(
            r#"
            SELECT {ATTEMPT_COLUMNS} FROM h5pactivity_attempts
             WHERE h5pactivityid = ?1 AND (?2 IS NULL OR userid = ?2)
             ORDER BY userid, attempt
            "#
        );
        let records = sqlx::query_as::<_, AttemptRecord>(&sql)
            .bind(h5pactivityid)
            .bind(userid)
            .fetch_all(db)
            .await?;
        Ok(records.into_iter().map(|record| Attempt { record }).collect())
    }

    /// Removes every attempt of the activity, or only those of `userid`,
    /// together with their results.
    pub async fn delete_all_attempts(
        db: &Db,
        h5pactivityid: i64,
        userid: Option<i64>,
    ) -> Result<u64, AppError> {
        let mut tx = db.begin().await?;

        let results = sqlx::query(
            r#"
            DELETE FROM h5pactivity_attempts_results
             WHERE attemptid IN (
                SELECT a.id FROM h5pactivity_attempts a
                 WHERE a.h5pactivityid = ?1 AND (?2 IS NULL OR a.userid = ?2)
             )
            "#,
        )
        .bind(h5pactivityid)
        .bind(userid)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let attempts = sqlx::query(
            "DELETE FROM h5pactivity_attempts WHERE h5pactivityid = ?1 AND (?2 IS NULL OR userid = ?2)",
        )
        .bind(h5pactivityid)
        .bind(userid)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        tracing::info!(activity_id = h5pactivityid, user_id = ?userid, attempts, results, "attempts deleted");
        Ok(attempts)
    }

    /// Removes one attempt and its results.
    pub async fn delete_attempt(db: &Db, attempt: Attempt) -> Result<(), AppError> {
        let mut tx = db.begin().await?;
        delete_results(&mut tx, attempt.id()).await?;
        sqlx::query("DELETE FROM h5pactivity_attempts WHERE id = ?1")
            .bind(attempt.id())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::info!(attempt_id = attempt.id(), "attempt deleted");
        Ok(())
    }

    /// Records a statement as a result of this attempt.
    ///
    /// Returns `Ok(false)`, writing nothing, when the statement has no object
    /// definition or no result. Whole-package statements (empty `subcontent`)
    /// also update the attempt score as `policy` allows.
    pub async fn save_statement(
        &mut self,
        db: &Db,
        statement: &Statement,
        subcontent: &str,
        policy: ScorePropagation,
    ) -> Result<bool, AppError> {
        let Some(row) = NewResult::from_statement(statement, subcontent) else {
            tracing::debug!(attempt_id = self.id(), "statement without definition or result ignored");
            return Ok(false);
        };

        let now = db::now();
        let mut record = self.record.clone();
        if policy.applies(subcontent, row.raw) {
            record.rawscore = row.rawscore;
            record.maxscore = row.maxscore;
        }
        record.timemodified = now;

        let mut tx = db.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO h5pactivity_attempts_results
                (attemptid, subcontent, timecreated, interactiontype, description,
                 correctpattern, response, additionals, rawscore, maxscore)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(record.id)
        .bind(&row.subcontent)
        .bind(now)
        .bind(&row.interactiontype)
        .bind(&row.description)
        .bind(&row.correctpattern)
        .bind(&row.response)
        .bind(&row.additionals)
        .bind(row.rawscore)
        .bind(row.maxscore)
        .execute(&mut *tx)
        .await?;
        let updated = update(&mut tx, &record).await?;
        tx.commit().await?;

        tracing::debug!(
            attempt_id = record.id,
            subcontent,
            interactiontype = %row.interactiontype,
            rawscore = row.rawscore,
            "statement saved"
        );
        self.record = record;
        Ok(updated)
    }

    /// Writes the attempt back, stamping the modification time.
    pub async fn save(&mut self, db: &Db) -> Result<bool, AppError> {
        self.record.timemodified = db::now();
        let mut conn = db.acquire().await?;
        update(&mut conn, &self.record).await
    }

    pub async fn delete_results(&self, db: &Db) -> Result<u64, AppError> {
        let mut conn = db.acquire().await?;
        delete_results(&mut conn, self.id()).await
    }

    pub async fn count_results(&self, db: &Db) -> Result<i64, AppError> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM h5pactivity_attempts_results WHERE attemptid = ?1",
        )
        .bind(self.id())
        .fetch_one(db)
        .await?;
        Ok(count)
    }

    pub async fn results(&self, db: &Db) -> Result<Vec<AttemptResultRecord>, AppError> {
        let rows = sqlx::query_as::<_, AttemptResultRecord>(
            r#"
            SELECT id, attemptid, subcontent, timecreated, interactiontype, description,
                   correctpattern, response, additionals, rawscore, maxscore
              FROM h5pactivity_attempts_results
             WHERE attemptid = ?1
             ORDER BY id
            "#,
        )
        .bind(self.id())
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    pub fn record(&self) -> &AttemptRecord {
        &self.record
    }

    pub fn into_record(self) -> AttemptRecord {
        self.record
    }

    pub fn id(&self) -> i64 {
        self.record.id
    }

    pub fn attempt(&self) -> i64 {
        self.record.attempt
    }

    pub fn userid(&self) -> i64 {
        self.record.userid
    }

    pub fn h5pactivityid(&self) -> i64 {
        self.record.h5pactivityid
    }

    pub fn rawscore(&self) -> i64 {
        self.record.rawscore
    }

    pub fn maxscore(&self) -> i64 {
        self.record.maxscore
    }
}

async fn update(conn: &mut SqliteConnection, record: &AttemptRecord) -> Result<bool, AppError> {
    let done = sqlx::query(
        r#"
        UPDATE h5pactivity_attempts
           SET rawscore = ?1, maxscore = ?2, timemodified = ?3
         WHERE id = ?4
        "#,
    )
    .bind(record.rawscore)
    .bind(record.maxscore)
    .bind(record.timemodified)
    .bind(record.id)
    .execute(conn)
    .await?;
    Ok(done.rows_affected() == 1)
}

async fn delete_results(conn: &mut SqliteConnection, attemptid: i64) -> Result<u64, AppError> {
    let done = sqlx::query("DELETE FROM h5pactivity_attempts_results WHERE attemptid = ?1")
        .bind(attemptid)
        .execute(conn)
        .await?;
    Ok(done.rows_affected())
}
