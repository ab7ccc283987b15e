//! Context tree and capability checks.
//!
//! A capability granted on a context applies to every context below it.
//! Site admins hold every capability everywhere.

use std::{collections::HashSet, sync::Arc};

use sqlx::SqliteConnection;

use crate::{db::Db, error::AppError, session::Session};

pub const SYSTEM_CONTEXT: i64 = 1;

pub const CONTEXT_SYSTEM: i64 = 10;
pub const CONTEXT_COURSE: i64 = 50;
pub const CONTEXT_MODULE: i64 = 70;

#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct ContextRecord {
    pub id: i64,
    pub contextlevel: i64,
    pub instanceid: i64,
    pub parentid: Option<i64>,
}

impl ContextRecord {
    pub async fn get(db: &Db, id: i64) -> Result<ContextRecord, AppError> {
        sqlx::query_as::<_, ContextRecord>(
            "SELECT id, contextlevel, instanceid, parentid FROM contexts WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("context {id}")))
    }

    /// Inserts a child context. Takes a connection so callers can run it
    /// inside their own transaction.
    pub async fn create(
        conn: &mut SqliteConnection,
        contextlevel: i64,
        instanceid: i64,
        parentid: i64,
    ) -> Result<ContextRecord, AppError> {
        let rec = sqlx::query_as::<_, ContextRecord>(
            r#"
            INSERT INTO contexts (contextlevel, instanceid, parentid)
            VALUES (?1, ?2, ?3)
            RETURNING id, contextlevel, instanceid, parentid
            "#,
        )
        .bind(contextlevel)
        .bind(instanceid)
        .bind(parentid)
        .fetch_one(conn)
        .await?;
        Ok(rec)
    }
}

#[derive(Clone)]
pub struct Capabilities {
    db: Db,
    site_admins: Arc<HashSet<i64>>,
}

impl Capabilities {
    pub fn new(db: Db, site_admins: impl IntoIterator<Item = i64>) -> Self {
        Self {
            db,
            site_admins: Arc::new(site_admins.into_iter().collect()),
        }
    }

    pub fn is_siteadmin(&self, session: &Session) -> bool {
        self.site_admins.contains(&session.userid)
    }

    pub async fn has_capability(
        &self,
        session: &Session,
        capability: &str,
        contextid: i64,
    ) -> Result<bool, AppError> {
        if self.is_siteadmin(session) {
            return Ok(true);
        }
        let grants: i64 = sqlx::query_scalar(
            r#"
            WITH RECURSIVE lineage (id, parentid) AS (
                SELECT id, parentid FROM contexts WHERE id = ?1
                UNION ALL
                SELECT c.id, c.parentid FROM contexts c JOIN lineage l ON c.id = l.parentid
            )
            SELECT COUNT(*)
              FROM capability_grants g
              JOIN lineage l ON g.contextid = l.id
             WHERE g.userid = ?2 AND g.capability = ?3
            "#,
        )
        .bind(contextid)
        .bind(session.userid)
        .bind(capability)
        .fetch_one(&self.db)
        .await?;
        Ok(grants > 0)
    }

    pub async fn require_capability(
        &self,
        session: &Session,
        capability: &str,
        contextid: i64,
    ) -> Result<(), AppError> {
        if self.has_capability(session, capability, contextid).await? {
            Ok(())
        } else {
            tracing::debug!(user_id = session.userid, contextid, capability, "capability denied");
            Err(AppError::Forbidden(capability.to_string()))
        }
    }

    pub async fn grant(
        &self,
        userid: i64,
        capability: &str,
        contextid: i64,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO capability_grants (userid, contextid, capability)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (userid, contextid, capability) DO NOTHING
            "#,
        )
        .bind(userid)
        .bind(contextid)
        .bind(capability)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn grants_apply_to_descendant_contexts() {
        let db = db::connect_in_memory().await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        let course = ContextRecord::create(&mut conn, CONTEXT_COURSE, 4, SYSTEM_CONTEXT)
            .await
            .unwrap();
        let module = ContextRecord::create(&mut conn, CONTEXT_MODULE, 9, course.id)
            .await
            .unwrap();
        drop(conn);

        let caps = Capabilities::new(db.clone(), Vec::<i64>::new());
        let student = Session { userid: 7 };
        assert!(!caps.has_capability(&student, "mod/h5pactivity:submit", module.id).await.unwrap());

        caps.grant(7, "mod/h5pactivity:submit", course.id).await.unwrap();
        assert!(caps.has_capability(&student, "mod/h5pactivity:submit", module.id).await.unwrap());
        assert!(caps.has_capability(&student, "mod/h5pactivity:submit", course.id).await.unwrap());
        assert!(!caps
            .has_capability(&student, "mod/h5pactivity:submit", SYSTEM_CONTEXT)
            .await
            .unwrap());
        assert!(!caps.has_capability(&Session { userid: 8 }, "mod/h5pactivity:submit", module.id).await.unwrap());
    }

    #[tokio::test]
    async fn site_admins_hold_everything() {
        let db = db::connect_in_memory().await.unwrap();
        let caps = Capabilities::new(db, [2]);
        let admin = Session { userid: 2 };
        assert!(caps.has_capability(&admin, "moodle/contentbank:upload", SYSTEM_CONTEXT).await.unwrap());
        let err = caps
            .require_capability(&Session { userid: 3 }, "moodle/contentbank:upload", SYSTEM_CONTEXT)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn unknown_context_is_not_found() {
        let db = db::connect_in_memory().await.unwrap();
        let err = ContextRecord::get(&db, 99).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        let system = ContextRecord::get(&db, SYSTEM_CONTEXT).await.unwrap();
        assert_eq!(system.contextlevel, CONTEXT_SYSTEM);
        assert_eq!(system.parentid, None);
    }
}
