use crate::{
    capability::{ContextRecord, CONTEXT_MODULE},
    db::{self, Db},
    error::AppError,
    models::ActivityRecord,
};

pub const CAP_ADDINSTANCE: &str = "mod/h5pactivity:addinstance";
pub const CAP_VIEW: &str = "mod/h5pactivity:view";
pub const CAP_SUBMIT: &str = "mod/h5pactivity:submit";
pub const CAP_REVIEWATTEMPTS: &str = "mod/h5pactivity:reviewattempts";

pub struct Activity;

impl Activity {
    /// Creates an H5P activity and its module context below `parent_contextid`.
    pub async fn create(
        db: &Db,
        name: &str,
        parent_contextid: i64,
    ) -> Result<ActivityRecord, AppError> {
        let now = db::now();
        let mut tx = db.begin().await?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO h5pactivity (name, contextid, timecreated, timemodified)
            VALUES (?1, 0, ?2, ?2)
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let context = ContextRecord::create(&mut tx, CONTEXT_MODULE, id, parent_contextid).await?;

        let rec = sqlx::query_as::<_, ActivityRecord>(
            r#"
            UPDATE h5pactivity SET contextid = ?1 WHERE id = ?2
            RETURNING id, name, contextid, timecreated, timemodified
            "#,
        )
        .bind(context.id)
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(activity_id = rec.id, contextid = rec.contextid, "h5p activity created");
        Ok(rec)
    }

    pub async fn get(db: &Db, id: i64) -> Result<ActivityRecord, AppError> {
        sqlx::query_as::<_, ActivityRecord>(
            "SELECT id, name, contextid, timecreated, timemodified FROM h5pactivity WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("h5p activity {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::SYSTEM_CONTEXT;

    #[tokio::test]
    async fn create_links_module_context() {
        let db = db::connect_in_memory().await.unwrap();
        let rec = Activity::create(&db, "Quiz", SYSTEM_CONTEXT).await.unwrap();
        assert_eq!(rec.name, "Quiz");

        let ctx = ContextRecord::get(&db, rec.contextid).await.unwrap();
        assert_eq!(ctx.contextlevel, CONTEXT_MODULE);
        assert_eq!(ctx.instanceid, rec.id);
        assert_eq!(ctx.parentid, Some(SYSTEM_CONTEXT));

        assert_eq!(Activity::get(&db, rec.id).await.unwrap(), rec);
    }

    #[tokio::test]
    async fn unknown_parent_context_fails() {
        let db = db::connect_in_memory().await.unwrap();
        assert!(Activity::create(&db, "Quiz", 404).await.is_err());
        assert!(matches!(
            Activity::get(&db, 1).await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }
}
