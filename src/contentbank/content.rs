use std::{fmt, sync::Arc};

use crate::{
    db::{self, Db},
    error::AppError,
    models::ContentRecord,
    session::Session,
    storage::{FileStorage, PublicUrls, StoredFile},
};

use super::{
    contenttype::{contenttype_name, ContentType, ContentTypeHandle},
    registry::Registry,
};

pub const COMPONENT: &str = "contentbank";
pub const FILEAREA: &str = "public";

const CONTENT_COLUMNS: &str = "id, name, contenttype, contextid, instanceid, configdata, \
     usercreated, usermodified, timecreated, timemodified";

/// A stored content bank record together with the type that manages it.
pub struct Content {
    record: ContentRecord,
    kind: Arc<dyn ContentType>,
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Content").field("record", &self.record).finish()
    }
}

impl Content {
    /// Wraps a record. Fails when its type tag is not registered or the
    /// record has no id assigned.
    pub fn new(record: ContentRecord, registry: &Registry) -> Result<Content, AppError> {
        let kind = registry.get(&record.contenttype).ok_or_else(|| {
            AppError::Coding(format!("content type {} not found", record.contenttype))
        })?;
        Self::bind(record, kind.clone())
    }

    pub(crate) fn bind(record: ContentRecord, kind: Arc<dyn ContentType>) -> Result<Content, AppError> {
        if contenttype_name(kind.as_ref()) != record.contenttype {
            return Err(AppError::Coding(format!(
                "content type {} not found",
                record.contenttype
            )));
        }
        if record.id <= 0 {
            return Err(AppError::Coding("invalid content id".into()));
        }
        Ok(Content { record, kind })
    }

    pub async fn load(db: &Db, registry: &Registry, id: i64) -> Result<Content, AppError> {
        let sql = format!("SELECT {CONTENT_COLUMNS} FROM contentbank_content WHERE id = ?1");
        let record = sqlx::query_as::<_, ContentRecord>(&sql)
            .bind(id)
            .fetch_optional(db)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("content {id}")))?;
        Self::new(record, registry)
    }

    /// Contents of a context, by name. Records of unregistered types are skipped.
    pub async fn list(db: &Db, registry: &Registry, contextid: i64) -> Result<Vec<Content>, AppError> {
        let sql = format!(
            "SELECT {CONTENT_COLUMNS} FROM contentbank_content WHERE contextid = ?1 ORDER BY name, id"
        );
        let records = sqlx::query_as::<_, ContentRecord>(&sql)
            .bind(contextid)
            .fetch_all(db)
            .await?;
        let mut contents = Vec::with_capacity(records.len());
        for record in records {
            match registry.get(&record.contenttype) {
                Some(kind) => contents.push(Self::bind(record, kind.clone())?),
                None => tracing::warn!(
                    content_id = record.id,
                    contenttype = %record.contenttype,
                    "skipping content of unsupported type"
                ),
            }
        }
        Ok(contents)
    }

    pub fn record(&self) -> &ContentRecord {
        &self.record
    }

    pub fn into_record(self) -> ContentRecord {
        self.record
    }

    pub fn content_type(&self) -> &str {
        &self.record.contenttype
    }

    /// The content's type bound to the content's context.
    pub fn handler(&self) -> ContentTypeHandle {
        ContentTypeHandle::new(self.kind.clone(), self.record.contextid)
    }

    pub fn id(&self) -> i64 {
        self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn contextid(&self) -> i64 {
        self.record.contextid
    }

    pub fn instanceid(&self) -> Option<i64> {
        self.record.instanceid
    }

    pub fn configdata(&self) -> &str {
        &self.record.configdata
    }

    /// Persists the whole record, stamping who modified it and when.
    pub async fn update_content(&mut self, db: &Db, session: &Session) -> Result<bool, AppError> {
        self.record.usermodified = session.userid;
        self.record.timemodified = db::now();
        let done = sqlx::query(
            r#"
            UPDATE contentbank_content
               SET name = ?1, instanceid = ?2, configdata = ?3,
                   usermodified = ?4, timemodified = ?5
             WHERE id = ?6
            "#,
        )
        .bind(&self.record.name)
        .bind(self.record.instanceid)
        .bind(&self.record.configdata)
        .bind(self.record.usermodified)
        .bind(self.record.timemodified)
        .bind(self.record.id)
        .execute(db)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    pub async fn set_instanceid(
        &mut self,
        db: &Db,
        session: &Session,
        instanceid: i64,
    ) -> Result<bool, AppError> {
        self.record.instanceid = Some(instanceid);
        self.update_content(db, session).await
    }

    pub async fn set_configdata(
        &mut self,
        db: &Db,
        session: &Session,
        configdata: &str,
    ) -> Result<bool, AppError> {
        self.record.configdata = configdata.to_string();
        self.update_content(db, session).await
    }

    /// Removes the record, then its files. The record is gone even when the
    /// file area cannot be cleared; that error is still returned.
    pub async fn delete(self, db: &Db, storage: &FileStorage) -> Result<(), AppError> {
        sqlx::query("DELETE FROM contentbank_content WHERE id = ?1")
            .bind(self.id())
            .execute(db)
            .await?;
        tracing::info!(content_id = self.id(), "content deleted");
        storage
            .delete_area_files(self.contextid(), COMPONENT, FILEAREA, self.id())
            .await?;
        Ok(())
    }

    /// First file of the content's public area.
    pub fn get_file(&self, storage: &FileStorage) -> Result<Option<StoredFile>, AppError> {
        let files = storage.get_area_files(self.contextid(), COMPONENT, FILEAREA, self.id())?;
        Ok(files.into_iter().next())
    }

    /// Public url of the content file, empty when there is none.
    pub fn get_file_url(&self, storage: &FileStorage, urls: &PublicUrls) -> Result<String, AppError> {
        let Some(file) = self.get_file(storage)? else {
            return Ok(String::new());
        };
        Ok(urls.pluginfile_url(
            self.contextid(),
            COMPONENT,
            FILEAREA,
            self.id(),
            &file.filepath,
            &file.filename,
        ))
    }

    pub fn can_view(&self) -> bool {
        self.kind.can_view(self)
    }
}
