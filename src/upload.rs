//! Content bank upload: a draft file becomes a content record of the type
//! that manages its extension, and the file moves into the record's area.

use uuid::Uuid;

use crate::{
    capability::ContextRecord,
    contentbank::{
        content::{COMPONENT, FILEAREA},
        contenttype::CAP_UPLOAD,
        Content, Registry,
    },
    error::AppError,
    models::NewContent,
    session::Session,
    AppState,
};

pub async fn upload_file(
    state: &AppState,
    session: &Session,
    contextid: i64,
    draftid: Uuid,
) -> Result<Content, AppError> {
    ContextRecord::get(&state.db, contextid).await?;
    state
        .caps
        .require_capability(session, CAP_UPLOAD, contextid)
        .await?;

    let file = state
        .storage
        .draft_files(session.userid, draftid)?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::InvalidInput("no file uploaded".into()))?;

    let extension = Registry::extension(&file.filename)
        .ok_or_else(|| AppError::UnsupportedExtension(file.filename.clone()))?;
    let handle = match state
        .registry
        .extension_supporter(&extension, &state.caps, session, contextid)
        .await?
    {
        Some(handle) => handle,
        None => {
            return Err(match state.registry.handler_for_extension(&extension, contextid) {
                Some(managed) => {
                    AppError::Forbidden(format!("contenttype/{}:upload", managed.plugin_name()))
                }
                None => AppError::UnsupportedExtension(extension),
            })
        }
    };

    let content = handle
        .create_content(
            &state.db,
            session,
            Some(NewContent {
                name: Some(file.filename.clone()),
                ..Default::default()
            }),
        )
        .await?;

    let moved = state
        .storage
        .save_draft_area_files(session.userid, draftid, contextid, COMPONENT, FILEAREA, content.id())
        .await;
    match moved {
        Ok(files) => {
            tracing::info!(
                content_id = content.id(),
                contextid,
                user_id = session.userid,
                files,
                filename = %file.filename,
                "content uploaded"
            );
            Ok(content)
        }
        Err(e) => {
            let id = content.id();
            tracing::warn!(content_id = id, error = %e, "file move failed, removing content");
            if let Err(cleanup) = content.delete(&state.db, &state.storage).await {
                tracing::error!(content_id = id, error = %cleanup, "could not remove content after failed upload");
            }
            Err(e.into())
        }
    }
}
