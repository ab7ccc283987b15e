use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use tower_http::services::ServeDir;

use crate::{
    activity::{Activity, CAP_ADDINSTANCE, CAP_REVIEWATTEMPTS, CAP_SUBMIT, CAP_VIEW},
    attempt::Attempt,
    capability::{ContextRecord, SYSTEM_CONTEXT},
    contentbank::{contenttype::CAP_ACCESS, Content},
    error::AppError,
    models::*,
    session::Session,
    statement::NewResult,
    upload, AppState,
};

type ApiResult<T> = Result<T, (StatusCode, String)>;

pub fn router(state: AppState) -> Router {
    let public_dir = state.storage.filedir();
    Router::new()
        // h5p activity tracking
        .route("/api/activities", post(create_activity))
        .route(
            "/api/activities/:id/attempts",
            get(list_attempts).post(new_attempt).delete(delete_all_attempts),
        )
        .route("/api/activities/:id/attempts/latest", post(last_attempt))
        .route("/api/activities/:id/statements", post(save_statement))
        .route("/api/attempts/:id", get(get_attempt).delete(delete_attempt))
        .route("/api/attempts/:id/results", get(attempt_results))
        // content bank
        .route("/api/contentbank", get(list_contents))
        .route("/api/contentbank/extensions", get(supported_extensions))
        .route("/api/contentbank/upload", post(upload_content))
        .route("/api/contentbank/:id", get(get_content).patch(update_content))
        .route("/contentbank/view/:id", get(view_content))
        // public content files
        .nest_service("/pluginfile", ServeDir::new(public_dir))
        .with_state(state)
}

// --- h5p activity ---

async fn create_activity(
    State(state): State<AppState>,
    session: Session,
    Json(req): Json<CreateActivityReq>,
) -> ApiResult<Json<ActivityRecord>> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(e400("name is required"));
    }
    let parent = req.parent_contextid.unwrap_or(SYSTEM_CONTEXT);
    ContextRecord::get(&state.db, parent).await.map_err(reject)?;
    state
        .caps
        .require_capability(&session, CAP_ADDINSTANCE, parent)
        .await
        .map_err(reject)?;

    let rec = Activity::create(&state.db, name, parent).await.map_err(reject)?;
    Ok(Json(rec))
}

async fn list_attempts(
    State(state): State<AppState>,
    session: Session,
    Path(activity_id): Path<i64>,
    Query(filter): Query<UserFilter>,
) -> ApiResult<Json<Vec<AttemptRecord>>> {
    let activity = Activity::get(&state.db, activity_id).await.map_err(reject)?;
    state
        .caps
        .require_capability(&session, CAP_VIEW, activity.contextid)
        .await
        .map_err(reject)?;
    if filter.userid != Some(session.userid) {
        state
            .caps
            .require_capability(&session, CAP_REVIEWATTEMPTS, activity.contextid)
            .await
            .map_err(reject)?;
    }

    let attempts = Attempt::list(&state.db, activity.id, filter.userid)
        .await
        .map_err(reject)?;
    Ok(Json(attempts.into_iter().map(Attempt::into_record).collect()))
}

async fn new_attempt(
    State(state): State<AppState>,
    session: Session,
    Path(activity_id): Path<i64>,
) -> ApiResult<Json<AttemptRecord>> {
    let activity = submittable_activity(&state, &session, activity_id).await?;
    let attempt = Attempt::new_attempt(&state.db, session.userid, activity.id)
        .await
        .map_err(reject)?;
    Ok(Json(attempt.into_record()))
}

async fn last_attempt(
    State(state): State<AppState>,
    session: Session,
    Path(activity_id): Path<i64>,
) -> ApiResult<Json<AttemptRecord>> {
    let activity = submittable_activity(&state, &session, activity_id).await?;
    let attempt = Attempt::last_attempt(&state.db, session.userid, activity.id)
        .await
        .map_err(reject)?;
    Ok(Json(attempt.into_record()))
}

async fn delete_all_attempts(
    State(state): State<AppState>,
    session: Session,
    Path(activity_id): Path<i64>,
    Query(filter): Query<UserFilter>,
) -> ApiResult<Json<serde_json::Value>> {
    let activity = Activity::get(&state.db, activity_id).await.map_err(reject)?;
    state
        .caps
        .require_capability(&session, CAP_ADDINSTANCE, activity.contextid)
        .await
        .map_err(reject)?;

    let deleted = Attempt::delete_all_attempts(&state.db, activity.id, filter.userid)
        .await
        .map_err(reject)?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

async fn save_statement(
    State(state): State<AppState>,
    session: Session,
    Path(activity_id): Path<i64>,
    Json(req): Json<StatementReq>,
) -> ApiResult<Json<serde_json::Value>> {
    let activity = submittable_activity(&state, &session, activity_id).await?;
    let verb = req.statement.verb.as_ref().map(|v| v.id.as_str()).unwrap_or("");
    tracing::info!(activity_id, user_id = session.userid, verb, "xAPI statement received");

    // Checked before the attempt lookup, which may create an attempt.
    if NewResult::from_statement(&req.statement, &req.subcontent).is_none() {
        tracing::debug!(activity_id, user_id = session.userid, "statement rejected");
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            "statement needs an object definition and a result".into(),
        ));
    }

    let mut attempt = Attempt::last_attempt(&state.db, session.userid, activity.id)
        .await
        .map_err(reject)?;
    let saved = attempt
        .save_statement(&state.db, &req.statement, &req.subcontent, state.score_propagation)
        .await
        .map_err(reject)?;

    Ok(Json(serde_json::json!({ "ok": saved, "attempt": attempt.record() })))
}

async fn get_attempt(
    State(state): State<AppState>,
    session: Session,
    Path(attempt_id): Path<i64>,
) -> ApiResult<Json<AttemptRecord>> {
    let attempt = readable_attempt(&state, &session, attempt_id).await?;
    Ok(Json(attempt.into_record()))
}

async fn attempt_results(
    State(state): State<AppState>,
    session: Session,
    Path(attempt_id): Path<i64>,
) -> ApiResult<Json<Vec<AttemptResultRecord>>> {
    let attempt = readable_attempt(&state, &session, attempt_id).await?;
    let results = attempt.results(&state.db).await.map_err(reject)?;
    Ok(Json(results))
}

async fn delete_attempt(
    State(state): State<AppState>,
    session: Session,
    Path(attempt_id): Path<i64>,
) -> ApiResult<StatusCode> {
    let attempt = Attempt::get(&state.db, attempt_id).await.map_err(reject)?;
    let activity = Activity::get(&state.db, attempt.h5pactivityid())
        .await
        .map_err(reject)?;
    state
        .caps
        .require_capability(&session, CAP_ADDINSTANCE, activity.contextid)
        .await
        .map_err(reject)?;

    Attempt::delete_attempt(&state.db, attempt).await.map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn submittable_activity(
    state: &AppState,
    session: &Session,
    activity_id: i64,
) -> ApiResult<ActivityRecord> {
    let activity = Activity::get(&state.db, activity_id).await.map_err(reject)?;
    state
        .caps
        .require_capability(session, CAP_SUBMIT, activity.contextid)
        .await
        .map_err(reject)?;
    Ok(activity)
}

/// Own attempts need view; anybody else's need reviewattempts.
async fn readable_attempt(state: &AppState, session: &Session, attempt_id: i64) -> ApiResult<Attempt> {
    let attempt = Attempt::get(&state.db, attempt_id).await.map_err(reject)?;
    let activity = Activity::get(&state.db, attempt.h5pactivityid())
        .await
        .map_err(reject)?;
    let capability = if attempt.userid() == session.userid {
        CAP_VIEW
    } else {
        CAP_REVIEWATTEMPTS
    };
    state
        .caps
        .require_capability(session, capability, activity.contextid)
        .await
        .map_err(reject)?;
    Ok(attempt)
}

// --- content bank ---

async fn list_contents(
    State(state): State<AppState>,
    session: Session,
    Query(q): Query<ContextQuery>,
) -> ApiResult<Json<Vec<ContentView>>> {
    let contextid = q.contextid.unwrap_or(SYSTEM_CONTEXT);
    ContextRecord::get(&state.db, contextid).await.map_err(reject)?;
    state
        .caps
        .require_capability(&session, CAP_ACCESS, contextid)
        .await
        .map_err(reject)?;

    let contents = Content::list(&state.db, &state.registry, contextid)
        .await
        .map_err(reject)?;
    let mut views = Vec::with_capacity(contents.len());
    for content in contents {
        let allowed = content
            .handler()
            .can_access(&state.caps, &session)
            .await
            .map_err(reject)?;
        if allowed && content.can_view() {
            views.push(content_view(&state, content).map_err(reject)?);
        }
    }
    Ok(Json(views))
}

async fn supported_extensions(
    State(state): State<AppState>,
    session: Session,
    Query(q): Query<ContextQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let contextid = q.contextid.unwrap_or(SYSTEM_CONTEXT);
    ContextRecord::get(&state.db, contextid).await.map_err(reject)?;
    let accepted = state
        .registry
        .supported_extensions_as_string(&state.caps, &session, contextid)
        .await
        .map_err(reject)?;
    Ok(Json(serde_json::json!({ "extensions": accepted })))
}

async fn upload_content(
    State(state): State<AppState>,
    session: Session,
    Query(q): Query<ContextQuery>,
    mut mp: Multipart,
) -> ApiResult<Json<ContentView>> {
    let contextid = q.contextid.unwrap_or(SYSTEM_CONTEXT);
    let mut draft = None;

    while let Some(field) = mp.next_field().await.map_err(e400)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("").to_string();
        let bytes = field.bytes().await.map_err(e400)?;
        let draftid = state
            .storage
            .save_draft_file(session.userid, &filename, &bytes)
            .await
            .map_err(|e| reject(e.into()))?;
        draft = Some(draftid);
        break;
    }
    let draftid = draft.ok_or_else(|| e400("file is required"))?;

    match upload::upload_file(&state, &session, contextid, draftid).await {
        Ok(content) => Ok(Json(content_view(&state, content).map_err(reject)?)),
        Err(e) => {
            if let Err(cleanup) = state.storage.discard_draft(session.userid, draftid).await {
                tracing::warn!(error = %cleanup, "could not discard draft");
            }
            Err(reject(e))
        }
    }
}

async fn get_content(
    State(state): State<AppState>,
    session: Session,
    Path(content_id): Path<i64>,
) -> ApiResult<Json<ContentView>> {
    let content = viewable_content(&state, &session, content_id).await?;
    Ok(Json(content_view(&state, content).map_err(reject)?))
}

async fn update_content(
    State(state): State<AppState>,
    session: Session,
    Path(content_id): Path<i64>,
    Json(req): Json<UpdateContentReq>,
) -> ApiResult<Json<ContentView>> {
    let mut content = Content::load(&state.db, &state.registry, content_id)
        .await
        .map_err(reject)?;
    let handler = content.handler();
    if !handler.can_upload(&state.caps, &session).await.map_err(reject)? {
        return Err(reject(AppError::Forbidden(format!(
            "contenttype/{}:upload",
            handler.plugin_name()
        ))));
    }

    if let Some(instanceid) = req.instanceid {
        content
            .set_instanceid(&state.db, &session, instanceid)
            .await
            .map_err(reject)?;
    }
    if let Some(configdata) = req.configdata.as_deref() {
        content
            .set_configdata(&state.db, &session, configdata)
            .await
            .map_err(reject)?;
    }
    Ok(Json(content_view(&state, content).map_err(reject)?))
}

async fn view_content(
    State(state): State<AppState>,
    session: Session,
    Path(content_id): Path<i64>,
) -> ApiResult<Html<String>> {
    let content = viewable_content(&state, &session, content_id).await?;
    let fileurl = content
        .get_file_url(&state.storage, &state.urls)
        .map_err(reject)?;
    let handler = content.handler();
    let body = handler.view_content(&content, &fileurl);
    let title = crate::contentbank::contenttype::escape_html(content.name());

    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>{title}</title>
</head>
<body>
<div class='contentbank-content' data-contenttype='{contenttype}'>
{body}
</div>
</body>
</html>"#,
        contenttype = handler.contenttype_name(),
    );
    Ok(Html(html))
}

async fn viewable_content(state: &AppState, session: &Session, content_id: i64) -> ApiResult<Content> {
    let content = Content::load(&state.db, &state.registry, content_id)
        .await
        .map_err(reject)?;
    let allowed = content
        .handler()
        .can_access(&state.caps, session)
        .await
        .map_err(reject)?;
    if !allowed || !content.can_view() {
        return Err(reject(AppError::Forbidden(CAP_ACCESS.into())));
    }
    Ok(content)
}

fn content_view(state: &AppState, content: Content) -> Result<ContentView, AppError> {
    let fileurl = content.get_file_url(&state.storage, &state.urls)?;
    Ok(ContentView {
        record: content.into_record(),
        fileurl: (!fileurl.is_empty()).then_some(fileurl),
    })
}

// --- helpers ---
fn e400<T: ToString>(msg: T) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, msg.to_string())
}

fn reject(e: AppError) -> (StatusCode, String) {
    let status = e.status();
    if status.is_server_error() {
        tracing::error!(error = %e, "internal error");
    } else {
        tracing::debug!(error = %e, %status, "request rejected");
    }
    (status, e.to_string())
}
