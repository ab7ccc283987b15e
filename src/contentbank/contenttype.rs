use std::sync::Arc;

use crate::{
    capability::Capabilities,
    db::{self, Db},
    error::AppError,
    models::{ContentRecord, NewContent},
    session::Session,
};

use super::content::Content;

pub const CAP_ACCESS: &str = "moodle/contentbank:access";
pub const CAP_UPLOAD: &str = "moodle/contentbank:upload";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    Upload,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Upload => "upload",
        }
    }
}

/// Policy of one kind of content bank content.
///
/// Implementations are stateless; the context they act in is carried by the
/// [`ContentTypeHandle`] the registry hands out. The hooks only add
/// restrictions on top of the capability checks the handle performs.
pub trait ContentType: Send + Sync {
    /// Short plugin name, e.g. `h5p`. The stored type tag is `contenttype_<name>`.
    fn plugin_name(&self) -> &'static str;

    fn implemented_features(&self) -> &'static [Feature];

    /// Lowercase extensions including the dot, e.g. `.h5p`.
    fn manageable_extensions(&self) -> &'static [&'static str];

    fn is_access_allowed(&self, _session: &Session, _contextid: i64) -> bool {
        true
    }

    fn is_upload_allowed(&self, _session: &Session, _contextid: i64) -> bool {
        true
    }

    /// HTML shown on the content view page.
    fn view_content(&self, _content: &Content, _fileurl: &str) -> String {
        String::new()
    }

    fn icon(&self, contentname: &str) -> String {
        pix_icon("f/unknown-64", contentname)
    }

    /// Content level check, on top of `can_access`.
    fn can_view(&self, _content: &Content) -> bool {
        true
    }
}

pub fn contenttype_name(kind: &dyn ContentType) -> String {
    format!("contenttype_{}", kind.plugin_name())
}

/// A registered content type bound to the context it is used in.
#[derive(Clone)]
pub struct ContentTypeHandle {
    kind: Arc<dyn ContentType>,
    contextid: i64,
}

impl ContentTypeHandle {
    pub(crate) fn new(kind: Arc<dyn ContentType>, contextid: i64) -> Self {
        Self { kind, contextid }
    }

    pub fn contextid(&self) -> i64 {
        self.contextid
    }

    pub fn kind(&self) -> &Arc<dyn ContentType> {
        &self.kind
    }

    pub fn contenttype_name(&self) -> String {
        contenttype_name(self.kind.as_ref())
    }

    pub fn plugin_name(&self) -> &'static str {
        self.kind.plugin_name()
    }

    pub fn manageable_extensions(&self) -> &'static [&'static str] {
        self.kind.manageable_extensions()
    }

    /// Inserts a content record of this type in the bound context.
    pub async fn create_content(
        &self,
        db: &Db,
        session: &Session,
        data: Option<NewContent>,
    ) -> Result<Content, AppError> {
        let data = data.unwrap_or_default();
        let usercreated = data.usercreated.unwrap_or(session.userid);
        let now = db::now();

        let record = sqlx::query_as::<_, ContentRecord>(
            r#"
            INSERT INTO contentbank_content
                (name, contenttype, contextid, instanceid, configdata,
                 usercreated, usermodified, timecreated, timemodified)
            VALUES (?1, ?2, ?3, NULL, ?4, ?5, ?5, ?6, ?6)
            RETURNING id, name, contenttype, contextid, instanceid, configdata,
                      usercreated, usermodified, timecreated, timemodified
            "#,
        )
        .bind(data.name.unwrap_or_default())
        .bind(self.contenttype_name())
        .bind(self.contextid)
        .bind(data.configdata.unwrap_or_default())
        .bind(usercreated)
        .bind(now)
        .fetch_one(db)
        .await?;

        tracing::info!(
            content_id = record.id,
            contenttype = %record.contenttype,
            contextid = record.contextid,
            user_id = usercreated,
            "content created"
        );
        Content::bind(record, self.kind.clone())
    }

    /// Both access capabilities, then the type's own access hook.
    pub async fn can_access(&self, caps: &Capabilities, session: &Session) -> Result<bool, AppError> {
        let typecap = format!("contenttype/{}:access", self.plugin_name());
        let allowed = caps.has_capability(session, CAP_ACCESS, self.contextid).await?
            && caps.has_capability(session, &typecap, self.contextid).await?;
        Ok(allowed && self.kind.is_access_allowed(session, self.contextid))
    }

    pub async fn can_upload(&self, caps: &Capabilities, session: &Session) -> Result<bool, AppError> {
        if !self.is_feature_supported(Feature::Upload) {
            return Ok(false);
        }
        if !self.can_access(caps, session).await? {
            return Ok(false);
        }
        let typecap = format!("contenttype/{}:upload", self.plugin_name());
        let allowed = caps.has_capability(session, CAP_UPLOAD, self.contextid).await?
            && caps.has_capability(session, &typecap, self.contextid).await?;
        Ok(allowed && self.kind.is_upload_allowed(session, self.contextid))
    }

    pub fn is_feature_supported(&self, feature: Feature) -> bool {
        self.kind.implemented_features().contains(&feature)
    }

    pub fn view_url(&self, contentid: i64) -> String {
        format!("/contentbank/view/{contentid}")
    }

    pub fn view_content(&self, content: &Content, fileurl: &str) -> String {
        self.kind.view_content(content, fileurl)
    }

    pub fn icon(&self, contentname: &str) -> String {
        self.kind.icon(contentname)
    }
}

pub(crate) fn pix_icon(pix: &str, alt: &str) -> String {
    let alt = escape_html(alt);
    format!(r#"<img class="icon iconsize-big" src="/pix/{pix}.png" alt="{alt}" title="{alt}">"#)
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::capability::SYSTEM_CONTEXT;

    /// Access denied by the type itself; no upload feature.
    pub(crate) struct Locked;

    impl ContentType for Locked {
        fn plugin_name(&self) -> &'static str {
            "locked"
        }
        fn implemented_features(&self) -> &'static [Feature] {
            &[]
        }
        fn manageable_extensions(&self) -> &'static [&'static str] {
            &[".lck"]
        }
        fn is_access_allowed(&self, _session: &Session, _contextid: i64) -> bool {
            false
        }
    }

    /// Uploads allowed by capabilities, refused by the type.
    pub(crate) struct ReadOnly;

    impl ContentType for ReadOnly {
        fn plugin_name(&self) -> &'static str {
            "readonly"
        }
        fn implemented_features(&self) -> &'static [Feature] {
            &[Feature::Upload]
        }
        fn manageable_extensions(&self) -> &'static [&'static str] {
            &[".txt"]
        }
        fn is_upload_allowed(&self, _session: &Session, _contextid: i64) -> bool {
            false
        }
    }

    async fn setup() -> (Db, Capabilities) {
        let db = db::connect_in_memory().await.unwrap();
        let caps = Capabilities::new(db.clone(), Vec::<i64>::new());
        (db, caps)
    }

    async fn grant_all(caps: &Capabilities, userid: i64, plugin: &str) {
        for cap in [
            CAP_ACCESS.to_string(),
            CAP_UPLOAD.to_string(),
            format!("contenttype/{plugin}:access"),
            format!("contenttype/{plugin}:upload"),
        ] {
            caps.grant(userid, &cap, SYSTEM_CONTEXT).await.unwrap();
        }
    }

    #[tokio::test]
    async fn capabilities_gate_access_and_upload() {
        let (_db, caps) = setup().await;
        let handle = ContentTypeHandle::new(Arc::new(crate::contentbank::h5p::H5p), SYSTEM_CONTEXT);
        let user = Session { userid: 4 };

        assert!(!handle.can_access(&caps, &user).await.unwrap());
        assert!(!handle.can_upload(&caps, &user).await.unwrap());

        caps.grant(4, CAP_ACCESS, SYSTEM_CONTEXT).await.unwrap();
        assert!(!handle.can_access(&caps, &user).await.unwrap());
        caps.grant(4, "contenttype/h5p:access", SYSTEM_CONTEXT).await.unwrap();
        assert!(handle.can_access(&caps, &user).await.unwrap());
        assert!(!handle.can_upload(&caps, &user).await.unwrap());

        caps.grant(4, CAP_UPLOAD, SYSTEM_CONTEXT).await.unwrap();
        caps.grant(4, "contenttype/h5p:upload", SYSTEM_CONTEXT).await.unwrap();
        assert!(handle.can_upload(&caps, &user).await.unwrap());
    }

    #[tokio::test]
    async fn hooks_restrict_but_never_bypass() {
        let (_db, caps) = setup().await;
        let user = Session { userid: 4 };

        let locked = ContentTypeHandle::new(Arc::new(Locked), SYSTEM_CONTEXT);
        grant_all(&caps, 4, "locked").await;
        assert!(!locked.can_access(&caps, &user).await.unwrap());
        assert!(!locked.can_upload(&caps, &user).await.unwrap());
        assert!(!locked.is_feature_supported(Feature::Upload));

        let readonly = ContentTypeHandle::new(Arc::new(ReadOnly), SYSTEM_CONTEXT);
        // No capabilities yet: the permissive access hook does not help.
        assert!(!readonly.can_access(&caps, &user).await.unwrap());
        grant_all(&caps, 4, "readonly").await;
        assert!(readonly.can_access(&caps, &user).await.unwrap());
        assert!(!readonly.can_upload(&caps, &user).await.unwrap());
    }

    #[tokio::test]
    async fn create_content_stamps_metadata() {
        let (db, _caps) = setup().await;
        let handle = ContentTypeHandle::new(Arc::new(crate::contentbank::h5p::H5p), SYSTEM_CONTEXT);
        let session = Session { userid: 9 };

        let content = handle.create_content(&db, &session, None).await.unwrap();
        let rec = content.record();
        assert!(rec.id > 0);
        assert_eq!(rec.contenttype, "contenttype_h5p");
        assert_eq!(rec.contextid, SYSTEM_CONTEXT);
        assert_eq!(rec.name, "");
        assert_eq!(rec.configdata, "");
        assert_eq!(rec.instanceid, None);
        assert_eq!((rec.usercreated, rec.usermodified), (9, 9));
        assert_eq!(rec.timecreated, rec.timemodified);

        let named = handle
            .create_content(
                &db,
                &session,
                Some(NewContent {
                    name: Some("quiz.h5p".into()),
                    usercreated: Some(3),
                    configdata: Some("{\"a\":1}".into()),
                }),
            )
            .await
            .unwrap();
        assert_eq!(named.name(), "quiz.h5p");
        assert_eq!(named.record().usercreated, 3);
        assert_eq!(named.configdata(), "{\"a\":1}");
        assert_ne!(named.id(), content.id());
    }

    #[test]
    fn names_and_views() {
        let handle = ContentTypeHandle::new(Arc::new(ReadOnly), 5);
        assert_eq!(handle.contenttype_name(), "contenttype_readonly");
        assert_eq!(handle.plugin_name(), "readonly");
        assert_eq!(handle.view_url(12), "/contentbank/view/12");
        assert_eq!(Feature::Upload.as_str(), "upload");
        assert!(handle.icon("a\"b").contains("f/unknown-64"));
        assert!(handle.icon("a\"b").contains("alt=\"a&quot;b\""));
    }
}
