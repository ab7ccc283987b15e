use std::{collections::HashMap, sync::Arc};

use crate::{capability::Capabilities, error::AppError, session::Session};

use super::{
    contenttype::{contenttype_name, ContentType, ContentTypeHandle},
    h5p::H5p,
};

/// Registered content types, keyed by their `contenttype_<plugin>` tag.
#[derive(Default)]
pub struct Registry {
    types: Vec<(String, Arc<dyn ContentType>)>,
    by_tag: HashMap<String, usize>,
    by_extension: HashMap<String, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The content types shipped with the service.
    pub fn with_defaults() -> Result<Self, AppError> {
        let mut registry = Self::new();
        registry.register(Arc::new(H5p))?;
        Ok(registry)
    }

    /// Adds a content type. Names and extensions are checked here, once, so
    /// lookups never have to.
    pub fn register(&mut self, kind: Arc<dyn ContentType>) -> Result<(), AppError> {
        let plugin = kind.plugin_name();
        if plugin.is_empty() || !plugin.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
            return Err(AppError::Coding(format!("invalid content type plugin name {plugin:?}")));
        }
        let tag = contenttype_name(kind.as_ref());
        if self.by_tag.contains_key(&tag) {
            return Err(AppError::Coding(format!("content type {tag} registered twice")));
        }
        for ext in kind.manageable_extensions() {
            if !ext.starts_with('.') || ext.len() < 2 || *ext != ext.to_lowercase() {
                return Err(AppError::Coding(format!("{tag} declares invalid extension {ext:?}")));
            }
            if let Some(owner) = self.by_extension.get(*ext) {
                return Err(AppError::Coding(format!(
                    "{tag} declares {ext} already managed by {}",
                    self.types[*owner].0
                )));
            }
        }

        let index = self.types.len();
        for ext in kind.manageable_extensions() {
            self.by_extension.insert(ext.to_string(), index);
        }
        self.by_tag.insert(tag.clone(), index);
        tracing::debug!(contenttype = %tag, "content type registered");
        self.types.push((tag, kind));
        Ok(())
    }

    pub fn get(&self, tag: &str) -> Option<&Arc<dyn ContentType>> {
        self.by_tag.get(tag).map(|i| &self.types[*i].1)
    }

    /// The type registered under `tag`, bound to `contextid`.
    pub fn handler(&self, tag: &str, contextid: i64) -> Result<ContentTypeHandle, AppError> {
        self.get(tag)
            .map(|kind| ContentTypeHandle::new(kind.clone(), contextid))
            .ok_or_else(|| AppError::Coding(format!("content type {tag} not found")))
    }

    /// All types in registration order, bound to `contextid`.
    pub fn handlers(&self, contextid: i64) -> Vec<ContentTypeHandle> {
        self.types
            .iter()
            .map(|(_, kind)| ContentTypeHandle::new(kind.clone(), contextid))
            .collect()
    }

    /// Lowercase extension of a file name, dot included.
    pub fn extension(filename: &str) -> Option<String> {
        let (stem, ext) = filename.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(format!(".{}", ext.to_lowercase()))
    }

    /// The type managing `extension`, whatever the user may do with it.
    pub fn handler_for_extension(&self, extension: &str, contextid: i64) -> Option<ContentTypeHandle> {
        self.by_extension
            .get(&extension.to_lowercase())
            .map(|i| ContentTypeHandle::new(self.types[*i].1.clone(), contextid))
    }

    /// The type that manages `extension` and lets the user upload here.
    pub async fn extension_supporter(
        &self,
        extension: &str,
        caps: &Capabilities,
        session: &Session,
        contextid: i64,
    ) -> Result<Option<ContentTypeHandle>, AppError> {
        let Some(handle) = self.handler_for_extension(extension, contextid) else {
            return Ok(None);
        };
        if handle.can_upload(caps, session).await? {
            Ok(Some(handle))
        } else {
            Ok(None)
        }
    }

    /// Extensions the user may upload in the context.
    pub async fn supported_extensions(
        &self,
        caps: &Capabilities,
        session: &Session,
        contextid: i64,
    ) -> Result<Vec<&'static str>, AppError> {
        let mut extensions = Vec::new();
        for handle in self.handlers(contextid) {
            if handle.can_upload(caps, session).await? {
                extensions.extend_from_slice(handle.manageable_extensions());
            }
        }
        Ok(extensions)
    }

    pub async fn supported_extensions_as_string(
        &self,
        caps: &Capabilities,
        session: &Session,
        contextid: i64,
    ) -> Result<String, AppError> {
        Ok(self.supported_extensions(caps, session, contextid).await?.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        capability::SYSTEM_CONTEXT,
        contentbank::contenttype::{
            tests::{Locked, ReadOnly},
            Feature, CAP_ACCESS, CAP_UPLOAD,
        },
        db,
    };

    struct Clash;

    impl ContentType for Clash {
        fn plugin_name(&self) -> &'static str {
            "clash"
        }
        fn implemented_features(&self) -> &'static [Feature] {
            &[Feature::Upload]
        }
        fn manageable_extensions(&self) -> &'static [&'static str] {
            &[".h5p"]
        }
    }

    struct BadName;

    impl ContentType for BadName {
        fn plugin_name(&self) -> &'static str {
            "Bad\\Name"
        }
        fn implemented_features(&self) -> &'static [Feature] {
            &[]
        }
        fn manageable_extensions(&self) -> &'static [&'static str] {
            &[]
        }
    }

    #[test]
    fn registration_is_validated() {
        let mut registry = Registry::with_defaults().unwrap();
        assert!(registry.get("contenttype_h5p").is_some());

        assert!(matches!(registry.register(Arc::new(H5p)), Err(AppError::Coding(_))));
        assert!(matches!(registry.register(Arc::new(Clash)), Err(AppError::Coding(_))));
        assert!(matches!(registry.register(Arc::new(BadName)), Err(AppError::Coding(_))));
        assert!(registry.get("contenttype_clash").is_none());

        registry.register(Arc::new(Locked)).unwrap();
        assert_eq!(registry.handlers(SYSTEM_CONTEXT).len(), 2);
        assert!(registry.handler("contenttype_locked", 4).is_ok());
        assert!(matches!(
            registry.handler("contenttype_nope", 4),
            Err(AppError::Coding(_))
        ));
    }

    #[test]
    fn extension_of_filename() {
        assert_eq!(Registry::extension("Quiz.H5P").as_deref(), Some(".h5p"));
        assert_eq!(Registry::extension("archive.tar.gz").as_deref(), Some(".gz"));
        assert_eq!(Registry::extension("README"), None);
        assert_eq!(Registry::extension(".hidden"), None);
        assert_eq!(Registry::extension("trailing."), None);
    }

    #[tokio::test]
    async fn supporters_follow_upload_permission() {
        let db = db::connect_in_memory().await.unwrap();
        let caps = Capabilities::new(db, Vec::<i64>::new());
        let mut registry = Registry::with_defaults().unwrap();
        registry.register(Arc::new(ReadOnly)).unwrap();
        let user = Session { userid: 3 };

        assert!(registry
            .extension_supporter(".h5p", &caps, &user, SYSTEM_CONTEXT)
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            registry.supported_extensions_as_string(&caps, &user, SYSTEM_CONTEXT).await.unwrap(),
            ""
        );

        for cap in [CAP_ACCESS, CAP_UPLOAD, "contenttype/h5p:access", "contenttype/h5p:upload",
            "contenttype/readonly:access", "contenttype/readonly:upload"]
        {
            caps.grant(3, cap, SYSTEM_CONTEXT).await.unwrap();
        }

        let supporter = registry
            .extension_supporter(".H5P", &caps, &user, SYSTEM_CONTEXT)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(supporter.plugin_name(), "h5p");
        assert_eq!(supporter.contextid(), SYSTEM_CONTEXT);
        // Read-only type refuses uploads even with every capability.
        assert!(registry
            .extension_supporter(".txt", &caps, &user, SYSTEM_CONTEXT)
            .await
            .unwrap()
            .is_none());
        assert!(registry
            .extension_supporter(".docx", &caps, &user, SYSTEM_CONTEXT)
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            registry.supported_extensions_as_string(&caps, &user, SYSTEM_CONTEXT).await.unwrap(),
            ".h5p"
        );
    }
}
