//! Local file storage.
//!
//! Uploads land in a per-user draft area first and are moved into a
//! permanent area addressed by (context, component, area, item id):
//!
//! ```text
//! <root>/draft/<userid>/<draftid>/<filename>
//! <root>/filedir/<contextid>/<component>/<area>/<itemid>/<filepath><filename>
//! ```

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("file storage io: {0}")]
    Io(#[from] std::io::Error),
    #[error("file storage walk: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("invalid file name {0:?}")]
    InvalidName(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    /// Directory inside the area, always starting and ending with `/`.
    pub filepath: String,
    pub filename: String,
    pub size: u64,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory the public file server exposes.
    pub fn filedir(&self) -> PathBuf {
        self.root.join("filedir")
    }

    fn draft_dir(&self, userid: i64, draftid: Uuid) -> PathBuf {
        self.root
            .join("draft")
            .join(userid.to_string())
            .join(draftid.to_string())
    }

    fn area_dir(&self, contextid: i64, component: &str, area: &str, itemid: i64) -> PathBuf {
        self.filedir()
            .join(contextid.to_string())
            .join(component)
            .join(area)
            .join(itemid.to_string())
    }

    /// Stores one uploaded file in a fresh draft area of `userid`.
    pub async fn save_draft_file(
        &self,
        userid: i64,
        filename: &str,
        bytes: &[u8],
    ) -> Result<Uuid, StorageError> {
        let filename = clean_filename(filename)?;
        let draftid = Uuid::new_v4();
        let dir = self.draft_dir(userid, draftid);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(&filename), bytes).await?;
        tracing::debug!(user_id = userid, %draftid, filename = %filename, size = bytes.len(), "draft file saved");
        Ok(draftid)
    }

    pub async fn discard_draft(&self, userid: i64, draftid: Uuid) -> Result<(), StorageError> {
        let dir = self.draft_dir(userid, draftid);
        if tokio::fs::try_exists(&dir).await? {
            tokio::fs::remove_dir_all(&dir).await?;
        }
        Ok(())
    }

    pub fn draft_files(&self, userid: i64, draftid: Uuid) -> Result<Vec<StoredFile>, StorageError> {
        list_files(&self.draft_dir(userid, draftid))
    }

    /// Files of an area ordered by path and name. A missing area is empty.
    pub fn get_area_files(
        &self,
        contextid: i64,
        component: &str,
        area: &str,
        itemid: i64,
    ) -> Result<Vec<StoredFile>, StorageError> {
        list_files(&self.area_dir(contextid, component, area, itemid))
    }

    /// Moves a draft area into a permanent area, replacing what was there.
    /// Returns the number of files moved.
    pub async fn save_draft_area_files(
        &self,
        userid: i64,
        draftid: Uuid,
        contextid: i64,
        component: &str,
        area: &str,
        itemid: i64,
    ) -> Result<usize, StorageError> {
        let draft = self.draft_dir(userid, draftid);
        let files = list_files(&draft)?;
        if files.is_empty() {
            return Ok(0);
        }

        let target = self.area_dir(contextid, component, area, itemid);
        if tokio::fs::try_exists(&target).await? {
            tokio::fs::remove_dir_all(&target).await?;
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&draft, &target).await?;
        tracing::debug!(contextid, component, area, itemid, files = files.len(), "draft area saved");
        Ok(files.len())
    }

    pub async fn delete_area_files(
        &self,
        contextid: i64,
        component: &str,
        area: &str,
        itemid: i64,
    ) -> Result<(), StorageError> {
        let dir = self.area_dir(contextid, component, area, itemid);
        if tokio::fs::try_exists(&dir).await? {
            tokio::fs::remove_dir_all(&dir).await?;
        }
        Ok(())
    }
}

fn list_files(dir: &Path) -> Result<Vec<StoredFile>, StorageError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        let mut filepath = String::from("/");
        if let Some(parent) = relative.parent() {
            for part in parent.components() {
                filepath.push_str(&part.as_os_str().to_string_lossy());
                filepath.push('/');
            }
        }
        files.push(StoredFile {
            filepath,
            filename: entry.file_name().to_string_lossy().into_owned(),
            size: entry.metadata()?.len(),
            path: entry.path().to_path_buf(),
        });
    }
    files.sort_by(|a, b| (&a.filepath, &a.filename).cmp(&(&b.filepath, &b.filename)));
    Ok(files)
}

/// Keeps only the last path component of a client supplied name.
pub fn clean_filename(name: &str) -> Result<String, StorageError> {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>();
    let base = base.trim();
    if base.is_empty() || base == "." || base == ".." {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(base.to_string())
}

const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Builds public urls for files served under `/pluginfile`.
#[derive(Debug, Clone, Default)]
pub struct PublicUrls {
    base: String,
}

impl PublicUrls {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    pub fn pluginfile_url(
        &self,
        contextid: i64,
        component: &str,
        area: &str,
        itemid: i64,
        filepath: &str,
        filename: &str,
    ) -> String {
        let mut url = format!(
            "{}/pluginfile/{}/{}/{}/{}",
            self.base,
            contextid,
            encode(component),
            encode(area),
            itemid
        );
        for part in filepath.split('/').filter(|p| !p.is_empty()) {
            url.push('/');
            url.push_str(&encode(part));
        }
        url.push('/');
        url.push_str(&encode(filename));
        url
    }
}

fn encode(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT).to_string()
}
