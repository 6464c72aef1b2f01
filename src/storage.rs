//! 分层文件存储：作用域解析、文件名清洗、限长流式写入与删除后的空目录回收。

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::fs::Metadata;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ErrorKind};
use tracing::{debug, info};

use crate::atomic::AtomicFile;
use crate::config::{
    ALLOWED_CONTENT_TYPES, DEFAULT_MAX_UPLOAD_SIZE, STREAM_CHUNK_SIZE, UPLOADS_MARKER,
};

static COURSE_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"course_(\d+)").expect("course id pattern"));

#[derive(Clone, Copy, Debug)]
pub struct StorageLimits {
    pub max_upload_size: u64,
}

impl Default for StorageLimits {
    fn default() -> Self {
        Self {
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
    limits: StorageLimits,
}

/// Reference to a stored object, relative to the storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRef {
    pub path: String,
    pub size: u64,
}

impl StoredRef {
    /// 用于构造下载地址的相对 URL。
    pub fn url(&self) -> String {
        format!("{UPLOADS_MARKER}{}", self.path)
    }
}

pub struct StoredFile {
    pub file: File,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionKind {
    File,
    Directory,
    CourseDirectory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deletion {
    pub path: String,
    pub kind: DeletionKind,
}

impl Storage {
    /// Creates the root directory if needed and pins it to an absolute path.
    pub async fn open(root: PathBuf, limits: StorageLimits) -> io::Result<Self> {
        fs::create_dir_all(&root).await?;
        let root = fs::canonicalize(&root).await?;
        Ok(Self { root, limits })
    }

    /// 存储根目录（绝对路径）。
    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// 当前生效的上传限制。
    pub fn limits(&self) -> StorageLimits {
        self.limits
    }

    /// 解析相对路径并确认其位于根目录之下且不经过符号链接。
    async fn resolve_path_checked(
        &self,
        relative: &str,
        allow_missing_leaf: bool,
    ) -> Result<PathBuf, StorageError> {
        let target = self.resolve(relative)?;
        self.ensure_no_symlink_components(&target, allow_missing_leaf)
            .await?;
        Ok(target)
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, StorageError> {
        if relative.contains('\0') {
            return Err(StorageError::InvalidPath(relative.escape_default().to_string()));
        }
        let mut normalized = PathBuf::new();
        let trimmed = relative.trim_start_matches(['/', '\\']);
        for component in Path::new(trimmed).components() {
            match component {
                Component::Normal(segment) => normalized.push(segment),
                Component::CurDir => continue,
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(StorageError::InvalidPath(relative.to_string()));
                }
            }
        }

        let target = self.root.join(normalized);
        if !target.starts_with(&self.root) {
            return Err(StorageError::InvalidPath(relative.to_string()));
        }
        Ok(target)
    }

    async fn ensure_no_symlink_components(
        &self,
        target: &Path,
        allow_missing_leaf: bool,
    ) -> Result<(), StorageError> {
        let invalid = || StorageError::InvalidPath(target.display().to_string());
        let relative = target.strip_prefix(&self.root).map_err(|_| invalid())?;
        let mut current = PathBuf::from(&self.root);
        let mut components = relative.components().peekable();

        while let Some(component) = components.next() {
            current.push(component.as_os_str());
            match fs::symlink_metadata(&current).await {
                Ok(metadata) => {
                    if metadata.file_type().is_symlink() {
                        return Err(invalid());
                    }
                    if components.peek().is_some() && !metadata.is_dir() {
                        return Err(invalid());
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound && allow_missing_leaf => {
                    return Ok(());
                }
                Err(err) => return Err(StorageError::Io(err)),
            }
        }

        Ok(())
    }

    fn relative_of(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace(std::path::MAIN_SEPARATOR, "/")
    }

    /// 将上传内容写入 `root/scope/name`，超出大小上限时中止且不留下目标文件。
    pub async fn put<R>(
        &self,
        scope: &str,
        raw_name: &str,
        content_type: &str,
        mut body: R,
        declared_size: Option<u64>,
    ) -> Result<StoredRef, StorageError>
    where
        R: AsyncRead + Unpin,
    {
        if raw_name.is_empty() {
            return Err(StorageError::InvalidName);
        }
        if !is_allowed_content_type(content_type) {
            return Err(StorageError::UnsupportedType(content_type.to_string()));
        }
        let max = self.limits.max_upload_size;
        if let Some(size) = declared_size
            && size > max
        {
            return Err(StorageError::SizeLimitExceeded(max));
        }

        let name = sanitize_name(raw_name)?;
        let relative = if scope.is_empty() {
            name
        } else {
            format!("{scope}/{name}")
        };
        let target = self.resolve_path_checked(&relative, true).await?;
        let parent = target
            .parent()
            .ok_or_else(|| StorageError::InvalidPath(relative.clone()))?;
        fs::create_dir_all(parent).await?;

        let mut atomic = match AtomicFile::new(&target).await {
            Ok(atomic) => atomic,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                // scope directory pruned by a concurrent delete
                debug!(path = relative, "recreating scope directory");
                fs::create_dir_all(parent).await?;
                AtomicFile::new(&target).await?
            }
            Err(err) => return Err(err.into()),
        };

        let mut sink = BoundedSink::new(atomic.file_mut(), max);
        let copied = sink.copy_from(&mut body).await;
        let size = match copied {
            Ok(size) => size,
            Err(err) => {
                atomic.cleanup().await;
                return Err(err);
            }
        };
        atomic.finalize().await?;

        info!(path = relative, size, content_type, "stored upload");
        Ok(StoredRef {
            path: relative,
            size,
        })
    }

    /// 读取文件；越界、符号链接与不存在统一视为未找到。
    pub async fn get(&self, relative: &str) -> Result<StoredFile, StorageError> {
        let target = self
            .resolve_path_checked(relative, false)
            .await
            .map_err(|err| collapse_not_found(err, relative))?;
        let metadata = fs::metadata(&target)
            .await
            .map_err(|err| collapse_not_found(err.into(), relative))?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(relative.to_string()));
        }
        let file = File::open(&target)
            .await
            .map_err(|err| collapse_not_found(err.into(), relative))?;
        Ok(StoredFile { file, metadata })
    }

    /// Removes a file, a directory, or (with `delete_course_dir`) a whole course tree.
    pub async fn delete(
        &self,
        target: &str,
        delete_course_dir: bool,
    ) -> Result<Deletion, StorageError> {
        let relative = normalize_delete_target(target)?;
        if delete_course_dir {
            return self.delete_course_dir(relative).await;
        }
        self.delete_entry(relative).await
    }

    async fn delete_course_dir(&self, relative: &str) -> Result<Deletion, StorageError> {
        let Some(course_id) = COURSE_ID_PATTERN
            .captures(relative)
            .and_then(|captures| captures.get(1))
        else {
            return Err(StorageError::NotFound(format!(
                "no course id in '{relative}'"
            )));
        };
        let dir_name = format!("course_{}", course_id.as_str());
        let dir = self.root.join(&dir_name);
        let missing = || StorageError::NotFound(format!("course directory '{dir_name}'"));

        match fs::symlink_metadata(&dir).await {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => return Err(missing()),
            Err(err) if err.kind() == ErrorKind::NotFound => return Err(missing()),
            Err(err) => return Err(err.into()),
        }
        fs::remove_dir_all(&dir)
            .await
            .map_err(|err| collapse_not_found(err.into(), &dir_name))?;

        info!(path = dir_name, "deleted course directory");
        Ok(Deletion {
            path: dir_name,
            kind: DeletionKind::CourseDirectory,
        })
    }

    async fn delete_entry(&self, relative: &str) -> Result<Deletion, StorageError> {
        let target = self
            .resolve_path_checked(relative, false)
            .await
            .map_err(|err| collapse_not_found(err, relative))?;
        if target == self.root {
            return Err(StorageError::InvalidPath("path is required".into()));
        }

        let metadata = fs::symlink_metadata(&target)
            .await
            .map_err(|err| collapse_not_found(err.into(), relative))?;
        let kind = if metadata.is_dir() {
            fs::remove_dir_all(&target)
                .await
                .map_err(|err| collapse_not_found(err.into(), relative))?;
            DeletionKind::Directory
        } else {
            fs::remove_file(&target)
                .await
                .map_err(|err| collapse_not_found(err.into(), relative))?;
            DeletionKind::File
        };

        let path = self.relative_of(&target);
        info!(path, ?kind, "deleted entry");
        if let Some(parent) = target.parent() {
            self.prune_empty_ancestors(parent).await;
        }
        Ok(Deletion { path, kind })
    }

    /// Walks upward removing empty directories, never the root itself.
    async fn prune_empty_ancestors(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current != self.root && current.starts_with(&self.root) {
            if let Err(err) = fs::remove_dir(&current).await {
                debug!(path = %current.display(), error = %err, "stop pruning");
                break;
            }
            debug!(path = %current.display(), "pruned empty directory");
            if !current.pop() {
                break;
            }
        }
    }
}

/// Tracks the running byte count and refuses the chunk that would cross the cap.
struct BoundedSink<'a> {
    inner: &'a mut File,
    written: u64,
    limit: u64,
}

impl<'a> BoundedSink<'a> {
    fn new(inner: &'a mut File, limit: u64) -> Self {
        Self {
            inner,
            written: 0,
            limit,
        }
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), StorageError> {
        let next = self.written + chunk.len() as u64;
        if next > self.limit {
            return Err(StorageError::SizeLimitExceeded(self.limit));
        }
        self.inner.write_all(chunk).await?;
        self.written = next;
        Ok(())
    }

    async fn copy_from<R>(&mut self, reader: &mut R) -> Result<u64, StorageError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buffer = vec![0u8; STREAM_CHUNK_SIZE];
        loop {
            let read = reader
                .read(&mut buffer)
                .await
                .map_err(StorageError::StreamRead)?;
            if read == 0 {
                break;
            }
            self.write_chunk(&buffer[..read]).await?;
        }
        Ok(self.written)
    }
}

/// `course_{id}/lesson_{id}` when both ids are present, otherwise the root.
pub fn resolve_scope_path(course_id: Option<&str>, lesson_id: Option<&str>) -> String {
    match (course_id.map(str::trim), lesson_id.map(str::trim)) {
        (Some(course), Some(lesson)) if !course.is_empty() && !lesson.is_empty() => format!(
            "course_{}/lesson_{}",
            replace_disallowed(course),
            replace_disallowed(lesson)
        ),
        _ => String::new(),
    }
}

/// 仅保留最后一段路径，并把 `[A-Za-z0-9_.-]` 以外的字符替换为 `_`。
pub fn sanitize_name(raw_name: &str) -> Result<String, StorageError> {
    let base = raw_name.rsplit(['/', '\\']).next().unwrap_or_default();
    if base.is_empty() || base.chars().all(|ch| ch == '.') {
        return Err(StorageError::InvalidName);
    }
    Ok(replace_disallowed(base))
}

fn replace_disallowed(value: &str) -> String {
    value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

/// 声明的内容类型（忽略参数与大小写）是否在允许列表内。
pub fn is_allowed_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    ALLOWED_CONTENT_TYPES.contains(&essence.as_str())
}

/// Accepts a bare relative path, a `/uploads/...` reference, or an absolute URL.
pub fn normalize_delete_target(input: &str) -> Result<&str, StorageError> {
    let trimmed = input.trim();
    let relative = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        let Some(index) = trimmed.find(UPLOADS_MARKER) else {
            return Err(StorageError::InvalidPath(format!(
                "url has no '{UPLOADS_MARKER}' segment"
            )));
        };
        let rest = &trimmed[index + UPLOADS_MARKER.len()..];
        rest.split(['?', '#']).next().unwrap_or_default()
    } else {
        trimmed.strip_prefix(UPLOADS_MARKER).unwrap_or(trimmed)
    };
    Ok(relative.trim_start_matches('/'))
}

fn collapse_not_found(err: StorageError, relative: &str) -> StorageError {
    match err {
        StorageError::InvalidPath(_) => StorageError::NotFound(relative.to_string()),
        StorageError::Io(err) if err.kind() == ErrorKind::NotFound => {
            StorageError::NotFound(relative.to_string())
        }
        other => other,
    }
}

#[derive(Debug)]
pub enum StorageError {
    InvalidName,
    UnsupportedType(String),
    SizeLimitExceeded(u64),
    InvalidPath(String),
    NotFound(String),
    /// The upload source failed mid-stream (client disconnect, malformed body).
    StreamRead(io::Error),
    Io(io::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::InvalidName => f.write_str("file name is empty or unusable"),
            StorageError::UnsupportedType(content_type) => {
                write!(f, "unsupported content type '{content_type}'")
            }
            StorageError::SizeLimitExceeded(limit) => {
                write!(f, "upload exceeds the {limit} byte limit")
            }
            StorageError::InvalidPath(detail) => write!(f, "invalid path: {detail}"),
            StorageError::NotFound(what) => write!(f, "not found: {what}"),
            StorageError::StreamRead(err) => write!(f, "upload stream failed: {err}"),
            StorageError::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::StreamRead(err) | StorageError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}
