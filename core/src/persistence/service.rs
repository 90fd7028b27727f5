use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::options::PersistenceOptions;
use crate::codec::{codec_for, StateCodec};
use crate::error::{CodecError, PersistenceError};

/// Suffix appended to the primary path to name the backup file.
pub const BACKUP_SUFFIX: &str = ".backup";
const TEMP_SUFFIX: &str = ".tmp";

/// File metadata of the persisted state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    pub readonly: bool,
}

/// Saves, loads, validates and backs up state snapshots at one path.
pub struct PersistenceService {
    path: RwLock<PathBuf>,
    options: RwLock<PersistenceOptions>,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

async fn write_synced(path: &Path, contents: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(contents.as_bytes()).await?;
    file.sync_all().await
}

/// Replace the file in one step: a failed write never clobbers the old file.
async fn write_atomic(path: &Path, contents: &str) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PersistenceError::io("create_dir", parent, e))?;
    }

    // Each write owns its temp file, so overlapping saves never rename
    // each other's half-written content.
    let tmp = with_suffix(path, &format!(".{}{TEMP_SUFFIX}", Uuid::new_v4().simple()));
    if let Err(e) = write_synced(&tmp, contents).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(PersistenceError::io("write", &tmp, e));
    }

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(PersistenceError::io("rename", path, e));
    }
    Ok(())
}

fn contained<T>(op: &'static str, result: Result<T, PersistenceError>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(PersistenceError::NotFound(path)) => {
            tracing::debug!(op, path = %path.display(), "state file not found");
            None
        }
        Err(e) => {
            tracing::warn!(op, error = %e, "persistence operation failed");
            None
        }
    }
}

impl PersistenceService {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_options(path, PersistenceOptions::default())
    }

    pub fn with_options(path: impl Into<PathBuf>, options: PersistenceOptions) -> Self {
        Self {
            path: RwLock::new(path.into()),
            options: RwLock::new(options),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.path
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn backup_path(&self) -> PathBuf {
        with_suffix(&self.path(), BACKUP_SUFFIX)
    }

    pub fn options(&self) -> PersistenceOptions {
        self.options
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_options(&self, options: PersistenceOptions) {
        *self.options.write().unwrap_or_else(PoisonError::into_inner) = options;
    }

    pub fn update_options(&self, f: impl FnOnce(&mut PersistenceOptions)) {
        f(&mut *self.options.write().unwrap_or_else(PoisonError::into_inner));
    }

    /// Bump the schema version and return the new value.
    pub fn increment_version(&self) -> u32 {
        let mut options = self.options.write().unwrap_or_else(PoisonError::into_inner);
        options.version = options.version.saturating_add(1);
        options.version
    }

    fn codec(&self) -> Result<Box<dyn StateCodec>, CodecError> {
        let options = self.options();
        codec_for(&options.format, options.indent)
    }

    pub fn encode<T: Serialize + ?Sized>(&self, state: &T) -> Result<String, CodecError> {
        let codec = self.codec()?;
        let value =
            serde_json::to_value(state).map_err(|e| CodecError::serialize(codec.format(), e))?;
        codec.encode(&value)
    }

    pub fn decode<T: DeserializeOwned>(&self, text: &str) -> Result<T, CodecError> {
        let codec = self.codec()?;
        let value = codec.decode(text)?;
        serde_json::from_value(value).map_err(|e| CodecError::deserialize(codec.format(), e))
    }

    fn check_round_trip<T: Serialize + DeserializeOwned>(&self, state: &T) -> Result<(), CodecError> {
        let text = self.encode(state)?;
        self.decode::<T>(&text).map(|_| ())
    }

    /// True iff `state` survives a full encode/decode round trip in the
    /// configured format.
    pub fn validate_state<T: Serialize + DeserializeOwned>(&self, state: &T) -> bool {
        match self.check_round_trip(state) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "state failed validation");
                false
            }
        }
    }

    pub async fn try_save_state<T: Serialize + ?Sized>(&self, state: &T) -> Result<(), PersistenceError> {
        let text = self.encode(state)?;
        let path = self.path();
        write_atomic(&path, &text).await?;
        tracing::debug!(path = %path.display(), bytes = text.len(), "state saved");
        Ok(())
    }

    pub async fn save_state<T: Serialize + ?Sized>(&self, state: &T) -> bool {
        contained("save_state", self.try_save_state(state).await).is_some()
    }

    pub async fn try_load_state<T: DeserializeOwned>(&self) -> Result<T, PersistenceError> {
        let path = self.path();
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| PersistenceError::io("read", &path, e))?;
        Ok(self.decode(&text)?)
    }

    pub async fn load_state<T: DeserializeOwned>(&self) -> Option<T> {
        contained("load_state", self.try_load_state().await)
    }

    pub async fn try_save_state_with_validation<T: Serialize + DeserializeOwned>(
        &self,
        state: &T,
    ) -> Result<(), PersistenceError> {
        self.check_round_trip(state)
            .map_err(PersistenceError::Validation)?;
        self.try_save_state(state).await
    }

    pub async fn save_state_with_validation<T: Serialize + DeserializeOwned>(&self, state: &T) -> bool {
        contained(
            "save_state_with_validation",
            self.try_save_state_with_validation(state).await,
        )
        .is_some()
    }

    pub async fn load_state_with_validation<T: Serialize + DeserializeOwned>(&self) -> Option<T> {
        let state: T = self.load_state().await?;
        if self.validate_state(&state) {
            Some(state)
        } else {
            tracing::warn!(path = %self.path().display(), "loaded state failed validation");
            None
        }
    }

    /// Save to the primary path, then copy the primary file to the backup.
    pub async fn try_backup_state<T: Serialize + ?Sized>(&self, state: &T) -> Result<(), PersistenceError> {
        self.try_save_state(state).await?;
        let path = self.path();
        let backup = with_suffix(&path, BACKUP_SUFFIX);
        tokio::fs::copy(&path, &backup)
            .await
            .map_err(|e| PersistenceError::io("copy", &backup, e))?;
        tracing::debug!(backup = %backup.display(), "state backed up");
        Ok(())
    }

    pub async fn backup_state<T: Serialize + ?Sized>(&self, state: &T) -> bool {
        contained("backup_state", self.try_backup_state(state).await).is_some()
    }

    /// Copy the backup over the primary file, then load it.
    pub async fn try_restore_from_backup<T: DeserializeOwned>(&self) -> Result<T, PersistenceError> {
        let path = self.path();
        let backup = with_suffix(&path, BACKUP_SUFFIX);
        if !tokio::fs::try_exists(&backup).await.unwrap_or(false) {
            return Err(PersistenceError::NoBackup(backup));
        }
        tokio::fs::copy(&backup, &path)
            .await
            .map_err(|e| PersistenceError::io("copy", &path, e))?;
        self.try_load_state().await
    }

    pub async fn restore_from_backup<T: DeserializeOwned>(&self) -> Option<T> {
        contained("restore_from_backup", self.try_restore_from_backup().await)
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(self.path()).await.unwrap_or(false)
    }

    pub async fn size(&self) -> Option<u64> {
        let path = self.path();
        let result = tokio::fs::metadata(&path)
            .await
            .map(|m| m.len())
            .map_err(|e| PersistenceError::io("read", &path, e));
        contained("size", result)
    }

    /// True iff the file exists and has zero length.
    pub async fn is_empty(&self) -> bool {
        matches!(self.size().await, Some(0))
    }

    pub async fn metadata(&self) -> Option<FileMetadata> {
        let path = self.path();
        let result = tokio::fs::metadata(&path)
            .await
            .map_err(|e| PersistenceError::io("read", &path, e));
        let meta = contained("metadata", result)?;
        Some(FileMetadata {
            size: meta.len(),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
            created: meta.created().ok().map(DateTime::<Utc>::from),
            readonly: meta.permissions().readonly(),
            path,
        })
    }

    pub async fn truncate(&self) -> bool {
        let path = self.path();
        let result = async {
            let file = tokio::fs::OpenOptions::new()
                .write(true)
                .open(&path)
                .await?;
            file.set_len(0).await
        }
        .await
        .map_err(|e| PersistenceError::io("truncate", &path, e));
        contained("truncate", result).is_some()
    }

    /// Append raw content, creating the file if needed.
    pub async fn append(&self, content: &str) -> bool {
        let path = self.path();
        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(content.as_bytes()).await?;
            file.flush().await
        }
        .await
        .map_err(|e| PersistenceError::io("append", &path, e));
        contained("append", result).is_some()
    }

    /// Move the file; on success the service follows it to the new path.
    pub async fn rename(&self, new_path: impl Into<PathBuf>) -> bool {
        let old = self.path();
        let new_path = new_path.into();
        let result = tokio::fs::rename(&old, &new_path)
            .await
            .map_err(|e| PersistenceError::io("rename", &old, e));
        if contained("rename", result).is_none() {
            return false;
        }
        *self.path.write().unwrap_or_else(PoisonError::into_inner) = new_path;
        true
    }

    pub async fn delete(&self) -> bool {
        let path = self.path();
        let result = tokio::fs::remove_file(&path)
            .await
            .map_err(|e| PersistenceError::io("delete", &path, e));
        contained("delete", result).is_some()
    }

    /// Read `len` characters starting at character `start`.
    pub async fn read_chunk(&self, start: usize, len: usize) -> Option<String> {
        let path = self.path();
        let result = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| PersistenceError::io("read", &path, e));
        let text = contained("read_chunk", result)?;
        Some(text.chars().skip(start).take(len).collect())
    }

    /// Overwrite characters starting at `position` with `content`, extending
    /// the file when the content runs past its end. Positions beyond the end
    /// append.
    pub async fn write_chunk(&self, position: usize, content: &str) -> bool {
        let path = self.path();
        let result = async {
            let text = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| PersistenceError::io("read", &path, e))?;
            let chars: Vec<char> = text.chars().collect();
            let position = position.min(chars.len());
            let resume = (position + content.chars().count()).min(chars.len());

            let mut spliced = String::with_capacity(text.len() + content.len());
            spliced.extend(&chars[..position]);
            spliced.push_str(content);
            spliced.extend(&chars[resume..]);
            write_atomic(&path, &spliced).await
        }
        .await;
        contained("write_chunk", result).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::de::Error as _;
    use serde::ser::{Error as _, SerializeMap};
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::{json, Value};
    use std::cell::RefCell;
    use std::collections::{BTreeMap, HashMap, HashSet};
    use std::rc::Rc;
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> PersistenceService {
        PersistenceService::new(dir.path().join("state.json"))
    }

    /// Linked node whose serializer refuses to walk a cycle.
    #[derive(Clone)]
    struct Node {
        name: String,
        next: Rc<RefCell<Option<Node>>>,
    }

    thread_local! {
        static VISITING: RefCell<HashSet<usize>> = RefCell::new(HashSet::new());
    }

    impl Serialize for Node {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            let key = Rc::as_ptr(&self.next) as usize;
            if !VISITING.with(|v| v.borrow_mut().insert(key)) {
                return Err(S::Error::custom("cycle detected"));
            }
            let result = (|| {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("name", &self.name)?;
                map.serialize_entry("next", &*self.next.borrow())?;
                map.end()
            })();
            VISITING.with(|v| v.borrow_mut().remove(&key));
            result
        }
    }

    #[derive(Deserialize)]
    struct NodeRepr {
        name: String,
        next: Option<Box<NodeRepr>>,
    }

    impl From<NodeRepr> for Node {
        fn from(repr: NodeRepr) -> Self {
            Node {
                name: repr.name,
                next: Rc::new(RefCell::new(repr.next.map(|n| Node::from(*n)))),
            }
        }
    }

    impl<'de> Deserialize<'de> for Node {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            let repr = NodeRepr::deserialize(deserializer)?;
            if repr.name.is_empty() {
                return Err(D::Error::custom("node without a name"));
            }
            Ok(Node::from(repr))
        }
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let state = json!({"count": 1, "name": "test"});

        assert!(svc.save_state(&state).await);
        let loaded: Value = svc.load_state().await.unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn test_save_uses_indent() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        svc.update_options(|o| o.indent = 4);

        assert!(svc.save_state(&json!({"a": 1})).await);
        let text = std::fs::read_to_string(svc.path()).unwrap();
        assert_eq!(text, "{\n    \"a\": 1\n}");
    }

    #[tokio::test]
    async fn test_load_missing_or_malformed() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        assert!(svc.load_state::<Value>().await.is_none());
        assert!(matches!(
            svc.try_load_state::<Value>().await,
            Err(PersistenceError::NotFound(_))
        ));

        std::fs::write(svc.path(), "{not json").unwrap();
        assert!(svc.load_state::<Value>().await.is_none());
    }

    #[tokio::test]
    async fn test_failed_save_keeps_previous_file() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        assert!(svc.save_state(&json!({"kept": true})).await);

        let mut bad = HashMap::new();
        bad.insert((1u8, 2u8), "tuple keys are not representable");
        assert!(!svc.save_state(&bad).await);

        let loaded: Value = svc.load_state().await.unwrap();
        assert_eq!(loaded, json!({"kept": true}));
    }

    #[test]
    fn test_validate_rejects_cycle() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);

        let tail = Node {
            name: "tail".to_string(),
            next: Rc::new(RefCell::new(None)),
        };
        let head = Node {
            name: "head".to_string(),
            next: Rc::new(RefCell::new(Some(tail))),
        };
        assert!(svc.validate_state(&head));

        // Point the tail back at the head's link.
        let looped = head.clone();
        if let Some(tail) = head.next.borrow_mut().as_mut() {
            tail.next = looped.next.clone();
        }
        assert!(!svc.validate_state(&head));
    }

    #[test]
    fn test_validate_plain_values() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        assert!(svc.validate_state(&json!({"nested": {"list": [1, 2, 3]}})));

        let mut bad = BTreeMap::new();
        bad.insert(vec![1u8], 1u8);
        assert!(!svc.validate_state(&bad));
    }

    #[tokio::test]
    async fn test_validated_save_and_load() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);

        let mut bad = BTreeMap::new();
        bad.insert(vec![1u8], 1u8);
        assert!(!svc.save_state_with_validation(&bad).await);
        assert!(!svc.exists().await);

        assert!(svc.save_state_with_validation(&json!({"ok": 1})).await);
        let loaded: Option<Value> = svc.load_state_with_validation().await;
        assert_eq!(loaded, Some(json!({"ok": 1})));

        // Decodes as JSON but not as a named node.
        std::fs::write(svc.path(), r#"{"name": "", "next": null}"#).unwrap();
        assert!(svc.load_state_with_validation::<Node>().await.is_none());
    }

    #[tokio::test]
    async fn test_backup_delete_restore() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let state = json!({"count": 7, "tags": ["a", "b"]});

        assert!(svc.backup_state(&state).await);
        assert!(svc.backup_path().exists());
        assert!(svc.delete().await);
        assert!(!svc.exists().await);

        let restored: Value = svc.restore_from_backup().await.unwrap();
        assert_eq!(restored, state);
        assert!(svc.exists().await);
    }

    #[tokio::test]
    async fn test_restore_without_backup() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        assert!(svc.restore_from_backup::<Value>().await.is_none());
        assert!(matches!(
            svc.try_restore_from_backup::<Value>().await,
            Err(PersistenceError::NoBackup(_))
        ));
    }

    #[tokio::test]
    async fn test_file_lifecycle_helpers() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);

        assert!(!svc.exists().await);
        assert_eq!(svc.size().await, None);
        assert!(!svc.is_empty().await);
        assert!(!svc.truncate().await);

        assert!(svc.append("abc").await);
        assert!(svc.append("def").await);
        assert_eq!(svc.size().await, Some(6));

        let meta = svc.metadata().await.unwrap();
        assert_eq!(meta.size, 6);
        assert!(meta.modified.is_some());

        assert!(svc.truncate().await);
        assert!(svc.is_empty().await);

        assert!(svc.delete().await);
        assert!(!svc.delete().await);
    }

    #[tokio::test]
    async fn test_rename_follows_file() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        assert!(svc.save_state(&json!({"a": 1})).await);

        let moved = dir.path().join("moved.json");
        assert!(svc.rename(&moved).await);
        assert_eq!(svc.path(), moved);
        assert_eq!(svc.load_state::<Value>().await, Some(json!({"a": 1})));

        assert!(!svc.rename(dir.path().join("missing/dir/x.json")).await);
        assert_eq!(svc.path(), moved);
    }

    #[tokio::test]
    async fn test_chunks() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        assert!(svc.append("hello world").await);

        assert_eq!(svc.read_chunk(6, 5).await.as_deref(), Some("world"));
        assert_eq!(svc.read_chunk(20, 5).await.as_deref(), Some(""));

        assert!(svc.write_chunk(0, "HELLO").await);
        assert_eq!(svc.read_chunk(0, 100).await.as_deref(), Some("HELLO world"));

        assert!(svc.write_chunk(9, "LDS!").await);
        assert_eq!(svc.read_chunk(0, 100).await.as_deref(), Some("HELLO worLDS!"));

        assert!(svc.write_chunk(99, "?").await);
        assert_eq!(svc.read_chunk(0, 100).await.as_deref(), Some("HELLO worLDS!?"));
    }

    #[tokio::test]
    async fn test_options_and_version() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        assert_eq!(svc.options().version, 1);
        assert_eq!(svc.increment_version(), 2);
        assert_eq!(svc.increment_version(), 3);

        let mut options = svc.options();
        options.extra.insert("owner".to_string(), json!("ops"));
        svc.set_options(options.clone());
        assert_eq!(svc.options(), options);
    }

    #[tokio::test]
    async fn test_toml_format() {
        let dir = TempDir::new().unwrap();
        let svc = PersistenceService::new(dir.path().join("state.toml"));
        svc.update_options(|o| o.format = "toml".to_string());

        let state = json!({"count": 1, "name": "test"});
        assert!(svc.save_state(&state).await);
        assert!(std::fs::read_to_string(svc.path()).unwrap().contains("count = 1"));
        assert_eq!(svc.load_state::<Value>().await, Some(state));
    }

    #[tokio::test]
    async fn test_unknown_format_fails_closed() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        svc.update_options(|o| o.format = "yaml".to_string());
        assert!(!svc.save_state(&json!({"a": 1})).await);
        assert!(!svc.exists().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_saves_both_succeed() {
        let dir = TempDir::new().unwrap();
        let svc = std::sync::Arc::new(service(&dir));
        let big = |tag: &str| json!({"tag": tag, "items": vec![tag; 4096]});

        for _ in 0..16 {
            let (a, b) = (svc.clone(), svc.clone());
            let (left, right) = (big("left"), big("right"));
            let first = tokio::spawn(async move { a.save_state(&left).await });
            let second = tokio::spawn(async move { b.save_state(&right).await });
            assert!(first.await.unwrap());
            assert!(second.await.unwrap());

            let loaded: Value = svc.load_state().await.unwrap();
            assert!(loaded == big("left") || loaded == big("right"));
        }

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(TEMP_SUFFIX))
            .collect();
        assert!(leftovers.is_empty());
    }
}
