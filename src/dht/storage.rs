use crate::dht::{GetParameter, StorageEntry, StorageEntryMetadata};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fs::{self, create_dir_all};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Value not found")]
    NotFound,

    #[error("Storage lock poisoned")]
    Poisoned,
}

/// 内容块的存储位置：由内容键派生的目录名加上元数据哈希
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StorageKey {
    /// 目录名（内容键的前两个十六进制字符）
    pub dir: String,

    /// 文件名（元数据哈希）
    pub name: String,
}

impl From<&StorageEntryMetadata> for StorageKey {
    fn from(meta: &StorageEntryMetadata) -> Self {
        Self {
            dir: meta.key.shard(),
            name: meta.identity_hash(),
        }
    }
}

/// 内容块存储接口
pub trait BlobStore: Send + Sync {
    /// 写入内容
    fn write(&self, key: &StorageKey, entry: &StorageEntry) -> Result<(), StorageError>;

    /// 读取内容，不存在时返回None
    fn read(&self, key: &StorageKey) -> Result<Option<StorageEntry>, StorageError>;

    /// 删除内容，返回是否确实删除了
    fn delete(&self, key: &StorageKey) -> Result<bool, StorageError>;

    /// 检查内容是否存在
    fn exists(&self, key: &StorageKey) -> bool;
}

/// 内存内容块存储
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: StdMutex<HashMap<StorageKey, StorageEntry>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn write(&self, key: &StorageKey, entry: &StorageEntry) -> Result<(), StorageError> {
        let mut blobs = self.blobs.lock().map_err(|_| StorageError::Poisoned)?;
        blobs.insert(key.clone(), entry.clone());
        Ok(())
    }

    fn read(&self, key: &StorageKey) -> Result<Option<StorageEntry>, StorageError> {
        let blobs = self.blobs.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(blobs.get(key).cloned())
    }

    fn delete(&self, key: &StorageKey) -> Result<bool, StorageError> {
        let mut blobs = self.blobs.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(blobs.remove(key).is_some())
    }

    fn exists(&self, key: &StorageKey) -> bool {
        self.blobs.lock().map(|blobs| blobs.contains_key(key)).unwrap_or(false)
    }
}

/// 文件内容块存储，每个条目一个JSON文件
pub struct FileBlobStore {
    /// 存储根路径
    root_path: PathBuf,
}

impl FileBlobStore {
    /// 创建新的文件存储
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root_path = path.as_ref().to_path_buf();
        create_dir_all(&root_path)?;

        Ok(Self { root_path })
    }

    fn path_for(&self, key: &StorageKey) -> PathBuf {
        self.root_path.join(&key.dir).join(format!("{}.json", key.name))
    }
}

impl BlobStore for FileBlobStore {
    fn write(&self, key: &StorageKey, entry: &StorageEntry) -> Result<(), StorageError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }

        let content = serde_json::to_vec_pretty(entry)?;
        fs::write(path, content)?;

        Ok(())
    }

    fn read(&self, key: &StorageKey) -> Result<Option<StorageEntry>, StorageError> {
        let content = match fs::read(self.path_for(key)) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(serde_json::from_slice(&content)?))
    }

    fn delete(&self, key: &StorageKey) -> Result<bool, StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, key: &StorageKey) -> bool {
        self.path_for(key).exists()
    }
}

/// 内容索引：键到元数据列表的映射
#[derive(Default, Debug)]
pub struct ContentIndex {
    entries: HashMap<crate::dht::NodeId, Vec<StorageEntryMetadata>>,
}

impl ContentIndex {
    /// 添加元数据，已存在时返回false
    pub fn put(&mut self, meta: StorageEntryMetadata) -> bool {
        let list = self.entries.entry(meta.key).or_default();
        if list.contains(&meta) {
            return false;
        }
        list.push(meta);
        true
    }

    pub fn get(&self, params: &GetParameter) -> Option<&StorageEntryMetadata> {
        self.entries.get(&params.key)?.iter().find(|m| m.satisfies(params))
    }

    pub fn get_mut(&mut self, params: &GetParameter) -> Option<&mut StorageEntryMetadata> {
        self.entries.get_mut(&params.key)?.iter_mut().find(|m| m.satisfies(params))
    }

    pub fn contains(&self, params: &GetParameter) -> bool {
        self.get(params).is_some()
    }

    pub fn remove(&mut self, meta: &StorageEntryMetadata) -> Option<StorageEntryMetadata> {
        let list = self.entries.get_mut(&meta.key)?;
        let pos = list.iter().position(|m| m == meta)?;
        let removed = list.remove(pos);
        if list.is_empty() {
            self.entries.remove(&meta.key);
        }
        Some(removed)
    }

    pub fn all(&self) -> Vec<StorageEntryMetadata> {
        self.entries.values().flatten().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 本地内容存储：内容索引加上内容块存储
///
/// 整个索引共用一把锁，内容操作不在热路径上。
pub struct ContentStore {
    /// 所有者名称，只用于日志
    owner: String,

    index: Mutex<ContentIndex>,

    blobs: Box<dyn BlobStore>,
}

impl ContentStore {
    pub fn new(owner: impl Into<String>, blobs: Box<dyn BlobStore>) -> Self {
        Self {
            owner: owner.into(),
            index: Mutex::new(ContentIndex::default()),
            blobs,
        }
    }

    /// 使用内存内容块存储
    pub fn in_memory(owner: impl Into<String>) -> Self {
        Self::new(owner, Box::new(MemoryBlobStore::new()))
    }

    /// 存储条目
    ///
    /// 本地已有同一 `(key, owner, kind)` 且不比传入的旧时不做任何事并返回false；
    /// 否则替换（或新增）并返回true。
    pub async fn store(&self, entry: &StorageEntry) -> bool {
        let params = GetParameter::from(&entry.metadata);
        let mut index = self.index.lock().await;

        if let Some(current) = index.get_mut(&params) {
            current.update_last_republished();

            if current.last_updated >= entry.metadata.last_updated {
                debug!("[{}] content {} is up to date", self.owner, entry.metadata.key.short());
                return false;
            }
        }

        // 同一 (key, owner, kind) 的内容块位置不变，写入即覆盖旧值
        let mut meta = entry.metadata.clone();
        meta.update_last_republished();

        let stored = StorageEntry {
            content: entry.content.clone(),
            metadata: meta.clone(),
        };

        if let Err(e) = self.blobs.write(&StorageKey::from(&meta), &stored) {
            warn!("[{}] adding content {} failed: {}", self.owner, meta.key.short(), e);
            return false;
        }

        debug!("[{}] stored content {}", self.owner, meta);
        index.remove(&meta);
        index.put(meta);
        true
    }

    /// 是否存储了满足条件的内容
    pub async fn contains(&self, params: &GetParameter) -> bool {
        self.index.lock().await.contains(params)
    }

    /// 读取满足条件的内容
    pub async fn get(&self, params: &GetParameter) -> Option<StorageEntry> {
        let meta = self.index.lock().await.get(params).cloned()?;
        self.read(&meta)
    }

    /// 按元数据读取内容
    pub async fn get_by_metadata(&self, meta: &StorageEntryMetadata) -> Option<StorageEntry> {
        if !self.index.lock().await.contains(&GetParameter::from(meta)) {
            return None;
        }
        self.read(meta)
    }

    fn read(&self, meta: &StorageEntryMetadata) -> Option<StorageEntry> {
        match self.blobs.read(&StorageKey::from(meta)) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("[{}] reading content {} failed: {}", self.owner, meta.key.short(), e);
                None
            }
        }
    }

    /// 删除内容
    pub async fn remove(&self, meta: &StorageEntryMetadata) -> Result<(), StorageError> {
        let removed = self.index.lock().await.remove(meta);
        let deleted = self.blobs.delete(&StorageKey::from(meta))?;

        if removed.is_none() && !deleted {
            return Err(StorageError::NotFound);
        }

        debug!("[{}] removed content {}", self.owner, meta.key.short());
        Ok(())
    }

    /// 标记内容已重新发布
    pub async fn mark_republished(&self, meta: &StorageEntryMetadata) {
        if let Some(current) = self.index.lock().await.get_mut(&GetParameter::from(meta)) {
            current.update_last_republished();
        }
    }

    /// 所有元数据的副本
    pub async fn entries(&self) -> Vec<StorageEntryMetadata> {
        self.index.lock().await.all()
    }

    /// 从持久化的快照恢复索引，只保留内容块仍然存在的条目
    pub async fn restore_index(&self, entries: Vec<StorageEntryMetadata>) {
        let mut index = self.index.lock().await;
        let mut restored = 0;

        for meta in entries {
            if self.blobs.exists(&StorageKey::from(&meta)) {
                index.put(meta);
                restored += 1;
            } else {
                warn!("[{}] content {} missing from blob store", self.owner, meta.key.short());
            }
        }

        info!("[{}] restored {} content entries", self.owner, restored);
    }

    pub async fn len(&self) -> usize {
        self.index.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.index.lock().await.is_empty()
    }
}
