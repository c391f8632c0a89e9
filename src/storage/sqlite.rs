//! SQLite 键值存储
//!
//! 单表 kv(key TEXT PRIMARY KEY, value BLOB, updated_at TEXT)，连接由 tokio Mutex 保护。

use std::path::Path;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use super::{KvStore, StorageError};

pub struct SqliteKv {
    conn: Mutex<Connection>,
}

impl SqliteKv {
    /// 打开（或创建）数据库文件并建表；父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Backend(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// 内存数据库（测试用）
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl KvStore for SqliteKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let conn = self.conn.lock().await;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let conn = self.conn.lock().await;
        let n = conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(n > 0)
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT key FROM kv WHERE substr(key, 1, ?2) = ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![prefix, prefix.chars().count() as i64], |row| {
            row.get::<_, String>(0)
        })?;
        let mut keys = Vec::new();
        for key in rows {
            keys.push(key?);
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sqlite_kv_roundtrip() {
        let dir = TempDir::new().unwrap();
        let kv = SqliteKv::open(dir.path().join("data/hive.db")).unwrap();

        kv.set("ltm:chat", b"[]".to_vec()).await.unwrap();
        kv.set("ltm:code", b"[1]".to_vec()).await.unwrap();
        kv.set("run:1", b"{}".to_vec()).await.unwrap();

        assert_eq!(kv.get("ltm:code").await.unwrap(), Some(b"[1]".to_vec()));
        assert_eq!(kv.list_keys("ltm:").await.unwrap(), vec!["ltm:chat", "ltm:code"]);

        // 覆盖写
        kv.set("ltm:code", b"[2]".to_vec()).await.unwrap();
        assert_eq!(kv.get("ltm:code").await.unwrap(), Some(b"[2]".to_vec()));

        assert!(kv.delete("run:1").await.unwrap());
        assert!(kv.get("run:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_kv_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hive.db");
        {
            let kv = SqliteKv::open(&path).unwrap();
            kv.set("cache:x", b"1".to_vec()).await.unwrap();
        }
        let kv = SqliteKv::open(&path).unwrap();
        assert_eq!(kv.get("cache:x").await.unwrap(), Some(b"1".to_vec()));
    }
}
