//! 元数据 SQLite 数据库模块
//!
//! - files: 最小化的文件记录（由分片 0 的结果生成）
//! - file_chunks: 分片元数据，(file_id, chunk_index) 唯一

use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::types::{ChunkRecord, FileId, FileRecord, FirstChunkResult, FolderId, NewFile};
use super::{ChunkStore, FileRecordService};

/// 元数据数据库管理器
pub struct SqliteMetadataStore {
    /// SQLite 连接
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    /// 打开（或创建）数据库文件
    pub fn new(db_path: &Path) -> Result<Self> {
        // 确保父目录存在
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("创建数据库目录失败: {:?}", parent))?;
            }
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("打开元数据数据库失败: {:?}", db_path))?;
        Self::from_connection(conn)
    }

    /// 内存数据库（测试用）
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_tables()?;
        Ok(store)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow!("获取数据库锁失败: {}", e))
    }

    /// 初始化数据库表
    fn init_tables(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                size INTEGER NOT NULL,
                mime_type TEXT,
                folder_id INTEGER,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_files_folder ON files(folder_id);

            CREATE TABLE IF NOT EXISTS file_chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_id INTEGER NOT NULL,
                chunk_index INTEGER NOT NULL,
                chunk_size INTEGER NOT NULL,
                message_id INTEGER NOT NULL,
                remote_file_id TEXT NOT NULL,
                credential_index INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE(file_id, chunk_index)
            );

            CREATE INDEX IF NOT EXISTS idx_file_chunks_file ON file_chunks(file_id, chunk_index);
            "#,
        )?;

        info!("元数据数据库表初始化完成");
        Ok(())
    }

    /// 查询文件记录
    pub fn get_file(&self, file_id: FileId) -> Result<Option<FileRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT id, name, size, mime_type, folder_id, created_at FROM files WHERE id = ?1",
                params![file_id],
                |row| {
                    Ok(FileRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        size: row.get::<_, i64>(2)? as u64,
                        mime_type: row.get(3)?,
                        folder_id: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// 列出文件夹下的文件 ID（用于级联删除）
    pub fn list_file_ids_in_folder(&self, folder_id: Option<FolderId>) -> Result<Vec<FileId>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM files WHERE folder_id IS ?1 ORDER BY id")?;
        let ids = stmt
            .query_map(params![folder_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<FileId>>>()?;
        Ok(ids)
    }

    /// 删除文件记录（分片元数据须已删除）
    pub fn delete_file(&self, file_id: FileId) -> Result<bool> {
        let conn = self.lock()?;
        let affected = conn.execute("DELETE FROM files WHERE id = ?1", params![file_id])?;
        Ok(affected > 0)
    }
}

#[async_trait]
impl ChunkStore for SqliteMetadataStore {
    async fn create_chunk(&self, record: &ChunkRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO file_chunks (
                file_id, chunk_index, chunk_size, message_id, remote_file_id, credential_index, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.file_id,
                record.chunk_index as i64,
                record.byte_size as i64,
                record.external_message_id,
                record.external_file_id,
                record.credential_index as i64,
                Utc::now().timestamp(),
            ],
        )
        .with_context(|| {
            format!(
                "写入分片记录失败: file_id={}, chunk_index={}",
                record.file_id, record.chunk_index
            )
        })?;

        debug!(
            "已写入分片记录: file_id={}, chunk_index={}",
            record.file_id, record.chunk_index
        );
        Ok(())
    }

    async fn list_chunks(&self, file_id: FileId) -> Result<Vec<ChunkRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT file_id, chunk_index, chunk_size, message_id, remote_file_id, credential_index
            FROM file_chunks
            WHERE file_id = ?1
            ORDER BY chunk_index ASC
            "#,
        )?;

        let records = stmt
            .query_map(params![file_id], |row| {
                Ok(ChunkRecord {
                    file_id: row.get(0)?,
                    chunk_index: row.get::<_, i64>(1)? as usize,
                    byte_size: row.get::<_, i64>(2)? as u64,
                    external_message_id: row.get(3)?,
                    external_file_id: row.get(4)?,
                    credential_index: row.get::<_, i64>(5)? as usize,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }

    async fn delete_chunks(&self, file_id: FileId) -> Result<usize> {
        let conn = self.lock()?;
        let affected = conn.execute(
            "DELETE FROM file_chunks WHERE file_id = ?1",
            params![file_id],
        )?;
        debug!("已删除分片记录: file_id={}, 条数={}", file_id, affected);
        Ok(affected)
    }
}

#[async_trait]
impl FileRecordService for SqliteMetadataStore {
    async fn mint_file_id(
        &self,
        file: &NewFile,
        first_chunk: &FirstChunkResult,
    ) -> Result<FileId> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO files (name, size, mime_type, folder_id, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                file.name,
                file.size as i64,
                file.mime_type,
                file.folder_id,
                Utc::now().timestamp(),
            ],
        )?;

        let file_id = conn.last_insert_rowid();
        info!(
            "生成文件记录: id={}, name={}, size={}, 首分片 message_id={}",
            file_id, file.name, file.size, first_chunk.external_message_id
        );
        Ok(file_id)
    }
}
