//! SQLite persistence for folders, chats and their committed messages.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::error::StoreError;
use crate::state::{Chat, ChatId, Group, GroupId, Message, Role};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS groups (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS chats (
    id TEXT PRIMARY KEY,
    group_id TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS messages (
    chat_id TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    PRIMARY KEY (chat_id, position)
);
";

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let store = Self {
            conn: Connection::open(path)?,
        };
        store.migrate()?;
        tracing::debug!(path = %path.display(), "store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub fn save_group(&self, group: &Group) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO groups (id, name, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            params![group.id.to_string(), group.name, group.created_at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn save_chat(&self, group: GroupId, chat: &Chat) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO chats (id, group_id, name, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, group_id = excluded.group_id",
            params![
                chat.id.to_string(),
                group.to_string(),
                chat.name,
                chat.created_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Removes the group with its chats and messages
    pub fn delete_group(&self, group: GroupId) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM groups WHERE id = ?1", params![group.to_string()])?;
        Ok(())
    }

    pub fn delete_chat(&self, chat: ChatId) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM chats WHERE id = ?1", params![chat.to_string()])?;
        Ok(())
    }

    /// Overwrite the stored transcript of `chat`
    pub fn replace_messages(&mut self, chat: ChatId, messages: &[Message]) -> Result<(), StoreError> {
        let chat = chat.to_string();
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM messages WHERE chat_id = ?1", params![chat])?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO messages (chat_id, position, role, content) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (position, message) in messages.iter().enumerate() {
                insert.execute(params![
                    chat,
                    position as i64,
                    message.role.as_str(),
                    message.content
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// All groups with their chats, oldest first
    pub fn load_groups(&self) -> Result<Vec<Group>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, created_at FROM groups ORDER BY created_at, rowid")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut groups = Vec::with_capacity(rows.len());
        for (id, name, created_at) in rows {
            let id = parse_id(&id)?;
            groups.push(Group {
                id,
                name,
                created_at: parse_time(&created_at)?,
                chats: self.load_chats(id)?,
            });
        }
        Ok(groups)
    }

    fn load_chats(&self, group: GroupId) -> Result<Vec<Chat>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, created_at FROM chats WHERE group_id = ?1 ORDER BY created_at, rowid",
        )?;
        let rows = stmt
            .query_map(params![group.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, name, created_at)| -> Result<Chat, StoreError> {
                Ok(Chat {
                    id: parse_id(&id)?,
                    name,
                    created_at: parse_time(&created_at)?,
                })
            })
            .collect()
    }

    pub fn load_messages(&self, chat: ChatId) -> Result<Vec<Message>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT role, content FROM messages WHERE chat_id = ?1 ORDER BY position",
        )?;
        let rows = stmt
            .query_map(params![chat.to_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(role, content)| -> Result<Message, StoreError> {
                let parsed = Role::from_str(&role).ok_or_else(|| StoreError::Corrupt {
                    field: "role",
                    value: role.clone(),
                })?;
                Ok(Message::new(parsed, content))
            })
            .collect()
    }
}

fn parse_id(value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|_| StoreError::Corrupt {
        field: "id",
        value: value.to_string(),
    })
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StoreError::Corrupt {
            field: "created_at",
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seeded() -> (Store, Group, Chat) {
        let store = Store::open_in_memory().unwrap();
        let group = Group::new("Folder 1");
        let chat = Chat::new("Chat 1");
        store.save_group(&group).unwrap();
        store.save_chat(group.id, &chat).unwrap();
        (store, group, chat)
    }

    #[test]
    fn test_groups_and_chats_load_back() {
        let (store, group, chat) = seeded();
        let loaded = store.load_groups().unwrap();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, group.id);
        assert_eq!(loaded[0].name, "Folder 1");
        assert_eq!(loaded[0].chats, vec![chat]);
    }

    #[test]
    fn test_save_is_an_upsert() {
        let (store, mut group, mut chat) = seeded();
        group.name = "Renamed".to_string();
        chat.name = "Renamed chat".to_string();
        store.save_group(&group).unwrap();
        store.save_chat(group.id, &chat).unwrap();

        let loaded = store.load_groups().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "Renamed");
        assert_eq!(loaded[0].chats[0].name, "Renamed chat");
    }

    #[test]
    fn test_replace_messages_keeps_order() {
        let (mut store, _, chat) = seeded();
        store
            .replace_messages(chat.id, &[Message::user("a"), Message::assistant("b")])
            .unwrap();
        store
            .replace_messages(
                chat.id,
                &[Message::user("a"), Message::assistant("b"), Message::user("c")],
            )
            .unwrap();

        let messages = store.load_messages(chat.id).unwrap();
        assert_eq!(
            messages,
            vec![Message::user("a"), Message::assistant("b"), Message::user("c")]
        );
    }

    #[test]
    fn test_delete_group_cascades() {
        let (mut store, group, chat) = seeded();
        store.replace_messages(chat.id, &[Message::user("x")]).unwrap();

        store.delete_group(group.id).unwrap();

        assert!(store.load_groups().unwrap().is_empty());
        assert!(store.load_messages(chat.id).unwrap().is_empty());
    }

    #[test]
    fn test_delete_chat() {
        let (mut store, _, chat) = seeded();
        store.replace_messages(chat.id, &[Message::user("x")]).unwrap();
        store.delete_chat(chat.id).unwrap();

        assert!(store.load_groups().unwrap()[0].chats.is_empty());
        assert!(store.load_messages(chat.id).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_role_is_reported() {
        let (store, _, chat) = seeded();
        store
            .conn
            .execute(
                "INSERT INTO messages (chat_id, position, role, content) VALUES (?1, 0, 'tool', 'x')",
                params![chat.id.to_string()],
            )
            .unwrap();

        let err = store.load_messages(chat.id).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { field: "role", .. }));
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("techtalk.db");
        let group = Group::new("Work");
        let chat = Chat::new("Chat 1");

        {
            let mut store = Store::open(&path).unwrap();
            store.save_group(&group).unwrap();
            store.save_chat(group.id, &chat).unwrap();
            store.replace_messages(chat.id, &[Message::user("hi")]).unwrap();
        }

        let store = Store::open(&path).unwrap();
        assert_eq!(store.load_groups().unwrap()[0].chats[0].id, chat.id);
        assert_eq!(store.load_messages(chat.id).unwrap(), vec![Message::user("hi")]);
    }
}
