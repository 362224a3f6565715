// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{Connection, ErrorCode, OptionalExtension, ToSql, params};
use tracing::debug;

use crate::error::StoreError;
use crate::model::{Episode, EpisodeStatus, Podcast, StatusCounts};

use super::{EpisodeStore, check_transition};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS podcasts (
    name TEXT PRIMARY KEY NOT NULL,
    feed_url TEXT NOT NULL,
    image TEXT,
    max_age TEXT NOT NULL,
    max_episodes INTEGER NOT NULL,
    active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS episodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    episode_id TEXT NOT NULL UNIQUE,
    podcast TEXT NOT NULL,
    title TEXT NOT NULL,
    author TEXT NOT NULL,
    link TEXT NOT NULL,
    image TEXT,
    published_at TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('pending', 'downloaded', 'removed')),
    local_path TEXT,
    downloaded_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_episodes_podcast_published
    ON episodes (podcast, published_at);
"#;

const EPISODE_COLUMNS: &str = "episode_id, podcast, title, author, link, image, published_at, \
                               status, local_path, downloaded_at";

impl ToSql for EpisodeStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for EpisodeStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: StoreError| FromSqlError::Other(Box::new(e)))
    }
}

/// SQLite-backed [`EpisodeStore`]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (and create if needed) the database at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
        ",
        )?;
        debug!(path = %path.display(), "Opened episode database");
        Self::with_connection(conn)
    }

    /// A private database that lives as long as the store
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

fn map_episode_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Episode> {
    Ok(Episode {
        episode_id: row.get(0)?,
        podcast: row.get(1)?,
        title: row.get(2)?,
        author: row.get(3)?,
        link: row.get(4)?,
        image: row.get(5)?,
        published_at: row.get(6)?,
        status: row.get(7)?,
        local_path: row.get::<_, Option<String>>(8)?.map(PathBuf::from),
        downloaded_at: row.get(9)?,
    })
}

fn map_podcast_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Podcast> {
    Ok(Podcast {
        name: row.get(0)?,
        feed_url: row.get(1)?,
        image_override: row.get(2)?,
        max_age: row.get(3)?,
        max_episodes: row.get(4)?,
    })
}

fn path_text(path: &Option<PathBuf>) -> Option<String> {
    path.as_ref().map(|p| p.to_string_lossy().into_owned())
}

impl EpisodeStore for SqliteStore {
    fn list_podcasts(&self) -> Result<Vec<Podcast>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT name, feed_url, image, max_age, max_episodes FROM podcasts
             WHERE active = 1 ORDER BY name",
        )?;
        let podcasts = stmt
            .query_map([], map_podcast_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(podcasts)
    }

    fn upsert_podcast(&self, podcast: &Podcast) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO podcasts (name, feed_url, image, max_age, max_episodes, active)
             VALUES (?1, ?2, ?3, ?4, ?5, 1)
             ON CONFLICT(name) DO UPDATE SET
                feed_url = excluded.feed_url,
                image = excluded.image,
                max_age = excluded.max_age,
                max_episodes = excluded.max_episodes,
                active = 1",
            params![
                podcast.name,
                podcast.feed_url,
                podcast.image_override,
                podcast.max_age,
                podcast.max_episodes
            ],
        )?;
        Ok(())
    }

    fn deactivate_podcasts_except(&self, keep: &[&str]) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let active = {
            let mut stmt = tx.prepare("SELECT name FROM podcasts WHERE active = 1")?;
            stmt.query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?
        };

        let mut deactivated = Vec::new();
        for name in active {
            if !keep.contains(&name.as_str()) {
                tx.execute("UPDATE podcasts SET active = 0 WHERE name = ?1", params![name])?;
                deactivated.push(name);
            }
        }
        tx.commit()?;

        Ok(deactivated)
    }

    fn find_episode(&self, episode_id: &str) -> Result<Option<Episode>, StoreError> {
        let conn = self.conn()?;
        let episode = conn
            .query_row(
                &format!("SELECT {EPISODE_COLUMNS} FROM episodes WHERE episode_id = ?1"),
                params![episode_id],
                map_episode_row,
            )
            .optional()?;
        Ok(episode)
    }

    fn insert_episode(&self, episode: &Episode) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let result = conn.execute(
            &format!(
                "INSERT INTO episodes ({EPISODE_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                episode.episode_id,
                episode.podcast,
                episode.title,
                episode.author,
                episode.link,
                episode.image,
                episode.published_at,
                episode.status,
                path_text(&episode.local_path),
                episode.downloaded_at
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateKey(episode.episode_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn update_episode(&self, episode: &Episode, expected: EpisodeStatus) -> Result<(), StoreError> {
        check_transition(episode, expected)?;

        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE episodes SET
                title = ?3,
                author = ?4,
                link = ?5,
                image = ?6,
                published_at = ?7,
                status = ?8,
                local_path = ?9,
                downloaded_at = ?10
             WHERE episode_id = ?1 AND status = ?2",
            params![
                episode.episode_id,
                expected,
                episode.title,
                episode.author,
                episode.link,
                episode.image,
                episode.published_at,
                episode.status,
                path_text(&episode.local_path),
                episode.downloaded_at
            ],
        )?;

        if changed == 0 {
            return Err(StoreError::StatusConflict {
                episode_id: episode.episode_id.clone(),
                expected,
            });
        }
        Ok(())
    }

    fn list_episodes_for_podcast(&self, podcast: &str) -> Result<Vec<Episode>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EPISODE_COLUMNS} FROM episodes WHERE podcast = ?1 \
             ORDER BY published_at, episode_id"
        ))?;
        let mut episodes = stmt
            .query_map(params![podcast], map_episode_row)?
            .collect::<Result<Vec<_>, _>>()?;

        // Text ordering of timestamps is not guaranteed to be chronological
        episodes.sort_by(|a, b| {
            a.published_at
                .cmp(&b.published_at)
                .then_with(|| a.episode_id.cmp(&b.episode_id))
        });
        Ok(episodes)
    }

    fn status_counts(&self, podcast: &str) -> Result<StatusCounts, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM episodes WHERE podcast = ?1 GROUP BY status",
        )?;
        let rows = stmt
            .query_map(params![podcast], |row| {
                Ok((row.get::<_, EpisodeStatus>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            let count = count as usize;
            match status {
                EpisodeStatus::Pending => counts.pending = count,
                EpisodeStatus::Downloaded => counts.downloaded = count,
                EpisodeStatus::Removed => counts.removed = count,
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::tempdir;

    fn podcast(name: &str) -> Podcast {
        Podcast {
            name: name.to_string(),
            feed_url: format!("https://example.com/{name}.xml"),
            image_override: None,
            max_age: "7d".to_string(),
            max_episodes: 3,
        }
    }

    fn episode(id: &str, podcast: &str, days_after_epoch: i64) -> Episode {
        Episode {
            episode_id: id.to_string(),
            podcast: podcast.to_string(),
            title: format!("Episode {id}"),
            author: "Host".to_string(),
            link: format!("https://example.com/{id}.mp3"),
            image: None,
            published_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + Duration::days(days_after_epoch),
            status: EpisodeStatus::Pending,
            local_path: None,
            downloaded_at: None,
        }
    }

    #[test]
    fn insert_and_find_episode() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ep = episode("ep-1", "show", 0);

        store.insert_episode(&ep).unwrap();

        assert_eq!(store.find_episode("ep-1").unwrap(), Some(ep));
        assert_eq!(store.find_episode("ep-2").unwrap(), None);
    }

    #[test]
    fn duplicate_insert_is_reported() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_episode(&episode("ep-1", "show", 0)).unwrap();

        let err = store
            .insert_episode(&episode("ep-1", "other-show", 5))
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(id) if id == "ep-1"));
    }

    #[test]
    fn episodes_are_listed_oldest_first_per_podcast() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_episode(&episode("b", "show", 3)).unwrap();
        store.insert_episode(&episode("a", "show", 1)).unwrap();
        store.insert_episode(&episode("c", "show", 2)).unwrap();
        store.insert_episode(&episode("x", "elsewhere", 0)).unwrap();

        let ids: Vec<_> = store
            .list_episodes_for_podcast("show")
            .unwrap()
            .into_iter()
            .map(|e| e.episode_id)
            .collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
    }

    #[test]
    fn update_is_compare_and_swap() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut ep = episode("ep-1", "show", 0);
        store.insert_episode(&ep).unwrap();

        ep.status = EpisodeStatus::Downloaded;
        ep.local_path = Some(PathBuf::from("/srv/show/ep-1.mp3"));
        ep.downloaded_at = Some(Utc::now());
        store.update_episode(&ep, EpisodeStatus::Pending).unwrap();

        // A second writer still believing the episode is pending loses
        let err = store.update_episode(&ep, EpisodeStatus::Pending).unwrap_err();
        assert!(matches!(err, StoreError::StatusConflict { .. }));

        let stored = store.find_episode("ep-1").unwrap().unwrap();
        assert_eq!(stored.status, EpisodeStatus::Downloaded);
        assert_eq!(stored.local_path, Some(PathBuf::from("/srv/show/ep-1.mp3")));
    }

    #[test]
    fn removed_episodes_never_come_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut ep = episode("ep-1", "show", 0);
        ep.status = EpisodeStatus::Removed;
        store.insert_episode(&ep).unwrap();

        ep.status = EpisodeStatus::Pending;
        let err = store.update_episode(&ep, EpisodeStatus::Removed).unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { .. }));

        ep.status = EpisodeStatus::Downloaded;
        let err = store.update_episode(&ep, EpisodeStatus::Removed).unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { .. }));

        assert_eq!(
            store.find_episode("ep-1").unwrap().unwrap().status,
            EpisodeStatus::Removed
        );
    }

    #[test]
    fn skipping_a_state_is_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut ep = episode("ep-1", "show", 0);
        store.insert_episode(&ep).unwrap();

        ep.status = EpisodeStatus::Removed;
        let err = store.update_episode(&ep, EpisodeStatus::Pending).unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { .. }));
    }

    #[test]
    fn upsert_podcast_replaces_settings() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut show = podcast("show");
        store.upsert_podcast(&show).unwrap();
        store.upsert_podcast(&podcast("another")).unwrap();

        show.max_episodes = 10;
        show.image_override = Some("https://example.com/cover.jpg".to_string());
        store.upsert_podcast(&show).unwrap();

        let podcasts = store.list_podcasts().unwrap();
        assert_eq!(podcasts.len(), 2);
        assert_eq!(podcasts[0].name, "another");
        assert_eq!(podcasts[1], show);
    }

    #[test]
    fn deactivated_podcasts_are_not_listed() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_podcast(&podcast("kept")).unwrap();
        store.upsert_podcast(&podcast("dropped")).unwrap();
        store.insert_episode(&episode("ep-1", "dropped", 0)).unwrap();

        let deactivated = store.deactivate_podcasts_except(&["kept"]).unwrap();
        assert_eq!(deactivated, vec!["dropped".to_string()]);

        let names: Vec<_> = store.list_podcasts().unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["kept"]);
        // History of the unsubscribed podcast is kept
        assert!(store.find_episode("ep-1").unwrap().is_some());

        // Nothing left to deactivate the second time
        assert!(store.deactivate_podcasts_except(&["kept"]).unwrap().is_empty());

        store.upsert_podcast(&podcast("dropped")).unwrap();
        assert_eq!(store.list_podcasts().unwrap().len(), 2);
    }

    #[test]
    fn status_counts_group_by_status() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_episode(&episode("a", "show", 0)).unwrap();
        store.insert_episode(&episode("b", "show", 1)).unwrap();
        let mut done = episode("c", "show", 2);
        done.status = EpisodeStatus::Downloaded;
        store.insert_episode(&done).unwrap();

        assert_eq!(
            store.status_counts("show").unwrap(),
            StatusCounts {
                pending: 2,
                downloaded: 1,
                removed: 0,
            }
        );
    }

    #[test]
    fn file_database_persists_between_opens() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("podkeep.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.upsert_podcast(&podcast("show")).unwrap();
            store.insert_episode(&episode("ep-1", "show", 0)).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.list_podcasts().unwrap().len(), 1);
        assert!(store.find_episode("ep-1").unwrap().is_some());
    }
}
