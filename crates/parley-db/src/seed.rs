//! Import of the directory snapshot (users, groups, channels) owned by the
//! rest of the system. The gateway only reads these tables.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::Database;

/// Roles that bypass group membership checks.
const SUPER_ADMIN_ROLES: [&str; 2] = ["super", "super_admin"];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seed {
    #[serde(default)]
    pub users: Vec<SeedUser>,
    #[serde(default)]
    pub groups: Vec<SeedGroup>,
    #[serde(default)]
    pub channels: Vec<SeedChannel>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl SeedUser {
    pub fn is_super_admin(&self) -> bool {
        self.roles.iter().any(|r| SUPER_ADMIN_ROLES.contains(&r.as_str()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub member_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedChannel {
    pub id: String,
    pub group_id: String,
    pub name: String,
    #[serde(default)]
    pub banned_user_ids: Vec<String>,
}

impl Seed {
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading seed file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing seed file {}", path.display()))
    }
}

impl Database {
    /// Upsert a directory snapshot. Group member and channel ban lists are
    /// replaced wholesale for every group/channel present in the seed.
    pub fn import_seed(&self, seed: &Seed) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            for user in &seed.users {
                tx.execute(
                    "INSERT INTO users (id, username, is_super_admin) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET username = excluded.username,
                                                   is_super_admin = excluded.is_super_admin",
                    rusqlite::params![user.id, user.username, user.is_super_admin()],
                )?;
            }

            for group in &seed.groups {
                tx.execute(
                    "INSERT INTO groups (id, name) VALUES (?1, ?2)
                     ON CONFLICT(id) DO UPDATE SET name = excluded.name",
                    rusqlite::params![group.id, group.name],
                )?;
                tx.execute("DELETE FROM group_members WHERE group_id = ?1", [&group.id])?;
                for member in &group.member_ids {
                    tx.execute(
                        "INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES (?1, ?2)",
                        rusqlite::params![group.id, member],
                    )?;
                }
            }

            for channel in &seed.channels {
                tx.execute(
                    "INSERT INTO channels (id, group_id, name) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET group_id = excluded.group_id,
                                                   name = excluded.name",
                    rusqlite::params![channel.id, channel.group_id, channel.name],
                )?;
                tx.execute("DELETE FROM channel_bans WHERE channel_id = ?1", [&channel.id])?;
                for banned in &channel.banned_user_ids {
                    tx.execute(
                        "INSERT OR IGNORE INTO channel_bans (channel_id, user_id) VALUES (?1, ?2)",
                        rusqlite::params![channel.id, banned],
                    )?;
                }
            }

            tx.commit()?;
            info!(
                "Seed imported: {} users, {} groups, {} channels",
                seed.users.len(),
                seed.groups.len(),
                seed.channels.len()
            );
            Ok(())
        })
    }
}
