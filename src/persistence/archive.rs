use crate::model::{DeviceNode, DistressMessage, Location, MessageRoute};
use crate::persistence::error::{ArchiveError, ArchiveResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeSet, HashSet};
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// sqlx connection string, e.g. `sqlite://sahaay.db` or `sqlite::memory:`
    pub database_url: String,
}

/// Everything needed to rebuild the in-memory state
#[derive(Debug, Clone, Default)]
pub struct ArchiveSnapshot {
    pub messages: Vec<DistressMessage>,
    pub devices: Vec<DeviceNode>,
    pub routes: Vec<MessageRoute>,
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS distress_messages (
        id TEXT PRIMARY KEY,
        sender_id TEXT NOT NULL,
        origin_device_id TEXT NOT NULL,
        message_type TEXT NOT NULL,
        urgency_level TEXT NOT NULL,
        content TEXT NOT NULL,
        latitude REAL NOT NULL,
        longitude REAL NOT NULL,
        address TEXT,
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        expires_at INTEGER,
        relay_count INTEGER NOT NULL,
        acknowledgments TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_messages_location ON distress_messages(latitude, longitude)",
    "CREATE INDEX IF NOT EXISTS idx_messages_urgency ON distress_messages(urgency_level)",
    "CREATE INDEX IF NOT EXISTS idx_messages_type ON distress_messages(message_type)",
    "CREATE INDEX IF NOT EXISTS idx_messages_status ON distress_messages(status)",
    "CREATE INDEX IF NOT EXISTS idx_messages_created ON distress_messages(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_messages_expires ON distress_messages(expires_at)",
    "CREATE INDEX IF NOT EXISTS idx_messages_sender ON distress_messages(sender_id)",
    "CREATE INDEX IF NOT EXISTS idx_messages_emergency ON distress_messages(latitude, longitude, urgency_level, status)",
    r#"
    CREATE TABLE IF NOT EXISTS device_nodes (
        device_id TEXT PRIMARY KEY,
        user_id TEXT,
        latitude REAL,
        longitude REAL,
        address TEXT,
        is_online INTEGER NOT NULL,
        last_seen INTEGER NOT NULL,
        connected_peers TEXT NOT NULL,
        message_queue_size INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_devices_user ON device_nodes(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_devices_online ON device_nodes(is_online)",
    "CREATE INDEX IF NOT EXISTS idx_devices_last_seen ON device_nodes(last_seen)",
    "CREATE INDEX IF NOT EXISTS idx_devices_location ON device_nodes(latitude, longitude)",
    r#"
    CREATE TABLE IF NOT EXISTS message_routes (
        id TEXT PRIMARY KEY,
        message_id TEXT NOT NULL,
        from_device_id TEXT NOT NULL,
        to_device_id TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        hop_count INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_routes_message ON message_routes(message_id)",
    "CREATE INDEX IF NOT EXISTS idx_routes_from ON message_routes(from_device_id)",
    "CREATE INDEX IF NOT EXISTS idx_routes_to ON message_routes(to_device_id)",
    "CREATE INDEX IF NOT EXISTS idx_routes_timestamp ON message_routes(timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_routes_hop ON message_routes(hop_count)",
];

pub struct MeshArchive {
    pool: SqlitePool,
}

impl MeshArchive {
    /// Open (creating if needed) the database at `database_url`
    pub async fn open(database_url: &str) -> ArchiveResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to an in-memory database would see its own copy
        let max_connections = if database_url.contains(":memory:") { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        tracing::info!(database_url, "Archive opened");
        Ok(Self { pool })
    }

    /// In-memory archive (for testing)
    pub async fn in_memory() -> ArchiveResult<Self> {
        Self::open("sqlite::memory:").await
    }

    pub async fn from_config(config: &ArchiveConfig) -> ArchiveResult<Self> {
        Self::open(&config.database_url).await
    }

    // ============== Messages ==============

    pub async fn save_message(&self, message: &DistressMessage) -> ArchiveResult<()> {
        let acknowledgments = serde_json::to_string(&message.acknowledgments)?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO distress_messages
            (id, sender_id, origin_device_id, message_type, urgency_level, content,
             latitude, longitude, address, status, created_at, expires_at, relay_count, acknowledgments)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.sender_id)
        .bind(&message.origin_device_id)
        .bind(message.message_type.as_str())
        .bind(message.urgency_level.as_str())
        .bind(&message.content)
        .bind(message.location.latitude)
        .bind(message.location.longitude)
        .bind(message.location.address.as_deref())
        .bind(message.status.as_str())
        .bind(message.created_at.timestamp_millis())
        .bind(message.expires_at.map(|at| at.timestamp_millis()))
        .bind(i64::from(message.relay_count))
        .bind(acknowledgments)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn load_message(&self, id: &str) -> ArchiveResult<Option<DistressMessage>> {
        let row = sqlx::query("SELECT * FROM distress_messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| Self::message_from_row(&row)).transpose()
    }

    pub async fn load_messages(&self) -> ArchiveResult<Vec<DistressMessage>> {
        let rows = sqlx::query("SELECT * FROM distress_messages ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::message_from_row).collect()
    }

    pub async fn message_count(&self) -> ArchiveResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM distress_messages")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }

    fn message_from_row(row: &SqliteRow) -> ArchiveResult<DistressMessage> {
        let mut location = Location::new(row.try_get("latitude")?, row.try_get("longitude")?);
        location.address = row.try_get("address")?;

        let relay_count: i64 = row.try_get("relay_count")?;
        let acknowledgments: BTreeSet<String> =
            serde_json::from_str(&row.try_get::<String, _>("acknowledgments")?)?;

        Ok(DistressMessage {
            id: row.try_get("id")?,
            sender_id: row.try_get("sender_id")?,
            origin_device_id: row.try_get("origin_device_id")?,
            message_type: row.try_get::<String, _>("message_type")?.parse()?,
            urgency_level: row.try_get::<String, _>("urgency_level")?.parse()?,
            content: row.try_get("content")?,
            location,
            status: row.try_get::<String, _>("status")?.parse()?,
            created_at: from_millis(row.try_get("created_at")?)?,
            expires_at: row
                .try_get::<Option<i64>, _>("expires_at")?
                .map(from_millis)
                .transpose()?,
            relay_count: u32::try_from(relay_count)
                .map_err(|_| ArchiveError::Corrupt(format!("relay_count {relay_count}")))?,
            acknowledgments,
        })
    }

    // ============== Devices ==============

    pub async fn save_device(&self, device: &DeviceNode) -> ArchiveResult<()> {
        let mut peers: Vec<&String> = device.connected_peers.iter().collect();
        peers.sort();
        let peers = serde_json::to_string(&peers)?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO device_nodes
            (device_id, user_id, latitude, longitude, address, is_online, last_seen,
             connected_peers, message_queue_size)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&device.device_id)
        .bind(device.user_id.as_deref())
        .bind(device.location.as_ref().map(|l| l.latitude))
        .bind(device.location.as_ref().map(|l| l.longitude))
        .bind(device.location.as_ref().and_then(|l| l.address.as_deref()))
        .bind(device.is_online)
        .bind(device.last_seen.timestamp_millis())
        .bind(peers)
        .bind(i64::from(device.message_queue_size))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn load_device(&self, device_id: &str) -> ArchiveResult<Option<DeviceNode>> {
        let row = sqlx::query("SELECT * FROM device_nodes WHERE device_id = ?")
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| Self::device_from_row(&row)).transpose()
    }

    pub async fn load_devices(&self) -> ArchiveResult<Vec<DeviceNode>> {
        let rows = sqlx::query("SELECT * FROM device_nodes ORDER BY device_id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::device_from_row).collect()
    }

    fn device_from_row(row: &SqliteRow) -> ArchiveResult<DeviceNode> {
        let latitude: Option<f64> = row.try_get("latitude")?;
        let longitude: Option<f64> = row.try_get("longitude")?;
        let location = match (latitude, longitude) {
            (Some(latitude), Some(longitude)) => {
                let mut location = Location::new(latitude, longitude);
                location.address = row.try_get("address")?;
                Some(location)
            }
            _ => None,
        };

        let queue_size: i64 = row.try_get("message_queue_size")?;
        let connected_peers: HashSet<String> =
            serde_json::from_str(&row.try_get::<String, _>("connected_peers")?)?;

        Ok(DeviceNode {
            device_id: row.try_get("device_id")?,
            user_id: row.try_get("user_id")?,
            location,
            is_online: row.try_get("is_online")?,
            last_seen: from_millis(row.try_get("last_seen")?)?,
            connected_peers,
            message_queue_size: u32::try_from(queue_size)
                .map_err(|_| ArchiveError::Corrupt(format!("message_queue_size {queue_size}")))?,
        })
    }

    // ============== Routes ==============

    /// Routes are immutable; re-appending a known route id is a no-op
    pub async fn append_route(&self, route: &MessageRoute) -> ArchiveResult<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO message_routes
            (id, message_id, from_device_id, to_device_id, timestamp, hop_count)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&route.id)
        .bind(&route.message_id)
        .bind(&route.from_device_id)
        .bind(&route.to_device_id)
        .bind(route.timestamp.timestamp_millis())
        .bind(i64::from(route.hop_count))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn routes_for(&self, message_id: &str) -> ArchiveResult<Vec<MessageRoute>> {
        let rows = sqlx::query(
            "SELECT * FROM message_routes WHERE message_id = ? ORDER BY hop_count, timestamp",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::route_from_row).collect()
    }

    /// All routes, parents before children within each message
    pub async fn load_routes(&self) -> ArchiveResult<Vec<MessageRoute>> {
        let rows = sqlx::query(
            "SELECT * FROM message_routes ORDER BY message_id, hop_count, timestamp",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::route_from_row).collect()
    }

    fn route_from_row(row: &SqliteRow) -> ArchiveResult<MessageRoute> {
        let hop_count: i64 = row.try_get("hop_count")?;
        Ok(MessageRoute {
            id: row.try_get("id")?,
            message_id: row.try_get("message_id")?,
            from_device_id: row.try_get("from_device_id")?,
            to_device_id: row.try_get("to_device_id")?,
            timestamp: from_millis(row.try_get("timestamp")?)?,
            hop_count: u32::try_from(hop_count)
                .map_err(|_| ArchiveError::Corrupt(format!("hop_count {hop_count}")))?,
        })
    }

    pub async fn load_snapshot(&self) -> ArchiveResult<ArchiveSnapshot> {
        Ok(ArchiveSnapshot {
            messages: self.load_messages().await?,
            devices: self.load_devices().await?,
            routes: self.load_routes().await?,
        })
    }
}

fn from_millis(millis: i64) -> ArchiveResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| ArchiveError::Corrupt(format!("timestamp {millis}")))
}
