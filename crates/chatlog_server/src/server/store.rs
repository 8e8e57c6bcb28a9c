#![forbid(unsafe_code)]

use anyhow::{Context, anyhow};
use chatlog_domain::ChatMessage;
use sqlx::Connection;
use tracing::{debug, warn};

/// Source of per-worker database sessions.
#[async_trait::async_trait]
pub trait MessageStore: Send + Sync {
	/// Open a session owned by exactly one worker until it calls `close` (or drops it).
	async fn open_session(&self) -> anyhow::Result<Box<dyn MessageSession>>;
}

/// One worker's database session. Every `insert` is its own committed unit.
#[async_trait::async_trait]
pub trait MessageSession: Send {
	async fn insert(&mut self, msg: &ChatMessage) -> anyhow::Result<()>;

	/// Release the session.
	async fn close(self: Box<Self>);
}

/// sqlx-backed store for `sqlite:`, `postgres:` and `mysql:` URLs.
///
/// The pool only runs migrations; every session dials its own connection so the
/// number of live rooms is not bounded by the pool size.
#[derive(Clone)]
pub struct SqlxMessageStore {
	backend: SqlxBackend,
	database_url: String,
}

#[derive(Clone)]
enum SqlxBackend {
	Sqlite(sqlx::SqlitePool),
	Postgres(sqlx::PgPool),
	Mysql(sqlx::MySqlPool),
}

impl SqlxMessageStore {
	pub async fn connect(database_url: &str, run_migrations: bool) -> anyhow::Result<Self> {
		if database_url.starts_with("sqlite:") {
			if database_url.contains(":memory:") || database_url.contains("mode=memory") {
				return Err(anyhow!(
					"in-memory sqlite is not shared between sessions; use a file database (sqlite://path?mode=rwc)"
				));
			}
			let pool = sqlx::SqlitePool::connect(database_url).await.context("connect sqlite")?;
			if run_migrations {
				sqlx::migrate!("migrations/sqlite")
					.run(&pool)
					.await
					.context("run sqlite migrations")?;
			}

			Ok(Self {
				backend: SqlxBackend::Sqlite(pool),
				database_url: database_url.to_string(),
			})
		} else if database_url.starts_with("postgres:") || database_url.starts_with("postgresql:") {
			let pool = sqlx::PgPool::connect(database_url).await.context("connect postgres")?;
			if run_migrations {
				sqlx::migrate!("migrations/postgres")
					.run(&pool)
					.await
					.context("run postgres migrations")?;
			}

			Ok(Self {
				backend: SqlxBackend::Postgres(pool),
				database_url: database_url.to_string(),
			})
		} else if database_url.starts_with("mysql:") || database_url.starts_with("mariadb:") {
			let pool = sqlx::MySqlPool::connect(database_url).await.context("connect mysql")?;
			if run_migrations {
				sqlx::migrate!("migrations/mysql")
					.run(&pool)
					.await
					.context("run mysql migrations")?;
			}

			Ok(Self {
				backend: SqlxBackend::Mysql(pool),
				database_url: database_url.to_string(),
			})
		} else {
			Err(anyhow!("unsupported database_url (use sqlite:, postgres:, mysql:)"))
		}
	}

	pub fn backend_name(&self) -> &'static str {
		match &self.backend {
			SqlxBackend::Sqlite(_) => "sqlite",
			SqlxBackend::Postgres(_) => "postgres",
			SqlxBackend::Mysql(_) => "mysql",
		}
	}

	/// Close the migration pool. Open sessions are unaffected.
	pub async fn close(&self) {
		match &self.backend {
			SqlxBackend::Sqlite(pool) => pool.close().await,
			SqlxBackend::Postgres(pool) => pool.close().await,
			SqlxBackend::Mysql(pool) => pool.close().await,
		}
	}
}

#[async_trait::async_trait]
impl MessageStore for SqlxMessageStore {
	async fn open_session(&self) -> anyhow::Result<Box<dyn MessageSession>> {
		let url = self.database_url.as_str();
		let session = match &self.backend {
			SqlxBackend::Sqlite(_) => {
				SqlxSession::Sqlite(sqlx::SqliteConnection::connect(url).await.context("open sqlite session")?)
			}
			SqlxBackend::Postgres(_) => {
				SqlxSession::Postgres(sqlx::PgConnection::connect(url).await.context("open postgres session")?)
			}
			SqlxBackend::Mysql(_) => {
				SqlxSession::Mysql(sqlx::MySqlConnection::connect(url).await.context("open mysql session")?)
			}
		};
		Ok(Box::new(session))
	}
}

/// A dedicated connection owned by one worker for its whole lifetime.
enum SqlxSession {
	Sqlite(sqlx::SqliteConnection),
	Postgres(sqlx::PgConnection),
	Mysql(sqlx::MySqlConnection),
}

#[async_trait::async_trait]
impl MessageSession for SqlxSession {
	async fn insert(&mut self, msg: &ChatMessage) -> anyhow::Result<()> {
		match self {
			SqlxSession::Sqlite(conn) => {
				sqlx::query("INSERT INTO messages (timestamp, channel, username, text) VALUES (?, ?, ?, ?)")
					.bind(msg.observed_at)
					.bind(msg.room.as_str())
					.bind(msg.author.as_str())
					.bind(msg.text.as_str())
					.execute(&mut *conn)
					.await
					.context("insert message (sqlite)")?;
			}
			SqlxSession::Postgres(conn) => {
				sqlx::query("INSERT INTO messages (timestamp, channel, username, text) VALUES ($1, $2, $3, $4)")
					.bind(msg.observed_at)
					.bind(msg.room.as_str())
					.bind(msg.author.as_str())
					.bind(msg.text.as_str())
					.execute(&mut *conn)
					.await
					.context("insert message (postgres)")?;
			}
			SqlxSession::Mysql(conn) => {
				sqlx::query("INSERT INTO messages (timestamp, channel, username, text) VALUES (?, ?, ?, ?)")
					.bind(msg.observed_at)
					.bind(msg.room.as_str())
					.bind(msg.author.as_str())
					.bind(msg.text.as_str())
					.execute(&mut *conn)
					.await
					.context("insert message (mysql)")?;
			}
		}
		Ok(())
	}

	async fn close(self: Box<Self>) {
		let closed = match *self {
			SqlxSession::Sqlite(conn) => conn.close().await,
			SqlxSession::Postgres(conn) => conn.close().await,
			SqlxSession::Mysql(conn) => conn.close().await,
		};
		match closed {
			Ok(()) => debug!("database session closed"),
			Err(e) => warn!(error = %e, "database session did not close cleanly"),
		}
	}
}
