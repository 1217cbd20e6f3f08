use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::api::ApiClient;
use crate::config::Config;
use crate::db;
use crate::models::{FilterOptions, ResultsPage, Snapshot};
use crate::results::{self, ResultsQuery};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SourceKind {
    /// Platform REST API
    #[default]
    Api,
    /// Direct read access to the platform database
    Postgres,
}

/// Where dashboard data comes from.
#[derive(Debug, Clone)]
pub enum Backend {
    Api(ApiClient),
    Postgres(PgPool),
}

pub async fn connect_postgres(config: &Config) -> anyhow::Result<PgPool> {
    let database_url = config.database_url()?;
    PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

impl Backend {
    pub async fn connect(kind: SourceKind, config: &Config) -> anyhow::Result<Self> {
        match kind {
            SourceKind::Api => Ok(Backend::Api(ApiClient::new(&config.api, config.api_token())?)),
            SourceKind::Postgres => Ok(Backend::Postgres(connect_postgres(config).await?)),
        }
    }

    pub fn api(&self) -> anyhow::Result<&ApiClient> {
        match self {
            Backend::Api(client) => Ok(client),
            Backend::Postgres(_) => {
                anyhow::bail!("this command needs the API source (--source api)")
            }
        }
    }

    pub async fn snapshot(&self) -> anyhow::Result<Snapshot> {
        match self {
            Backend::Api(client) => Ok(client.snapshot().await?),
            Backend::Postgres(pool) => db::fetch_snapshot(pool).await,
        }
    }

    /// The API answers results queries itself; for Postgres they run locally.
    pub async fn results(&self, query: &ResultsQuery) -> anyhow::Result<ResultsPage> {
        match self {
            Backend::Api(client) => Ok(client.results(query).await?),
            Backend::Postgres(pool) => {
                let snapshot = db::fetch_snapshot(pool).await?;
                let rows = results::build_rows(&snapshot);
                Ok(results::run_query(&rows, query))
            }
        }
    }

    pub async fn filter_options(&self) -> anyhow::Result<FilterOptions> {
        match self {
            Backend::Api(client) => Ok(client.filter_options().await?),
            Backend::Postgres(pool) => {
                let snapshot = db::fetch_snapshot(pool).await?;
                Ok(results::filter_options(&snapshot))
            }
        }
    }

    pub async fn set_rechat(&self, evaluation_id: Uuid, allow: bool) -> anyhow::Result<()> {
        match self {
            Backend::Api(client) => Ok(client.set_rechat(evaluation_id, allow).await?),
            Backend::Postgres(pool) => {
                if !db::set_rechat(pool, evaluation_id, allow).await? {
                    anyhow::bail!("no evaluation with id {evaluation_id}");
                }
                Ok(())
            }
        }
    }
}
