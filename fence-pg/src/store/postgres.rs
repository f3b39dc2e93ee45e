//! Stockage PostgreSQL/PostGIS des clôtures

use adcode::{Adcode, FenceKey, KEY_MULTIPLIER};
use async_trait::async_trait;
use deadpool_postgres::{Object, Pool};
use tokio_postgres::binary_copy::BinaryCopyInWriter;
use tokio_postgres::types::Type;
use tracing::{debug, info, trace, warn};

use crate::config::{TableName, Tables};
use crate::report::CheckReport;
use crate::store::{FenceSchema, FenceStore, LoadBatch};
use crate::FenceError;

/// Table temporaire du batch d'upsert, supprimée au commit ou au rollback
const STAGING_TABLE: &str = "_staging_fence";

/// Stockage PostGIS adossé à un pool de connexions
#[derive(Clone)]
pub struct PgFenceStore {
    pool: Pool,
    tables: Tables,
    srid: i32,
}

impl PgFenceStore {
    pub fn new(pool: Pool, tables: Tables, srid: i32) -> Self {
        Self { pool, tables, srid }
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    async fn client(&self) -> Result<Object, FenceError> {
        self.pool
            .get()
            .await
            .map_err(|e| FenceError::storage("get connection from pool", e))
    }

    /// Exécute un script DDL sur une connexion du pool
    async fn batch(&self, context: &str, sql: &str) -> Result<(), FenceError> {
        let client = self.client().await?;
        trace!(sql = sql, "Executing DDL");
        client
            .batch_execute(sql)
            .await
            .map_err(|e| FenceError::storage(context, e))
    }

    /// Vérifie l'existence d'une table (`to_regclass`)
    async fn table_exists(&self, client: &Object, table: &TableName) -> Result<bool, FenceError> {
        let row = client
            .query_one("SELECT to_regclass($1::text) IS NOT NULL", &[&table.to_string()])
            .await
            .map_err(|e| FenceError::storage(format!("check existence of {}", table), e))?;
        Ok(row.get(0))
    }
}

/// Active PostGIS si nécessaire (peut nécessiter des droits superuser).
/// Si l'extension existe déjà mais que l'utilisateur ne peut pas la (re)créer,
/// on dégrade gracieusement.
async fn ensure_postgis(client: &Object) -> Result<(), FenceError> {
    match client
        .execute("CREATE EXTENSION IF NOT EXISTS postgis", &[])
        .await
    {
        Ok(_) => Ok(()),
        Err(e) => {
            warn!("CREATE EXTENSION postgis failed (will check if already installed): {e}");
            let exists = client
                .query_opt("SELECT 1 FROM pg_extension WHERE extname = 'postgis'", &[])
                .await
                .map_err(|e| FenceError::storage("check pg_extension", e))?
                .is_some();
            if exists {
                Ok(())
            } else {
                Err(FenceError::storage(
                    "PostGIS extension is not installed and could not be created",
                    e,
                ))
            }
        }
    }
}

fn aggregate_codes_sql(fence: &TableName) -> String {
    format!(
        "SELECT DISTINCT (code / {m})::integer AS adcode FROM {fence} \
         WHERE code % {m} = 0 AND code BETWEEN {min} AND {max} ORDER BY 1",
        m = KEY_MULTIPLIER,
        fence = fence,
        min = FenceKey::MIN,
        max = FenceKey::MAX,
    )
}

fn create_table_sql(fence: &TableName, srid: i32) -> String {
    format!(
        r#"
        DROP TABLE IF EXISTS {fence};
        CREATE TABLE {fence} (
            code BIGINT PRIMARY KEY,
            adcode INTEGER NOT NULL,
            geometry geometry(Geometry, {srid})
        );
        "#,
        fence = fence,
        srid = srid
    )
}

fn create_indexes_sql(fence: &TableName) -> String {
    let bare = fence.bare();
    format!(
        r#"
        CREATE INDEX IF NOT EXISTS {bare}_code_text_idx ON {fence} ((code::text) text_pattern_ops);
        CREATE INDEX IF NOT EXISTS {bare}_adcode_idx ON {fence} (adcode);
        CREATE INDEX IF NOT EXISTS {bare}_geometry_idx ON {fence} USING GIST (geometry);
        "#,
        bare = bare,
        fence = fence
    )
}

/// Fusion de la table de staging: un seul INSERT ... ON CONFLICT
fn merge_sql(fence: &TableName) -> String {
    format!(
        r#"
        INSERT INTO {fence} (code, adcode, geometry)
        SELECT code, adcode, ST_SetSRID(ST_GeomFromGeoJSON(geojson), $1)
        FROM {staging}
        ON CONFLICT (code) DO UPDATE
        SET adcode = EXCLUDED.adcode, geometry = EXCLUDED.geometry
        "#,
        fence = fence,
        staging = STAGING_TABLE
    )
}

#[async_trait]
impl FenceStore for PgFenceStore {
    async fn aggregate_codes(&self) -> Result<Vec<Adcode>, FenceError> {
        let client = self.client().await?;
        let rows = client
            .query(&aggregate_codes_sql(&self.tables.fence), &[])
            .await
            .map_err(|e| FenceError::storage(format!("list codes of {}", self.tables.fence), e))?;

        let codes = rows
            .iter()
            .map(|row| Adcode::try_from(row.get::<_, i32>(0)))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(table = %self.tables.fence, codes = codes.len(), "Listed aggregate fence codes");
        Ok(codes)
    }

    async fn fetch_geojson(&self, key: FenceKey) -> Result<Option<String>, FenceError> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT ST_AsGeoJSON(geometry) FROM {} WHERE code = $1",
                    self.tables.fence
                ),
                &[&key.get()],
            )
            .await
            .map_err(|e| FenceError::storage(format!("fetch fence {}", key), e))?;

        // Ligne absente ou géométrie NULL
        Ok(row.and_then(|r| r.get::<_, Option<String>>(0)))
    }

    async fn upsert_batch(&self, batch: &LoadBatch) -> Result<u64, FenceError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let rows = batch.len();
        let mut client = self.client().await?;

        let tx = client
            .transaction()
            .await
            .map_err(|e| FenceError::load_batch(rows, e))?;

        tx.batch_execute(&format!(
            "CREATE TEMP TABLE {} (code BIGINT, adcode INTEGER, geojson TEXT) ON COMMIT DROP",
            STAGING_TABLE
        ))
        .await
        .map_err(|e| FenceError::load_batch(rows, e))?;

        let sink = tx
            .copy_in(&format!(
                "COPY {} (code, adcode, geojson) FROM STDIN (FORMAT binary)",
                STAGING_TABLE
            ))
            .await
            .map_err(|e| FenceError::load_batch(rows, e))?;
        let writer = BinaryCopyInWriter::new(sink, &[Type::INT8, Type::INT4, Type::TEXT]);
        let mut writer = std::pin::pin!(writer);

        for row in batch.rows() {
            let code = row.key.get();
            let adcode = i32::from(row.adcode);
            writer
                .as_mut()
                .write(&[&code, &adcode, &row.geojson])
                .await
                .map_err(|e| FenceError::load_batch(rows, e))?;
        }
        let staged = writer
            .as_mut()
            .finish()
            .await
            .map_err(|e| FenceError::load_batch(rows, e))?;
        debug!(rows = staged, "Fence batch staged");

        // En cas d'erreur, la transaction est annulée au drop
        let upserted = tx
            .execute(&merge_sql(&self.tables.fence), &[&self.srid])
            .await
            .map_err(|e| FenceError::load_batch(rows, e))?;

        tx.commit()
            .await
            .map_err(|e| FenceError::load_batch(rows, e))?;

        info!(table = %self.tables.fence, rows = rows, upserted = upserted, "Fence batch committed");
        Ok(upserted)
    }
}

#[async_trait]
impl FenceSchema for PgFenceStore {
    async fn create_table(&self) -> Result<(), FenceError> {
        let client = self.client().await?;
        ensure_postgis(&client).await?;
        client
            .batch_execute(&create_table_sql(&self.tables.fence, self.srid))
            .await
            .map_err(|e| FenceError::storage(format!("create table {}", self.tables.fence), e))?;

        info!("Created table {}", self.tables.fence);
        Ok(())
    }

    async fn create_indexes(&self) -> Result<(), FenceError> {
        self.batch(
            &format!("create indexes on {}", self.tables.fence),
            &create_indexes_sql(&self.tables.fence),
        )
        .await?;
        info!("Created indexes on {}", self.tables.fence);
        Ok(())
    }

    async fn drop_table(&self) -> Result<(), FenceError> {
        self.batch(
            &format!("drop table {}", self.tables.fence),
            &format!("DROP TABLE IF EXISTS {}", self.tables.fence),
        )
        .await?;
        info!("Dropped table {}", self.tables.fence);
        Ok(())
    }

    async fn truncate_table(&self) -> Result<(), FenceError> {
        self.batch(
            &format!("truncate table {}", self.tables.fence),
            &format!("TRUNCATE TABLE {}", self.tables.fence),
        )
        .await?;
        info!("Truncated table {}", self.tables.fence);
        Ok(())
    }

    async fn reorder_adcodes(&self) -> Result<u64, FenceError> {
        let table = &self.tables.adcode;
        let staging = table.with_prefix("_staging_");
        let context = format!("reorder {}", table);

        let mut client = self.client().await?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| FenceError::storage(context.clone(), e))?;

        tx.batch_execute(&format!(
            r#"
            DROP TABLE IF EXISTS {staging};
            CREATE TABLE {staging} AS SELECT * FROM {table} ORDER BY rank, code;
            TRUNCATE TABLE {table};
            "#,
            staging = staging,
            table = table
        ))
        .await
        .map_err(|e| FenceError::storage(context.clone(), e))?;

        let rows = tx
            .execute(
                &format!(
                    "INSERT INTO {} SELECT * FROM {} ORDER BY rank, code",
                    table, staging
                ),
                &[],
            )
            .await
            .map_err(|e| FenceError::storage(context.clone(), e))?;

        tx.batch_execute(&format!("DROP TABLE {}", staging))
            .await
            .map_err(|e| FenceError::storage(context.clone(), e))?;
        tx.commit()
            .await
            .map_err(|e| FenceError::storage(context, e))?;

        info!(table = %table, rows = rows, "Reordered administrative codes");
        Ok(rows)
    }

    async fn check_table(&self) -> Result<CheckReport, FenceError> {
        let fence = &self.tables.fence;
        let client = self.client().await?;
        let context = format!("check {}", fence);

        let row = client
            .query_one(
                &format!(
                    r#"
                    SELECT
                        count(*) AS total_rows,
                        count(*) FILTER (WHERE code <> adcode::bigint * {m}) AS bad_keys,
                        count(*) FILTER (WHERE geometry IS NOT NULL AND NOT ST_IsValid(geometry)) AS invalid
                    FROM {fence}
                    "#,
                    m = KEY_MULTIPLIER,
                    fence = fence
                ),
                &[],
            )
            .await
            .map_err(|e| FenceError::storage(context.clone(), e))?;

        let mut report = CheckReport {
            rows: row.get::<_, i64>("total_rows") as u64,
            bad_keys: row.get::<_, i64>("bad_keys") as u64,
            invalid_geometries: row.get::<_, i64>("invalid") as u64,
            ..Default::default()
        };

        let reference = &self.tables.adcode;
        if self.table_exists(&client, reference).await? {
            let orphans = client
                .query(
                    &format!(
                        "SELECT DISTINCT f.adcode FROM {fence} f \
                         WHERE NOT EXISTS (SELECT 1 FROM {reference} a WHERE a.code = f.code) \
                         ORDER BY 1",
                        fence = fence,
                        reference = reference
                    ),
                    &[],
                )
                .await
                .map_err(|e| FenceError::storage(context.clone(), e))?;

            for row in orphans {
                let raw: i32 = row.get(0);
                match Adcode::try_from(raw) {
                    Ok(code) => report.orphan_adcodes.push(code),
                    // Déjà compté dans bad_keys si la clé est incohérente
                    Err(_) => warn!(adcode = raw, "Orphan fence with malformed adcode"),
                }
            }
            report.reference_checked = true;
        } else {
            warn!(table = %reference, "Reference table missing, skipping orphan check");
        }

        debug!("{}", report.summary());
        Ok(report)
    }
}
