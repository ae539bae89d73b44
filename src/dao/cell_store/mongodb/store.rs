use std::{sync::Arc, time::SystemTime};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database,
    bson::{DateTime, doc},
    options::{IndexOptions, ReturnDocument},
};
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult, is_duplicate_key},
    models::{MongoPixelDocument, MongoUserDocument, pixel_filter, user_filter},
};
use crate::dao::{
    cell_store::CellStore,
    models::{CellEntity, UserEntity},
    storage::StorageResult,
};

const PIXEL_COLLECTION_NAME: &str = "pixels";
const USER_COLLECTION_NAME: &str = "users";

#[derive(Clone)]
/// [`CellStore`] backed by MongoDB, with a reconnectable client.
pub struct MongoCellStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    // Kept alive alongside the database handle; dropping it would close the pool.
    #[allow(dead_code)]
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoCellStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let pixel_index = mongodb::IndexModel::builder()
            .keys(doc! {"x": 1, "y": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("pixel_xy_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();

        self.pixel_collection()
            .await
            .create_index(pixel_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: PIXEL_COLLECTION_NAME,
                index: "x,y",
                source,
            })?;

        let user_index = mongodb::IndexModel::builder()
            .keys(doc! {"userId": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("user_id_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();

        self.user_collection()
            .await
            .create_index(user_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: USER_COLLECTION_NAME,
                index: "userId",
                source,
            })?;

        Ok(())
    }

    async fn pixel_collection(&self) -> Collection<MongoPixelDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoPixelDocument>(PIXEL_COLLECTION_NAME)
    }

    async fn user_collection(&self) -> Collection<MongoUserDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoUserDocument>(USER_COLLECTION_NAME)
    }

    async fn find_and_upsert_pixel(
        &self,
        x: i32,
        y: i32,
        color: &str,
        writer_id: Option<&str>,
    ) -> Result<Option<MongoPixelDocument>, mongodb::error::Error> {
        let update = doc! {
            "$set": {
                "color": color,
                "lastModified": DateTime::now(),
                "writerId": writer_id,
            }
        };

        self.pixel_collection()
            .await
            .find_one_and_update(pixel_filter(x, y), update)
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await
    }

    async fn upsert_pixel(
        &self,
        x: i32,
        y: i32,
        color: String,
        writer_id: Option<String>,
    ) -> MongoResult<CellEntity> {
        let first = self
            .find_and_upsert_pixel(x, y, &color, writer_id.as_deref())
            .await;

        // Two concurrent upserts on a fresh coordinate can both try the insert; the loser
        // hits the unique index and succeeds as a plain update on retry.
        let document = match first {
            Err(err) if is_duplicate_key(&err) => {
                debug!(x, y, "duplicate key on pixel upsert; retrying as update");
                self.find_and_upsert_pixel(x, y, &color, writer_id.as_deref())
                    .await
            }
            other => other,
        }
        .map_err(|source| MongoDaoError::UpsertPixel { x, y, source })?;

        document
            .map(CellEntity::from)
            .ok_or(MongoDaoError::MissingPixel { x, y })
    }

    async fn load_pixels(&self) -> MongoResult<Vec<CellEntity>> {
        let documents: Vec<MongoPixelDocument> = self
            .pixel_collection()
            .await
            .find(doc! {})
            .await
            .map_err(|source| MongoDaoError::LoadPixels { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::LoadPixels { source })?;

        Ok(documents.into_iter().map(CellEntity::from).collect())
    }

    async fn clear_pixels(&self) -> MongoResult<u64> {
        let result = self
            .pixel_collection()
            .await
            .delete_many(doc! {})
            .await
            .map_err(|source| MongoDaoError::ClearPixels { source })?;
        Ok(result.deleted_count)
    }

    async fn save_user(&self, user: UserEntity) -> MongoResult<()> {
        let user_id = user.user_id.clone();
        let document: MongoUserDocument = user.into();
        self.user_collection()
            .await
            .replace_one(user_filter(&user_id), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveUser { user_id, source })?;
        Ok(())
    }

    async fn mark_user_offline(&self, user_id: String) -> MongoResult<()> {
        let update = doc! {
            "$set": {
                "isOnline": false,
                "lastActivity": DateTime::from_system_time(SystemTime::now()),
            }
        };
        self.user_collection()
            .await
            .update_one(user_filter(&user_id), update)
            .await
            .map_err(|source| MongoDaoError::SaveUser { user_id, source })?;
        Ok(())
    }
}

impl CellStore for MongoCellStore {
    fn upsert(
        &self,
        x: i32,
        y: i32,
        color: String,
        writer_id: Option<String>,
    ) -> BoxFuture<'static, StorageResult<CellEntity>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .upsert_pixel(x, y, color, writer_id)
                .await
                .map_err(Into::into)
        })
    }

    fn load_all(&self) -> BoxFuture<'static, StorageResult<Vec<CellEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.load_pixels().await.map_err(Into::into) })
    }

    fn clear_all(&self) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move { store.clear_pixels().await.map_err(Into::into) })
    }

    fn save_user(&self, user: UserEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_user(user).await.map_err(Into::into) })
    }

    fn mark_user_offline(&self, user_id: String) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.mark_user_offline(user_id).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
