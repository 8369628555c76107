//! Record store for the `cafe` table.
use crate::error::{StoreError, StoreResult};
use crate::models::{Cafe, NewCafe};
use crate::orm::Db;
use log::{debug, info};
use rand::Rng;
use std::sync::Arc;

const SELECT_CAFE: &str = "SELECT id, name, map_url, img_url, location, seats, \
     has_toilet, has_wifi, has_sockets, can_take_calls, coffee_price FROM cafe";

#[derive(Clone, Debug)]
pub struct CafeStore {
    db: Arc<Db>,
}

impl CafeStore {
    pub fn new(db: Arc<Db>) -> Self {
        CafeStore { db }
    }

    pub fn db(&self) -> &Arc<Db> {
        &self.db
    }

    /// Every cafe, in insertion order.
    pub async fn list_all(&self) -> StoreResult<Vec<Cafe>> {
        Ok(self
            .db
            .fetch_all(&format!("{SELECT_CAFE} ORDER BY id"))
            .await?)
    }

    /// A uniformly random cafe, or `EmptyCollection` when the table is empty.
    ///
    /// The count and the pick share one read transaction, so a concurrent
    /// delete cannot move the table out from under the chosen offset.
    pub async fn get_random(&self) -> StoreResult<Cafe> {
        let mut tx = self.db.pool().begin().await?;
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cafe")
            .fetch_one(&mut *tx)
            .await?;
        if count == 0 {
            return Err(StoreError::EmptyCollection);
        }

        let offset = rand::thread_rng().gen_range(0..count);
        debug!("Picking cafe at offset {offset} of {count}");
        let cafe = sqlx::query_as::<_, Cafe>(&format!("{SELECT_CAFE} ORDER BY id LIMIT 1 OFFSET ?"))
            .bind(offset)
            .fetch_optional(&mut *tx)
            .await?;
        tx.commit().await?;
        cafe.ok_or(StoreError::EmptyCollection)
    }

    /// First cafe whose location matches exactly (case-sensitive).
    pub async fn find_by_location(&self, location: &str) -> StoreResult<Option<Cafe>> {
        Ok(
            sqlx::query_as(&format!("{SELECT_CAFE} WHERE location = ? ORDER BY id LIMIT 1"))
                .bind(location)
                .fetch_optional(self.db.pool())
                .await?,
        )
    }

    pub async fn get_by_id(&self, id: i64) -> StoreResult<Option<Cafe>> {
        Ok(sqlx::query_as(&format!("{SELECT_CAFE} WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?)
    }

    pub async fn create(&self, new: NewCafe) -> StoreResult<Cafe> {
        let result = sqlx::query_as::<_, Cafe>(
            "INSERT INTO cafe (name, map_url, img_url, location, seats, \
             has_toilet, has_wifi, has_sockets, can_take_calls, coffee_price) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING id, name, map_url, img_url, location, seats, \
             has_toilet, has_wifi, has_sockets, can_take_calls, coffee_price",
        )
        .bind(&new.name)
        .bind(&new.map_url)
        .bind(&new.img_url)
        .bind(&new.location)
        .bind(&new.seats)
        .bind(new.has_toilet)
        .bind(new.has_wifi)
        .bind(new.has_sockets)
        .bind(new.can_take_calls)
        .bind(&new.coffee_price)
        .fetch_one(self.db.pool())
        .await;

        match result {
            Ok(cafe) => {
                info!("Created cafe {} ({})", cafe.id, cafe.name);
                Ok(cafe)
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::DuplicateName(new.name))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Set `coffee_price` on one cafe; no other column is touched.
    pub async fn update_price(&self, id: i64, new_price: &str) -> StoreResult<Option<Cafe>> {
        let updated: Option<Cafe> = sqlx::query_as(
            "UPDATE cafe SET coffee_price = ? WHERE id = ? \
             RETURNING id, name, map_url, img_url, location, seats, \
             has_toilet, has_wifi, has_sockets, can_take_calls, coffee_price",
        )
        .bind(new_price)
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;
        if updated.is_some() {
            info!("Updated price of cafe {id} to {new_price}");
        }
        Ok(updated)
    }

    /// Remove one cafe; `false` when no row had that id.
    pub async fn delete(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM cafe WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        let removed = result.rows_affected() > 0;
        if removed {
            info!("Deleted cafe {id}");
        }
        Ok(removed)
    }
}
