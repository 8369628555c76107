use crate::orm::{BoxFuture, Db, Migration, Model};
use serde::Serialize;
use std::sync::Arc;

/// One row of the `cafe` table.
///
/// Serializes as the flat row shape returned by `/all` and `/search`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Cafe {
    pub id: i64,
    pub name: String,
    pub map_url: String,
    pub img_url: String,
    pub location: String,
    pub seats: String,
    pub has_toilet: bool,
    pub has_wifi: bool,
    pub has_sockets: bool,
    pub can_take_calls: bool,
    pub coffee_price: Option<String>,
}

impl Model for Cafe {
    fn table_name() -> &'static str {
        "cafe"
    }

    fn create_table_sql() -> String {
        let columns = Self::columns()
            .into_iter()
            .map(|(name, sqltype)| format!("    {name} {sqltype}"))
            .collect::<Vec<_>>()
            .join(",\n");
        format!("CREATE TABLE IF NOT EXISTS cafe (\n{columns}\n)")
    }

    fn columns() -> Vec<(String, String)> {
        [
            ("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
            ("name", "VARCHAR(250) NOT NULL UNIQUE"),
            ("map_url", "VARCHAR(500) NOT NULL"),
            ("img_url", "VARCHAR(500) NOT NULL"),
            ("location", "VARCHAR(250) NOT NULL"),
            ("seats", "VARCHAR(250) NOT NULL"),
            ("has_toilet", "BOOLEAN NOT NULL"),
            ("has_wifi", "BOOLEAN NOT NULL"),
            ("has_sockets", "BOOLEAN NOT NULL"),
            ("can_take_calls", "BOOLEAN NOT NULL"),
            ("coffee_price", "VARCHAR(250)"),
        ]
        .into_iter()
        .map(|(name, sqltype)| (name.to_string(), sqltype.to_string()))
        .collect()
    }
}

fn migrate_cafe(db: Arc<Db>) -> BoxFuture<'static, Result<(), sqlx::Error>> {
    Cafe::migrate(db)
}

inventory::submit! {
    Migration(migrate_cafe)
}

/// Fields of a cafe that does not exist yet; the store assigns `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCafe {
    pub name: String,
    pub map_url: String,
    pub img_url: String,
    pub location: String,
    pub seats: String,
    pub has_toilet: bool,
    pub has_wifi: bool,
    pub has_sockets: bool,
    pub can_take_calls: bool,
    pub coffee_price: Option<String>,
}

/// The `/random` shape: no `id`, amenities grouped under one key.
#[derive(Debug, Serialize)]
pub struct RandomCafe<'a> {
    pub name: &'a str,
    pub map_url: &'a str,
    pub img_url: &'a str,
    pub location: &'a str,
    pub amenities: Amenities<'a>,
}

#[derive(Debug, Serialize)]
pub struct Amenities<'a> {
    pub seats: &'a str,
    pub has_toilet: bool,
    pub has_wifi: bool,
    pub has_sockets: bool,
    pub can_take_calls: bool,
    pub coffee_price: Option<&'a str>,
}

impl<'a> From<&'a Cafe> for RandomCafe<'a> {
    fn from(cafe: &'a Cafe) -> Self {
        RandomCafe {
            name: &cafe.name,
            map_url: &cafe.map_url,
            img_url: &cafe.img_url,
            location: &cafe.location,
            amenities: Amenities {
                seats: &cafe.seats,
                has_toilet: cafe.has_toilet,
                has_wifi: cafe.has_wifi,
                has_sockets: cafe.has_sockets,
                can_take_calls: cafe.can_take_calls,
                coffee_price: cafe.coffee_price.as_deref(),
            },
        }
    }
}
