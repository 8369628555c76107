use cafes::error::StoreError;
use cafes::orm::{Db, auto_migrate};
use cafes::{CafeStore, NewCafe};
use std::collections::HashSet;
use std::sync::Arc;

async fn empty_store() -> CafeStore {
    let db = Arc::new(Db::connect("sqlite::memory:").await.unwrap());
    auto_migrate(db.clone()).await.unwrap();
    CafeStore::new(db)
}

fn new_cafe(name: &str, location: &str) -> NewCafe {
    NewCafe {
        name: name.to_string(),
        map_url: format!("https://maps.example/{name}"),
        img_url: format!("https://img.example/{name}.jpg"),
        location: location.to_string(),
        seats: "20-30".to_string(),
        has_toilet: true,
        has_wifi: false,
        has_sockets: true,
        can_take_calls: false,
        coffee_price: Some("£2.50".to_string()),
    }
}

#[tokio::test]
async fn created_cafe_reads_back_field_for_field() {
    let store = empty_store().await;
    let submitted = new_cafe("Joe's", "Downtown");
    let created = store.create(submitted.clone()).await.unwrap();

    let fetched = store.get_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(fetched, created);
    assert_eq!(fetched.name, submitted.name);
    assert_eq!(fetched.map_url, submitted.map_url);
    assert_eq!(fetched.img_url, submitted.img_url);
    assert_eq!(fetched.location, submitted.location);
    assert_eq!(fetched.seats, submitted.seats);
    assert_eq!(fetched.has_toilet, submitted.has_toilet);
    assert_eq!(fetched.has_wifi, submitted.has_wifi);
    assert_eq!(fetched.has_sockets, submitted.has_sockets);
    assert_eq!(fetched.can_take_calls, submitted.can_take_calls);
    assert_eq!(fetched.coffee_price, submitted.coffee_price);
}

#[tokio::test]
async fn price_is_optional() {
    let store = empty_store().await;
    let mut cafe = new_cafe("No Price", "Soho");
    cafe.coffee_price = None;
    let created = store.create(cafe).await.unwrap();
    assert_eq!(created.coffee_price, None);
}

#[tokio::test]
async fn duplicate_names_are_rejected() {
    let store = empty_store().await;
    store.create(new_cafe("Joe's", "Downtown")).await.unwrap();
    let err = store
        .create(new_cafe("Joe's", "Uptown"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::DuplicateName(name) if name == "Joe's"));
    assert_eq!(store.list_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn list_all_returns_rows_in_storage_order() {
    let store = empty_store().await;
    assert!(store.list_all().await.unwrap().is_empty());
    for (name, loc) in [("A", "x"), ("B", "y"), ("C", "z")] {
        store.create(new_cafe(name, loc)).await.unwrap();
    }
    let names: Vec<String> = store
        .list_all()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["A", "B", "C"]);
}

#[tokio::test]
async fn find_by_location_is_exact_and_case_sensitive() {
    let store = empty_store().await;
    let first = store.create(new_cafe("One", "Peckham")).await.unwrap();
    store.create(new_cafe("Two", "Peckham")).await.unwrap();

    let found = store.find_by_location("Peckham").await.unwrap().unwrap();
    assert_eq!(found.id, first.id);
    assert!(store.find_by_location("peckham").await.unwrap().is_none());
    assert!(store.find_by_location("Peck").await.unwrap().is_none());
    assert!(store.find_by_location("").await.unwrap().is_none());
}

#[tokio::test]
async fn random_on_empty_table_is_an_error() {
    let store = empty_store().await;
    assert!(matches!(
        store.get_random().await,
        Err(StoreError::EmptyCollection)
    ));
}

#[tokio::test]
async fn random_eventually_visits_every_row() {
    let store = empty_store().await;
    for name in ["A", "B", "C"] {
        store.create(new_cafe(name, "here")).await.unwrap();
    }
    let mut seen = HashSet::new();
    for _ in 0..200 {
        seen.insert(store.get_random().await.unwrap().name);
        if seen.len() == 3 {
            break;
        }
    }
    assert_eq!(seen.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn random_keeps_answering_while_rows_are_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let uri = format!("sqlite://{}", dir.path().join("cafes.db").display());
    let db = Arc::new(Db::connect(&uri).await.unwrap());
    auto_migrate(db.clone()).await.unwrap();
    let store = CafeStore::new(db);

    store.create(new_cafe("Keeper", "here")).await.unwrap();
    let mut doomed = Vec::new();
    for i in 0..30 {
        doomed.push(store.create(new_cafe(&format!("Doomed {i}"), "here")).await.unwrap().id);
    }

    let deleter = {
        let store = store.clone();
        tokio::spawn(async move {
            for id in doomed {
                assert!(store.delete(id).await.unwrap());
            }
        })
    };
    for _ in 0..100 {
        store.get_random().await.unwrap();
    }
    deleter.await.unwrap();
    assert_eq!(store.get_random().await.unwrap().name, "Keeper");
}

#[tokio::test]
async fn update_price_changes_only_the_price() {
    let store = empty_store().await;
    let before = store.create(new_cafe("Joe's", "Downtown")).await.unwrap();

    let after = store
        .update_price(before.id, "£3.10")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.coffee_price.as_deref(), Some("£3.10"));
    assert_eq!(
        cafes::Cafe {
            coffee_price: before.coffee_price.clone(),
            ..after.clone()
        },
        before
    );
    assert_eq!(store.get_by_id(before.id).await.unwrap().unwrap(), after);
}

#[tokio::test]
async fn update_price_of_missing_cafe_is_none() {
    let store = empty_store().await;
    assert!(store.update_price(999, "£5").await.unwrap().is_none());
}

#[tokio::test]
async fn delete_removes_row_and_reports_absence() {
    let store = empty_store().await;
    let cafe = store.create(new_cafe("Joe's", "Downtown")).await.unwrap();

    assert!(store.delete(cafe.id).await.unwrap());
    assert!(store.get_by_id(cafe.id).await.unwrap().is_none());
    assert!(!store.delete(cafe.id).await.unwrap());
}

#[tokio::test]
async fn ids_are_not_reused_after_delete() {
    let store = empty_store().await;
    let first = store.create(new_cafe("A", "x")).await.unwrap();
    let second = store.create(new_cafe("B", "x")).await.unwrap();
    store.delete(second.id).await.unwrap();
    let third = store.create(new_cafe("C", "x")).await.unwrap();
    assert!(third.id > second.id);
    assert!(second.id > first.id);
}
