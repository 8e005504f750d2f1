//! Unique alternate-key indices driven through the command language

use keygraph::{DataStore, EdgeKey, GraphConfig, GraphDb, MemoryStore, NodeKey, StatusCode};
use std::sync::Arc;

async fn open_db() -> (Arc<dyn DataStore>, GraphDb) {
    let store: Arc<dyn DataStore> = Arc::new(MemoryStore::new());
    let (db, _) = GraphDb::open(store.clone(), GraphConfig::default()).await.unwrap();
    (store, db)
}

#[tokio::test]
async fn test_add_creates_index_node_and_edge() {
    let (_, db) = open_db().await;
    let result = db
        .execute("add node key=user1, uniqueIndex=email|username, email=Alice@Example.com, username=alice;")
        .await;
    assert!(result.is_ok());

    // owner plus one index node per declared tag
    assert_eq!(db.map().node_count().await, 3);
    assert_eq!(db.map().edge_count().await, 2);
    let edge = EdgeKey::new("unique:email:alice@example.com", "user1", "uniqueIndex");
    assert!(db.map().get_edge(&edge).await.is_some());

    let owner = db.map().lookup_unique("EMAIL", "  alice@example.COM ").await.unwrap();
    assert_eq!(owner.key, NodeKey::new("user1"));
    assert!(db.map().lookup_unique("username", "bob").await.is_none());
}

#[tokio::test]
async fn test_duplicate_alternate_key_conflicts() {
    let (_, db) = open_db().await;
    db.execute("add node key=user1, uniqueIndex=email, email=a@x.com;").await;

    let result = db
        .execute_batch("add node key=user2, uniqueIndex=email, email=A@X.COM; add node key=user3;")
        .await;
    let statuses: Vec<_> = result.items.iter().map(|i| i.status).collect();
    assert_eq!(statuses, vec![StatusCode::Conflict, StatusCode::Ok]);
    assert!(db.map().get_node(&NodeKey::new("user2")).await.is_none());

    let owner = db.map().lookup_unique("email", "a@x.com").await.unwrap();
    assert_eq!(owner.key, NodeKey::new("user1"));
}

#[tokio::test]
async fn test_set_retargets_index() {
    let (_, db) = open_db().await;
    db.execute("add node key=user1, uniqueIndex=email, email=old@x.com;").await;

    assert!(db.execute("set node key=user1, email=new@x.com;").await.is_ok());
    assert!(db.map().lookup_unique("email", "old@x.com").await.is_none());
    assert_eq!(
        db.map().lookup_unique("email", "new@x.com").await.map(|n| n.key),
        Some(NodeKey::new("user1"))
    );
    assert!(db.map().get_node(&NodeKey::new("unique:email:old@x.com")).await.is_none());

    // The released value can now be claimed by someone else.
    assert!(db.execute("add node key=user2, uniqueIndex=email, email=old@x.com;").await.is_ok());
}

#[tokio::test]
async fn test_delete_owner_removes_index() {
    let (store, db) = open_db().await;
    db.execute_batch(
        "add node key=user1, uniqueIndex=email, email=a@x.com; \
         add node key=org; add edge from=org, to=user1, type=member;",
    )
    .await;
    assert_eq!(db.map().node_count().await, 3);

    assert!(db.execute("delete node key=user1;").await.is_ok());
    assert_eq!(db.map().node_count().await, 1);
    assert_eq!(db.map().edge_count().await, 0);
    assert!(db.map().lookup_unique("email", "a@x.com").await.is_none());

    let rebuilt = keygraph::persistence::rebuild(store.as_ref(), db.config()).await.unwrap();
    assert_eq!(rebuilt.snapshot().await, db.map().snapshot().await);
}

#[tokio::test]
async fn test_unique_tag_on_edge_rejected() {
    let (_, db) = open_db().await;
    db.execute_batch("add node key=a; add node key=b;").await;

    let result = db.execute("add edge from=a, to=b, uniqueIndex=email;").await;
    assert_eq!(result.status, StatusCode::BadRequest);
    assert_eq!(db.map().edge_count().await, 0);
}

#[tokio::test]
async fn test_index_lookup_through_select() {
    let (_, db) = open_db().await;
    db.execute("add node key=user1, uniqueIndex=email, email=a@x.com;").await;

    let result = db.execute("select (key=unique:email:a@x.com) -> [type=uniqueIndex] -> (key=user1) u;").await;
    assert!(result.is_ok());
    assert_eq!(result.edges.len(), 1);
    assert_eq!(
        result.alias("u"),
        Some(&keygraph::AliasBinding::Nodes(vec![NodeKey::new("user1")]))
    );
}

#[tokio::test]
async fn test_index_key_space_is_reserved() {
    let (_, db) = open_db().await;

    let result = db.execute("add node key=unique:email:a@x.com, note=mine;").await;
    assert_eq!(result.status, StatusCode::BadRequest);
    assert!(db.execute("add node key=u1, uniqueIndex=email, email=a@x.com;").await.is_ok());

    let tampering = db
        .execute_batch(
            "set node key=unique:email:a@x.com, note=mine; \
             delete node key=UNIQUE:email:a@x.com; \
             delete edge from=unique:email:a@x.com, to=u1, type=uniqueIndex;",
        )
        .await;
    assert!(tampering.items.iter().all(|i| i.status == StatusCode::BadRequest));

    let index = db.map().get_node(&NodeKey::new("unique:email:a@x.com")).await.unwrap();
    assert!(!index.tags.has("note"));
    assert_eq!(
        db.map().lookup_unique("email", "a@x.com").await.map(|n| n.key),
        Some(NodeKey::new("u1"))
    );
}

#[tokio::test]
async fn test_value_outside_key_alphabet_is_addressable() {
    let (store, db) = open_db().await;
    let result = db.execute("add node key=u1, uniqueIndex=name, name=\"John Smith\";").await;
    assert!(result.is_ok());

    let owner = db.map().lookup_unique("name", " john smith").await.unwrap();
    assert_eq!(owner.key, NodeKey::new("u1"));

    let result = db.execute("select (key=unique:name:john$20smith) -> [type=uniqueIndex] -> (key=u1) u;").await;
    assert!(result.is_ok());
    assert_eq!(result.edges.len(), 1);

    let conflict = db.execute("add node key=u2, uniqueIndex=name, name='JOHN SMITH';").await;
    assert_eq!(conflict.status, StatusCode::Conflict);

    assert!(db.execute("delete node key=u1;").await.is_ok());
    assert_eq!(db.map().node_count().await, 0);
    let rebuilt = keygraph::persistence::rebuild(store.as_ref(), db.config()).await.unwrap();
    assert_eq!(rebuilt.snapshot().await, db.map().snapshot().await);
}
