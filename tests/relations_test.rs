//! 关系、预取与多外键测试（内存 SQLite）

use rat_quickorm::fields::{char_field, foreign_key, many_to_many, text_field};
use rat_quickorm::{kwargs, ModelBuilder, ModelClass, Prefetch, Registry, SqliteDatabase};
use std::sync::Arc;

struct Blog {
    registry: Arc<Registry>,
    author: Arc<ModelClass>,
    post: Arc<ModelClass>,
    tag: Arc<ModelClass>,
}

async fn blog() -> Blog {
    let registry = Registry::new(Arc::new(SqliteDatabase::memory()));
    registry.connect().await.unwrap();
    let author = ModelBuilder::new("Author")
        .registry(&registry)
        .field("name", char_field(50))
        .build()
        .unwrap();
    let tag = ModelBuilder::new("Tag")
        .registry(&registry)
        .field("name", char_field(20).unique())
        .build()
        .unwrap();
    let post = ModelBuilder::new("Post")
        .registry(&registry)
        .field("title", char_field(100))
        .field("author", foreign_key(&author).related_name("posts"))
        .field("tags", many_to_many(&tag).related_name("posts"))
        .build()
        .unwrap();
    registry.create_all(None).await.unwrap();
    Blog {
        registry,
        author,
        post,
        tag,
    }
}

#[tokio::test]
async fn test_relationship_round_trip() {
    let blog = blog().await;
    let adam = blog.author.query().create(kwargs!(name = "Adam")).await.unwrap();
    let created = blog
        .post
        .query()
        .create(kwargs!(title = "hello", author = &adam))
        .await
        .unwrap();

    let children = adam.related_set("posts").unwrap().all().await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].pk(), created.pk());

    let mut child = blog.post.query().get(kwargs!(title = "hello")).await.unwrap();
    assert!(child.related_cached("author").is_none());
    let parent = child.related("author").await.unwrap().unwrap();
    assert_eq!(parent.pk(), adam.pk());
    assert!(child.related_cached("author").is_some());

    let joined = blog
        .post
        .query()
        .select_related(["author"])
        .get(kwargs!(author__name = "Adam"))
        .await
        .unwrap();
    assert_eq!(joined.related_cached("author").unwrap().get_str("name"), Some("Adam"));
}

#[tokio::test]
async fn test_many_to_many_accessors() {
    let blog = blog().await;
    let adam = blog.author.query().create(kwargs!(name = "Adam")).await.unwrap();
    let post = blog
        .post
        .query()
        .create(kwargs!(title = "rust", author = &adam))
        .await
        .unwrap();
    let rust = blog.tag.query().create(kwargs!(name = "rust")).await.unwrap();
    let orm = blog.tag.query().create(kwargs!(name = "orm")).await.unwrap();

    let tags = post.many_to_many("tags").unwrap();
    tags.add(&rust).await.unwrap();
    tags.add(&orm).await.unwrap();
    tags.add(&rust).await.unwrap();
    assert_eq!(tags.count().await.unwrap(), 2);
    assert_eq!(rust.many_to_many("posts").unwrap().count().await.unwrap(), 1);

    let tagged = blog.post.query().filter(kwargs!(tags__name = "rust")).count().await.unwrap();
    assert_eq!(tagged, 1);

    assert_eq!(tags.remove(&orm).await.unwrap(), 1);
    assert_eq!(tags.clear().await.unwrap(), 1);
    assert_eq!(tags.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_prefetch_attaches_results() {
    let blog = blog().await;
    let adam = blog.author.query().create(kwargs!(name = "Adam")).await.unwrap();
    let eve = blog.author.query().create(kwargs!(name = "Eve")).await.unwrap();
    for title in ["a1", "a2", "a3"] {
        blog.post.query().create(kwargs!(title = title, author = &adam)).await.unwrap();
    }
    blog.post.query().create(kwargs!(title = "e1", author = &eve)).await.unwrap();

    let authors = blog
        .author
        .query()
        .order_by(["name"])
        .prefetch_related([
            Prefetch::new("posts"),
            Prefetch::new("posts")
                .to_attr("latest_post")
                .queryset(blog.post.query().order_by(["-id"]).limit(1)),
        ])
        .all()
        .await
        .unwrap();
    assert_eq!(authors.len(), 2);
    assert_eq!(authors[0].prefetched("posts").unwrap().len(), 3);
    assert_eq!(authors[1].prefetched("posts").unwrap().len(), 1);
    let latest = authors[0].prefetched("latest_post").unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].get_str("title"), Some("a3"));

    let posts = blog
        .post
        .query()
        .prefetch_related(["author"])
        .all()
        .await
        .unwrap();
    assert!(posts.iter().all(|p| p.related_cached("author").is_some()));
}

#[tokio::test]
async fn test_prefetch_collision_fails_before_query() {
    let blog = blog().await;
    assert!(blog.author.last_raw_query().is_none());
    let err = blog
        .author
        .query()
        .prefetch_related([Prefetch::new("posts").to_attr("name")])
        .all()
        .await
        .unwrap_err();
    assert!(matches!(err, rat_quickorm::OrmError::RelationshipError { .. }));
    assert!(blog.author.last_raw_query().is_none());
    assert!(blog.registry.get_model("Author").is_ok());
}

#[tokio::test]
async fn test_reverse_path_uses_its_own_foreign_key() {
    let registry = Registry::new(Arc::new(SqliteDatabase::memory()));
    registry.connect().await.unwrap();
    let user = ModelBuilder::new("User")
        .registry(&registry)
        .field("name", char_field(50))
        .build()
        .unwrap();
    let message = ModelBuilder::new("Message")
        .registry(&registry)
        .field("sender", foreign_key(&user).related_name("sent"))
        .field("receiver", foreign_key(&user).related_name("received"))
        .field("body", text_field())
        .build()
        .unwrap();
    registry.create_all(None).await.unwrap();

    let alice = user.query().create(kwargs!(name = "alice")).await.unwrap();
    let bob = user.query().create(kwargs!(name = "bob")).await.unwrap();
    message
        .query()
        .create(kwargs!(sender = &alice, receiver = &bob, body = "hi"))
        .await
        .unwrap();

    let senders = user.query().filter(kwargs!(sent__body = "hi")).all().await.unwrap();
    assert_eq!(senders.len(), 1);
    assert_eq!(senders[0].get_str("name"), Some("alice"));

    let receivers = user
        .query()
        .filter(kwargs!(received__body = "hi"))
        .values_list(["name"], true)
        .await
        .unwrap();
    assert_eq!(receivers, vec![rat_quickorm::DataValue::from("bob")]);
}
