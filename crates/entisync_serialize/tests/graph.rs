//! Serializing graphs built by engine runs.

use entisync_core::Value;
use entisync_engine::SyncEngine;
use entisync_serialize::{to_json, SerializeRules, Serializer, CIRCULAR_REFERENCE};
use entisync_testkit::prelude::*;

#[test]
fn test_run_graph_serializes_with_cycle_tokens() {
    init_tracing();
    let (_, container) = seeded_blog();
    let engine = SyncEngine::new(container);
    let run = engine.run();
    let ada = run.get("User", 1).unwrap().unwrap();

    let plain = Serializer::new(run.graph())
        .with_container(engine.container())
        .to_plain(ada, &SerializeRules::new().remove("posts.user_id"))
        .unwrap();
    let root = plain.as_map().unwrap();
    assert_eq!(root.get("name"), Some(&Value::from("ada")));

    let posts = root.get("posts").unwrap().as_array().unwrap();
    assert_eq!(posts.len(), 2);
    for post in posts {
        let post = post.as_map().unwrap();
        assert!(post.get("user_id").is_none());
        // Lazy comments were never loaded.
        assert!(post.get("comments").is_none());
        let author = post.get("author").unwrap().as_map().unwrap();
        assert_eq!(author.get("@why"), Some(&Value::from(CIRCULAR_REFERENCE)));
        assert_eq!(author.get("@id"), Some(&Value::Integer(1)));
    }

    let manager = root.get("manager").unwrap().as_map().unwrap();
    assert_eq!(manager.get("name"), Some(&Value::from("grace")));
    assert_eq!(manager.get("manager"), Some(&Value::Null));

    let json = to_json(&plain).unwrap();
    assert!(json.contains(CIRCULAR_REFERENCE));
}

#[test]
fn test_loaded_lazy_relationships_are_serialized() {
    init_tracing();
    let (_, container) = seeded_blog();
    let engine = SyncEngine::new(container);
    let run = engine.run();
    let post = run.get("Post", 10).unwrap().unwrap();
    run.related(post, "comments").unwrap();

    let rules = SerializeRules::new()
        .remove("author")
        .remove_in("Comment", "author.posts")
        .sort_by_key(true);
    let plain = Serializer::new(run.graph())
        .to_plain(post, &rules)
        .unwrap();
    let root = plain.as_map().unwrap();
    assert!(root.get("author").is_none());

    let comments = root.get("comments").unwrap().as_array().unwrap();
    assert_eq!(comments.len(), 2);
    let first = comments[0].as_map().unwrap();
    assert_eq!(first.get("body"), Some(&Value::from("Nice")));
    let author = first.get("author").unwrap().as_map().unwrap();
    assert_eq!(author.get("name"), Some(&Value::from("grace")));
    assert!(author.get("posts").is_none());
}
