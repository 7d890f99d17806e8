//! Integration tests for the engine against the in-memory blog provider.

use entisync_core::{
    Container, CoreError, DeferredEntityPolicy, EntityType, FilterArg, FilterPolicy,
    HydrationFlags, Method, MethodTable, Provider, ProviderError, Record, Related, Relation,
    SyncOperation, Target, Value,
};
use entisync_engine::{EngineConfig, EngineError, SyncEngine};
use entisync_testkit::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn engine(config: EngineConfig) -> (Arc<BlogProvider>, SyncEngine) {
    init_tracing();
    let (blog, container) = seeded_blog();
    (blog, SyncEngine::with_config(container, config))
}

fn filter(key: &str, value: impl Into<Value>) -> Vec<FilterArg> {
    vec![FilterArg::from(Record::new().with(key, value))]
}

fn name_of(run: &entisync_engine::Run, handle: entisync_core::EntityHandle) -> Value {
    run.entity(handle)
        .unwrap()
        .field("name")
        .cloned()
        .unwrap_or_default()
}

#[test]
fn test_read_resolves_relationships_late() {
    let (blog, engine) = engine(EngineConfig::default());
    let run = engine.run();

    let ada = run.get("User", 1).unwrap().unwrap();
    assert_eq!(name_of(&run, ada), Value::from("ada"));
    assert_eq!(run.pending(), 0);

    let manager = run.related(ada, "manager").unwrap();
    assert_eq!(manager.len(), 1);
    assert_eq!(name_of(&run, manager[0]), Value::from("grace"));

    let posts = run.related(ada, "posts").unwrap();
    assert_eq!(posts.len(), 2);
    for post in posts {
        assert_eq!(run.related(post, "author").unwrap(), vec![ada]);
    }

    assert_eq!(blog.call_count("get_user"), 1);
    assert_eq!(run.stats().provider_calls, blog.total_calls() as u64);
}

#[test]
fn test_deferred_ids_resolve_in_batches() {
    let (blog, engine) =
        engine(EngineConfig::default().with_deferred_policy(DeferredEntityPolicy::DoNotResolve));
    let run = engine.run();
    let ctx = run.context("User").unwrap();

    let handles = run
        .defer(&ctx, "User", vec![1.into(), 2.into(), 3.into()])
        .unwrap();
    assert_eq!(handles.len(), 3);
    assert_eq!(blog.total_calls(), 0);
    assert!(matches!(
        run.entity(handles[0]),
        Err(EngineError::Core(CoreError::Unresolved { .. }))
    ));

    let again = run.defer(&ctx, "User", vec![2.into()]).unwrap();
    assert_eq!(again, vec![handles[1]]);

    let report = run.resolve().unwrap();
    assert_eq!(report.resolved, 3);
    assert_eq!(report.missing, 1);
    assert_eq!(report.relationships, 3);
    assert_eq!(report.passes, 2);
    assert_eq!(run.pending(), 0);

    for (handle, id) in handles.iter().zip([1i64, 2, 3]) {
        let entity = run.entity(*handle).unwrap();
        assert_eq!(entity.id(), Some(&Value::Integer(id)));
    }
    assert_eq!(blog.call_count("get_users"), 2);
    assert_eq!(blog.call_count("get_user"), 0);
}

#[test]
fn test_do_not_resolve_leaves_placeholders() {
    let (_, engine) =
        engine(EngineConfig::default().with_deferred_policy(DeferredEntityPolicy::DoNotResolve));
    let run = engine.run();

    let ada = run.get("User", 1).unwrap().unwrap();
    assert!(run.pending() > 0);

    let manager = run.related(ada, "manager").unwrap()[0];
    assert!(!run.graph().is_resolved(manager));
    assert!(run.load_relation(ada, "posts").is_err());

    run.resolve().unwrap();
    assert_eq!(name_of(&run, manager), Value::from("grace"));
    assert_eq!(run.related(ada, "posts").unwrap().len(), 2);
}

#[test]
fn test_resolve_early_fills_placeholders_immediately() {
    let (blog, engine) =
        engine(EngineConfig::default().with_deferred_policy(DeferredEntityPolicy::ResolveEarly));
    let run = engine.run();
    let ctx = run.context("User").unwrap();

    let handles = run.defer(&ctx, "User", vec![2.into()]).unwrap();
    assert!(run.graph().is_resolved(handles[0]));
    assert_eq!(run.pending(), 0);
    assert!(blog.call_count("get_users") >= 1);
}

#[test]
fn test_missing_placeholder_is_not_found() {
    let (_, engine) = engine(EngineConfig::default());
    let run = engine.run();

    let linus = run.get("User", 3).unwrap().unwrap();
    let manager = run.related(linus, "manager").unwrap()[0];

    let err = run.entity(manager).unwrap_err();
    assert!(err.is_not_found());
    assert!(matches!(
        err,
        EngineError::EntityNotFound { ref id, .. } if *id == Value::Integer(9)
    ));
    assert_eq!(run.stats().placeholders_missing, 1);
}

#[test]
fn test_read_of_absent_entity() {
    let (_, engine) = engine(EngineConfig::default());
    let run = engine.run();

    let err = run.get("User", 42).unwrap_err();
    assert!(matches!(
        err,
        EngineError::EntityNotFound { ref entity_type, .. } if entity_type == "User"
    ));
}

#[test]
fn test_eager_hydration_terminates_on_cycles() {
    let (blog, engine) = engine(EngineConfig::default());
    let run = engine.run();
    let ctx = run
        .context("User")
        .unwrap()
        .with_hydration_flags(None, "posts", HydrationFlags::EAGER)
        .with_hydration_flags(Some("Post"), "author", HydrationFlags::EAGER);

    let ada = run.read(&ctx, 1, &[]).unwrap().unwrap();
    let entity = run.entity(ada).unwrap();
    assert!(matches!(entity.relation("posts"), Some(Relation::Loaded(_))));

    let posts = run.related(ada, "posts").unwrap();
    assert_eq!(posts.len(), 2);
    for post in posts {
        assert_eq!(run.related(post, "author").unwrap(), vec![ada]);
    }
    assert_eq!(blog.call_count("get_user"), 1);
}

#[test]
fn test_lazy_relationship_loads_once() {
    let (blog, engine) = engine(EngineConfig::default());
    let run = engine.run();

    let post = run.get("Post", 10).unwrap().unwrap();
    assert!(matches!(
        run.entity(post).unwrap().relation("comments"),
        Some(Relation::Lazy(_))
    ));
    assert_eq!(blog.call_count("get_comments"), 0);

    let comments = run.related(post, "comments").unwrap();
    assert_eq!(comments.len(), 2);
    assert_eq!(run.related(post, "comments").unwrap(), comments);
    assert_eq!(blog.call_count("get_comments"), 1);

    // Comment authors were deferred by the load and resolved after it.
    assert_eq!(run.pending(), 0);
    let author = run.related(comments[0], "author").unwrap()[0];
    assert_eq!(name_of(&run, author), Value::from("grace"));
}

#[test]
fn test_suppressed_relationship_is_unset() {
    let (_, engine) = engine(EngineConfig::default());
    let run = engine.run();

    let comment = run.get("Comment", 100).unwrap().unwrap();
    assert!(run.entity(comment).unwrap().relation("post").is_none());
    assert!(run.load_relation(comment, "post").unwrap().is_none());
    assert!(run.related(comment, "post").unwrap().is_empty());
    assert!(run.load_relation(comment, "nonsense").is_err());
}

#[test]
fn test_no_filter_reads_every_child() {
    let (_, engine) = engine(EngineConfig::default());
    let run = engine.run();
    let ctx = run.context("User").unwrap().with_hydration_flags(
        Some("User"),
        "posts",
        HydrationFlags::DEFER | HydrationFlags::NO_FILTER,
    );

    let ada = run.read(&ctx, 1, &[]).unwrap().unwrap();
    assert_eq!(run.related(ada, "posts").unwrap().len(), 3);
}

#[test]
fn test_filter_policy_ignore() {
    let (_, engine) = engine(EngineConfig::default().with_filter_policy(FilterPolicy::Ignore));
    let run = engine.run();

    let users = run.get_list("User", &filter("nickname", "x")).unwrap();
    assert_eq!(users.len(), 3);
}

#[test]
fn test_filter_policy_throw() {
    let (blog, engine) = engine(EngineConfig::default());
    let run = engine.run();

    let err = run.get_list("User", &filter("nickname", "x")).unwrap_err();
    match err {
        EngineError::FilterPolicyViolation {
            provider,
            entity_type,
            keys,
        } => {
            assert_eq!(provider, BLOG_PROVIDER);
            assert_eq!(entity_type, "User");
            assert_eq!(keys, vec!["nickname".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(blog.call_count("get_users"), 1);

    let posts = run.get_list("Post", &filter("user_id", 1)).unwrap();
    assert_eq!(posts.len(), 2);
}

#[test]
fn test_static_claims_reject_before_calling() {
    let (blog, engine) = engine(EngineConfig::default());
    let run = engine.run();

    let err = run.get_list("Tag", &filter("color", "red")).unwrap_err();
    assert!(matches!(err, EngineError::FilterPolicyViolation { .. }));
    assert_eq!(blog.call_count("get_tags"), 0);

    let tags = run.get_list("Tag", &filter("label", "rust")).unwrap();
    assert_eq!(tags.len(), 1);
}

#[test]
fn test_filter_policy_return_empty() {
    let (_, engine) = engine(EngineConfig::default().with_filter_policy(FilterPolicy::ReturnEmpty));
    let run = engine.run();

    assert!(run.get_list("User", &filter("nickname", "x")).unwrap().is_empty());

    let ctx = run.context("User").unwrap();
    assert_eq!(run.read(&ctx, 1, &filter("nickname", "x")).unwrap(), None);
    assert!(run.graph().is_empty());
}

#[test]
fn test_filter_policy_filter_locally() {
    let (_, engine) = engine(EngineConfig::default().with_filter_policy(FilterPolicy::FilterLocally));
    let run = engine.run();

    let posts = run.get_list("Post", &filter("title", "Compilers")).unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(run.entity(posts[0]).unwrap().id(), Some(&Value::Integer(12)));

    let ctx = run.context("User").unwrap();
    assert_eq!(run.read(&ctx, 1, &filter("name", "grace")).unwrap(), None);
}

#[test]
fn test_read_synthesized_from_list() {
    let (blog, engine) = engine(EngineConfig::default());
    assert!(engine.has_operation("Comment", SyncOperation::Read).unwrap());
    assert!(!engine.has_operation("Comment", SyncOperation::Create).unwrap());

    let run = engine.run();
    let op = run
        .operation(&run.context("Comment").unwrap(), SyncOperation::Read)
        .unwrap();
    assert!(op.is_synthesized());

    let comment = run.get("Comment", 101).unwrap().unwrap();
    assert_eq!(
        run.entity(comment).unwrap().field("body"),
        Some(&Value::from("Ship it"))
    );
    assert_eq!(blog.call_count("get_comments"), 1);

    assert!(run.get("Comment", 999).unwrap_err().is_not_found());
    assert!(matches!(
        run.create(&run.context("Comment").unwrap(), Record::new(), &[]),
        Err(EngineError::OperationNotImplemented { .. })
    ));
}

#[test]
fn test_read_synthesis_can_be_disabled() {
    let (_, engine) = engine(EngineConfig::default().with_synthesize_read(false));
    assert!(!engine.has_operation("Comment", SyncOperation::Read).unwrap());

    let run = engine.run();
    assert!(matches!(
        run.get("Comment", 100),
        Err(EngineError::OperationNotImplemented { operation: SyncOperation::Read, .. })
    ));
}

#[test]
fn test_backend_errors_pass_through() {
    let (blog, engine) = engine(EngineConfig::default());
    blog.set_offline(true);
    let run = engine.run();

    let err = run.get("User", 1).unwrap_err();
    assert!(err.is_backend());
    assert!(matches!(
        err,
        EngineError::Provider(ProviderError::BackendUnreachable { .. })
    ));
}

#[test]
fn test_failed_resolution_is_retried() {
    let (blog, engine) =
        engine(EngineConfig::default().with_deferred_policy(DeferredEntityPolicy::DoNotResolve));
    let run = engine.run();
    let ctx = run.context("User").unwrap();
    let handles = run.defer(&ctx, "User", vec![1.into(), 2.into()]).unwrap();

    blog.set_offline(true);
    assert!(run.resolve().unwrap_err().is_backend());
    assert_eq!(run.pending(), 2);
    assert!(matches!(
        run.entity(handles[0]),
        Err(EngineError::Core(CoreError::Unresolved { .. }))
    ));

    blog.set_offline(false);
    let report = run.resolve().unwrap();
    assert_eq!(report.resolved, 2);
    assert_eq!(report.missing, 0);
    assert_eq!(run.pending(), 0);
    assert_eq!(name_of(&run, handles[0]), Value::from("ada"));
    assert_eq!(name_of(&run, handles[1]), Value::from("grace"));
    assert_eq!(blog.call_count("get_users"), 2);
}

#[test]
fn test_failed_relationship_resolution_is_retried() {
    let (blog, engine) =
        engine(EngineConfig::default().with_deferred_policy(DeferredEntityPolicy::DoNotResolve));
    let run = engine.run();
    let ctx = run.context("User").unwrap();
    let ada = run.defer(&ctx, "User", vec![1.into()]).unwrap()[0];

    blog.fail_next("get_posts");
    assert!(run.resolve().unwrap_err().is_backend());
    assert!(run.graph().is_resolved(ada));
    // ada's and grace's posts are both still outstanding.
    assert_eq!(run.pending(), 2);

    let report = run.resolve().unwrap();
    assert_eq!(report.relationships, 2);
    assert_eq!(run.pending(), 0);
    assert_eq!(run.related(ada, "posts").unwrap().len(), 2);
}

#[test]
fn test_failed_eager_load_rolls_back() {
    let (blog, engine) = engine(EngineConfig::default());
    let run = engine.run();
    let ctx = run
        .context("User")
        .unwrap()
        .with_hydration_flags(Some("User"), "posts", HydrationFlags::EAGER);

    blog.fail_next("get_posts");
    assert!(run.read(&ctx, 1, &[]).unwrap_err().is_backend());
    let ada = run
        .graph()
        .lookup(BLOG_PROVIDER, "User", &Value::Integer(1))
        .unwrap();
    assert!(matches!(
        run.entity(ada),
        Err(EngineError::Core(CoreError::Unresolved { .. }))
    ));
    assert_eq!(run.pending(), 1);

    assert_eq!(run.read(&ctx, 1, &[]).unwrap(), Some(ada));
    assert!(matches!(
        run.load_relation(ada, "posts").unwrap(),
        Some(Related::Many(ref posts)) if posts.len() == 2
    ));
    let manager = run.related(ada, "manager").unwrap();
    assert_eq!(name_of(&run, manager[0]), Value::from("grace"));
    assert_eq!(run.pending(), 0);
    assert_eq!(blog.call_count("get_user"), 2);
}

#[test]
fn test_filter_policy_applies_to_absent_reads() {
    let (_, engine) = engine(EngineConfig::default());
    let run = engine.run();
    let ctx = run.context("User").unwrap();

    match run.read(&ctx, 42, &filter("nickname", "x")).unwrap_err() {
        EngineError::FilterPolicyViolation { keys, .. } => {
            assert_eq!(keys, vec!["nickname".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(run.read(&ctx, 42, &[]).unwrap_err().is_not_found());

    let ctx = ctx.with_filter_policy(FilterPolicy::ReturnEmpty);
    assert_eq!(run.read(&ctx, 42, &filter("nickname", "x")).unwrap(), None);
    assert!(run.read(&ctx, 42, &[]).unwrap_err().is_not_found());
}

/// Serves single reads only, so deferred widgets resolve one id at a time.
#[derive(Default)]
struct Widgets {
    reads: AtomicUsize,
}

impl Provider for Widgets {
    fn name(&self) -> &str {
        "widgets"
    }

    fn declare_methods(self: Arc<Self>, methods: &mut MethodTable) {
        let this = Arc::clone(&self);
        methods.declare(
            "get_widget",
            Method::single(move |_, target| {
                this.reads.fetch_add(1, Ordering::SeqCst);
                Ok(target
                    .id("id")
                    .filter(|id| **id == Value::Integer(1))
                    .map(|id| Record::new().with("id", id.clone())))
            }),
        );
    }
}

#[test]
fn test_deferred_ids_resolve_through_single_reads() {
    init_tracing();
    let widgets = Arc::new(Widgets::default());
    let mut container = Container::new();
    container
        .register_entity(EntityType::new("Widget"))
        .register_provider(Arc::clone(&widgets) as Arc<dyn Provider>)
        .bind("Widget", "widgets");
    let engine = SyncEngine::with_config(
        container,
        EngineConfig::default().with_deferred_policy(DeferredEntityPolicy::DoNotResolve),
    );
    let run = engine.run();
    let ctx = run.context("Widget").unwrap();

    let handles = run.defer(&ctx, "Widget", vec![1.into(), 7.into()]).unwrap();
    let report = run.resolve().unwrap();
    assert_eq!(report.resolved, 1);
    assert_eq!(report.missing, 1);
    assert!(run.graph().is_resolved(handles[0]));
    assert!(run.entity(handles[1]).unwrap_err().is_not_found());
    assert_eq!(widgets.reads.load(Ordering::SeqCst), 2);
    assert_eq!(run.pending(), 0);
}

#[test]
fn test_parallel_resolution() {
    let (_, engine) = engine(
        EngineConfig::default()
            .with_deferred_policy(DeferredEntityPolicy::DoNotResolve)
            .with_parallel_resolution(true),
    );
    let run = engine.run();
    let ctx = run.context("User").unwrap();

    let users = run.defer(&ctx, "User", vec![1.into(), 2.into()]).unwrap();
    let posts = run.defer(&ctx, "Post", vec![10.into(), 12.into()]).unwrap();
    let comments = run.defer(&ctx, "Comment", vec![100.into(), 101.into()]).unwrap();
    let tags = run.defer(&ctx, "Tag", vec!["sync".into()]).unwrap();

    let report = run.resolve().unwrap();
    assert_eq!(run.pending(), 0);
    assert!(report.resolved >= 7);

    for handle in users.iter().chain(&posts).chain(&comments).chain(&tags) {
        assert!(run.graph().is_resolved(*handle));
    }
    assert_eq!(
        run.related(posts[1], "author").unwrap(),
        vec![users[1]]
    );
}

#[test]
fn test_pass_limit_leaves_work_pending() {
    let (_, engine) = engine(
        EngineConfig::default()
            .with_deferred_policy(DeferredEntityPolicy::DoNotResolve)
            .with_max_resolution_passes(1),
    );
    let run = engine.run();
    let ctx = run.context("User").unwrap();

    run.defer(&ctx, "User", vec![1.into()]).unwrap();
    let report = run.resolve().unwrap();
    assert_eq!(report.passes, 1);
    assert!(run.pending() > 0);

    run.resolve().unwrap();
    run.resolve().unwrap();
    assert_eq!(run.pending(), 0);
}

#[test]
fn test_writes_update_the_graph() {
    let (blog, engine) = engine(EngineConfig::default());
    let run = engine.run();
    let ctx = run.context("User").unwrap();

    let ada = run.get("User", 1).unwrap().unwrap();
    let updated = run
        .update(&ctx, Record::new().with("id", 1).with("name", "ada l."), &[])
        .unwrap()
        .unwrap();
    assert_eq!(updated, ada);
    assert_eq!(name_of(&run, ada), Value::from("ada l."));
    assert_eq!(
        blog.stored_user(1).unwrap().get("name"),
        Some(&Value::from("ada l."))
    );

    let created = run
        .create(&ctx, Record::new().with("name", "barbara"), &[])
        .unwrap()
        .unwrap();
    assert_eq!(run.entity(created).unwrap().id(), Some(&Value::Integer(1000)));

    let deleted = run.delete(&ctx, Target::Id(Value::Integer(3)), &[]).unwrap();
    assert_eq!(deleted.unwrap().get("name"), Some(&Value::from("linus")));
    assert!(blog.stored_user(3).is_none());
}

#[test]
fn test_list_writes() {
    let (blog, engine) = engine(EngineConfig::default());
    let run = engine.run();
    let ctx = run.context("User").unwrap();

    let created = run
        .create_list(
            &ctx,
            vec![
                Record::new().with("name", "barbara"),
                Record::new().with("name", "edsger"),
            ],
            &[],
        )
        .unwrap();
    assert_eq!(created.len(), 2);
    assert_eq!(blog.call_count("create_users"), 1);

    let renamed = run
        .update_list(&ctx, vec![Record::new().with("id", 1000).with("name", "b.")], &[])
        .unwrap();
    assert_eq!(renamed, vec![created[0]]);
    assert_eq!(name_of(&run, created[0]), Value::from("b."));

    let deleted = run
        .delete_list(
            &ctx,
            vec![Record::new().with("id", 1000), Record::new().with("id", 1001)],
            &[],
        )
        .unwrap();
    assert_eq!(deleted.len(), 2);
    assert!(blog.stored_user(1001).is_none());
}

#[test]
fn test_dispatch_cache_is_shared_across_runs() {
    let (_, engine) = engine(EngineConfig::default());

    let first = engine.run();
    first.get("User", 2).unwrap();
    let cached = engine.dispatcher().cached();
    assert!(cached > 0);

    let second = engine.run();
    second.get("User", 2).unwrap();
    assert_eq!(engine.dispatcher().cached(), cached);
    assert!(engine.dispatcher().stats().hits > 0);

    let ctx = second.context("User").unwrap();
    let a = second.operation(&ctx, SyncOperation::Read).unwrap();
    let b = first.operation(&ctx, SyncOperation::Read).unwrap();
    assert!(a.same_method(&b));
    assert_ne!(first.id(), second.id());
}

#[test]
fn test_runs_do_not_share_entities() {
    let (blog, engine) = engine(EngineConfig::default());

    let first = engine.run();
    first.get("User", 2).unwrap();
    let calls = blog.call_count("get_user");

    let second = engine.run();
    second.get("User", 2).unwrap();
    assert_eq!(blog.call_count("get_user"), calls + 1);
    assert_eq!(first.graph().len(), second.graph().len());
}
