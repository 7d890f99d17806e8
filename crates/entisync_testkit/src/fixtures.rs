//! Test fixtures: an in-memory blog backend.
//!
//! The blog has users, posts, comments and tags. Every provider call is
//! logged by method name so tests can assert how many backend round trips
//! an operation took.

use entisync_core::{
    Container, EntityType, HydrationFlags, Method, MethodTable, Provider, ProviderContext,
    ProviderError, ProviderResult, Record, Relationship, Target, Value,
};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

/// Name the blog provider registers under.
pub const BLOG_PROVIDER: &str = "blog";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Table {
    Users,
    Posts,
    Comments,
    Tags,
}

/// In-memory provider for `User`, `Post`, `Comment` and `Tag`.
///
/// Filter keys it claims:
/// - users: `id`, `name`, `manager_id`
/// - posts: `id`, `user_id`, `status`
/// - comments: `id`, `post_id`, `user_id`
/// - tags: `label`, declared statically
pub struct BlogProvider {
    users: RwLock<Vec<Record>>,
    posts: RwLock<Vec<Record>>,
    comments: RwLock<Vec<Record>>,
    tags: RwLock<Vec<Record>>,
    calls: Mutex<Vec<String>>,
    failures: Mutex<Vec<String>>,
    offline: AtomicBool,
    next_id: AtomicI64,
}

impl BlogProvider {
    /// Creates an empty blog.
    pub fn new() -> Self {
        Self {
            users: RwLock::new(Vec::new()),
            posts: RwLock::new(Vec::new()),
            comments: RwLock::new(Vec::new()),
            tags: RwLock::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            offline: AtomicBool::new(false),
            next_id: AtomicI64::new(1000),
        }
    }

    /// Creates a blog with a small fixed data set.
    ///
    /// - users 1 `ada` (managed by 2), 2 `grace`, 3 `linus` (managed by 9,
    ///   who does not exist)
    /// - posts 10 and 11 by ada, 12 by grace
    /// - comments 100 (grace on 10), 101 (linus on 10), 102 (ada on 12)
    /// - tags `rust`, `sync`
    pub fn seeded() -> Self {
        let blog = Self::new();
        *blog.users.write() = vec![
            user(1, "ada", Some(2)),
            user(2, "grace", None),
            user(3, "linus", Some(9)),
        ];
        *blog.posts.write() = vec![
            post(10, 1, "Notes on engines", "open"),
            post(11, 1, "Draft", "draft"),
            post(12, 2, "Compilers", "open"),
        ];
        *blog.comments.write() = vec![
            comment(100, 10, 2, "Nice"),
            comment(101, 10, 3, "Ship it"),
            comment(102, 12, 1, "Agreed"),
        ];
        *blog.tags.write() = vec![tag("rust"), tag("sync")];
        blog
    }

    /// Makes every subsequent call fail with `BackendUnreachable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes the next call to `method` fail with `BackendUnreachable`.
    ///
    /// Queue the same method more than once to fail several calls.
    pub fn fail_next(&self, method: &str) {
        self.failures.lock().push(method.to_string());
    }

    /// Method names called so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of calls made to `method`.
    pub fn call_count(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == method).count()
    }

    /// Total number of calls.
    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    /// Forgets logged calls.
    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }

    /// Stores a user record.
    pub fn insert_user(&self, record: Record) {
        self.users.write().push(record);
    }

    /// Stores a post record.
    pub fn insert_post(&self, record: Record) {
        self.posts.write().push(record);
    }

    /// A copy of a stored user.
    pub fn stored_user(&self, id: i64) -> Option<Record> {
        find(&self.users.read(), &Value::Integer(id)).cloned()
    }

    fn table(&self, table: Table) -> &RwLock<Vec<Record>> {
        match table {
            Table::Users => &self.users,
            Table::Posts => &self.posts,
            Table::Comments => &self.comments,
            Table::Tags => &self.tags,
        }
    }

    fn enter(&self, method: &str) -> ProviderResult<()> {
        self.calls.lock().push(method.to_string());
        if self.offline.load(Ordering::SeqCst) {
            return Err(ProviderError::unreachable(format!("{method}: blog is offline")));
        }
        let mut failures = self.failures.lock();
        if let Some(pos) = failures.iter().position(|m| m == method) {
            failures.remove(pos);
            return Err(ProviderError::unreachable(format!("{method}: connection reset")));
        }
        Ok(())
    }

    fn read_one(&self, method: &str, table: Table, target: &Target) -> ProviderResult<Option<Record>> {
        self.enter(method)?;
        let Some(id) = target.id("id") else {
            return Ok(None);
        };
        Ok(find(&self.table(table).read(), id).cloned())
    }

    fn read_many(
        &self,
        method: &str,
        table: Table,
        claimable: &[&str],
        ctx: &ProviderContext,
    ) -> ProviderResult<Vec<Record>> {
        self.enter(method)?;
        let mut records = self.table(table).read().clone();
        for key in claimable {
            if let Some(expected) = ctx.claim_filter(key) {
                records.retain(|r| r.get(key).unwrap_or(&Value::Null).matches(&expected));
            }
        }
        Ok(records)
    }

    fn create(&self, table: Table, target: Target) -> ProviderResult<Option<Record>> {
        let Target::Record(mut record) = target else {
            return Err(ProviderError::invalid_record("create needs a record"));
        };
        if !record.get("id").is_some_and(Value::is_identifier) {
            record.insert("id", self.next_id.fetch_add(1, Ordering::SeqCst));
        }
        self.table(table).write().push(record.clone());
        Ok(Some(record))
    }

    fn update(&self, table: Table, target: Target) -> ProviderResult<Option<Record>> {
        let Target::Record(changes) = target else {
            return Err(ProviderError::invalid_record("update needs a record"));
        };
        let Some(id) = changes.get("id").cloned() else {
            return Err(ProviderError::invalid_record("update needs an id"));
        };
        let mut rows = self.table(table).write();
        let Some(row) = rows.iter_mut().find(|r| r.get("id") == Some(&id)) else {
            return Ok(None);
        };
        for (key, value) in changes {
            row.insert(key, value);
        }
        Ok(Some(row.clone()))
    }

    fn delete(&self, table: Table, target: &Target) -> ProviderResult<Option<Record>> {
        let Some(id) = target.id("id").cloned() else {
            return Ok(None);
        };
        let mut rows = self.table(table).write();
        let position = rows.iter().position(|r| r.get("id") == Some(&id));
        Ok(position.map(|i| rows.remove(i)))
    }
}

impl Default for BlogProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl Provider for BlogProvider {
    fn name(&self) -> &str {
        BLOG_PROVIDER
    }

    fn declare_methods(self: Arc<Self>, methods: &mut MethodTable) {
        const USER_KEYS: &[&str] = &["id", "name", "manager_id"];
        const POST_KEYS: &[&str] = &["id", "user_id", "status"];
        const COMMENT_KEYS: &[&str] = &["id", "post_id", "user_id"];

        for (table, singular, plural, keys) in [
            (Table::Users, "user", "users", USER_KEYS),
            (Table::Posts, "post", "posts", POST_KEYS),
        ] {
            let get = format!("get_{singular}");
            let p = Arc::clone(&self);
            let name = get.clone();
            methods.declare(&get, Method::single(move |_, t| p.read_one(&name, table, &t)));

            let list = format!("get_{plural}");
            let p = Arc::clone(&self);
            let name = list.clone();
            methods.declare(
                &list,
                Method::list(move |ctx, _| p.read_many(&name, table, keys, ctx)),
            );

            let create = format!("create_{singular}");
            let p = Arc::clone(&self);
            let name = create.clone();
            methods.declare(
                &create,
                Method::single(move |_, t| {
                    p.enter(&name)?;
                    p.create(table, t)
                }),
            );

            let update = format!("update_{singular}");
            let p = Arc::clone(&self);
            let name = update.clone();
            methods.declare(
                &update,
                Method::single(move |_, t| {
                    p.enter(&name)?;
                    p.update(table, t)
                }),
            );

            let delete = format!("delete_{singular}");
            let p = Arc::clone(&self);
            let name = delete.clone();
            methods.declare(
                &delete,
                Method::single(move |_, t| {
                    p.enter(&name)?;
                    p.delete(table, &t)
                }),
            );
        }

        let p = Arc::clone(&self);
        methods.declare(
            "create_users",
            Method::list(move |_, records| {
                p.enter("create_users")?;
                records
                    .into_iter()
                    .filter_map(|r| p.create(Table::Users, Target::Record(r)).transpose())
                    .collect()
            }),
        );
        let p = Arc::clone(&self);
        methods.declare(
            "update_users",
            Method::list(move |_, records| {
                p.enter("update_users")?;
                records
                    .into_iter()
                    .filter_map(|r| p.update(Table::Users, Target::Record(r)).transpose())
                    .collect()
            }),
        );
        let p = Arc::clone(&self);
        methods.declare(
            "delete_users",
            Method::list(move |_, records| {
                p.enter("delete_users")?;
                records
                    .into_iter()
                    .filter_map(|r| p.delete(Table::Users, &Target::Record(r)).transpose())
                    .collect()
            }),
        );

        let p = Arc::clone(&self);
        methods.declare(
            "get_comments",
            Method::list(move |ctx, _| p.read_many("get_comments", Table::Comments, COMMENT_KEYS, ctx)),
        );

        let p = Arc::clone(&self);
        methods.declare(
            "get_tags",
            Method::list(move |ctx, _| {
                p.enter("get_tags")?;
                let label = ctx.filters().get("label").cloned();
                let tags = p.tags.read().clone();
                Ok(match label {
                    Some(label) => tags
                        .into_iter()
                        .filter(|t| t.get("id").is_some_and(|id| id.matches(&label)))
                        .collect(),
                    None => tags,
                })
            })
            .claims(["label"]),
        );
    }
}

/// Entity metadata for the blog.
///
/// | type | relationships (default hydration) |
/// |---|---|
/// | `User` | `posts` many `Post` (defer), `manager` one `User` (defer) |
/// | `Post` | `author` one `User` via `user_id` (defer), `comments` many `Comment` (lazy) |
/// | `Comment` | `post` one `Post` (suppress), `author` one `User` via `user_id` (defer) |
/// | `Tag` | none; `READ` synthesized from `READ_LIST` |
pub fn blog_schema() -> Vec<EntityType> {
    vec![
        EntityType::new("User")
            .relationship(Relationship::many("posts", "Post"))
            .relationship(Relationship::one("manager", "User")),
        EntityType::new("Post")
            .relationship(Relationship::one("author", "User").key("user_id"))
            .relationship(Relationship::many("comments", "Comment").hydration(HydrationFlags::LAZY)),
        EntityType::new("Comment")
            .read_from_list(true)
            .relationship(Relationship::one("post", "Post").hydration(HydrationFlags::SUPPRESS))
            .relationship(Relationship::one("author", "User").key("user_id")),
        EntityType::new("Tag").read_from_list(true),
    ]
}

/// A container with the blog schema bound to `provider`.
pub fn blog_container(provider: Arc<BlogProvider>) -> Container {
    let mut container = Container::new();
    for entity_type in blog_schema() {
        let name = entity_type.name().to_string();
        container.register_entity(entity_type).bind(name, BLOG_PROVIDER);
    }
    container.register_provider(provider);
    container
}

/// A seeded blog and a container bound to it.
pub fn seeded_blog() -> (Arc<BlogProvider>, Container) {
    let provider = Arc::new(BlogProvider::seeded());
    let container = blog_container(Arc::clone(&provider));
    (provider, container)
}

/// A user record.
pub fn user(id: i64, name: &str, manager: Option<i64>) -> Record {
    Record::new()
        .with("id", id)
        .with("name", name)
        .with("manager_id", manager)
}

/// A post record.
pub fn post(id: i64, user_id: i64, title: &str, status: &str) -> Record {
    Record::new()
        .with("id", id)
        .with("user_id", user_id)
        .with("title", title)
        .with("status", status)
}

/// A comment record.
pub fn comment(id: i64, post_id: i64, user_id: i64, body: &str) -> Record {
    Record::new()
        .with("id", id)
        .with("post_id", post_id)
        .with("user_id", user_id)
        .with("body", body)
}

/// A tag record.
pub fn tag(label: &str) -> Record {
    Record::new().with("id", label)
}

fn find<'a>(rows: &'a [Record], id: &Value) -> Option<&'a Record> {
    rows.iter().find(|r| r.get("id") == Some(id))
}
