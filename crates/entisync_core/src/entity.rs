//! Entity type metadata and the container that hands it out.

use crate::catalog::HydrationFlags;
use crate::error::{CoreError, CoreResult};
use crate::naming::{pluralize, snake_case};
use crate::provider::{MethodTable, Provider};
use crate::value::{Record, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Whether a relationship points at one entity or a list of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    /// A single related entity, located via a foreign key field.
    One,
    /// A list of related entities, located via a filter on the parent id.
    Many,
}

/// A declared relationship between two entity types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    name: String,
    target: String,
    cardinality: Cardinality,
    hydration: HydrationFlags,
    key: Option<String>,
}

impl Relationship {
    /// Declares a to-one relationship.
    pub fn one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, target, Cardinality::One)
    }

    /// Declares a to-many relationship.
    pub fn many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, target, Cardinality::Many)
    }

    fn new(name: impl Into<String>, target: impl Into<String>, cardinality: Cardinality) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality,
            hydration: HydrationFlags::default(),
            key: None,
        }
    }

    /// Sets the default hydration flags.
    #[must_use]
    pub fn hydration(mut self, flags: HydrationFlags) -> Self {
        self.hydration = flags;
        self
    }

    /// Overrides the key used to locate related entities.
    ///
    /// For to-one relationships this is the foreign-key field on the
    /// parent record; for to-many relationships it is the filter key
    /// passed to the target's list read.
    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Relationship (property) name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Target entity type name.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Cardinality.
    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// Declared hydration flags.
    pub fn default_hydration(&self) -> HydrationFlags {
        self.hydration
    }

    /// Foreign-key field for a to-one relationship (`<name>_id` by default).
    pub fn foreign_key(&self) -> String {
        self.key
            .clone()
            .unwrap_or_else(|| format!("{}_id", snake_case(&self.name)))
    }

    /// Filter key for a to-many relationship (`<parent>_id` by default).
    pub fn filter_key(&self, parent: &EntityType) -> String {
        self.key
            .clone()
            .unwrap_or_else(|| format!("{}_id", parent.snake_name()))
    }
}

/// Metadata describing an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityType {
    name: String,
    plural: String,
    id_field: String,
    relationships: Vec<Relationship>,
    read_from_list: bool,
}

impl EntityType {
    /// Creates metadata for an entity type with display name `name`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            plural: pluralize(&name),
            name,
            id_field: "id".into(),
            relationships: Vec::new(),
            read_from_list: false,
        }
    }

    /// Sets the plural display name.
    #[must_use]
    pub fn plural(mut self, plural: impl Into<String>) -> Self {
        self.plural = plural.into();
        self
    }

    /// Sets the field holding the backend id.
    #[must_use]
    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    /// Declares a relationship.
    #[must_use]
    pub fn relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Allows `READ` to be synthesized by scanning `READ_LIST`.
    #[must_use]
    pub fn read_from_list(mut self, allow: bool) -> Self {
        self.read_from_list = allow;
        self
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Plural display name.
    pub fn plural_name(&self) -> &str {
        &self.plural
    }

    /// snake_case form of the display name.
    pub fn snake_name(&self) -> String {
        snake_case(&self.name)
    }

    /// Name of the id field.
    pub fn id_key(&self) -> &str {
        &self.id_field
    }

    /// Declared relationships, in declaration order.
    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    /// Looks up a relationship by name.
    pub fn find_relationship(&self, name: &str) -> CoreResult<&Relationship> {
        self.relationships
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| CoreError::UnknownRelationship {
                entity_type: self.name.clone(),
                name: name.into(),
            })
    }

    /// Whether `READ` may be synthesized from `READ_LIST`.
    pub fn allows_read_from_list(&self) -> bool {
        self.read_from_list
    }

    /// Extracts the backend id from a record, if it has an identifying one.
    pub fn id_of<'a>(&self, record: &'a Record) -> Option<&'a Value> {
        record.get(&self.id_field).filter(|v| v.is_identifier())
    }
}

/// A provider registered with the container, with its method table.
#[derive(Clone)]
pub struct RegisteredProvider {
    provider: Arc<dyn Provider>,
    methods: Arc<MethodTable>,
}

impl RegisteredProvider {
    /// The provider instance.
    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Methods the provider declared when it was registered.
    pub fn methods(&self) -> &Arc<MethodTable> {
        &self.methods
    }

    /// Provider name.
    pub fn name(&self) -> &str {
        self.provider.name()
    }
}

impl fmt::Debug for RegisteredProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredProvider")
            .field("name", &self.provider.name())
            .field("methods", &self.methods.len())
            .finish()
    }
}

/// Lookup of entity metadata and providers by name.
///
/// Registration is application code; the engine only reads from a
/// container once it is shared.
#[derive(Debug, Default)]
pub struct Container {
    entity_types: HashMap<String, Arc<EntityType>>,
    providers: HashMap<String, RegisteredProvider>,
    bindings: HashMap<String, String>,
}

impl Container {
    /// Creates an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers entity type metadata.
    pub fn register_entity(&mut self, entity_type: EntityType) -> &mut Self {
        self.entity_types
            .insert(entity_type.name.clone(), Arc::new(entity_type));
        self
    }

    /// Registers a provider and introspects its methods.
    ///
    /// The method table is built exactly once, here.
    pub fn register_provider(&mut self, provider: Arc<dyn Provider>) -> &mut Self {
        let mut methods = MethodTable::new();
        Arc::clone(&provider).declare_methods(&mut methods);
        tracing::debug!(
            provider = provider.name(),
            methods = methods.len(),
            "registered provider"
        );
        self.providers.insert(
            provider.name().to_string(),
            RegisteredProvider {
                provider,
                methods: Arc::new(methods),
            },
        );
        self
    }

    /// Binds an entity type to the provider that serves it by default.
    pub fn bind(&mut self, entity_type: impl Into<String>, provider: impl Into<String>) -> &mut Self {
        self.bindings.insert(entity_type.into(), provider.into());
        self
    }

    /// Looks up entity metadata.
    pub fn entity_type(&self, name: &str) -> CoreResult<Arc<EntityType>> {
        self.entity_types
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::unknown_entity_type(name))
    }

    /// Looks up a provider by name.
    pub fn provider(&self, name: &str) -> CoreResult<&RegisteredProvider> {
        self.providers
            .get(name)
            .ok_or_else(|| CoreError::UnknownProvider { name: name.into() })
    }

    /// Looks up the provider bound to an entity type.
    pub fn provider_for(&self, entity_type: &str) -> CoreResult<&RegisteredProvider> {
        let name = self
            .bindings
            .get(entity_type)
            .ok_or_else(|| CoreError::UnknownProvider {
                name: format!("<unbound: {entity_type}>"),
            })?;
        self.provider(name)
    }

    /// Names of all registered entity types.
    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entity_types.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;

    #[test]
    fn entity_type_defaults() {
        let user = EntityType::new("User");
        assert_eq!(user.plural_name(), "Users");
        assert_eq!(user.id_key(), "id");
        assert_eq!(user.snake_name(), "user");
        assert!(!user.allows_read_from_list());

        let cat = EntityType::new("BlogCategory").id_field("category_id");
        assert_eq!(cat.plural_name(), "BlogCategories");
        assert_eq!(cat.snake_name(), "blog_category");
    }

    #[test]
    fn relationship_keys() {
        let user = EntityType::new("User");
        let author = Relationship::one("Author", "User");
        assert_eq!(author.foreign_key(), "author_id");

        let posts = Relationship::many("posts", "Post");
        assert_eq!(posts.filter_key(&user), "user_id");

        let custom = Relationship::many("posts", "Post").key("written_by");
        assert_eq!(custom.filter_key(&user), "written_by");
    }

    #[test]
    fn id_of_requires_identifier() {
        let user = EntityType::new("User");
        assert_eq!(user.id_of(&record! { "id" => 3 }), Some(&Value::Integer(3)));
        assert_eq!(user.id_of(&record! { "id" => Value::Null }), None);
        assert_eq!(user.id_of(&record! { "name" => "x" }), None);
    }

    #[test]
    fn unknown_lookups_fail() {
        let container = Container::new();
        assert!(matches!(
            container.entity_type("User"),
            Err(CoreError::UnknownEntityType { .. })
        ));
        assert!(matches!(
            container.provider("blog"),
            Err(CoreError::UnknownProvider { .. })
        ));
    }

    #[test]
    fn find_relationship() {
        let user = EntityType::new("User").relationship(Relationship::many("posts", "Post"));
        assert_eq!(user.find_relationship("posts").unwrap().target(), "Post");
        assert!(user.find_relationship("comments").is_err());
    }
}
