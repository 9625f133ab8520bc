//! Data-driven entity creation.
//!
//! An [`EntityTemplate`] names a tag and a list of component descriptors,
//! each a component type name plus a property map. The
//! [`ComponentFactory`] turns descriptors into components; the
//! [`TemplateRegistry`] stores templates by name and instantiates them into a
//! scene.
//!
//! Templates load from JSON:
//!
//! ```json
//! [
//!   { "name": "Crate", "tag": "Prop",
//!     "components": [ { "type": "Transform", "properties": { "x": 4, "scale": 2 } } ] }
//! ]
//! ```
//!
//! A descriptor whose type the factory does not know is skipped and listed in
//! the [`CreationReport`]; the rest of the template is still applied.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use kestrel_ecs::behavior::Behavior;
use kestrel_ecs::entity::{Entity, EntityId};
use kestrel_ecs::math::Vector3;
use kestrel_ecs::scene::Scene;
use kestrel_ecs::transform::{Transform, Trs};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

pub const TRANSFORM: &str = "Transform";

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// A template with this name is already registered.
    #[error("template '{name}' already registered")]
    DuplicateTemplate { name: String },

    #[error("template '{name}' not found")]
    TemplateNotFound { name: String },

    #[error("failed to read template file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed template: {0}")]
    Parse(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// ComponentDescriptor
// ---------------------------------------------------------------------------

/// One component of a template: its type name and raw properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    #[serde(rename = "type", alias = "typeName")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
}

impl ComponentDescriptor {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// A `Transform` descriptor at `(x, y, z)`.
    pub fn transform(x: f32, y: f32, z: f32) -> Self {
        Self::new(TRANSFORM).with("x", x).with("y", y).with("z", z)
    }

    /// Read a numeric property. Numbers and numeric strings are accepted;
    /// anything else yields `default`.
    pub fn get_f32(&self, key: &str, default: f32) -> f32 {
        match self.properties.get(key) {
            Some(Value::Number(n)) => n.as_f64().map_or(default, |v| v as f32),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.properties.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => match s.as_str() {
                "true" | "1" => true,
                "false" | "0" => false,
                _ => default,
            },
            _ => default,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }
}

// ---------------------------------------------------------------------------
// EntityTemplate
// ---------------------------------------------------------------------------

fn active_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTemplate {
    pub name: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default = "active_default")]
    pub active: bool,
    #[serde(default)]
    pub components: Vec<ComponentDescriptor>,
}

impl EntityTemplate {
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
            active: true,
            components: Vec::new(),
        }
    }

    pub fn with_component(mut self, descriptor: ComponentDescriptor) -> Self {
        self.components.push(descriptor);
        self
    }

    pub fn with_transform(self, x: f32, y: f32, z: f32) -> Self {
        self.with_component(ComponentDescriptor::transform(x, y, z))
    }

    /// Add a descriptor for a behavior registered with the factory.
    pub fn with_behavior(self, type_name: impl Into<String>) -> Self {
        self.with_component(ComponentDescriptor::new(type_name))
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn has_component(&self, type_name: &str) -> bool {
        self.components.iter().any(|c| c.type_name == type_name)
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn from_json_str(json: &str) -> Result<Self, TemplateError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_string(&self) -> Result<String, TemplateError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    // -- built-in templates ---------------------------------------------------

    pub fn player() -> Self {
        Self::new("Player", "Player").with_transform(0.0, 1.0, 0.0)
    }

    pub fn enemy() -> Self {
        Self::new("Enemy", "Enemy").with_transform(10.0, 0.0, 5.0)
    }

    pub fn static_object() -> Self {
        Self::new("StaticObject", "Static").with_transform(0.0, 0.0, 0.0)
    }
}

// ---------------------------------------------------------------------------
// ComponentFactory
// ---------------------------------------------------------------------------

/// Builds a component from a descriptor and attaches it to an entity.
pub type ComponentConstructor = Box<dyn Fn(&mut Entity, &ComponentDescriptor) + Send + Sync>;

/// Maps component type names to constructors. `Transform` is built in.
pub struct ComponentFactory {
    constructors: HashMap<String, ComponentConstructor>,
}

impl ComponentFactory {
    pub fn new() -> Self {
        let mut factory = Self {
            constructors: HashMap::new(),
        };
        factory.register(TRANSFORM, apply_transform);
        factory
    }

    /// Register a constructor. Returns `false` and keeps the existing one if
    /// `type_name` is taken.
    pub fn register(
        &mut self,
        type_name: impl Into<String>,
        constructor: impl Fn(&mut Entity, &ComponentDescriptor) + Send + Sync + 'static,
    ) -> bool {
        let type_name = type_name.into();
        if self.constructors.contains_key(&type_name) {
            warn!(component = %type_name, "component type already registered");
            return false;
        }
        debug!(component = %type_name, "component type registered");
        self.constructors.insert(type_name, Box::new(constructor));
        true
    }

    /// Register a behavior built from its `Default` value.
    pub fn register_behavior<B: Behavior + Default>(&mut self, type_name: impl Into<String>) -> bool {
        self.register(type_name, |entity, _| {
            entity.add_behavior(B::default());
        })
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.constructors.contains_key(type_name)
    }

    /// Registered type names, sorted.
    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build `descriptor` onto `entity`. `false` when the type is unknown.
    pub fn apply(&self, entity: &mut Entity, descriptor: &ComponentDescriptor) -> bool {
        match self.constructors.get(&descriptor.type_name) {
            Some(construct) => {
                construct(entity, descriptor);
                true
            }
            None => false,
        }
    }
}

impl Default for ComponentFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ComponentFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentFactory")
            .field("types", &self.registered_names())
            .finish()
    }
}

/// Reads `x,y,z,rotX,rotY,rotZ,scale`. Reuses an existing transform.
fn apply_transform(entity: &mut Entity, d: &ComponentDescriptor) {
    let local = Trs {
        position: Vector3::new(d.get_f32("x", 0.0), d.get_f32("y", 0.0), d.get_f32("z", 0.0)),
        rotation: Vector3::new(
            d.get_f32("rotX", 0.0),
            d.get_f32("rotY", 0.0),
            d.get_f32("rotZ", 0.0),
        ),
        scale: Vector3::splat(d.get_f32("scale", 1.0)),
    };
    match entity.transform() {
        Some(t) => t.set_local(local),
        None => {
            entity.add_component(Transform::with_trs(local.position, local.rotation, local.scale));
        }
    }
}

// ---------------------------------------------------------------------------
// TemplateRegistry
// ---------------------------------------------------------------------------

/// Outcome of instantiating one template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationReport {
    pub entity: EntityId,
    /// Descriptor types the factory could not build.
    pub unknown_components: Vec<String>,
}

impl CreationReport {
    pub fn is_complete(&self) -> bool {
        self.unknown_components.is_empty()
    }
}

pub struct TemplateRegistry {
    templates: HashMap<String, EntityTemplate>,
    factory: ComponentFactory,
    objects_created: usize,
}

impl TemplateRegistry {
    /// An empty registry with the default factory.
    pub fn new() -> Self {
        Self {
            templates: HashMap::new(),
            factory: ComponentFactory::new(),
            objects_created: 0,
        }
    }

    /// A registry holding the player, enemy and static-object templates.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for template in [
            EntityTemplate::player(),
            EntityTemplate::enemy(),
            EntityTemplate::static_object(),
        ] {
            // Fresh registry, names are distinct.
            let _ = registry.register(template);
        }
        registry
    }

    // -- templates ------------------------------------------------------------

    pub fn register(&mut self, template: EntityTemplate) -> Result<(), TemplateError> {
        if self.templates.contains_key(&template.name) {
            warn!(template = %template.name, "duplicate template rejected");
            return Err(TemplateError::DuplicateTemplate {
                name: template.name,
            });
        }
        info!(template = %template.name, components = template.components.len(), "template registered");
        self.templates.insert(template.name.clone(), template);
        Ok(())
    }

    /// Register every template in a JSON array. Stops at the first
    /// duplicate; templates before it stay registered.
    pub fn load_json_str(&mut self, json: &str) -> Result<usize, TemplateError> {
        let templates: Vec<EntityTemplate> = serde_json::from_str(json)?;
        let count = templates.len();
        for template in templates {
            self.register(template)?;
        }
        Ok(count)
    }

    pub fn load_json_file(&mut self, path: impl AsRef<Path>) -> Result<usize, TemplateError> {
        let text = std::fs::read_to_string(path)?;
        self.load_json_str(&text)
    }

    pub fn remove(&mut self, name: &str) -> Option<EntityTemplate> {
        self.templates.remove(name)
    }

    pub fn clear(&mut self) {
        self.templates.clear();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&EntityTemplate> {
        self.templates.get(name)
    }

    /// Template names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.templates.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn factory(&self) -> &ComponentFactory {
        &self.factory
    }

    pub fn factory_mut(&mut self) -> &mut ComponentFactory {
        &mut self.factory
    }

    pub fn objects_created(&self) -> usize {
        self.objects_created
    }

    // -- instantiation --------------------------------------------------------

    /// Create an entity from the template registered as `name`.
    pub fn instantiate(&mut self, scene: &mut Scene, name: &str) -> Result<CreationReport, TemplateError> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| TemplateError::TemplateNotFound {
                name: name.to_owned(),
            })?;
        let report = build(&self.factory, scene, template);
        self.objects_created += 1;
        Ok(report)
    }

    /// Create an entity from an unregistered template.
    pub fn instantiate_template(&mut self, scene: &mut Scene, template: &EntityTemplate) -> CreationReport {
        self.objects_created += 1;
        build(&self.factory, scene, template)
    }

    /// Create `count` entities from the template registered as `name`.
    pub fn populate(
        &mut self,
        scene: &mut Scene,
        name: &str,
        count: usize,
    ) -> Result<Vec<CreationReport>, TemplateError> {
        (0..count).map(|_| self.instantiate(scene, name)).collect()
    }
}

fn build(factory: &ComponentFactory, scene: &mut Scene, template: &EntityTemplate) -> CreationReport {
    let id = scene.create_entity(&template.tag, &template.name);
    let mut unknown = Vec::new();
    if let Some(entity) = scene.entity_mut(id) {
        for descriptor in &template.components {
            if !factory.apply(entity, descriptor) {
                unknown.push(descriptor.type_name.clone());
            }
        }
    }
    if !template.active {
        scene.set_entity_active(id, false);
    }
    if !unknown.is_empty() {
        warn!(template = %template.name, ?unknown, "template has unknown component types");
    }
    CreationReport {
        entity: id,
        unknown_components: unknown,
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TemplateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateRegistry")
            .field("templates", &self.names())
            .field("objects_created", &self.objects_created)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
