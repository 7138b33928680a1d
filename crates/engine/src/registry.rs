use std::collections::HashMap;
use std::fmt;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Server-issued identifier of an activity or stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Opaque presentation-side identifier. Only used for reverse lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderHandle(u64);

impl RenderHandle {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
pub struct RenderHandleAllocator {
    next: u64,
}

impl RenderHandleAllocator {
    pub fn allocate(&mut self) -> RenderHandle {
        let handle = RenderHandle(self.next);
        self.next = self.next.saturating_add(1);
        handle
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Activity,
    Stage,
}

impl EntityKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            EntityKind::Activity => "activity",
            EntityKind::Stage => "stage",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spatial {
    pub position: Vec3,
    pub scale: Vec3,
    pub rotation: Option<Quat>,
}

impl Spatial {
    pub fn at(position: Vec3, scale: Vec3) -> Self {
        Self {
            position,
            scale,
            rotation: None,
        }
    }
}

impl Default for Spatial {
    fn default() -> Self {
        Self::at(Vec3::ZERO, Vec3::ONE)
    }
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub payload: Value,
    pub spatial: Spatial,
    render_handle: Option<RenderHandle>,
    spawn_order: u64,
}

impl Entity {
    pub fn render_handle(&self) -> Option<RenderHandle> {
        self.render_handle
    }

    pub fn spawn_order(&self) -> u64 {
        self.spawn_order
    }

    /// Display name carried by the payload (`activity.name` or `stage.name`,
    /// else a top-level `name`).
    pub fn display_name(&self) -> Option<&str> {
        self.payload
            .get(self.kind.as_str())
            .and_then(|inner| inner.get("name"))
            .or_else(|| self.payload.get("name"))
            .and_then(Value::as_str)
    }
}

/// Kind-specific spatial placement for freshly spawned entities.
///
/// `spawn_counter` is the number of successful spawns before this one and
/// only ever grows, so policies can push successive entities apart.
pub trait PlacementPolicy {
    fn place(&mut self, kind: EntityKind, spawn_counter: u64) -> Spatial;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{kind} payload has no usable id")]
    MissingId { kind: EntityKind },
    #[error("entity {id} is already live")]
    DuplicateId { id: EntityId },
    #[error("entity {id} is not live")]
    UnknownEntity { id: EntityId },
}

/// Reads the server id out of a spawn payload. Numeric ids are accepted and
/// stringified; empty strings are not ids.
pub fn payload_entity_id(payload: &Value) -> Option<EntityId> {
    match payload.get("id")? {
        Value::String(raw) if !raw.is_empty() => Some(EntityId::new(raw.as_str())),
        Value::Number(number) => Some(EntityId::new(number.to_string())),
        _ => None,
    }
}

/// Live entities keyed by server id, plus the reverse render-handle index.
///
/// Both maps change together inside one `&mut self` call, so no observer can
/// see a handle whose entity is gone. Ids are unique across both kinds.
/// A spawn for an id that is still live is rejected and leaves the live
/// entity untouched.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: HashMap<EntityId, Entity>,
    handles: HashMap<RenderHandle, EntityId>,
    spawn_counter: u64,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(
        &mut self,
        kind: EntityKind,
        payload: Value,
        placement: &mut dyn PlacementPolicy,
    ) -> Result<&Entity, RegistryError> {
        let id = payload_entity_id(&payload).ok_or(RegistryError::MissingId { kind })?;
        if self.entities.contains_key(&id) {
            return Err(RegistryError::DuplicateId { id });
        }

        let spawn_order = self.spawn_counter;
        let spatial = placement.place(kind, spawn_order);
        self.spawn_counter = self.spawn_counter.saturating_add(1);
        debug!(id = %id, kind = %kind, spawn_order, "entity_spawned");

        let entity = Entity {
            id: id.clone(),
            kind,
            payload,
            spatial,
            render_handle: None,
            spawn_order,
        };
        Ok(&*self.entities.entry(id).or_insert(entity))
    }

    /// Associates the visual created for `id`. Returns the handle it replaced,
    /// whose reverse mapping is dropped.
    pub fn bind_render_handle(
        &mut self,
        id: &EntityId,
        handle: RenderHandle,
    ) -> Result<Option<RenderHandle>, RegistryError> {
        let entity = self
            .entities
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownEntity { id: id.clone() })?;

        let previous = entity.render_handle.replace(handle);
        if let Some(stale) = previous {
            self.handles.remove(&stale);
        }
        if let Some(other) = self.handles.insert(handle, id.clone()) {
            // The presentation layer reused a handle still bound elsewhere.
            if &other != id {
                if let Some(other_entity) = self.entities.get_mut(&other) {
                    other_entity.render_handle = None;
                }
            }
        }
        Ok(previous)
    }

    pub fn remove(&mut self, id: &EntityId) -> Result<Entity, RegistryError> {
        let entity = self
            .entities
            .remove(id)
            .ok_or_else(|| RegistryError::UnknownEntity { id: id.clone() })?;
        if let Some(handle) = entity.render_handle {
            self.handles.remove(&handle);
        }
        debug!(id = %id, kind = %entity.kind, "entity_removed");
        Ok(entity)
    }

    pub fn resolve(&self, handle: RenderHandle) -> Option<&EntityId> {
        self.handles.get(&handle)
    }

    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn get_mut(&mut self, id: &EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    pub fn kind_of(&self, id: &EntityId) -> Option<EntityKind> {
        self.entities.get(id).map(|entity| entity.kind)
    }

    pub fn live_count(&self) -> usize {
        self.entities.len()
    }

    pub fn spawn_counter(&self) -> u64 {
        self.spawn_counter
    }

    /// Live entities of one kind, oldest first.
    pub fn iter_kind(&self, kind: EntityKind) -> Vec<&Entity> {
        let mut entities = self
            .entities
            .values()
            .filter(|entity| entity.kind == kind)
            .collect::<Vec<_>>();
        entities.sort_by_key(|entity| entity.spawn_order);
        entities
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use serde_json::json;

    use super::*;

    struct DepthPlacement;

    impl PlacementPolicy for DepthPlacement {
        fn place(&mut self, _kind: EntityKind, spawn_counter: u64) -> Spatial {
            Spatial::at(Vec3::new(0.0, 0.0, 30.0 + spawn_counter as f32 * 30.0), Vec3::ONE)
        }
    }

    fn activity(id: &str) -> Value {
        json!({ "id": id, "activity": { "name": format!("activity {id}") } })
    }

    #[test]
    fn spawn_places_with_monotonic_counter() {
        let mut registry = EntityRegistry::new();
        let mut placement = DepthPlacement;

        let first_z = registry
            .spawn(EntityKind::Activity, activity("a1"), &mut placement)
            .expect("spawn a1")
            .spatial
            .position
            .z;
        let second_z = registry
            .spawn(EntityKind::Stage, json!({ "id": "s1" }), &mut placement)
            .expect("spawn s1")
            .spatial
            .position
            .z;

        assert_eq!(first_z, 30.0);
        assert_eq!(second_z, 60.0);
        assert_eq!(registry.spawn_counter(), 2);
    }

    #[test]
    fn duplicate_live_id_is_rejected_and_original_kept() {
        let mut registry = EntityRegistry::new();
        let mut placement = DepthPlacement;
        registry
            .spawn(EntityKind::Activity, activity("a1"), &mut placement)
            .expect("spawn");

        let duplicate = json!({ "id": "a1", "activity": { "name": "replacement" } });
        let err = registry
            .spawn(EntityKind::Activity, duplicate, &mut placement)
            .expect_err("duplicate must be rejected");

        assert_eq!(
            err,
            RegistryError::DuplicateId {
                id: EntityId::from("a1")
            }
        );
        let live = registry.get(&EntityId::from("a1")).expect("still live");
        assert_eq!(live.display_name(), Some("activity a1"));
        assert_eq!(registry.live_count(), 1);
        assert_eq!(registry.spawn_counter(), 1);
    }

    #[test]
    fn missing_id_is_an_error() {
        let mut registry = EntityRegistry::new();
        let err = registry
            .spawn(EntityKind::Stage, json!({ "stage": {} }), &mut DepthPlacement)
            .expect_err("no id");
        assert_eq!(
            err,
            RegistryError::MissingId {
                kind: EntityKind::Stage
            }
        );
    }

    #[test]
    fn numeric_ids_are_stringified() {
        assert_eq!(
            payload_entity_id(&json!({ "id": 42 })),
            Some(EntityId::from("42"))
        );
        assert_eq!(payload_entity_id(&json!({ "id": "" })), None);
    }

    #[test]
    fn bind_to_unknown_entity_fails() {
        let mut registry = EntityRegistry::new();
        let err = registry
            .bind_render_handle(&EntityId::from("ghost"), RenderHandle::from_raw(3))
            .expect_err("unknown");
        assert!(matches!(err, RegistryError::UnknownEntity { .. }));
        assert!(registry.resolve(RenderHandle::from_raw(3)).is_none());
    }

    #[test]
    fn rebinding_replaces_stale_reverse_mapping() {
        let mut registry = EntityRegistry::new();
        registry
            .spawn(EntityKind::Activity, activity("a1"), &mut DepthPlacement)
            .expect("spawn");
        let id = EntityId::from("a1");

        registry
            .bind_render_handle(&id, RenderHandle::from_raw(1))
            .expect("bind");
        let previous = registry
            .bind_render_handle(&id, RenderHandle::from_raw(2))
            .expect("rebind");

        assert_eq!(previous, Some(RenderHandle::from_raw(1)));
        assert!(registry.resolve(RenderHandle::from_raw(1)).is_none());
        assert_eq!(registry.resolve(RenderHandle::from_raw(2)), Some(&id));
    }

    #[test]
    fn remove_is_idempotent() {
        let mut registry = EntityRegistry::new();
        registry
            .spawn(EntityKind::Activity, activity("a1"), &mut DepthPlacement)
            .expect("spawn");
        let id = EntityId::from("a1");
        registry
            .bind_render_handle(&id, RenderHandle::from_raw(7))
            .expect("bind");

        let removed = registry.remove(&id).expect("first remove");
        assert_eq!(removed.id, id);
        assert_eq!(removed.render_handle(), Some(RenderHandle::from_raw(7)));

        let second = registry.remove(&id);
        assert!(matches!(second, Err(RegistryError::UnknownEntity { .. })));
        assert!(registry.resolve(RenderHandle::from_raw(7)).is_none());
    }

    #[test]
    fn resolvable_ids_always_match_live_bound_entities() {
        let mut registry = EntityRegistry::new();
        let mut allocator = RenderHandleAllocator::default();
        let mut ever_bound = Vec::new();

        let script: &[(&str, bool)] = &[
            ("a", true),
            ("b", true),
            ("a", false),
            ("c", true),
            ("a", true),
            ("b", false),
            ("c", false),
            ("d", true),
        ];

        for (raw, is_spawn) in script {
            let id = EntityId::from(*raw);
            if *is_spawn {
                registry
                    .spawn(EntityKind::Activity, activity(raw), &mut DepthPlacement)
                    .expect("spawn");
                let handle = allocator.allocate();
                registry.bind_render_handle(&id, handle).expect("bind");
                ever_bound.push(handle);
            } else {
                registry.remove(&id).expect("remove");
            }

            let resolvable = ever_bound
                .iter()
                .filter_map(|handle| registry.resolve(*handle).cloned())
                .collect::<BTreeSet<_>>();
            let live = registry
                .iter()
                .map(|entity| entity.id.clone())
                .collect::<BTreeSet<_>>();
            assert_eq!(resolvable, live);
        }
    }

    #[test]
    fn id_can_be_reused_after_removal() {
        let mut registry = EntityRegistry::new();
        let id = EntityId::from("a1");
        registry
            .spawn(EntityKind::Activity, activity("a1"), &mut DepthPlacement)
            .expect("first spawn");
        registry.remove(&id).expect("remove");
        registry
            .spawn(EntityKind::Activity, activity("a1"), &mut DepthPlacement)
            .expect("respawn");

        assert_eq!(registry.live_count(), 1);
        assert_eq!(registry.get(&id).map(Entity::spawn_order), Some(1));
    }

    #[test]
    fn iter_kind_is_in_spawn_order() {
        let mut registry = EntityRegistry::new();
        for raw in ["z", "y", "x"] {
            registry
                .spawn(EntityKind::Activity, activity(raw), &mut DepthPlacement)
                .expect("spawn");
        }
        registry
            .spawn(EntityKind::Stage, json!({ "id": "s" }), &mut DepthPlacement)
            .expect("stage");

        let ids = registry
            .iter_kind(EntityKind::Activity)
            .into_iter()
            .map(|entity| entity.id.as_str().to_string())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["z", "y", "x"]);
    }
}
