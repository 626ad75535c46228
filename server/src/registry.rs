//! Entity registry: a generational arena of entities plus one storage
//! column per component type.
//!
//! An [`Entity`] is a slot index paired with the slot's generation at the
//! time it was created. Destroying an entity bumps the generation, so an
//! old id pointing at a recycled slot is recognised as dead instead of
//! silently aliasing the new occupant.

use crate::physics::{BodyHandle, Vector2};
use std::fmt;

/// Identifier of one simulated subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    index: u32,
    generation: u32,
}

impl Entity {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Packs the id into the `generation << 32 | index` form used on the wire.
    pub fn to_bits(&self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    pub fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Simulation state of a connected player.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Player {
    pub position: Vector2,
    pub velocity: Vector2,
    /// Latest movement direction requested by the client, not yet applied.
    pub input: Option<Vector2>,
}

/// Physics body backing an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Body(pub BodyHandle);

/// Storage for one component type, indexed by entity slot.
#[derive(Debug)]
pub struct Column<C> {
    data: Vec<Option<C>>,
}

impl<C> Default for Column<C> {
    fn default() -> Self {
        Self { data: Vec::new() }
    }
}

impl<C> Column<C> {
    fn get(&self, index: u32) -> Option<&C> {
        self.data.get(index as usize).and_then(Option::as_ref)
    }

    fn get_mut(&mut self, index: u32) -> Option<&mut C> {
        self.data.get_mut(index as usize).and_then(Option::as_mut)
    }

    fn insert(&mut self, index: u32, value: C) -> Option<C> {
        let index = index as usize;
        if index >= self.data.len() {
            self.data.resize_with(index + 1, || None);
        }
        self.data[index].replace(value)
    }

    fn remove(&mut self, index: u32) -> Option<C> {
        self.data.get_mut(index as usize).and_then(Option::take)
    }
}

/// Component storage for every live entity.
///
/// This is the part of the registry that event handlers get to see: they
/// can read and attach components on live entities, but only the registry
/// itself can create or destroy entities.
#[derive(Debug, Default)]
pub struct Components {
    /// Generation of the live occupant of each slot.
    live: Vec<Option<u32>>,
    players: Column<Player>,
    bodies: Column<Body>,
}

impl Components {
    fn occupy(&mut self, index: u32, generation: u32) {
        let slot = index as usize;
        if slot >= self.live.len() {
            self.live.resize(slot + 1, None);
        }
        self.live[slot] = Some(generation);
    }

    fn release(&mut self, index: u32) {
        if let Some(slot) = self.live.get_mut(index as usize) {
            *slot = None;
        }
        self.players.remove(index);
        self.bodies.remove(index);
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.live.get(entity.index as usize).copied().flatten() == Some(entity.generation)
    }

    pub fn try_get<C: Component>(&self, entity: Entity) -> Option<&C> {
        if !self.contains(entity) {
            return None;
        }
        C::column(self).get(entity.index)
    }

    pub fn try_get_mut<C: Component>(&mut self, entity: Entity) -> Option<&mut C> {
        if !self.contains(entity) {
            return None;
        }
        C::column_mut(self).get_mut(entity.index)
    }

    /// Attaches `value` if `entity` is alive, replacing any previous value.
    /// Returns false and drops `value` for a dead entity.
    pub fn try_emplace<C: Component>(&mut self, entity: Entity, value: C) -> bool {
        if !self.contains(entity) {
            return false;
        }
        C::column_mut(self).insert(entity.index, value);
        true
    }

    fn live_entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.live
            .iter()
            .enumerate()
            .filter_map(|(index, generation)| {
                generation.map(|generation| Entity {
                    index: index as u32,
                    generation,
                })
            })
    }
}

/// A type that can be attached to an entity. Each component names the
/// column it lives in, so lookups are plain indexing with no type maps.
pub trait Component: Sized + 'static {
    fn column(components: &Components) -> &Column<Self>;
    fn column_mut(components: &mut Components) -> &mut Column<Self>;
}

impl Component for Player {
    fn column(components: &Components) -> &Column<Self> {
        &components.players
    }

    fn column_mut(components: &mut Components) -> &mut Column<Self> {
        &mut components.players
    }
}

impl Component for Body {
    fn column(components: &Components) -> &Column<Self> {
        &components.bodies
    }

    fn column_mut(components: &mut Components) -> &mut Column<Self> {
        &mut components.bodies
    }
}

/// Owner of all entities and their components.
#[derive(Debug, Default)]
pub struct Registry {
    /// Current generation of every slot ever allocated.
    generations: Vec<u32>,
    free: Vec<u32>,
    live: usize,
    components: Components,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a new entity, reusing a freed slot when one is available.
    pub fn create(&mut self) -> Entity {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.generations.push(0);
                (self.generations.len() - 1) as u32
            }
        };
        let generation = self.generations[index as usize];

        self.components.occupy(index, generation);
        self.live += 1;
        Entity { index, generation }
    }

    /// Destroys the entity and drops its components.
    /// Returns false if it was already dead.
    pub fn destroy(&mut self, entity: Entity) -> bool {
        if !self.contains(entity) {
            return false;
        }

        let generation = &mut self.generations[entity.index as usize];
        *generation = generation.wrapping_add(1);

        self.components.release(entity.index);
        self.free.push(entity.index);
        self.live -= 1;
        true
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.components.contains(entity)
    }

    /// Attaches `value` to a live entity, replacing any previous value.
    ///
    /// # Panics
    ///
    /// Panics if `entity` is not alive.
    pub fn emplace<C: Component>(&mut self, entity: Entity, value: C) {
        if !self.components.try_emplace(entity, value) {
            panic!("emplace on dead entity {}", entity);
        }
    }

    /// # Panics
    ///
    /// Panics if `entity` is not alive or lacks the component. Callers only
    /// reach entities inside their session's lifetime.
    pub fn get<C: Component>(&self, entity: Entity) -> &C {
        match self.try_get(entity) {
            Some(component) => component,
            None => panic!(
                "entity {} has no {} component",
                entity,
                std::any::type_name::<C>()
            ),
        }
    }

    /// # Panics
    ///
    /// Same conditions as [`Registry::get`].
    pub fn get_mut<C: Component>(&mut self, entity: Entity) -> &mut C {
        match self.try_get_mut(entity) {
            Some(component) => component,
            None => panic!(
                "entity {} has no {} component",
                entity,
                std::any::type_name::<C>()
            ),
        }
    }

    pub fn try_get<C: Component>(&self, entity: Entity) -> Option<&C> {
        self.components.try_get(entity)
    }

    pub fn try_get_mut<C: Component>(&mut self, entity: Entity) -> Option<&mut C> {
        self.components.try_get_mut(entity)
    }

    pub fn components(&self) -> &Components {
        &self.components
    }

    /// Component access without the power to create or destroy entities.
    pub fn components_mut(&mut self) -> &mut Components {
        &mut self.components
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Iterates over live entities in slot order.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.components.live_entities()
    }
}
