//! Physics collaborator consumed by the tick loop.
//!
//! The world only needs to create bodies, step them and read their
//! transforms back, so the engine sits behind the [`Physics`] trait.
//! [`KinematicWorld`] is the built-in engine: axis-aligned boxes with
//! gravity, a speed clamp, static obstacles and world bounds.

use crate::config::WorldConfig;
use log::debug;
use shared::PLAYER_SIZE;
use std::collections::HashMap;

///Represents a vector in 2D space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector2 {
    ///Value along the x-axis.
    pub x: f32,
    ///Value along the y-axis.
    pub y: f32,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    ///Returns the magnitude of the vector.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    ///Returns the normalized vector, or zero for a zero vector.
    pub fn normalize(&self) -> Vector2 {
        let mag = self.magnitude();
        if mag == 0.0 || !mag.is_finite() {
            Vector2::ZERO
        } else {
            Vector2 {
                x: self.x / mag,
                y: self.y / mag,
            }
        }
    }

    pub fn scale(&self, scalar: f32) -> Vector2 {
        Vector2 {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }

    pub fn add(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }
}

/// Opaque handle to a body owned by a physics engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BodyHandle(u32);

/// Position and velocity of a body after the latest step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform {
    pub position: Vector2,
    pub velocity: Vector2,
}

/// The services the world needs from a physics engine.
pub trait Physics: Send {
    fn add_body(&mut self, position: Vector2) -> BodyHandle;

    /// Returns false if the body was unknown.
    fn remove_body(&mut self, body: BodyHandle) -> bool;

    fn set_velocity(&mut self, body: BodyHandle, velocity: Vector2);

    fn step(&mut self, dt: f32);

    fn transform(&self, body: BodyHandle) -> Option<Transform>;

    fn body_count(&self) -> usize;
}

/// Builds the default engine for the configured world.
pub fn create_world(config: &WorldConfig) -> KinematicWorld {
    let mut world = KinematicWorld::new(config.width, config.height, config.gravity)
        .with_max_speed(config.max_speed);
    for obstacle in &config.obstacles {
        world.add_object(
            Vector2::new(obstacle.x, obstacle.y),
            obstacle.width,
            obstacle.height,
        );
    }
    world
}

///Represents a static object in 2D space.
#[derive(Debug, Clone, Copy)]
pub struct Object {
    pub width: f32,
    pub height: f32,
    ///The positional center of the object.
    pub position: Vector2,
}

///Represents a dynamic object in 2D space.
#[derive(Debug, Clone, Copy)]
pub struct DynamicObject {
    pub object: Object,
    pub velocity: Vector2,
    pub max_speed: f32,
    pub grounded: bool,
}

impl DynamicObject {
    fn new(position: Vector2, max_speed: f32) -> Self {
        Self {
            object: Object {
                width: PLAYER_SIZE,
                height: PLAYER_SIZE,
                position,
            },
            velocity: Vector2::ZERO,
            max_speed,
            grounded: false,
        }
    }

    ///Integrates gravity and velocity over `dt`.
    pub fn simulate(&mut self, dt: f32, gravity: f32) {
        if !self.grounded {
            self.velocity.y += gravity * dt;
        }

        let speed = self.velocity.magnitude();
        if speed > self.max_speed {
            self.velocity = self.velocity.normalize().scale(self.max_speed);
        }

        self.object.position = self.object.position.add(&self.velocity.scale(dt));
    }

    ///Pushes the object out of every overlapping static object along the
    ///axis of shallowest penetration. Returns true if anything collided.
    pub fn resolve_collisions(&mut self, others: &[Object]) -> bool {
        let mut collided = false;
        for other in others {
            let self_left = self.object.position.x - self.object.width / 2.0;
            let self_right = self.object.position.x + self.object.width / 2.0;
            let self_top = self.object.position.y + self.object.height / 2.0;
            let self_bottom = self.object.position.y - self.object.height / 2.0;

            let other_left = other.position.x - other.width / 2.0;
            let other_right = other.position.x + other.width / 2.0;
            let other_top = other.position.y + other.height / 2.0;
            let other_bottom = other.position.y - other.height / 2.0;

            let collision = !(self_right <= other_left
                || self_left >= other_right
                || self_bottom >= other_top
                || self_top <= other_bottom);

            if !collision {
                continue;
            }

            let overlap_x = (self_right.min(other_right) - self_left.max(other_left)).abs();
            let overlap_y = (self_top.min(other_top) - self_bottom.max(other_bottom)).abs();

            if overlap_x < overlap_y {
                if self.object.position.x < other.position.x {
                    self.object.position.x = other_left - self.object.width / 2.0;
                } else {
                    self.object.position.x = other_right + self.object.width / 2.0;
                }
                self.velocity.x = 0.0;
            } else {
                if self.object.position.y < other.position.y {
                    self.object.position.y = other_bottom - self.object.height / 2.0;
                } else {
                    self.object.position.y = other_top + self.object.height / 2.0;
                }
                self.velocity.y = 0.0;
            }
            collided = true;
        }
        collided
    }

    /// Updates `grounded`: true when resting on top of any static object.
    pub fn check_grounded(&mut self, others: &[Object]) {
        let tolerance = 0.1;

        let self_left = self.object.position.x - self.object.width / 2.0;
        let self_right = self.object.position.x + self.object.width / 2.0;
        let self_bottom = self.object.position.y - self.object.height / 2.0;

        self.grounded = others.iter().any(|other| {
            let other_left = other.position.x - other.width / 2.0;
            let other_right = other.position.x + other.width / 2.0;
            let other_top = other.position.y + other.height / 2.0;

            let horizontal_overlap = self_right > other_left && self_left < other_right;
            let vertical_touching = (self_bottom - other_top).abs() < tolerance;

            horizontal_overlap && vertical_touching && self.object.position.y > other.position.y
        });
    }

    fn clamp_to_bounds(&mut self, width: f32, height: f32) {
        let half_w = self.object.width / 2.0;
        let half_h = self.object.height / 2.0;

        let x = self.object.position.x.clamp(half_w, (width - half_w).max(half_w));
        let y = self.object.position.y.clamp(half_h, (height - half_h).max(half_h));

        if x != self.object.position.x {
            self.velocity.x = 0.0;
        }
        if y != self.object.position.y {
            self.velocity.y = 0.0;
        }
        self.object.position = Vector2::new(x, y);
    }
}

/// Built-in engine. Body positions are box centers.
pub struct KinematicWorld {
    width: f32,
    height: f32,
    gravity: f32,
    max_speed: f32,
    objects: Vec<Object>,
    bodies: HashMap<BodyHandle, DynamicObject>,
    next_body: u32,
}

impl KinematicWorld {
    pub fn new(width: f32, height: f32, gravity: f32) -> Self {
        Self {
            width,
            height,
            gravity,
            max_speed: f32::INFINITY,
            objects: Vec::new(),
            bodies: HashMap::new(),
            next_body: 0,
        }
    }

    /// Adds a static obstacle centered at `position`.
    pub fn add_object(&mut self, position: Vector2, width: f32, height: f32) {
        self.objects.push(Object {
            width,
            height,
            position,
        });
    }

    /// Speed limit applied to bodies added from now on.
    pub fn with_max_speed(mut self, max_speed: f32) -> Self {
        self.max_speed = max_speed;
        self
    }
}

impl Physics for KinematicWorld {
    fn add_body(&mut self, position: Vector2) -> BodyHandle {
        let handle = BodyHandle(self.next_body);
        self.next_body = self.next_body.wrapping_add(1);

        let mut body = DynamicObject::new(position, self.max_speed);
        body.clamp_to_bounds(self.width, self.height);
        self.bodies.insert(handle, body);

        debug!("Added body {:?} at ({}, {})", handle, position.x, position.y);
        handle
    }

    fn remove_body(&mut self, body: BodyHandle) -> bool {
        self.bodies.remove(&body).is_some()
    }

    fn set_velocity(&mut self, body: BodyHandle, velocity: Vector2) {
        if let Some(dynamic) = self.bodies.get_mut(&body) {
            dynamic.velocity = velocity;
        }
    }

    fn step(&mut self, dt: f32) {
        for body in self.bodies.values_mut() {
            body.simulate(dt, self.gravity);
            body.resolve_collisions(&self.objects);
            body.clamp_to_bounds(self.width, self.height);
            body.check_grounded(&self.objects);
        }
    }

    fn transform(&self, body: BodyHandle) -> Option<Transform> {
        self.bodies.get(&body).map(|dynamic| Transform {
            position: dynamic.object.position,
            velocity: dynamic.velocity,
        })
    }

    fn body_count(&self) -> usize {
        self.bodies.len()
    }
}
