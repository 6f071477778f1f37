//! # Interface Lookup Tests
//!
//! Components registered against a trait can be found without naming their
//! concrete types.

use ember_core::{Component, Implements, World};

trait Damageable {
    fn take_damage(&mut self, amount: u32);
    fn remaining(&self) -> u32;
}

#[derive(Default)]
struct Hull(u32);
impl Component for Hull {}

#[derive(Default)]
struct Shield(u32);
impl Component for Shield {}

#[derive(Default)]
struct Cargo;
impl Component for Cargo {}

impl Damageable for Hull {
    fn take_damage(&mut self, amount: u32) {
        self.0 = self.0.saturating_sub(amount);
    }
    fn remaining(&self) -> u32 {
        self.0
    }
}

impl Damageable for Shield {
    fn take_damage(&mut self, amount: u32) {
        self.0 = self.0.saturating_sub(amount * 2);
    }
    fn remaining(&self) -> u32 {
        self.0
    }
}

impl Implements<dyn Damageable> for Hull {
    fn as_interface(&self) -> &(dyn Damageable + 'static) {
        self
    }
    fn as_interface_mut(&mut self) -> &mut (dyn Damageable + 'static) {
        self
    }
}

impl Implements<dyn Damageable> for Shield {
    fn as_interface(&self) -> &(dyn Damageable + 'static) {
        self
    }
    fn as_interface_mut(&mut self) -> &mut (dyn Damageable + 'static) {
        self
    }
}

#[test]
fn get_interfaces_collects_every_implementor() {
    let mut world = World::new();
    world.register_interface::<Hull, dyn Damageable>();
    world.register_interface::<Shield, dyn Damageable>();

    let ship = world.create_entity();
    world.add_component::<Hull>(ship).unwrap().0 = 100;
    world.add_component::<Shield>(ship).unwrap().0 = 50;
    world.add_component::<Cargo>(ship);

    let remaining: Vec<_> = world
        .get_interfaces::<dyn Damageable>(ship)
        .iter()
        .map(|d| d.remaining())
        .collect();
    assert_eq!(remaining, vec![100, 50]);
}

#[test]
fn for_each_interface_mutates_in_place() {
    let mut world = World::new();
    world.register_interface::<Hull, dyn Damageable>();
    world.register_interface::<Shield, dyn Damageable>();

    let ship = world.create_entity();
    world.add_component::<Hull>(ship).unwrap().0 = 100;
    world.add_component::<Shield>(ship).unwrap().0 = 50;
    let wreck = world.create_entity();
    world.add_component::<Hull>(wreck).unwrap().0 = 5;

    let mut visits = 0;
    world.for_each_interface::<dyn Damageable>(|_, target| {
        target.take_damage(10);
        visits += 1;
    });

    assert_eq!(visits, 3);
    assert_eq!(world.get_component::<Hull>(ship).unwrap().0, 90);
    assert_eq!(world.get_component::<Shield>(ship).unwrap().0, 30);
    assert_eq!(world.get_component::<Hull>(wreck).unwrap().0, 0);
}

#[test]
fn unregistered_interface_finds_nothing() {
    let mut world = World::new();
    let ship = world.create_entity();
    world.add_component::<Hull>(ship);
    assert!(world.get_interfaces::<dyn Damageable>(ship).is_empty());
}
