//! # Queries
//!
//! A query visits every entity carrying all of a set of component types,
//! handing out mutable references to each.
//!
//! The repositories involved are checked out of the registry for the
//! duration of the iteration, so several can be borrowed mutably at once.
//! The closure never sees the world, which rules out structural changes
//! while iterating. The repositories go back even if the closure panics.

use std::any::TypeId;

use super::component::Component;
use super::entity::EntityHandle;
use super::registry::ComponentRegistry;
use super::storage::ComponentRepository;
use super::world::World;

/// A set of component types that can be iterated together.
///
/// Implemented for tuples of one to five [`Component`] types.
pub trait Query {
    /// The references handed to the closure for one entity.
    type Item<'a>;

    /// Visits every matching entity in slot order.
    ///
    /// Entities inside an unfinished instancing batch are skipped.
    fn for_each<F>(world: &mut World, f: F)
    where
        F: FnMut(EntityHandle, Self::Item<'_>);
}

fn has_duplicates(types: &[TypeId]) -> bool {
    types
        .iter()
        .enumerate()
        .any(|(i, a)| types[i + 1..].contains(a))
}

macro_rules! impl_query {
    ($(($ty:ident, $repo:ident)),+) => {
        impl<$($ty: Component),+> Query for ($($ty,)+) {
            type Item<'a> = ($(&'a mut $ty,)+);

            fn for_each<F>(world: &mut World, mut f: F)
            where
                F: FnMut(EntityHandle, Self::Item<'_>),
            {
                if has_duplicates(&[$(TypeId::of::<$ty>()),+]) {
                    tracing::warn!(
                        "[{}] query names a component type twice; nothing visited",
                        world.config.label
                    );
                    return;
                }

                // Hands the repositories back on every exit, unwinding included
                struct Checkout<'r, $($ty: Component),+> {
                    registry: &'r mut ComponentRegistry,
                    $($repo: Option<Box<ComponentRepository<$ty>>>,)+
                }

                impl<$($ty: Component),+> Drop for Checkout<'_, $($ty),+> {
                    fn drop(&mut self) {
                        $(if let Some(repository) = self.$repo.take() {
                            self.registry.restore(repository);
                        })+
                    }
                }

                let entities = &world.entities;
                let mut checkout = Checkout {
                    registry: &mut world.registry,
                    $($repo: None,)+
                };
                $(checkout.$repo = checkout.registry.take::<$ty>();)+

                if let ($(Some($repo),)+) = ($(checkout.$repo.as_deref_mut(),)+) {
                    for index in 0..entities.slot_count() {
                        let Some(entity) = entities.queryable_at(index) else {
                            continue;
                        };
                        if let ($(Some($repo),)+) = ($($repo.get_mut(index),)+) {
                            f(entity, ($($repo,)+));
                        }
                    }
                }
            }
        }
    };
}

impl_query!((A, a));
impl_query!((A, a), (B, b));
impl_query!((A, a), (B, b), (C, c));
impl_query!((A, a), (B, b), (C, c), (D, d));
impl_query!((A, a), (B, b), (C, c), (D, d), (E, e));

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct Position(f32);
    impl Component for Position {}

    #[derive(Debug, Default)]
    struct Velocity(f32);
    impl Component for Velocity {}

    #[derive(Debug, Default)]
    struct Frozen;
    impl Component for Frozen {}

    #[test]
    fn test_duplicate_detection() {
        let a = TypeId::of::<Position>();
        let b = TypeId::of::<Velocity>();
        assert!(!has_duplicates(&[a, b]));
        assert!(has_duplicates(&[a, b, a]));
    }

    #[test]
    fn test_single_type_query() {
        let mut world = World::new();
        let a = world.create_entity();
        let b = world.create_entity();
        world.add_component::<Position>(a);
        world.add_component::<Position>(b);

        let mut seen = Vec::new();
        world.for_each::<(Position,)>(|entity, (p,)| {
            p.0 += 1.0;
            seen.push(entity);
        });
        assert_eq!(seen, vec![a, b]);
        assert_eq!(world.get_component::<Position>(a), Some(&Position(1.0)));
    }

    #[test]
    fn test_query_requires_every_type() {
        let mut world = World::new();
        let moving = world.create_entity();
        let still = world.create_entity();
        world.add_component::<Position>(moving);
        world.add_component::<Velocity>(moving).unwrap().0 = 3.0;
        world.add_component::<Position>(still);

        let mut visited = Vec::new();
        world.for_each::<(Position, Velocity)>(|entity, (p, v)| {
            p.0 += v.0;
            visited.push(entity);
        });
        assert_eq!(visited, vec![moving]);
        assert_eq!(world.get_component::<Position>(moving), Some(&Position(3.0)));
        assert_eq!(world.get_component::<Position>(still), Some(&Position(0.0)));
    }

    #[test]
    fn test_unregistered_type_matches_nothing() {
        let mut world = World::new();
        let e = world.create_entity();
        world.add_component::<Position>(e);

        let mut count = 0;
        world.for_each::<(Position, Frozen)>(|_, _| count += 1);
        assert_eq!(count, 0);

        // Repositories were handed back
        assert!(world.get_component::<Position>(e).is_some());
    }

    #[test]
    fn test_duplicate_types_visit_nothing() {
        let mut world = World::new();
        let e = world.create_entity();
        world.add_component::<Position>(e);

        let mut count = 0;
        world.for_each::<(Position, Position)>(|_, _| count += 1);
        assert_eq!(count, 0);
        assert!(world.has_component::<Position>(e));
    }

    #[test]
    fn test_panicking_closure_returns_repositories() {
        let mut world = World::new();
        let e = world.create_entity();
        world.add_component::<Position>(e);
        world.add_component::<Velocity>(e);

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            world.for_each::<(Position, Velocity)>(|_, _| panic!("closure failed"));
        }));
        assert!(outcome.is_err());

        assert_eq!(world.get_component::<Position>(e), Some(&Position(0.0)));
        let other = world.create_entity();
        assert!(world.try_add_component::<Velocity>(other).is_ok());

        let mut count = 0;
        world.for_each::<(Position, Velocity)>(|_, _| count += 1);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_five_type_query() {
        #[derive(Default)]
        struct C3(u8);
        impl Component for C3 {}
        #[derive(Default)]
        struct C4(u8);
        impl Component for C4 {}

        let mut world = World::new();
        let e = world.create_entity();
        world.add_component::<Position>(e);
        world.add_component::<Velocity>(e);
        world.add_component::<Frozen>(e);
        world.add_component::<C3>(e);
        world.add_component::<C4>(e);

        let mut count = 0;
        world.for_each::<(Position, Velocity, Frozen, C3, C4)>(|_, (_, _, _, c3, c4)| {
            c3.0 = 1;
            c4.0 = 2;
            count += 1;
        });
        assert_eq!(count, 1);
        assert_eq!(world.get_component::<C4>(e).map(|c| c.0), Some(2));
    }
}
