//! The context factory: a zero-sized type parameterized by a component,
//! queue, and resource enumeration, used to construct worlds and run
//! capability-checked systems against them.

use std::{marker::PhantomData, sync::Arc};

use crate::{
    block_pool::BlockPool,
    component::ComponentSet,
    key::KeyGenerator,
    queue_set::QueueSet,
    resource::ResourceSet,
    view::{View, ViewCaps},
    world::World,
};

/// `Context<C, Q, R>` carries no state of its own; it exists to name the
/// three type parameters once at the call site instead of repeating them on
/// every `World`/`View` constructor.
pub struct Context<C: ComponentSet, Q: QueueSet = crate::queue_set::NoQueues, R: ResourceSet = crate::resource::NoResources> {
    _marker: PhantomData<fn() -> (C, Q, R)>,
}

impl<C: ComponentSet, Q: QueueSet, R: ResourceSet> Context<C, Q, R> {
    pub fn create_world(pool: Arc<BlockPool>, keygen: Arc<KeyGenerator>) -> World<C, Q, R> {
        World::create(pool, keygen)
    }

    /// Constructs a view scoped to `caps` and runs `system` against it,
    /// returning whatever `system` returns. Callables may be
    /// fallible; a `system` returning `Result` simply makes `Out` a
    /// `Result`, and `eval` propagates it unexamined.
    pub fn eval<Out>(
        world: &World<C, Q, R>,
        caps: ViewCaps<C, Q, R>,
        system: impl FnOnce(View<'_, C, Q, R>) -> Out,
    ) -> Out {
        system(View::new(world, caps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{component::Template, define_components, key::Key};

    define_components! {
        pub enum Demo { X: u32 }
    }

    type Ctx = Context<Demo>;

    #[test]
    fn eval_runs_system_against_a_fresh_view() {
        let pool = Arc::new(BlockPool::new(4096, true));
        let keygen = Arc::new(KeyGenerator::new());
        let mut world = Ctx::create_world(pool, keygen);

        let key = world.queue_create(Template::new().with::<X>(5)).unwrap();
        world.resolve().unwrap();

        let value: Option<Key> = Ctx::eval(&world, ViewCaps::new().read::<X>(), |view| {
            view.entity(key).map(|e| e.key())
        });

        assert_eq!(value, Some(key));
    }

    #[test]
    fn eval_propagates_fallible_system_results() {
        let pool = Arc::new(BlockPool::new(4096, true));
        let keygen = Arc::new(KeyGenerator::new());
        let world = Ctx::create_world(pool, keygen);

        let result: Result<(), &'static str> = Ctx::eval(&world, ViewCaps::new(), |_view| Err("system failed"));
        assert_eq!(result, Err("system failed"));
    }
}
