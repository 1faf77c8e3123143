//! World-scoped resources: a concrete surface for the `Resources` type
//! parameter the context factory names. Unlike a component, a resource is
//! stored once per `World`, not once per entity; it is declared the same
//! way a component set is declared (one marker type per field) but read
//! back through `View::resource`/`resource_mut` instead of a page column.

use std::any::Any;

/// Implemented once per declared resource enumeration by
/// [`define_resources!`]. Mirrors [`ComponentSet`](crate::component::ComponentSet)'s
/// shape: a runtime index in `0..COUNT`, keyed to a default-constructor
/// function table built in declaration order.
pub trait ResourceSet: 'static + Send + Sync {
    const COUNT: usize;

    fn name(index: usize) -> &'static str;

    /// Default-constructs resource `index`'s value, boxed and type-erased.
    /// Every declared resource type must implement `Default`; a world
    /// always has exactly one live value per resource slot from
    /// construction onward; there's no "absent resource" the way there's
    /// an "absent component" on an entity.
    fn default_erased(index: usize) -> Box<dyn Any + Send + Sync>;
}

/// The empty resource set, used as `World`'s default `R` parameter for
/// contexts that declare no resources of their own.
pub struct NoResources;

impl ResourceSet for NoResources {
    const COUNT: usize = 0;

    fn name(_index: usize) -> &'static str {
        unreachable!("NoResources has no fields")
    }

    fn default_erased(_index: usize) -> Box<dyn Any + Send + Sync> {
        unreachable!("NoResources has no fields")
    }
}

/// A compile-time marker naming one resource slot of an `R: ResourceSet`,
/// carrying its value type and positional index as associated items.
pub trait ResourceMember<R: ResourceSet>: 'static {
    type Value: 'static + Send + Sync;
    const INDEX: usize;
    const NAME: &'static str;
}

/// Declares a zero-sized `ResourceSet` marker type plus one zero-sized
/// `ResourceMember` marker type per field. Every field's value type must
/// implement `Default`.
///
/// ```ignore
/// define_resources! {
///     pub enum Demo {
///         FrameCount: u64,
///     }
/// }
/// ```
#[macro_export]
macro_rules! define_resources {
    ($vis:vis enum $name:ident { $($member:ident : $value:ty),* $(,)? }) => {
        $crate::__define_resource_set! {
            $vis $name []
            0usize
            $($member : $value),*
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __define_resource_set {
    (
        $vis:vis $name:ident
        [$($acc_member:ident : $acc_value:ty = $acc_idx:expr),*]
        $next:expr
        $(,)?
    ) => {
        $vis struct $name;

        impl $crate::resource::ResourceSet for $name {
            const COUNT: usize = $next;

            fn name(index: usize) -> &'static str {
                const NAMES: &[&str] = &[ $(::std::stringify!($acc_member)),* ];
                NAMES[index]
            }

            fn default_erased(index: usize) -> ::std::boxed::Box<dyn ::std::any::Any + Send + Sync> {
                type DefaultFn = fn() -> ::std::boxed::Box<dyn ::std::any::Any + Send + Sync>;
                const DEFAULTS: &[DefaultFn] = &[
                    $(|| ::std::boxed::Box::new(<$acc_value as ::std::default::Default>::default())),*
                ];
                (DEFAULTS[index])()
            }
        }

        $(
            #[allow(non_camel_case_types)]
            $vis struct $acc_member;

            impl $crate::resource::ResourceMember<$name> for $acc_member {
                type Value = $acc_value;
                const INDEX: usize = $acc_idx;
                const NAME: &'static str = ::std::stringify!($acc_member);
            }
        )*
    };

    (
        $vis:vis $name:ident
        [$($acc_member:ident : $acc_value:ty = $acc_idx:expr),*]
        $next:expr,
        $member:ident : $value:ty
        $(, $($rest:tt)*)?
    ) => {
        $crate::__define_resource_set! {
            $vis $name
            [$($acc_member : $acc_value = $acc_idx,)* $member : $value = $next]
            ($next + 1usize)
            $($($rest)*)?
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    define_resources! {
        pub enum Demo {
            FrameCount: u64,
        }
    }

    #[test]
    fn default_erased_roundtrip() {
        assert_eq!(Demo::COUNT, 1);
        let boxed = Demo::default_erased(FrameCount::INDEX);
        assert_eq!(*boxed.downcast::<u64>().unwrap(), 0);
    }
}
