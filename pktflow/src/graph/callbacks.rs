//! User callback shapes.
//!
//! Each stage kind accepts a closed set of callback signatures; the builder
//! selects the variant at construction, so the hot path never inspects
//! types. Scalar callbacks run once per packet, vector callbacks once per
//! burst.

use std::any::Any;

use crate::mbuf::Mbuf;

/// Per-replica user state carried alongside clonable stages.
///
/// The builder stores the context as a prototype; every replica starts from
/// its own clone, so plain mutable state needs no synchronization and shared
/// state goes through `Arc` fields inside the context.
///
/// A blanket impl covers any `Clone + Send + 'static` type; callbacks
/// recover the concrete type with [`as_any_mut`](UserContext::as_any_mut):
///
/// ```
/// use pktflow::{Mbuf, UserContext};
///
/// #[derive(Clone)]
/// struct Counter(u64);
///
/// fn count(_pkt: &mut Mbuf, ctx: Option<&mut dyn UserContext>) {
///     let counter: &mut Counter = ctx
///         .and_then(|c| c.as_any_mut().downcast_mut())
///         .expect("counter context");
///     counter.0 += 1;
/// }
/// ```
pub trait UserContext: Send {
    fn clone_box(&self) -> Box<dyn UserContext>;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Clone + Send + Any> UserContext for T {
    fn clone_box(&self) -> Box<dyn UserContext> {
        Box::new(self.clone())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Fills a freshly allocated packet.
pub type GenerateFn = fn(&mut Mbuf, Option<&mut (dyn UserContext + '_)>);

/// Fills a whole burst of freshly allocated packets.
pub type VectorGenerateFn = fn(&mut [&mut Mbuf], Option<&mut (dyn UserContext + '_)>);

/// Inspects or rewrites a packet in place. Freeing is prohibited here; the
/// handle moves on to the stage's output unchanged.
pub type HandleFn = fn(&mut Mbuf, Option<&mut (dyn UserContext + '_)>);

/// Burst form of [`HandleFn`].
pub type VectorHandleFn = fn(&mut [&mut Mbuf], Option<&mut (dyn UserContext + '_)>);

/// Decides a packet's branch: `true` keeps it in the input flow, `false`
/// sends it to the separated flow.
pub type SeparateFn = fn(&Mbuf, Option<&mut (dyn UserContext + '_)>) -> bool;

/// Burst form of [`SeparateFn`]; fills `mask[i]` for each packet.
pub type VectorSeparateFn = fn(&[&mut Mbuf], &mut [bool], Option<&mut (dyn UserContext + '_)>);

/// Picks an output flow index in `0..n` for a packet. Index 0 is
/// conventionally the drop flow with a stopper attached.
pub type SplitFn = fn(&Mbuf, Option<&mut (dyn UserContext + '_)>) -> usize;

/// Callback accepted by [`set_generator`](crate::GraphBuilder::set_generator).
#[derive(Clone, Copy)]
pub enum GenerateCallback {
    Scalar(GenerateFn),
    Vector(VectorGenerateFn),
}

/// Callback accepted by [`set_handler`](crate::GraphBuilder::set_handler).
///
/// The `Filter` shapes make a handler behave as a separator whose false
/// branch is the stop ring: returning `false` drops the packet. Prefer the
/// explicit separator-plus-stopper wiring where clarity matters.
#[derive(Clone, Copy)]
pub enum HandleCallback {
    Scalar(HandleFn),
    Vector(VectorHandleFn),
    Filter(SeparateFn),
    VectorFilter(VectorSeparateFn),
}

/// Callback accepted by [`set_separator`](crate::GraphBuilder::set_separator).
#[derive(Clone, Copy)]
pub enum SeparateCallback {
    Scalar(SeparateFn),
    Vector(VectorSeparateFn),
}
