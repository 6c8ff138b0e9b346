//! Turning actors into the canonical string ids used for bucketing and
//! allow-lists.
//!
//! An actor is whatever the host application evaluates flags for. The engine
//! never looks inside it: it asks an [`ActorIdentifier`] for an id and only
//! compares and hashes that id.

/// Actors that already are ids (strings and integers).
pub trait PrimitiveActor {
    fn primitive_id(&self) -> String;
}

impl PrimitiveActor for str {
    fn primitive_id(&self) -> String {
        self.to_string()
    }
}

impl PrimitiveActor for String {
    fn primitive_id(&self) -> String {
        self.clone()
    }
}

macro_rules! integer_actor {
    ($($t:ty),*) => {
        $(
            impl PrimitiveActor for $t {
                fn primitive_id(&self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

integer_actor!(i32, i64, u32, u64, usize);

/// Strategy deriving an actor's id. `None` means the actor has no usable id.
pub trait ActorIdentifier<A: ?Sized>: Send + Sync {
    fn actor_id(&self, actor: &A) -> Option<String>;
}

/// Uses the actor itself as its id.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrimitiveId;

impl<A: PrimitiveActor + ?Sized> ActorIdentifier<A> for PrimitiveId {
    fn actor_id(&self, actor: &A) -> Option<String> {
        Some(actor.primitive_id())
    }
}

impl<A: ?Sized, F> ActorIdentifier<A> for F
where
    F: Fn(&A) -> Option<String> + Send + Sync,
{
    fn actor_id(&self, actor: &A) -> Option<String> {
        self(actor)
    }
}
