use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Name of the group every engine starts with. It matches every actor.
pub const ALL_GROUP: &str = "all";

/// Membership test for a named group of actors.
///
/// Predicates run inline during evaluation and must not block.
pub trait GroupPredicate<A: ?Sized>: Send + Sync {
    fn matches(&self, actor: &A) -> bool;
}

impl<A: ?Sized, F> GroupPredicate<A> for F
where
    F: Fn(&A) -> bool + Send + Sync,
{
    fn matches(&self, actor: &A) -> bool {
        self(actor)
    }
}

struct AllActors;

impl<A: ?Sized> GroupPredicate<A> for AllActors {
    fn matches(&self, _actor: &A) -> bool {
        true
    }
}

/// Process-local mapping of group name to predicate.
pub struct GroupRegistry<A: ?Sized> {
    predicates: HashMap<String, Arc<dyn GroupPredicate<A>>>,
}

impl<A: ?Sized> GroupRegistry<A> {
    pub fn new() -> Self {
        let mut predicates: HashMap<String, Arc<dyn GroupPredicate<A>>> = HashMap::new();
        predicates.insert(ALL_GROUP.to_string(), Arc::new(AllActors));
        Self { predicates }
    }

    /// Registers `predicate` under `group`, replacing any previous definition.
    pub fn define<P>(&mut self, group: impl Into<String>, predicate: P)
    where
        P: GroupPredicate<A> + 'static,
    {
        self.predicates.insert(group.into(), Arc::new(predicate));
    }

    pub fn is_defined(&self, group: &str) -> bool {
        self.predicates.contains_key(group)
    }

    /// Unknown groups never match.
    pub fn active_in_group(&self, group: &str, actor: &A) -> bool {
        self.predicates
            .get(group)
            .is_some_and(|predicate| predicate.matches(actor))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.predicates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl<A: ?Sized> Default for GroupRegistry<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: ?Sized> fmt::Debug for GroupRegistry<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupRegistry")
            .field("groups", &self.names())
            .finish()
    }
}
