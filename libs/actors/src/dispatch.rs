//! Explicit dispatch tables
//!
//! Each actor type declares its callable methods once, mapping a wire method
//! name to a statically typed handler. Argument lists are decoded into the
//! handler's parameter tuple through `FromArgs` at the moment of dispatch.
//!
//! ```rust
//! use hive_actors::{Actor, ActorContext, DispatchTable};
//!
//! #[derive(Default)]
//! struct Counter {
//!     total: i64,
//! }
//!
//! impl Actor for Counter {
//!     fn dispatch_table() -> DispatchTable<Self> {
//!         DispatchTable::new()
//!             .method("Add", |c: &mut Counter, _ctx: &mut ActorContext<Counter>, (n,): (i64,)| {
//!                 c.total += n;
//!             })
//!             .call("Total", |c: &mut Counter, _ctx: &mut ActorContext<Counter>, (): ()| {
//!                 Ok::<_, String>((c.total,))
//!             })
//!     }
//! }
//! ```

use hive_types::{Arg, ArgError, FromArgs, IntoArgs};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::warn;

use crate::actor::{Actor, ActorContext};

/// Result of running one handler.
pub(crate) enum Outcome {
    /// Fire-and-forget handler finished.
    Done,
    /// Call handler produced a result.
    Reply(Vec<Arg>),
    /// Call handler returned an application error.
    Failed(String),
}

pub(crate) type Handler<A> =
    Box<dyn Fn(&mut A, &mut ActorContext<A>, Vec<Arg>) -> Result<Outcome, ArgError> + Send + Sync>;

/// Method name → typed handler for actor type `A`.
pub struct DispatchTable<A: Actor> {
    handlers: HashMap<String, Handler<A>>,
}

impl<A: Actor> DispatchTable<A> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler with no result.
    pub fn method<Args, F>(self, name: &str, handler: F) -> Self
    where
        Args: FromArgs + 'static,
        F: Fn(&mut A, &mut ActorContext<A>, Args) + Send + Sync + 'static,
    {
        self.insert(
            name,
            Box::new(move |actor, ctx, args| {
                let args = Args::from_args(args)?;
                handler(actor, ctx, args);
                Ok(Outcome::Done)
            }),
        )
    }

    /// Register a handler whose result is sent back to callers.
    pub fn call<Args, R, E, F>(self, name: &str, handler: F) -> Self
    where
        Args: FromArgs + 'static,
        R: IntoArgs + 'static,
        E: fmt::Display + 'static,
        F: Fn(&mut A, &mut ActorContext<A>, Args) -> Result<R, E> + Send + Sync + 'static,
    {
        self.insert(
            name,
            Box::new(move |actor, ctx, args| {
                let args = Args::from_args(args)?;
                Ok(match handler(actor, ctx, args) {
                    Ok(result) => Outcome::Reply(result.into_args()),
                    Err(e) => Outcome::Failed(e.to_string()),
                })
            }),
        )
    }

    fn insert(mut self, name: &str, handler: Handler<A>) -> Self {
        if self.handlers.insert(name.to_string(), handler).is_some() {
            warn!(actor = %A::actor_name(), method = %name, "Dispatch entry replaced");
        }
        self
    }

    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    pub fn method_names(&self) -> HashSet<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub(crate) fn get(&self, method: &str) -> Option<&Handler<A>> {
        self.handlers.get(method)
    }
}

impl<A: Actor> Default for DispatchTable<A> {
    fn default() -> Self {
        Self::new()
    }
}
