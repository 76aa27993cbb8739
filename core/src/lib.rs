//! # UMA Tickets Core
//!
//! Functional-core abstractions shared by the ticketing backend.
//!
//! Business rules are written as reducers: pure functions of
//! `(State, Action, Environment) → (State, Effects)`. Effects are *descriptions*
//! of I/O (pay an invoice, push a payment request) that the imperative shell
//! executes, feeding any resulting action back into the reducer.
//!
//! ```ignore
//! impl Reducer for LifecycleReducer {
//!     type State = PaymentLifecycle;
//!     type Action = LifecycleAction;
//!     type Environment = LifecycleEnvironment;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut PaymentLifecycle,
//!         action: LifecycleAction,
//!         env: &LifecycleEnvironment,
//!     ) -> SmallVec<[Effect<LifecycleAction>; 4]> {
//!         // Decide, mutate state, describe effects
//!         SmallVec::new()
//!     }
//! }
//! ```

pub use smallvec::{SmallVec, smallvec};

/// Reducer module - the core trait for business logic
pub mod reducer {
    use super::SmallVec;
    use super::effect::Effect;

    /// Pure business logic over a piece of state.
    ///
    /// Implementations must not perform I/O. Anything that talks to the outside
    /// world is returned as an [`Effect`] for the caller to run.
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - side effect descriptions and their execution
pub mod effect {
    use futures::future::BoxFuture;
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

    /// A side effect to be executed after a reducer returns.
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Run effects concurrently
        Parallel(Vec<Effect<Action>>),

        /// Run effects one after another
        Sequential(Vec<Effect<Action>>),

        /// Dispatch an action after a delay
        Delay {
            /// How long to wait
            duration: Duration,
            /// Action to dispatch after delay
            action: Box<Action>,
        },

        /// Arbitrary async computation. A `Some` result is fed back into the reducer.
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
    }

    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Parallel(effects) => {
                    f.debug_tuple("Effect::Parallel").field(effects).finish()
                },
                Effect::Sequential(effects) => {
                    f.debug_tuple("Effect::Sequential").field(effects).finish()
                },
                Effect::Delay { duration, action } => f
                    .debug_struct("Effect::Delay")
                    .field("duration", duration)
                    .field("action", action)
                    .finish(),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Wrap an async block as an effect
        pub fn future<F>(future: F) -> Self
        where
            F: Future<Output = Option<Action>> + Send + 'static,
        {
            Effect::Future(Box::pin(future))
        }

        /// Combine effects to run in parallel
        #[must_use]
        pub const fn merge(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Parallel(effects)
        }

        /// Chain effects to run sequentially
        #[must_use]
        pub const fn chain(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Sequential(effects)
        }
    }

    /// Execute an effect, returning every action it produced.
    ///
    /// Parallel children are joined; sequential children run in order and their
    /// outputs are concatenated in that order.
    pub fn execute<Action>(effect: Effect<Action>) -> BoxFuture<'static, Vec<Action>>
    where
        Action: Send + 'static,
    {
        Box::pin(async move {
            match effect {
                Effect::None => Vec::new(),
                Effect::Parallel(effects) => {
                    futures::future::join_all(effects.into_iter().map(execute))
                        .await
                        .into_iter()
                        .flatten()
                        .collect()
                },
                Effect::Sequential(effects) => {
                    let mut produced = Vec::new();
                    for effect in effects {
                        produced.extend(execute(effect).await);
                    }
                    produced
                },
                Effect::Delay { duration, action } => {
                    tokio::time::sleep(duration).await;
                    vec![*action]
                },
                Effect::Future(future) => future.await.into_iter().collect(),
            }
        })
    }
}

/// Environment module - dependency injection traits
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Abstracts time so reducers stay deterministic under test.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
