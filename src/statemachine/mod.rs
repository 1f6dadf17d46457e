//! # State Machine Engine
//!
//! Generic executor for the reconcilers' transition graphs.
//!
//! A reconciler declares its state vocabulary as an enum implementing
//! [`MachineState`] and its graph as a [`TransitionGraph`], which matches
//! exhaustively on that enum. [`StateMachine::execute`] runs exactly one
//! transition: the one for the current state. Tokens that are absent or not
//! part of the vocabulary resolve to the initial state.
//!
//! [`drive`] wraps one execution with the status store: it reads the
//! persisted token, runs the transition and persists the result only when
//! the state changed and the transition succeeded.

mod driver;

pub use driver::{drive, NextAction, PassOutcome};

use async_trait::async_trait;
use std::fmt::Debug;
use thiserror::Error;

/// State vocabulary of one reconciler
pub trait MachineState: Copy + Eq + Debug + Send + Sync + 'static {
    /// State an absent or unknown token resolves to
    const INITIAL: Self;

    /// Token persisted in the status
    fn as_str(&self) -> &'static str;

    /// Parse a persisted token; `None` for tokens outside the vocabulary
    fn from_token(token: &str) -> Option<Self>;

    fn parse_or_initial(token: Option<&str>) -> Self {
        token.and_then(Self::from_token).unwrap_or(Self::INITIAL)
    }
}

/// Transition functions of one reconciler
///
/// Implementations must be safe to call repeatedly for the same state:
/// "waiting" is expressed by returning the current state.
#[async_trait]
pub trait TransitionGraph: Send + Sync {
    type Target: Send + Sync;
    type State: MachineState;

    async fn transition(
        &self,
        target: &Self::Target,
        state: Self::State,
    ) -> anyhow::Result<Self::State>;
}

/// Failure of one state machine pass
#[derive(Debug, Error)]
pub enum StateMachineError {
    #[error("{machine} transition from {state} failed: {source:#}")]
    Transition {
        machine: &'static str,
        state: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("{machine} status store failed: {source}")]
    Status {
        machine: &'static str,
        #[source]
        source: crate::status::StatusStoreError,
    },
}

/// A named transition graph
#[derive(Debug)]
pub struct StateMachine<G> {
    name: &'static str,
    graph: G,
}

impl<G: TransitionGraph> StateMachine<G> {
    pub fn new(name: &'static str, graph: G) -> Self {
        Self { name, graph }
    }

    /// Key of this machine's slot in the status store
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    /// Run the transition registered for `token`
    ///
    /// Returns `(current, next)`, where `current` is the state the token
    /// resolved to.
    /// # Errors
    /// Returns the transition's error, tagged with machine and state
    pub async fn execute(
        &self,
        target: &G::Target,
        token: Option<&str>,
    ) -> Result<(G::State, G::State), StateMachineError> {
        let current = G::State::parse_or_initial(token);
        let next = self
            .graph
            .transition(target, current)
            .await
            .map_err(|source| StateMachineError::Transition {
                machine: self.name,
                state: current.as_str(),
                source,
            })?;
        Ok((current, next))
    }
}
