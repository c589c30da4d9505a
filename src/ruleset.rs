//! Rule sets: observable, stably ordered collections of rules.
//!
//! A [`RuleSet`] owns the rules of one generic function. Each added rule is
//! assigned a monotonically increasing sequence number (its [`RuleId`]) and
//! expanded through [`predicate_signatures`] into one or more [`ActionDef`]s.
//! Subscribed listeners (dispatch engines) are notified of every change, and
//! a late subscriber is brought up to date by replaying the current
//! definitions.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::action::{Body, MethodKind};
use crate::error::{DispatchError, DispatchResult};
use crate::signature::predicate_signatures;
use crate::value::Value;

/// A registered rule: a body guarded by a predicate.
#[derive(Debug, Clone)]
pub struct Rule {
    /// The callable installed when the predicate matches.
    pub body: Body,
    /// Signature or disjunction of signatures.
    pub predicate: Value,
    /// Method kind; `None` means the rule set's default (Primary).
    pub kind: Option<MethodKind>,
}

impl Rule {
    /// Primary-by-default rule.
    pub fn new(body: Body, predicate: Value) -> Self {
        Rule {
            body,
            predicate,
            kind: None,
        }
    }

    /// Set an explicit method kind.
    pub fn with_kind(mut self, kind: MethodKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        self.body == other.body && self.predicate == other.predicate && self.kind == other.kind
    }
}

/// Stable handle to a rule within its rule set (the rule's sequence number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(u64);

impl RuleId {
    /// The underlying sequence number.
    pub fn sequence(self) -> u64 {
        self.0
    }
}

/// One dispatchable definition a rule expands to.
#[derive(Debug, Clone)]
pub struct ActionDef {
    pub kind: MethodKind,
    pub body: Body,
    pub signature: Value,
    /// Insertion sequence; unique per rule set, never reused.
    pub sequence: u64,
}

/// Receiver of rule-set change notifications.
///
/// An implementation may fail for structural reasons (incompatible action
/// kinds at one signature); the failure propagates out of `add`/`remove`.
pub trait RuleListener: Send + Sync {
    fn actions_changed(&self, added: &[ActionDef], removed: &[ActionDef]) -> DispatchResult<()>;
}

/// An observable, stably-ordered collection of rules.
pub struct RuleSet {
    rules: Vec<(RuleId, Rule)>,
    actiondefs: HashMap<RuleId, Vec<ActionDef>>,
    listeners: Vec<Arc<dyn RuleListener>>,
    counter: u64,
    default_kind: MethodKind,
}

impl RuleSet {
    /// An empty rule set with Primary as the default method kind.
    pub fn new() -> Self {
        RuleSet {
            rules: Vec::new(),
            actiondefs: HashMap::new(),
            listeners: Vec::new(),
            counter: 0,
            default_kind: MethodKind::Primary,
        }
    }

    /// Add a rule, notifying subscribers.
    ///
    /// Adding a rule that is already present (same body identity, predicate,
    /// and kind) is a no-op returning the existing id, so registration is
    /// observably idempotent.
    pub fn add(&mut self, rule: Rule) -> DispatchResult<RuleId> {
        if let Some((id, _)) = self.rules.iter().find(|(_, r)| *r == rule) {
            return Ok(*id);
        }

        let id = RuleId(self.counter);
        self.counter += 1;

        let kind = rule.kind.unwrap_or(self.default_kind);
        let defs: Vec<ActionDef> = predicate_signatures(&rule.predicate)
            .into_iter()
            .map(|signature| ActionDef {
                kind,
                body: rule.body.clone(),
                signature,
                sequence: id.0,
            })
            .collect();

        debug!(sequence = id.0, kind = ?kind, defs = defs.len(), "rule added");
        self.rules.push((id, rule));
        self.actiondefs.insert(id, defs.clone());
        self.notify(&defs, &[])?;
        Ok(id)
    }

    /// Remove a rule by id, notifying subscribers.
    pub fn remove(&mut self, id: RuleId) -> DispatchResult<()> {
        let pos = self
            .rules
            .iter()
            .position(|(rid, _)| *rid == id)
            .ok_or(DispatchError::UnknownRule { sequence: id.0 })?;
        self.rules.remove(pos);
        let defs = self.actiondefs.remove(&id).unwrap_or_default();
        debug!(sequence = id.0, "rule removed");
        self.notify(&[], &defs)
    }

    fn notify(&self, added: &[ActionDef], removed: &[ActionDef]) -> DispatchResult<()> {
        for listener in &self.listeners {
            listener.actions_changed(added, removed)?;
        }
        Ok(())
    }

    /// Subscribe a listener, replaying the current definitions to it.
    pub fn subscribe(&mut self, listener: Arc<dyn RuleListener>) -> DispatchResult<()> {
        if !self.rules.is_empty() {
            let current = self.action_defs();
            listener.actions_changed(&current, &[])?;
        }
        self.listeners.push(listener);
        Ok(())
    }

    /// Drop a previously subscribed listener.
    pub fn unsubscribe(&mut self, listener: &Arc<dyn RuleListener>) {
        // Compare data pointers only; vtable pointers are not stable.
        let target = Arc::as_ptr(listener).cast::<()>();
        self.listeners
            .retain(|l| Arc::as_ptr(l).cast::<()>() != target);
    }

    /// All action definitions, in rule-insertion order.
    pub fn action_defs(&self) -> Vec<ActionDef> {
        self.rules
            .iter()
            .flat_map(|(id, _)| self.actiondefs.get(id).into_iter().flatten().cloned())
            .collect()
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether no rules are registered.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Ids of the registered rules, in insertion order.
    pub fn rule_ids(&self) -> Vec<RuleId> {
        self.rules.iter().map(|(id, _)| *id).collect()
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleSet")
            .field("rules", &self.rules.len())
            .field("listeners", &self.listeners.len())
            .field("counter", &self.counter)
            .finish()
    }
}
