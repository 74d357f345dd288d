use std::collections::BTreeSet;
use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{
    log_warn,
    point::{PointId, PointKind},
    schedule::Action,
};

/// Arithmetic applied when a derived point resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

impl Op {
    pub fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            Op::Add => lhs + rhs,
            Op::Sub => lhs - rhs,
            Op::Mul => lhs * rhs,
            Op::Div => lhs / rhs,
        }
    }
}

impl Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
        };
        f.write_str(symbol)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Scalar(f64),
    Point(PointId),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Derivation {
    pub op: Op,
    pub lhs: Operand,
    pub rhs: Operand,
}

impl Derivation {
    fn points(&self) -> impl Iterator<Item = PointId> {
        [self.lhs, self.rhs].into_iter().filter_map(|operand| match operand {
            Operand::Point(id) => Some(id),
            Operand::Scalar(_) => None,
        })
    }
}

#[derive(Debug)]
struct PointNode {
    kind: PointKind,
    beat: Option<f64>,
    rebindable: bool,
    derivation: Option<Derivation>,
    children: Vec<PointId>,
    actions: Vec<Action>,
    /// Shared with every entry scheduled for this node. Flipped off to
    /// silence entries already handed to the queue.
    live: Arc<AtomicBool>,
    resolutions: u64,
}

impl PointNode {
    fn new(kind: PointKind, rebindable: bool, derivation: Option<Derivation>) -> Self {
        PointNode {
            kind,
            beat: None,
            rebindable,
            derivation,
            children: Vec::new(),
            actions: Vec::new(),
            live: Arc::new(AtomicBool::new(true)),
            resolutions: 0,
        }
    }

    /// Every action, wrapped so it does nothing once this node is reset.
    fn guarded_actions(&self, beat: f64, owner: PointId) -> Vec<(f64, Action, Option<PointId>)> {
        self.actions
            .iter()
            .map(|action| {
                let live = self.live.clone();
                (
                    beat,
                    action.guarded(move || live.load(Ordering::Acquire)),
                    Some(owner),
                )
            })
            .collect()
    }

    fn reset(&mut self) {
        self.live.store(false, Ordering::Release);
        self.live = Arc::new(AtomicBool::new(true));
        self.beat = None;
    }
}

/// Queue entries produced by one resolution pass.
#[derive(Debug, Default)]
pub struct Resolution {
    pub entries: Vec<(f64, Action, Option<PointId>)>,
    /// Set when the bound point is recurring: `(next beat, liveness flag)`.
    pub rearm: Option<(f64, Arc<AtomicBool>)>,
}

/// Flat storage for every point created on a clock.
///
/// Derived points always get a larger index than their operands, so
/// ascending index order is a valid evaluation order. Nodes are never
/// removed: a point lives as long as the clock that created it.
#[derive(Debug, Default)]
pub struct PointArena {
    nodes: Vec<PointNode>,
}

impl PointArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn node(&self, id: PointId) -> &PointNode {
        &self.nodes[id.index()]
    }

    fn node_mut(&mut self, id: PointId) -> &mut PointNode {
        &mut self.nodes[id.index()]
    }

    pub fn insert(&mut self, kind: PointKind) -> PointId {
        let rebindable = !matches!(kind, PointKind::OneShot);
        let id = PointId::from_index(self.nodes.len());
        self.nodes.push(PointNode::new(kind, rebindable, None));
        id
    }

    /// Adds a point computed from `derivation`, resolving it right away
    /// when every operand already has a beat.
    pub fn derive(&mut self, derivation: Derivation) -> PointId {
        let id = PointId::from_index(self.nodes.len());
        let rebindable = derivation.points().any(|p| self.node(p).rebindable);
        let mut node = PointNode::new(PointKind::Derived, rebindable, Some(derivation));
        node.beat = self.evaluate(&derivation);
        self.nodes.push(node);
        for parent in derivation.points() {
            let children = &mut self.node_mut(parent).children;
            if !children.contains(&id) {
                children.push(id);
            }
        }
        id
    }

    pub fn beat(&self, id: PointId) -> Option<f64> {
        self.node(id).beat
    }

    pub fn kind(&self, id: PointId) -> PointKind {
        self.node(id).kind
    }

    pub fn is_rebindable(&self, id: PointId) -> bool {
        self.node(id).rebindable
    }

    pub fn resolutions(&self, id: PointId) -> u64 {
        self.node(id).resolutions
    }

    pub fn derivation(&self, id: PointId) -> Option<Derivation> {
        self.node(id).derivation
    }

    pub fn action_count(&self, id: PointId) -> usize {
        self.node(id).actions.len()
    }

    fn operand_value(&self, operand: Operand) -> Option<f64> {
        match operand {
            Operand::Scalar(value) => Some(value),
            Operand::Point(id) => self.node(id).beat,
        }
    }

    fn evaluate(&self, derivation: &Derivation) -> Option<f64> {
        let lhs = self.operand_value(derivation.lhs)?;
        let rhs = self.operand_value(derivation.rhs)?;
        Some(derivation.op.apply(lhs, rhs))
    }

    /// `root` followed by every point derived from it, directly or not,
    /// in evaluation order.
    pub fn subtree(&self, root: PointId) -> Vec<PointId> {
        let mut seen = BTreeSet::from([root]);
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            for &child in &self.node(id).children {
                if seen.insert(child) {
                    stack.push(child);
                }
            }
        }
        seen.into_iter().collect()
    }

    /// Assigns `beat` to `root` and recomputes everything derived from it.
    ///
    /// Descendant beats are discarded first, so a derived point whose other
    /// operand is still unbound ends up unresolved. Every point that gets a
    /// beat contributes its actions to the returned entries.
    pub fn resolve(&mut self, root: PointId, beat: f64) -> Resolution {
        let order = self.subtree(root);
        for &id in &order[1..] {
            self.node_mut(id).beat = None;
        }

        let mut resolution = Resolution::default();
        for &id in &order {
            let value = if id == root {
                Some(beat)
            } else {
                self.node(id)
                    .derivation
                    .as_ref()
                    .and_then(|derivation| self.evaluate(derivation))
            };
            let Some(value) = value else {
                continue;
            };
            if !value.is_finite() {
                log_warn!("Point {} resolved to a non-finite beat, skipping it", id);
                continue;
            }
            let node = self.node_mut(id);
            node.beat = Some(value);
            node.resolutions += 1;
            resolution.entries.extend(node.guarded_actions(value, id));
        }

        let root_node = self.node(root);
        if let PointKind::Recurring { period } = root_node.kind {
            resolution.rearm = Some((beat + period, root_node.live.clone()));
        }
        resolution
    }

    /// Resolves a recurring `root` again, unless it was reset since `live`
    /// was handed out.
    pub fn rearm(&mut self, root: PointId, beat: f64, live: &Arc<AtomicBool>) -> Resolution {
        let current = &self.node(root).live;
        if !Arc::ptr_eq(current, live) || !live.load(Ordering::Acquire) {
            return Resolution::default();
        }
        self.resolve(root, beat)
    }

    /// Registers an action on `id`, returning the entry to queue now if
    /// the point already has a beat that is still meaningful.
    ///
    /// A one-shot point that already resolved fires the new action at its
    /// beat, late if needed. Rebindable points only get it now when their
    /// beat is not yet past, otherwise it waits for the next binding.
    pub fn add_action(
        &mut self,
        id: PointId,
        action: Action,
        now: f64,
    ) -> Option<(f64, Action, Option<PointId>)> {
        let node = self.node_mut(id);
        node.actions.push(action.clone());
        let beat = node.beat?;
        if node.rebindable && beat < now {
            return None;
        }
        let live = node.live.clone();
        Some((
            beat,
            action.guarded(move || live.load(Ordering::Acquire)),
            Some(id),
        ))
    }

    /// Returns `root` and its descendants to the unbound state. Entries
    /// already queued for them turn into no-ops.
    pub fn reset_subtree(&mut self, root: PointId) -> Vec<PointId> {
        let subtree = self.subtree(root);
        for &id in &subtree {
            self.node_mut(id).reset();
        }
        subtree
    }

    pub fn reset_all(&mut self) {
        for node in &mut self.nodes {
            node.reset();
        }
    }

    pub fn liveness(&self, id: PointId) -> Arc<AtomicBool> {
        self.node(id).live.clone()
    }
}
