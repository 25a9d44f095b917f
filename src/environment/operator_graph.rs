//! Operator graph: wiring, dirty propagation and the update driver.
//!
//! Layers and operators form a bipartite dependency graph. A layer that is
//! the output of an operator is "generated"; when any of its transitive
//! inputs changes it becomes dirty, and
//! [`Environment::update_operators`] reruns the affected operators in
//! topological order to clean it up again.

use std::collections::{HashMap, HashSet};

use super::Environment;
use crate::error::{Error, Result};
use crate::event::{Event, PortRole};
use crate::item::{Item, ItemId};
use crate::layer::MapData;

/// Outcome of [`Environment::update_operators`].
#[derive(Debug, Default)]
pub struct UpdateReport {
    /// Operators that ran and cleaned their outputs, in execution order.
    pub updated: Vec<ItemId>,
    /// Operators whose kernel reported failure; their outputs stay dirty.
    pub failed: Vec<(ItemId, Error)>,
    /// Operators skipped because an upstream operator failed; their
    /// outputs stay dirty.
    pub skipped: Vec<ItemId>,
}

impl UpdateReport {
    /// True when every dirty output was regenerated.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Access to an operator's wiring during
/// [`OperatorKernel::update`](crate::operator::OperatorKernel::update).
pub struct OperatorContext<'a> {
    env: &'a mut Environment,
    op: ItemId,
}

impl<'a> OperatorContext<'a> {
    /// The id of the operator being updated.
    pub fn operator_id(&self) -> &ItemId {
        &self.op
    }

    /// Read access to the whole environment.
    pub fn env(&self) -> &Environment {
        self.env
    }

    /// Input layer ids, in wiring order.
    pub fn input_ids(&self) -> Vec<ItemId> {
        self.env.operator_inputs(&self.op)
    }

    /// Output layer ids, in wiring order.
    pub fn output_ids(&self) -> Vec<ItemId> {
        self.env.operator_outputs(&self.op)
    }

    /// The unique input layer whose payload is of type `T`.
    pub fn sole_input<T: MapData>(&self) -> Result<&T> {
        let id = self.sole_port_id::<T>(PortRole::Input)?;
        match self.env.layer(&id)?.map_as::<T>() {
            Some(map) => Ok(map),
            None => Err(Error::NotFound {
                what: format!("payload of `{}`", id),
            }),
        }
    }

    /// Id of the unique input layer whose payload is of type `T`.
    pub fn sole_input_id<T: MapData>(&self) -> Result<ItemId> {
        self.sole_port_id::<T>(PortRole::Input)
    }

    /// Id of the unique output layer whose payload is of type `T`.
    pub fn sole_output_id<T: MapData>(&self) -> Result<ItemId> {
        self.sole_port_id::<T>(PortRole::Output)
    }

    /// Run `f` on the unique output payload of type `T`.
    pub fn with_sole_output_mut<T: MapData, R>(
        &mut self,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R> {
        let id = self.sole_port_id::<T>(PortRole::Output)?;
        match self.env.layer_mut(&id)?.map_as_mut::<T>() {
            Some(map) => Ok(f(map)),
            None => Err(Error::NotFound {
                what: format!("payload of `{}`", id),
            }),
        }
    }

    /// Relative transform between the frames of two attached maps.
    pub fn relative_transform_between_maps(
        &self,
        from_map: &ItemId,
        to_map: &ItemId,
    ) -> Result<crate::core::Transform> {
        self.env.relative_transform_between_maps(from_map, to_map)
    }

    fn sole_port_id<T: MapData>(&self, role: PortRole) -> Result<ItemId> {
        let ids = match role {
            PortRole::Input => self.env.operator_inputs(&self.op),
            PortRole::Output => self.env.operator_outputs(&self.op),
        };
        let mut found = None;
        for id in ids {
            let is_t = self
                .env
                .layer(&id)
                .ok()
                .map(|l| l.map_as::<T>().is_some())
                .unwrap_or(false);
            if is_t {
                if found.is_some() {
                    return Err(Error::Ambiguous {
                        what: format!(
                            "{} of `{}` with payload `{}`",
                            role.name(),
                            self.op,
                            std::any::type_name::<T>()
                        ),
                    });
                }
                found = Some(id);
            }
        }
        found.ok_or_else(|| Error::NotFound {
            what: format!(
                "{} of `{}` with payload `{}`",
                role.name(),
                self.op,
                std::any::type_name::<T>()
            ),
        })
    }
}

impl Environment {
    /// Input layers of an operator, in wiring order.
    pub fn operator_inputs(&self, op: &ItemId) -> Vec<ItemId> {
        self.op_inputs
            .iter()
            .filter(|(o, _)| o == op)
            .map(|(_, l)| l.clone())
            .collect()
    }

    /// Output layers of an operator, in wiring order.
    pub fn operator_outputs(&self, op: &ItemId) -> Vec<ItemId> {
        self.op_outputs
            .iter()
            .filter(|(o, _)| o == op)
            .map(|(_, l)| l.clone())
            .collect()
    }

    /// All (operator, input layer) edges, in wiring order.
    pub fn operator_input_table(&self) -> impl Iterator<Item = (&ItemId, &ItemId)> {
        self.op_inputs.iter().map(|(o, l)| (o, l))
    }

    /// All (operator, output layer) edges, in wiring order.
    pub fn operator_output_table(&self) -> impl Iterator<Item = (&ItemId, &ItemId)> {
        self.op_outputs.iter().map(|(o, l)| (o, l))
    }

    /// The operator generating a layer, if any. A layer has at most one
    /// generator.
    pub fn generator_of(&self, layer: &ItemId) -> Option<&ItemId> {
        self.op_outputs
            .iter()
            .find(|(_, l)| l == layer)
            .map(|(op, _)| op)
    }

    /// True when the layer is the output of some operator.
    pub fn is_generated(&self, layer: &ItemId) -> bool {
        self.generator_of(layer).is_some()
    }

    /// Operators consuming a layer as input, in wiring order.
    pub fn consumers_of(&self, layer: &ItemId) -> Vec<ItemId> {
        let mut out = Vec::new();
        for (op, l) in &self.op_inputs {
            if l == layer && !out.contains(op) {
                out.push(op.clone());
            }
        }
        out
    }

    /// Layers directly generated from `layer`: the outputs of every
    /// operator consuming it.
    pub fn layers_derived_from(&self, layer: &ItemId) -> Vec<ItemId> {
        let mut out = Vec::new();
        for op in self.consumers_of(layer) {
            for l in self.operator_outputs(&op) {
                if !out.contains(&l) {
                    out.push(l);
                }
            }
        }
        out
    }

    /// Wire a layer as input of an operator.
    ///
    /// Enforces the declared input arity and rejects edges that would close
    /// a cycle through the operator graph. The operator's current outputs
    /// are marked dirty.
    pub fn add_input(&mut self, op: &ItemId, layer: &ItemId) -> Result<()> {
        let node = self.operator(op)?;
        let arity = node.input_arity();
        self.layer(layer)?;
        if self.op_inputs.iter().any(|(o, l)| o == op && l == layer) {
            return Ok(());
        }
        let inputs = self.operator_inputs(op);
        if arity > 0 && inputs.len() >= arity {
            return Err(Error::ArityExceeded {
                id: op.to_string(),
                role: "input",
                arity,
            });
        }
        if self
            .derived_closure(&self.operator_outputs(op))
            .contains(layer)
        {
            return Err(Error::GraphCycle {
                detail: format!("`{}` is derived from the outputs of `{}`", layer, op),
            });
        }
        self.op_inputs.push((op.clone(), layer.clone()));
        self.emit(Event::OperatorEdgeAdded {
            op: op.clone(),
            layer: layer.clone(),
            role: PortRole::Input,
        });
        let outputs = self.operator_outputs(op);
        self.mark_layers_dirty(&outputs);
        self.mark_derived_dirty(outputs);
        Ok(())
    }

    /// Wire a layer as output of an operator, making it generated and
    /// dirty.
    ///
    /// Fails with `ImmutableViolation` for immutable layers,
    /// `AlreadyGenerated` when another operator already generates the
    /// layer, `ArityExceeded` past the declared output arity, and
    /// `GraphCycle` when the layer feeds back into the operator's inputs.
    pub fn add_output(&mut self, op: &ItemId, layer: &ItemId) -> Result<()> {
        let node = self.operator(op)?;
        let arity = node.output_arity();
        let l = self.layer(layer)?;
        if l.is_immutable() {
            return Err(Error::ImmutableViolation {
                id: layer.to_string(),
            });
        }
        if self.op_outputs.iter().any(|(o, out)| o == op && out == layer) {
            return Ok(());
        }
        if let Some(generator) = self.generator_of(layer) {
            return Err(Error::AlreadyGenerated {
                id: layer.to_string(),
                generator: generator.to_string(),
            });
        }
        let outputs = self.operator_outputs(op);
        if arity > 0 && outputs.len() >= arity {
            return Err(Error::ArityExceeded {
                id: op.to_string(),
                role: "output",
                arity,
            });
        }
        let inputs: HashSet<ItemId> = self.operator_inputs(op).into_iter().collect();
        if self
            .derived_closure(std::slice::from_ref(layer))
            .iter()
            .any(|l| inputs.contains(l))
        {
            return Err(Error::GraphCycle {
                detail: format!("an input of `{}` is derived from `{}`", op, layer),
            });
        }
        self.op_outputs.push((op.clone(), layer.clone()));
        self.emit(Event::OperatorEdgeAdded {
            op: op.clone(),
            layer: layer.clone(),
            role: PortRole::Output,
        });
        self.mark_layers_dirty(std::slice::from_ref(layer));
        self.mark_derived_dirty(vec![layer.clone()]);
        Ok(())
    }

    /// Remove all inputs, then wire the single given layer.
    pub fn set_input(&mut self, op: &ItemId, layer: &ItemId) -> Result<()> {
        self.remove_inputs(op)?;
        self.add_input(op, layer)
    }

    /// Remove all outputs, then wire the single given layer.
    pub fn set_output(&mut self, op: &ItemId, layer: &ItemId) -> Result<()> {
        self.remove_outputs(op)?;
        self.add_output(op, layer)
    }

    /// Remove one input edge.
    pub fn remove_input(&mut self, op: &ItemId, layer: &ItemId) -> Result<()> {
        let before = self.op_inputs.len();
        self.op_inputs.retain(|(o, l)| !(o == op && l == layer));
        if self.op_inputs.len() == before {
            return Err(Error::NotFound {
                what: format!("input edge `{}` -> `{}`", op, layer),
            });
        }
        self.emit(Event::OperatorEdgeRemoved {
            op: op.clone(),
            layer: layer.clone(),
            role: PortRole::Input,
        });
        Ok(())
    }

    /// Remove one output edge. If it was the layer's last output edge the
    /// layer is no longer generated.
    pub fn remove_output(&mut self, op: &ItemId, layer: &ItemId) -> Result<()> {
        let before = self.op_outputs.len();
        self.op_outputs.retain(|(o, l)| !(o == op && l == layer));
        if self.op_outputs.len() == before {
            return Err(Error::NotFound {
                what: format!("output edge `{}` -> `{}`", op, layer),
            });
        }
        self.emit(Event::OperatorEdgeRemoved {
            op: op.clone(),
            layer: layer.clone(),
            role: PortRole::Output,
        });
        Ok(())
    }

    /// Remove all input edges of an operator.
    pub fn remove_inputs(&mut self, op: &ItemId) -> Result<()> {
        self.operator(op)?;
        for layer in self.operator_inputs(op) {
            self.remove_input(op, &layer)?;
        }
        Ok(())
    }

    /// Remove all output edges of an operator.
    pub fn remove_outputs(&mut self, op: &ItemId) -> Result<()> {
        self.operator(op)?;
        for layer in self.operator_outputs(op) {
            self.remove_output(op, &layer)?;
        }
        Ok(())
    }

    /// Detach a layer from its generator, if the generator supports it.
    ///
    /// Returns `true` when the layer is guaranteed ungenerated afterwards
    /// (including when it never was), `false` when the generator refuses.
    pub fn detach_from_operator(&mut self, layer: &ItemId) -> Result<bool> {
        let generator = match self.generator_of(layer) {
            Some(g) => g.clone(),
            None => return Ok(true),
        };
        if !self.operator(&generator)?.supports_detach() {
            return Ok(false);
        }
        self.remove_output(&generator, layer)?;
        Ok(true)
    }

    /// Notify the environment that an item's content changed.
    ///
    /// Emits `ItemModified` and marks every layer that transitively depends
    /// on the item through operator edges as dirty. For a frame, the
    /// propagation starts from the maps attached to it; for an operator,
    /// from its outputs. The propagation completes before this returns.
    pub fn item_modified(&mut self, id: &ItemId) -> Result<()> {
        let seeds = match self.items.get(id) {
            None => return Err(Error::NotAttached { id: id.to_string() }),
            Some(Item::Layer(_)) => vec![id.clone()],
            Some(Item::Frame(_)) => self.maps_of_frame(id),
            Some(Item::Operator(_)) => {
                let outputs = self.operator_outputs(id);
                self.mark_layers_dirty(&outputs);
                outputs
            }
        };
        self.emit(Event::ItemModified { id: id.clone() });
        self.mark_derived_dirty(seeds);
        Ok(())
    }

    /// Mark generated layers among `layers` dirty.
    fn mark_layers_dirty(&mut self, layers: &[ItemId]) {
        for id in layers {
            if self.is_generated(id) {
                if let Ok(layer) = self.layer_mut(id) {
                    layer.set_dirty();
                }
            }
        }
    }

    /// Mark every layer transitively derived from `seeds` as dirty. The
    /// seeds themselves are not touched.
    pub(crate) fn mark_derived_dirty(&mut self, seeds: Vec<ItemId>) {
        let mut seen: HashSet<ItemId> = seeds.iter().cloned().collect();
        let mut frontier = seeds;
        let mut dirtied = 0usize;
        while let Some(layer) = frontier.pop() {
            for op in self.consumers_of(&layer) {
                for out in self.operator_outputs(&op) {
                    if seen.insert(out.clone()) {
                        if let Ok(l) = self.layer_mut(&out) {
                            if !l.is_dirty() {
                                l.set_dirty();
                                dirtied += 1;
                            }
                        }
                        frontier.push(out);
                    }
                }
            }
        }
        if dirtied > 0 {
            log::debug!("marked {} derived layer(s) dirty", dirtied);
        }
    }

    /// `seeds` plus every layer transitively derived from them.
    fn derived_closure(&self, seeds: &[ItemId]) -> HashSet<ItemId> {
        let mut set: HashSet<ItemId> = seeds.iter().cloned().collect();
        let mut frontier: Vec<ItemId> = seeds.to_vec();
        while let Some(layer) = frontier.pop() {
            for op in self.consumers_of(&layer) {
                for out in self.operator_outputs(&op) {
                    if set.insert(out.clone()) {
                        frontier.push(out);
                    }
                }
            }
        }
        set
    }

    /// Run every operator that has at least one dirty output, in
    /// topological order over the operator graph (ties broken by attach
    /// order).
    ///
    /// An operator that succeeds clears the dirty flag on its outputs. An
    /// operator that fails leaves them dirty; operators downstream of a
    /// failure are skipped. Failures and skips are reported, never
    /// swallowed.
    pub fn update_operators(&mut self) -> UpdateReport {
        let candidates: Vec<ItemId> = self
            .order
            .iter()
            .filter(|id| {
                matches!(self.items.get(*id), Some(Item::Operator(_)))
                    && self
                        .operator_outputs(*id)
                        .iter()
                        .any(|out| self.layer(out).map(|l| l.is_dirty()).unwrap_or(false))
            })
            .cloned()
            .collect();
        let sorted = self.topo_sort_operators(&candidates);

        let mut report = UpdateReport::default();
        let mut stale: HashSet<ItemId> = HashSet::new();
        for op in sorted {
            let inputs = self.operator_inputs(&op);
            if inputs.iter().any(|l| stale.contains(l)) {
                log::debug!("skipping `{}`: stale inputs", op);
                stale.extend(self.operator_outputs(&op));
                report.skipped.push(op);
                continue;
            }
            match self.run_operator(&op) {
                Ok(()) => {
                    for out in self.operator_outputs(&op) {
                        if let Ok(layer) = self.layer_mut(&out) {
                            layer.reset_dirty();
                        }
                    }
                    report.updated.push(op);
                }
                Err(err) => {
                    log::warn!("operator `{}` failed: {}", op, err);
                    stale.extend(self.operator_outputs(&op));
                    report.failed.push((op, err));
                }
            }
        }
        report
    }

    /// Regenerate a single dirty layer by running its generator. A clean
    /// layer is a no-op; a layer without a generator fails with `NotFound`.
    pub fn update_from_operator(&mut self, layer: &ItemId) -> Result<()> {
        if !self.layer(layer)?.is_dirty() {
            return Ok(());
        }
        let generator = match self.generator_of(layer) {
            Some(g) => g.clone(),
            None => {
                return Err(Error::NotFound {
                    what: format!("generator of `{}`", layer),
                })
            }
        };
        self.run_operator(&generator)?;
        for out in self.operator_outputs(&generator) {
            if let Ok(l) = self.layer_mut(&out) {
                l.reset_dirty();
            }
        }
        Ok(())
    }

    /// Candidate operators in topological order, ties by position in
    /// `ops`. `a` precedes `b` when an output of `a` is an input of `b`.
    fn topo_sort_operators(&self, ops: &[ItemId]) -> Vec<ItemId> {
        let index: HashMap<&ItemId, usize> =
            ops.iter().enumerate().map(|(i, id)| (id, i)).collect();
        let mut indegree = vec![0usize; ops.len()];
        let mut edges: Vec<Vec<usize>> = vec![Vec::new(); ops.len()];
        for (i, a) in ops.iter().enumerate() {
            for out in self.operator_outputs(a) {
                for b in self.consumers_of(&out) {
                    if let Some(&j) = index.get(&b) {
                        if i != j {
                            edges[i].push(j);
                            indegree[j] += 1;
                        }
                    }
                }
            }
        }
        let mut done = vec![false; ops.len()];
        let mut out = Vec::with_capacity(ops.len());
        loop {
            let next = (0..ops.len()).find(|&i| !done[i] && indegree[i] == 0);
            let Some(i) = next else { break };
            done[i] = true;
            out.push(ops[i].clone());
            for &j in &edges[i] {
                indegree[j] = indegree[j].saturating_sub(1);
            }
        }
        for (i, flag) in done.iter().enumerate() {
            if !flag {
                out.push(ops[i].clone());
            }
        }
        out
    }

    fn run_operator(&mut self, op: &ItemId) -> Result<()> {
        let mut node = match self.items.remove(op) {
            Some(Item::Operator(node)) => node,
            Some(other) => {
                let err = self.kind_mismatch(op, "operator", &other);
                self.items.insert(op.clone(), other);
                return Err(err);
            }
            None => return Err(Error::NotAttached { id: op.to_string() }),
        };
        let result = {
            let mut ctx = OperatorContext {
                env: self,
                op: op.clone(),
            };
            node.kernel_mut().update(&mut ctx)
        };
        self.items.insert(op.clone(), Item::Operator(node));
        result
    }

}
