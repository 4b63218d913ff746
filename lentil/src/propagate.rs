//! Diffusion of sparse cell labels over a joint graph

use crate::config::PropagationConfig;
use crate::error::{JointError, Result};
use crate::graph::JointGraph;

use fnv::FnvHashMap as HashMap;
use log::{info, warn};
use nalgebra::DMatrix;
use rayon::prelude::*;

/// Label probabilities of every node of a graph
#[derive(Clone, Debug)]
pub struct LabelDistribution {
    /// sorted label classes
    pub classes: Vec<Box<str>>,
    /// nodes x classes, rows sum to 1
    pub probs: DMatrix<f32>,
    pub iterations: usize,
    pub converged: bool,
}

impl LabelDistribution {
    /// Most probable class of each node (first class on ties)
    pub fn hard_labels(&self) -> Vec<&str> {
        self.probs
            .row_iter()
            .map(|row| {
                let mut best = 0;
                for (c, &p) in row.iter().enumerate() {
                    if p > row[best] {
                        best = c;
                    }
                }
                self.classes[best].as_ref()
            })
            .collect()
    }

    /// `1 - max probability` of each node
    pub fn uncertainty(&self) -> Vec<f32> {
        self.probs
            .row_iter()
            .map(|row| 1.0 - row.max())
            .collect()
    }

    /// Probability of `class` at every node
    pub fn class_probs(&self, class: &str) -> Option<Vec<f32>> {
        let c = self.classes.iter().position(|x| x.as_ref() == class)?;
        Some(self.probs.column(c).iter().copied().collect())
    }
}

/// Spread `labels` (cell name, label) over `graph`
///
/// Seeds start one-hot on their label and every other node uniform.
/// Each iteration replaces a node's distribution with the weighted
/// average of its neighbours' previous distributions (weights are the
/// node's outgoing weights), all nodes at once. Seeds stay clamped when
/// `fixed_initial_labels` is set. Components without any seed, isolated
/// nodes included, keep the uniform distribution.
///
/// Stops once no node moves by more than `tolerance`, or after
/// `max_iterations`.
pub fn propagate_labels(
    graph: &JointGraph,
    labels: &[(Box<str>, Box<str>)],
    config: &PropagationConfig,
) -> Result<LabelDistribution> {
    let nn = graph.num_nodes();
    if nn == 0 {
        return Err(JointError::Propagation("the graph has no nodes".into()));
    }
    if labels.is_empty() {
        return Err(JointError::Propagation("no seed labels".into()));
    }

    let mut classes: Vec<Box<str>> = labels.iter().map(|(_, l)| l.clone()).collect();
    classes.sort();
    classes.dedup();
    let nclass = classes.len();
    let class_index: HashMap<&str, usize> = classes
        .iter()
        .enumerate()
        .map(|(c, l)| (l.as_ref(), c))
        .collect();

    let mut seed: Vec<Option<usize>> = vec![None; nn];
    for (cell, label) in labels {
        let i = graph
            .node_index(cell)
            .ok_or_else(|| {
                JointError::input(format!("labelled cell `{}` is not in the graph", cell))
            })?;
        let c = class_index[label.as_ref()];
        match seed[i] {
            Some(prev) if prev != c => {
                return Err(JointError::input(format!(
                    "cell `{}` is labelled both `{}` and `{}`",
                    cell, classes[prev], label
                )));
            }
            _ => seed[i] = Some(c),
        }
    }

    // components without seeds stay uniform
    let components = graph.connected_components();
    let ncomp = components.iter().max().map_or(0, |m| m + 1);
    let mut seeded = vec![false; ncomp];
    for (i, s) in seed.iter().enumerate() {
        if s.is_some() {
            seeded[components[i]] = true;
        }
    }
    let nseedless = seeded.iter().filter(|&&x| !x).count();
    if nseedless > 0 {
        warn!(
            "{} of {} components have no labelled cell; their cells stay uniform",
            nseedless, ncomp
        );
    }

    let fixed: Vec<bool> = (0..nn)
        .map(|i| !seeded[components[i]] || (config.fixed_initial_labels && seed[i].is_some()))
        .collect();

    let uniform = 1.0 / nclass as f32;
    let mut old = vec![uniform; nn * nclass];
    for (i, s) in seed.iter().enumerate() {
        if let Some(c) = *s {
            let row = &mut old[i * nclass..(i + 1) * nclass];
            row.fill(0.0);
            row[c] = 1.0;
        }
    }
    let mut new = old.clone();

    let mut iterations = 0;
    let mut converged = false;

    while iterations < config.max_iterations {
        let change = new
            .par_chunks_mut(nclass)
            .enumerate()
            .map(|(i, row)| {
                let prev = &old[i * nclass..(i + 1) * nclass];
                if fixed[i] {
                    row.copy_from_slice(prev);
                    return 0.0;
                }
                diffuse_row(graph, &old, nclass, i, row);
                row.iter()
                    .zip(prev)
                    .map(|(a, b)| (a - b).abs())
                    .fold(0_f32, f32::max)
            })
            .reduce(|| 0.0, f32::max);

        std::mem::swap(&mut old, &mut new);
        iterations += 1;

        if change < config.tolerance {
            converged = true;
            break;
        }
    }

    info!(
        "label propagation: {} classes, {} seeds, {} iterations{}",
        nclass,
        seed.iter().filter(|s| s.is_some()).count(),
        iterations,
        if converged { "" } else { " (not converged)" }
    );

    Ok(LabelDistribution {
        classes,
        probs: DMatrix::from_row_slice(nn, nclass, &old),
        iterations,
        converged,
    })
}

/// Weighted mean of the neighbours' rows of `old`, renormalised; a node
/// without outgoing weight keeps its row
fn diffuse_row(graph: &JointGraph, old: &[f32], nclass: usize, i: usize, row: &mut [f32]) {
    row.fill(0.0);
    let mut denom = 0_f32;
    for (&j, &w) in graph.neighbors(i).iter().zip(graph.out_weights(i)) {
        let nbr = &old[j * nclass..(j + 1) * nclass];
        for (r, &p) in row.iter_mut().zip(nbr) {
            *r += w * p;
        }
        denom += w;
    }

    let total: f32 = row.iter().sum();
    if denom <= 0.0 || total <= 0.0 {
        row.copy_from_slice(&old[i * nclass..(i + 1) * nclass]);
        return;
    }
    row.iter_mut().for_each(|r| *r /= total);
}
