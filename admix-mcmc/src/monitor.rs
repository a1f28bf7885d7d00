use crate::branch_rates::BranchRates;
use admix_graph::AdmixtureGraph;
use nalgebra::DMatrix;
use std::collections::{BTreeMap, BTreeSet};

/// Taxon membership by tip index
pub type Bipartition = Vec<bool>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeRecord {
    /// samples carrying at least one such edge
    pub num_samples: usize,
    pub num_occurrences: usize,
    pub age_sum: f64,
    pub weight_sum: f64,
}

impl EdgeRecord {
    pub fn mean_age(&self) -> f64 {
        self.age_sum / self.num_occurrences.max(1) as f64
    }

    pub fn mean_weight(&self) -> f64 {
        self.weight_sum / self.num_occurrences.max(1) as f64
    }
}

/// Summary row of an admixture edge class
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeSummary {
    pub donor: String,
    pub recipient: String,
    pub frequency: f64,
    pub mean_age: f64,
    pub mean_weight: f64,
}

/// Posterior frequencies of clades and of admixture edges, each edge
/// identified by the tip sets below its donor and recipient.
#[derive(Debug, Clone, Default)]
pub struct BipartitionMonitor {
    labels: Vec<String>,
    num_samples: usize,
    clades: BTreeMap<Bipartition, usize>,
    edges: BTreeMap<(Bipartition, Bipartition), EdgeRecord>,
}

impl BipartitionMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Record the clades and admixture edges of one sample
    pub fn update(&mut self, graph: &AdmixtureGraph) -> anyhow::Result<()> {
        let mut labels = Vec::with_capacity(graph.num_tips());
        for &t in graph.tips() {
            let tip = graph.try_node(t)?;
            labels.push(match tip.name() {
                Some(x) => x.to_string(),
                None => tip.index().to_string(),
            });
        }
        if self.labels.is_empty() {
            self.labels = labels;
        } else if self.labels != labels {
            return Err(anyhow::anyhow!("tip labels changed between samples"));
        }

        let root = graph.root()?;
        self.num_samples += 1;

        let clades: BTreeSet<Bipartition> = graph
            .nodes()
            .iter()
            .copied()
            .filter(|&id| id != root && graph.get(id).is_some_and(|x| x.is_divergence()))
            .map(|id| graph.taxon_bipartition(id))
            .collect();
        for clade in clades {
            *self.clades.entry(clade).or_default() += 1;
        }

        let mut seen = BTreeSet::new();
        for &donor in graph.admixture_parents() {
            let Some(recipient) = graph.try_node(donor)?.admixture_child() else {
                continue;
            };
            let key = (
                graph.taxon_bipartition(donor),
                graph.taxon_bipartition(recipient),
            );
            let record = self.edges.entry(key.clone()).or_default();
            record.num_occurrences += 1;
            let node = graph.try_node(recipient)?;
            record.age_sum += node.age();
            record.weight_sum += node.weight();
            if seen.insert(key) {
                record.num_samples += 1;
            }
        }
        Ok(())
    }

    fn label(&self, bip: &Bipartition) -> String {
        self.labels
            .iter()
            .zip(bip.iter())
            .filter(|&(_, &x)| x)
            .map(|(l, _)| l.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    fn bipartition_of(&self, taxa: &[&str]) -> Bipartition {
        self.labels.iter().map(|l| taxa.contains(&l.as_str())).collect()
    }

    fn frequency(&self, count: usize) -> f64 {
        if self.num_samples > 0 {
            count as f64 / self.num_samples as f64
        } else {
            0.0
        }
    }

    /// Share of samples containing the clade made of `taxa`
    pub fn clade_frequency(&self, taxa: &[&str]) -> f64 {
        let key = self.bipartition_of(taxa);
        self.frequency(self.clades.get(&key).copied().unwrap_or(0))
    }

    /// Share of samples with an edge from above `donor` into `recipient`
    pub fn edge_frequency(&self, donor: &[&str], recipient: &[&str]) -> f64 {
        let key = (self.bipartition_of(donor), self.bipartition_of(recipient));
        self.frequency(self.edges.get(&key).map(|r| r.num_samples).unwrap_or(0))
    }

    /// Most frequent clades, most frequent first
    pub fn top_clades(&self, n: usize) -> Vec<(String, f64)> {
        let mut ret: Vec<(String, f64)> = self
            .clades
            .iter()
            .map(|(bip, &count)| (self.label(bip), self.frequency(count)))
            .collect();
        ret.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ret.truncate(n);
        ret
    }

    /// Most frequent admixture edges, most frequent first
    pub fn top_edges(&self, n: usize) -> Vec<EdgeSummary> {
        let mut ret: Vec<EdgeSummary> = self
            .edges
            .iter()
            .map(|((d, r), record)| EdgeSummary {
                donor: self.label(d),
                recipient: self.label(r),
                frequency: self.frequency(record.num_samples),
                mean_age: record.mean_age(),
                mean_weight: record.mean_weight(),
            })
            .collect();
        ret.sort_by(|a, b| {
            b.frequency
                .total_cmp(&a.frequency)
                .then_with(|| a.donor.cmp(&b.donor))
                .then_with(|| a.recipient.cmp(&b.recipient))
        });
        ret.truncate(n);
        ret
    }

    /// Tab-separated report lines
    pub fn summary_lines(&self, n: usize) -> Vec<String> {
        let mut lines = vec![format!("#samples\t{}", self.num_samples)];
        for (clade, f) in self.top_clades(n) {
            lines.push(format!("clade\t{}\t{:.4}", clade, f));
        }
        for e in self.top_edges(n) {
            lines.push(format!(
                "edge\t{} -> {}\t{:.4}\ta={:.6}\tw={:.6}",
                e.donor, e.recipient, e.frequency, e.mean_age, e.mean_weight
            ));
        }
        lines
    }

    /// Mean number of edges per sample running from above donor tip `i`
    /// into recipient tip `j`, with the tip labels
    pub fn admixture_matrix(&self) -> (Vec<String>, DMatrix<f64>) {
        let n = self.labels.len();
        let mut ret = DMatrix::zeros(n, n);
        for ((d, r), record) in self.edges.iter() {
            let mean = self.frequency(record.num_occurrences);
            for i in (0..n).filter(|&i| d[i]) {
                for j in (0..n).filter(|&j| r[j]) {
                    ret[(i, j)] += mean;
                }
            }
        }
        (self.labels.clone(), ret)
    }

    /// Pool the counts of another chain over the same taxa
    pub fn merge(&mut self, other: &BipartitionMonitor) -> anyhow::Result<()> {
        if other.num_samples == 0 {
            return Ok(());
        }
        if self.labels.is_empty() {
            self.labels = other.labels.clone();
        } else if self.labels != other.labels {
            return Err(anyhow::anyhow!("cannot merge monitors over different taxa"));
        }
        self.num_samples += other.num_samples;
        for (k, &count) in other.clades.iter() {
            *self.clades.entry(k.clone()).or_default() += count;
        }
        for (k, record) in other.edges.iter() {
            let mine = self.edges.entry(k.clone()).or_default();
            mine.num_samples += record.num_samples;
            mine.num_occurrences += record.num_occurrences;
            mine.age_sum += record.age_sum;
            mine.weight_sum += record.weight_sum;
        }
        Ok(())
    }
}

/// One tab-separated row per node, ancestors first, with the clock
/// rate of the branch above it (`NaN` where the node owns none)
pub fn node_table(graph: &mut AdmixtureGraph, rates: &BranchRates) -> anyhow::Result<Vec<String>> {
    if !graph.update_topological_sort() {
        return Err(anyhow::anyhow!("cannot order a graph with a cycle"));
    }
    let by_index = rates.to_index_vector(graph);
    let mut lines = vec!["index\tname\tkind\tage\trate".to_string()];
    for &id in graph.topological_order() {
        let node = graph.try_node(id)?;
        let rate = node
            .index()
            .checked_sub(1)
            .and_then(|i| by_index.get(i))
            .copied()
            .unwrap_or(f64::NAN);
        lines.push(format!(
            "{}\t{}\t{:?}\t{:.6}\t{:.6}",
            node.index(),
            node.name().unwrap_or("."),
            node.kind(),
            node.age(),
            rate
        ));
    }
    Ok(lines)
}
