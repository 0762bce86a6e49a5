//! Node->topology labels

use crate::Registry;
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use anyhow::{anyhow, Result};
use mesh_endpoint_controller_k8s_api::{
    self as k8s, labels::Map, LABEL_TOPOLOGY_REGION, LABEL_TOPOLOGY_SUBZONE, LABEL_TOPOLOGY_ZONE,
};
use std::collections::hash_map::Entry as HashEntry;
use tracing::{debug, instrument, trace};

#[derive(Debug, Default)]
pub struct NodeIndex {
    index: HashMap<String, Map>,
}

// === impl NodeIndex ===

impl NodeIndex {
    /// Returns the topology labels of a node, if the node is known.
    pub fn topology(&self, name: &str) -> Option<&Map> {
        self.index.get(name)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Extracts the topology labels (and only the topology labels) from a node's labels.
    fn topology_labels(node: &k8s::Node) -> Map {
        node.metadata
            .labels
            .iter()
            .flatten()
            .filter(|(k, _)| {
                matches!(
                    k.as_str(),
                    LABEL_TOPOLOGY_REGION | LABEL_TOPOLOGY_ZONE | LABEL_TOPOLOGY_SUBZONE
                )
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

// === impl Registry ===

impl Registry {
    /// Tracks the topology of each node.
    ///
    /// Endpoints whose source carries no topology fall back to their workload's node topology.
    #[instrument(
        skip(self, node),
        fields(name = ?node.metadata.name)
    )]
    pub fn apply_node(&mut self, node: k8s::Node) -> Result<()> {
        let name = node
            .metadata
            .name
            .clone()
            .ok_or_else(|| anyhow!("node missing name"))?;
        let topology = NodeIndex::topology_labels(&node);
        match self.nodes.index.entry(name) {
            HashEntry::Vacant(entry) => {
                debug!(?topology, "Adding");
                entry.insert(topology);
            }
            HashEntry::Occupied(mut entry) => {
                if *entry.get() == topology {
                    trace!("Unchanged");
                    return Ok(());
                }
                debug!(?topology, "Updating");
                entry.insert(topology);
            }
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn delete_node(&mut self, name: &str) -> Result<()> {
        self.nodes
            .index
            .remove(name)
            .ok_or_else(|| anyhow!("node {} does not exist", name))?;
        debug!("Deleted");
        Ok(())
    }

    #[instrument(skip(self, nodes))]
    pub fn reset_nodes(&mut self, nodes: Vec<k8s::Node>) -> Result<()> {
        let mut prior = self.nodes.index.keys().cloned().collect::<HashSet<_>>();

        let mut result = Ok(());
        for node in nodes.into_iter() {
            if let Some(name) = node.metadata.name.as_ref() {
                prior.remove(name);
            }
            if let Err(error) = self.apply_node(node) {
                result = Err(error);
            }
        }

        for name in prior.into_iter() {
            debug!(?name, "Removing defunct node");
            self.nodes.index.remove(&name);
        }

        result
    }
}
