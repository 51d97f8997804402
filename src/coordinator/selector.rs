use std::sync::Arc;

use tracing::debug;

use crate::coordinator::error::CoordinatorResult;
use crate::metadata::{MetadataStore, StorageNode};

/// Rank candidate nodes for a replica of `required` bytes.
///
/// Eligible nodes are ACTIVE with total capacity of at least `required`.
/// Available space is not part of eligibility; a node that cannot actually
/// fit the replica fails its space reservation at write time. The result is
/// ordered by descending available space, ties broken by ascending node id,
/// and truncated to `replication_factor`.
pub fn rank_nodes(
    nodes: impl IntoIterator<Item = StorageNode>,
    required: u64,
    replication_factor: usize,
) -> Vec<StorageNode> {
    let mut eligible: Vec<StorageNode> = nodes
        .into_iter()
        .filter(|node| node.is_active() && node.capacity >= required)
        .collect();

    eligible.sort_by(|a, b| {
        b.available_space()
            .cmp(&a.available_space())
            .then_with(|| a.id.cmp(&b.id))
    });
    eligible.truncate(replication_factor);
    eligible
}

/// Chooses replica targets from the nodes currently known to the metadata
/// store.
#[derive(Clone)]
pub struct NodeSelector {
    metadata: Arc<dyn MetadataStore>,
}

impl NodeSelector {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self { metadata }
    }

    /// Up to `replication_factor` nodes in rank order. May be empty.
    pub async fn select(
        &self,
        required: u64,
        replication_factor: usize,
    ) -> CoordinatorResult<Vec<StorageNode>> {
        let nodes = self.metadata.list_nodes().await?;
        let total = nodes.len();
        let selected = rank_nodes(nodes, required, replication_factor);

        debug!(
            "Selected {} of {} nodes for {} bytes (rf {})",
            selected.len(),
            total,
            required,
            replication_factor
        );
        Ok(selected)
    }
}
