//! Node selector.
//!
//! Online node names are sorted lexicographically and the table number
//! indexes into that list modulo its length. The input order never
//! matters, so the same table lands on the same node for as long as the
//! set of online nodes is unchanged.

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlacementError {
    #[error("no cluster node is online")]
    NoAvailableNodes,
}

/// Pick the node that hosts `table_number`.
pub fn select_node<S: AsRef<str>>(
    table_number: u32,
    online_nodes: &[S],
) -> Result<String, PlacementError> {
    let mut nodes: Vec<&str> = online_nodes.iter().map(AsRef::as_ref).collect();
    nodes.sort_unstable();
    nodes.dedup();

    if nodes.is_empty() {
        return Err(PlacementError::NoAvailableNodes);
    }

    let index = table_number as usize % nodes.len();
    let node = nodes[index].to_string();
    debug!(table = table_number, %node, index, candidates = nodes.len(), "node selected");
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexes_into_sorted_names() {
        let online = ["proxmox2", "proxmox1", "proxmox3"];
        // sorted: [proxmox1, proxmox2, proxmox3]; 4 mod 3 = 1
        assert_eq!(select_node(4, &online).unwrap(), "proxmox2");
        assert_eq!(select_node(3, &online).unwrap(), "proxmox1");
        assert_eq!(select_node(5, &online).unwrap(), "proxmox3");
    }

    #[test]
    fn input_order_does_not_matter() {
        let a = ["proxmox3", "proxmox1", "proxmox2"];
        let b = ["proxmox1", "proxmox2", "proxmox3"];
        for table in 0..20 {
            assert_eq!(select_node(table, &a), select_node(table, &b));
        }
    }

    #[test]
    fn repeated_calls_are_stable() {
        let online = vec!["pve-b".to_string(), "pve-a".to_string()];
        let first = select_node(9, &online).unwrap();
        for _ in 0..10 {
            assert_eq!(select_node(9, &online).unwrap(), first);
        }
    }

    #[test]
    fn single_node_takes_everything() {
        for table in [0, 1, 205] {
            assert_eq!(select_node(table, &["only"]).unwrap(), "only");
        }
    }

    #[test]
    fn duplicate_names_collapse() {
        let online = ["proxmox1", "proxmox1", "proxmox2"];
        assert_eq!(select_node(1, &online).unwrap(), "proxmox2");
        assert_eq!(select_node(2, &online).unwrap(), "proxmox1");
    }

    #[test]
    fn empty_set_is_an_error() {
        let online: [&str; 0] = [];
        assert_eq!(select_node(4, &online), Err(PlacementError::NoAvailableNodes));
    }
}
