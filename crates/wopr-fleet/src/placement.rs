// [crates/wopr-fleet/src/placement.rs]
//! Placement Policy (C8). Pure function over a node snapshot — no I/O,
//! so the orchestrator and the connection manager can share it without
//! either owning the other's repository handle.

use wopr_models::fleet::{Node, NodeStatus};

/// From nodes with `status == active` and enough free capacity, picks
/// the one with the most free capacity; ties break by id ascending.
/// Every other status, including `returning` and `recovering`, is
/// ineligible (§4.8).
pub fn find_placement(nodes: &[Node], required_mb: u64) -> Option<&Node> {
    nodes
        .iter()
        .filter(|n| n.status == NodeStatus::Active && n.free_mb() >= required_mb)
        .max_by(|a, b| a.free_mb().cmp(&b.free_mb()).then_with(|| b.id.cmp(&a.id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn node(id: &str, status: NodeStatus, capacity_mb: u64, used_mb: u64) -> Node {
        let now = Utc::now();
        Node {
            id: id.to_string(),
            host: format!("{id}.internal"),
            status,
            capacity_mb,
            used_mb,
            agent_version: None,
            last_heartbeat_at: Some(now),
            registered_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn picks_most_free_capacity_among_active_nodes() {
        let nodes = vec![
            node("a", NodeStatus::Active, 8192, 7000),
            node("b", NodeStatus::Active, 8192, 1000),
            node("c", NodeStatus::Recovering, 8192, 0),
        ];
        let chosen = find_placement(&nodes, 512).unwrap();
        assert_eq!(chosen.id, "b");
    }

    #[test]
    fn excludes_non_active_and_insufficient_capacity() {
        let nodes = vec![
            node("returning", NodeStatus::Returning, 8192, 0),
            node("tight", NodeStatus::Active, 1024, 900),
        ];
        assert!(find_placement(&nodes, 512).is_none());
    }

    #[test]
    fn ties_break_by_id_ascending() {
        let nodes = vec![
            node("zeta", NodeStatus::Active, 4096, 0),
            node("alpha", NodeStatus::Active, 4096, 0),
        ];
        let chosen = find_placement(&nodes, 100).unwrap();
        assert_eq!(chosen.id, "alpha");
    }
}
