use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Kahn's algorithm over `edges` (`from` runs before `to`). Among the nodes
/// that are ready, the one with the smallest `(name, index)` goes first, so
/// the result depends only on the constraints and the names. Nodes that share
/// a name, such as closures defined in the same function, keep the order in
/// which they were added.
///
/// On a cycle, returns the nodes that could not be placed.
pub(crate) fn topological_order(names: &[&str], edges: &[(usize, usize)]) -> Result<Vec<usize>, Vec<usize>> {
    let mut successors = vec![Vec::new(); names.len()];
    let mut in_degree = vec![0usize; names.len()];

    let mut edges = edges.to_vec();
    edges.sort_unstable();
    edges.dedup();
    for (from, to) in edges {
        successors[from].push(to);
        in_degree[to] += 1;
    }

    let mut ready: BinaryHeap<Reverse<(&str, usize)>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(index, _)| Reverse((names[index], index)))
        .collect();

    let mut order = Vec::with_capacity(names.len());
    while let Some(Reverse((_, index))) = ready.pop() {
        order.push(index);
        for &next in &successors[index] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse((names[next], next)));
            }
        }
    }

    if order.len() == names.len() {
        Ok(order)
    } else {
        Err((0..names.len()).filter(|&index| in_degree[index] > 0).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ties_are_broken_by_name() {
        let names = ["c", "a", "b"];
        assert_eq!(topological_order(&names, &[]), Ok(vec![1, 2, 0]));
    }

    #[test]
    fn equal_names_keep_insertion_order() {
        let names = ["setup::{{closure}}", "setup::{{closure}}", "a"];
        assert_eq!(topological_order(&names, &[]), Ok(vec![2, 0, 1]));
    }

    #[test]
    fn edges_override_names() {
        let names = ["a", "b", "c"];
        assert_eq!(topological_order(&names, &[(2, 0), (1, 2)]), Ok(vec![1, 2, 0]));
    }

    #[test]
    fn duplicate_edges_are_harmless() {
        let names = ["a", "b"];
        assert_eq!(topological_order(&names, &[(1, 0), (1, 0)]), Ok(vec![1, 0]));
    }

    #[test]
    fn cycles_report_their_members() {
        let names = ["a", "b", "c", "d"];
        assert_eq!(topological_order(&names, &[(0, 1), (1, 2), (2, 1)]), Err(vec![1, 2]));
    }
}
