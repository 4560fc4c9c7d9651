use bitvec::prelude::*;

use crate::{BlockId, Graph};

enum StackOp {
    Push,
    RemovePath,
}

#[derive(Clone, Copy, PartialEq)]
enum VisitedNode {
    Unvisited,
    OnPath,
    Removed,
}

struct DfsResult {
    post_order: Vec<BlockId>,
    back_edges: Vec<(BlockId, BlockId)>,
}

impl Graph {
    fn depth_first_search(&self) -> DfsResult {
        use StackOp::*;
        use VisitedNode::*;
        let mut result = DfsResult {
            post_order: Vec::new(),
            back_edges: Vec::new(),
        };
        let Some(entry) = self.entry_block() else {
            return result;
        };
        let mut visited = vec![Unvisited; self.blocks.len()];
        let mut stack = vec![(Push, entry, None)];
        while let Some((op, node, from)) = stack.pop() {
            match op {
                RemovePath => {
                    visited[node.index()] = Removed;
                    result.post_order.push(node);
                }
                Push => match visited[node.index()] {
                    OnPath => {
                        if let Some(from) = from {
                            result.back_edges.push((from, node));
                        }
                    }
                    Removed => {}
                    Unvisited => {
                        visited[node.index()] = OnPath;
                        stack.push((RemovePath, node, None));
                        // reversed so that the first successor is visited first
                        for &next in self.blocks[node.index()].successors.iter().rev() {
                            stack.push((Push, next, Some(node)));
                        }
                    }
                },
            }
        }
        result
    }

    pub fn compute_reverse_post_order(&mut self) {
        let mut order = self.depth_first_search().post_order;
        order.reverse();
        self.reverse_post_order = order;
    }

    /// Finds natural loops from the back edges and records for each block the
    /// header of the innermost loop containing it.
    pub fn analyze_loops(&mut self) {
        let back_edges = self.depth_first_search().back_edges;
        let n = self.blocks.len();
        // one body per header; back edges to the same header share it
        let mut loops: Vec<(BlockId, BitVec)> = Vec::new();
        for (tail, header) in back_edges {
            let index = match loops.iter().position(|(h, _)| *h == header) {
                Some(index) => index,
                None => {
                    let mut body = bitvec![0; n];
                    body.set(header.index(), true);
                    loops.push((header, body));
                    loops.len() - 1
                }
            };
            let body = &mut loops[index].1;
            let mut worklist = vec![tail];
            while let Some(block) = worklist.pop() {
                if body[block.index()] {
                    continue;
                }
                body.set(block.index(), true);
                worklist.extend(self.blocks[block.index()].predecessors.iter().copied());
            }
        }
        for block in &mut self.blocks {
            block.loop_header = loops
                .iter()
                .filter(|(_, body)| body[block.id.index()])
                .min_by_key(|(_, body)| body.count_ones())
                .map(|(header, _)| *header);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Graph, InstructionKind, Type};

    #[test]
    fn test_back_edge() {
        // B0 -> B1, B2; B1 -> B3; B2 -> B3; B3 -> B0
        let mut g = Graph::new("f");
        let blocks: Vec<_> = (0..4).map(|_| g.add_block()).collect();
        g.add_successor(blocks[0], blocks[1]);
        g.add_successor(blocks[0], blocks[2]);
        g.add_successor(blocks[1], blocks[3]);
        g.add_successor(blocks[2], blocks[3]);
        g.add_successor(blocks[3], blocks[0]);
        g.finalize();
        for &b in &blocks {
            assert_eq!(g.block(b).loop_header(), Some(blocks[0]));
        }
        assert!(g.block(blocks[0]).is_loop_header());
        assert_eq!(g.reverse_post_order()[0], blocks[0]);
        assert_eq!(g.reverse_post_order()[3], blocks[3]);
    }

    #[test]
    fn test_nested_loops() {
        // B0 -> B1 -> B2 -> B3 -> B2, B3 -> B4 -> B1, B1 -> B5
        let mut g = Graph::new("f");
        let b: Vec<_> = (0..6).map(|_| g.add_block()).collect();
        g.add_successor(b[0], b[1]);
        g.add_successor(b[1], b[2]);
        g.add_successor(b[1], b[5]);
        g.add_successor(b[2], b[3]);
        g.add_successor(b[3], b[2]);
        g.add_successor(b[3], b[4]);
        g.add_successor(b[4], b[1]);
        g.add_instruction(b[5], InstructionKind::ReturnVoid, Type::Void, &[]);
        g.finalize();
        assert_eq!(g.block(b[0]).loop_header(), None);
        assert_eq!(g.block(b[1]).loop_header(), Some(b[1]));
        assert_eq!(g.block(b[2]).loop_header(), Some(b[2]));
        assert_eq!(g.block(b[3]).loop_header(), Some(b[2]));
        assert_eq!(g.block(b[4]).loop_header(), Some(b[1]));
        assert!(!g.block(b[5]).is_in_loop());
        assert_eq!(g.reverse_post_order().len(), 6);
    }

    #[test]
    fn test_unreachable_blocks_are_not_ordered() {
        let mut g = Graph::new("f");
        let b0 = g.add_block();
        let _dead = g.add_block();
        g.finalize();
        assert_eq!(g.reverse_post_order(), &[b0]);
    }
}
