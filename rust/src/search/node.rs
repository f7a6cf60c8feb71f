use crate::world::IntPosition;

/// Path waypoint; links are indices into the owning `NodePath`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Node {
    pub x: i32,
    pub y: i32,
    pub parent: Option<u32>,
    pub child: Option<u32>,
}

impl Node {
    #[inline]
    pub fn pos(&self) -> IntPosition {
        IntPosition::new(self.x, self.y)
    }
}

/// A finished path stored as one contiguous arena
///
/// Index 0 is the start and the last index is the goal, so a path is
/// never half-present: either the whole arena exists or nothing does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePath {
    nodes: Vec<Node>,
    cost: u32,
}

impl NodePath {
    /// Link positions start-to-goal; `None` for an empty slice
    pub fn from_positions(positions: &[IntPosition], cost: u32) -> Option<Self> {
        if positions.is_empty() {
            return None;
        }
        let last = positions.len() - 1;
        let nodes = positions
            .iter()
            .enumerate()
            .map(|(i, pos)| Node {
                x: pos.x,
                y: pos.y,
                parent: (i > 0).then(|| i as u32 - 1),
                child: (i < last).then(|| i as u32 + 1),
            })
            .collect();
        Some(Self { nodes, cost })
    }

    pub fn start(&self) -> IntPosition {
        self.nodes[0].pos()
    }

    pub fn goal(&self) -> IntPosition {
        self.nodes[self.nodes.len() - 1].pos()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Sum of step costs along the path
    pub fn cost(&self) -> u32 {
        self.cost
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, index: u32) -> Option<&Node> {
        self.nodes.get(index as usize)
    }

    /// Follow child links from the start
    pub fn positions(&self) -> impl Iterator<Item = IntPosition> + '_ {
        let mut next = Some(0u32);
        std::iter::from_fn(move || {
            let node = self.nodes.get(next? as usize)?;
            next = node.child;
            Some(node.pos())
        })
    }
}
