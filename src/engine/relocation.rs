//! Administrative relocation of a node.
//!
//! A move renumbers the remaining children of the old parent to `1..=n`,
//! renumbers the children of the new parent the same way before appending the
//! moved node, and re-levels every descendant of the moved node.

use std::collections::{HashSet, VecDeque};

use super::error::RelocateError;
use crate::config::BonusSettings;
use crate::model::{Level, MemberId, Position, ROOT_POSITION, StructureNode};
use crate::store::{ChangeSet, Guard, NodeMove, TreeStore};

/// Where a relocated member ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    pub member: MemberId,
    pub parent: Option<MemberId>,
    pub level: Level,
    pub position: Position,
}

/// Whether `candidate` sits somewhere below `ancestor`.
pub(crate) fn is_descendant<S: TreeStore>(
    store: &S,
    candidate: MemberId,
    ancestor: MemberId,
) -> bool {
    let mut visited = HashSet::new();
    let mut current = store.node(candidate).and_then(|n| n.parent_id);
    while let Some(id) = current {
        if id == ancestor {
            return true;
        }
        if !visited.insert(id) {
            return false;
        }
        current = store.node(id).and_then(|n| n.parent_id);
    }
    false
}

/// Moves giving `siblings` contiguous positions starting at 1.
fn renumber(siblings: &[StructureNode]) -> impl Iterator<Item = NodeMove> + '_ {
    siblings.iter().zip(1..).filter_map(|(node, position)| {
        (node.position != position).then_some(NodeMove {
            user_id: node.user_id,
            parent_id: node.parent_id,
            position,
            level: node.level,
        })
    })
}

/// Moves re-leveling every descendant of `member` below its new `level`.
fn relevel<S: TreeStore>(store: &S, member: MemberId, level: Level, changes: &mut ChangeSet) {
    let mut visited = HashSet::from([member]);
    let mut queue = VecDeque::from([(member, level)]);

    while let Some((parent, parent_level)) = queue.pop_front() {
        for child in store.children(parent) {
            if !visited.insert(child.user_id) {
                continue;
            }
            let level = parent_level + 1;
            if child.level != level {
                changes.guard(Guard::Node(child));
                changes.moves.push(NodeMove {
                    user_id: child.user_id,
                    parent_id: child.parent_id,
                    position: child.position,
                    level,
                });
            }
            queue.push_back((child.user_id, level));
        }
    }
}

/// Plan moving `member` under `new_parent`, or to a new root when `None`.
pub(crate) fn plan<S: TreeStore>(
    store: &S,
    settings: &BonusSettings,
    member: MemberId,
    new_parent: Option<MemberId>,
) -> Result<(ChangeSet, Relocation), RelocateError> {
    if store.member(member).is_none() {
        return Err(RelocateError::MemberNotFound(member));
    }
    let node = *store
        .node(member)
        .ok_or(RelocateError::NoExistingNode(member))?;
    if new_parent == Some(member) {
        return Err(RelocateError::SelfParent(member));
    }

    let target = match new_parent {
        None => None,
        Some(parent) => {
            if store.member(parent).is_none() {
                return Err(RelocateError::ParentNotFound(parent));
            }
            let parent_node = *store
                .node(parent)
                .ok_or(RelocateError::ParentNotPlaced(parent))?;
            if is_descendant(store, parent, member) {
                return Err(RelocateError::CycleDetected(member, parent));
            }
            Some(parent_node)
        }
    };

    if node.parent_id == new_parent {
        let unchanged = Relocation {
            member,
            parent: node.parent_id,
            level: node.level,
            position: node.position,
        };
        return Ok((ChangeSet::default(), unchanged));
    }

    let mut changes = ChangeSet::default();
    changes.guard(Guard::Node(node));

    if let Some(old_parent) = node.parent_id {
        let remaining: Vec<StructureNode> = store
            .children(old_parent)
            .into_iter()
            .filter(|c| c.user_id != member)
            .collect();
        changes.guard(Guard::ChildCount {
            parent: old_parent,
            expected: remaining.len() + 1,
        });
        changes.moves.extend(renumber(&remaining));
    }

    let (position, level) = match target {
        None => (ROOT_POSITION, 0),
        Some(parent_node) => {
            let parent = parent_node.user_id;
            let siblings = store.children(parent);
            if siblings.len() >= settings.capacity {
                return Err(RelocateError::ParentFull(parent, siblings.len()));
            }
            changes.guard(Guard::Node(parent_node));
            changes.guard(Guard::ChildCount {
                parent,
                expected: siblings.len(),
            });
            changes.moves.extend(renumber(&siblings));
            (siblings.len() as Position + 1, parent_node.level + 1)
        }
    };

    changes.moves.push(NodeMove {
        user_id: member,
        parent_id: new_parent,
        position,
        level,
    });
    if level != node.level {
        relevel(store, member, level, &mut changes);
    }

    let relocation = Relocation {
        member,
        parent: new_parent,
        level,
        position,
    };
    Ok((changes, relocation))
}
