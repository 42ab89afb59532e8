//! Object hierarchy below a session's tree tops.
//!
//! Combinations are expanded through their union and intersection members;
//! subtracted members are left out. Regions are leaves.

use rtserver_db::{Database, EntryKind, MemberOp};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

/// One database object in a session's hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemNode {
    /// Object name.
    pub name: String,
    /// Component name carried by a region or combination.
    pub component: Option<String>,
    /// Members, in record order.
    pub children: Vec<ItemNode>,
}

impl ItemNode {
    fn leaf(name: &str) -> Self {
        Self {
            name: name.to_string(),
            component: None,
            children: Vec::new(),
        }
    }
}

/// Build one node per name that exists in `db`; missing names are skipped.
pub(crate) fn item_tree<'a>(db: &Database, tops: impl IntoIterator<Item = &'a str>) -> Result<Vec<ItemNode>> {
    let mut path = Vec::new();
    let mut nodes = Vec::new();
    for top in tops {
        if let Some(node) = fill(db, top, &mut path)? {
            nodes.push(node);
        }
    }
    Ok(nodes)
}

fn fill(db: &Database, name: &str, path: &mut Vec<String>) -> Result<Option<ItemNode>> {
    let Some(entry) = db.lookup_quiet(name) else {
        debug!(name, "item not in database");
        return Ok(None);
    };
    if !matches!(entry.kind, EntryKind::Region | EntryKind::Combination) {
        return Ok(Some(ItemNode::leaf(name)));
    }

    let comb = db.combination(entry)?;
    let mut node = ItemNode {
        component: comb.header.component,
        ..ItemNode::leaf(name)
    };
    if comb.header.is_region {
        return Ok(Some(node));
    }

    path.push(name.to_string());
    for member in comb.members.iter().filter(|m| m.op != MemberOp::Subtract) {
        if path.contains(&member.name) {
            warn!(combination = name, member = %member.name, "combination contains itself");
            continue;
        }
        if let Some(child) = fill(db, &member.name, path)? {
            node.children.push(child);
        }
    }
    path.pop();
    Ok(Some(node))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::fixture_writer;
    use rtserver_db::Member;

    fn member(op: MemberOp, name: &str) -> Member {
        Member {
            op,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_tree_stops_at_regions() {
        let db = Database::from_bytes(fixture_writer().finish()).unwrap();
        let tree = item_tree(&db, ["all", "ghost"]).unwrap();
        assert_eq!(tree.len(), 1);

        let all = &tree[0];
        assert_eq!(all.name, "all");
        assert_eq!(all.component, None);
        let names: Vec<_> = all.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["hull", "turret", "air.r"]);

        let hull_region = &all.children[0].children[0];
        assert_eq!(hull_region.name, "box1.r");
        assert_eq!(hull_region.component.as_deref(), Some("HULL"));
        assert!(hull_region.children.is_empty());
        assert_eq!(all.children[2].component.as_deref(), Some("CREW"));
    }

    #[test]
    fn test_subtracted_members_and_solids() {
        let mut w = fixture_writer();
        w.combination(
            "cut",
            &[
                member(MemberOp::Union, "box1.s"),
                member(MemberOp::Subtract, "box2.r"),
                member(MemberOp::Intersect, "turret"),
            ],
        )
        .unwrap();
        let db = Database::from_bytes(w.finish()).unwrap();

        let tree = item_tree(&db, ["cut"]).unwrap();
        let cut = &tree[0];
        let names: Vec<_> = cut.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["box1.s", "turret"]);
        assert_eq!(cut.children[0], ItemNode::leaf("box1.s"));
    }

    #[test]
    fn test_self_reference_is_cut() {
        let mut w = fixture_writer();
        w.combination("loop", &[member(MemberOp::Union, "loop"), member(MemberOp::Union, "hull")])
            .unwrap();
        let db = Database::from_bytes(w.finish()).unwrap();

        let tree = item_tree(&db, ["loop"]).unwrap();
        assert_eq!(tree[0].children.len(), 1);
        assert_eq!(tree[0].children[0].name, "hull");
    }
}
