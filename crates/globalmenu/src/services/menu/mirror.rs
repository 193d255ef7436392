//! Local mirror of a remote menu tree.
//!
//! Items live in an arena keyed by remote id; parent links are ids, never
//! owning references, so submenu cycles are impossible by construction. The
//! root menu (id 0) exists from the start.
//!
//! Deletion is deferred: an item removed while its menu is shown in a popup
//! stays in the arena, marked retired, until the popup closes and `settle()`
//! runs. This is a lifetime contract with the widget layer, not a locking
//! concern — everything here runs on the GTK main thread.

use std::collections::{HashMap, HashSet};

use super::types::{
    IconSource, ItemKind, MenuId, PropertyUpdate, ROOT_ID, ToggleKind, strip_mnemonic,
};
use crate::services::menu::shortcut::KeySequence;

/// Mirrored state of one remote menu item.
#[derive(Debug, Clone)]
pub struct MenuItem {
    pub kind: ItemKind,
    pub has_submenu: bool,
    pub toggle_kind: ToggleKind,
    /// Wire-form label ('_' mnemonic marker, '__' escape).
    pub label: String,
    pub enabled: bool,
    pub visible: bool,
    pub toggle_state: Option<bool>,
    pub icon: IconSource,
    pub shortcut: Option<KeySequence>,
}

impl Default for MenuItem {
    fn default() -> Self {
        Self {
            kind: ItemKind::Standard,
            has_submenu: false,
            toggle_kind: ToggleKind::None,
            label: String::new(),
            enabled: true,
            visible: true,
            toggle_state: None,
            icon: IconSource::None,
            shortcut: None,
        }
    }
}

impl MenuItem {
    /// Label with the mnemonic marker stripped, for plain-text rows.
    pub fn display_label(&self) -> String {
        strip_mnemonic(&self.label)
    }
}

#[derive(Debug)]
struct Node {
    item: MenuItem,
    parent: Option<MenuId>,
    children: Vec<MenuId>,
    retired: bool,
}

/// Outcome of applying one property update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyResult {
    Created,
    /// An existing item changed in a way the row model can observe
    /// (label, enabled, visible, toggle state, or icon).
    Updated,
    Unchanged,
}

/// Arena of mirrored menu items for one importer instance.
pub struct ActionMirror {
    nodes: HashMap<MenuId, Node>,
    /// Menu ids currently shown in an open popup.
    open_menus: HashSet<MenuId>,
    /// Ids removed from their parent but kept alive for an open popup.
    retired: Vec<MenuId>,
}

impl ActionMirror {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT_ID,
            Node {
                item: MenuItem {
                    has_submenu: true,
                    ..MenuItem::default()
                },
                parent: None,
                children: Vec::new(),
                retired: false,
            },
        );
        Self {
            nodes,
            open_menus: HashSet::new(),
            retired: Vec::new(),
        }
    }

    /// Whether `id` is a live (non-retired) item.
    pub fn contains(&self, id: MenuId) -> bool {
        self.nodes.get(&id).is_some_and(|n| !n.retired)
    }

    pub fn item(&self, id: MenuId) -> Option<&MenuItem> {
        self.nodes.get(&id).map(|n| &n.item)
    }

    /// Children of a menu, in remote order. Empty for unknown ids and leaves.
    pub fn children(&self, id: MenuId) -> &[MenuId] {
        self.nodes.get(&id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn parent(&self, id: MenuId) -> Option<MenuId> {
        self.nodes.get(&id).and_then(|n| n.parent)
    }

    /// Apply a property update to `id`, creating it under `parent` if unseen.
    ///
    /// `structural` marks updates coming from a layout response: only those
    /// may set the creation-time properties (kind, submenu flag, toggle
    /// kind) on an existing item — plain property updates ignore them, the
    /// way the wire protocol intends.
    pub fn create_or_update(
        &mut self,
        parent: MenuId,
        id: MenuId,
        update: &PropertyUpdate,
        structural: bool,
    ) -> ApplyResult {
        if let Some(node) = self.nodes.get_mut(&id) {
            if node.retired {
                // The remote reused an id we are still holding for an open
                // popup; revive it in place.
                node.retired = false;
                node.parent = Some(parent);
                self.retired.retain(|r| *r != id);
                self.attach(parent, id);
            }
            return Self::apply_to_item(
                self.nodes.get_mut(&id).map(|n| &mut n.item),
                update,
                structural,
            );
        }

        let mut item = MenuItem::default();
        apply_fields(&mut item, update, true);
        self.nodes.insert(
            id,
            Node {
                item,
                parent: Some(parent),
                children: Vec::new(),
                retired: false,
            },
        );
        self.attach(parent, id);
        ApplyResult::Created
    }

    fn apply_to_item(
        item: Option<&mut MenuItem>,
        update: &PropertyUpdate,
        structural: bool,
    ) -> ApplyResult {
        let Some(item) = item else {
            return ApplyResult::Unchanged;
        };
        if apply_fields(item, update, structural) {
            ApplyResult::Updated
        } else {
            ApplyResult::Unchanged
        }
    }

    /// Apply a property update to an already-known id. Unknown ids are
    /// silently ignored (the id belongs to a menu not yet fetched).
    pub fn update_existing(&mut self, id: MenuId, update: &PropertyUpdate) -> ApplyResult {
        match self.nodes.get_mut(&id) {
            Some(node) if !node.retired => Self::apply_to_item(Some(&mut node.item), update, false),
            _ => ApplyResult::Unchanged,
        }
    }

    fn attach(&mut self, parent: MenuId, id: MenuId) {
        if let Some(parent_node) = self.nodes.get_mut(&parent)
            && !parent_node.children.contains(&id)
        {
            parent_node.children.push(id);
        }
    }

    /// Move `id` to the tail of its parent's child list. Reconciliation
    /// visits survivors in remote order, so after a full pass the local
    /// order equals the remote one.
    pub fn move_to_tail(&mut self, parent: MenuId, id: MenuId) {
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.retain(|c| *c != id);
            parent_node.children.push(id);
        }
    }

    /// Remove every child of `parent` whose id is not in `surviving`.
    ///
    /// Items whose menu is currently open are retired instead of freed.
    /// Returns the ids that were detached.
    pub fn remove_if_absent(
        &mut self,
        parent: MenuId,
        surviving: &HashSet<MenuId>,
    ) -> Vec<MenuId> {
        let Some(parent_node) = self.nodes.get_mut(&parent) else {
            return Vec::new();
        };

        let doomed: Vec<MenuId> = parent_node
            .children
            .iter()
            .copied()
            .filter(|id| !surviving.contains(id))
            .collect();

        parent_node
            .children
            .retain(|id| surviving.contains(id));

        let defer = self.open_menus.contains(&parent);
        for id in &doomed {
            if defer {
                self.retire(*id);
            } else {
                self.free_subtree(*id);
            }
        }

        doomed
    }

    fn retire(&mut self, id: MenuId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.retired = true;
            self.retired.push(id);
        }
    }

    fn free_subtree(&mut self, id: MenuId) {
        if let Some(node) = self.nodes.remove(&id) {
            self.retired.retain(|r| *r != id);
            for child in node.children {
                self.free_subtree(child);
            }
        }
    }

    /// Record that a menu's popup is now shown.
    pub fn mark_open(&mut self, id: MenuId) {
        self.open_menus.insert(id);
    }

    /// Record that a menu's popup closed, then free any retired items whose
    /// parent menu is no longer open.
    pub fn mark_closed(&mut self, id: MenuId) {
        self.open_menus.remove(&id);
        self.settle();
    }

    /// Free retired items that no open popup can still reference.
    pub fn settle(&mut self) {
        let to_free: Vec<MenuId> = self
            .retired
            .iter()
            .copied()
            .filter(|id| {
                self.nodes
                    .get(id)
                    .and_then(|n| n.parent)
                    .is_none_or(|parent| !self.open_menus.contains(&parent))
            })
            .collect();
        for id in to_free {
            self.free_subtree(id);
        }
    }

    /// Number of live items, root excluded.
    #[cfg(test)]
    fn live_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|(id, n)| **id != ROOT_ID && !n.retired)
            .count()
    }
}

impl Default for ActionMirror {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply `update` to `item`; returns whether an observable field changed.
fn apply_fields(item: &mut MenuItem, update: &PropertyUpdate, structural: bool) -> bool {
    let mut changed = false;

    if structural {
        if let Some(kind) = update.kind {
            item.kind = kind;
        }
        if let Some(has_submenu) = update.has_submenu {
            item.has_submenu = has_submenu;
        }
        if let Some(toggle_kind) = update.toggle_kind {
            item.toggle_kind = toggle_kind;
        }
    }

    if let Some(ref label) = update.label
        && item.label != *label
    {
        item.label = label.clone();
        changed = true;
    }
    if let Some(enabled) = update.enabled
        && item.enabled != enabled
    {
        item.enabled = enabled;
        changed = true;
    }
    if let Some(visible) = update.visible
        && item.visible != visible
    {
        item.visible = visible;
        changed = true;
    }
    if let Some(toggle_state) = update.toggle_state
        && item.toggle_state != toggle_state
    {
        item.toggle_state = toggle_state;
        changed = true;
    }
    if let Some(ref icon) = update.icon
        && !item.icon.same_as(icon)
    {
        item.icon = icon.clone();
        changed = true;
    }
    if let Some(ref shortcut) = update.shortcut
        && item.shortcut != *shortcut
    {
        item.shortcut = shortcut.clone();
        // Shortcut hints render inside popovers only, so this is not an
        // observable row change.
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label_update(label: &str) -> PropertyUpdate {
        PropertyUpdate {
            label: Some(label.to_string()),
            ..PropertyUpdate::default()
        }
    }

    fn submenu_update(label: &str) -> PropertyUpdate {
        PropertyUpdate {
            label: Some(label.to_string()),
            has_submenu: Some(true),
            ..PropertyUpdate::default()
        }
    }

    fn survivors(ids: &[MenuId]) -> HashSet<MenuId> {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_create_and_query() {
        let mut mirror = ActionMirror::new();
        assert_eq!(
            mirror.create_or_update(ROOT_ID, 1, &label_update("_File"), true),
            ApplyResult::Created
        );
        assert_eq!(mirror.children(ROOT_ID), &[1]);
        assert_eq!(mirror.item(1).unwrap().display_label(), "File");
        assert!(mirror.item(1).unwrap().enabled);
        assert!(mirror.item(1).unwrap().visible);
    }

    #[test]
    fn test_partial_update_preserves_untouched_fields() {
        let mut mirror = ActionMirror::new();
        let initial = PropertyUpdate {
            label: Some("X".to_string()),
            enabled: Some(false),
            ..PropertyUpdate::default()
        };
        mirror.create_or_update(ROOT_ID, 1, &initial, true);

        mirror.create_or_update(ROOT_ID, 1, &label_update("Y"), true);
        let item = mirror.item(1).unwrap();
        assert_eq!(item.label, "Y");
        assert!(!item.enabled, "enabled must survive a label-only update");
    }

    #[test]
    fn test_reapply_same_update_is_unchanged() {
        let mut mirror = ActionMirror::new();
        let update = label_update("File");
        mirror.create_or_update(ROOT_ID, 1, &update, true);
        assert_eq!(
            mirror.create_or_update(ROOT_ID, 1, &update, true),
            ApplyResult::Unchanged
        );
    }

    #[test]
    fn test_structural_fields_ignored_on_plain_updates() {
        let mut mirror = ActionMirror::new();
        mirror.create_or_update(ROOT_ID, 1, &label_update("File"), true);

        let sneaky = PropertyUpdate {
            kind: Some(ItemKind::Separator),
            has_submenu: Some(true),
            ..PropertyUpdate::default()
        };
        mirror.update_existing(1, &sneaky);
        let item = mirror.item(1).unwrap();
        assert_eq!(item.kind, ItemKind::Standard);
        assert!(!item.has_submenu);
    }

    #[test]
    fn test_update_unknown_id_is_ignored() {
        let mut mirror = ActionMirror::new();
        assert_eq!(
            mirror.update_existing(42, &label_update("ghost")),
            ApplyResult::Unchanged
        );
        assert!(!mirror.contains(42));
    }

    #[test]
    fn test_remove_if_absent_immediate() {
        let mut mirror = ActionMirror::new();
        mirror.create_or_update(ROOT_ID, 1, &label_update("A"), true);
        mirror.create_or_update(ROOT_ID, 2, &label_update("B"), true);
        mirror.create_or_update(ROOT_ID, 3, &label_update("C"), true);

        let removed = mirror.remove_if_absent(ROOT_ID, &survivors(&[1, 3]));
        assert_eq!(removed, vec![2]);
        assert_eq!(mirror.children(ROOT_ID), &[1, 3]);
        assert!(!mirror.contains(2));
        assert_eq!(mirror.live_count(), 2);
    }

    #[test]
    fn test_deferred_removal_while_popup_open() {
        let mut mirror = ActionMirror::new();
        mirror.create_or_update(ROOT_ID, 1, &label_update("A"), true);
        mirror.create_or_update(ROOT_ID, 2, &label_update("B"), true);

        mirror.mark_open(ROOT_ID);
        let removed = mirror.remove_if_absent(ROOT_ID, &survivors(&[1]));
        assert_eq!(removed, vec![2]);

        // Still alive for the open popup, but no longer a live row
        assert!(mirror.item(2).is_some());
        assert!(!mirror.contains(2));
        assert_eq!(mirror.children(ROOT_ID), &[1]);

        mirror.mark_closed(ROOT_ID);
        assert!(mirror.item(2).is_none(), "retired item freed after close");
    }

    #[test]
    fn test_settle_invariant_after_arbitrary_sequence() {
        // After settle, no id absent from the latest survivor set remains.
        let mut mirror = ActionMirror::new();
        for id in 1..=5 {
            mirror.create_or_update(ROOT_ID, id, &label_update("x"), true);
        }
        mirror.mark_open(ROOT_ID);
        mirror.remove_if_absent(ROOT_ID, &survivors(&[1, 2]));
        mirror.create_or_update(ROOT_ID, 6, &label_update("y"), true);
        mirror.remove_if_absent(ROOT_ID, &survivors(&[2, 6]));
        mirror.mark_closed(ROOT_ID);

        assert_eq!(mirror.children(ROOT_ID), &[2, 6]);
        assert_eq!(mirror.live_count(), 2);
        for id in [1, 3, 4, 5] {
            assert!(mirror.item(id).is_none(), "id {} should be freed", id);
        }
    }

    #[test]
    fn test_subtree_freed_with_parent() {
        let mut mirror = ActionMirror::new();
        mirror.create_or_update(ROOT_ID, 1, &submenu_update("File"), true);
        mirror.create_or_update(1, 10, &label_update("Open"), true);
        mirror.create_or_update(1, 11, &label_update("Save"), true);

        mirror.remove_if_absent(ROOT_ID, &survivors(&[]));
        assert!(mirror.item(1).is_none());
        assert!(mirror.item(10).is_none());
        assert!(mirror.item(11).is_none());
    }

    #[test]
    fn test_move_to_tail_matches_remote_order() {
        let mut mirror = ActionMirror::new();
        for id in [1, 2, 3] {
            mirror.create_or_update(ROOT_ID, id, &label_update("x"), true);
        }
        // Remote now reports order [3, 1, 2]
        for id in [3, 1, 2] {
            mirror.move_to_tail(ROOT_ID, id);
        }
        assert_eq!(mirror.children(ROOT_ID), &[3, 1, 2]);
    }

    #[test]
    fn test_revived_retired_id() {
        let mut mirror = ActionMirror::new();
        mirror.create_or_update(ROOT_ID, 1, &label_update("A"), true);
        mirror.mark_open(ROOT_ID);
        mirror.remove_if_absent(ROOT_ID, &survivors(&[]));
        assert!(!mirror.contains(1));

        // Remote re-announces id 1 before the popup closes
        mirror.create_or_update(ROOT_ID, 1, &label_update("A2"), true);
        assert!(mirror.contains(1));
        assert_eq!(mirror.children(ROOT_ID), &[1]);

        mirror.mark_closed(ROOT_ID);
        assert!(mirror.contains(1), "revived item must survive settle");
    }
}
