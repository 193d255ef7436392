//! Window-to-menu discovery logic, independent of any windowing backend.
//!
//! Backends feed focus, property and removal events into
//! [`DiscoveryMachine`] and execute the effects it returns. Keeping the
//! logic pure makes the awkward scenarios testable without a display
//! server: dialogs inheriting their parent's menu, applications that
//! announce their menu a beat after mapping the window, pinned windows,
//! and the visibility filter.

use std::collections::HashSet;

use globalmenu_core::ScreenBounds;

/// Backend-specific window handle. X11 window ids fit; Wayland backends use
/// their toplevel sequence numbers.
pub type WindowId = u32;

/// Bus address of a window's menu exporter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuAddress {
    pub service: String,
    pub path: String,
}

impl MenuAddress {
    pub fn new(service: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            path: path.into(),
        }
    }
}

/// Discovery behavior knobs, mapped from `[menu]` configuration.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryConfig {
    /// Tie visibility to the window actually holding focus.
    pub filter_by_active: bool,
    /// When set, never look at transient ancestors: a window only gets its
    /// own menu.
    pub filter_children: bool,
    /// Follow one fixed window instead of the focus.
    pub pinned: Option<WindowId>,
    /// Only windows whose geometry center falls inside this rectangle count
    /// as visible. `None` means everywhere.
    pub bounds: Option<ScreenBounds>,
}

/// What the backend must do after feeding an event into the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Watch `window` for menu-announcement property changes.
    WatchWindow(WindowId),
    /// Stop watching `window`.
    UnwatchWindow(WindowId),
    /// Publish the active menu address; `None` means no menu available.
    Publish(Option<MenuAddress>),
    /// The visibility filter verdict changed.
    SetVisible(bool),
}

/// How the backend answers questions about windows.
pub trait WindowQuery {
    /// Menu announcement carried by the window itself, if any.
    fn menu_address(&self, window: WindowId) -> Option<MenuAddress>;

    /// The window this one is transient for, if any.
    fn transient_parent(&self, window: WindowId) -> Option<WindowId>;

    /// Windows excluded from discovery: skip-taskbar, utility and
    /// desktop-type surfaces, including the applet's own.
    fn is_skipped(&self, window: WindowId) -> bool;

    fn is_minimized(&self, window: WindowId) -> bool;

    /// Scaling-corrected geometry center, for the bounds check. `None` when
    /// the backend cannot tell (treated as in-bounds).
    fn center(&self, window: WindowId) -> Option<(i32, i32)>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    NoWindow,
    /// A window is focused but has announced no menu yet; its properties are
    /// being watched in case the announcement is late.
    Awaiting { window: WindowId },
    Announced { window: WindowId, address: MenuAddress },
}

/// Focus-follows-menu state machine shared by all backends.
pub struct DiscoveryMachine {
    config: DiscoveryConfig,
    state: State,
    last_active: Option<WindowId>,
    visible: bool,
}

impl DiscoveryMachine {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            state: State::NoWindow,
            last_active: None,
            visible: false,
        }
    }

    /// Currently published menu address, if any.
    pub fn current(&self) -> Option<&MenuAddress> {
        match &self.state {
            State::Announced { address, .. } => Some(address),
            _ => None,
        }
    }

    /// Window whose menu (or pending announcement) is being tracked.
    pub fn tracked_window(&self) -> Option<WindowId> {
        match &self.state {
            State::NoWindow => None,
            State::Awaiting { window } | State::Announced { window, .. } => Some(*window),
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Feed a focus change. `None` means focus left every known window.
    pub fn active_window_changed(
        &mut self,
        window: Option<WindowId>,
        query: &impl WindowQuery,
    ) -> Vec<Effect> {
        // Pinned mode: focus moving anywhere else is not our business.
        if let Some(pinned) = self.config.pinned
            && window != Some(pinned)
        {
            return Vec::new();
        }

        let Some(window) = window else {
            self.last_active = None;
            let mut effects = self.transition(State::NoWindow);
            effects.extend(self.sync_visibility(None, query));
            return effects;
        };

        if query.is_skipped(window) {
            // A skipped surface whose transient chain leads back to the
            // tracked window (a dialog of the shown application) only moves
            // the visibility verdict; anything else is ignored outright.
            if self.config.filter_by_active
                && self
                    .tracked_window()
                    .is_some_and(|tracked| is_transient_descendant(window, tracked, query))
            {
                self.last_active = Some(window);
                return self.sync_visibility(self.tracked_window(), query);
            }
            return Vec::new();
        }

        self.last_active = Some(window);
        match self.resolve(window, query) {
            Some((owner, address)) => {
                let mut effects = self.transition(State::Announced {
                    window: owner,
                    address,
                });
                effects.extend(self.sync_visibility(Some(owner), query));
                effects
            }
            None => {
                let mut effects = self.transition(State::Awaiting { window });
                effects.extend(self.sync_visibility(None, query));
                effects
            }
        }
    }

    /// Feed a property change on a window. While awaiting a late
    /// announcement on that exact window, the focus transition re-runs; for
    /// the announced window, the visibility verdict is recomputed (minimize
    /// and restore arrive as state-property changes). Anything else is
    /// ignored.
    pub fn window_property_changed(
        &mut self,
        window: WindowId,
        query: &impl WindowQuery,
    ) -> Vec<Effect> {
        match self.state {
            State::Awaiting { window: awaited } if window == awaited => {
                self.active_window_changed(Some(window), query)
            }
            State::Announced {
                window: tracked, ..
            } if window == tracked => self.sync_visibility(Some(tracked), query),
            _ => Vec::new(),
        }
    }

    /// The tracked window went away.
    pub fn window_removed(&mut self, window: WindowId, query: &impl WindowQuery) -> Vec<Effect> {
        if self.tracked_window() != Some(window) {
            return Vec::new();
        }
        if self.last_active == Some(window) {
            self.last_active = None;
        }
        let mut effects = self.transition(State::NoWindow);
        effects.extend(self.sync_visibility(None, query));
        effects
    }

    /// Re-run discovery on the tracked window. Backends without property
    /// watching call this from a delayed single-shot after a focus change.
    pub fn recheck(&mut self, query: &impl WindowQuery) -> Vec<Effect> {
        match self.state {
            State::Awaiting { window } => self.window_property_changed(window, query),
            _ => Vec::new(),
        }
    }

    /// Find the menu to show for `window`. With `filter_children` off, the
    /// transient-ancestor chain is searched first, nearest ancestor first,
    /// so dialogs resolve to their main window's menu; first hit wins.
    fn resolve(
        &self,
        window: WindowId,
        query: &impl WindowQuery,
    ) -> Option<(WindowId, MenuAddress)> {
        if !self.config.filter_children {
            let mut seen = HashSet::from([window]);
            let mut current = query.transient_parent(window);
            while let Some(ancestor) = current {
                if !seen.insert(ancestor) {
                    break;
                }
                if let Some(address) = query.menu_address(ancestor) {
                    return Some((ancestor, address));
                }
                current = query.transient_parent(ancestor);
            }
        }
        query.menu_address(window).map(|address| (window, address))
    }

    /// Visibility verdict for the tracked window: focused (or an ancestor of
    /// the focused window, when filtering by active), not minimized, and its
    /// center inside the configured bounds.
    fn sync_visibility(
        &mut self,
        window: Option<WindowId>,
        query: &impl WindowQuery,
    ) -> Vec<Effect> {
        let visible = window.is_some_and(|window| {
            let focused = !self.config.filter_by_active
                || self
                    .last_active
                    .is_some_and(|active| is_transient_descendant(active, window, query));
            let in_bounds = match (self.config.bounds, query.center(window)) {
                (Some(bounds), Some((x, y))) => bounds.contains(x, y),
                _ => true,
            };
            focused && !query.is_minimized(window) && in_bounds
        });

        if visible == self.visible {
            return Vec::new();
        }
        self.visible = visible;
        vec![Effect::SetVisible(visible)]
    }

    fn transition(&mut self, next: State) -> Vec<Effect> {
        if self.state == next {
            return Vec::new();
        }

        let mut effects = Vec::new();
        match self.state {
            State::Awaiting { window } | State::Announced { window, .. } => {
                effects.push(Effect::UnwatchWindow(window));
            }
            State::NoWindow => {}
        }

        // Announced windows stay watched too: minimize state flips arrive as
        // property changes on the tracked window.
        match &next {
            State::NoWindow => effects.push(Effect::Publish(None)),
            State::Awaiting { window } => {
                effects.push(Effect::WatchWindow(*window));
                effects.push(Effect::Publish(None));
            }
            State::Announced { window, address } => {
                effects.push(Effect::WatchWindow(*window));
                effects.push(Effect::Publish(Some(address.clone())));
            }
        }

        self.state = next;
        effects
    }
}

/// Whether `window` equals `ancestor` or reaches it through transient
/// parents. Cycle-safe.
fn is_transient_descendant(
    window: WindowId,
    ancestor: WindowId,
    query: &impl WindowQuery,
) -> bool {
    let mut seen = HashSet::new();
    let mut current = window;
    loop {
        if current == ancestor {
            return true;
        }
        if !seen.insert(current) {
            return false;
        }
        match query.transient_parent(current) {
            Some(parent) => current = parent,
            None => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeWindows {
        menus: HashMap<WindowId, MenuAddress>,
        parents: HashMap<WindowId, WindowId>,
        skipped: HashSet<WindowId>,
        minimized: HashSet<WindowId>,
        centers: HashMap<WindowId, (i32, i32)>,
    }

    impl FakeWindows {
        fn with_menu(mut self, window: WindowId, service: &str) -> Self {
            self.menus
                .insert(window, MenuAddress::new(service, "/MenuBar"));
            self
        }

        fn with_parent(mut self, child: WindowId, parent: WindowId) -> Self {
            self.parents.insert(child, parent);
            self
        }

        fn with_skipped(mut self, window: WindowId) -> Self {
            self.skipped.insert(window);
            self
        }
    }

    impl WindowQuery for FakeWindows {
        fn menu_address(&self, window: WindowId) -> Option<MenuAddress> {
            self.menus.get(&window).cloned()
        }

        fn transient_parent(&self, window: WindowId) -> Option<WindowId> {
            self.parents.get(&window).copied()
        }

        fn is_skipped(&self, window: WindowId) -> bool {
            self.skipped.contains(&window)
        }

        fn is_minimized(&self, window: WindowId) -> bool {
            self.minimized.contains(&window)
        }

        fn center(&self, window: WindowId) -> Option<(i32, i32)> {
            self.centers.get(&window).copied()
        }
    }

    fn published(effects: &[Effect]) -> Option<Option<MenuAddress>> {
        effects.iter().rev().find_map(|e| match e {
            Effect::Publish(address) => Some(address.clone()),
            _ => None,
        })
    }

    fn machine() -> DiscoveryMachine {
        DiscoveryMachine::new(DiscoveryConfig::default())
    }

    #[test]
    fn test_focus_window_with_menu() {
        let windows = FakeWindows::default().with_menu(1, ":1.10");
        let mut machine = machine();

        let effects = machine.active_window_changed(Some(1), &windows);
        assert_eq!(
            published(&effects),
            Some(Some(MenuAddress::new(":1.10", "/MenuBar")))
        );
        assert!(effects.contains(&Effect::SetVisible(true)));
        assert_eq!(machine.tracked_window(), Some(1));
    }

    #[test]
    fn test_focus_loss_clears_menu() {
        let windows = FakeWindows::default().with_menu(1, ":1.10");
        let mut machine = machine();
        machine.active_window_changed(Some(1), &windows);

        let effects = machine.active_window_changed(None, &windows);
        assert_eq!(published(&effects), Some(None));
        assert!(effects.contains(&Effect::SetVisible(false)));
        assert!(machine.current().is_none());
    }

    #[test]
    fn test_dialog_inherits_ancestor_menu() {
        // Dialog 2 is transient for window 1, which owns the menu; the
        // ancestor wins even though the dialog is the focused window.
        let windows = FakeWindows::default()
            .with_menu(1, ":1.10")
            .with_parent(2, 1);
        let mut machine = machine();

        let effects = machine.active_window_changed(Some(2), &windows);
        assert_eq!(
            published(&effects),
            Some(Some(MenuAddress::new(":1.10", "/MenuBar")))
        );
        assert_eq!(machine.tracked_window(), Some(1));
    }

    #[test]
    fn test_ancestor_beats_own_menu_when_children_unfiltered() {
        let windows = FakeWindows::default()
            .with_menu(1, ":1.10")
            .with_menu(2, ":1.20")
            .with_parent(2, 1);
        let mut machine = machine();

        let effects = machine.active_window_changed(Some(2), &windows);
        assert_eq!(
            published(&effects),
            Some(Some(MenuAddress::new(":1.10", "/MenuBar")))
        );
    }

    #[test]
    fn test_filter_children_ignores_ancestors() {
        let windows = FakeWindows::default()
            .with_menu(1, ":1.10")
            .with_parent(2, 1);
        let mut machine = DiscoveryMachine::new(DiscoveryConfig {
            filter_children: true,
            ..DiscoveryConfig::default()
        });

        let effects = machine.active_window_changed(Some(2), &windows);
        assert_eq!(published(&effects), Some(None));
        assert!(effects.contains(&Effect::WatchWindow(2)));
    }

    #[test]
    fn test_transient_cycle_terminates() {
        let windows = FakeWindows::default().with_parent(1, 2).with_parent(2, 1);
        let mut machine = machine();

        let effects = machine.active_window_changed(Some(1), &windows);
        assert_eq!(published(&effects), Some(None));
        assert!(effects.contains(&Effect::WatchWindow(1)));
    }

    #[test]
    fn test_pinned_window_ignores_other_focus() {
        let windows = FakeWindows::default()
            .with_menu(1, ":1.10")
            .with_menu(2, ":1.20");
        let mut machine = DiscoveryMachine::new(DiscoveryConfig {
            pinned: Some(1),
            ..DiscoveryConfig::default()
        });

        assert!(machine.active_window_changed(Some(2), &windows).is_empty());
        assert!(machine.active_window_changed(None, &windows).is_empty());

        let effects = machine.active_window_changed(Some(1), &windows);
        assert_eq!(
            published(&effects),
            Some(Some(MenuAddress::new(":1.10", "/MenuBar")))
        );
    }

    #[test]
    fn test_skipped_window_keeps_current_menu() {
        let windows = FakeWindows::default()
            .with_menu(1, ":1.10")
            .with_skipped(99);
        let mut machine = machine();
        machine.active_window_changed(Some(1), &windows);

        let effects = machine.active_window_changed(Some(99), &windows);
        assert!(effects.is_empty());
        assert_eq!(
            machine.current(),
            Some(&MenuAddress::new(":1.10", "/MenuBar"))
        );
    }

    #[test]
    fn test_skipped_dialog_of_tracked_window_updates_visibility_only() {
        // Utility window 3 is transient for tracked window 1. With
        // filter_by_active on, focusing it keeps the menu and keeps the bar
        // visible because focus stayed inside the application.
        let windows = FakeWindows::default()
            .with_menu(1, ":1.10")
            .with_skipped(3)
            .with_parent(3, 1);
        let mut machine = DiscoveryMachine::new(DiscoveryConfig {
            filter_by_active: true,
            ..DiscoveryConfig::default()
        });
        machine.active_window_changed(Some(1), &windows);
        assert!(machine.is_visible());

        let effects = machine.active_window_changed(Some(3), &windows);
        assert!(published(&effects).is_none(), "menu must not change");
        assert_eq!(
            machine.current(),
            Some(&MenuAddress::new(":1.10", "/MenuBar"))
        );
        assert!(machine.is_visible());
    }

    #[test]
    fn test_minimize_flip_on_announced_window_updates_visibility() {
        let mut windows = FakeWindows::default().with_menu(1, ":1.10");
        let mut machine = machine();

        let effects = machine.active_window_changed(Some(1), &windows);
        assert!(
            effects.contains(&Effect::WatchWindow(1)),
            "announced window must stay watched for state changes"
        );
        assert!(machine.is_visible());

        windows.minimized.insert(1);
        let effects = machine.window_property_changed(1, &windows);
        assert_eq!(effects, vec![Effect::SetVisible(false)]);
        assert_eq!(
            machine.current(),
            Some(&MenuAddress::new(":1.10", "/MenuBar")),
            "minimize only hides the bar, the menu stays"
        );

        windows.minimized.remove(&1);
        let effects = machine.window_property_changed(1, &windows);
        assert_eq!(effects, vec![Effect::SetVisible(true)]);
    }

    #[test]
    fn test_minimized_window_is_not_visible() {
        let mut windows = FakeWindows::default().with_menu(1, ":1.10");
        windows.minimized.insert(1);
        let mut machine = machine();

        let effects = machine.active_window_changed(Some(1), &windows);
        assert_eq!(
            published(&effects),
            Some(Some(MenuAddress::new(":1.10", "/MenuBar")))
        );
        assert!(!machine.is_visible());
    }

    #[test]
    fn test_bounds_filter_uses_window_center() {
        let bounds = ScreenBounds {
            x: 0,
            y: 0,
            width: 1920,
            height: 1080,
        };
        let mut windows = FakeWindows::default()
            .with_menu(1, ":1.10")
            .with_menu(2, ":1.20");
        windows.centers.insert(1, (960, 540));
        windows.centers.insert(2, (2500, 540));

        let mut machine = DiscoveryMachine::new(DiscoveryConfig {
            bounds: Some(bounds),
            ..DiscoveryConfig::default()
        });

        machine.active_window_changed(Some(1), &windows);
        assert!(machine.is_visible());

        machine.active_window_changed(Some(2), &windows);
        assert!(!machine.is_visible());
    }

    #[test]
    fn test_window_removed_clears_state() {
        let windows = FakeWindows::default().with_menu(1, ":1.10");
        let mut machine = machine();
        machine.active_window_changed(Some(1), &windows);

        let effects = machine.window_removed(1, &windows);
        assert_eq!(published(&effects), Some(None));
        assert!(effects.contains(&Effect::SetVisible(false)));

        // Removing an untracked window is a no-op
        assert!(machine.window_removed(5, &windows).is_empty());
    }

    #[test]
    fn test_delayed_announcement_via_property_watch() {
        let mut windows = FakeWindows::default();
        let mut machine = machine();

        let effects = machine.active_window_changed(Some(5), &windows);
        assert!(effects.contains(&Effect::WatchWindow(5)));
        assert_eq!(published(&effects), Some(None));

        // Property changes before the announcement land do nothing
        assert!(machine.window_property_changed(5, &windows).is_empty());

        // The application announces its menu late
        windows
            .menus
            .insert(5, MenuAddress::new(":1.42", "/MenuBar"));
        let effects = machine.window_property_changed(5, &windows);
        assert!(effects.contains(&Effect::UnwatchWindow(5)));
        assert_eq!(
            published(&effects),
            Some(Some(MenuAddress::new(":1.42", "/MenuBar")))
        );
    }

    #[test]
    fn test_property_change_on_other_window_ignored() {
        let mut windows = FakeWindows::default();
        let mut machine = machine();
        machine.active_window_changed(Some(5), &windows);

        windows
            .menus
            .insert(6, MenuAddress::new(":1.42", "/MenuBar"));
        assert!(machine.window_property_changed(6, &windows).is_empty());
        assert!(machine.current().is_none());
    }

    #[test]
    fn test_recheck_resolves_late_announcement() {
        let mut windows = FakeWindows::default();
        let mut machine = machine();
        machine.active_window_changed(Some(5), &windows);

        assert!(machine.recheck(&windows).is_empty());

        windows
            .menus
            .insert(5, MenuAddress::new(":1.42", "/MenuBar"));
        let effects = machine.recheck(&windows);
        assert_eq!(
            published(&effects),
            Some(Some(MenuAddress::new(":1.42", "/MenuBar")))
        );
    }

    #[test]
    fn test_refocus_same_window_is_quiet() {
        let windows = FakeWindows::default().with_menu(1, ":1.10");
        let mut machine = machine();
        machine.active_window_changed(Some(1), &windows);

        let effects = machine.active_window_changed(Some(1), &windows);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_awaiting_to_new_window_unwatches_old() {
        let windows = FakeWindows::default().with_menu(2, ":1.20");
        let mut machine = machine();
        machine.active_window_changed(Some(1), &windows);

        let effects = machine.active_window_changed(Some(2), &windows);
        assert!(effects.contains(&Effect::UnwatchWindow(1)));
        assert_eq!(
            published(&effects),
            Some(Some(MenuAddress::new(":1.20", "/MenuBar")))
        );
    }
}
