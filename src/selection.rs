use crate::model::TransferId;

/// What happens to a selected id that disappears from a new list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionPolicy {
    /// Drop the selection as soon as its id is no longer listed.
    #[default]
    Revalidate,
    /// Keep the stale id until the next navigation resolves it.
    Lazy,
}

impl SelectionPolicy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "revalidate" => Some(SelectionPolicy::Revalidate),
            "lazy" => Some(SelectionPolicy::Lazy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    Next,
    Previous,
}

/// The highlighted transfer, tracked by id across polls.
#[derive(Debug, Default)]
pub struct Selection {
    policy: SelectionPolicy,
    ids: Vec<TransferId>,
    selected: Option<TransferId>,
}

impl Selection {
    pub fn new(policy: SelectionPolicy) -> Self {
        Self {
            policy,
            ids: Vec::new(),
            selected: None,
        }
    }

    pub fn selected(&self) -> Option<&TransferId> {
        self.selected.as_ref()
    }

    /// Replaces the ordered id list. Returns whether the selection changed.
    pub fn list_updated(&mut self, ids: Vec<TransferId>) -> bool {
        self.ids = ids;
        let keep = match (&self.selected, self.policy) {
            (None, _) => return false,
            _ if self.ids.is_empty() => false,
            (Some(_), SelectionPolicy::Lazy) => true,
            (Some(id), SelectionPolicy::Revalidate) => self.ids.contains(id),
        };
        if keep {
            return false;
        }
        self.selected = None;
        true
    }

    /// Applies a navigation event. Returns whether the selection changed.
    pub fn navigate(&mut self, direction: Navigation) -> bool {
        let next = match (&self.selected, direction) {
            (None, Navigation::Next) => self.ids.first().cloned(),
            (None, Navigation::Previous) => self.ids.last().cloned(),
            (Some(current), _) => {
                let position = self.ids.iter().position(|id| id == current);
                match (position, direction) {
                    (Some(index), Navigation::Next) => self.ids.get(index + 1).cloned(),
                    (Some(index), Navigation::Previous) => index
                        .checked_sub(1)
                        .and_then(|prev| self.ids.get(prev))
                        .cloned(),
                    (None, _) => None,
                }
            }
        };
        if next == self.selected {
            return false;
        }
        self.selected = next;
        true
    }

    /// Position of the selected id in the current list, if it is listed.
    pub fn selected_index(&self) -> Option<usize> {
        let selected = self.selected.as_ref()?;
        self.ids.iter().position(|id| id == selected)
    }
}
