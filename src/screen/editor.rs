//! Screen-local edit buffer for a seat layout

use crate::model::{Rect, SeatId, SeatRecord};
use crate::reconcile::ReconciliationPlan;

/// Accumulates edits on top of the last confirmed seat layout.
///
/// Nothing is sent anywhere; hand `seats()` to the reconciler to save.
#[derive(Debug, Clone, Default)]
pub struct SeatLayoutEditor {
    original: Vec<SeatRecord>,
    seats: Vec<SeatRecord>,
}

impl SeatLayoutEditor {
    pub fn from_snapshot(seats: Vec<SeatRecord>) -> Self {
        Self {
            original: seats.clone(),
            seats,
        }
    }

    /// Add a seat that does not exist on the server yet
    pub fn add(&mut self, label: impl Into<String>, position: Rect) -> SeatId {
        let id = SeatId::new_local();
        self.seats.push(SeatRecord::new(id.clone(), label, position));
        id
    }

    pub fn relabel(&mut self, id: &SeatId, label: impl Into<String>) -> bool {
        match self.find_mut(id) {
            Some(seat) => {
                seat.label = label.into();
                true
            }
            None => false,
        }
    }

    pub fn move_to(&mut self, id: &SeatId, position: Rect) -> bool {
        match self.find_mut(id) {
            Some(seat) => {
                seat.position = position;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &SeatId) -> Option<SeatRecord> {
        let index = self.seats.iter().position(|seat| &seat.id == id)?;
        Some(self.seats.remove(index))
    }

    pub fn get(&self, id: &SeatId) -> Option<&SeatRecord> {
        self.seats.iter().find(|seat| &seat.id == id)
    }

    pub fn seats(&self) -> &[SeatRecord] {
        &self.seats
    }

    /// Layout the editor started from
    pub fn original(&self) -> &[SeatRecord] {
        &self.original
    }

    /// Writes needed to save the current edits
    pub fn plan(&self) -> ReconciliationPlan {
        ReconciliationPlan::compute(&self.original, &self.seats)
    }

    pub fn is_dirty(&self) -> bool {
        !self.plan().is_empty()
    }

    /// Drop every edit
    pub fn revert(&mut self) {
        self.seats = self.original.clone();
    }

    fn find_mut(&mut self, id: &SeatId) -> Option<&mut SeatRecord> {
        self.seats.iter_mut().find(|seat| &seat.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn editor() -> SeatLayoutEditor {
        SeatLayoutEditor::from_snapshot(vec![
            SeatRecord::new(SeatId::Existing(1), "A-1", Rect::new(0.0, 0.0, 1.0, 1.0)),
            SeatRecord::new(SeatId::Existing(2), "A-2", Rect::new(1.0, 0.0, 1.0, 1.0)),
        ])
    }

    #[test]
    fn test_fresh_editor_is_clean() {
        let editor = editor();
        assert!(!editor.is_dirty());
        assert_eq!(editor.seats(), editor.original());
    }

    #[test]
    fn test_edits_show_up_in_plan() {
        let mut editor = editor();
        let added = editor.add("B-1", Rect::new(0.0, 2.0, 1.0, 1.0));
        assert!(added.is_new());
        assert!(editor.relabel(&SeatId::Existing(1), "Window"));
        assert!(editor.remove(&SeatId::Existing(2)).is_some());

        let plan = editor.plan();
        assert_eq!(plan.to_create().len(), 1);
        assert_eq!(plan.to_update()[0].label, "Window");
        assert_eq!(plan.to_delete(), &[2]);
        assert!(editor.is_dirty());
    }

    #[test]
    fn test_new_seat_can_be_edited_before_saving() {
        let mut editor = editor();
        let id = editor.add("tmp", Rect::default());
        assert!(editor.move_to(&id, Rect::new(3.0, 3.0, 1.0, 1.0)));
        assert!(editor.relabel(&id, "C-1"));
        assert_eq!(editor.get(&id).map(|seat| seat.label.as_str()), Some("C-1"));

        assert!(editor.remove(&id).is_some());
        assert!(!editor.is_dirty());
    }

    #[test]
    fn test_unknown_ids_are_rejected() {
        let mut editor = editor();
        assert!(!editor.relabel(&SeatId::Existing(42), "x"));
        assert!(!editor.move_to(&SeatId::new_local(), Rect::default()));
        assert!(editor.remove(&SeatId::Existing(42)).is_none());
    }

    #[test]
    fn test_revert() {
        let mut editor = editor();
        editor.move_to(&SeatId::Existing(1), Rect::new(9.0, 9.0, 1.0, 1.0));
        assert!(editor.is_dirty());
        editor.revert();
        assert!(!editor.is_dirty());
    }
}
