//! Synchronous guidance state machine. The async service in the crate root
//! owns one of these behind a lock and layers speech on top.

use shared::domain::{ElementId, GuidancePhase, GuidanceSnapshot, RegisteredElement};

/// Result of one `advance` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceStep {
    /// Moved to the element at this index.
    Moved(usize),
    /// Walked past the last element; the state is inactive again.
    Finished,
    /// Guidance was not running; nothing changed.
    Idle,
}

#[derive(Debug, Clone, Default)]
pub struct GuidanceState {
    active: bool,
    elements: Vec<RegisteredElement>,
    current_index: Option<usize>,
    waiting_for_input: bool,
}

impl GuidanceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `element` unless its id is already registered. The first
    /// registration keeps its text and position.
    pub fn register(&mut self, element: RegisteredElement) -> bool {
        if self.contains(&element.id) {
            return false;
        }
        self.elements.push(element);
        true
    }

    pub fn contains(&self, id: &ElementId) -> bool {
        self.elements.iter().any(|element| &element.id == id)
    }

    /// Drops every registered element. Refused while guidance is running.
    pub fn clear_elements(&mut self) -> bool {
        if self.active {
            return false;
        }
        self.elements.clear();
        true
    }

    /// Begins at the first element. With nothing registered the state stays
    /// inactive and `false` is returned.
    pub fn start(&mut self) -> bool {
        if self.elements.is_empty() {
            self.reset();
            return false;
        }
        self.active = true;
        self.move_to(0);
        true
    }

    /// Resets to inactive. Returns whether guidance was running.
    pub fn stop(&mut self) -> bool {
        let was_active = self.active;
        self.reset();
        was_active
    }

    pub fn advance(&mut self) -> AdvanceStep {
        let Some(index) = self.current_index.filter(|_| self.active) else {
            return AdvanceStep::Idle;
        };

        let next = index + 1;
        if next >= self.elements.len() {
            self.reset();
            return AdvanceStep::Finished;
        }

        self.move_to(next);
        AdvanceStep::Moved(next)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_waiting_for_input(&self) -> bool {
        self.waiting_for_input
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    pub fn current(&self) -> Option<&RegisteredElement> {
        self.current_index.and_then(|index| self.elements.get(index))
    }

    pub fn current_element_id(&self) -> Option<&ElementId> {
        self.current().map(|element| &element.id)
    }

    pub fn elements(&self) -> &[RegisteredElement] {
        &self.elements
    }

    pub fn phase(&self) -> GuidancePhase {
        match (self.active, self.waiting_for_input) {
            (false, _) => GuidancePhase::Inactive,
            (true, true) => GuidancePhase::WaitingForInput,
            (true, false) => GuidancePhase::Speaking,
        }
    }

    pub fn snapshot(&self) -> GuidanceSnapshot {
        GuidanceSnapshot {
            active: self.active,
            current_element_id: self.current_element_id().cloned(),
            current_index: self.current_index,
            waiting_for_input: self.waiting_for_input,
            phase: self.phase(),
        }
    }

    fn move_to(&mut self, index: usize) {
        self.current_index = Some(index);
        self.waiting_for_input = self.elements[index].is_input();
    }

    fn reset(&mut self) {
        self.active = false;
        self.current_index = None;
        self.waiting_for_input = false;
    }
}

#[cfg(test)]
#[path = "tests/state_tests.rs"]
mod tests;
