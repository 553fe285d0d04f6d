use std::collections::VecDeque;

pub const HISTORY_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Towards older commands
    Up,
    /// Towards newer commands, ending at an empty prompt
    Down,
}

/// Recently submitted commands, most recent first.
///
/// Navigation is stateless: the caller keeps the current position and passes
/// it back in. `None` means nothing is selected and the prompt is empty.
#[derive(Debug, Clone)]
pub struct CommandHistory {
    entries: VecDeque<String>,
    capacity: usize,
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandHistory {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a submitted command. Blank input is ignored.
    pub fn push(&mut self, command: &str) -> bool {
        let command = command.trim();
        if command.is_empty() || self.capacity == 0 {
            return false;
        }
        self.entries.push_front(command.to_string());
        self.entries.truncate(self.capacity);
        true
    }

    pub fn navigate(&self, direction: Direction, current: Option<usize>) -> (String, Option<usize>) {
        if self.entries.is_empty() {
            return (String::new(), None);
        }
        let last = self.entries.len() - 1;

        let next = match (direction, current) {
            (Direction::Up, None) => Some(0),
            (Direction::Up, Some(index)) => Some(index.saturating_add(1).min(last)),
            (Direction::Down, None) | (Direction::Down, Some(0)) => None,
            (Direction::Down, Some(index)) => Some((index - 1).min(last)),
        };

        match next {
            Some(index) => (self.entries[index].clone(), Some(index)),
            None => (String::new(), None),
        }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
