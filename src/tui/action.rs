use crossterm::event::KeyCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ToggleRunning,
    Reset,
    Quit,
}

pub fn action_for_key(code: KeyCode) -> Option<Action> {
    match code {
        KeyCode::Char(' ') | KeyCode::Enter | KeyCode::Char('s') | KeyCode::Char('p') => {
            Some(Action::ToggleRunning)
        }
        KeyCode::Char('r') | KeyCode::Char('R') => Some(Action::Reset),
        KeyCode::Char('q') | KeyCode::Esc => Some(Action::Quit),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_bindings() {
        assert_eq!(action_for_key(KeyCode::Char(' ')), Some(Action::ToggleRunning));
        assert_eq!(action_for_key(KeyCode::Enter), Some(Action::ToggleRunning));
        assert_eq!(action_for_key(KeyCode::Char('r')), Some(Action::Reset));
        assert_eq!(action_for_key(KeyCode::Esc), Some(Action::Quit));
        assert_eq!(action_for_key(KeyCode::Char('x')), None);
    }
}
