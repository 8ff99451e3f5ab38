use crate::config::Backend;
use crate::counter::CounterState;

/// What the start/pause button offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleLabel {
    Start,
    Resume,
    Pause,
}

impl ToggleLabel {
    pub fn for_state(state: &CounterState) -> Self {
        if state.running {
            ToggleLabel::Pause
        } else if state.value > 0 {
            ToggleLabel::Resume
        } else {
            ToggleLabel::Start
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToggleLabel::Start => "Start",
            ToggleLabel::Resume => "Resume",
            ToggleLabel::Pause => "Pause",
        }
    }
}

pub struct AppState {
    pub counter: CounterState,
    pub backend: Backend,
    pub prefs_path: String,
    pub message: String,
}

impl AppState {
    pub fn new(counter: CounterState, backend: Backend, prefs_path: String) -> Self {
        Self {
            counter,
            backend,
            prefs_path,
            message: "Ready.".to_string(),
        }
    }

    pub fn apply(&mut self, counter: CounterState) {
        self.counter = counter;
    }

    pub fn toggle_label(&self) -> ToggleLabel {
        ToggleLabel::for_state(&self.counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(value: u64, running: bool) -> CounterState {
        CounterState { value, running }
    }

    #[test]
    fn test_toggle_label() {
        assert_eq!(ToggleLabel::for_state(&state(0, false)), ToggleLabel::Start);
        assert_eq!(ToggleLabel::for_state(&state(4, false)), ToggleLabel::Resume);
        assert_eq!(ToggleLabel::for_state(&state(0, true)), ToggleLabel::Pause);
        assert_eq!(ToggleLabel::for_state(&state(4, true)), ToggleLabel::Pause);
    }

    #[test]
    fn test_apply_tracks_counter() {
        let mut app = AppState::new(state(0, false), Backend::DataStore, String::new());
        app.apply(state(3, true));
        assert_eq!(app.counter.value, 3);
        assert_eq!(app.toggle_label().as_str(), "Pause");
        app.apply(state(0, false));
        assert_eq!(app.toggle_label().as_str(), "Start");
    }
}
