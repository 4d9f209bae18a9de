use std::sync::{Arc, Mutex};

use crate::domain::UiState;

use super::{events::DomainEvent, reducer::reduce};

#[derive(Clone, Default)]
pub struct AppStore {
    inner: Arc<Mutex<UiState>>,
}

impl AppStore {
    pub fn new(state: UiState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    pub fn state(&self) -> UiState {
        self.inner.lock().expect("store poisoned").clone()
    }

    pub fn apply(&self, ev: DomainEvent) {
        let mut guard = self.inner.lock().expect("store poisoned");
        let next = reduce(guard.clone(), ev);
        *guard = next;
    }
}
