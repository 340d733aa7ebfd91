use crate::model::TrackInfo;
use anyhow::{Result, bail};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// The running player the tracker attaches to.
pub trait HostPlayer {
    /// The item currently loaded in the player. `Err` when the host API is
    /// not available.
    fn now_playing(&self) -> Result<Option<TrackInfo>>;
}

/// Signals delivered serially by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    TrackChanged,
    PlayPause { paused: bool },
    Shutdown,
}

/// Host whose now-playing item is set by the caller. Clones share the item.
#[derive(Debug, Clone)]
pub struct ScriptedHost {
    current: Rc<RefCell<Option<TrackInfo>>>,
    available: Rc<Cell<bool>>,
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self {
            current: Rc::new(RefCell::new(None)),
            available: Rc::new(Cell::new(true)),
        }
    }

    pub fn set_now_playing(&self, track: Option<TrackInfo>) {
        *self.current.borrow_mut() = track;
    }

    pub fn set_available(&self, available: bool) {
        self.available.set(available);
    }
}

impl Default for ScriptedHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostPlayer for ScriptedHost {
    fn now_playing(&self) -> Result<Option<TrackInfo>> {
        if !self.available.get() {
            bail!("host player API is not available");
        }
        Ok(self.current.borrow().clone())
    }
}
