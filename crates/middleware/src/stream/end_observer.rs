/// Where a stream is in its end lifecycle.
///
/// `end()` moves a stream to [`EndState::EndRequested`] synchronously; it only becomes
/// [`EndState::Finished`] once the chain has processed everything queued ahead of the end.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum EndState {
    #[default]
    Open,
    EndRequested,
    Finished,
}

/// Records the logical end of a stream ahead of its physical completion.
///
/// Chunks can still arrive at a stream after `end()` was called on it, because they were queued
/// before the call. A consumer that checks [`EndObserver::has_end_called`] can hold such chunks back
/// until [`EndObserver::is_finished`] and then flush them in arrival order.
#[derive(Debug, Clone, Default)]
pub struct EndObserver {
    state: EndState,
}

impl EndObserver {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn state(&self) -> EndState {
        self.state
    }

    /// Marks the logical end. Returns `false` if end had already been requested.
    pub fn request_end(&mut self) -> bool {
        match self.state {
            EndState::Open => {
                self.state = EndState::EndRequested;
                true
            }
            EndState::EndRequested | EndState::Finished => false,
        }
    }

    /// Marks the physical completion.
    pub fn complete(&mut self) {
        self.state = EndState::Finished;
    }

    #[inline]
    pub fn has_end_called(&self) -> bool {
        self.state != EndState::Open
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.state == EndState::Finished
    }
}
