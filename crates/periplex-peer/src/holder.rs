use std::sync::{Arc, Mutex, PoisonError};

use periplex_frame::FramedConnection;

/// Holds at most one live connection.
///
/// Readers snapshot the connection with [`get`](Self::get) and do their I/O
/// outside the lock, so a slow write never blocks a reconnect.
#[derive(Debug, Default)]
pub struct ConnectionHolder {
    current: Mutex<Option<Arc<FramedConnection>>>,
}

impl ConnectionHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `conn`, closing whatever was held before.
    pub fn set(&self, conn: Arc<FramedConnection>) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = current.replace(conn) {
            old.close();
        }
    }

    pub fn get(&self) -> Option<Arc<FramedConnection>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Close and clear the held connection. Idempotent.
    pub fn close(&self) {
        let taken = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(conn) = taken {
            conn.close();
        }
    }

    /// Close and clear only if `conn` is the one held.
    ///
    /// `conn` itself is always closed. Returns whether the holder was cleared.
    pub fn close_if(&self, conn: &Arc<FramedConnection>) -> bool {
        conn.close();
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        match current.as_ref() {
            Some(held) if Arc::ptr_eq(held, conn) => {
                *current = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|conn| !conn.is_closed())
    }
}
