//! Application state container shared across Axum route handlers and services.
//!
//! Holds the database connection and the engine event dispatcher. It is cloned
//! into route handlers via Axum's `State<T>` extractor.

use crate::events::EventDispatcher;
use sea_orm::DatabaseConnection;

/// Central application state shared across the server.
#[derive(Clone)]
pub struct AppState {
    db: DatabaseConnection,
    events: EventDispatcher,
}

impl AppState {
    /// Creates a new `AppState` from a live connection and a dispatcher.
    pub fn new(db: DatabaseConnection, events: EventDispatcher) -> Self {
        Self { db, events }
    }

    /// Returns a shared reference to the internal `DatabaseConnection`.
    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Returns a shared reference to the event dispatcher.
    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Returns a cloned copy of the database connection, for spawned tasks
    /// that require ownership.
    pub fn db_clone(&self) -> DatabaseConnection {
        self.db.clone()
    }

    /// Returns a cloned dispatcher handle.
    pub fn events_clone(&self) -> EventDispatcher {
        self.events.clone()
    }
}
