//! Unit tests for the fleet registry.
