//! Unit tests for the bastion services.
