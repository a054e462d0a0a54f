// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Offline-first email core: a durable local mirror of remote mailboxes
//! with reversible actions, scheduled sending and bounce detection. UIs
//! consume this crate's service layer; the binary only wires up the
//! background drivers.

pub mod modules;
