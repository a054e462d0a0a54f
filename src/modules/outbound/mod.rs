// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

pub mod bounce;
pub mod pipeline;
pub mod sentlog;
