// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::error::PostroomResult;

pub mod executors;

pub trait Initialize {
    async fn initialize() -> PostroomResult<()>;
}
