// This file is part of kc85-rs.
// Copyright (c) 2024-2026 the kc85-rs authors. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

mod shared;

pub use self::shared::{new_shared, new_shared_cell, Shared, SharedCell};
