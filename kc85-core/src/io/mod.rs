// This file is part of kc85-rs.
// Copyright (c) 2024-2026 the kc85-rs authors. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

pub mod ctc;
mod daisy_chain;
pub mod pio;

pub use self::ctc::Ctc;
pub use self::daisy_chain::DaisyChain;
pub use self::pio::Pio;
