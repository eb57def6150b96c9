// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use hvq_config::tracing::{init_tracing, InitError};

#[test]
fn foreign_subscriber_is_never_mistaken_for_our_own() {
    tracing::subscriber::set_global_default(tracing_subscriber::registry()).unwrap();

    for _ in 0..2 {
        assert!(matches!(init_tracing(), Err(InitError::Subscriber(_))));
    }
}
