// SPDX-License-Identifier: MIT

//! Config-file conflict resolution on load (§4.2): the file wins except
//! when the store already says `auto_disabled` and the file doesn't —
//! runtime protection that survives a restart even if the user's on-disk
//! config hasn't caught up yet.

use mux_core::StartupMode;

pub fn resolve_startup_mode(store_mode: StartupMode, file_mode: StartupMode) -> StartupMode {
    if store_mode == StartupMode::AutoDisabled && file_mode != StartupMode::AutoDisabled {
        store_mode
    } else {
        file_mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use StartupMode::*;

    #[test]
    fn file_wins_when_store_is_not_auto_disabled() {
        assert_eq!(resolve_startup_mode(Active, Disabled), Disabled);
        assert_eq!(resolve_startup_mode(LazyLoading, Active), Active);
    }

    #[test]
    fn store_wins_when_auto_disabled_and_file_disagrees() {
        assert_eq!(resolve_startup_mode(AutoDisabled, Active), AutoDisabled);
        assert_eq!(resolve_startup_mode(AutoDisabled, LazyLoading), AutoDisabled);
    }

    #[test]
    fn explicit_auto_disabled_in_file_matches() {
        assert_eq!(resolve_startup_mode(AutoDisabled, AutoDisabled), AutoDisabled);
    }
}
