//! daxpanel-settings: persisted panel state.
//!
//! Everything the panel remembers between runs lives in one JSON document
//! ([`SettingsDocument`]): the Channel Records and the panel-wide
//! [`PanelPreferences`]. [`JsonSettingsStore`] reads and writes that file and
//! implements [`SettingsStore`](daxpanel_core::SettingsStore) for the
//! channel manager.

pub mod document;
pub mod store;

pub use document::{PanelPreferences, SettingsDocument, VisibleSections};
pub use store::{JsonSettingsStore, default_path};
