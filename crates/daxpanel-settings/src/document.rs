//! The settings document: channel records plus panel preferences.

use daxpanel_core::{ChannelId, ChannelKind, ChannelRecord};
use serde::{Deserialize, Serialize};

/// Which panel sections are shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibleSections {
    pub transmit: bool,
    pub microphone: bool,
    pub receive: bool,
    pub iq: bool,
}

impl VisibleSections {
    pub fn shows(&self, kind: ChannelKind) -> bool {
        match kind {
            ChannelKind::Transmit => self.transmit,
            ChannelKind::Microphone => self.microphone,
            ChannelKind::Receive => self.receive,
            ChannelKind::Iq => self.iq,
        }
    }

    pub fn set(&mut self, kind: ChannelKind, shown: bool) {
        let section = match kind {
            ChannelKind::Transmit => &mut self.transmit,
            ChannelKind::Microphone => &mut self.microphone,
            ChannelKind::Receive => &mut self.receive,
            ChannelKind::Iq => &mut self.iq,
        };
        *section = shown;
    }
}

impl Default for VisibleSections {
    fn default() -> Self {
        VisibleSections {
            transmit: true,
            microphone: true,
            receive: true,
            iq: true,
        }
    }
}

/// Panel-wide preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelPreferences {
    pub visible_sections: VisibleSections,
    /// Connect to `last_host` on launch.
    pub auto_start: bool,
    /// Ask the radio for reduced-bandwidth DAX audio.
    pub low_bandwidth: bool,
    /// Station name announced to the radio.
    pub station: String,
    pub last_host: Option<String>,
}

impl PanelPreferences {
    /// The radio to connect to: `explicit` if given, otherwise the last
    /// radio when auto-start is on.
    pub fn startup_host(&self, explicit: Option<String>) -> Option<String> {
        explicit.or_else(|| {
            self.auto_start
                .then(|| self.last_host.clone())
                .flatten()
        })
    }
}

impl Default for PanelPreferences {
    fn default() -> Self {
        PanelPreferences {
            visible_sections: VisibleSections::default(),
            auto_start: false,
            low_bandwidth: false,
            station: "daxpanel".to_string(),
            last_host: None,
        }
    }
}

/// The whole settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsDocument {
    pub preferences: PanelPreferences,
    pub channels: Vec<ChannelRecord>,
}

impl SettingsDocument {
    pub fn channel(&self, id: ChannelId) -> Option<&ChannelRecord> {
        self.channels.iter().find(|r| r.id == id)
    }

    /// Insert or replace the record with the same id, keeping the list
    /// ordered by channel id.
    pub fn upsert(&mut self, record: ChannelRecord) {
        match self.channels.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => {
                self.channels.push(record);
                self.channels.sort_by_key(|r| r.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preference_defaults() {
        let p = PanelPreferences::default();
        assert!(!p.auto_start);
        assert!(!p.low_bandwidth);
        assert_eq!(p.station, "daxpanel");
        assert!(p.last_host.is_none());
        assert!(p.visible_sections.shows(ChannelKind::Iq));
        assert!(p.visible_sections.shows(ChannelKind::Transmit));
    }

    #[test]
    fn startup_host_needs_auto_start() {
        let mut p = PanelPreferences {
            last_host: Some("10.0.0.5".into()),
            ..Default::default()
        };
        assert_eq!(p.startup_host(None), None);
        assert_eq!(p.startup_host(Some("radio.lan".into())).as_deref(), Some("radio.lan"));

        p.auto_start = true;
        assert_eq!(p.startup_host(None).as_deref(), Some("10.0.0.5"));
        assert_eq!(p.startup_host(Some("radio.lan".into())).as_deref(), Some("radio.lan"));

        p.last_host = None;
        assert_eq!(p.startup_host(None), None);
    }

    #[test]
    fn set_toggles_one_section() {
        let mut sections = VisibleSections::default();
        sections.set(ChannelKind::Iq, false);
        assert!(!sections.shows(ChannelKind::Iq));
        assert!(sections.shows(ChannelKind::Receive));
        sections.set(ChannelKind::Iq, true);
        assert_eq!(sections, VisibleSections::default());
    }

    #[test]
    fn partial_document_fills_defaults() {
        let json = r#"{"preferences":{"station":"W1AW","visible_sections":{"iq":false}}}"#;
        let doc: SettingsDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.preferences.station, "W1AW");
        assert!(!doc.preferences.visible_sections.shows(ChannelKind::Iq));
        assert!(doc.preferences.visible_sections.shows(ChannelKind::Receive));
        assert!(doc.channels.is_empty());
    }

    #[test]
    fn upsert_replaces_and_orders() {
        let mut doc = SettingsDocument::default();
        doc.upsert(ChannelRecord::new(ChannelId::receive(2)));
        doc.upsert(ChannelRecord::new(ChannelId::receive(1)));
        doc.upsert(ChannelRecord::new(ChannelId::receive(2)).with_enabled(true));

        assert_eq!(doc.channels.len(), 2);
        assert_eq!(doc.channels[0].id, ChannelId::receive(1));
        assert!(doc.channel(ChannelId::receive(2)).unwrap().enabled);
        assert!(doc.channel(ChannelId::iq(1)).is_none());
    }
}
