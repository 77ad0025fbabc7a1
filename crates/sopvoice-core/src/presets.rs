//! Voice presets and the rules that bind them to local synthesis voices.
//!
//! A preset is an abstract voice identity ("warm US voice") that the backend
//! also understands by id. Locally it is rendered by whichever engine voice
//! the first matching [`MatchRule`] selects.

use serde::{Deserialize, Serialize};

use crate::types::{LocalVoice, ResolvedVoice};

/// Preset used when the caller does not pick one.
pub const DEFAULT_PRESET: &str = "nova";

/// One matching rule: any of `names` as a case-insensitive substring of the
/// voice name or id (empty = any voice), plus a required language prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRule {
    #[serde(default)]
    pub names: Vec<String>,
    pub lang: String,
}

impl MatchRule {
    pub fn new(names: &[&str], lang: &str) -> Self {
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
            lang: lang.into(),
        }
    }

    pub fn matches(&self, voice: &LocalVoice) -> bool {
        if !lang_has_prefix(&voice.lang, &self.lang) {
            return false;
        }
        if self.names.is_empty() {
            return true;
        }
        let name = voice.name.to_lowercase();
        let id = voice.id.to_lowercase();
        self.names.iter().any(|n| {
            let n = n.to_lowercase();
            name.contains(&n) || id.contains(&n)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoicePreset {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_base_lang")]
    pub base_lang: String,
    #[serde(default)]
    pub rules: Vec<MatchRule>,
}

fn default_base_lang() -> String {
    "en".into()
}

impl VoicePreset {
    fn new(id: &str, name: &str, description: &str, rules: Vec<MatchRule>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            base_lang: default_base_lang(),
            rules,
        }
    }

    /// Pick a local voice for this preset.
    ///
    /// Rules are tried in order and the first rule with any match wins; within
    /// a rule, catalog order decides. Without a rule match, fall back to the
    /// first voice in the base language, then the first voice at all.
    pub fn pick<'a>(&self, voices: &'a [LocalVoice]) -> Option<&'a LocalVoice> {
        self.rules
            .iter()
            .find_map(|rule| voices.iter().find(|v| rule.matches(v)))
            .or_else(|| voices.iter().find(|v| lang_has_prefix(&v.lang, &self.base_lang)))
            .or_else(|| voices.first())
    }

    pub fn resolve(&self, voices: &[LocalVoice]) -> ResolvedVoice {
        ResolvedVoice {
            preset_id: self.id.clone(),
            voice: self.pick(voices).cloned(),
        }
    }
}

/// Resolve every preset against a voice catalog.
pub fn resolve_all(presets: &[VoicePreset], voices: &[LocalVoice]) -> Vec<ResolvedVoice> {
    presets.iter().map(|p| p.resolve(voices)).collect()
}

/// Case-insensitive language-tag prefix test; `_` and `-` are equivalent.
pub fn lang_has_prefix(lang: &str, prefix: &str) -> bool {
    let norm = |s: &str| s.to_lowercase().replace('_', "-");
    norm(lang).starts_with(&norm(prefix))
}

/// The backend's six presets, with rules covering common desktop voices and
/// eSpeak's catalog names.
pub fn default_presets() -> Vec<VoicePreset> {
    vec![
        VoicePreset::new(
            "nova",
            "Nova (Warm US)",
            "Balanced North American English with a warmer delivery",
            vec![
                MatchRule::new(&["Google US English", "Samantha", "Aria", "Jenny"], "en-us"),
                MatchRule::new(&["America"], "en"),
                MatchRule::new(&[], "en-us"),
            ],
        ),
        VoicePreset::new(
            "alloy",
            "Alloy (Bright UK)",
            "Crisp British English with a professional tone",
            vec![
                MatchRule::new(&["Google UK English", "Daniel", "Libby", "Sonia"], "en-gb"),
                MatchRule::new(&["Great Britain"], "en"),
                MatchRule::new(&[], "en-gb"),
            ],
        ),
        VoicePreset::new(
            "echo",
            "Echo (RP)",
            "Received Pronunciation for precise instructional delivery",
            vec![
                MatchRule::new(&["Received", "rp"], "en"),
                MatchRule::new(&[], "en-gb"),
            ],
        ),
        VoicePreset::new(
            "fable",
            "Fable (Midlands)",
            "Engaging UK Midlands accent for step-by-step narration",
            vec![
                MatchRule::new(&["Midlands", "wmids", "gbcwmd"], "en"),
                MatchRule::new(&[], "en-gb"),
            ],
        ),
        VoicePreset::new(
            "onyx",
            "Onyx (Scottish)",
            "Deeper Scottish tone suited to confident briefings",
            vec![
                MatchRule::new(&["Scot"], "en"),
                MatchRule::new(&[], "en-gb"),
            ],
        ),
        VoicePreset::new(
            "shimmer",
            "Shimmer (Caribbean)",
            "Upbeat Caribbean English with energetic cadence",
            vec![
                MatchRule::new(&["Caribbean", "West Indies", "westindies", "en-wi"], "en"),
                MatchRule::new(&[], "en-029"),
            ],
        ),
    ]
}
