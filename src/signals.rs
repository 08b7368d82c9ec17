/// The signals module extracts flow signals from playlist names.
///
/// A name is split into extended grapheme clusters. Clusters that can be typed on a keyboard
/// (letters, digits, whitespace, ASCII punctuation) carry no meaning; everything else (emoji,
/// symbols, music notes, flags) is a signal. The signals in front of the first word are what the
/// playlist accepts from children (its leading set). The signals after the last word are what the
/// playlist sends to parents (its trailing set).

use serde::Serialize;
use unicode_normalization::UnicodeNormalization;
use unicode_segmentation::UnicodeSegmentation;

use crate::common::uniq;
use crate::config::DEFAULT_TEST_PREFIX;

/// Invisible characters stripped before segmentation. U+200D (zero width joiner) is kept because it
/// binds emoji sequences into a single cluster.
const STRIPPED_INVISIBLES: [char; 4] = ['\u{200B}', '\u{200C}', '\u{2060}', '\u{FEFF}'];

/// Scalars that turn an otherwise alphanumeric cluster into an emoji, e.g. the keycap "1️⃣".
const EMOJI_PRESENTATION: [char; 2] = ['\u{FE0F}', '\u{20E3}'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterKind {
    /// Letters and digits. Anchors the leading and trailing runs.
    Word,
    /// Whitespace and ASCII punctuation. Ignored.
    Keyboard,
    Signal,
}

pub fn classify_cluster(cluster: &str) -> ClusterKind {
    let Some(first) = cluster.chars().next() else {
        return ClusterKind::Keyboard;
    };
    if first.is_alphanumeric() && !cluster.chars().any(|c| EMOJI_PRESENTATION.contains(&c)) {
        return ClusterKind::Word;
    }
    if cluster.chars().all(|c| c.is_whitespace() || c.is_ascii_punctuation()) {
        return ClusterKind::Keyboard;
    }
    ClusterKind::Signal
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FlowRole {
    Parent,
    Child,
    Bidirectional,
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SignalSet {
    pub leading: Vec<String>,
    pub trailing: Vec<String>,
}

impl SignalSet {
    pub fn is_empty(&self) -> bool {
        self.leading.is_empty() && self.trailing.is_empty()
    }

    pub fn is_parent(&self) -> bool {
        !self.leading.is_empty()
    }

    pub fn is_child(&self) -> bool {
        !self.trailing.is_empty()
    }

    pub fn is_flow_playlist(&self) -> bool {
        !self.is_empty()
    }

    pub fn role(&self) -> FlowRole {
        match (self.is_parent(), self.is_child()) {
            (true, true) => FlowRole::Bidirectional,
            (true, false) => FlowRole::Parent,
            (false, true) => FlowRole::Child,
            (false, false) => FlowRole::None,
        }
    }

    /// The first trailing token of `self` that `parent` leads with.
    pub fn matching_token<'a>(&'a self, parent: &SignalSet) -> Option<&'a str> {
        self.trailing
            .iter()
            .find(|t| parent.leading.contains(t))
            .map(|t| t.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct SignalExtractor {
    ignored_prefixes: Vec<String>,
}

impl Default for SignalExtractor {
    fn default() -> Self {
        Self::new(vec![DEFAULT_TEST_PREFIX.to_string()])
    }
}

impl SignalExtractor {
    pub fn new(ignored_prefixes: Vec<String>) -> Self {
        // Prefixes are compared against normalized names.
        let ignored_prefixes = ignored_prefixes.iter().map(|p| normalize_name(p)).filter(|p| !p.is_empty()).collect();
        Self { ignored_prefixes }
    }

    pub fn extract(&self, name: &str) -> SignalSet {
        let normalized = normalize_name(name);
        let stripped = self
            .ignored_prefixes
            .iter()
            .find_map(|p| normalized.strip_prefix(p.as_str()))
            .unwrap_or(&normalized);

        let clusters: Vec<(&str, ClusterKind)> =
            stripped.graphemes(true).map(|g| (g, classify_cluster(g))).collect();
        let signals_in = |range: &[(&str, ClusterKind)]| -> Vec<String> {
            uniq(range
                .iter()
                .filter(|(_, kind)| *kind == ClusterKind::Signal)
                .map(|(g, _)| g.to_string())
                .collect())
        };

        let first_word = clusters.iter().position(|(_, k)| *k == ClusterKind::Word);
        let last_word = clusters.iter().rposition(|(_, k)| *k == ClusterKind::Word);
        match (first_word, last_word) {
            (Some(first), Some(last)) => SignalSet {
                leading: signals_in(&clusters[..first]),
                trailing: signals_in(&clusters[last + 1..]),
            },
            _ => {
                let all = signals_in(&clusters);
                SignalSet { leading: all.clone(), trailing: all }
            }
        }
    }

    /// Whether a playlist named `child_name` flows into one named `parent_name`.
    pub fn flows_into(&self, child_name: &str, parent_name: &str) -> bool {
        let child = self.extract(child_name);
        let parent = self.extract(parent_name);
        child.matching_token(&parent).is_some()
    }
}

/// NFC-normalize and strip invisible formatting characters.
pub fn normalize_name(name: &str) -> String {
    name.nfc().filter(|c| !STRIPPED_INVISIBLES.contains(c)).collect()
}

pub fn extract_signals(name: &str) -> SignalSet {
    SignalExtractor::default().extract(name)
}
