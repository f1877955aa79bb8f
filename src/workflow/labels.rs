//! Version labels: `vA`, `vB`, … for prototypes and `v1`, `v2`, … for
//! production lineages.
//!
//! Alphabetic labels count in bijective base 26 (`vZ` is followed by `vAA`),
//! so every label maps to a unique ordinal and lineages sort by it.

use std::str::FromStr;

use crate::models::DocumentVersion;

use super::{EngineError, EngineResult};

const MAX_ALPHA_LEN: usize = 12;
const MAX_NUMERIC_LEN: usize = 18;

/// What happens when a prototype lineage runs past `vZ`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LabelOverflow {
    /// Continue with two letters: `vZ` → `vAA`.
    #[default]
    Extend,
    /// Refuse with `SequenceExhausted`.
    Reject,
}

impl FromStr for LabelOverflow {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "extend" => Ok(LabelOverflow::Extend),
            "reject" => Ok(LabelOverflow::Reject),
            other => Err(format!(
                "unknown label overflow policy '{other}', expected 'extend' or 'reject'"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionLabel {
    Alpha(u64),
    Numeric(u64),
}

impl VersionLabel {
    pub fn parse(label: &str) -> EngineResult<Self> {
        let invalid = || EngineError::InvalidInput(format!("'{label}' is not a valid version label"));

        let body = label.strip_prefix('v').ok_or_else(invalid)?;
        if body.is_empty() {
            return Err(invalid());
        }

        if body.bytes().all(|b| b.is_ascii_uppercase()) {
            if body.len() > MAX_ALPHA_LEN {
                return Err(invalid());
            }
            let ordinal = body
                .bytes()
                .fold(0u64, |acc, b| acc * 26 + u64::from(b - b'A' + 1));
            return Ok(VersionLabel::Alpha(ordinal));
        }

        if body.bytes().all(|b| b.is_ascii_digit()) {
            if body.len() > MAX_NUMERIC_LEN || body.starts_with('0') {
                return Err(invalid());
            }
            let value: u64 = body.parse().map_err(|_| invalid())?;
            return Ok(VersionLabel::Numeric(value));
        }

        Err(invalid())
    }

    pub fn ordinal(&self) -> u64 {
        match *self {
            VersionLabel::Alpha(n) | VersionLabel::Numeric(n) => n,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, VersionLabel::Numeric(_))
    }

    pub fn render(&self) -> String {
        match *self {
            VersionLabel::Numeric(n) => format!("v{n}"),
            VersionLabel::Alpha(n) => format!("v{}", alpha_letters(n)),
        }
    }

    pub fn previous(&self) -> Option<VersionLabel> {
        match *self {
            VersionLabel::Alpha(n) if n > 1 => Some(VersionLabel::Alpha(n - 1)),
            VersionLabel::Numeric(n) if n > 1 => Some(VersionLabel::Numeric(n - 1)),
            _ => None,
        }
    }
}

fn alpha_letters(mut n: u64) -> String {
    let mut letters = Vec::new();
    while n > 0 {
        n -= 1;
        letters.push(b'A' + (n % 26) as u8);
        n /= 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

fn alpha_len(n: u64) -> usize {
    alpha_letters(n).len()
}

/// Refuses labels from the other lineage family.
pub fn ensure_scheme(label: &VersionLabel, is_production: bool) -> EngineResult<()> {
    if label.is_production() == is_production {
        return Ok(());
    }
    let expected = if is_production {
        "numeric (v1, v2, …)"
    } else {
        "alphabetic (vA, vB, …)"
    };
    Err(EngineError::InvalidInput(format!(
        "version label {} does not match the lineage scheme; expected {expected}",
        label.render()
    )))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionLabeler {
    overflow: LabelOverflow,
}

impl VersionLabeler {
    pub fn new(overflow: LabelOverflow) -> Self {
        Self { overflow }
    }

    pub fn overflow(&self) -> LabelOverflow {
        self.overflow
    }

    pub fn first(is_production: bool) -> String {
        if is_production {
            VersionLabel::Numeric(1).render()
        } else {
            VersionLabel::Alpha(1).render()
        }
    }

    pub fn next(&self, prior: Option<&str>, is_production: bool) -> EngineResult<String> {
        let Some(prior) = prior else {
            return Ok(Self::first(is_production));
        };

        let label = VersionLabel::parse(prior)?;
        ensure_scheme(&label, is_production)?;

        let next = match label {
            VersionLabel::Numeric(n) => n
                .checked_add(1)
                .map(VersionLabel::Numeric)
                .ok_or_else(|| EngineError::SequenceExhausted(format!("no label follows {prior}")))?,
            VersionLabel::Alpha(n) => {
                let following = n + 1;
                let grows = alpha_len(following) > alpha_len(n);
                if grows && self.overflow == LabelOverflow::Reject {
                    return Err(EngineError::SequenceExhausted(format!(
                        "prototype labels end at {prior} under the reject overflow policy"
                    )));
                }
                if alpha_len(following) > MAX_ALPHA_LEN {
                    return Err(EngineError::SequenceExhausted(format!(
                        "no label follows {prior}"
                    )));
                }
                VersionLabel::Alpha(following)
            }
        };

        Ok(next.render())
    }

    /// The closest existing label below `label` in the same family.
    ///
    /// Deleted drafts leave gaps in a lineage, so this is `vA` for `vC` when
    /// `vB` is gone. Labels that do not parse are skipped.
    pub fn predecessor<'a>(
        label: &str,
        lineage: impl IntoIterator<Item = &'a str>,
    ) -> EngineResult<Option<&'a str>> {
        let current = VersionLabel::parse(label)?;
        let Some(floor) = current.previous() else {
            return Ok(None);
        };
        Ok(lineage
            .into_iter()
            .filter_map(|candidate| {
                VersionLabel::parse(candidate)
                    .ok()
                    .map(|parsed| (candidate, parsed))
            })
            .filter(|(_, parsed)| {
                parsed.is_production() == current.is_production()
                    && parsed.ordinal() <= floor.ordinal()
            })
            .max_by_key(|(_, parsed)| parsed.ordinal())
            .map(|(candidate, _)| candidate))
    }
}

/// Orders a lineage oldest first. Malformed labels sort last.
pub fn sort_by_label(versions: &mut [DocumentVersion]) {
    versions.sort_by_key(|version| {
        VersionLabel::parse(&version.version)
            .map(|label| label.ordinal())
            .unwrap_or(u64::MAX)
    });
}
