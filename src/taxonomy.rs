//! Ticket-taxonomy normalizer: raw free-text ticket descriptions in, a
//! canonical (base type, amenity set) pair out.
//!
//! Matching is declarative: one precedence-ordered table of base types with
//! their alias tokens, one table of amenity tokens. The normalize function is
//! pure (same input and table version, same output), so the whole vocabulary
//! can be tested exhaustively without touching control flow.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Closed set of canonical ticket base types. `Unclassified` is the explicit
/// marker persisted when normalization misses; records are never dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseType {
    Adult,
    Child,
    Senior,
    Student,
    Military,
    Member,
    Unclassified,
}

impl BaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BaseType::Adult => "adult",
            BaseType::Child => "child",
            BaseType::Senior => "senior",
            BaseType::Student => "student",
            BaseType::Military => "military",
            BaseType::Member => "member",
            BaseType::Unclassified => "unclassified",
        }
    }
}

/// Closed set of ticket amenities. Non-exclusive: zero or more attach to a
/// base type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Amenity {
    ThreeD,
    Imax,
    DBox,
    Recliner,
}

impl Amenity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Amenity::ThreeD => "3d",
            Amenity::Imax => "imax",
            Amenity::DBox => "dbox",
            Amenity::Recliner => "recliner",
        }
    }
}

/// Outcome of normalizing one raw description. An unmatched result carries
/// the noise-stripped fragment so the caller can key the audit record on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeOutcome {
    Matched {
        base: BaseType,
        amenities: BTreeSet<Amenity>,
    },
    Unmatched {
        fragment: String,
    },
}

/// Precedence-ordered taxonomy: iteration order of the base map IS the match
/// precedence (e.g. Senior outranks Adult when both could claim a token).
#[derive(Debug, Clone)]
pub struct TaxonomyTable {
    bases: IndexMap<BaseType, Vec<&'static str>>,
    amenities: IndexMap<Amenity, Vec<&'static str>>,
    noise: Vec<&'static str>,
}

impl TaxonomyTable {
    /// Curated vocabulary observed across the target sites.
    pub fn builtin() -> Self {
        let mut bases: IndexMap<BaseType, Vec<&'static str>> = IndexMap::new();
        // Precedence: the more specific audiences come before Adult so that
        // e.g. "Senior Adult" resolves to Senior.
        bases.insert(BaseType::Senior, vec!["senior", "seniors", "sr", "snr", "senior citizen"]);
        bases.insert(BaseType::Child, vec!["child", "children", "kid", "kids", "youth", "junior"]);
        bases.insert(BaseType::Student, vec!["student", "students", "college"]);
        bases.insert(BaseType::Military, vec!["military", "veteran", "veterans"]);
        bases.insert(BaseType::Member, vec!["member", "members", "loyalty", "rewards"]);
        bases.insert(BaseType::Adult, vec!["adult", "adults", "general", "ga"]);

        let mut amenities: IndexMap<Amenity, Vec<&'static str>> = IndexMap::new();
        amenities.insert(Amenity::ThreeD, vec!["3d", "real3d", "reald"]);
        amenities.insert(Amenity::Imax, vec!["imax"]);
        amenities.insert(Amenity::DBox, vec!["dbox", "d box"]);
        amenities.insert(Amenity::Recliner, vec!["recliner", "recliners", "luxury"]);

        let noise = vec![
            "ticket", "tickets", "admission", "price", "pricing", "ea", "each", "per", "person",
            "the", "a", "an", "of", "for", "with", "and", "matinee", "evening",
        ];

        Self {
            bases,
            amenities,
            noise,
        }
    }

    /// Normalize a raw description into the closed taxonomy. Pure and
    /// case-insensitive; deterministic for a fixed table.
    pub fn normalize(&self, raw: &str) -> NormalizeOutcome {
        let tokens = tokenize(raw);
        let stripped: Vec<String> = tokens
            .iter()
            .filter(|t| !self.noise.contains(&t.as_str()))
            .cloned()
            .collect();

        let mut base: Option<BaseType> = None;
        let mut consumed: Vec<usize> = Vec::new();
        'bases: for (candidate, aliases) in &self.bases {
            for alias in aliases {
                if let Some(hit) = match_alias(&stripped, alias) {
                    base = Some(*candidate);
                    consumed.extend(hit);
                    break 'bases;
                }
            }
        }

        let Some(base) = base else {
            // An all-noise description keeps its raw tokens as the audit key;
            // distinct descriptions must not collapse into one empty row.
            let fragment = if stripped.is_empty() {
                if tokens.is_empty() {
                    raw.trim().to_ascii_lowercase()
                } else {
                    tokens.join(" ")
                }
            } else {
                stripped.join(" ")
            };
            return NormalizeOutcome::Unmatched { fragment };
        };

        let mut matched = BTreeSet::new();
        for (amenity, aliases) in &self.amenities {
            for alias in aliases {
                if let Some(hit) = match_alias(&stripped, alias) {
                    if hit.iter().all(|i| !consumed.contains(i)) {
                        matched.insert(*amenity);
                        consumed.extend(hit);
                        break;
                    }
                }
            }
        }

        NormalizeOutcome::Matched {
            base,
            amenities: matched,
        }
    }

}

impl Default for TaxonomyTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Lowercase alphanumeric tokens; punctuation acts as a separator so
/// "D-BOX" becomes ["d", "box"].
fn tokenize(raw: &str) -> Vec<String> {
    raw.to_ascii_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Match a (possibly multi-token) alias against the token list. Returns the
/// indices of the matched tokens so they can be marked consumed.
fn match_alias(tokens: &[String], alias: &str) -> Option<Vec<usize>> {
    let alias_tokens: Vec<&str> = alias.split_whitespace().collect();
    if alias_tokens.is_empty() || alias_tokens.len() > tokens.len() {
        return None;
    }
    for start in 0..=(tokens.len() - alias_tokens.len()) {
        if alias_tokens
            .iter()
            .enumerate()
            .all(|(i, a)| tokens[start + i] == *a)
        {
            return Some((start..start + alias_tokens.len()).collect());
        }
    }
    None
}

/// Serialize an amenity set to the stored JSON array form (sorted, stable).
pub fn amenities_to_json(amenities: &BTreeSet<Amenity>) -> String {
    let names: Vec<&str> = amenities.iter().map(|a| a.as_str()).collect();
    serde_json::to_string(&names).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matched(raw: &str) -> (BaseType, BTreeSet<Amenity>) {
        match TaxonomyTable::builtin().normalize(raw) {
            NormalizeOutcome::Matched { base, amenities } => (base, amenities),
            NormalizeOutcome::Unmatched { fragment } => {
                panic!("expected match for {raw:?}, got unmatched {fragment:?}")
            }
        }
    }

    #[test]
    fn adult_3d_maps_to_adult_with_threed() {
        let (base, amenities) = matched("Adult 3D");
        assert_eq!(base, BaseType::Adult);
        assert_eq!(amenities, BTreeSet::from([Amenity::ThreeD]));
    }

    #[test]
    fn senior_outranks_adult() {
        let (base, _) = matched("Senior Adult");
        assert_eq!(base, BaseType::Senior);
    }

    #[test]
    fn aliases_resolve_case_insensitively() {
        assert_eq!(matched("SR. Ticket").0, BaseType::Senior);
        assert_eq!(matched("kids admission").0, BaseType::Child);
        assert_eq!(matched("VETERAN").0, BaseType::Military);
    }

    #[test]
    fn multiple_amenities_attach() {
        let (base, amenities) = matched("Adult IMAX 3D Recliner");
        assert_eq!(base, BaseType::Adult);
        assert_eq!(
            amenities,
            BTreeSet::from([Amenity::ThreeD, Amenity::Imax, Amenity::Recliner])
        );
    }

    #[test]
    fn hyphenated_dbox_matches() {
        let (_, amenities) = matched("Adult D-BOX");
        assert_eq!(amenities, BTreeSet::from([Amenity::DBox]));
    }

    #[test]
    fn unmatched_returns_stripped_fragment() {
        let table = TaxonomyTable::builtin();
        match table.normalize("Value Tuesday Combo ticket") {
            NormalizeOutcome::Unmatched { fragment } => {
                assert_eq!(fragment, "value tuesday combo");
            }
            other => panic!("expected unmatched, got {other:?}"),
        }
    }

    #[test]
    fn all_noise_description_keeps_raw_tokens_as_fragment() {
        let table = TaxonomyTable::builtin();
        match table.normalize("Matinee Ticket") {
            NormalizeOutcome::Unmatched { fragment } => {
                assert_eq!(fragment, "matinee ticket");
            }
            other => panic!("expected unmatched, got {other:?}"),
        }
        // Distinct all-noise descriptions keep distinct audit keys.
        match table.normalize("Evening Admission") {
            NormalizeOutcome::Unmatched { fragment } => {
                assert_eq!(fragment, "evening admission");
            }
            other => panic!("expected unmatched, got {other:?}"),
        }
    }

    #[test]
    fn normalize_is_deterministic() {
        let table = TaxonomyTable::builtin();
        let a = table.normalize("Adult 3D IMAX");
        for _ in 0..10 {
            assert_eq!(table.normalize("Adult 3D IMAX"), a);
        }
    }

    #[test]
    fn unknown_leftover_tokens_do_not_unmatch_a_found_base() {
        let (base, amenities) = matched("Adult Tuesday Special");
        assert_eq!(base, BaseType::Adult);
        assert!(amenities.is_empty());
    }
}
