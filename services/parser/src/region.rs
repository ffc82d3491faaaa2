//! Region hierarchy and raw region name resolution.
//!
//! The hierarchy is fixed at build time from the schema: one root (the
//! board-wide aggregate), regional municipalities below it, and local
//! municipalities below those. Raw names from any era resolve to one
//! period-invariant `RegionIdentity`.
//!
//! Matching order:
//! 1. exact canonical name, or a name that is canonical in the period's era
//! 2. exact known variant (typos, abbreviations, historical names)
//! 3. case/punctuation-insensitive match against all of the above, limited
//!    to the period's era
//! 4. Jaro-Winkler fuzzy match against canonical names, accepted only when
//!    exactly one region clears the threshold

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{EraNamesDef, RegionDef};
use crate::era::Eras;
use crate::error::SchemaError;
use crate::period::ReportingPeriod;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionIdentity {
    pub id: String,
    pub name: String,
    pub parent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionLevel {
    Total,
    Region,
    Municipality,
}

impl RegionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegionLevel::Total => "total",
            RegionLevel::Region => "region",
            RegionLevel::Municipality => "municipality",
        }
    }
}

impl fmt::Display for RegionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct RegionHierarchy {
    nodes: Vec<RegionIdentity>,
    index: HashMap<String, usize>,
    depth: Vec<usize>,
    root: usize,
}

impl RegionHierarchy {
    pub fn build(defs: &[RegionDef]) -> Result<Self, SchemaError> {
        let mut index = HashMap::new();
        for (i, def) in defs.iter().enumerate() {
            if index.insert(def.id.clone(), i).is_some() {
                return Err(SchemaError::DuplicateRegion(def.id.clone()));
            }
        }

        for def in defs {
            if let Some(parent) = &def.parent {
                if !index.contains_key(parent) {
                    return Err(SchemaError::UnknownRegion(parent.clone()));
                }
            }
        }

        let roots: Vec<usize> = defs
            .iter()
            .enumerate()
            .filter(|(_, d)| d.parent.is_none())
            .map(|(i, _)| i)
            .collect();
        if roots.len() != 1 {
            return Err(SchemaError::RootCount(roots.len()));
        }

        // Every chain must reach the root within `len` steps, otherwise it loops.
        let mut depth = Vec::with_capacity(defs.len());
        for def in defs {
            let mut steps = 0;
            let mut current = def;
            while let Some(parent) = &current.parent {
                steps += 1;
                if steps > defs.len() {
                    return Err(SchemaError::HierarchyCycle(def.id.clone()));
                }
                current = &defs[index[parent]];
            }
            depth.push(steps);
        }

        let nodes = defs
            .iter()
            .map(|d| RegionIdentity {
                id: d.id.clone(),
                name: d.name.clone(),
                parent: d.parent.clone(),
            })
            .collect();

        Ok(Self {
            nodes,
            index,
            depth,
            root: roots[0],
        })
    }

    pub fn root(&self) -> &RegionIdentity {
        &self.nodes[self.root]
    }

    pub fn get(&self, id: &str) -> Option<&RegionIdentity> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegionIdentity> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Position in schema order; used to sort output rows.
    pub fn order(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Ancestor ids of `id`, root first, excluding `id` itself.
    pub fn path(&self, id: &str) -> Option<Vec<String>> {
        let mut current = self.get(id)?;
        let mut ancestors = Vec::new();
        while let Some(parent) = &current.parent {
            ancestors.push(parent.clone());
            current = self.get(parent)?;
        }
        ancestors.reverse();
        Some(ancestors)
    }

    pub fn level(&self, id: &str) -> Option<RegionLevel> {
        let depth = self.depth[*self.index.get(id)?];
        Some(match depth {
            0 => RegionLevel::Total,
            1 => RegionLevel::Region,
            _ => RegionLevel::Municipality,
        })
    }
}

/// How a raw name was matched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchMethod {
    Canonical,
    EraName,
    Variant,
    CaseInsensitive,
    Fuzzy { score: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution<'a> {
    pub region: &'a RegionIdentity,
    pub method: MatchMethod,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolutionFailure {
    #[error("empty region name")]
    Empty,

    #[error("unknown region name '{raw}'{}", describe_best(.best))]
    Unknown {
        raw: String,
        best: Option<(String, f64)>,
    },

    #[error("ambiguous region name '{raw}': matches {}", describe_candidates(.candidates))]
    Ambiguous {
        raw: String,
        candidates: Vec<(String, f64)>,
    },
}

fn describe_best(best: &Option<(String, f64)>) -> String {
    match best {
        Some((name, score)) => format!(" (closest: '{name}' at {score:.3})"),
        None => String::new(),
    }
}

fn describe_candidates(candidates: &[(String, f64)]) -> String {
    candidates
        .iter()
        .map(|(name, score)| format!("'{name}' ({score:.3})"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone)]
pub struct RegionResolver {
    hierarchy: RegionHierarchy,
    eras: Eras,
    canonical: HashMap<String, usize>,
    era_names: Vec<HashMap<String, usize>>,
    variants: HashMap<String, usize>,
    /// Per era: folded spelling -> region, across canonical names, that era's
    /// names and variants.
    folded: Vec<HashMap<String, usize>>,
    fuzzy_targets: Vec<(String, usize)>,
    threshold: f64,
    near_miss_margin: f64,
}

impl RegionResolver {
    pub fn build(
        hierarchy: RegionHierarchy,
        eras: Eras,
        era_names: &[EraNamesDef],
        variants: &std::collections::BTreeMap<String, String>,
        threshold: f64,
        near_miss_margin: f64,
    ) -> Result<Self, SchemaError> {
        let lookup = |id: &str| {
            hierarchy
                .order(id)
                .ok_or_else(|| SchemaError::UnknownRegion(id.to_string()))
        };

        let mut canonical = HashMap::new();
        let mut folded_canonical = HashMap::new();
        let mut fuzzy_targets = Vec::new();
        for (i, node) in hierarchy.iter().enumerate() {
            canonical.insert(clean(&node.name), i);
            folded_canonical.insert(fold(&node.name), i);
            fuzzy_targets.push((fold(&node.name), i));
        }

        let mut folded = vec![folded_canonical; eras.len()];
        let mut per_era = vec![HashMap::new(); eras.len()];
        for def in era_names {
            let selected = eras.select(Some(&def.eras))?;
            for (name, id) in &def.names {
                let target = lookup(id)?;
                for &era in &selected {
                    per_era[era].insert(clean(name), target);
                    folded[era].entry(fold(name)).or_insert(target);
                }
            }
        }

        let mut variant_map = HashMap::new();
        for (name, id) in variants {
            let target = lookup(id)?;
            variant_map.insert(clean(name), target);
            for era in folded.iter_mut() {
                era.entry(fold(name)).or_insert(target);
            }
        }

        Ok(Self {
            hierarchy,
            eras,
            canonical,
            era_names: per_era,
            variants: variant_map,
            folded,
            fuzzy_targets,
            threshold,
            near_miss_margin,
        })
    }

    pub fn hierarchy(&self) -> &RegionHierarchy {
        &self.hierarchy
    }

    pub fn resolve(
        &self,
        raw: &str,
        period: ReportingPeriod,
    ) -> Result<Resolution<'_>, ResolutionFailure> {
        let cleaned = clean(raw);
        let key = fold(&cleaned);
        if key.is_empty() {
            return Err(ResolutionFailure::Empty);
        }

        let found = |i: usize, method| Resolution {
            region: &self.hierarchy.nodes[i],
            method,
        };

        if let Some(&i) = self.canonical.get(&cleaned) {
            return Ok(found(i, MatchMethod::Canonical));
        }
        let era = self.eras.index_of(period);
        if let Some(&i) = self.era_names[era].get(&cleaned) {
            return Ok(found(i, MatchMethod::EraName));
        }
        if let Some(&i) = self.variants.get(&cleaned) {
            return Ok(found(i, MatchMethod::Variant));
        }
        if let Some(&i) = self.folded[era].get(&key) {
            return Ok(found(i, MatchMethod::CaseInsensitive));
        }

        self.resolve_fuzzy(&cleaned, &key)
            .map(|(i, score)| found(i, MatchMethod::Fuzzy { score }))
    }

    fn resolve_fuzzy(&self, cleaned: &str, key: &str) -> Result<(usize, f64), ResolutionFailure> {
        let mut best_per_region: HashMap<usize, f64> = HashMap::new();
        for (target, i) in &self.fuzzy_targets {
            let score = strsim::jaro_winkler(key, target);
            let entry = best_per_region.entry(*i).or_insert(0.0);
            if score > *entry {
                *entry = score;
            }
        }

        let mut ranked: Vec<(usize, f64)> = best_per_region.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let accepted: Vec<(usize, f64)> = ranked
            .iter()
            .copied()
            .filter(|(_, score)| *score >= self.threshold)
            .collect();

        match accepted.as_slice() {
            [(i, score)] => {
                tracing::info!(
                    raw = cleaned,
                    region = %self.hierarchy.nodes[*i].name,
                    score,
                    "fuzzy region match"
                );
                Ok((*i, *score))
            }
            [] => {
                let best = ranked.first().map(|(i, score)| (self.hierarchy.nodes[*i].name.clone(), *score));
                if let Some((name, score)) = &best {
                    if *score >= self.threshold - self.near_miss_margin {
                        tracing::warn!(
                            raw = cleaned,
                            candidate = %name,
                            score,
                            threshold = self.threshold,
                            "region near-miss; consider adding a variant"
                        );
                    }
                }
                Err(ResolutionFailure::Unknown {
                    raw: cleaned.to_string(),
                    best,
                })
            }
            many => Err(ResolutionFailure::Ambiguous {
                raw: cleaned.to_string(),
                candidates: many
                    .iter()
                    .map(|(i, score)| (self.hierarchy.nodes[*i].name.clone(), *score))
                    .collect(),
            }),
        }
    }
}

/// Trim, drop surrounding quotes and collapse internal whitespace.
fn clean(raw: &str) -> String {
    raw.trim()
        .trim_matches('"')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercase alphanumerics only.
fn fold(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}
