//! Turning project placements into per-part demand.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, Fraction};
use crate::error::{CatalogError, Issue};
use crate::model::{ChoicePart, Placement};

/// One board design and how many of it are being built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default)]
    pub parts: Vec<ProjectPart>,
}

fn default_count() -> u32 {
    1
}

/// A reference designator and the logical part placed there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectPart {
    pub reference: String,
    pub part: String,
}

/// The order input:
///
/// ```toml
/// [[project]]
/// name = "blinky"
/// revision = "B"
/// count = 5
/// parts = [
///     { reference = "R1", part = "10K" },
///     { reference = "J1", part = "HDR1x2;2.54" },
/// ]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderFile {
    #[serde(default, rename = "project")]
    pub projects: Vec<Project>,
}

impl OrderFile {
    pub fn parse(content: &str) -> Result<Self, CatalogError> {
        toml::from_str(content).map_err(|source| CatalogError::Parse {
            what: "order file",
            source,
        })
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid order file {}", path.display()))
    }
}

/// Choice parts with their demand filled in, plus the placements that could
/// not be resolved.
#[derive(Debug, Default)]
pub struct Demand {
    pub choice_parts: Vec<ChoicePart>,
    pub issues: Vec<Issue>,
}

#[derive(Default)]
struct Usage {
    whole: u32,
    /// (boards, numerator) per fractional placement, in placement order.
    fractions: Vec<(u32, u32)>,
    denominator: Option<u32>,
}

impl Usage {
    fn add_fraction(&mut self, choice: &str, boards: u32, fraction: Fraction) -> Result<(), CatalogError> {
        match self.denominator {
            Some(first) if first != fraction.denominator => {
                return Err(CatalogError::DenominatorMismatch {
                    choice: choice.to_string(),
                    first,
                    second: fraction.denominator,
                });
            }
            _ => self.denominator = Some(fraction.denominator),
        }
        self.fractions.push((boards, fraction.numerator));
        Ok(())
    }

    /// Whole units needed. Fractional pieces are packed into units board by
    /// board; a piece that does not fit in the current unit starts a new one.
    fn required_quantity(&self) -> u32 {
        let mut count = self.whole;
        let Some(denominator) = self.denominator else {
            return count;
        };
        let mut numerator = 0;
        for &(boards, piece) in &self.fractions {
            for _ in 0..boards {
                if numerator + piece > denominator {
                    count += 1;
                    numerator = 0;
                }
                numerator += piece;
            }
        }
        if numerator > 0 {
            count += 1;
        }
        count
    }
}

/// Resolve every placement of every project and build one [`ChoicePart`] per
/// distinct choice name, sorted by name.
///
/// Unknown names are reported as [`Issue::UnknownPart`] and skipped. Catalog
/// inconsistencies, such as fractional parts of one choice part with
/// different denominators, are errors.
pub fn aggregate_demand(catalog: &Catalog, projects: &[Project]) -> Result<Demand, CatalogError> {
    let mut parts: BTreeMap<String, (ChoicePart, Usage)> = BTreeMap::new();
    let mut issues = Vec::new();

    for project in projects {
        for project_part in &project.parts {
            let Some(resolved) = catalog.resolve(&project_part.part)? else {
                log::warn!(
                    "{}:{} uses unknown part '{}'",
                    project.name,
                    project_part.reference,
                    project_part.part
                );
                issues.push(Issue::UnknownPart {
                    part: project_part.part.clone(),
                    project: project.name.clone(),
                    reference: project_part.reference.clone(),
                });
                continue;
            };

            for entry in resolved {
                if !parts.contains_key(&entry.choice) {
                    let Some(choice) = catalog.build_choice_part(&entry.choice)? else {
                        continue;
                    };
                    parts.insert(entry.choice.clone(), (choice, Usage::default()));
                }
                let Some((choice, usage)) = parts.get_mut(&entry.choice) else {
                    continue;
                };

                match entry.fraction {
                    Some(fraction) => usage.add_fraction(&choice.name, project.count, fraction)?,
                    None => usage.whole += project.count,
                }
                let placement = Placement {
                    project: project.name.clone(),
                    reference: project_part.reference.clone(),
                };
                if !choice.placements.contains(&placement) {
                    choice.placements.push(placement);
                }
            }
        }
    }

    let choice_parts = parts
        .into_values()
        .map(|(mut choice, usage)| {
            choice.required_quantity = usage.required_quantity();
            choice.placements.sort();
            log::debug!("'{}' needs {}", choice.name, choice.required_quantity);
            choice
        })
        .collect();

    Ok(Demand {
        choice_parts,
        issues,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
[[choice]]
name = "10K;1608"
actual = [{ manufacturer = "Yageo", mpn = "RC0603FR-0710KL" }]

[[choice]]
name = "HDR1x40;2.54"
actual = [{ manufacturer = "Sullins", mpn = "PRPC040SAAN-RC" }]

[[alias]]
name = "10K"
parts = ["10K;1608"]

[[fractional]]
name = "HDR1x3;2.54"
choice = "HDR1x40;2.54"
numerator = 3
denominator = 40

[[fractional]]
name = "HDR1x20;2.54"
choice = "HDR1x40;2.54"
numerator = 20
denominator = 40
"#;

    fn project(name: &str, count: u32, parts: &[(&str, &str)]) -> Project {
        Project {
            name: name.to_string(),
            revision: None,
            count,
            parts: parts
                .iter()
                .map(|(reference, part)| ProjectPart {
                    reference: reference.to_string(),
                    part: part.to_string(),
                })
                .collect(),
        }
    }

    fn find<'a>(demand: &'a Demand, name: &str) -> &'a ChoicePart {
        demand
            .choice_parts
            .iter()
            .find(|c| c.name == name)
            .unwrap()
    }

    #[test]
    fn test_whole_parts_sum_board_counts() {
        let catalog = Catalog::parse(CATALOG).unwrap();
        let projects = [
            project("blinky", 5, &[("R1", "10K"), ("R2", "10K;1608")]),
            project("probe", 3, &[("R7", "10K")]),
        ];
        let demand = aggregate_demand(&catalog, &projects).unwrap();

        assert_eq!(demand.choice_parts.len(), 1);
        let resistor = find(&demand, "10K;1608");
        assert_eq!(resistor.required_quantity, 13);
        assert_eq!(resistor.references_text(), "[blinky: R1 R2][probe: R7]");
        assert!(demand.issues.is_empty());
    }

    #[test]
    fn test_fractional_packing() {
        let catalog = Catalog::parse(CATALOG).unwrap();

        // 13 boards of 3 pins fit one 40-pin strip; a 14th does not.
        let demand =
            aggregate_demand(&catalog, &[project("a", 13, &[("J1", "HDR1x3;2.54")])]).unwrap();
        assert_eq!(find(&demand, "HDR1x40;2.54").required_quantity, 1);

        let demand =
            aggregate_demand(&catalog, &[project("a", 14, &[("J1", "HDR1x3;2.54")])]).unwrap();
        assert_eq!(find(&demand, "HDR1x40;2.54").required_quantity, 2);

        let demand = aggregate_demand(
            &catalog,
            &[project("b", 3, &[("J1", "HDR1x3;2.54"), ("J2", "HDR1x20;2.54")])],
        )
        .unwrap();
        // J1 pieces first: 3+3+3 = 9, then J2 pieces: 29, 49 > 40 -> new strip
        // holding 20, then 40 fits exactly. Two strips.
        assert_eq!(find(&demand, "HDR1x40;2.54").required_quantity, 2);
    }

    #[test]
    fn test_whole_and_fractional_add() {
        let catalog = Catalog::parse(CATALOG).unwrap();
        let demand = aggregate_demand(
            &catalog,
            &[
                project("a", 2, &[("J1", "HDR1x40;2.54")]),
                project("b", 1, &[("J1", "HDR1x3;2.54")]),
            ],
        )
        .unwrap();
        assert_eq!(find(&demand, "HDR1x40;2.54").required_quantity, 3);
    }

    #[test]
    fn test_unknown_part_reported() {
        let catalog = Catalog::parse(CATALOG).unwrap();
        let demand =
            aggregate_demand(&catalog, &[project("blinky", 1, &[("U1", "ATMEGA328P")])]).unwrap();
        assert!(demand.choice_parts.is_empty());
        assert_eq!(
            demand.issues,
            vec![Issue::UnknownPart {
                part: "ATMEGA328P".to_string(),
                project: "blinky".to_string(),
                reference: "U1".to_string(),
            }]
        );
    }

    #[test]
    fn test_denominator_mismatch() {
        let catalog = Catalog::parse(
            r#"
[[choice]]
name = "HDR"
[[fractional]]
name = "HDR-half"
choice = "HDR"
numerator = 1
denominator = 2
[[fractional]]
name = "HDR-third"
choice = "HDR"
numerator = 1
denominator = 3
"#,
        )
        .unwrap();
        let err = aggregate_demand(
            &catalog,
            &[project("a", 1, &[("J1", "HDR-half"), ("J2", "HDR-third")])],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CatalogError::DenominatorMismatch {
                first: 2,
                second: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_order_file_parse() {
        let order = OrderFile::parse(
            r#"
[[project]]
name = "blinky"
revision = "B"
count = 5
parts = [{ reference = "R1", part = "10K" }]

[[project]]
name = "probe"
"#,
        )
        .unwrap();
        assert_eq!(order.projects.len(), 2);
        assert_eq!(order.projects[0].revision.as_deref(), Some("B"));
        assert_eq!(order.projects[1].count, 1);
        assert!(order.projects[1].parts.is_empty());
    }
}
