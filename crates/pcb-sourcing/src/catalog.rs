//! The part database: which logical names exist and what they stand for.
//!
//! ```toml
//! [[choice]]
//! name = "10K;1608"
//! footprint = "R_0603_1608Metric"
//! description = "10K 1% resistor"
//! actual = [{ manufacturer = "Yageo", mpn = "RC0603FR-0710KL" }]
//!
//! [[alias]]
//! name = "10K"
//! parts = ["10K;1608"]
//!
//! [[fractional]]
//! name = "HDR1x2;2.54"
//! choice = "HDR1x40;2.54"
//! numerator = 2
//! denominator = 40
//! ```
//!
//! A choice part is something that can be bought. An alias stands for one or
//! more other parts, and a fractional part is a piece of a breakaway choice
//! part such as a pin header.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::CatalogError;
use crate::model::{ActualPart, ChoicePart};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActualDef {
    pub manufacturer: String,
    pub mpn: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceDef {
    pub name: String,
    #[serde(default)]
    pub footprint: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub actual: Vec<ActualDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasDef {
    pub name: String,
    pub parts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FractionalDef {
    pub name: String,
    pub choice: String,
    pub numerator: u32,
    pub denominator: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogFile {
    #[serde(default)]
    choice: Vec<ChoiceDef>,
    #[serde(default)]
    alias: Vec<AliasDef>,
    #[serde(default)]
    fractional: Vec<FractionalDef>,
}

/// Portion of a choice part consumed by one placement of a fractional part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fraction {
    pub numerator: u32,
    pub denominator: u32,
}

/// A logical name resolved down to the choice part it consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub choice: String,
    /// `None` for a whole part.
    pub fraction: Option<Fraction>,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    choices: BTreeMap<String, ChoiceDef>,
    aliases: BTreeMap<String, AliasDef>,
    fractionals: BTreeMap<String, FractionalDef>,
}

impl Catalog {
    pub fn parse(content: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(content).map_err(|source| CatalogError::Parse {
            what: "part catalog",
            source,
        })?;
        Self::from_defs(file.choice, file.alias, file.fractional)
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid part catalog {}", path.display()))
    }

    /// Build and check a catalog. Names are unique across all three kinds,
    /// every reference resolves, and aliases do not loop.
    pub fn from_defs(
        choices: Vec<ChoiceDef>,
        aliases: Vec<AliasDef>,
        fractionals: Vec<FractionalDef>,
    ) -> Result<Self, CatalogError> {
        let mut names = BTreeSet::new();
        let mut claim = |name: &str| {
            if names.insert(name.to_string()) {
                Ok(())
            } else {
                Err(CatalogError::DuplicateName(name.to_string()))
            }
        };

        let mut catalog = Catalog::default();
        for def in choices {
            claim(&def.name)?;
            catalog.choices.insert(def.name.clone(), def);
        }
        for def in aliases {
            claim(&def.name)?;
            catalog.aliases.insert(def.name.clone(), def);
        }
        for def in fractionals {
            claim(&def.name)?;
            catalog.fractionals.insert(def.name.clone(), def);
        }

        catalog.check()?;
        Ok(catalog)
    }

    fn check(&self) -> Result<(), CatalogError> {
        for name in self.choices.keys() {
            // Rejects repeated manufacturer parts.
            self.build_choice_part(name)?;
        }

        for def in self.fractionals.values() {
            if !self.choices.contains_key(&def.choice) {
                return Err(if self.contains(&def.choice) {
                    CatalogError::FractionTarget {
                        name: def.name.clone(),
                        target: def.choice.clone(),
                    }
                } else {
                    CatalogError::UnknownTarget {
                        name: def.name.clone(),
                        target: def.choice.clone(),
                    }
                });
            }
            if def.numerator == 0 || def.denominator == 0 || def.numerator > def.denominator {
                return Err(CatalogError::InvalidFraction {
                    name: def.name.clone(),
                    numerator: def.numerator,
                    denominator: def.denominator,
                });
            }
        }

        for def in self.aliases.values() {
            for target in &def.parts {
                if !self.contains(target) {
                    return Err(CatalogError::UnknownTarget {
                        name: def.name.clone(),
                        target: target.clone(),
                    });
                }
            }
        }
        for name in self.aliases.keys() {
            self.resolve(name)?;
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.choices.contains_key(name)
            || self.aliases.contains_key(name)
            || self.fractionals.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.choices.len() + self.aliases.len() + self.fractionals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Expand `name` into the choice parts one placement of it consumes.
    /// Returns `None` for a name the catalog does not define.
    pub fn resolve(&self, name: &str) -> Result<Option<Vec<Resolved>>, CatalogError> {
        if !self.contains(name) {
            return Ok(None);
        }
        let mut resolved = Vec::new();
        let mut stack = Vec::new();
        self.resolve_into(name, &mut stack, &mut resolved)?;
        Ok(Some(resolved))
    }

    fn resolve_into<'a>(
        &'a self,
        name: &'a str,
        stack: &mut Vec<&'a str>,
        out: &mut Vec<Resolved>,
    ) -> Result<(), CatalogError> {
        if self.choices.contains_key(name) {
            out.push(Resolved {
                choice: name.to_string(),
                fraction: None,
            });
        } else if let Some(def) = self.fractionals.get(name) {
            out.push(Resolved {
                choice: def.choice.clone(),
                fraction: Some(Fraction {
                    numerator: def.numerator,
                    denominator: def.denominator,
                }),
            });
        } else if let Some(def) = self.aliases.get(name) {
            if stack.contains(&name) {
                return Err(CatalogError::AliasCycle(name.to_string()));
            }
            stack.push(name);
            for target in &def.parts {
                if !self.contains(target) {
                    return Err(CatalogError::UnknownTarget {
                        name: name.to_string(),
                        target: target.clone(),
                    });
                }
                self.resolve_into(target, stack, out)?;
            }
            stack.pop();
        }
        Ok(())
    }

    /// A fresh [`ChoicePart`] (no offers, no demand) for a choice name.
    pub fn build_choice_part(&self, name: &str) -> Result<Option<ChoicePart>, CatalogError> {
        let Some(def) = self.choices.get(name) else {
            return Ok(None);
        };
        let mut choice = ChoicePart::new(&def.name, &def.footprint, &def.description);
        choice.set_actual_parts(
            def.actual
                .iter()
                .map(|a| ActualPart::new(&a.manufacturer, &a.mpn))
                .collect(),
        )?;
        Ok(Some(choice))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
[[choice]]
name = "10K;1608"
footprint = "R_0603_1608Metric"
description = "10K 1% resistor"
actual = [
    { manufacturer = "Yageo", mpn = "RC0603FR-0710KL" },
    { manufacturer = "Vishay", mpn = "CRCW060310K0FKEA" },
]

[[choice]]
name = "HDR1x40;2.54"
footprint = "PinHeader_1x40_P2.54mm"
description = "Breakaway header"
actual = [{ manufacturer = "Sullins", mpn = "PRPC040SAAN-RC" }]

[[alias]]
name = "10K"
parts = ["10K;1608"]

[[alias]]
name = "PULLUPS"
parts = ["10K", "10K;1608"]

[[fractional]]
name = "HDR1x2;2.54"
choice = "HDR1x40;2.54"
numerator = 2
denominator = 40
"#;

    #[test]
    fn test_parse_catalog() {
        let catalog = Catalog::parse(CATALOG).unwrap();
        assert_eq!(catalog.len(), 5);

        let choice = catalog.build_choice_part("10K;1608").unwrap().unwrap();
        assert_eq!(choice.footprint, "R_0603_1608Metric");
        assert_eq!(choice.actual_parts().len(), 2);
        assert_eq!(choice.required_quantity, 0);
        assert!(catalog.build_choice_part("10K").unwrap().is_none());
    }

    #[test]
    fn test_alias_expansion() {
        let catalog = Catalog::parse(CATALOG).unwrap();
        let resolved = catalog.resolve("PULLUPS").unwrap().unwrap();
        assert_eq!(resolved.len(), 2);
        assert!(
            resolved
                .iter()
                .all(|r| r.choice == "10K;1608" && r.fraction.is_none())
        );
        assert_eq!(catalog.resolve("nope").unwrap(), None);
    }

    #[test]
    fn test_fractional_resolution() {
        let catalog = Catalog::parse(CATALOG).unwrap();
        let resolved = catalog.resolve("HDR1x2;2.54").unwrap().unwrap();
        assert_eq!(
            resolved,
            vec![Resolved {
                choice: "HDR1x40;2.54".to_string(),
                fraction: Some(Fraction {
                    numerator: 2,
                    denominator: 40
                }),
            }]
        );
    }

    #[test]
    fn test_alias_cycle_rejected() {
        let err = Catalog::parse(
            r#"
[[alias]]
name = "A"
parts = ["B"]

[[alias]]
name = "B"
parts = ["A"]
"#,
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::AliasCycle(_)));
    }

    #[test]
    fn test_catalog_errors() {
        let duplicate = r#"
[[choice]]
name = "X"
[[alias]]
name = "X"
parts = []
"#;
        assert!(matches!(
            Catalog::parse(duplicate),
            Err(CatalogError::DuplicateName(name)) if name == "X"
        ));

        let unknown = r#"
[[alias]]
name = "A"
parts = ["missing"]
"#;
        assert!(matches!(
            Catalog::parse(unknown),
            Err(CatalogError::UnknownTarget { .. })
        ));

        let fraction_of_alias = r#"
[[choice]]
name = "C"
[[alias]]
name = "A"
parts = ["C"]
[[fractional]]
name = "F"
choice = "A"
numerator = 1
denominator = 2
"#;
        assert!(matches!(
            Catalog::parse(fraction_of_alias),
            Err(CatalogError::FractionTarget { .. })
        ));

        let bad_fraction = r#"
[[choice]]
name = "C"
[[fractional]]
name = "F"
choice = "C"
numerator = 3
denominator = 2
"#;
        assert!(matches!(
            Catalog::parse(bad_fraction),
            Err(CatalogError::InvalidFraction { .. })
        ));

        let repeated_mpn = r#"
[[choice]]
name = "C"
actual = [
    { manufacturer = "Yageo", mpn = "RC0603" },
    { manufacturer = "Yageo", mpn = "RC0603" },
]
"#;
        assert!(matches!(
            Catalog::parse(repeated_mpn),
            Err(CatalogError::Model(_))
        ));
    }
}
