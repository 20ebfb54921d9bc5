//! Container types and the catalog binding that maps them to database ids.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};
use std::str::FromStr;

use crate::error::{DepotError, Result};

/// A reusable container type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerType {
    /// Small crate.
    SmallCrate,
    /// Large crate.
    LargeCrate,
    /// Bucket.
    Bucket,
}

impl ContainerType {
    /// Every container type, in catalog order.
    pub const ALL: [ContainerType; 3] = [
        ContainerType::SmallCrate,
        ContainerType::LargeCrate,
        ContainerType::Bucket,
    ];

    /// Canonical wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerType::SmallCrate => "small_crate",
            ContainerType::LargeCrate => "large_crate",
            ContainerType::Bucket => "bucket",
        }
    }

    /// Match a catalog row name to a container type.
    ///
    /// Case and separators are ignored; operator (Spanish) names are
    /// accepted alongside the canonical ones.
    pub fn from_catalog_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();

        match normalized.as_str() {
            "smallcrate" | "small" | "cajachica" | "chica" => Some(ContainerType::SmallCrate),
            "largecrate" | "large" | "cajagrande" | "grande" => Some(ContainerType::LargeCrate),
            "bucket" | "cubeta" | "cubetas" => Some(ContainerType::Bucket),
            _ => None,
        }
    }
}

impl fmt::Display for ContainerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerType {
    type Err = DepotError;

    fn from_str(s: &str) -> Result<Self> {
        ContainerType::from_catalog_name(s)
            .ok_or_else(|| DepotError::InvalidContainerType(s.to_string()))
    }
}

/// One value per container type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerContainer<T> {
    pub small_crate: T,
    pub large_crate: T,
    pub bucket: T,
}

impl<T> PerContainer<T> {
    /// Build from a function of the container type.
    pub fn from_fn(mut f: impl FnMut(ContainerType) -> T) -> Self {
        Self {
            small_crate: f(ContainerType::SmallCrate),
            large_crate: f(ContainerType::LargeCrate),
            bucket: f(ContainerType::Bucket),
        }
    }

    /// Iterate `(type, value)` pairs in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = (ContainerType, &T)> {
        ContainerType::ALL.into_iter().map(move |ct| (ct, &self[ct]))
    }

    /// Transform every value.
    pub fn map<U>(&self, mut f: impl FnMut(ContainerType, &T) -> U) -> PerContainer<U> {
        PerContainer::from_fn(|ct| f(ct, &self[ct]))
    }
}

impl<T> Index<ContainerType> for PerContainer<T> {
    type Output = T;

    fn index(&self, ct: ContainerType) -> &T {
        match ct {
            ContainerType::SmallCrate => &self.small_crate,
            ContainerType::LargeCrate => &self.large_crate,
            ContainerType::Bucket => &self.bucket,
        }
    }
}

impl<T> IndexMut<ContainerType> for PerContainer<T> {
    fn index_mut(&mut self, ct: ContainerType) -> &mut T {
        match ct {
            ContainerType::SmallCrate => &mut self.small_crate,
            ContainerType::LargeCrate => &mut self.large_crate,
            ContainerType::Bucket => &mut self.bucket,
        }
    }
}

/// Binding between container types and the ids of the catalog table the
/// deployment carries. Resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerCatalog {
    /// Table the binding was read from.
    source: String,
    ids: PerContainer<i32>,
}

impl ContainerCatalog {
    /// Bind catalog rows `(id, name)` read from `source`.
    ///
    /// Rows whose name is not a container type are ignored. Every container
    /// type must be present exactly once.
    pub fn from_entries<I, S>(source: impl Into<String>, entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (i32, S)>,
        S: AsRef<str>,
    {
        let source = source.into();
        let mut found: PerContainer<Option<i32>> = PerContainer::default();

        for (id, name) in entries {
            let Some(ct) = ContainerType::from_catalog_name(name.as_ref()) else {
                continue;
            };
            if let Some(existing) = found[ct] {
                return Err(DepotError::Configuration(format!(
                    "catalog {source} maps {ct} twice (ids {existing} and {id})"
                )));
            }
            found[ct] = Some(id);
        }

        let mut ids = PerContainer::default();
        for ct in ContainerType::ALL {
            ids[ct] = found[ct].ok_or_else(|| {
                DepotError::CatalogEntryNotFound(format!("{ct} in catalog {source}"))
            })?;
        }

        Ok(Self { source, ids })
    }

    /// Binding with ids 1, 2, 3 in catalog order.
    pub fn standard() -> Self {
        Self {
            source: "standard".to_string(),
            ids: PerContainer {
                small_crate: 1,
                large_crate: 2,
                bucket: 3,
            },
        }
    }

    /// Table the binding came from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Database id of a container type.
    pub fn id_of(&self, ct: ContainerType) -> i32 {
        self.ids[ct]
    }

    /// Container type of a database id.
    pub fn resolve(&self, id: i32) -> Result<ContainerType> {
        self.ids
            .iter()
            .find(|(_, candidate)| **candidate == id)
            .map(|(ct, _)| ct)
            .ok_or_else(|| {
                DepotError::CatalogEntryNotFound(format!("id {id} in catalog {}", self.source))
            })
    }
}
