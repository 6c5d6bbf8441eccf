//! NGFF multiscales metadata: axis mapping and the resolution pyramid list.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Map;
use tracing::warn;

use crate::error::FormatError;

/// The five supported image axes; X and Y are mandatory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    T,
    C,
    Z,
    Y,
    X,
}

impl Axis {
    fn from_name(name: &str) -> Option<Axis> {
        match name.to_ascii_lowercase().as_str() {
            "t" => Some(Axis::T),
            "c" => Some(Axis::C),
            "z" => Some(Axis::Z),
            "y" => Some(Axis::Y),
            "x" => Some(Axis::X),
            _ => None,
        }
    }
}

/// Mapping from axis to its dimension index in the on-disk arrays.
#[derive(Debug, Clone)]
pub struct AxisMap {
    indexes: HashMap<Axis, usize>,
}

impl AxisMap {
    /// The default NGFF ordering `TCZYX`.
    pub fn tczyx() -> Self {
        let mut indexes = HashMap::new();
        indexes.insert(Axis::T, 0);
        indexes.insert(Axis::C, 1);
        indexes.insert(Axis::Z, 2);
        indexes.insert(Axis::Y, 3);
        indexes.insert(Axis::X, 4);
        Self { indexes }
    }

    fn from_names(names: &[String]) -> Result<Self, FormatError> {
        let mut indexes = HashMap::new();
        for (index, name) in names.iter().enumerate() {
            let axis = Axis::from_name(name).ok_or_else(|| {
                FormatError::InvalidMultiscales(format!(
                    "invalid axis name (only T,C,Z,Y,X are supported): {}",
                    name
                ))
            })?;
            if indexes.insert(axis, index).is_some() {
                return Err(FormatError::InvalidMultiscales(format!(
                    "duplicate axis name: {}",
                    name
                )));
            }
        }
        let map = Self { indexes };
        if !map.contains(Axis::X) || !map.contains(Axis::Y) {
            return Err(FormatError::InvalidMultiscales(
                "missing X or Y axis".to_string(),
            ));
        }
        Ok(map)
    }

    /// The dimension index of `axis`, if the image has it.
    pub fn get(&self, axis: Axis) -> Option<usize> {
        self.indexes.get(&axis).copied()
    }

    pub fn contains(&self, axis: Axis) -> bool {
        self.indexes.contains_key(&axis)
    }

    /// Number of axes (= expected array rank).
    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// Index of the X axis.
    pub fn x(&self) -> usize {
        self.indexes[&Axis::X]
    }

    /// Index of the Y axis.
    pub fn y(&self) -> usize {
        self.indexes[&Axis::Y]
    }
}

/// One pyramid dataset entry.
#[derive(Debug, Clone, Deserialize)]
pub struct Dataset {
    /// Path of the dataset relative to the multiscale root.
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AxisEntry {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct MultiscaleEntry {
    datasets: Vec<Dataset>,
    #[serde(default)]
    axes: Option<Vec<AxisEntry>>,
}

/// The first multiscale of an NGFF root group: its pyramid in document order
/// (entry 0 largest) and its axis mapping.
#[derive(Debug, Clone)]
pub struct Multiscales {
    pub datasets: Vec<Dataset>,
    pub axes: AxisMap,
}

impl Multiscales {
    /// Build from root group attributes.
    ///
    /// Tolerates attributes nested under a top-level `"ome"` key (NGFF
    /// challenge layouts). Fails with `InvalidMultiscales` when the
    /// `multiscales` key is absent or empty, when an axis name falls outside
    /// {t,c,z,y,x}, or when X or Y is missing.
    pub fn from_attributes(attributes: &Map<String, serde_json::Value>) -> Result<Self, FormatError> {
        let attributes = unwrap_ome(attributes);
        let multiscales = attributes.get("multiscales").ok_or_else(|| {
            FormatError::InvalidMultiscales("missing multiscales metadata".to_string())
        })?;
        let entries: Vec<MultiscaleEntry> = serde_json::from_value(multiscales.clone())
            .map_err(|e| FormatError::InvalidMultiscales(e.to_string()))?;
        let entry = entries.into_iter().next().ok_or_else(|| {
            FormatError::InvalidMultiscales("empty multiscales list".to_string())
        })?;
        if entry.datasets.is_empty() {
            return Err(FormatError::InvalidMultiscales(
                "multiscale has no datasets".to_string(),
            ));
        }

        let axes = match entry.axes {
            Some(axes) => {
                let names: Vec<String> = axes.into_iter().map(|a| a.name).collect();
                AxisMap::from_names(&names)?
            }
            None => {
                warn!("No axes metadata found, defaulting to standard axes TCZYX");
                AxisMap::tczyx()
            }
        };

        Ok(Self {
            datasets: entry.datasets,
            axes,
        })
    }

    /// Number of resolution levels.
    pub fn levels(&self) -> usize {
        self.datasets.len()
    }
}

/// Unwrap a top-level `"ome"` attribute object if present.
pub fn unwrap_ome(attributes: &Map<String, serde_json::Value>) -> &Map<String, serde_json::Value> {
    match attributes.get("ome") {
        Some(serde_json::Value::Object(inner)) => inner,
        _ => attributes,
    }
}
