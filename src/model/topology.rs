//! Serializable model descriptions used by the export format

use serde::{Deserialize, Serialize};

/// Shape and dtype of one parameter tensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightSpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: String,
}

impl WeightSpec {
    pub fn float32(name: impl Into<String>, shape: &[usize]) -> Self {
        Self {
            name: name.into(),
            shape: shape.to_vec(),
            dtype: "float32".to_string(),
        }
    }

    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }
}

/// One layer of a topology listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerSpec {
    pub name: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
}

impl LayerSpec {
    pub fn conv(name: &str, filters: usize) -> Self {
        Self::new(name, "conv2d").units(filters).activation("relu")
    }

    pub fn dense(name: &str, units: usize, activation: &str) -> Self {
        Self::new(name, "dense").units(units).activation(activation)
    }

    pub fn dropout(name: &str, rate: f64) -> Self {
        Self {
            rate: Some(rate),
            ..Self::new(name, "dropout")
        }
    }

    pub fn new(name: &str, kind: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            units: None,
            activation: None,
            rate: None,
        }
    }

    fn units(mut self, units: usize) -> Self {
        self.units = Some(units);
        self
    }

    fn activation(mut self, activation: &str) -> Self {
        self.activation = Some(activation.to_string());
        self
    }
}

/// Architecture of an exported model: builder config plus readable layer list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelTopology {
    pub class_name: String,
    pub config: serde_json::Value,
    pub layers: Vec<LayerSpec>,
}
