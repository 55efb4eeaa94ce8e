//! Declarative tree descriptions
//!
//! A description is a JSON array of element objects. The element kind is
//! picked from the keys present: `value` makes a parameter, `func` a
//! function, `targetCount` a matrix, anything else a node. `children`
//! nests, and `number` defaults to the position in the array.
//!
//! ```json
//! [
//!   { "identifier": "device", "children": [
//!     { "identifier": "gain", "value": -6, "type": "integer", "access": "readWrite" },
//!     { "identifier": "router", "type": "nToN", "targetCount": 4, "sourceCount": 4 }
//!   ]}
//! ]
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::element::{Element, ElementKind, Function, FunctionHandler, Matrix};
use crate::path::TreePath;
use crate::tree::Tree;
use crate::types::{
    FunctionArgument, FunctionContents, Label, MatrixContents, MatrixMode, MatrixType,
    NodeContents, ParameterAccess, ParameterContents, ParameterType, Value, MAX_MATRIX_SIZE,
};
use crate::{Error, Result};

/// Named function handlers available to descriptions
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    handlers: HashMap<String, Arc<dyn FunctionHandler>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, name: impl Into<String>, handler: H) -> &mut Self
    where
        H: FunctionHandler + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn FunctionHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// One element of a tree description
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_online: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Parameter type for parameters, topology for matrices
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enumeration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_identifier: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub func: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<ArgumentDescription>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub result: Vec<ArgumentDescription>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_total_connects: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_connects_per_target: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<LabelDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connections: Option<Vec<ConnectionDescription>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ElementDescription>,
}

/// Function argument or result slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentDescription {
    #[serde(rename = "type")]
    pub arg_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Matrix label block, either `{basePath, description}` or a bare path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LabelDescription {
    Block {
        #[serde(rename = "basePath")]
        base_path: TreePath,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Path(TreePath),
}

/// Initial connection state of one matrix target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDescription {
    #[serde(default)]
    pub target: u32,
    #[serde(default)]
    pub sources: Vec<u32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub locked: bool,
}

/// Parse a JSON description and build a tree from it
pub fn load_str(json: &str, registry: &FunctionRegistry) -> Result<Tree> {
    let descriptions: Vec<ElementDescription> = serde_json::from_str(json)?;
    build(&descriptions, registry)
}

/// Build a tree from parsed descriptions
pub fn build(descriptions: &[ElementDescription], registry: &FunctionRegistry) -> Result<Tree> {
    let mut tree = Tree::new();
    for element in build_level(descriptions, registry, &TreePath::root())? {
        tree.add_element(element);
    }
    debug!("Loaded tree with {} elements", tree.walk().len());
    Ok(tree)
}

fn build_level(
    descriptions: &[ElementDescription],
    registry: &FunctionRegistry,
    parent: &TreePath,
) -> Result<Vec<Element>> {
    let mut seen = HashSet::new();
    let mut elements = Vec::with_capacity(descriptions.len());
    for (index, description) in descriptions.iter().enumerate() {
        let number = description.number.unwrap_or(index as u32);
        let path = parent.child(number);
        if !seen.insert(number) {
            return Err(Error::InvalidTree(format!("duplicate element number at {}", path)));
        }

        let mut element = Element::new(number, build_kind(description, registry, &path)?);
        for child in build_level(&description.children, registry, &path)? {
            element.add_child(child);
        }
        elements.push(element);
    }
    Ok(elements)
}

fn build_kind(
    description: &ElementDescription,
    registry: &FunctionRegistry,
    path: &TreePath,
) -> Result<ElementKind> {
    if let Some(value) = &description.value {
        return build_parameter(description, value.clone(), path).map(ElementKind::Parameter);
    }
    if let Some(name) = &description.func {
        let handler = registry
            .get(name)
            .ok_or_else(|| Error::InvalidTree(format!("unknown function '{}' at {}", name, path)))?;
        let contents = FunctionContents {
            identifier: description.identifier.clone(),
            description: description.description.clone(),
            arguments: build_arguments(&description.arguments, path)?,
            result: build_arguments(&description.result, path)?,
        };
        return Ok(ElementKind::Function(
            Function::new(contents, handler).with_name(name.clone()),
        ));
    }
    if let Some(target_count) = description.target_count {
        return build_matrix(description, target_count, path).map(ElementKind::Matrix);
    }

    Ok(ElementKind::Node(NodeContents {
        identifier: description.identifier.clone(),
        description: description.description.clone(),
        is_online: description.is_online,
    }))
}

fn build_parameter(
    description: &ElementDescription,
    value: Value,
    path: &TreePath,
) -> Result<ParameterContents> {
    let parameter_type = match &description.kind {
        Some(name) => ParameterType::from_name(name).ok_or_else(|| {
            Error::InvalidTree(format!("invalid parameter type '{}' at {}", name, path))
        })?,
        None => ParameterType::String,
    };
    let access = match &description.access {
        Some(name) => ParameterAccess::from_name(name).ok_or_else(|| {
            Error::InvalidTree(format!("invalid access '{}' at {}", name, path))
        })?,
        None => ParameterAccess::Read,
    };

    Ok(ParameterContents {
        identifier: description.identifier.clone(),
        description: description.description.clone(),
        value: Some(value),
        parameter_type: Some(parameter_type),
        access: Some(access),
        minimum: description.minimum.clone(),
        maximum: description.maximum.clone(),
        default: description.default.clone(),
        enumeration: description.enumeration.clone(),
        stream_identifier: description.stream_identifier,
    })
}

fn build_arguments(arguments: &[ArgumentDescription], path: &TreePath) -> Result<Vec<FunctionArgument>> {
    arguments
        .iter()
        .map(|a| {
            let arg_type = ParameterType::from_name(&a.arg_type).ok_or_else(|| {
                Error::InvalidTree(format!("invalid argument type '{}' at {}", a.arg_type, path))
            })?;
            Ok(FunctionArgument {
                arg_type,
                name: a.name.clone(),
            })
        })
        .collect()
}

fn build_matrix(description: &ElementDescription, target_count: u32, path: &TreePath) -> Result<Matrix> {
    let matrix_type = match &description.kind {
        Some(name) => MatrixType::from_name(name).ok_or_else(|| {
            Error::InvalidTree(format!("invalid matrix type '{}' at {}", name, path))
        })?,
        None => MatrixType::OneToN,
    };
    let mode = match &description.mode {
        Some(name) => MatrixMode::from_name(name).ok_or_else(|| {
            Error::InvalidTree(format!("invalid matrix mode '{}' at {}", name, path))
        })?,
        None => MatrixMode::Linear,
    };
    let source_count = description.source_count.unwrap_or(0);
    if target_count > MAX_MATRIX_SIZE || source_count > MAX_MATRIX_SIZE {
        return Err(Error::InvalidTree(format!(
            "matrix at {} is larger than {}x{}",
            path, MAX_MATRIX_SIZE, MAX_MATRIX_SIZE
        )));
    }

    let mut contents = MatrixContents::new(matrix_type, target_count, source_count);
    contents.identifier = description.identifier.clone();
    contents.description = description.description.clone();
    contents.mode = mode;
    contents.maximum_total_connects = description.maximum_total_connects;
    contents.maximum_connects_per_target = description.maximum_connects_per_target;
    if matrix_type == MatrixType::NToN {
        contents
            .maximum_total_connects
            .get_or_insert(target_count.saturating_mul(source_count));
        contents
            .maximum_connects_per_target
            .get_or_insert(source_count);
    }
    contents.labels = description
        .labels
        .iter()
        .map(|label| match label {
            LabelDescription::Block {
                base_path,
                description,
            } => Label {
                base_path: base_path.clone(),
                description: description.clone(),
            },
            LabelDescription::Path(base_path) => Label {
                base_path: base_path.clone(),
                description: None,
            },
        })
        .collect();

    let mut matrix = Matrix::new(contents);
    for connection in description.connections.iter().flatten() {
        if !matrix.has_target(connection.target) {
            return Err(Error::InvalidTree(format!(
                "connection target {} out of range at {}",
                connection.target, path
            )));
        }
        if connection.sources.iter().any(|s| *s >= source_count) {
            return Err(Error::InvalidTree(format!(
                "connection source out of range for target {} at {}",
                connection.target, path
            )));
        }
        matrix.set_sources(connection.target, connection.sources.clone());
        matrix.set_locked(connection.target, connection.locked);
    }
    matrix
        .check_connections()
        .map_err(|reason| Error::InvalidTree(format!("{} at {}", reason, path)))?;
    Ok(matrix)
}

impl Tree {
    /// Export the tree in description form
    pub fn to_description(&self) -> Vec<ElementDescription> {
        self.elements().iter().map(describe).collect()
    }

    /// Export the tree as pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_description())?)
    }
}

fn describe(element: &Element) -> ElementDescription {
    let mut out = ElementDescription {
        number: Some(element.number()),
        children: element.children().iter().map(describe).collect(),
        ..Default::default()
    };

    match element.kind() {
        ElementKind::Node(c) => {
            out.identifier = c.identifier.clone();
            out.description = c.description.clone();
            out.is_online = c.is_online;
        }
        ElementKind::Parameter(c) => {
            out.identifier = c.identifier.clone();
            out.description = c.description.clone();
            out.value = Some(c.value.clone().unwrap_or(Value::Null));
            out.kind = Some(c.parameter_type.unwrap_or_default().name().to_string());
            out.access = Some(c.access.unwrap_or_default().name().to_string());
            out.minimum = c.minimum.clone();
            out.maximum = c.maximum.clone();
            out.default = c.default.clone();
            out.enumeration = c.enumeration.clone();
            out.stream_identifier = c.stream_identifier;
        }
        ElementKind::Matrix(m) => {
            let c = &m.contents;
            out.identifier = c.identifier.clone();
            out.description = c.description.clone();
            out.kind = Some(c.matrix_type.name().to_string());
            out.mode = Some(c.mode.name().to_string());
            out.target_count = Some(c.target_count);
            out.source_count = Some(c.source_count);
            out.maximum_total_connects = c.maximum_total_connects;
            out.maximum_connects_per_target = c.maximum_connects_per_target;
            out.labels = c
                .labels
                .iter()
                .map(|l| LabelDescription::Block {
                    base_path: l.base_path.clone(),
                    description: l.description.clone(),
                })
                .collect();
            out.connections = Some(
                m.connections()
                    .filter(|c| !c.sources.is_empty() || c.locked)
                    .map(|c| ConnectionDescription {
                        target: c.target,
                        sources: c.sources.clone(),
                        locked: c.locked,
                    })
                    .collect(),
            );
        }
        ElementKind::Function(f) => {
            out.identifier = f.contents.identifier.clone();
            out.description = f.contents.description.clone();
            out.func = Some(f.name().unwrap_or_default().to_string());
            out.arguments = describe_arguments(&f.contents.arguments);
            out.result = describe_arguments(&f.contents.result);
        }
    }
    out
}

fn describe_arguments(arguments: &[FunctionArgument]) -> Vec<ArgumentDescription> {
    arguments
        .iter()
        .map(|a| ArgumentDescription {
            arg_type: a.arg_type.name().to_string(),
            name: a.name.clone(),
        })
        .collect()
}
