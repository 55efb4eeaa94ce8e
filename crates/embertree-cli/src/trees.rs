//! Tree description files: loading, validation and export

use anyhow::{Context, Result};
use colored::Colorize;
use embertree_core::{loader, ElementKind, Tree};
use std::path::Path;

use crate::functions;

/// Load a JSON tree description, binding functions to the built-in handlers
pub fn load_tree(path: &Path) -> Result<Tree> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read tree description {}", path.display()))?;
    loader::load_str(&text, &functions::registry())
        .with_context(|| format!("Invalid tree description {}", path.display()))
}

/// Element counts by kind: nodes, parameters, matrices, functions
pub fn census(tree: &Tree) -> [usize; 4] {
    let mut counts = [0; 4];
    for element in tree.walk() {
        let slot = match element.kind() {
            ElementKind::Node(_) => 0,
            ElementKind::Parameter(_) => 1,
            ElementKind::Matrix(_) => 2,
            ElementKind::Function(_) => 3,
        };
        counts[slot] += 1;
    }
    counts
}

pub fn check(path: &Path) -> Result<()> {
    let tree = load_tree(path)?;
    let [nodes, parameters, matrices, functions] = census(&tree);

    println!("{} {} is valid", "OK".green().bold(), path.display());
    println!("  Nodes:      {}", nodes);
    println!("  Parameters: {}", parameters);
    println!("  Matrices:   {}", matrices);
    println!("  Functions:  {}", functions);

    for element in tree.walk() {
        if let Some(matrix) = element.as_matrix() {
            println!(
                "  {} {} {}x{} ({} connected)",
                element.path().to_string().yellow(),
                matrix.matrix_type().name(),
                matrix.contents.target_count,
                matrix.contents.source_count,
                matrix.total_connections()
            );
        }
    }
    Ok(())
}

pub fn dump(path: &Path) -> Result<()> {
    let tree = load_tree(path)?;
    println!("{}", tree.to_json()?);
    Ok(())
}
