//! The provider tree and its response shapes

use tracing::debug;

use crate::element::Element;
use crate::message::{ItemKind, Root, TreeItem};
use crate::path::TreePath;
use crate::{Error, Result};

/// Element tree rooted at an anonymous node with the empty path
#[derive(Debug, Clone)]
pub struct Tree {
    root: Element,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        Self {
            root: Element::root(),
        }
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    /// Top-level elements
    pub fn elements(&self) -> &[Element] {
        self.root.children()
    }

    /// Attach a top-level element
    pub fn add_element(&mut self, element: Element) -> &mut Element {
        self.root.add_child(element)
    }

    /// Builder form of [`Tree::add_element`]
    pub fn with_element(mut self, element: Element) -> Self {
        self.add_element(element);
        self
    }

    /// Look up an element by qualified path
    pub fn get(&self, path: &TreePath) -> Option<&Element> {
        let mut current = &self.root;
        for number in path.numbers() {
            current = current.child(*number)?;
        }
        Some(current)
    }

    pub fn get_mut(&mut self, path: &TreePath) -> Option<&mut Element> {
        let mut current = &mut self.root;
        for number in path.numbers() {
            current = current.child_mut(*number)?;
        }
        Some(current)
    }

    /// Look up an element by path string
    pub fn resolve(&self, path: &str) -> Result<&Element> {
        let path = TreePath::parse(path)?;
        self.get(&path).ok_or(Error::PathNotFound(path))
    }

    /// Follow a relative request chain from the root
    ///
    /// Returns the path of the element the chain ends at together with the
    /// terminal item. A terminal command applies to the element above it; a
    /// terminal element item carries contents for the element it names.
    pub fn resolve_relative<'a>(&self, item: &'a TreeItem) -> Result<(TreePath, &'a TreeItem)> {
        let mut path = TreePath::root();
        let mut current = item;
        loop {
            if current.is_command() {
                return Ok((path, current));
            }

            let number = current.number.ok_or_else(|| {
                Error::InvalidRequest(format!("relative item below '{}' has no number", path))
            })?;
            path = path.child(number);
            if self.get(&path).is_none() {
                return Err(Error::PathNotFound(path));
            }

            match current.children.as_slice() {
                [] => return Ok((path, current)),
                [next] => current = next,
                _ => {
                    return Err(Error::InvalidRequest(format!(
                        "relative item at {} has {} children",
                        path,
                        current.children.len()
                    )))
                }
            }
        }
    }

    /// Hot-swap the subtree at `path`, returning the element it replaced
    pub fn replace_element(&mut self, path: &TreePath, element: Element) -> Result<Element> {
        if path.is_root() {
            return Err(Error::InvalidRequest("cannot replace the tree root".to_string()));
        }
        let parent = self
            .get_mut(&path.parent())
            .ok_or_else(|| Error::PathNotFound(path.clone()))?;

        let mut element = element;
        element.rebase(path.clone());
        let replaced = parent
            .replace_child(element)
            .ok_or_else(|| Error::PathNotFound(path.clone()))?;
        debug!("Replaced element at {}", path);
        Ok(replaced)
    }

    /// Visit every element below the root, parents before children
    pub fn walk(&self) -> Vec<&Element> {
        let mut out = Vec::new();
        let mut stack: Vec<&Element> = self.root.children().iter().rev().collect();
        while let Some(element) = stack.pop() {
            out.push(element);
            stack.extend(element.children().iter().rev());
        }
        out
    }

    /// The minimal root: each top-level element's number and kind
    pub fn minimal(&self) -> Root {
        Root {
            elements: self
                .root
                .children()
                .iter()
                .map(|e| TreeItem::new(e.number(), e.bare_kind()))
                .collect(),
            results: Vec::new(),
        }
    }

    /// Relative response for the element at `path`: the ancestor branch
    /// down to the element's full form, whose children come in minimal form
    pub fn response(&self, path: &TreePath) -> Option<Root> {
        let element = self.get(path)?;
        let children: Vec<TreeItem> = element.children().iter().map(Element::to_item).collect();

        if element.is_root() {
            return Some(Root {
                elements: children,
                results: Vec::new(),
            });
        }

        let mut item = element.to_item();
        item.children = children;
        Some(Root::with_element(self.branch(path, item)))
    }

    /// Wrap `leaf` in bare items for each ancestor of `path`
    pub fn branch(&self, path: &TreePath, leaf: TreeItem) -> TreeItem {
        let numbers = path.numbers();
        let mut item = leaf;
        for depth in (1..numbers.len()).rev() {
            let ancestor = TreePath::from(&numbers[..depth]);
            let kind = match self.get(&ancestor) {
                Some(e) => e.bare_kind(),
                None => ItemKind::Node(None),
            };
            let mut parent = TreeItem::new(numbers[depth - 1], kind);
            parent.children.push(item);
            item = parent;
        }
        item
    }

    /// Qualified response for the element at `path`: its own minimal
    /// qualified form (unless it is the root) followed by each child's
    pub fn qualified_response(&self, path: &TreePath) -> Option<Root> {
        let element = self.get(path)?;
        let mut root = Root::new();
        if !element.is_root() {
            root.push(element.to_qualified());
        }
        for child in element.children() {
            root.push(child.to_qualified());
        }
        Some(root)
    }

    /// Current default source per target of the matrix at `path`
    ///
    /// Defaults live in a node next to the matrix's first label block:
    /// its number is one past the label node's, and its N-th child is a
    /// parameter holding target N's default source. A negative or missing
    /// value means that target has no default.
    pub fn default_sources(&mut self, path: &TreePath) -> Option<Vec<Option<u32>>> {
        let cached = self.get(path)?.as_matrix()?.default_sources.clone();
        let paths = match cached {
            Some(paths) => paths,
            None => {
                let paths = self.locate_default_sources(path)?;
                if let Some(matrix) = self.get_mut(path).and_then(Element::as_matrix_mut) {
                    matrix.default_sources = Some(paths.clone());
                }
                paths
            }
        };

        Some(
            paths
                .iter()
                .map(|p| {
                    self.get(p)
                        .and_then(Element::as_parameter)
                        .and_then(|c| c.value.as_ref())
                        .and_then(|v| v.as_u32())
                })
                .collect(),
        )
    }

    fn locate_default_sources(&self, path: &TreePath) -> Option<Vec<TreePath>> {
        let matrix = self.get(path)?.as_matrix()?;
        let label = matrix.contents.labels.first()?;
        let labels = self.get(&label.base_path)?;
        if labels.is_root() {
            return None;
        }
        let defaults = self.get(&label.base_path.sibling(labels.number() + 1))?;
        Some(defaults.children().iter().map(|c| c.path().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Matrix;
    use crate::types::{Label, MatrixContents, MatrixType, NodeContents, ParameterContents, Value};

    fn tree() -> Tree {
        let mut contents = MatrixContents::new(MatrixType::OneToN, 2, 4);
        contents.labels.push(Label {
            base_path: TreePath::parse("0.1").unwrap(),
            description: None,
        });

        Tree::new().with_element(
            Element::node(0, NodeContents::default())
                .with_child(Element::matrix(0, Matrix::new(contents)))
                .with_child(Element::node(1, NodeContents::default()))
                .with_child(
                    Element::node(2, NodeContents::default())
                        .with_child(Element::parameter(0, ParameterContents::new(3.into())))
                        .with_child(Element::parameter(1, ParameterContents::new((-1).into()))),
                ),
        )
    }

    #[test]
    fn test_lookup() {
        let tree = tree();
        assert!(tree.get(&TreePath::parse("0.2.1").unwrap()).is_some());
        assert!(tree.get(&TreePath::parse("0.9").unwrap()).is_none());
        assert!(tree.get(&TreePath::root()).unwrap().is_root());
        assert!(matches!(tree.resolve("0.5"), Err(Error::PathNotFound(_))));
    }

    #[test]
    fn test_resolve_relative() {
        use crate::message::{Command, CommandKind};

        let tree = tree();
        let request = TreeItem::node(0).with_child(
            TreeItem::node(2).with_child(TreeItem::command(Command::new(CommandKind::GetDirectory))),
        );
        let (path, terminal) = tree.resolve_relative(&request).unwrap();
        assert_eq!(path.to_string(), "0.2");
        assert!(terminal.is_command());

        let request = TreeItem::node(0).with_child(TreeItem::parameter(
            2,
            ParameterContents::new(1.into()),
        ));
        let (path, terminal) = tree.resolve_relative(&request).unwrap();
        assert_eq!(path.to_string(), "0.2");
        assert!(terminal.is_parameter());

        let missing = TreeItem::node(0).with_child(TreeItem::node(9));
        assert!(matches!(
            tree.resolve_relative(&missing),
            Err(Error::PathNotFound(_))
        ));

        let mut unnumbered = TreeItem::node(0);
        unnumbered.number = None;
        assert!(matches!(
            tree.resolve_relative(&unnumbered),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_relative_response_branch() {
        let tree = tree();
        let root = tree.response(&TreePath::parse("0.2").unwrap()).unwrap();
        let top = &root.elements[0];
        assert_eq!(top.number, Some(0));
        assert_eq!(top.kind, ItemKind::Node(None));
        let node = &top.children[0];
        assert_eq!(node.number, Some(2));
        assert_eq!(node.children.len(), 2);
        assert!(node.children[0].children.is_empty());
    }

    #[test]
    fn test_qualified_response() {
        let tree = tree();
        let root = tree.qualified_response(&TreePath::parse("0").unwrap()).unwrap();
        let paths: Vec<String> = root
            .elements
            .iter()
            .filter_map(|i| i.path.as_ref().map(|p| p.to_string()))
            .collect();
        assert_eq!(paths, vec!["0", "0.0", "0.1", "0.2"]);

        let root = tree.qualified_response(&TreePath::root()).unwrap();
        assert_eq!(root.elements.len(), 1);
    }

    #[test]
    fn test_default_sources() {
        let mut tree = tree();
        let defaults = tree.default_sources(&TreePath::parse("0.0").unwrap()).unwrap();
        assert_eq!(defaults, vec![Some(3), None]);

        // values are read live after the paths are cached
        if let Some(p) = tree
            .get_mut(&TreePath::parse("0.2.1").unwrap())
            .and_then(Element::as_parameter_mut)
        {
            p.value = Some(1.into());
        }
        let defaults = tree.default_sources(&TreePath::parse("0.0").unwrap()).unwrap();
        assert_eq!(defaults, vec![Some(3), Some(1)]);

        if let Some(p) = tree
            .get_mut(&TreePath::parse("0.2.1").unwrap())
            .and_then(Element::as_parameter_mut)
        {
            p.value = Some(Value::Real(1.7));
        }
        let defaults = tree.default_sources(&TreePath::parse("0.0").unwrap()).unwrap();
        assert_eq!(defaults, vec![Some(3), None]);
    }

    #[test]
    fn test_replace_element() {
        let mut tree = tree();
        let path = TreePath::parse("0.2").unwrap();
        let replacement = Element::node(7, NodeContents::default())
            .with_child(Element::parameter(4, ParameterContents::new(true.into())));
        let old = tree.replace_element(&path, replacement).unwrap();
        assert_eq!(old.children().len(), 2);

        let leaf = tree.get(&TreePath::parse("0.2.4").unwrap()).unwrap();
        assert_eq!(leaf.path().to_string(), "0.2.4");
        let whole = tree.root().clone();
        assert!(tree.replace_element(&TreePath::root(), whole).is_err());
        assert!(tree
            .replace_element(&TreePath::parse("0.8").unwrap(), Element::node(8, NodeContents::default()))
            .is_err());
    }

    #[test]
    fn test_walk_order() {
        let tree = tree();
        let paths: Vec<String> = tree.walk().iter().map(|e| e.path().to_string()).collect();
        assert_eq!(paths, vec!["0", "0.0", "0.1", "0.2", "0.2.0", "0.2.1"]);
    }
}
